//! Application-level error type shared across the binary and services.

use thiserror::Error;

use crate::config;
use crate::docx::DocxTextError;
use crate::paths::PathError;
use crate::pipeline::PipelineError;
use crate::server;
use crate::services::engine::EngineError;
use crate::services::jobs::CorrectionJobStoreError;
use crate::services::storage::CorrectionResultStoreError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    ConfigLoad(#[from] config::AppConfigError),
    #[error(transparent)]
    Server(#[from] server::ServerError),
    #[error(transparent)]
    Paths(#[from] PathError),
    #[error(transparent)]
    Jobs(#[from] Box<CorrectionJobStoreError>),
    #[error(transparent)]
    Results(#[from] Box<CorrectionResultStoreError>),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error(transparent)]
    Docx(#[from] DocxTextError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<CorrectionJobStoreError> for AppError {
    fn from(e: CorrectionJobStoreError) -> Self {
        AppError::Jobs(Box::new(e))
    }
}

impl From<CorrectionResultStoreError> for AppError {
    fn from(e: CorrectionResultStoreError) -> Self {
        AppError::Results(Box::new(e))
    }
}
