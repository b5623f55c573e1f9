//! Orchestration layer for IO-bound pipeline services.
//!
//! Modules exposed here coordinate external systems (the correction engine,
//! job and result storage) and the scheduling primitives shared by the
//! pipeline stages. Keep stateless transforms in `crate::text` or
//! `crate::docx` so concurrency and resource accounting stay localized.

pub mod concurrency;
pub mod engine;
pub mod jobs;
pub mod retry;
pub mod storage;
pub mod usage;

pub use concurrency::run_with_concurrency;
pub use engine::{
    ChatMessage, ChatRole, CorrectionEngine, EngineError, EngineResponse, OpenAiChatEngine,
    ResponseFormat,
};
pub use jobs::{CorrectionJob, CorrectionJobStatus, CorrectionJobStore, CorrectionJobStoreError};
pub use retry::{call_with_retry, Attempt, RetryError, RetryPolicy, RetryableError};
pub use storage::{CorrectionRecord, CorrectionResultStore, CorrectionResultStoreError};
pub use usage::TokenUsage;
