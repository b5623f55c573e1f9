//! Correction pipeline: extract, chunk, correct, verify, persist.
//!
//! `run_correction_job` is the background entry point spawned per upload.
//! It owns the job's lifecycle in the job store, so the HTTP layer never
//! waits on the engine: clients poll the status endpoint instead.

pub mod correct;
pub mod correction;
pub mod prompts;
pub mod verify;

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{error, info};

use crate::config::AppConfig;
use crate::docx::{extract_text_from_docx, DocxTextError};
use crate::pipeline::correction::{Correction, DocumentMetadata};
use crate::services::engine::CorrectionEngine;
use crate::services::jobs::{CorrectionJobStatus, CorrectionJobStore, CorrectionJobStoreError};
use crate::services::storage::{CorrectionRecord, CorrectionResultStore};
use crate::services::usage::TokenUsage;
use crate::text::split_into_chunks;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Extract(#[from] DocxTextError),
    #[error(transparent)]
    Jobs(#[from] CorrectionJobStoreError),
}

/// Shared handles the pipeline and the HTTP layer both need.
pub struct PipelineContext {
    pub engine: Arc<dyn CorrectionEngine>,
    pub jobs: Arc<CorrectionJobStore>,
    pub results: Arc<CorrectionResultStore>,
    pub config: AppConfig,
}

/// Everything captured from the upload before the background task starts.
#[derive(Debug, Clone)]
pub struct JobIntake {
    pub job_id: String,
    pub filename: String,
    pub uploaded_at: DateTime<Utc>,
    pub bytes: Vec<u8>,
}

/// Runs one correction job to completion, recording failure in the job
/// store instead of propagating it.
pub async fn run_correction_job(ctx: Arc<PipelineContext>, intake: JobIntake) {
    let job_id = intake.job_id.clone();
    if let Err(err) = execute(&ctx, intake).await {
        error!(job_id = %job_id, error = %err, "correction job failed");
        if let Err(store_err) =
            ctx.jobs
                .update_status(&job_id, CorrectionJobStatus::Failed, Some(err.to_string()))
        {
            error!(job_id = %job_id, error = %store_err, "failed to record job failure");
        }
    }
}

async fn execute(ctx: &PipelineContext, intake: JobIntake) -> Result<(), PipelineError> {
    let started = Instant::now();
    ctx.jobs
        .update_status(&intake.job_id, CorrectionJobStatus::Processing, None)?;

    let text = extract_text_from_docx(&intake.bytes)?;
    let chunks = split_into_chunks(&text, &ctx.config.chunking);
    info!(
        job_id = %intake.job_id,
        characters = text.len(),
        chunks = chunks.len(),
        "document extracted and chunked"
    );

    let outcomes =
        correct::correct_chunks(&ctx.engine, &chunks, &ctx.config.engine, &ctx.config.pipeline)
            .await;

    let mut usage = TokenUsage::default();
    let mut corrections: Vec<Correction> = Vec::new();
    for outcome in outcomes {
        usage += outcome.usage;
        corrections.extend(outcome.corrections);
    }

    let (corrections, verify_usage) = verify::verify_corrections(
        &ctx.engine,
        corrections,
        &ctx.config.engine,
        &ctx.config.pipeline,
    )
    .await;
    usage += verify_usage;

    let elapsed = started.elapsed().as_secs_f64();
    let metadata = DocumentMetadata {
        job_id: intake.job_id.clone(),
        filename: intake.filename.clone(),
        uploaded_at: intake.uploaded_at,
        file_size: intake.bytes.len() as u64,
        total_characters: text.len(),
        total_chunks: chunks.len(),
        total_prompt_tokens: usage.prompt_tokens,
        total_completion_tokens: usage.completion_tokens,
        total_tokens: usage.total_tokens,
        processing_time_seconds: (elapsed * 10.0).round() / 10.0,
    };

    let record = CorrectionRecord {
        metadata,
        corrections,
    };

    persist_record(&ctx.results, &intake.job_id, &record);
    finish_job(&ctx.jobs, &intake.job_id, &record)?;

    info!(
        job_id = %intake.job_id,
        corrections = record.corrections.len(),
        total_tokens = usage.total_tokens,
        elapsed_s = record.metadata.processing_time_seconds,
        "correction job completed"
    );
    Ok(())
}

/// Saving the full record is best effort; the status endpoint still works
/// from the job store alone.
fn persist_record(results: &CorrectionResultStore, job_id: &str, record: &CorrectionRecord) {
    if let Err(err) = results.save(job_id, record) {
        error!(job_id = %job_id, error = %err, "failed to persist correction record");
    }
}

fn finish_job(
    jobs: &CorrectionJobStore,
    job_id: &str,
    record: &CorrectionRecord,
) -> Result<(), CorrectionJobStoreError> {
    let mut job = jobs
        .get(job_id)?
        .ok_or_else(|| CorrectionJobStoreError::NotFound(job_id.to_string()))?;
    job.total_chunks = record.metadata.total_chunks as u32;
    job.corrections_found = record.corrections.len() as u32;
    job.set_status(CorrectionJobStatus::Completed, None);
    jobs.upsert(&job)
}
