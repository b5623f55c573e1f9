use std::time::{SystemTime, UNIX_EPOCH};

use crate::paths::{AppPaths, PathError};
use bincode::config;
use bincode::error::{DecodeError, EncodeError};
use bincode::serde::{decode_from_slice, encode_to_vec};
use heed::types::{Bytes, Str};
use heed::{Database, Env, EnvOpenOptions};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const JOB_ENV_MAP_SIZE_BYTES: usize = 1 << 28; // 256 MiB

/// Lifecycle state of a correction job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CorrectionJobStatus {
    Started,
    Processing,
    Completed,
    Failed,
}

/// Metadata persisted for every correction job; this is what the status
/// endpoint serves while the pipeline runs in the background.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrectionJob {
    pub job_id: String,
    pub filename: String,
    pub file_size: u64,
    pub status: CorrectionJobStatus,
    pub error: Option<String>,
    #[serde(default)]
    pub total_chunks: u32,
    #[serde(default)]
    pub corrections_found: u32,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

impl CorrectionJob {
    #[must_use]
    pub fn new(job_id: impl Into<String>, filename: impl Into<String>, file_size: u64) -> Self {
        let job_id = job_id.into();
        debug_assert!(!job_id.is_empty());
        let now_ms = current_timestamp_ms();
        Self {
            job_id,
            filename: filename.into(),
            file_size,
            status: CorrectionJobStatus::Started,
            error: None,
            total_chunks: 0,
            corrections_found: 0,
            created_at_ms: now_ms,
            updated_at_ms: now_ms,
        }
    }

    pub fn set_status(&mut self, status: CorrectionJobStatus, error: Option<String>) {
        self.status = status;
        self.error = error;
        self.updated_at_ms = current_timestamp_ms();
    }
}

pub(crate) fn current_timestamp_ms() -> i64 {
    let since_epoch = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    since_epoch.as_millis() as i64
}

/// Errors emitted by the correction job store.
#[derive(Debug, Error)]
pub enum CorrectionJobStoreError {
    #[error(transparent)]
    Path(#[from] PathError),
    #[error(transparent)]
    Heed(#[from] heed::Error),
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("job `{0}` already exists")]
    Duplicate(String),
    #[error("job `{0}` not found")]
    NotFound(String),
}

/// LMDB-backed persistence for correction jobs.
#[derive(Debug)]
pub struct CorrectionJobStore {
    env: Env,
    jobs: Database<Str, Bytes>,
}

impl CorrectionJobStore {
    pub fn open(paths: &AppPaths) -> Result<Self, CorrectionJobStoreError> {
        let path = paths.jobs_lmdb_dir()?;
        debug_assert!(path.exists());

        let mut options = EnvOpenOptions::new();
        options.max_dbs(8);
        options.map_size(JOB_ENV_MAP_SIZE_BYTES);
        let env = unsafe {
            // SAFETY: LMDB requires callers to uphold environment lifetime invariants.
            options.open(&path)?
        };
        let jobs = {
            let rtxn = env.read_txn()?;
            let opened = env.open_database::<Str, Bytes>(&rtxn, Some("jobs"))?;
            drop(rtxn);
            match opened {
                Some(existing) => existing,
                None => {
                    let mut wtxn = env.write_txn()?;
                    let db = env.create_database::<Str, Bytes>(&mut wtxn, Some("jobs"))?;
                    wtxn.commit()?;
                    db
                }
            }
        };
        Ok(Self { env, jobs })
    }

    pub fn insert(&self, job: &CorrectionJob) -> Result<(), CorrectionJobStoreError> {
        debug_assert!(!job.job_id.is_empty());
        debug_assert!(job.status == CorrectionJobStatus::Started);

        let mut wtxn = self.env.write_txn()?;
        if self.jobs.get(&wtxn, job.job_id.as_str())?.is_some() {
            return Err(CorrectionJobStoreError::Duplicate(job.job_id.clone()));
        }
        let encoded = encode_to_vec(job, config::standard())?;
        self.jobs
            .put(&mut wtxn, job.job_id.as_str(), encoded.as_slice())
            .map_err(CorrectionJobStoreError::from)?;
        wtxn.commit()?;
        Ok(())
    }

    pub fn get(&self, job_id: &str) -> Result<Option<CorrectionJob>, CorrectionJobStoreError> {
        debug_assert!(!job_id.is_empty());
        let rtxn = self.env.read_txn()?;
        let value = self.jobs.get(&rtxn, job_id)?;
        if let Some(raw) = value {
            let (job, _) = decode_from_slice::<CorrectionJob, _>(raw, config::standard())?;
            Ok(Some(job))
        } else {
            Ok(None)
        }
    }

    pub fn update_status(
        &self,
        job_id: &str,
        status: CorrectionJobStatus,
        error: Option<String>,
    ) -> Result<CorrectionJob, CorrectionJobStoreError> {
        debug_assert!(!job_id.is_empty());
        let mut wtxn = self.env.write_txn()?;
        let existing = self.jobs.get(&wtxn, job_id)?;
        let Some(raw) = existing else {
            return Err(CorrectionJobStoreError::NotFound(job_id.to_string()));
        };
        let (mut job, _) = decode_from_slice::<CorrectionJob, _>(raw, config::standard())?;
        job.set_status(status, error);
        let encoded = encode_to_vec(&job, config::standard())?;
        self.jobs.put(&mut wtxn, job_id, encoded.as_slice())?;
        wtxn.commit()?;
        Ok(job)
    }

    pub fn upsert(&self, job: &CorrectionJob) -> Result<(), CorrectionJobStoreError> {
        debug_assert!(!job.job_id.is_empty());
        let mut wtxn = self.env.write_txn()?;
        let encoded = encode_to_vec(job, config::standard())?;
        self.jobs
            .put(&mut wtxn, job.job_id.as_str(), encoded.as_slice())
            .map_err(CorrectionJobStoreError::from)?;
        wtxn.commit()?;
        Ok(())
    }

    pub fn count_by_status(
        &self,
        status: CorrectionJobStatus,
    ) -> Result<usize, CorrectionJobStoreError> {
        let rtxn = self.env.read_txn()?;
        let iter = self.jobs.iter(&rtxn)?;
        let mut count = 0_usize;
        for entry in iter {
            let (_, raw) = entry?;
            let (job, _) = decode_from_slice::<CorrectionJob, _>(raw, config::standard())?;
            if job.status == status {
                count = count.saturating_add(1);
            }
        }
        Ok(count)
    }
}
