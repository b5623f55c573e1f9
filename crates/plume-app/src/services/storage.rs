//! LMDB-backed persistence for finished correction runs.
//!
//! Persistence is best effort: the orchestrator logs a save failure and
//! still reports the job as completed, so a full record here is a bonus,
//! not a prerequisite for the status endpoint.

use crate::paths::{AppPaths, PathError};
use crate::pipeline::correction::{Correction, DocumentMetadata};
use bincode::config;
use bincode::error::{DecodeError, EncodeError};
use bincode::serde::{decode_from_slice, encode_to_vec};
use heed::types::{Bytes, Str};
use heed::{Database, Env, EnvOpenOptions};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const RESULT_ENV_MAP_SIZE_BYTES: usize = 1 << 28; // 256 MiB

/// Final output of a correction run: document metadata plus the verified
/// correction list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrectionRecord {
    pub metadata: DocumentMetadata,
    pub corrections: Vec<Correction>,
}

#[derive(Debug, Error)]
pub enum CorrectionResultStoreError {
    #[error(transparent)]
    Path(#[from] PathError),
    #[error(transparent)]
    Heed(#[from] heed::Error),
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

#[derive(Debug)]
pub struct CorrectionResultStore {
    env: Env,
    records: Database<Str, Bytes>,
}

impl CorrectionResultStore {
    pub fn open(paths: &AppPaths) -> Result<Self, CorrectionResultStoreError> {
        let path = paths.results_lmdb_dir()?;
        debug_assert!(path.exists());

        let mut options = EnvOpenOptions::new();
        options.max_dbs(8);
        options.map_size(RESULT_ENV_MAP_SIZE_BYTES);
        let env = unsafe {
            // SAFETY: LMDB requires callers to uphold environment lifetime invariants.
            options.open(&path)?
        };
        let records = {
            let rtxn = env.read_txn()?;
            let opened = env.open_database::<Str, Bytes>(&rtxn, Some("results"))?;
            drop(rtxn);
            match opened {
                Some(existing) => existing,
                None => {
                    let mut wtxn = env.write_txn()?;
                    let db = env.create_database::<Str, Bytes>(&mut wtxn, Some("results"))?;
                    wtxn.commit()?;
                    db
                }
            }
        };
        Ok(Self { env, records })
    }

    pub fn save(
        &self,
        job_id: &str,
        record: &CorrectionRecord,
    ) -> Result<(), CorrectionResultStoreError> {
        debug_assert!(!job_id.is_empty());
        let mut wtxn = self.env.write_txn()?;
        let encoded = encode_to_vec(record, config::standard())?;
        self.records.put(&mut wtxn, job_id, encoded.as_slice())?;
        wtxn.commit()?;
        Ok(())
    }

    pub fn get(
        &self,
        job_id: &str,
    ) -> Result<Option<CorrectionRecord>, CorrectionResultStoreError> {
        debug_assert!(!job_id.is_empty());
        let rtxn = self.env.read_txn()?;
        let value = self.records.get(&rtxn, job_id)?;
        if let Some(raw) = value {
            let (record, _) = decode_from_slice::<CorrectionRecord, _>(raw, config::standard())?;
            Ok(Some(record))
        } else {
            Ok(None)
        }
    }
}
