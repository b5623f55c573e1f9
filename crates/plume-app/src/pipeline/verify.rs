//! Parallel false-positive verification stage.
//!
//! Corrections are verified in fixed-size groups so a single oversized
//! request cannot stall the run. The stage fails open: when a verdict is
//! missing or a group's retries are exhausted, its corrections are kept as
//! verified rather than silently discarded.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::config::{EngineConfig, PipelineSettings};
use crate::pipeline::correction::Correction;
use crate::pipeline::prompts::build_verification_system_prompt;
use crate::services::concurrency::run_with_concurrency;
use crate::services::engine::{ChatMessage, CorrectionEngine, EngineError, ResponseFormat};
use crate::services::retry::{call_with_retry, RetryPolicy};
use crate::services::usage::TokenUsage;

#[derive(Debug, Serialize)]
struct VerificationItem<'a> {
    id: usize,
    original: &'a str,
    correction: &'a str,
    #[serde(rename = "type")]
    kind: &'a crate::pipeline::correction::CorrectionKind,
    explanation: &'a str,
}

#[derive(Debug, Serialize)]
struct VerificationRequest<'a> {
    corrections: Vec<VerificationItem<'a>>,
}

#[derive(Debug, Deserialize)]
struct VerificationReply {
    #[serde(default)]
    results: Vec<Verdict>,
}

#[derive(Debug, Deserialize)]
struct Verdict {
    id: usize,
    valid: bool,
}

/// Stamps every correction's `verified` flag, preserving input order, and
/// returns the usage consumed by the verification calls.
pub async fn verify_corrections(
    engine: &Arc<dyn CorrectionEngine>,
    corrections: Vec<Correction>,
    engine_cfg: &EngineConfig,
    settings: &PipelineSettings,
) -> (Vec<Correction>, TokenUsage) {
    if corrections.is_empty() {
        return (corrections, TokenUsage::default());
    }

    let batch_size = settings.verify_batch_size.max(1);
    let groups: Vec<Vec<Correction>> = corrections
        .chunks(batch_size)
        .map(|group| group.to_vec())
        .collect();

    let tasks: Vec<_> = groups
        .into_iter()
        .map(|group| {
            let engine = Arc::clone(engine);
            move || verify_group(engine, group, engine_cfg)
        })
        .collect();

    let outcomes = run_with_concurrency(tasks, settings.verify_concurrency).await;

    let mut verified = Vec::new();
    let mut usage = TokenUsage::default();
    for (group, group_usage) in outcomes {
        verified.extend(group);
        usage += group_usage;
    }
    (verified, usage)
}

fn verification_policy(engine_cfg: &EngineConfig) -> RetryPolicy {
    // No per-attempt deadline here; verification batches are small and the
    // transport applies its own limits.
    RetryPolicy::new(
        engine_cfg.max_retries,
        Duration::from_millis(engine_cfg.retry_delay_ms),
    )
}

async fn verify_group(
    engine: Arc<dyn CorrectionEngine>,
    mut group: Vec<Correction>,
    engine_cfg: &EngineConfig,
) -> (Vec<Correction>, TokenUsage) {
    let policy = verification_policy(engine_cfg);

    let result = call_with_retry(
        &policy,
        |_attempt| {
            let engine = Arc::clone(&engine);
            let request = VerificationRequest {
                corrections: group
                    .iter()
                    .enumerate()
                    .map(|(id, c)| VerificationItem {
                        id,
                        original: &c.original,
                        correction: &c.correction,
                        kind: &c.kind,
                        explanation: &c.explanation,
                    })
                    .collect(),
            };
            let body = serde_json::to_string(&request);
            async move {
                let messages = vec![
                    ChatMessage::system(build_verification_system_prompt()),
                    ChatMessage::user(body?),
                ];
                let response = engine
                    .complete(&messages, ResponseFormat::JsonObject)
                    .await?;
                let reply: VerificationReply = serde_json::from_str(&response.content)?;
                Ok::<_, EngineError>((reply, response.usage))
            }
        },
        |attempt, err| {
            warn!(attempt, error = %err, "verification attempt failed, retrying");
        },
    )
    .await;

    match result {
        Ok((reply, usage)) => {
            let mut verdicts = vec![None; group.len()];
            for verdict in reply.results {
                if let Some(slot) = verdicts.get_mut(verdict.id) {
                    *slot = Some(verdict.valid);
                }
            }
            for (correction, verdict) in group.iter_mut().zip(verdicts) {
                // Missing verdicts fail open.
                correction.verified = Some(verdict.unwrap_or(true));
            }
            debug!(
                group_size = group.len(),
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                "verification group finished"
            );
            (group, usage)
        }
        Err(err) => {
            error!(error = %err, "verification group failed, keeping corrections unvetted");
            for correction in &mut group {
                correction.verified = Some(true);
            }
            (group, TokenUsage::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::correction::CorrectionKind;
    use crate::services::engine::EngineResponse;
    use async_trait::async_trait;

    fn correction(original: &str, replacement: &str) -> Correction {
        Correction {
            position: 0,
            original: original.to_string(),
            correction: replacement.to_string(),
            kind: CorrectionKind::Grammar,
            explanation: "test".to_string(),
            verified: None,
            chunk_index: Some(1),
        }
    }

    fn engine_cfg() -> EngineConfig {
        EngineConfig {
            model: "test".to_string(),
            temperature: 0.0,
            timeout_ms: 5_000,
            max_retries: 2,
            retry_delay_ms: 1,
            max_correction_words: 18,
            base_url: None,
        }
    }

    fn settings(batch_size: usize) -> PipelineSettings {
        PipelineSettings {
            chunk_concurrency: 4,
            verify_concurrency: 2,
            verify_batch_size: batch_size,
            style_guide: None,
        }
    }

    /// Engine that marks every even id valid and every odd id invalid, and
    /// omits the verdict for id 2 entirely.
    struct ParityEngine;

    #[async_trait]
    impl CorrectionEngine for ParityEngine {
        async fn complete(
            &self,
            messages: &[ChatMessage],
            _format: ResponseFormat,
        ) -> Result<EngineResponse, EngineError> {
            let request: serde_json::Value =
                serde_json::from_str(&messages.last().expect("request message").content)
                    .expect("request is json");
            let items = request["corrections"].as_array().expect("items");
            let results: Vec<serde_json::Value> = items
                .iter()
                .filter_map(|item| {
                    let id = item["id"].as_u64().expect("id");
                    if id == 2 {
                        return None;
                    }
                    Some(serde_json::json!({
                        "id": id,
                        "valid": id % 2 == 0,
                        "reason": "scripted"
                    }))
                })
                .collect();
            Ok(EngineResponse {
                content: serde_json::json!({ "results": results }).to_string(),
                usage: TokenUsage::new(50, 5),
            })
        }
    }

    struct AlwaysFailingEngine;

    #[async_trait]
    impl CorrectionEngine for AlwaysFailingEngine {
        async fn complete(
            &self,
            _messages: &[ChatMessage],
            _format: ResponseFormat,
        ) -> Result<EngineResponse, EngineError> {
            Err(EngineError::EmptyCompletion)
        }
    }

    #[tokio::test]
    async fn verdicts_map_back_by_id_and_missing_ones_fail_open() {
        let engine: Arc<dyn CorrectionEngine> = Arc::new(ParityEngine);
        let corrections = vec![
            correction("a", "b"),
            correction("c", "d"),
            correction("e", "f"),
            correction("g", "h"),
        ];

        let (verified, usage) =
            verify_corrections(&engine, corrections, &engine_cfg(), &settings(15)).await;

        assert_eq!(verified.len(), 4);
        assert_eq!(verified[0].verified, Some(true));
        assert_eq!(verified[1].verified, Some(false));
        // Id 2 had no verdict in the reply.
        assert_eq!(verified[2].verified, Some(true));
        assert_eq!(verified[3].verified, Some(false));
        assert_eq!(usage, TokenUsage::new(50, 5));
    }

    #[tokio::test]
    async fn groups_use_local_ids_and_results_keep_input_order() {
        let engine: Arc<dyn CorrectionEngine> = Arc::new(ParityEngine);
        let corrections: Vec<Correction> = (0..5)
            .map(|i| correction(&format!("orig-{i}"), &format!("fix-{i}")))
            .collect();

        // Batch size 2 yields groups [0,1] [2,3] [4]; ids restart per group.
        let (verified, usage) =
            verify_corrections(&engine, corrections, &engine_cfg(), &settings(2)).await;

        assert_eq!(verified.len(), 5);
        for (i, c) in verified.iter().enumerate() {
            assert_eq!(c.original, format!("orig-{i}"), "order must be preserved");
        }
        assert_eq!(verified[0].verified, Some(true));
        assert_eq!(verified[1].verified, Some(false));
        assert_eq!(verified[2].verified, Some(true));
        assert_eq!(verified[3].verified, Some(false));
        assert_eq!(verified[4].verified, Some(true));
        assert_eq!(usage, TokenUsage::new(150, 15));
    }

    #[tokio::test]
    async fn total_failure_keeps_corrections_as_verified() {
        let engine: Arc<dyn CorrectionEngine> = Arc::new(AlwaysFailingEngine);
        let corrections = vec![correction("a", "b"), correction("c", "d")];

        let (verified, usage) =
            verify_corrections(&engine, corrections, &engine_cfg(), &settings(15)).await;

        assert_eq!(verified.len(), 2);
        assert!(verified.iter().all(|c| c.verified == Some(true)));
        assert!(usage.is_zero());
    }

    #[tokio::test]
    async fn empty_input_short_circuits() {
        let engine: Arc<dyn CorrectionEngine> = Arc::new(AlwaysFailingEngine);
        let (verified, usage) =
            verify_corrections(&engine, Vec::new(), &engine_cfg(), &settings(15)).await;
        assert!(verified.is_empty());
        assert!(usage.is_zero());
    }
}
