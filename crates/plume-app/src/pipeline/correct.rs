//! Parallel correction stage.
//!
//! Each chunk gets its own resilient engine call. A chunk whose retries are
//! exhausted degrades to an empty outcome instead of failing the job; losing
//! one chunk's corrections is preferable to losing the manuscript run.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, error, warn};

use crate::config::{EngineConfig, PipelineSettings};
use crate::pipeline::correction::Correction;
use crate::pipeline::prompts::{build_correction_system_prompt, correction_few_shot};
use crate::services::concurrency::run_with_concurrency;
use crate::services::engine::{ChatMessage, CorrectionEngine, EngineError, ResponseFormat};
use crate::services::retry::{call_with_retry, RetryPolicy};
use crate::services::usage::TokenUsage;
use crate::text::TextChunk;

/// Result of correcting one chunk. Defaults to empty when the chunk is
/// abandoned after exhausted retries.
#[derive(Debug, Clone, Default)]
pub struct ChunkOutcome {
    pub corrections: Vec<Correction>,
    pub usage: TokenUsage,
}

#[derive(Debug, Deserialize)]
struct CorrectionReply {
    #[serde(default)]
    corrections: Vec<Correction>,
}

/// Runs the correction stage over all chunks, preserving chunk order.
pub async fn correct_chunks(
    engine: &Arc<dyn CorrectionEngine>,
    chunks: &[TextChunk],
    engine_cfg: &EngineConfig,
    settings: &PipelineSettings,
) -> Vec<ChunkOutcome> {
    let tasks: Vec<_> = chunks
        .iter()
        .map(|chunk| {
            let engine = Arc::clone(engine);
            move || process_chunk(engine, chunk, engine_cfg, settings.style_guide.as_deref())
        })
        .collect();

    run_with_concurrency(tasks, settings.chunk_concurrency).await
}

fn correction_policy(engine_cfg: &EngineConfig) -> RetryPolicy {
    RetryPolicy::new(
        engine_cfg.max_retries,
        Duration::from_millis(engine_cfg.retry_delay_ms),
    )
    .with_timeout(Duration::from_millis(engine_cfg.timeout_ms))
}

async fn process_chunk(
    engine: Arc<dyn CorrectionEngine>,
    chunk: &TextChunk,
    engine_cfg: &EngineConfig,
    style_guide: Option<&str>,
) -> ChunkOutcome {
    let policy = correction_policy(engine_cfg);
    let (example_user, example_assistant) = correction_few_shot();
    let started = std::time::Instant::now();

    let result = call_with_retry(
        &policy,
        |attempt| {
            let engine = Arc::clone(&engine);
            let system =
                build_correction_system_prompt(style_guide, attempt.feedback.as_deref());
            let messages = vec![
                ChatMessage::system(system),
                example_user.clone(),
                example_assistant.clone(),
                ChatMessage::user(chunk.text.clone()),
            ];
            async move {
                let response = engine
                    .complete(&messages, ResponseFormat::JsonObject)
                    .await?;
                let reply: CorrectionReply = serde_json::from_str(&response.content)?;
                reject_overlong(&reply.corrections, engine_cfg.max_correction_words)?;
                Ok::<_, EngineError>((reply.corrections, response.usage))
            }
        },
        |attempt, err| {
            warn!(
                chunk_index = chunk.index,
                attempt,
                error = %err,
                "correction attempt failed, retrying"
            );
        },
    )
    .await;

    match result {
        Ok((raw, usage)) => {
            let corrections = clean_corrections(raw, chunk);
            debug!(
                chunk_index = chunk.index,
                corrections = corrections.len(),
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                duration_ms = started.elapsed().as_millis() as u64,
                "chunk corrected"
            );
            ChunkOutcome { corrections, usage }
        }
        Err(err) => {
            error!(
                chunk_index = chunk.index,
                error = %err,
                "chunk abandoned after exhausted retries"
            );
            ChunkOutcome::default()
        }
    }
}

fn reject_overlong(corrections: &[Correction], max_words: usize) -> Result<(), EngineError> {
    let overlong = corrections
        .iter()
        .filter(|c| c.exceeds_word_limit(max_words))
        .count();
    if overlong == 0 {
        return Ok(());
    }
    Err(EngineError::Rejected {
        reason: format!("{overlong} corrections exceed {max_words} words"),
        feedback: format!(
            "A previous response was rejected because {overlong} corrections \
             exceeded the limit of {max_words} words. Keep every correction \
             close in length to its original fragment and never rewrite whole \
             sentences."
        ),
    })
}

/// Drops no-op corrections and translates positions into document space.
fn clean_corrections(raw: Vec<Correction>, chunk: &TextChunk) -> Vec<Correction> {
    raw.into_iter()
        .filter(Correction::is_effective)
        .map(|mut c| {
            c.position += chunk.start_position;
            c.chunk_index = Some(chunk.index as u32 + 1);
            c
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::correction::CorrectionKind;
    use crate::services::engine::EngineResponse;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Engine that replays scripted JSON bodies in call order.
    struct ScriptedEngine {
        replies: Mutex<Vec<Result<String, ()>>>,
        calls: AtomicU32,
        last_system: Mutex<Option<String>>,
    }

    impl ScriptedEngine {
        fn new(replies: Vec<Result<String, ()>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies),
                calls: AtomicU32::new(0),
                last_system: Mutex::new(None),
            })
        }
    }

    #[async_trait]
    impl CorrectionEngine for ScriptedEngine {
        async fn complete(
            &self,
            messages: &[ChatMessage],
            _format: ResponseFormat,
        ) -> Result<EngineResponse, EngineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_system.lock().expect("mutex") = Some(messages[0].content.clone());
            let mut replies = self.replies.lock().expect("mutex");
            match replies.remove(0) {
                Ok(content) => Ok(EngineResponse {
                    content,
                    usage: TokenUsage::new(100, 20),
                }),
                Err(()) => Err(EngineError::EmptyCompletion),
            }
        }
    }

    fn chunk_at(index: usize, start: usize, text: &str) -> TextChunk {
        TextChunk {
            index,
            text: text.to_string(),
            start_position: start,
            end_position: start + text.len(),
        }
    }

    fn fast_engine_cfg() -> EngineConfig {
        EngineConfig {
            model: "test".to_string(),
            temperature: 0.0,
            timeout_ms: 5_000,
            max_retries: 2,
            retry_delay_ms: 1,
            max_correction_words: 4,
            base_url: None,
        }
    }

    fn settings() -> PipelineSettings {
        PipelineSettings {
            chunk_concurrency: 4,
            verify_concurrency: 2,
            verify_batch_size: 15,
            style_guide: None,
        }
    }

    fn reply_with(original: &str, correction: &str) -> String {
        serde_json::json!({
            "corrections": [{
                "position": 4,
                "original": original,
                "correction": correction,
                "type": "spelling",
                "explanation": "misspelling"
            }]
        })
        .to_string()
    }

    #[tokio::test]
    async fn positions_are_shifted_into_document_space() {
        let engine = ScriptedEngine::new(vec![Ok(reply_with("teh", "the"))]);
        let dyn_engine: Arc<dyn CorrectionEngine> = engine.clone();
        let chunks = vec![chunk_at(2, 900, "and teh cat sat")];

        let outcomes =
            correct_chunks(&dyn_engine, &chunks, &fast_engine_cfg(), &settings()).await;

        assert_eq!(outcomes.len(), 1);
        let correction = &outcomes[0].corrections[0];
        assert_eq!(correction.position, 904);
        assert_eq!(correction.chunk_index, Some(3));
        assert_eq!(correction.kind, CorrectionKind::Spelling);
        assert_eq!(outcomes[0].usage, TokenUsage::new(100, 20));
    }

    #[tokio::test]
    async fn noop_corrections_are_dropped() {
        let engine = ScriptedEngine::new(vec![Ok(reply_with("same", "same"))]);
        let dyn_engine: Arc<dyn CorrectionEngine> = engine.clone();
        let chunks = vec![chunk_at(0, 0, "same text")];

        let outcomes =
            correct_chunks(&dyn_engine, &chunks, &fast_engine_cfg(), &settings()).await;

        assert!(outcomes[0].corrections.is_empty());
    }

    #[tokio::test]
    async fn overlong_corrections_trigger_a_feedback_retry() {
        let engine = ScriptedEngine::new(vec![
            Ok(reply_with("a", "way too many words in here")),
            Ok(reply_with("teh", "the")),
        ]);
        let dyn_engine: Arc<dyn CorrectionEngine> = engine.clone();
        let chunks = vec![chunk_at(0, 0, "and teh cat sat")];

        let outcomes =
            correct_chunks(&dyn_engine, &chunks, &fast_engine_cfg(), &settings()).await;

        assert_eq!(engine.calls.load(Ordering::SeqCst), 2);
        assert_eq!(outcomes[0].corrections[0].correction, "the");
        let system = engine.last_system.lock().expect("mutex").clone();
        assert!(
            system.expect("second call recorded").contains("URGENT"),
            "retry prompt must carry the rejection feedback"
        );
    }

    #[tokio::test]
    async fn exhausted_retries_degrade_to_an_empty_outcome() {
        let engine = ScriptedEngine::new(vec![Err(()), Err(())]);
        let dyn_engine: Arc<dyn CorrectionEngine> = engine.clone();
        let chunks = vec![chunk_at(0, 0, "text")];

        let outcomes =
            correct_chunks(&dyn_engine, &chunks, &fast_engine_cfg(), &settings()).await;

        assert_eq!(engine.calls.load(Ordering::SeqCst), 2);
        assert!(outcomes[0].corrections.is_empty());
        assert!(outcomes[0].usage.is_zero());
    }

    /// Engine that answers based on the excerpt it is shown, so the reply
    /// mapping is independent of scheduling order.
    struct KeyedEngine;

    #[async_trait]
    impl CorrectionEngine for KeyedEngine {
        async fn complete(
            &self,
            messages: &[ChatMessage],
            _format: ResponseFormat,
        ) -> Result<EngineResponse, EngineError> {
            let excerpt = &messages.last().expect("excerpt message").content;
            let content = if excerpt.contains("teh") {
                reply_with("teh", "the")
            } else if excerpt.contains("recieve") {
                reply_with("recieve", "receive")
            } else {
                r#"{"corrections": []}"#.to_string()
            };
            Ok(EngineResponse {
                content,
                usage: TokenUsage::new(10, 2),
            })
        }
    }

    #[tokio::test]
    async fn outcomes_preserve_chunk_order() {
        let dyn_engine: Arc<dyn CorrectionEngine> = Arc::new(KeyedEngine);
        let chunks = vec![
            chunk_at(0, 0, "and teh cat"),
            chunk_at(1, 100, "clean text"),
            chunk_at(2, 200, "will recieve mail"),
        ];

        let outcomes =
            correct_chunks(&dyn_engine, &chunks, &fast_engine_cfg(), &settings()).await;

        assert_eq!(outcomes.len(), 3);
        assert_eq!(outcomes[0].corrections[0].correction, "the");
        assert_eq!(outcomes[0].corrections[0].chunk_index, Some(1));
        assert!(outcomes[1].corrections.is_empty());
        assert_eq!(outcomes[2].corrections[0].correction, "receive");
        assert_eq!(outcomes[2].corrections[0].chunk_index, Some(3));
    }
}
