//! Prompt construction for the correction and verification stages.
//!
//! The correction prompt is intentionally conservative: the engine is told to
//! flag only objective errors and never to rewrite style, and every reply
//! must be a JSON object so the stages can parse it without heuristics.

use crate::services::engine::ChatMessage;

/// Builds the correction system prompt, optionally appending a style guide
/// and rejection feedback from a failed prior attempt.
pub fn build_correction_system_prompt(
    style_guide: Option<&str>,
    retry_feedback: Option<&str>,
) -> String {
    let mut prompt = String::from(
        "You are a meticulous copy editor reviewing a manuscript excerpt.\n\
         \n\
         Find objective errors only: spelling mistakes, grammatical errors, \
         incorrect punctuation, and broken syntax. Never rewrite for style, \
         tone, or preference. If a sentence is correct, leave it alone.\n\
         \n\
         For every error report:\n\
         - \"position\": the character offset of the error within the excerpt\n\
         - \"original\": the exact erroneous fragment, 3 to 6 words of \
         surrounding context so it can be located unambiguously\n\
         - \"correction\": the corrected fragment, covering the same span\n\
         - \"type\": one of \"spelling\", \"grammar\", \"punctuation\", \"syntax\"\n\
         - \"explanation\": one short sentence naming the error\n\
         \n\
         Keep corrections minimal. The correction must stay close in length \
         to the original fragment.\n\
         \n\
         Respond with a JSON object of the form \
         {\"corrections\": [{\"position\": ..., \"original\": ..., \
         \"correction\": ..., \"type\": ..., \"explanation\": ...}]}. \
         Return {\"corrections\": []} when the excerpt has no errors.",
    );

    if let Some(guide) = style_guide {
        prompt.push_str("\n\nEditorial style guide to respect:\n");
        prompt.push_str(guide);
    }

    if let Some(feedback) = retry_feedback {
        prompt.push_str("\n\nURGENT - your previous response was rejected:\n");
        prompt.push_str(feedback);
    }

    prompt
}

/// One worked example shown to the engine before the real excerpt.
pub fn correction_few_shot() -> (ChatMessage, ChatMessage) {
    let example_input = "The manager went too the store. She dont like waiting in line.";
    let example_output = r#"{"corrections": [
  {"position": 12, "original": "went too the store", "correction": "went to the store", "type": "spelling", "explanation": "Wrong homophone: \"too\" should be \"to\"."},
  {"position": 36, "original": "She dont like", "correction": "She doesn't like", "type": "grammar", "explanation": "Missing apostrophe and wrong verb form."}
]}"#;

    (
        ChatMessage::user(example_input),
        ChatMessage::assistant(example_output),
    )
}

/// Builds the system prompt for the false-positive verification pass.
pub fn build_verification_system_prompt() -> String {
    String::from(
        "You are reviewing proposed manuscript corrections for false \
         positives. For each numbered correction decide whether it fixes a \
         genuine objective error.\n\
         \n\
         Mark a correction invalid when:\n\
         - the original text was already correct\n\
         - the correction changes style or word choice rather than fixing an error\n\
         - the correction introduces a new error\n\
         - the correction alters the author's meaning\n\
         \n\
         Respond with a JSON object of the form \
         {\"results\": [{\"id\": ..., \"valid\": true or false, \
         \"reason\": \"...\"}]} containing one entry per correction, \
         using the same ids you were given.",
    )
}
