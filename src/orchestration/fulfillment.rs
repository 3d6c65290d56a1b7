//! Text of the engine-authored turns: catalogs, fulfillment turns and notes

use crate::orchestration::directives::GUIDE_REQUEST_TAG;
use crate::orchestration::resources::LoadedResource;
use crate::orchestration::trim::{trim_note, trim_to_words, TrimResult};

/// Group assigned to loaded guides
pub const GUIDE_GROUP: &str = "guides";

/// Appended to final content when the last call hit the token cap
pub const TRUNCATION_NOTE: &str =
    "[Note: this response was cut off because it reached the maximum output length.]";

/// Final user turn issued when the context loop ends on an unfulfilled request
pub const RECOVERY_PROMPT: &str = "You have used all available resource requests. \
Produce your final output now, using only the material already provided in this conversation. \
Do not request any further resources.";

const GUIDE_TURN_HEADER: &str =
    "Here are the craft guides you requested. Use them to complete the original task.";

const CONTEXT_TURN_HEADER: &str =
    "Here are the context resources you requested. Use them to complete the original task.";

/// A fulfillment turn ready to append to the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledTurn {
    /// User turn text
    pub text: String,
    /// Set when resource content exceeded the word budget
    pub trim: Option<TrimResult>,
}

/// Catalog block appended to the first guide-protocol turn
pub fn guide_catalog_section(ids: &[String]) -> String {
    let mut section = format!(
        "## Available craft guides\n\n\
         Before answering you may request any of these guides by replying with only \
         <{tag}>[\"guide-id\", ...]</{tag}>. Request guides only if they will materially \
         improve your answer.\n",
        tag = GUIDE_REQUEST_TAG
    );
    for id in ids {
        section.push_str("\n- ");
        section.push_str(id);
    }
    section
}

/// Placeholder content for a guide that failed to load
pub fn guide_failure_placeholder(id: &str, error: &anyhow::Error) -> String {
    format!("[Guide \"{}\" could not be loaded: {}]", id, error)
}

fn apply_budget(body: &str, kind: &str, word_budget: usize) -> (String, Option<TrimResult>) {
    let result = trim_to_words(body, word_budget);
    if !result.was_trimmed() {
        return (body.to_string(), None);
    }
    let text = format!("{}\n\n{}", result.trimmed, trim_note(kind, &result, word_budget));
    (text, Some(result))
}

/// Build the user turn delivering guides, trimming to `word_budget`
pub fn assemble_guide_turn(guides: &[LoadedResource], word_budget: usize) -> AssembledTurn {
    let body = guides
        .iter()
        .map(|guide| format!("### Guide: {}\n\n{}", guide.id, guide.content.trim()))
        .collect::<Vec<_>>()
        .join("\n\n---\n\n");

    let (body, trim) = apply_budget(&body, "guide", word_budget);

    AssembledTurn {
        text: format!("{}\n\n{}", GUIDE_TURN_HEADER, body),
        trim,
    }
}

/// Requested ids absent from `loaded`, in request order without repeats
pub fn missing_ids(requested: &[String], loaded: &[LoadedResource]) -> Vec<String> {
    let mut missing: Vec<String> = Vec::new();
    for id in requested {
        if !loaded.iter().any(|r| &r.id == id) && !missing.contains(id) {
            missing.push(id.clone());
        }
    }
    missing
}

/// Build the user turn delivering context resources, trimming to `word_budget`
pub fn assemble_context_turn(
    requested: &[String],
    loaded: &[LoadedResource],
    word_budget: usize,
) -> AssembledTurn {
    if loaded.is_empty() {
        return AssembledTurn {
            text: format!(
                "None of the requested context resources were found ({}). \
                 Continue with the material already provided and do not invent their contents.",
                requested.join(", ")
            ),
            trim: None,
        };
    }

    let body = loaded
        .iter()
        .map(|resource| {
            let mut meta = format!("Group: {}", resource.group);
            if let Some(origin) = &resource.origin {
                meta.push_str(" | Origin: ");
                meta.push_str(origin);
            }
            format!("### {}\n{}\n\n{}", resource.id, meta, resource.content.trim())
        })
        .collect::<Vec<_>>()
        .join("\n\n---\n\n");

    let (body, trim) = apply_budget(&body, "context resource", word_budget);
    let mut text = format!("{}\n\n{}", CONTEXT_TURN_HEADER, body);

    let missing = missing_ids(requested, loaded);
    if !missing.is_empty() {
        text.push_str(&format!(
            "\n\nRequested but not found: {}. Work without them rather than guessing their contents.",
            missing.join(", ")
        ));
    }

    AssembledTurn { text, trim }
}
