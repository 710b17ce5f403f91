//! Prompt construction for the model gateway.
//!
//! Combines a bounded context window from the conversation log with one
//! task template per operation. Templates instruct the model to return
//! plain text; downstream callers treat model output as untrusted free
//! text except where the pipeline defines an explicit extraction grammar.

use std::sync::Arc;

use crate::conversation::{ConversationLog, Role};
use crate::media::{CanonicalImage, NormalizedAudio};
use crate::prompts;

/// Header line preceding the rendered context window.
pub const CONTEXT_HEADER: &str = "Conversation so far:";

/// Longest single message rendered into the context prefix.
const MAX_CONTEXT_MESSAGE_CHARS: usize = 1000;

/// One media attachment sent alongside prompt text.
#[derive(Debug, Clone)]
pub struct MediaPart {
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

/// Model-ready prompt: text plus at most one media part.
#[derive(Debug, Clone)]
pub struct PromptPayload {
    pub text: String,
    pub media: Option<MediaPart>,
}

impl PromptPayload {
    pub fn text_only(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            media: None,
        }
    }

    fn with_image(text: String, image: &CanonicalImage) -> Self {
        Self {
            text,
            media: Some(MediaPart {
                mime_type: CanonicalImage::MIME.to_string(),
                bytes: image.png_bytes.clone(),
            }),
        }
    }
}

/// Builds task prompts over a shared conversation log.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    log: Arc<ConversationLog>,
}

impl PromptBuilder {
    pub fn new(log: Arc<ConversationLog>) -> Self {
        Self { log }
    }

    /// Renders the most recent `limit` turns, one `User:`/`Assistant:` line
    /// each, under a fixed header and followed by a blank line. Returns the
    /// empty string when the window is empty.
    pub fn context_prefix(&self, limit: usize) -> String {
        let window = self.log.windowed(limit);
        if window.is_empty() {
            return String::new();
        }

        let mut out = String::from(CONTEXT_HEADER);
        out.push('\n');
        for turn in &window {
            let speaker = match turn.role {
                Role::User => "User",
                Role::System => "Assistant",
            };
            out.push_str(speaker);
            out.push_str(": ");
            out.push_str(&truncate_message(&turn.message));
            out.push('\n');
        }
        out.push('\n');
        out
    }

    /// Identify task: context + identify template + the canonical image.
    pub fn identify(&self, limit: usize, image: &CanonicalImage, note: Option<&str>) -> PromptPayload {
        let user_note = match note.map(str::trim).filter(|n| !n.is_empty()) {
            Some(note) => format!("The user adds: \"{note}\"\n\n"),
            None => String::new(),
        };
        let text = prompts::IDENTIFY_PROMPT_TEMPLATE
            .replace("{{CONTEXT}}", &self.context_prefix(limit))
            .replace("{{USER_NOTE}}", &user_note);
        PromptPayload::with_image(text, image)
    }

    /// Follow-up task, with the image re-attached when the user supplied one.
    pub fn follow_up(
        &self,
        limit: usize,
        message: &str,
        image: Option<&CanonicalImage>,
    ) -> PromptPayload {
        let text = prompts::FOLLOW_UP_PROMPT_TEMPLATE
            .replace("{{CONTEXT}}", &self.context_prefix(limit))
            .replace("{{MESSAGE}}", message);
        match image {
            Some(image) => PromptPayload::with_image(text, image),
            None => PromptPayload::text_only(text),
        }
    }

    /// Transcription task: verbatim-transcript instruction + raw audio.
    pub fn transcribe(&self, audio: &NormalizedAudio) -> PromptPayload {
        PromptPayload {
            text: prompts::TRANSCRIBE_PROMPT_TEMPLATE.to_string(),
            media: Some(MediaPart {
                mime_type: audio.mime_type.clone(),
                bytes: audio.bytes.clone(),
            }),
        }
    }

    /// Query-generation task over a completed identification.
    pub fn query_generation(&self, identification: &str) -> PromptPayload {
        PromptPayload::text_only(
            prompts::QUERY_GENERATION_PROMPT_TEMPLATE.replace("{{IDENTIFICATION}}", identification),
        )
    }

    /// Repair-plan task for a confirmed query. No image is re-attached.
    pub fn repair_plan(&self, limit: usize, query: &str) -> PromptPayload {
        PromptPayload::text_only(
            prompts::REPAIR_PLAN_PROMPT_TEMPLATE
                .replace("{{CONTEXT}}", &self.context_prefix(limit))
                .replace("{{QUERY}}", query),
        )
    }
}

/// Truncates a single context message, marking the cut with an ellipsis.
fn truncate_message(message: &str) -> String {
    if message.chars().count() <= MAX_CONTEXT_MESSAGE_CHARS {
        return message.to_string();
    }
    let mut truncated: String = message.chars().take(MAX_CONTEXT_MESSAGE_CHARS).collect();
    truncated.push('…');
    truncated
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::Turn;

    fn builder_with(messages: &[(&str, Role)]) -> PromptBuilder {
        let log = Arc::new(ConversationLog::new());
        for (message, role) in messages {
            let turn = match role {
                Role::User => Turn::user(*message),
                Role::System => Turn::system(*message),
            };
            log.append(turn);
        }
        PromptBuilder::new(log)
    }

    #[test]
    fn context_prefix_renders_speaker_lines() {
        let builder = builder_with(&[("broken toaster", Role::User), ("It looks like…", Role::System)]);
        let prefix = builder.context_prefix(2);
        assert!(prefix.starts_with(CONTEXT_HEADER));
        assert!(prefix.contains("User: broken toaster\n"));
        assert!(prefix.contains("Assistant: It looks like…\n"));
        assert!(prefix.ends_with("\n\n"));
    }

    #[test]
    fn context_prefix_empty_window_omits_header() {
        let builder = builder_with(&[]);
        // The welcome turn is still present, so limit 0 is the empty case.
        assert_eq!(builder.context_prefix(0), "");
    }

    #[test]
    fn long_messages_are_truncated_with_ellipsis() {
        let long = "x".repeat(1500);
        let builder = builder_with(&[(long.as_str(), Role::User)]);
        let prefix = builder.context_prefix(1);
        assert!(prefix.contains(&format!("{}…", "x".repeat(1000))));
        assert!(!prefix.contains(&"x".repeat(1001)));
    }

    #[test]
    fn identify_prompt_attaches_image_and_note() {
        let builder = builder_with(&[]);
        let image = CanonicalImage {
            png_bytes: vec![1, 2, 3],
            width: 1,
            height: 1,
        };
        let payload = builder.identify(0, &image, Some("it sparks when plugged in"));
        assert!(payload.text.contains("it sparks when plugged in"));
        assert!(!payload.text.contains("{{"));
        let media = payload.media.unwrap();
        assert_eq!(media.mime_type, "image/png");
        assert_eq!(media.bytes, vec![1, 2, 3]);
    }

    #[test]
    fn follow_up_without_image_is_text_only() {
        let builder = builder_with(&[("hello", Role::User)]);
        let payload = builder.follow_up(5, "does it need new heating coils?", None);
        assert!(payload.media.is_none());
        assert!(payload.text.contains("does it need new heating coils?"));
        assert!(payload.text.contains(CONTEXT_HEADER));
    }

    #[test]
    fn transcribe_prompt_carries_audio_mime() {
        let builder = builder_with(&[]);
        let audio = NormalizedAudio {
            bytes: vec![9, 9],
            mime_type: "audio/ogg".to_string(),
        };
        let payload = builder.transcribe(&audio);
        assert!(payload.text.contains("verbatim transcript"));
        assert_eq!(payload.media.unwrap().mime_type, "audio/ogg");
    }

    #[test]
    fn repair_plan_prompt_interpolates_query() {
        let builder = builder_with(&[]);
        let payload = builder.repair_plan(0, "Samsung WF45 door seal");
        assert!(payload.text.contains("Samsung WF45 door seal"));
        assert!(payload.text.contains("Estimated difficulty:"));
        assert!(payload.media.is_none());
    }
}
