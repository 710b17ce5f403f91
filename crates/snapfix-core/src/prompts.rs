//! Prompt template constants.

/// Template for the identify task (image attached).
pub const IDENTIFY_PROMPT_TEMPLATE: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/prompts/identify_prompt.md"
));

/// Template for conversational follow-up questions.
pub const FOLLOW_UP_PROMPT_TEMPLATE: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/prompts/follow_up_prompt.md"
));

/// Template for verbatim audio transcription (audio attached).
pub const TRANSCRIBE_PROMPT_TEMPLATE: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/prompts/transcribe_prompt.md"
));

/// Template for candidate search query generation.
pub const QUERY_GENERATION_PROMPT_TEMPLATE: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/prompts/query_generation_prompt.md"
));

/// Template for the repair-plan branch of the act phase.
pub const REPAIR_PLAN_PROMPT_TEMPLATE: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/prompts/repair_plan_prompt.md"
));
