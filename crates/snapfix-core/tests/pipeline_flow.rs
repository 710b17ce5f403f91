//! End-to-end pipeline flows against scripted collaborators.

use std::collections::VecDeque;
use std::io::Cursor;
use std::sync::{Arc, Mutex};

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use snapfix_core::conversation::{ConversationLog, Role, SearchResult};
use snapfix_core::error::{ActError, GatewayError, GatewayErrorKind, IdentifyError};
use snapfix_core::gateway::TextGenerator;
use snapfix_core::pipeline::{Pipeline, SearchIntent};
use snapfix_core::prompt::PromptPayload;
use snapfix_core::search::WebSearcher;
use snapfix_core::upload::ImageHost;

struct ScriptedGenerator {
    responses: Mutex<VecDeque<Result<String, GatewayError>>>,
}

impl ScriptedGenerator {
    fn new(responses: Vec<Result<String, GatewayError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
        }
    }
}

impl TextGenerator for ScriptedGenerator {
    async fn generate(&self, _prompt: &PromptPayload) -> Result<String, GatewayError> {
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .expect("unexpected model call")
    }
}

struct StaticSearcher {
    results: Vec<SearchResult>,
}

impl WebSearcher for StaticSearcher {
    async fn search(
        &self,
        _query: &str,
        _site_allowlist: &[&str],
        max_results: usize,
    ) -> Vec<SearchResult> {
        self.results.iter().take(max_results).cloned().collect()
    }
}

struct StaticHost {
    url: Option<String>,
}

impl ImageHost for StaticHost {
    async fn upload(&self, _bytes: Vec<u8>, _filename: &str) -> Option<String> {
        self.url.clone()
    }
}

fn hit(title: &str, url: &str) -> SearchResult {
    SearchResult {
        title: title.to_string(),
        url: url.to_string(),
        snippet: String::new(),
    }
}

fn image_payload() -> String {
    let img = image::DynamicImage::new_rgb8(4, 4);
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .unwrap();
    format!("data:image/png;base64,{}", BASE64.encode(&buf))
}

fn pipeline(
    responses: Vec<Result<String, GatewayError>>,
    results: Vec<SearchResult>,
    upload_url: Option<String>,
) -> Pipeline<ScriptedGenerator, StaticSearcher, StaticHost> {
    Pipeline::new(
        Arc::new(ConversationLog::new()),
        ScriptedGenerator::new(responses),
        StaticSearcher { results },
        StaticHost { url: upload_url },
        10,
    )
}

#[tokio::test]
async fn identify_then_repair_plan_flow() {
    const IDENTIFICATION: &str = "iPhone 12 with a cracked screen.\n\
        1. Power the phone off.\n2. Inspect the digitizer.";
    let pipeline = pipeline(
        vec![
            Ok(IDENTIFICATION.to_string()),
            Ok("iphone 12 screen replacement kit\niphone 12 digitizer\niphone 12 repair guide"
                .to_string()),
            Ok("1. Remove the pentalobe screws.\n2. Lift the display.\n\
                Estimated difficulty: moderate, about 1 hour."
                .to_string()),
        ],
        Vec::new(),
        None,
    );

    let pending = pipeline
        .identify(&image_payload(), None, None)
        .await
        .unwrap();
    assert!(pending.identification_text.contains("1."));
    assert_eq!(pending.candidate_queries.len(), 3);
    assert_eq!(
        pending.candidate_queries[0],
        "iphone 12 screen replacement kit"
    );

    let outcome = pipeline
        .confirm_and_act(&pending.candidate_queries, 0, SearchIntent::Repair, None)
        .await
        .unwrap();
    assert!(outcome.response_text.contains("Estimated difficulty"));
    let amazon = outcome.amazon_search_url.unwrap();
    assert!(amazon.contains("iphone+12+screen+replacement+kit"));
    assert_eq!(outcome.origin_query, "iphone 12 screen replacement kit");

    // identify appended user+system, confirm appended user+system.
    let turns = pipeline.log().all();
    assert_eq!(turns.len(), 5);
    assert!(turns[2].candidate_queries.is_some());
}

#[tokio::test]
async fn identify_query_generation_failure_keeps_partial_result() {
    let pipeline = pipeline(
        vec![
            Ok("Samsung WF45 washer, door seal torn\nThe seal shows a visible tear.".to_string()),
            Err(GatewayError::timeout("model timed out")),
        ],
        Vec::new(),
        None,
    );

    let pending = pipeline
        .identify(&image_payload(), None, None)
        .await
        .unwrap();
    assert_eq!(
        pending.candidate_queries,
        vec!["Samsung WF45 washer, door seal torn".to_string()]
    );
}

#[tokio::test]
async fn identify_model_failure_is_terminal_and_appends_nothing() {
    let pipeline = pipeline(
        vec![Err(GatewayError::http_status(503, "overloaded"))],
        Vec::new(),
        None,
    );

    let before = pipeline.log().len();
    let err = pipeline
        .identify(&image_payload(), None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, IdentifyError::Model(_)));
    assert_eq!(pipeline.log().len(), before);
}

#[tokio::test]
async fn identify_rejects_bad_image_without_side_effects() {
    let pipeline = pipeline(Vec::new(), Vec::new(), None);
    let before = pipeline.log().len();
    let err = pipeline.identify("not base64!!", None, None).await.unwrap_err();
    assert!(matches!(err, IdentifyError::Media(_)));
    assert_eq!(pipeline.log().len(), before);
}

#[tokio::test]
async fn confirm_rejects_bad_image_without_side_effects() {
    let queries = vec!["iphone 12 screen".to_string()];
    let pipeline = pipeline(Vec::new(), Vec::new(), None);

    let before = pipeline.log().len();
    let err = pipeline
        .confirm_and_act(&queries, 0, SearchIntent::Buy, Some("!!not base64!!"))
        .await
        .unwrap_err();
    assert!(matches!(err, ActError::Media(_)));
    assert_eq!(pipeline.log().len(), before);
}

#[tokio::test]
async fn buy_intent_composes_links_results_and_invite() {
    let queries = vec!["iphone 12 screen".to_string()];
    let pipeline = pipeline(
        Vec::new(),
        vec![
            hit("Screen kit", "https://amazon.com/kit"),
            hit("Screen kit again", "https://amazon.com/kit"),
            hit("Other kit", "https://ebay.com/kit"),
        ],
        Some("https://0x0.st/abc.png".to_string()),
    );

    let outcome = pipeline
        .confirm_and_act(&queries, 0, SearchIntent::Buy, Some(&image_payload()))
        .await
        .unwrap();

    // Duplicate URL collapsed across the merged set.
    assert_eq!(outcome.search_results.len(), 2);
    assert_eq!(outcome.reverse_image_links.len(), 2);
    assert!(outcome.response_text.contains("Google Lens"));
    assert!(outcome.response_text.contains("Search Amazon directly:"));
    assert!(outcome.response_text.contains("1. [Screen kit](https://amazon.com/kit)"));
    assert!(outcome.response_text.contains("Want repair tips"));

    let turns = pipeline.log().all();
    let system_turn = turns.last().unwrap();
    assert_eq!(system_turn.role, Role::System);
    assert_eq!(
        system_turn.uploaded_image_url.as_deref(),
        Some("https://0x0.st/abc.png")
    );
    assert_eq!(system_turn.origin_query.as_deref(), Some("iphone 12 screen"));
}

#[tokio::test]
async fn buy_intent_with_zero_results_falls_back_to_amazon_link() {
    let queries = vec!["rare discontinued part".to_string()];
    let pipeline = pipeline(Vec::new(), Vec::new(), None);

    let outcome = pipeline
        .confirm_and_act(&queries, 0, SearchIntent::Buy, None)
        .await
        .unwrap();

    assert!(!outcome.response_text.is_empty());
    let amazon = outcome.amazon_search_url.unwrap();
    assert!(outcome.response_text.contains(&amazon));
    assert!(outcome.response_text.contains("No shop results came back"));
    assert!(outcome.reverse_image_links.is_empty());
}

#[tokio::test]
async fn info_intent_upload_failure_omits_reverse_links() {
    let queries = vec!["toaster lever stuck".to_string()];
    let pipeline = pipeline(
        Vec::new(),
        vec![hit("Lever fix", "https://ifixit.com/lever")],
        None,
    );

    let outcome = pipeline
        .confirm_and_act(&queries, 0, SearchIntent::Info, Some(&image_payload()))
        .await
        .unwrap();

    assert!(outcome.reverse_image_links.is_empty());
    assert!(outcome.amazon_search_url.is_none());
    assert!(outcome.response_text.contains("Lever fix"));
    assert!(outcome.response_text.contains("Want buying options"));
}

#[tokio::test]
async fn out_of_range_confirm_index_uses_first_query() {
    let queries = vec!["a".to_string(), "b".to_string(), "c".to_string()];
    let pipeline = pipeline(Vec::new(), Vec::new(), None);

    let outcome = pipeline
        .confirm_and_act(&queries, 99, SearchIntent::Info, None)
        .await
        .unwrap();
    assert_eq!(outcome.origin_query, "a");
}

#[tokio::test]
async fn repair_plan_failure_surfaces_typed_error() {
    let queries = vec!["washer door seal".to_string()];
    let pipeline = pipeline(
        vec![Err(GatewayError::http_status(500, ""))],
        Vec::new(),
        None,
    );

    let err = pipeline
        .confirm_and_act(&queries, 0, SearchIntent::Repair, None)
        .await
        .unwrap_err();
    assert!(matches!(err, ActError::RepairPlanUnavailable(_)));
}

#[tokio::test]
async fn follow_up_degrades_to_apology_on_model_failure() {
    let pipeline = pipeline(
        vec![Err(GatewayError::timeout("slow model"))],
        Vec::new(),
        None,
    );

    let reply = pipeline
        .follow_up("will glue work?", false, None)
        .await
        .unwrap();
    assert!(reply.contains("Sorry"));

    // Both the question and the degraded reply are recorded.
    let turns = pipeline.log().all();
    assert_eq!(turns[turns.len() - 2].message, "will glue work?");
    assert_eq!(turns.last().unwrap().role, Role::System);
}

#[tokio::test]
async fn voice_follow_up_marks_the_user_turn() {
    let pipeline = pipeline(vec![Ok("Try a silicone adhesive.".to_string())], Vec::new(), None);

    let reply = pipeline.follow_up("what adhesive?", true, None).await.unwrap();
    assert_eq!(reply, "Try a silicone adhesive.");

    let turns = pipeline.log().all();
    assert!(turns[turns.len() - 2].via_voice);
}

#[tokio::test]
async fn transcribe_returns_trimmed_transcript_or_error() {
    let pipeline = pipeline(vec![Ok("  my washer is leaking  ".to_string())], Vec::new(), None);
    let audio = snapfix_core::media::NormalizedAudio {
        bytes: vec![1, 2, 3],
        mime_type: "audio/webm".to_string(),
    };
    let transcript = pipeline.transcribe(&audio).await.unwrap();
    assert_eq!(transcript, "my washer is leaking");

    let failing = self::pipeline(vec![Err(GatewayError::empty_response())], Vec::new(), None);
    let err = failing.transcribe(&audio).await.unwrap_err();
    assert_eq!(err.kind, GatewayErrorKind::EmptyResponse);
}
