//! The identify→confirm→act pipeline.
//!
//! Stateless across calls: the identify phase returns a
//! [`PendingIdentification`] the client echoes back into the confirm
//! phase, so no server-side session store exists. Every step is recorded
//! into the shared [`ConversationLog`]. Model failures during identify are
//! terminal for that request; search and upload failures degrade.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use url::form_urlencoded;

use crate::conversation::{ConversationLog, SearchResult, Turn};
use crate::error::{ActError, GatewayError, IdentifyError, MediaError};
use crate::gateway::TextGenerator;
use crate::media::{self, CanonicalImage, NormalizedAudio};
use crate::prompt::PromptBuilder;
use crate::search::WebSearcher;
use crate::upload::ImageHost;

/// Commerce sites for the `buy` intent's search restriction.
const BUY_SITES: &[&str] = &["amazon.com", "ebay.com", "walmart.com", "bestbuy.com"];

/// Repair/reference sites for the `info` intent's search restriction.
const INFO_SITES: &[&str] = &["ifixit.com", "reddit.com", "youtube.com", "manualslib.com"];

/// Results requested per search call, before deduplication.
const MAX_SEARCH_RESULTS: usize = 6;

/// Generic fallback when neither query generation nor the identification
/// text yields a usable query.
const FALLBACK_QUERY: &str = "replacement part";

/// Degraded reply for conversational follow-ups when the model call fails.
const APOLOGY_MESSAGE: &str =
    "Sorry, I couldn't come up with an answer just now. Please try again.";

/// Recorded user message for a photo-only identify request.
const PHOTO_USER_MESSAGE: &str = "Sent a photo for identification.";

/// What the user wants done with the confirmed object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchIntent {
    Repair,
    Buy,
    Info,
}

impl SearchIntent {
    pub fn as_str(self) -> &'static str {
        match self {
            SearchIntent::Repair => "repair",
            SearchIntent::Buy => "buy",
            SearchIntent::Info => "info",
        }
    }

    fn site_allowlist(self) -> &'static [&'static str] {
        match self {
            SearchIntent::Buy => BUY_SITES,
            SearchIntent::Repair | SearchIntent::Info => INFO_SITES,
        }
    }
}

impl fmt::Display for SearchIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Ephemeral result of the identify phase, round-tripped through the
/// client. Not persisted server-side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingIdentification {
    pub identification_text: String,
    /// Never empty: a fallback query is synthesized when extraction
    /// yields nothing.
    pub candidate_queries: Vec<String>,
}

/// Composed output of the confirm-and-act phase.
#[derive(Debug, Clone, Serialize)]
pub struct ActOutcome {
    pub response_text: String,
    pub search_results: Vec<SearchResult>,
    pub amazon_search_url: Option<String>,
    pub reverse_image_links: Vec<String>,
    pub origin_query: String,
}

/// Orchestrates the two-phase flow over injected collaborators.
pub struct Pipeline<G, S, U> {
    log: Arc<ConversationLog>,
    prompts: PromptBuilder,
    gateway: G,
    searcher: S,
    uploader: U,
    context_window: usize,
}

impl<G, S, U> Pipeline<G, S, U>
where
    G: TextGenerator,
    S: WebSearcher,
    U: ImageHost,
{
    pub fn new(
        log: Arc<ConversationLog>,
        gateway: G,
        searcher: S,
        uploader: U,
        context_window: usize,
    ) -> Self {
        let prompts = PromptBuilder::new(Arc::clone(&log));
        Self {
            log,
            prompts,
            gateway,
            searcher,
            uploader,
            context_window,
        }
    }

    pub fn log(&self) -> &Arc<ConversationLog> {
        &self.log
    }

    /// Identify phase: image → identification text + candidate queries.
    ///
    /// A model failure on the identification call is terminal and appends
    /// nothing. A failure on the follow-on query-generation call keeps the
    /// partial result: a single fallback query is synthesized instead.
    pub async fn identify(
        &self,
        image_payload: &str,
        note: Option<&str>,
        context_limit: Option<usize>,
    ) -> Result<PendingIdentification, IdentifyError> {
        let limit = context_limit.unwrap_or(self.context_window);
        let image = media::normalize_image(image_payload)?;

        let prompt = self.prompts.identify(limit, &image, note);
        let identification_text = self
            .gateway
            .generate(&prompt)
            .await
            .map_err(IdentifyError::Model)?;

        let candidate_queries = match self
            .gateway
            .generate(&self.prompts.query_generation(&identification_text))
            .await
        {
            Ok(raw) => parse_candidate_queries(&raw),
            Err(err) => {
                tracing::warn!(error = %err, "query generation failed, synthesizing fallback");
                Vec::new()
            }
        };
        let candidate_queries = if candidate_queries.is_empty() {
            vec![fallback_query(&identification_text)]
        } else {
            candidate_queries
        };

        let mut user_turn = Turn::user(
            note.map(str::trim)
                .filter(|n| !n.is_empty())
                .unwrap_or(PHOTO_USER_MESSAGE),
        );
        user_turn.image_attached = true;
        self.log.append(user_turn);

        let mut system_turn = Turn::system(identification_text.clone());
        system_turn.candidate_queries = Some(candidate_queries.clone());
        self.log.append(system_turn);

        Ok(PendingIdentification {
            identification_text,
            candidate_queries,
        })
    }

    /// Confirm-and-act phase. The caller replays the candidate queries
    /// from the identify phase together with a selected index and intent.
    /// An out-of-range index clamps to 0. A malformed image payload is a
    /// client error and aborts before anything touches the log.
    pub async fn confirm_and_act(
        &self,
        candidate_queries: &[String],
        query_index: i64,
        intent: SearchIntent,
        image_payload: Option<&str>,
    ) -> Result<ActOutcome, ActError> {
        let image = image_payload.map(media::normalize_image).transpose()?;
        let query = select_query(candidate_queries, query_index);

        self.log.append(Turn::user(format!(
            "Confirmed \"{query}\" ({intent})"
        )));

        match intent {
            SearchIntent::Repair => self.act_repair(&query).await,
            SearchIntent::Buy | SearchIntent::Info => {
                Ok(self.act_search(&query, intent, image).await)
            }
        }
    }

    /// Conversational follow-up. Degrades to a fixed apology on model
    /// failure rather than aborting the request.
    pub async fn follow_up(
        &self,
        message: &str,
        via_voice: bool,
        image_payload: Option<&str>,
    ) -> Result<String, MediaError> {
        // Validate inbound media before any side effect on the log.
        let image = image_payload.map(media::normalize_image).transpose()?;

        let mut user_turn = Turn::user(message);
        user_turn.via_voice = via_voice;
        user_turn.image_attached = image.is_some();
        self.log.append(user_turn);

        let prompt = self
            .prompts
            .follow_up(self.context_window, message, image.as_ref());
        let reply = match self.gateway.generate(&prompt).await {
            Ok(text) => text,
            Err(err) => {
                tracing::warn!(error = %err, "follow-up generation failed, degrading to apology");
                APOLOGY_MESSAGE.to_string()
            }
        };

        self.log.append(Turn::system(reply.clone()));
        Ok(reply)
    }

    /// Transcribes normalized audio to a verbatim transcript. The caller
    /// feeds the transcript back through [`Pipeline::follow_up`] with
    /// `via_voice` set; nothing is appended here.
    pub async fn transcribe(&self, audio: &NormalizedAudio) -> Result<String, GatewayError> {
        let prompt = self.prompts.transcribe(audio);
        let transcript = self.gateway.generate(&prompt).await?;
        Ok(transcript.trim().to_string())
    }

    async fn act_repair(&self, query: &str) -> Result<ActOutcome, ActError> {
        let prompt = self.prompts.repair_plan(self.context_window, query);
        let plan = self
            .gateway
            .generate(&prompt)
            .await
            .map_err(ActError::RepairPlanUnavailable)?;

        let amazon_search_url = amazon_search_url(query);
        let response_text = format!("{plan}\n\nNeed parts? Search Amazon: {amazon_search_url}");

        let mut turn = Turn::system(response_text.clone());
        turn.amazon_search_url = Some(amazon_search_url.clone());
        turn.origin_query = Some(query.to_string());
        self.log.append(turn);

        Ok(ActOutcome {
            response_text,
            search_results: Vec::new(),
            amazon_search_url: Some(amazon_search_url),
            reverse_image_links: Vec::new(),
            origin_query: query.to_string(),
        })
    }

    async fn act_search(
        &self,
        query: &str,
        intent: SearchIntent,
        image: Option<CanonicalImage>,
    ) -> ActOutcome {
        // Upload and search have no data dependency; run them together.
        // Each tolerates the other failing.
        let upload = async {
            match image {
                Some(image) => self.uploader.upload(image.png_bytes, "snapfix.png").await,
                None => None,
            }
        };
        let search = self
            .searcher
            .search(query, intent.site_allowlist(), MAX_SEARCH_RESULTS);
        let (uploaded_url, results) = tokio::join!(upload, search);

        let results = dedup_by_url(results);
        let reverse_image_links = uploaded_url
            .as_deref()
            .map(reverse_image_links)
            .unwrap_or_default();
        let amazon_search_url =
            (intent == SearchIntent::Buy).then(|| amazon_search_url(query));

        let response_text = compose_search_response(
            intent,
            &reverse_image_links,
            amazon_search_url.as_deref(),
            &results,
        );

        let mut turn = Turn::system(response_text.clone());
        turn.search_results = Some(results.clone());
        turn.amazon_search_url = amazon_search_url.clone();
        turn.origin_query = Some(query.to_string());
        turn.uploaded_image_url = uploaded_url;
        self.log.append(turn);

        ActOutcome {
            response_text,
            search_results: results,
            amazon_search_url,
            reverse_image_links,
            origin_query: query.to_string(),
        }
    }
}

/// Splits model output into candidate queries: one per line, list markers
/// (`-`, `•`, tab, space) trimmed, blank lines discarded.
pub(crate) fn parse_candidate_queries(raw: &str) -> Vec<String> {
    raw.lines()
        .map(|line| {
            line.trim_start_matches(['-', '•', '\t', ' '])
                .trim_end()
                .to_string()
        })
        .filter(|line| !line.is_empty())
        .collect()
}

/// Synthesizes a fallback query from the first non-empty line of the
/// identification text, or a generic string when there is none.
pub(crate) fn fallback_query(identification_text: &str) -> String {
    identification_text
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map_or_else(|| FALLBACK_QUERY.to_string(), str::to_string)
}

/// Picks the confirmed query, clamping invalid or out-of-bounds indices
/// to 0. An empty candidate list falls back to the generic query.
pub(crate) fn select_query(candidate_queries: &[String], query_index: i64) -> String {
    let Some(first) = candidate_queries.first() else {
        return FALLBACK_QUERY.to_string();
    };
    let index = usize::try_from(query_index)
        .ok()
        .filter(|&i| i < candidate_queries.len())
        .unwrap_or(0);
    candidate_queries.get(index).unwrap_or(first).clone()
}

/// Removes later duplicates by exact URL equality, preserving order.
pub(crate) fn dedup_by_url(results: Vec<SearchResult>) -> Vec<SearchResult> {
    let mut seen = HashSet::new();
    results
        .into_iter()
        .filter(|result| seen.insert(result.url.clone()))
        .collect()
}

/// Builds the Amazon direct-search link for a query.
pub(crate) fn amazon_search_url(query: &str) -> String {
    format!("https://www.amazon.com/s?k={}", encode_component(query))
}

/// Builds the reverse-image-search links for a publicly hosted image.
/// Construction never fails; when upload failed the links are simply
/// omitted by the caller.
pub(crate) fn reverse_image_links(public_url: &str) -> Vec<String> {
    vec![
        format!(
            "https://lens.google.com/uploadbyurl?url={}",
            encode_component(public_url)
        ),
        format!(
            "https://www.bing.com/images/search?view=detailv2&iss=sbi&q=imgurl:{}",
            encode_component(public_url)
        ),
    ]
}

fn encode_component(value: &str) -> String {
    form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

fn compose_search_response(
    intent: SearchIntent,
    reverse_image_links: &[String],
    amazon_search_url: Option<&str>,
    results: &[SearchResult],
) -> String {
    let mut out = String::new();

    if let [lens, bing] = reverse_image_links {
        out.push_str("**Search by image:**\n");
        out.push_str(&format!("- [Google Lens]({lens})\n"));
        out.push_str(&format!("- [Bing Visual Search]({bing})\n\n"));
    }

    if let Some(amazon) = amazon_search_url {
        out.push_str(&format!("Search Amazon directly: {amazon}\n\n"));
    }

    if results.is_empty() {
        match intent {
            SearchIntent::Buy => out.push_str(
                "No shop results came back. The direct Amazon search link above is your best bet.\n",
            ),
            _ => out.push_str("No reference results came back. Try rephrasing the query.\n"),
        }
    } else {
        let header = match intent {
            SearchIntent::Buy => "**Places to buy:**",
            _ => "**Guides and references:**",
        };
        out.push_str(header);
        out.push('\n');
        for (i, result) in results.iter().enumerate() {
            out.push_str(&format!("{}. [{}]({})\n", i + 1, result.title, result.url));
        }
    }

    out.push('\n');
    match intent {
        SearchIntent::Buy => out.push_str("Want repair tips for it instead? Just ask."),
        _ => out.push_str("Want buying options instead? Just ask."),
    }
    out
}
