//! Optional relevancy scoring: light web research per lead, then one
//! generation call that rates the lead from 1 to 100.
//!
//! Scores only annotate leads. Search and fetch failures shrink the research
//! context; a failed scoring call leaves the lead unscored.

use crate::error::GenerateError;
use crate::json_extract::extract_as;
use crate::lead::Lead;
use crate::llm::TextGenerator;
use crate::prompts;
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, warn};

pub const SERPER_URL: &str = "https://google.serper.dev/search";

const MAX_LINKS_PER_LEAD: usize = 3;
const PAGE_CHAR_LIMIT: usize = 4_000;
const CONTEXT_CHAR_LIMIT: usize = 12_000;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SearchHit {
    pub link: String,
    #[serde(default)]
    pub title: String,
}

#[async_trait]
pub trait WebSearch: Send + Sync {
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>, GenerateError>;
}

#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String, GenerateError>;
}

/// Google results through the Serper API.
pub struct SerperSearch {
    client: Client,
    api_key: String,
    endpoint: String,
}

impl SerperSearch {
    pub fn new(api_key: impl Into<String>, timeout: Duration) -> Result<Self, GenerateError> {
        Self::with_endpoint(api_key, SERPER_URL, timeout)
    }

    pub fn with_endpoint(
        api_key: impl Into<String>,
        endpoint: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, GenerateError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(GenerateError::MissingApiKey);
        }
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GenerateError::Network(e.to_string()))?;
        Ok(Self {
            client,
            api_key,
            endpoint: endpoint.into(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct SerperResponse {
    #[serde(default)]
    organic: Vec<SearchHit>,
}

#[async_trait]
impl WebSearch for SerperSearch {
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>, GenerateError> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("X-API-KEY", self.api_key.trim())
            .json(&json!({ "q": query }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GenerateError::Api {
                status: status.as_u16(),
                message: format!("search failed ({}): {}", status, body),
            });
        }

        let parsed: SerperResponse = response.json().await?;
        Ok(parsed.organic)
    }
}

/// Plain `GET` page fetcher.
pub struct HttpPageFetcher {
    client: Client,
}

impl HttpPageFetcher {
    pub fn new(timeout: Duration) -> Result<Self, GenerateError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent("lead-pitcher/0.1")
            .build()
            .map_err(|e| GenerateError::Network(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    async fn fetch(&self, url: &str) -> Result<String, GenerateError> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(GenerateError::Api {
                status: status.as_u16(),
                message: format!("fetch of {} failed ({})", url, status),
            });
        }
        Ok(response.text().await?)
    }
}

struct HtmlPatterns {
    blocks: Regex,
    tags: Regex,
    whitespace: Regex,
}

fn html_patterns() -> Option<&'static HtmlPatterns> {
    static PATTERNS: OnceLock<Option<HtmlPatterns>> = OnceLock::new();
    PATTERNS
        .get_or_init(|| {
            Some(HtmlPatterns {
                blocks: Regex::new(r"(?is)<script\b.*?</script>|<style\b.*?</style>|<!--.*?-->").ok()?,
                tags: Regex::new(r"(?s)<[^>]*>").ok()?,
                whitespace: Regex::new(r"\s+").ok()?,
            })
        })
        .as_ref()
}

/// Visible text of an HTML page, whitespace-collapsed and capped at `limit` chars.
pub fn clean_html(html: &str, limit: usize) -> String {
    let text = match html_patterns() {
        Some(p) => {
            let without_blocks = p.blocks.replace_all(html, " ");
            let without_tags = p.tags.replace_all(&without_blocks, " ");
            let decoded = decode_entities(&without_tags);
            p.whitespace.replace_all(&decoded, " ").trim().to_string()
        }
        None => html.split_whitespace().collect::<Vec<_>>().join(" "),
    };
    truncate_chars(&text, limit)
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

fn truncate_chars(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((cut, _)) => text[..cut].to_string(),
        None => text.to_string(),
    }
}

/// Search query for a lead: company plus website, else the person's name.
pub fn search_query(lead: &Lead) -> Option<String> {
    let company = lead.attribute(&["company", "company name", "organization", "organisation", "account name"]);
    let website = lead.attribute(&["website", "company website", "domain", "url"]);
    let parts: Vec<&str> = [company, website].into_iter().flatten().collect();
    if !parts.is_empty() {
        return Some(parts.join(" "));
    }
    if let Some(full) = lead.attribute(&["full name", "name"]) {
        return Some(full.to_string());
    }
    let first = lead.attribute(&["first name"]);
    let last = lead.attribute(&["last name"]);
    let name: Vec<&str> = [first, last].into_iter().flatten().collect();
    (!name.is_empty()).then(|| name.join(" "))
}

#[derive(Debug, Deserialize)]
struct ScoreReply {
    score: Value,
    #[serde(default)]
    reason: String,
}

fn score_value(value: &Value) -> Option<u8> {
    let raw = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().trim_end_matches('%').parse::<f64>().ok()?,
        _ => return None,
    };
    if !raw.is_finite() {
        return None;
    }
    Some(raw.round().clamp(1.0, 100.0) as u8)
}

/// Rates leads against the company context.
pub struct RelevancyScorer<'a> {
    generator: &'a dyn TextGenerator,
    company_context: &'a str,
    retry: RetryPolicy,
    search: Option<&'a dyn WebSearch>,
    fetcher: Option<&'a dyn PageFetcher>,
}

impl<'a> RelevancyScorer<'a> {
    pub fn new(generator: &'a dyn TextGenerator, company_context: &'a str, retry: RetryPolicy) -> Self {
        Self {
            generator,
            company_context,
            retry,
            search: None,
            fetcher: None,
        }
    }

    pub fn with_research(mut self, search: Option<&'a dyn WebSearch>, fetcher: Option<&'a dyn PageFetcher>) -> Self {
        self.search = search;
        self.fetcher = fetcher;
        self
    }

    /// Cleaned text of the top search results for `lead`. Empty when research
    /// is not configured or nothing could be fetched.
    pub async fn research(&self, lead: &Lead) -> String {
        let (Some(search), Some(fetcher)) = (self.search, self.fetcher) else {
            return String::new();
        };
        let Some(query) = search_query(lead) else {
            return String::new();
        };

        let hits = match search.search(&query).await {
            Ok(hits) => hits,
            Err(e) => {
                warn!(lead = %lead.id, error = %e, "web search failed");
                return String::new();
            }
        };

        let mut context = String::new();
        for hit in hits.iter().filter(|h| !h.link.is_empty()).take(MAX_LINKS_PER_LEAD) {
            let remaining = CONTEXT_CHAR_LIMIT.saturating_sub(context.chars().count());
            if remaining == 0 {
                break;
            }
            match fetcher.fetch(&hit.link).await {
                Ok(html) => {
                    let text = clean_html(&html, PAGE_CHAR_LIMIT.min(remaining));
                    if !text.is_empty() {
                        if !context.is_empty() {
                            context.push_str("\n\n");
                        }
                        context.push_str(&format!("Source: {}\n{}", hit.link, text));
                    }
                }
                Err(e) => debug!(url = %hit.link, error = %e, "page fetch failed"),
            }
        }
        truncate_chars(&context, CONTEXT_CHAR_LIMIT)
    }

    /// Score and reason for `lead`, or `None` when the call fails or the reply
    /// has no usable score.
    pub async fn score(&self, lead: &Lead) -> Option<(u8, String)> {
        let web_context = self.research(lead).await;
        let lead_json = serde_json::to_string_pretty(lead).unwrap_or_else(|_| "{}".to_string());
        let prompt = prompts::score_prompt(self.company_context, &lead_json, &web_context);

        let accept = |t: &str| extract_as::<ScoreReply>(t).map(|r| score_value(&r.score).is_some()).unwrap_or(false);
        let reply = match self.retry.generate(self.generator, &prompt, "score", accept).await {
            Ok(text) => extract_as::<ScoreReply>(&text),
            Err(e) => {
                warn!(lead = %lead.id, error = %e, "relevancy scoring failed");
                return None;
            }
        };
        match reply {
            Ok(reply) => match score_value(&reply.score) {
                Some(score) => Some((score, reply.reason.trim().to_string())),
                None => {
                    warn!(lead = %lead.id, "relevancy score missing or not numeric");
                    None
                }
            },
            Err(e) => {
                warn!(lead = %lead.id, error = %e, "relevancy reply had no usable JSON");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lead::{assign_ids, LeadRecord};
    use crate::test_support::ScriptedGenerator;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn lead(pairs: &[(&str, &str)]) -> Lead {
        let record: LeadRecord = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        assign_ids(vec![record]).remove(0)
    }

    struct FixedSearch(Vec<&'static str>);

    #[async_trait]
    impl WebSearch for FixedSearch {
        async fn search(&self, _query: &str) -> Result<Vec<SearchHit>, GenerateError> {
            Ok(self
                .0
                .iter()
                .map(|l| SearchHit {
                    link: l.to_string(),
                    title: String::new(),
                })
                .collect())
        }
    }

    struct MapFetcher {
        pages: HashMap<&'static str, &'static str>,
        fetched: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl PageFetcher for MapFetcher {
        async fn fetch(&self, url: &str) -> Result<String, GenerateError> {
            self.fetched.lock().expect("fetch log lock").push(url.to_string());
            self.pages
                .get(url)
                .map(|p| p.to_string())
                .ok_or_else(|| GenerateError::Network("unreachable".into()))
        }
    }

    #[test]
    fn unit_clean_html_drops_scripts_and_tags() {
        let html = "<html><head><style>p{color:red}</style><script>var x = '<b>';</script></head>\
                    <body><h1>Acme&nbsp;Corp</h1>\n\n<p>We build   rockets &amp; more.</p></body></html>";
        assert_eq!(clean_html(html, 100), "Acme Corp We build rockets & more.");
        assert_eq!(clean_html(html, 4), "Acme");
    }

    #[test]
    fn unit_search_query_prefers_company_and_website() {
        let l = lead(&[("Company Name", "Acme"), ("Website", "acme.io"), ("First Name", "Ann")]);
        assert_eq!(search_query(&l).as_deref(), Some("Acme acme.io"));

        let l = lead(&[("First Name", "Ann"), ("Last Name", "Lee")]);
        assert_eq!(search_query(&l).as_deref(), Some("Ann Lee"));

        let l = lead(&[("Notes", "nothing useful")]);
        assert_eq!(search_query(&l), None);
    }

    #[test]
    fn unit_score_value_clamps_and_parses_strings() {
        assert_eq!(score_value(&json!(250)), Some(100));
        assert_eq!(score_value(&json!(0)), Some(1));
        assert_eq!(score_value(&json!("72%")), Some(72));
        assert_eq!(score_value(&json!(64.6)), Some(65));
        assert_eq!(score_value(&json!(null)), None);
    }

    #[tokio::test]
    async fn unit_research_skips_failed_pages_and_caps_links() {
        let search = FixedSearch(vec!["https://a.test", "https://down.test", "https://b.test", "https://c.test"]);
        let fetcher = MapFetcher {
            pages: HashMap::from([
                ("https://a.test", "<p>Alpha page</p>"),
                ("https://b.test", "<p>Beta page</p>"),
                ("https://c.test", "<p>Never fetched</p>"),
            ]),
            fetched: Mutex::new(Vec::new()),
        };
        let gen = ScriptedGenerator::replying(&[]);
        let scorer = RelevancyScorer::new(&gen, "ctx", RetryPolicy::once()).with_research(Some(&search), Some(&fetcher));

        let context = scorer.research(&lead(&[("Company", "Acme")])).await;

        assert!(context.contains("Alpha page"));
        assert!(context.contains("Beta page"));
        assert!(!context.contains("Never fetched"));
        assert_eq!(fetcher.fetched.lock().expect("fetch log lock").len(), 3);
    }

    #[tokio::test]
    async fn unit_score_without_research_uses_lead_only() {
        let gen = ScriptedGenerator::replying(&[r#"Sure! {"score": 130, "reason": " Strong fit. "}"#]);
        let scorer = RelevancyScorer::new(&gen, "We sell rockets", RetryPolicy::once());

        let scored = scorer.score(&lead(&[("Company", "Acme")])).await;

        assert_eq!(scored, Some((100, "Strong fit.".to_string())));
        assert!(gen.prompts()[0].contains("No web research available."));
    }

    #[tokio::test]
    async fn unit_failed_score_leaves_lead_unscored() {
        let gen = ScriptedGenerator::replying(&[r#"{"reason": "no score given"}"#]);
        let scorer = RelevancyScorer::new(&gen, "ctx", RetryPolicy::once());
        assert_eq!(scorer.score(&lead(&[("Company", "Acme")])).await, None);
    }

    #[tokio::test]
    async fn integration_serper_search_reads_organic_links() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/search"))
            .and(header("X-API-KEY", "serper-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "organic": [
                    {"title": "Acme", "link": "https://acme.io"},
                    {"title": "Acme news", "link": "https://news.test/acme"}
                ]
            })))
            .mount(&server)
            .await;

        let search = SerperSearch::with_endpoint("serper-key", format!("{}/search", server.uri()), Duration::from_secs(5))
            .expect("search client should build");
        let hits = search.search("Acme").await.expect("search should succeed");

        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].link, "https://acme.io");
    }

    #[tokio::test]
    async fn integration_page_fetcher_reports_http_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ok"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<p>hello</p>"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let fetcher = HttpPageFetcher::new(Duration::from_secs(5)).expect("fetcher should build");
        let body = fetcher
            .fetch(&format!("{}/ok", server.uri()))
            .await
            .expect("page should load");
        assert_eq!(body, "<p>hello</p>");

        let err = fetcher
            .fetch(&format!("{}/missing", server.uri()))
            .await
            .expect_err("404 should be an error");
        assert!(matches!(err, GenerateError::Api { status: 404, .. }));
    }
}
