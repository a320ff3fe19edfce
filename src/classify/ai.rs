//! Remote classification backend: one chat-completions call labels a whole
//! batch, answering a JSON array in input order. Free-form labels come back
//! as strings; mapping onto the closed enums happens in the orchestrator.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::ClassifierConfig;
use crate::error::ClassifyError;
use crate::model::LABEL_SET_VERSION;

/// Env switch mirroring local test runs: `AI_TEST_MODE=mock` short-circuits
/// the remote endpoint with a deterministic backend.
const ENV_AI_TEST_MODE: &str = "AI_TEST_MODE";

/// One item as sent to the backend.
#[derive(Debug, Clone)]
pub struct BatchEntry {
    pub title: String,
    pub body: String,
}

/// One label pair as answered, still unmapped.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RawLabel {
    pub category: String,
    pub impact: String,
}

impl RawLabel {
    pub fn unclassified() -> Self {
        Self {
            category: "unclassified".to_string(),
            impact: "neutral".to_string(),
        }
    }
}

#[async_trait]
pub trait ClassifyBackend: Send + Sync {
    /// Label the batch; the reply must be same-length and same-order.
    async fn classify_batch(&self, entries: &[BatchEntry]) -> Result<Vec<RawLabel>, ClassifyError>;

    fn name(&self) -> &'static str;
}

/// Factory honoring config + the test-mode env override.
pub fn build_backend(cfg: &ClassifierConfig) -> Arc<dyn ClassifyBackend> {
    if std::env::var(ENV_AI_TEST_MODE).map(|v| v == "mock").unwrap_or(false) {
        return Arc::new(MockBackend::default());
    }
    match cfg.mode.as_str() {
        "remote" => {
            let api_key = std::env::var(&cfg.api_key_env).unwrap_or_default();
            Arc::new(RemoteBackend::new(&cfg.endpoint, &cfg.model, api_key))
        }
        // "lexicon" and anything else: every item takes the fallback path.
        _ => Arc::new(UnavailableBackend),
    }
}

pub struct RemoteBackend {
    http: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
}

impl RemoteBackend {
    pub fn new(endpoint: &str, model: &str, api_key: String) -> Self {
        let http = reqwest::Client::builder()
            .user_agent("newsfuse/0.1")
            .connect_timeout(Duration::from_secs(4))
            .timeout(Duration::from_secs(15))
            .build()
            .expect("reqwest client");
        Self {
            http,
            endpoint: endpoint.to_string(),
            model: model.to_string(),
            api_key,
        }
    }
}

#[async_trait]
impl ClassifyBackend for RemoteBackend {
    async fn classify_batch(&self, entries: &[BatchEntry]) -> Result<Vec<RawLabel>, ClassifyError> {
        if self.api_key.is_empty() {
            return Err(ClassifyError::Unavailable("api key is empty".into()));
        }
        if entries.is_empty() {
            return Ok(Vec::new());
        }

        #[derive(Serialize)]
        struct Msg<'a> {
            role: &'a str,
            content: &'a str,
        }
        #[derive(Serialize)]
        struct Req<'a> {
            model: &'a str,
            messages: Vec<Msg<'a>>,
            temperature: f32,
            max_tokens: u32,
        }
        #[derive(Deserialize)]
        struct Resp {
            choices: Vec<Choice>,
        }
        #[derive(Deserialize)]
        struct Choice {
            message: ChoiceMsg,
        }
        #[derive(Deserialize)]
        struct ChoiceMsg {
            content: String,
        }

        let sys = system_prompt();
        let user = build_user_prompt(entries);
        let req = Req {
            model: &self.model,
            messages: vec![
                Msg {
                    role: "system",
                    content: &sys,
                },
                Msg {
                    role: "user",
                    content: &user,
                },
            ],
            temperature: 0.1,
            max_tokens: 1024,
        };

        let resp = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&req)
            .send()
            .await
            .map_err(|e| ClassifyError::Unavailable(format!("request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(ClassifyError::Unavailable(format!(
                "endpoint returned {status}"
            )));
        }

        let body: Resp = resp
            .json()
            .await
            .map_err(|e| ClassifyError::BadResponse(format!("body not json: {e}")))?;
        let content = body
            .choices
            .first()
            .map(|c| c.message.content.as_str())
            .unwrap_or("");

        let labels = parse_labels(content)?;
        if labels.len() != entries.len() {
            return Err(ClassifyError::BadResponse(format!(
                "asked for {} labels, got {}",
                entries.len(),
                labels.len()
            )));
        }
        Ok(labels)
    }

    fn name(&self) -> &'static str {
        "remote"
    }
}

fn system_prompt() -> String {
    format!(
        "You label short market news items (label set {LABEL_SET_VERSION}). \
         Reply with ONLY a JSON array, same length and order as the input lines, \
         of objects {{\"category\": C, \"impact\": I}}. \
         C is one of: monetary-policy, macro, markets, corporate, commodities, \
         crypto, geopolitics, regulation, unclassified. \
         I is one of: positive, negative, neutral (market impact). No prose."
    )
}

fn build_user_prompt(entries: &[BatchEntry]) -> String {
    let mut out = String::new();
    for (i, e) in entries.iter().enumerate() {
        out.push_str(&format!("{}. {}", i + 1, e.title));
        if !e.body.is_empty() {
            let snippet: String = e.body.chars().take(200).collect();
            out.push_str(" — ");
            out.push_str(&snippet);
        }
        out.push('\n');
    }
    out
}

/// Models habitually wrap the array in code fences or prose; cut to the
/// outermost brackets before parsing.
fn parse_labels(content: &str) -> Result<Vec<RawLabel>, ClassifyError> {
    let start = content.find('[');
    let end = content.rfind(']');
    let json = match (start, end) {
        (Some(s), Some(e)) if e > s => &content[s..=e],
        _ => {
            return Err(ClassifyError::BadResponse(
                "no JSON array in reply".to_string(),
            ))
        }
    };
    serde_json::from_str::<Vec<RawLabel>>(json)
        .map_err(|e| ClassifyError::BadResponse(format!("labels not parsable: {e}")))
}

/// Deterministic backend for tests and `AI_TEST_MODE=mock` runs: cycles the
/// configured labels over the batch.
#[derive(Debug, Clone, Default)]
pub struct MockBackend {
    pub labels: Vec<RawLabel>,
}

impl MockBackend {
    pub fn returning(labels: Vec<RawLabel>) -> Self {
        Self { labels }
    }
}

#[async_trait]
impl ClassifyBackend for MockBackend {
    async fn classify_batch(&self, entries: &[BatchEntry]) -> Result<Vec<RawLabel>, ClassifyError> {
        Ok(entries
            .iter()
            .enumerate()
            .map(|(i, _)| {
                if self.labels.is_empty() {
                    RawLabel::unclassified()
                } else {
                    self.labels[i % self.labels.len()].clone()
                }
            })
            .collect())
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

/// Always unavailable; every item goes through the lexicon fallback.
pub struct UnavailableBackend;

#[async_trait]
impl ClassifyBackend for UnavailableBackend {
    async fn classify_batch(&self, _entries: &[BatchEntry]) -> Result<Vec<RawLabel>, ClassifyError> {
        Err(ClassifyError::Unavailable("backend disabled".to_string()))
    }

    fn name(&self) -> &'static str {
        "disabled"
    }
}
