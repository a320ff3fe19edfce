//! Adapter for JSON flash-news feeds (`{"status": ..., "items": [...]}`
//! envelopes with epoch-millisecond `pubDate` fields).

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use metrics::{counter, histogram};
use serde::Deserialize;

use crate::error::FetchError;
use crate::model::{stable_id, RawItem};
use crate::sources::{get_text, normalize_text, SourceAdapter};

/// Upper bound per fetch; flash feeds can page far deeper than one digest
/// run ever needs.
const ITEM_CAP: usize = 50;

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    items: Vec<WireItem>,
}

#[derive(Debug, Deserialize)]
struct WireItem {
    #[serde(default)]
    id: Option<serde_json::Value>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default, rename = "pubDate")]
    pub_date: Option<serde_json::Value>,
    #[serde(default)]
    url: Option<String>,
}

pub struct NewswireAdapter {
    id: String,
    mode: Mode,
    timeout: Duration,
}

enum Mode {
    Fixture(String),
    Http { url: String, client: reqwest::Client },
}

impl NewswireAdapter {
    pub fn from_url(id: &str, url: &str, timeout: Duration) -> Self {
        Self {
            id: id.to_string(),
            mode: Mode::Http {
                url: url.to_string(),
                client: reqwest::Client::new(),
            },
            timeout,
        }
    }

    /// In-memory payload, used by tests and local runs.
    pub fn from_fixture_str(id: &str, payload: &str) -> Self {
        Self {
            id: id.to_string(),
            mode: Mode::Fixture(payload.to_string()),
            timeout: Duration::from_secs(10),
        }
    }

    fn parse_items(&self, payload: &str) -> Result<Vec<RawItem>, FetchError> {
        let t0 = std::time::Instant::now();
        let envelope: Envelope = serde_json::from_str(payload)
            .map_err(|e| FetchError::Malformed(format!("newswire json: {e}")))?;

        if envelope.status.as_deref() == Some("error") {
            return Err(FetchError::Malformed("upstream reported error status".into()));
        }

        let mut out = Vec::with_capacity(envelope.items.len().min(ITEM_CAP));
        for it in envelope.items.into_iter().take(ITEM_CAP) {
            let title = normalize_text(it.title.as_deref().unwrap_or_default());
            if title.is_empty() {
                continue;
            }
            let body = normalize_text(it.description.as_deref().unwrap_or_default());
            let published_at = it
                .pub_date
                .as_ref()
                .and_then(parse_pub_date)
                .unwrap_or_else(Utc::now);
            let external_id = external_id_of(&it, &title);

            out.push(RawItem {
                source_id: self.id.clone(),
                external_id,
                title,
                body,
                published_at,
                url: it.url,
            });
        }

        let ms = t0.elapsed().as_secs_f64() * 1_000.0;
        histogram!("source_parse_ms").record(ms);
        counter!("source_items_total").increment(out.len() as u64);
        Ok(out)
    }
}

/// `pubDate` arrives as epoch millis, epoch seconds, or an RFC 3339 string
/// depending on the feed.
fn parse_pub_date(v: &serde_json::Value) -> Option<DateTime<Utc>> {
    match v {
        serde_json::Value::Number(n) => {
            let raw = n.as_i64()?;
            epoch_to_utc(raw)
        }
        serde_json::Value::String(s) => {
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.with_timezone(&Utc));
            }
            let raw: i64 = s.trim().parse().ok()?;
            epoch_to_utc(raw)
        }
        _ => None,
    }
}

fn epoch_to_utc(raw: i64) -> Option<DateTime<Utc>> {
    // Heuristic split between millisecond and second precision.
    if raw > 10_000_000_000 {
        Utc.timestamp_millis_opt(raw).single()
    } else {
        Utc.timestamp_opt(raw, 0).single()
    }
}

fn external_id_of(it: &WireItem, title: &str) -> String {
    match &it.id {
        Some(serde_json::Value::String(s)) if !s.is_empty() => s.clone(),
        Some(serde_json::Value::Number(n)) => n.to_string(),
        _ => it
            .url
            .clone()
            .unwrap_or_else(|| stable_id(&[title], 16)),
    }
}

#[async_trait]
impl SourceAdapter for NewswireAdapter {
    fn source_id(&self) -> &str {
        &self.id
    }

    async fn fetch(&self) -> Result<Vec<RawItem>, FetchError> {
        match &self.mode {
            Mode::Fixture(payload) => self.parse_items(payload),
            Mode::Http { url, client } => {
                let body = get_text(client, url, self.timeout).await?;
                self.parse_items(&body)
            }
        }
    }
}
