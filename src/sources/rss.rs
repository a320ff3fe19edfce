//! RSS 2.0 adapter for conventional press feeds.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use metrics::{counter, histogram};
use quick_xml::de::from_str;
use serde::Deserialize;
use time::{format_description::well_known::Rfc2822, OffsetDateTime, UtcOffset};

use crate::error::FetchError;
use crate::model::{stable_id, RawItem};
use crate::sources::{get_text, normalize_text, SourceAdapter};

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    item: Vec<Item>,
}

#[derive(Debug, Deserialize)]
struct Item {
    title: Option<String>,
    link: Option<String>,
    guid: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    description: Option<String>,
}

pub struct RssAdapter {
    id: String,
    mode: Mode,
    timeout: Duration,
}

enum Mode {
    Fixture(String),
    Http { url: String, client: reqwest::Client },
}

impl RssAdapter {
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

    pub fn from_fixture_str(id: &str, xml: &str) -> Self {
        Self {
            id: id.to_string(),
            mode: Mode::Fixture(xml.to_string()),
            timeout: Duration::from_secs(10),
        }
    }

    fn parse_items(&self, xml: &str) -> Result<Vec<RawItem>, FetchError> {
        let t0 = std::time::Instant::now();
        let xml_clean = scrub_html_entities_for_xml(xml);
        let rss: Rss =
            from_str(&xml_clean).map_err(|e| FetchError::Malformed(format!("rss xml: {e}")))?;

        let mut out = Vec::with_capacity(rss.channel.item.len());
        for it in rss.channel.item {
            let title = normalize_text(it.title.as_deref().unwrap_or_default());
            if title.is_empty() {
                continue;
            }
            let body = normalize_text(it.description.as_deref().unwrap_or_default());
            let published_at = it
                .pub_date
                .as_deref()
                .and_then(parse_rfc2822_to_utc)
                .unwrap_or_else(Utc::now);
            let external_id = it
                .guid
                .clone()
                .or_else(|| it.link.clone())
                .unwrap_or_else(|| stable_id(&[&title], 16));

            out.push(RawItem {
                source_id: self.id.clone(),
                external_id,
                title,
                body,
                published_at,
                url: it.link,
            });
        }

        let ms = t0.elapsed().as_secs_f64() * 1_000.0;
        histogram!("source_parse_ms").record(ms);
        counter!("source_items_total").increment(out.len() as u64);
        Ok(out)
    }
}

fn parse_rfc2822_to_utc(ts: &str) -> Option<DateTime<Utc>> {
    let unix = OffsetDateTime::parse(ts, &Rfc2822)
        .ok()
        .map(|dt| dt.to_offset(UtcOffset::UTC).unix_timestamp())?;
    Utc.timestamp_opt(unix, 0).single()
}

/// Feeds routinely embed HTML entities invalid in strict XML.
fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
}

#[async_trait]
impl SourceAdapter for RssAdapter {
    fn source_id(&self) -> &str {
        &self.id
    }

    async fn fetch(&self) -> Result<Vec<RawItem>, FetchError> {
        match &self.mode {
            Mode::Fixture(xml) => self.parse_items(xml),
            Mode::Http { url, client } => {
                let body = get_text(client, url, self.timeout).await?;
                self.parse_items(&body)
            }
        }
    }
}
