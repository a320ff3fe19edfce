//! Source adapters: each upstream wire format lives behind one trait.

pub mod newswire;
pub mod rss;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::OnceCell;

use crate::config::{AppConfig, SourceKind};
use crate::error::FetchError;
use crate::model::RawItem;

/// One upstream provider. Auth, pagination and payload parsing are the
/// adapter's business; the pipeline only sees `RawItem`s or a `FetchError`.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Stable id, matching config and digest `source_ids`.
    fn source_id(&self) -> &str;

    async fn fetch(&self) -> Result<Vec<RawItem>, FetchError>;
}

/// Build the adapter set from config, in priority order.
pub fn build_adapters(cfg: &AppConfig) -> Vec<Arc<dyn SourceAdapter>> {
    let timeout = cfg.fetch_timeout();
    cfg.sources
        .iter()
        .map(|s| match s.kind {
            SourceKind::Newswire => Arc::new(newswire::NewswireAdapter::from_url(
                &s.id, &s.url, timeout,
            )) as Arc<dyn SourceAdapter>,
            SourceKind::Rss => {
                Arc::new(rss::RssAdapter::from_url(&s.id, &s.url, timeout))
                    as Arc<dyn SourceAdapter>
            }
        })
        .collect()
}

static RE_TAGS: OnceCell<regex::Regex> = OnceCell::new();
static RE_WS: OnceCell<regex::Regex> = OnceCell::new();

/// Normalize wire text: decode HTML entities, strip tags, straighten quotes,
/// collapse whitespace, trim trailing sentence punctuation, cap length.
pub fn normalize_text(s: &str) -> String {
    let mut out = html_escape::decode_html_entities(s).to_string();

    let re_tags = RE_TAGS.get_or_init(|| regex::Regex::new(r"(?is)</?[^>]+>").unwrap());
    out = re_tags.replace_all(&out, "").to_string();

    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"\s+").unwrap());
    out = re_ws.replace_all(&out, " ").trim().to_string();

    while let Some(last) = out.chars().last() {
        if matches!(last, '!' | '?' | '.' | ',') {
            out.pop();
        } else {
            break;
        }
    }

    if out.chars().count() > 1500 {
        out = out.chars().take(1500).collect();
    }

    out
}

/// Shared timeout helper so both adapters report the same error shape.
pub(crate) async fn get_text(
    client: &reqwest::Client,
    url: &str,
    timeout: Duration,
) -> Result<String, FetchError> {
    let resp = client.get(url).timeout(timeout).send().await?;
    let status = resp.status();
    if !status.is_success() {
        return Err(FetchError::Status {
            status: status.as_u16(),
        });
    }
    Ok(resp.text().await?)
}
