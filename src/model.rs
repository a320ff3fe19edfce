//! Core data model: raw provider items, canonical merged items, sealed digests.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};

/// Version tag for the closed label set below. Bump when labels change.
pub const LABEL_SET_VERSION: &str = "v1";

/// Closed category set. Anything a backend emits outside this set collapses
/// to `Unclassified` at the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    MonetaryPolicy,
    Macro,
    Markets,
    Corporate,
    Commodities,
    Crypto,
    Geopolitics,
    Regulation,
    Unclassified,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::MonetaryPolicy => "monetary-policy",
            Category::Macro => "macro",
            Category::Markets => "markets",
            Category::Corporate => "corporate",
            Category::Commodities => "commodities",
            Category::Crypto => "crypto",
            Category::Geopolitics => "geopolitics",
            Category::Regulation => "regulation",
            Category::Unclassified => "unclassified",
        }
    }

    /// Map a free-form label onto the closed set. Unknown labels land on
    /// `Unclassified` instead of failing the item.
    pub fn from_label(label: &str) -> Self {
        match normalize_label(label).as_str() {
            "monetary-policy" | "monetary" | "rates" | "central-bank" => Category::MonetaryPolicy,
            "macro" | "macroeconomics" | "economy" | "economic" => Category::Macro,
            "markets" | "market" | "equities" | "stocks" => Category::Markets,
            "corporate" | "company" | "companies" | "earnings" => Category::Corporate,
            "commodities" | "commodity" | "energy" => Category::Commodities,
            "crypto" | "cryptocurrency" | "digital-assets" => Category::Crypto,
            "geopolitics" | "geopolitical" | "politics" => Category::Geopolitics,
            "regulation" | "regulatory" | "legal" => Category::Regulation,
            _ => Category::Unclassified,
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Three-valued impact polarity plus the pre-classification state.
/// Label mapping never produces `Unclassified`; unknown labels default to
/// `Neutral`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Impact {
    Positive,
    Negative,
    Neutral,
    Unclassified,
}

impl Impact {
    pub fn as_str(&self) -> &'static str {
        match self {
            Impact::Positive => "positive",
            Impact::Negative => "negative",
            Impact::Neutral => "neutral",
            Impact::Unclassified => "unclassified",
        }
    }

    pub fn from_label(label: &str) -> Self {
        match normalize_label(label).as_str() {
            "positive" | "bullish" | "good" => Impact::Positive,
            "negative" | "bearish" | "bad" => Impact::Negative,
            _ => Impact::Neutral,
        }
    }
}

impl std::fmt::Display for Impact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn normalize_label(label: &str) -> String {
    label
        .trim()
        .to_ascii_lowercase()
        .replace(['_', ' '], "-")
}

/// One item as reported by a single upstream source, already text-normalized
/// by the adapter. Immutable; consumed by grouping and then discarded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawItem {
    pub source_id: String,
    pub external_id: String,
    pub title: String,
    #[serde(default)]
    pub body: String,
    pub published_at: DateTime<Utc>,
    #[serde(default)]
    pub url: Option<String>,
}

/// The merged form of one news event across sources.
///
/// `published_at` is the earliest report among contributors; `source_ids`
/// is the union of everyone who reported it. `category`/`impact` start as
/// `Unclassified` and are populated exactly once before the digest seals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalItem {
    pub canonical_id: String,
    pub title: String,
    #[serde(default)]
    pub body: String,
    pub published_at: DateTime<Utc>,
    pub source_ids: BTreeSet<String>,
    pub category: Category,
    pub impact: Impact,
    #[serde(default)]
    pub url: Option<String>,
}

/// A sealed run result. Never mutated after construction; the cache hands out
/// shared references to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Digest {
    pub digest_id: String,
    pub generated_at: DateTime<Utc>,
    pub items: Vec<CanonicalItem>,
    pub source_failures: BTreeSet<String>,
}

impl Digest {
    /// Seal a finished run under its logical key.
    pub fn seal(
        key: &str,
        items: Vec<CanonicalItem>,
        source_failures: BTreeSet<String>,
        generated_at: DateTime<Utc>,
    ) -> Self {
        let digest_id = stable_id(&[key, &generated_at.to_rfc3339()], 12);
        Self {
            digest_id,
            generated_at,
            items,
            source_failures,
        }
    }

    pub fn impact_counts(&self) -> (usize, usize, usize) {
        let mut pos = 0;
        let mut neg = 0;
        let mut neu = 0;
        for it in &self.items {
            match it.impact {
                Impact::Positive => pos += 1,
                Impact::Negative => neg += 1,
                _ => neu += 1,
            }
        }
        (pos, neg, neu)
    }
}

/// Short stable hex id over the given parts (sha256 prefix).
pub fn stable_id(parts: &[&str], hex_len: usize) -> String {
    let mut hasher = Sha256::new();
    for p in parts {
        hasher.update(p.as_bytes());
        hasher.update([0u8]);
    }
    let digest = hasher.finalize();
    let mut out = String::with_capacity(hex_len);
    for b in digest.iter() {
        use std::fmt::Write;
        let _ = write!(out, "{b:02x}");
        if out.len() >= hex_len {
            break;
        }
    }
    out.truncate(hex_len);
    out
}
