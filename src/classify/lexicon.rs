//! Deterministic keyword fallback: category rules + impact scoring with a
//! small negation window. Always produces a label pair; used whenever the
//! remote backend is unavailable, times out, or answers out of shape.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::model::{Category, Impact};

/// Ordered rule set: the first category whose keyword hits wins.
#[derive(Debug, Clone, Deserialize)]
pub struct LexiconRules {
    pub categories: Vec<CategoryRule>,
    pub impact: ImpactLexicon,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CategoryRule {
    pub category: Category,
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImpactLexicon {
    /// Single tokens, scored with negation inversion.
    #[serde(default)]
    pub words: HashMap<String, i32>,
    /// Multi-token phrases, scored on plain containment.
    #[serde(default)]
    pub phrases: Vec<(String, i32)>,
}

#[derive(Debug, Clone)]
pub struct LexiconClassifier {
    rules: LexiconRules,
}

impl Default for LexiconClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl LexiconClassifier {
    pub fn new() -> Self {
        Self {
            rules: default_seed(),
        }
    }

    /// Load a JSON rules file, falling back to the built-in seed when the
    /// file is missing or unparsable. Missing rules never break startup.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Self {
        match std::fs::read_to_string(path.as_ref()) {
            Ok(raw) => match serde_json::from_str::<LexiconRules>(&raw) {
                Ok(rules) => Self { rules },
                Err(e) => {
                    tracing::warn!(error = %e, path = %path.as_ref().display(), "invalid lexicon rules file; using built-in seed");
                    Self::new()
                }
            },
            Err(_) => Self::new(),
        }
    }

    pub fn classify(&self, title: &str, body: &str) -> (Category, Impact) {
        let tokens = tokenize(title, body);
        let padded = padded_join(&tokens);

        let category = self
            .rules
            .categories
            .iter()
            .find(|rule| {
                rule.keywords
                    .iter()
                    .any(|kw| phrase_hit(&padded, kw))
            })
            .map(|rule| rule.category)
            .unwrap_or(Category::Unclassified);

        let impact = self.score_impact(&tokens, &padded);
        (category, impact)
    }

    fn score_impact(&self, tokens: &[String], padded: &str) -> Impact {
        let mut score: i32 = 0;

        for (i, tok) in tokens.iter().enumerate() {
            if let Some(&base) = self.rules.impact.words.get(tok.as_str()) {
                // Invert when a negator sits within the last three tokens.
                let negated = (1..=3).any(|k| i >= k && is_negator(tokens[i - k].as_str()));
                score += if negated { -base } else { base };
            }
        }

        for (phrase, weight) in &self.rules.impact.phrases {
            if phrase_hit(padded, phrase) {
                score += weight;
            }
        }

        match score.cmp(&0) {
            std::cmp::Ordering::Greater => Impact::Positive,
            std::cmp::Ordering::Less => Impact::Negative,
            std::cmp::Ordering::Equal => Impact::Neutral,
        }
    }
}

/// Lowercased alphanumeric tokens over title + body, plural-folded so the
/// seed can list singular forms only.
fn tokenize(title: &str, body: &str) -> Vec<String> {
    let mut text = title.to_string();
    if !body.is_empty() {
        text.push(' ');
        text.push_str(body);
    }
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| fold_plural(&t.to_ascii_lowercase()))
        .collect()
}

fn fold_plural(tok: &str) -> String {
    if tok.len() > 3 && tok.ends_with('s') && !tok.ends_with("ss") {
        tok[..tok.len() - 1].to_string()
    } else {
        tok.to_string()
    }
}

fn padded_join(tokens: &[String]) -> String {
    let mut s = String::with_capacity(tokens.iter().map(|t| t.len() + 1).sum::<usize>() + 2);
    s.push(' ');
    for t in tokens {
        s.push_str(t);
        s.push(' ');
    }
    s
}

/// Word-boundary containment: keywords are normalized the same way as the
/// text (and keep both pad spaces), so "raise rate" hits
/// "Fed raises rates 0.25%" but "rate" never hits "pirates".
fn phrase_hit(padded: &str, keyword: &str) -> bool {
    let needle = padded_join(&tokenize(keyword, ""));
    !needle.trim().is_empty() && padded.contains(&needle)
}

/// Only negators that survive tokenization unambiguously; contraction
/// stems like "won" or "can" collide with ordinary words.
fn is_negator(tok: &str) -> bool {
    matches!(tok, "not" | "no" | "never" | "cannot" | "without")
}

fn default_seed() -> LexiconRules {
    let cat = |category: Category, kws: &[&str]| CategoryRule {
        category,
        keywords: kws.iter().map(|s| s.to_string()).collect(),
    };

    let categories = vec![
        cat(
            Category::MonetaryPolicy,
            &[
                "fed", "federal reserve", "fomc", "ecb", "boe", "boj", "pboc", "central bank",
                "rate hike", "rate cut", "raise rate", "interest rate", "monetary", "powell",
                "rate",
            ],
        ),
        cat(
            Category::Regulation,
            &["sec", "regulator", "antitrust", "lawsuit", "probe", "fine", "ban"],
        ),
        cat(
            Category::Commodities,
            &["oil", "gold", "opec", "crude", "copper", "natural gas", "wheat", "commodity"],
        ),
        cat(
            Category::Crypto,
            &["bitcoin", "crypto", "ethereum", "btc", "eth", "stablecoin"],
        ),
        cat(
            Category::Geopolitics,
            &["war", "sanction", "tariff", "election", "military", "border", "treaty"],
        ),
        cat(
            Category::Corporate,
            &[
                "earning", "ipo", "merger", "acquisition", "dividend", "buyback", "guidance",
                "revenue", "profit", "ceo",
            ],
        ),
        cat(
            Category::Macro,
            &[
                "cpi", "inflation", "gdp", "unemployment", "payroll", "pmi", "retail sale",
                "economy", "job",
            ],
        ),
        cat(
            Category::Markets,
            &["stock", "index", "future", "bond", "yield", "equity", "treasury", "nasdaq", "dow"],
        ),
    ];

    let words: HashMap<String, i32> = [
        ("beat", 1),
        ("rally", 1),
        ("surge", 1),
        ("gain", 1),
        ("jump", 1),
        ("climb", 1),
        ("soar", 1),
        ("growth", 1),
        ("stimulus", 1),
        ("upgrade", 1),
        ("ease", 1),
        ("easing", 1),
        ("expand", 1),
        ("hike", -1),
        ("tighten", -1),
        ("inflation", -1),
        ("drop", -1),
        ("fall", -1),
        ("decline", -1),
        ("slump", -1),
        ("plunge", -1),
        ("slip", -1),
        ("tariff", -1),
        ("sanction", -1),
        ("recession", -1),
        ("default", -1),
        ("layoff", -1),
        ("downgrade", -1),
        ("miss", -1),
        ("war", -1),
        ("crash", -1),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect();

    let phrases = vec![
        ("raise rate".to_string(), -1),
        ("rate hike".to_string(), -1),
        ("rate cut".to_string(), 1),
        ("cut rate".to_string(), 1),
        ("record high".to_string(), 1),
        ("beat expectation".to_string(), 1),
        ("miss expectation".to_string(), -1),
    ];

    LexiconRules {
        categories,
        impact: ImpactLexicon { words, phrases },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_hikes_read_as_negative_monetary_policy() {
        let lexicon = LexiconClassifier::new();
        let (cat, imp) = lexicon.classify("Fed raises rates 0.25%", "");
        assert_eq!(cat, Category::MonetaryPolicy);
        assert_eq!(imp, Impact::Negative);

        let (cat, imp) = lexicon.classify("Fed hikes rate by quarter point", "");
        assert_eq!(cat, Category::MonetaryPolicy);
        assert_eq!(imp, Impact::Negative);
    }

    #[test]
    fn rate_cuts_read_as_positive() {
        let lexicon = LexiconClassifier::new();
        let (cat, imp) = lexicon.classify("ECB cuts rates by 50bp", "");
        assert_eq!(cat, Category::MonetaryPolicy);
        assert_eq!(imp, Impact::Positive);
    }

    #[test]
    fn commodity_rally_is_positive_commodities() {
        let lexicon = LexiconClassifier::new();
        let (cat, imp) = lexicon.classify("Oil climbs 2% on supply cuts", "");
        assert_eq!(cat, Category::Commodities);
        assert_eq!(imp, Impact::Positive);
    }

    #[test]
    fn negation_flips_word_score() {
        let lexicon = LexiconClassifier::new();
        let (_, imp) = lexicon.classify("Company will not miss targets this year", "");
        assert_eq!(imp, Impact::Positive);
    }

    #[test]
    fn unmatched_text_stays_unclassified_neutral() {
        let lexicon = LexiconClassifier::new();
        let (cat, imp) = lexicon.classify("Quiet afternoon at the village fair", "");
        assert_eq!(cat, Category::Unclassified);
        assert_eq!(imp, Impact::Neutral);
    }

    #[test]
    fn body_text_participates() {
        let lexicon = LexiconClassifier::new();
        let (cat, _) = lexicon.classify("Morning briefing", "Bitcoin slumps under 60k");
        assert_eq!(cat, Category::Crypto);
    }

    #[test]
    fn rules_file_overrides_seed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lexicon.json");
        std::fs::write(
            &path,
            r#"{
                "categories": [
                    {"category": "crypto", "keywords": ["sprocket"]}
                ],
                "impact": {"words": {"sprocket": 1}, "phrases": []}
            }"#,
        )
        .unwrap();

        let lexicon = LexiconClassifier::load_from_file(&path);
        let (cat, imp) = lexicon.classify("Sprockets everywhere", "");
        assert_eq!(cat, Category::Crypto);
        assert_eq!(imp, Impact::Positive);

        // Broken file falls back to the seed.
        std::fs::write(&path, "{nope").unwrap();
        let fallback = LexiconClassifier::load_from_file(&path);
        let (cat, _) = fallback.classify("Fed raises rates", "");
        assert_eq!(cat, Category::MonetaryPolicy);
    }
}
