//! Duplicate grouping: pairwise text similarity + union-find components.
//!
//! Similarity is symmetric but not transitive, so equivalent pairs form a
//! graph and connected components decide the groups; a chain A–B–C merges
//! even when A–C alone scores under the threshold. Pure and deterministic:
//! same items + same threshold in, same partition out.

use std::collections::BTreeSet;

use crate::model::{stable_id, CanonicalItem, Category, Impact, RawItem};

/// Jaccard weight vs edit-distance weight in the combined score.
const TITLE_OVERLAP_WEIGHT: f64 = 0.5;
const CONTENT_SIMILARITY_WEIGHT: f64 = 0.5;

const STOPWORDS: &[&str] = &[
    "a", "an", "the", "of", "to", "in", "on", "by", "for", "and", "as", "at", "with",
];

/// Source ids in configured priority order; the first listed source wins
/// canonical-field ties.
#[derive(Debug, Clone, Default)]
pub struct SourcePriority {
    order: Vec<String>,
}

impl SourcePriority {
    pub fn from_order(order: Vec<String>) -> Self {
        Self { order }
    }

    /// Rank of a source; unknown sources sort last.
    pub fn rank(&self, source_id: &str) -> usize {
        self.order
            .iter()
            .position(|s| s == source_id)
            .unwrap_or(usize::MAX)
    }
}

/// Combined pairwise score in [0, 1]: normalized-title token overlap plus
/// edit similarity over the full text.
pub fn similarity(a: &RawItem, b: &RawItem) -> f64 {
    let ka = ScoreKey::of(a);
    let kb = ScoreKey::of(b);
    ka.score_against(&kb)
}

struct ScoreKey {
    tokens: BTreeSet<String>,
    text: String,
}

impl ScoreKey {
    fn of(item: &RawItem) -> Self {
        let tokens = title_tokens(&item.title);
        let mut text = item.title.to_ascii_lowercase();
        if !item.body.is_empty() {
            text.push(' ');
            text.push_str(&item.body.to_ascii_lowercase());
        }
        Self { tokens, text }
    }

    fn score_against(&self, other: &Self) -> f64 {
        let overlap = jaccard(&self.tokens, &other.tokens);
        let content = strsim::normalized_levenshtein(&self.text, &other.text);
        TITLE_OVERLAP_WEIGHT * overlap + CONTENT_SIMILARITY_WEIGHT * content
    }
}

/// Lowercased alphanumeric tokens with stopwords removed and a light plural
/// fold, so "rates" and "rate" overlap.
fn title_tokens(title: &str) -> BTreeSet<String> {
    title
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_ascii_lowercase())
        .filter(|t| !STOPWORDS.contains(&t.as_str()))
        .map(fold_plural)
        .collect()
}

fn fold_plural(tok: String) -> String {
    if tok.len() > 3 && tok.ends_with('s') && !tok.ends_with("ss") {
        tok[..tok.len() - 1].to_string()
    } else {
        tok
    }
}

fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let common = a.intersection(b).count();
    let union = a.len() + b.len() - common;
    common as f64 / union as f64
}

struct UnionFind {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            rank: vec![0; n],
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            // path halving
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn union(&mut self, a: usize, b: usize) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra == rb {
            return;
        }
        match self.rank[ra].cmp(&self.rank[rb]) {
            std::cmp::Ordering::Less => self.parent[ra] = rb,
            std::cmp::Ordering::Greater => self.parent[rb] = ra,
            std::cmp::Ordering::Equal => {
                self.parent[rb] = ra;
                self.rank[ra] += 1;
            }
        }
    }
}

/// Partition one run's items into canonical groups.
///
/// Canonical fields: title/body/url come from the highest-priority
/// contributor (ties by earliest `published_at`, then external id);
/// `published_at` is the minimum across contributors; `source_ids` the
/// union. Output is ordered newest-first with the canonical id as
/// tiebreak, independent of input order. Grouping the grouped output again
/// yields the same partition: cross-group pairs already scored under the
/// threshold, so the second pass has no edges.
pub fn group_items(
    items: Vec<RawItem>,
    priority: &SourcePriority,
    threshold: f64,
) -> Vec<CanonicalItem> {
    if items.is_empty() {
        return Vec::new();
    }

    let keys: Vec<ScoreKey> = items.iter().map(ScoreKey::of).collect();

    // Pairwise over one run's item set; n stays digest-sized.
    let mut uf = UnionFind::new(items.len());
    for i in 0..items.len() {
        for j in (i + 1)..items.len() {
            if keys[i].score_against(&keys[j]) >= threshold {
                uf.union(i, j);
            }
        }
    }

    let mut groups: std::collections::HashMap<usize, Vec<usize>> =
        std::collections::HashMap::new();
    for idx in 0..items.len() {
        let root = uf.find(idx);
        groups.entry(root).or_default().push(idx);
    }

    let mut out: Vec<CanonicalItem> = groups
        .into_values()
        .map(|member_idxs| merge_group(&items, member_idxs, priority))
        .collect();

    out.sort_by(|a, b| {
        b.published_at
            .cmp(&a.published_at)
            .then_with(|| a.canonical_id.cmp(&b.canonical_id))
    });
    out
}

fn merge_group(
    items: &[RawItem],
    mut member_idxs: Vec<usize>,
    priority: &SourcePriority,
) -> CanonicalItem {
    // Leader: best priority, then earliest report, then stable id order.
    member_idxs.sort_by(|&a, &b| {
        let ia = &items[a];
        let ib = &items[b];
        priority
            .rank(&ia.source_id)
            .cmp(&priority.rank(&ib.source_id))
            .then_with(|| ia.published_at.cmp(&ib.published_at))
            .then_with(|| ia.external_id.cmp(&ib.external_id))
    });
    let leader = &items[member_idxs[0]];

    let published_at = member_idxs
        .iter()
        .map(|&i| items[i].published_at)
        .min()
        .unwrap_or(leader.published_at);

    let source_ids: BTreeSet<String> = member_idxs
        .iter()
        .map(|&i| items[i].source_id.clone())
        .collect();

    let canonical_id = stable_id(
        &[&leader.title.to_ascii_lowercase(), &published_at.to_rfc3339()],
        16,
    );

    CanonicalItem {
        canonical_id,
        title: leader.title.clone(),
        body: leader.body.clone(),
        published_at,
        source_ids,
        category: Category::Unclassified,
        impact: Impact::Unclassified,
        url: leader.url.clone(),
    }
}
