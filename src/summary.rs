//! Recurring-query summary: group plans by query fingerprint and rank by
//! total time spent.

use crate::hashing;
use crate::plan::Plan;
use std::collections::HashMap;
use std::fmt::Write as _;

/// Aggregated timing for one group of plans sharing a query fingerprint.
#[derive(Debug, Clone, PartialEq)]
pub struct QuerySummary {
    /// Fingerprint shared by the group; `None` for plans without query text.
    pub query_hash: Option<String>,
    /// First query text seen for the group.
    pub query_text: Option<String>,
    pub calls: u64,
    pub total_ms: f64,
    pub max_ms: f64,
}

impl QuerySummary {
    pub fn mean_ms(&self) -> f64 {
        if self.calls == 0 {
            0.0
        } else {
            self.total_ms / self.calls as f64
        }
    }
}

/// Group plans by fingerprint, slowest total first.
///
/// Plans that already carry a `query_hash` use it; otherwise it is computed
/// from the query text. Ties keep first-appearance order.
pub fn summarize(plans: &[Plan]) -> Vec<QuerySummary> {
    let mut groups: Vec<QuerySummary> = Vec::new();
    let mut index: HashMap<Option<String>, usize> = HashMap::new();

    for plan in plans {
        let key = match (&plan.query_hash, &plan.query_text) {
            (Some(hash), _) => Some(hash.clone()),
            (None, Some(text)) => Some(hashing::query_hash(text)),
            (None, None) => None,
        };

        let slot = *index.entry(key.clone()).or_insert_with(|| {
            groups.push(QuerySummary {
                query_hash: key,
                query_text: plan.query_text.clone(),
                calls: 0,
                total_ms: 0.0,
                max_ms: 0.0,
            });
            groups.len() - 1
        });

        let group = &mut groups[slot];
        group.calls += 1;
        group.total_ms += plan.duration_ms;
        group.max_ms = group.max_ms.max(plan.duration_ms);
    }

    // Stable sort keeps first-appearance order for equal totals.
    groups.sort_by(|a, b| b.total_ms.total_cmp(&a.total_ms));
    groups
}

/// Render the top `limit` groups (all when `limit` is 0) as a text table.
pub fn render_summary(summaries: &[QuerySummary], limit: usize) -> String {
    let shown = if limit == 0 {
        summaries.len()
    } else {
        limit.min(summaries.len())
    };

    let mut out = format!(
        "## SLOWEST QUERIES ({} of {})\n\n{:>6}  {:>12}  {:>10}  {:>10}  {:<12}  query\n",
        shown,
        summaries.len(),
        "calls",
        "total_ms",
        "mean_ms",
        "max_ms",
        "hash"
    );

    for s in &summaries[..shown] {
        let hash = s
            .query_hash
            .as_deref()
            .map(|h| h.char_indices().nth(12).map_or(h, |(i, _)| &h[..i]))
            .unwrap_or("-");
        let text = s
            .query_text
            .as_deref()
            .map(hashing::normalize_query)
            .unwrap_or_else(|| "(no query text)".to_string());
        let _ = writeln!(
            out,
            "{:>6}  {:>12.3}  {:>10.3}  {:>10.3}  {:<12}  {}",
            s.calls,
            s.total_ms,
            s.mean_ms(),
            s.max_ms,
            hash,
            truncate(&text, 80)
        );
    }

    out
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let mut s: String = text.chars().take(max_chars.saturating_sub(3)).collect();
        s.push_str("...");
        s
    }
}
