//! Relevance scoring policy.
//!
//! All heuristic constants live in [`ScoringPolicy`], loaded from the
//! `[scoring]` config table. The functions here are pure: they take text
//! and records and return scores, never touching the network or the cache.
//!
//! # Strategy scores
//!
//! | Strategy | Score |
//! |----------|-------|
//! | Api | `max(floor, top - rank * decay)` |
//! | TitlePath | `exact_title_score` on a full-title match, otherwise `Σ weight(token) / n` |
//! | Content | `coverage * min(content_max, w * ln(1 + occurrences)) + phrase_bonus` |
//!
//! Scores of a page hit by more than one strategy are summed and capped at
//! `combined_score_cap` by [`merge_hits`].

use anyhow::{bail, Result};
use serde::Deserialize;
use std::collections::HashMap;

use crate::models::{PageRecord, SearchHit};

#[derive(Debug, Deserialize, Clone)]
pub struct ScoringPolicy {
    #[serde(default = "default_api_rank_top")]
    pub api_rank_top: f64,
    #[serde(default = "default_api_rank_decay")]
    pub api_rank_decay: f64,
    #[serde(default = "default_api_rank_floor")]
    pub api_rank_floor: f64,
    #[serde(default = "default_exact_title_score")]
    pub exact_title_score: f64,
    #[serde(default = "default_title_token_weight")]
    pub title_token_weight: f64,
    /// Credit for a token found only in an ancestor title.
    #[serde(default = "default_path_token_weight")]
    pub path_token_weight: f64,
    #[serde(default = "default_content_occurrence_weight")]
    pub content_occurrence_weight: f64,
    #[serde(default = "default_content_max")]
    pub content_max: f64,
    #[serde(default = "default_content_phrase_bonus")]
    pub content_phrase_bonus: f64,
    /// Share of distinct query tokens a page body must contain to count.
    #[serde(default = "default_content_min_coverage")]
    pub content_min_coverage: f64,
    #[serde(default = "default_combined_score_cap")]
    pub combined_score_cap: f64,
}

impl Default for ScoringPolicy {
    fn default() -> Self {
        Self {
            api_rank_top: default_api_rank_top(),
            api_rank_decay: default_api_rank_decay(),
            api_rank_floor: default_api_rank_floor(),
            exact_title_score: default_exact_title_score(),
            title_token_weight: default_title_token_weight(),
            path_token_weight: default_path_token_weight(),
            content_occurrence_weight: default_content_occurrence_weight(),
            content_max: default_content_max(),
            content_phrase_bonus: default_content_phrase_bonus(),
            content_min_coverage: default_content_min_coverage(),
            combined_score_cap: default_combined_score_cap(),
        }
    }
}

fn default_api_rank_top() -> f64 {
    1.0
}
fn default_api_rank_decay() -> f64 {
    0.1
}
fn default_api_rank_floor() -> f64 {
    0.5
}
fn default_exact_title_score() -> f64 {
    1.0
}
fn default_title_token_weight() -> f64 {
    0.8
}
fn default_path_token_weight() -> f64 {
    0.4
}
fn default_content_occurrence_weight() -> f64 {
    0.35
}
fn default_content_max() -> f64 {
    0.9
}
fn default_content_phrase_bonus() -> f64 {
    0.2
}
fn default_content_min_coverage() -> f64 {
    0.5
}
fn default_combined_score_cap() -> f64 {
    2.0
}

impl ScoringPolicy {
    pub fn validate(&self) -> Result<()> {
        let non_negative = [
            ("api_rank_top", self.api_rank_top),
            ("api_rank_decay", self.api_rank_decay),
            ("api_rank_floor", self.api_rank_floor),
            ("exact_title_score", self.exact_title_score),
            ("title_token_weight", self.title_token_weight),
            ("path_token_weight", self.path_token_weight),
            ("content_occurrence_weight", self.content_occurrence_weight),
            ("content_max", self.content_max),
            ("content_phrase_bonus", self.content_phrase_bonus),
        ];
        for (name, value) in non_negative {
            if !value.is_finite() || value < 0.0 {
                bail!("scoring.{} must be a finite value >= 0", name);
            }
        }
        if self.api_rank_floor > self.api_rank_top {
            bail!("scoring.api_rank_floor must be <= scoring.api_rank_top");
        }
        if self.path_token_weight >= self.title_token_weight {
            bail!("scoring.path_token_weight must be lower than scoring.title_token_weight");
        }
        if !(self.content_min_coverage > 0.0 && self.content_min_coverage <= 1.0) {
            bail!("scoring.content_min_coverage must be in (0.0, 1.0]");
        }
        let strongest = self.max_single_strategy_score();
        if !self.combined_score_cap.is_finite() || self.combined_score_cap < strongest {
            bail!(
                "scoring.combined_score_cap must be >= {} (the highest single-strategy score)",
                strongest
            );
        }
        Ok(())
    }

    /// Highest score any one strategy can assign.
    pub fn max_single_strategy_score(&self) -> f64 {
        let title = self.exact_title_score.max(self.title_token_weight);
        let content = self.content_max + self.content_phrase_bonus;
        self.api_rank_top.max(title).max(content)
    }

    /// Score for the `rank`-th (zero-based) remote search result.
    pub fn api_rank_score(&self, rank: usize) -> f64 {
        (self.api_rank_top - rank as f64 * self.api_rank_decay).max(self.api_rank_floor)
    }

    /// Match query tokens against a record's title and ancestor path.
    ///
    /// Returns the score and a match reason, or `None` when nothing matched.
    pub fn title_path_score(&self, query: &str, record: &PageRecord) -> Option<(f64, String)> {
        let tokens = tokenize(query);
        if tokens.is_empty() {
            return None;
        }

        let title_lower = record.title.to_lowercase();
        if normalize_whitespace(&title_lower) == normalize_whitespace(&query.to_lowercase()) {
            return Some((self.exact_title_score, "exact title match".to_string()));
        }

        let title_tokens = tokenize(&record.title);
        let ancestors = record
            .path
            .iter()
            .take(record.path.len().saturating_sub(1))
            .map(|s| s.to_lowercase())
            .collect::<Vec<_>>()
            .join(" ");
        let ancestor_tokens = tokenize(&ancestors);

        let mut in_title = Vec::new();
        let mut in_path = Vec::new();
        for token in &tokens {
            if contains_token(&title_tokens, &title_lower, token) {
                in_title.push(token.as_str());
            } else if contains_token(&ancestor_tokens, &ancestors, token) {
                in_path.push(token.as_str());
            }
        }

        let total = in_title.len() as f64 * self.title_token_weight
            + in_path.len() as f64 * self.path_token_weight;
        let score = total / tokens.len() as f64;
        if score <= 0.0 {
            return None;
        }

        let reason = match (in_title.is_empty(), in_path.is_empty()) {
            (false, true) => format!("title matches: {}", in_title.join(", ")),
            (true, false) => format!("path matches: {}", in_path.join(", ")),
            _ => format!(
                "title matches: {}; path matches: {}",
                in_title.join(", "),
                in_path.join(", ")
            ),
        };
        Some((score, reason))
    }

    /// Score a page body against the query.
    ///
    /// Tokens match whole words of the body, or inside a word when they
    /// have four or more chars. `None` unless the query's words occur
    /// consecutively or token coverage reaches `content_min_coverage`.
    pub fn content_score(&self, query: &str, text: &str) -> Option<ContentMatch> {
        let tokens = tokenize(query);
        if tokens.is_empty() || text.trim().is_empty() {
            return None;
        }

        let body = words(text);
        let phrase = words(query);
        let phrase_found = body.windows(phrase.len()).any(|w| w == phrase.as_slice());

        let mut present = 0usize;
        let mut occurrences = 0usize;
        for token in &tokens {
            let count = if token.chars().count() >= 4 {
                body.iter().map(|w| w.matches(token.as_str()).count()).sum()
            } else {
                body.iter().filter(|w| *w == token).count()
            };
            if count > 0 {
                present += 1;
                occurrences += count;
            }
        }
        let coverage = present as f64 / tokens.len() as f64;

        if !phrase_found && coverage < self.content_min_coverage {
            return None;
        }

        let occurrence_part =
            (self.content_occurrence_weight * (1.0 + occurrences as f64).ln()).min(self.content_max);
        let mut score = coverage * occurrence_part;
        if phrase_found {
            score += self.content_phrase_bonus;
        }

        Some(ContentMatch {
            score,
            coverage,
            occurrences,
            phrase_found,
        })
    }
}

/// Outcome of scanning one page body.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentMatch {
    pub score: f64,
    /// Share of distinct query tokens present, in `[0, 1]`.
    pub coverage: f64,
    pub occurrences: usize,
    pub phrase_found: bool,
}

impl ContentMatch {
    pub fn reason(&self) -> String {
        if self.phrase_found {
            format!("content contains exact phrase ({} occurrences)", self.occurrences)
        } else {
            format!(
                "content covers {:.0}% of query terms ({} occurrences)",
                self.coverage * 100.0,
                self.occurrences
            )
        }
    }
}

/// Lowercased alphanumeric tokens, deduplicated, in first-seen order.
pub fn tokenize(text: &str) -> Vec<String> {
    let mut tokens: Vec<String> = Vec::new();
    for raw in text.split(|c: char| !c.is_alphanumeric()) {
        if raw.is_empty() {
            continue;
        }
        let token = raw.to_lowercase();
        if !tokens.contains(&token) {
            tokens.push(token);
        }
    }
    tokens
}

/// Lowercased alphanumeric words in order, repeats kept.
fn words(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Whole-token match, or substring match for tokens of four or more chars
/// ("cred" inside "credentials").
fn contains_token(haystack_tokens: &[String], haystack: &str, token: &str) -> bool {
    haystack_tokens.iter().any(|t| t == token)
        || (token.chars().count() >= 4 && haystack.contains(token))
}

/// An excerpt of about `width` chars around the first match of `query`.
///
/// Centres on the first exact-phrase match, falling back to the earliest
/// token match. Returns `None` when nothing in `text` matches. Truncated
/// ends are marked with `...`.
pub fn preview(text: &str, query: &str, width: usize) -> Option<String> {
    let chars: Vec<char> = normalize_whitespace(text).chars().collect();
    if chars.is_empty() || width == 0 {
        return None;
    }
    let lower: Vec<char> = chars
        .iter()
        .map(|c| c.to_lowercase().next().unwrap_or(*c))
        .collect();

    let phrase: Vec<char> = normalize_whitespace(&query.to_lowercase()).chars().collect();
    let (pos, len) = match find_chars(&lower, &phrase) {
        Some(pos) => (pos, phrase.len()),
        None => tokenize(query)
            .iter()
            .filter_map(|t| {
                let needle: Vec<char> = t.chars().collect();
                find_chars(&lower, &needle).map(|p| (p, needle.len()))
            })
            .min_by_key(|(p, _)| *p)?,
    };

    let lead = width.saturating_sub(len) / 2;
    let mut start = pos.saturating_sub(lead);
    let end = (start + width).min(chars.len());
    if end - start < width {
        start = end.saturating_sub(width);
    }

    let mut out = String::new();
    if start > 0 {
        out.push_str("...");
    }
    out.push_str(chars[start..end].iter().collect::<String>().trim());
    if end < chars.len() {
        out.push_str("...");
    }
    Some(out)
}

fn find_chars(haystack: &[char], needle: &[char]) -> Option<usize> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Combine per-strategy hit lists into one ranked list.
///
/// Hits are grouped by page id. Scores are summed and capped at `cap`,
/// strategy sets are unioned, distinct reasons are concatenated and the
/// first non-empty preview wins. A record carrying a derived path is
/// preferred over a bare remote record for the same page. Sorted by score
/// descending, then shallower depth, then title, then id.
pub fn merge_hits(lists: Vec<Vec<SearchHit>>, cap: f64, max_results: usize) -> Vec<SearchHit> {
    let mut merged: Vec<SearchHit> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for hit in lists.into_iter().flatten() {
        match index.get(&hit.page.id) {
            Some(&i) => {
                let existing = &mut merged[i];
                existing.score += hit.score;
                for strategy in hit.strategies {
                    if !existing.strategies.contains(&strategy) {
                        existing.strategies.push(strategy);
                    }
                }
                for reason in hit.match_reasons {
                    if !existing.match_reasons.contains(&reason) {
                        existing.match_reasons.push(reason);
                    }
                }
                let has_preview = existing.preview.as_deref().is_some_and(|p| !p.is_empty());
                if !has_preview && hit.preview.as_deref().is_some_and(|p| !p.is_empty()) {
                    existing.preview = hit.preview;
                }
                if existing.page.path.is_empty() && !hit.page.path.is_empty() {
                    existing.page = hit.page;
                }
            }
            None => {
                index.insert(hit.page.id.clone(), merged.len());
                merged.push(hit);
            }
        }
    }

    for hit in &mut merged {
        hit.score = hit.score.min(cap);
        hit.strategies.sort();
        hit.strategies.dedup();
    }

    merged.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.page.depth().cmp(&b.page.depth()))
            .then(a.page.title.cmp(&b.page.title))
            .then(a.page.id.cmp(&b.page.id))
    });
    merged.truncate(max_results);
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Strategy;

    fn record(id: &str, path: &[&str]) -> PageRecord {
        PageRecord {
            id: id.to_string(),
            title: path.last().copied().unwrap_or_default().to_string(),
            parent_id: None,
            archived: false,
            is_database: false,
            url: None,
            created: None,
            last_edited: None,
            path: path.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_defaults_validate() {
        ScoringPolicy::default().validate().unwrap();
    }

    #[test]
    fn test_cap_below_single_strategy_rejected() {
        let policy = ScoringPolicy {
            combined_score_cap: 1.0,
            ..ScoringPolicy::default()
        };
        let err = policy.validate().unwrap_err();
        assert!(err.to_string().contains("combined_score_cap"));
    }

    #[test]
    fn test_api_rank_decays_to_floor() {
        let policy = ScoringPolicy::default();
        assert!((policy.api_rank_score(0) - 1.0).abs() < 1e-9);
        assert!((policy.api_rank_score(2) - 0.8).abs() < 1e-9);
        assert!((policy.api_rank_score(5) - 0.5).abs() < 1e-9);
        assert!((policy.api_rank_score(40) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_tokenize_dedupes_and_lowercases() {
        assert_eq!(
            tokenize("Meeting notes, MEETING agenda!"),
            vec!["meeting", "notes", "agenda"]
        );
        assert!(tokenize("  ... ").is_empty());
    }

    #[test]
    fn test_exact_title_scores_highest() {
        let policy = ScoringPolicy::default();
        let page = record("p", &["Projects", "Meeting Notes"]);
        let (exact, _) = policy.title_path_score("meeting  notes", &page).unwrap();
        let (partial, _) = policy.title_path_score("meeting agenda", &page).unwrap();
        assert_eq!(exact, policy.exact_title_score);
        assert!(partial < exact);
    }

    #[test]
    fn test_path_only_match_scores_below_title_match() {
        let policy = ScoringPolicy::default();
        let page = record("p", &["Projects", "Q4 Planning", "Meeting Notes"]);
        let (title_score, _) = policy.title_path_score("meeting", &page).unwrap();
        let (path_score, reason) = policy.title_path_score("planning", &page).unwrap();
        assert!(path_score < title_score);
        assert!(reason.starts_with("path matches"));
        assert!(policy.title_path_score("budget", &page).is_none());
    }

    #[test]
    fn test_long_token_substring_matches_title() {
        let policy = ScoringPolicy::default();
        let page = record("p", &["Acappella DB Credentials"]);
        assert!(policy.title_path_score("cre", &page).is_none());
        assert!(policy.title_path_score("credential", &page).is_some());
    }

    #[test]
    fn test_content_requires_coverage_or_phrase() {
        let policy = ScoringPolicy::default();
        assert!(policy
            .content_score("alpha beta gamma", "only alpha here")
            .is_none());
        let m = policy
            .content_score("alpha beta gamma", "alpha and beta are here")
            .unwrap();
        assert!(!m.phrase_found);
        assert!((m.coverage - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_content_phrase_bonus_and_diminishing_returns() {
        let policy = ScoringPolicy::default();
        let once = policy.content_score("db password", "the db password is x").unwrap();
        let many = policy
            .content_score("db password", &"the db password is x. ".repeat(50))
            .unwrap();
        assert!(once.phrase_found);
        assert!(many.score > once.score);
        assert!(many.score <= policy.content_max + policy.content_phrase_bonus + 1e-9);
    }

    #[test]
    fn test_content_short_tokens_need_whole_words() {
        let policy = ScoringPolicy::default();
        assert!(policy
            .content_score("what is the wifi password", "Whatever this thesis says")
            .is_none());

        let m = policy
            .content_score("what is the wifi password", "The wifi password is hunter2.")
            .unwrap();
        assert!(!m.phrase_found);
        assert!((m.coverage - 0.8).abs() < 1e-9);
        assert_eq!(m.occurrences, 4);
    }

    #[test]
    fn test_content_long_token_matches_inside_word() {
        let policy = ScoringPolicy::default();
        let m = policy
            .content_score("staging credential", "Staging DB credentials are in the vault")
            .unwrap();
        assert_eq!(m.coverage, 1.0);
        assert_eq!(m.occurrences, 2);
    }

    #[test]
    fn test_preview_centres_on_phrase() {
        let text = format!("{} the secret token lives here {}", "x ".repeat(200), "y ".repeat(200));
        let p = preview(&text, "secret token", 40).unwrap();
        assert!(p.starts_with("..."));
        assert!(p.ends_with("..."));
        assert!(p.contains("secret token"));
    }

    #[test]
    fn test_preview_handles_multibyte_text() {
        let text = "Überprüfung der Zugangsdaten für das Büro, Schlüssel liegt im Safe ✓";
        let p = preview(text, "schlüssel", 20).unwrap();
        assert!(p.to_lowercase().contains("schlüssel"));
        assert!(preview(text, "absent", 20).is_none());
    }

    #[test]
    fn test_preview_short_text_has_no_markers() {
        assert_eq!(preview("short note", "note", 200).unwrap(), "short note");
    }

    #[test]
    fn test_merge_combines_strategies_and_caps() {
        let page = record("a", &["Acappella DB Credentials"]);
        let title = SearchHit::new(page.clone(), 0.8, Strategy::TitlePath, "title matches: acappella");
        let content = SearchHit::new(page.clone(), 1.1, Strategy::Content, "content")
            .with_preview(Some("...password...".into()));
        let api = SearchHit::new(page, 1.0, Strategy::Api, "remote keyword match");

        let merged = merge_hits(vec![vec![title], vec![content], vec![api]], 2.0, 10);
        assert_eq!(merged.len(), 1);
        let hit = &merged[0];
        assert_eq!(hit.score, 2.0);
        assert_eq!(
            hit.strategies,
            vec![Strategy::Api, Strategy::TitlePath, Strategy::Content]
        );
        assert_eq!(hit.match_reasons.len(), 3);
        assert_eq!(hit.preview.as_deref(), Some("...password..."));
    }

    #[test]
    fn test_merged_score_at_least_each_part() {
        let page = record("a", &["Doc"]);
        let t = SearchHit::new(page.clone(), 0.4, Strategy::TitlePath, "t");
        let c = SearchHit::new(page, 0.3, Strategy::Content, "c");
        let merged = merge_hits(vec![vec![t], vec![c]], 2.0, 10);
        assert!(merged[0].score >= 0.4);
        assert!(merged[0].score >= 0.3);
    }

    #[test]
    fn test_merge_prefers_record_with_path() {
        let mut bare = record("a", &[]);
        bare.title = "Doc".into();
        let full = record("a", &["Root", "Doc"]);
        let merged = merge_hits(
            vec![
                vec![SearchHit::new(bare, 1.0, Strategy::Api, "api")],
                vec![SearchHit::new(full, 0.5, Strategy::TitlePath, "title")],
            ],
            2.0,
            10,
        );
        assert_eq!(merged[0].page.display_path(), "Root > Doc");
    }

    #[test]
    fn test_merge_tie_break_order() {
        let deep = SearchHit::new(record("z", &["A", "Same"]), 0.5, Strategy::TitlePath, "t");
        let shallow_b = SearchHit::new(record("y", &["Beta"]), 0.5, Strategy::TitlePath, "t");
        let shallow_a = SearchHit::new(record("x", &["Alpha"]), 0.5, Strategy::TitlePath, "t");
        let top = SearchHit::new(record("w", &["A", "B", "Top"]), 0.9, Strategy::TitlePath, "t");

        let merged = merge_hits(vec![vec![deep, shallow_b, shallow_a, top]], 2.0, 3);
        let ids: Vec<&str> = merged.iter().map(|h| h.page.id.as_str()).collect();
        assert_eq!(ids, vec!["w", "x", "y"]);
    }
}
