//! Result presentation.
//!
//! Turns ranked [`SearchHit`]s into [`PresentedHit`]s (serializable, for
//! JSON tool output) and into a plain-text listing for the CLI.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::{SearchHit, Strategy};

#[derive(Debug, Clone, Serialize)]
pub struct PresentedHit {
    /// 1-based.
    pub rank: usize,
    pub title: String,
    pub path: String,
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub is_database: bool,
    /// Rounded to two decimals.
    pub score: f64,
    /// Score as a percentage of the top hit's score.
    pub relative_score: u32,
    pub strategies: Vec<Strategy>,
    pub match_reasons: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_edited: Option<DateTime<Utc>>,
}

pub fn present(hits: &[SearchHit]) -> Vec<PresentedHit> {
    let top = hits.iter().map(|h| h.score).fold(0.0_f64, f64::max);

    hits.iter()
        .enumerate()
        .map(|(i, hit)| PresentedHit {
            rank: i + 1,
            title: hit.page.title.clone(),
            path: hit.page.display_path(),
            id: hit.page.id.clone(),
            url: hit.page.url.clone(),
            is_database: hit.page.is_database,
            score: (hit.score * 100.0).round() / 100.0,
            relative_score: if top > 0.0 {
                (hit.score / top * 100.0).round() as u32
            } else {
                0
            },
            strategies: hit.strategies.clone(),
            match_reasons: hit.match_reasons.clone(),
            preview: hit.preview.clone(),
            last_edited: hit.page.last_edited,
        })
        .collect()
}

/// Plain-text listing, one numbered entry per hit.
pub fn render_text(query: &str, hits: &[PresentedHit]) -> String {
    if hits.is_empty() {
        return format!("No results for '{}'.", query);
    }

    let mut out = format!("Found {} result(s) for '{}':\n", hits.len(), query);
    for hit in hits {
        let strategies = hit
            .strategies
            .iter()
            .map(|s| s.to_string())
            .collect::<Vec<_>>()
            .join("+");
        out.push_str(&format!(
            "\n{}. {} [{}] score {:.2} ({}%)\n",
            hit.rank, hit.title, strategies, hit.score, hit.relative_score
        ));
        out.push_str(&format!("   path: {}\n", hit.path));
        out.push_str(&format!("   id:   {}\n", hit.id));
        if let Some(url) = &hit.url {
            out.push_str(&format!("   url:  {}\n", url));
        }
        if !hit.match_reasons.is_empty() {
            out.push_str(&format!("   why:  {}\n", hit.match_reasons.join("; ")));
        }
        if let Some(preview) = &hit.preview {
            out.push_str(&format!("   > {}\n", preview));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PageRecord;

    fn hit(id: &str, score: f64, strategy: Strategy) -> SearchHit {
        let page = PageRecord {
            id: id.to_string(),
            title: format!("Title {}", id),
            parent_id: None,
            archived: false,
            is_database: false,
            url: Some(format!("https://www.notion.so/{}", id)),
            created: None,
            last_edited: None,
            path: vec!["Root".into(), format!("Title {}", id)],
        };
        SearchHit::new(page, score, strategy, "reason")
    }

    #[test]
    fn test_rank_rounding_and_relative() {
        let presented = present(&[
            hit("a", 1.8333, Strategy::TitlePath),
            hit("b", 0.9167, Strategy::Api),
        ]);
        assert_eq!(presented[0].rank, 1);
        assert_eq!(presented[0].score, 1.83);
        assert_eq!(presented[0].relative_score, 100);
        assert_eq!(presented[1].relative_score, 50);
        assert_eq!(presented[1].path, "Root > Title b");
    }

    #[test]
    fn test_json_shape() {
        let presented = present(&[hit("a", 1.0, Strategy::Content)]);
        let json = serde_json::to_value(&presented).unwrap();
        assert_eq!(json[0]["strategies"][0], "content");
        assert!(json[0].get("preview").is_none());
    }

    #[test]
    fn test_render_text() {
        let mut h = hit("a", 1.0, Strategy::Api);
        h.preview = Some("...snippet...".into());
        let text = render_text("q", &present(&[h]));
        assert!(text.starts_with("Found 1 result(s) for 'q':"));
        assert!(text.contains("1. Title a [api] score 1.00 (100%)"));
        assert!(text.contains("> ...snippet..."));
        assert_eq!(render_text("q", &[]), "No results for 'q'.");
    }
}
