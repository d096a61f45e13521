//! Natural-language answers with source citations.
//!
//! [`ask`] runs a search, expands the top hits into their full markdown
//! content, and composes one answer text followed by a source list.

use serde::Serialize;

use crate::blocks;
use crate::error::HarnessError;
use crate::models::SearchHit;
use crate::remote::Workspace;
use crate::search::SearchEngine;

/// Upper bound for `max_content_pages`.
pub const MAX_CONTENT_PAGES: usize = 10;

#[derive(Debug, Clone, Serialize)]
pub struct AskAnswer {
    pub answer: String,
    pub sources: Vec<Citation>,
    /// Number of hits the search returned, expanded or not.
    pub total_matches: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct Citation {
    pub title: String,
    pub path: String,
    pub id: String,
    pub url: String,
}

impl Citation {
    fn from_hit(hit: &SearchHit) -> Self {
        let url = hit
            .page
            .url
            .clone()
            .unwrap_or_else(|| format!("https://www.notion.so/{}", hit.page.id.replace('-', "")));
        Self {
            title: hit.page.title.clone(),
            path: hit.page.display_path(),
            id: hit.page.id.clone(),
            url,
        }
    }
}

/// Answer `question` from the workspace.
///
/// `max_content_pages` is clamped to `1..=10`. Pages whose content cannot
/// be fetched, or is empty, are skipped.
pub async fn ask(
    engine: &SearchEngine,
    workspace: &dyn Workspace,
    question: &str,
    max_content_pages: usize,
    use_enhanced: bool,
) -> Result<AskAnswer, HarnessError> {
    let question = question.trim();
    if question.is_empty() {
        return Err(HarnessError::InvalidInput("question must not be empty".to_string()));
    }
    let pages = max_content_pages.clamp(1, MAX_CONTENT_PAGES);

    let hits = engine
        .search(question, (2 * pages).max(10), use_enhanced)
        .await?;
    if hits.is_empty() {
        return Ok(AskAnswer {
            answer: format!(
                "No relevant information found in your Notion workspace for: '{}'",
                question
            ),
            sources: Vec::new(),
            total_matches: 0,
        });
    }

    let mut sections = Vec::new();
    let mut sources = Vec::new();
    for hit in hits.iter().take(pages) {
        let content = match workspace.get_content(&hit.page.id).await {
            Ok(content) => blocks::to_markdown(&content),
            Err(e) => {
                tracing::warn!(page_id = %hit.page.id, error = %e, "skipping page in answer");
                continue;
            }
        };
        if content.trim().is_empty() {
            tracing::debug!(page_id = %hit.page.id, "page has no readable content");
            continue;
        }
        sections.push(format!("## From: {}\n\n{}", hit.page.display_path(), content.trim()));
        sources.push(Citation::from_hit(hit));
    }

    if sections.is_empty() {
        return Ok(AskAnswer {
            answer: format!(
                "Found {} matching pages, but couldn't retrieve readable content from them for: '{}'",
                hits.len(),
                question
            ),
            sources: Vec::new(),
            total_matches: hits.len(),
        });
    }

    let mut answer = format!(
        "Based on your Notion workspace, here's what I found regarding: **{}**\n\n{}",
        question,
        sections.join("\n\n---\n\n")
    );
    answer.push_str("\n\n## Sources\n\n");
    answer.push_str(
        &sources
            .iter()
            .map(|s| format!("- [{}]({})", s.path, s.url))
            .collect::<Vec<_>>()
            .join("\n"),
    );
    if hits.len() > pages {
        answer.push_str(&format!(
            "\n\n*Note: Found {} matching pages. Showing detailed content from the top {}; {} more also matched.*",
            hits.len(),
            pages,
            hits.len() - pages
        ));
    }

    Ok(AskAnswer {
        answer,
        sources,
        total_matches: hits.len(),
    })
}
