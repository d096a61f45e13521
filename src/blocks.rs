//! Page content blocks.
//!
//! Notion returns page content as a list of typed blocks, each carrying a
//! `rich_text` array under a key named after its type. [`ContentBlock`]
//! keeps the handful of kinds we render and collapses everything else with
//! text into [`ContentBlock::Other`].
//!
//! Conversions:
//!
//! | Function | Direction |
//! |----------|-----------|
//! | [`ContentBlock::from_json`] | remote block → typed block |
//! | [`to_markdown`] | blocks → markdown (ask answers) |
//! | [`to_plain_text`] | blocks → flat text (content scan) |
//! | [`from_markdown`] | markdown → blocks (writes) |
//! | [`ContentBlock::to_json`] | typed block → remote block body |

use serde_json::{json, Value};

use crate::models::RichText;

#[derive(Debug, Clone, PartialEq)]
pub enum ContentBlock {
    Paragraph(String),
    Heading { level: u8, text: String },
    Bulleted(String),
    Numbered(String),
    ToDo { checked: bool, text: String },
    Code { language: String, text: String },
    Quote(String),
    /// Any other block kind that carries rich text.
    Other(String),
}

fn rich_text_of(data: &Value) -> String {
    data.get("rich_text")
        .and_then(|rt| serde_json::from_value::<Vec<RichText>>(rt.clone()).ok())
        .map(|runs| runs.iter().map(|r| r.plain_text.as_str()).collect())
        .unwrap_or_default()
}

fn rich_text_json(text: &str) -> Value {
    json!([{ "type": "text", "text": { "content": text } }])
}

impl ContentBlock {
    /// Parse one remote block. Blocks without text (dividers, images, ...)
    /// yield `None`.
    pub fn from_json(block: &Value) -> Option<Self> {
        let kind = block.get("type")?.as_str()?;
        let data = block.get(kind)?;
        let text = rich_text_of(data);

        let parsed = match kind {
            "paragraph" => ContentBlock::Paragraph(text),
            "heading_1" => ContentBlock::Heading { level: 1, text },
            "heading_2" => ContentBlock::Heading { level: 2, text },
            "heading_3" => ContentBlock::Heading { level: 3, text },
            "bulleted_list_item" => ContentBlock::Bulleted(text),
            "numbered_list_item" => ContentBlock::Numbered(text),
            "to_do" => ContentBlock::ToDo {
                checked: data.get("checked").and_then(|c| c.as_bool()).unwrap_or(false),
                text,
            },
            "code" => ContentBlock::Code {
                language: data
                    .get("language")
                    .and_then(|l| l.as_str())
                    .unwrap_or("")
                    .to_string(),
                text,
            },
            "quote" => ContentBlock::Quote(text),
            _ if data.get("rich_text").is_some() => ContentBlock::Other(text),
            _ => return None,
        };
        Some(parsed)
    }

    pub fn text(&self) -> &str {
        match self {
            ContentBlock::Paragraph(t)
            | ContentBlock::Bulleted(t)
            | ContentBlock::Numbered(t)
            | ContentBlock::Quote(t)
            | ContentBlock::Other(t) => t,
            ContentBlock::Heading { text, .. }
            | ContentBlock::ToDo { text, .. }
            | ContentBlock::Code { text, .. } => text,
        }
    }

    /// Render as one markdown line (or fenced block for code).
    pub fn to_markdown(&self) -> String {
        match self {
            ContentBlock::Paragraph(t) | ContentBlock::Other(t) => t.clone(),
            ContentBlock::Heading { level, text } => {
                format!("{} {}", "#".repeat(*level as usize), text)
            }
            ContentBlock::Bulleted(t) => format!("- {}", t),
            ContentBlock::Numbered(t) => format!("1. {}", t),
            ContentBlock::ToDo { checked, text } => {
                format!("- [{}] {}", if *checked { "x" } else { " " }, text)
            }
            ContentBlock::Code { language, text } => format!("```{}\n{}\n```", language, text),
            ContentBlock::Quote(t) => format!("> {}", t),
        }
    }

    /// Request body for appending this block to a page.
    pub fn to_json(&self) -> Value {
        let (kind, mut data) = match self {
            ContentBlock::Paragraph(_) | ContentBlock::Other(_) => ("paragraph", json!({})),
            ContentBlock::Heading { level, .. } => match level {
                1 => ("heading_1", json!({})),
                2 => ("heading_2", json!({})),
                _ => ("heading_3", json!({})),
            },
            ContentBlock::Bulleted(_) => ("bulleted_list_item", json!({})),
            ContentBlock::Numbered(_) => ("numbered_list_item", json!({})),
            ContentBlock::ToDo { checked, .. } => ("to_do", json!({ "checked": checked })),
            ContentBlock::Code { language, .. } => {
                let lang = if language.is_empty() {
                    "plain text"
                } else {
                    language.as_str()
                };
                ("code", json!({ "language": lang }))
            }
            ContentBlock::Quote(_) => ("quote", json!({})),
        };
        data["rich_text"] = rich_text_json(self.text());
        let mut body = json!({ "object": "block", "type": kind });
        body[kind] = data;
        body
    }
}

/// Render blocks as markdown, one block per line, skipping empty ones.
pub fn to_markdown(blocks: &[ContentBlock]) -> String {
    blocks
        .iter()
        .filter(|b| !b.text().trim().is_empty())
        .map(|b| b.to_markdown().trim().to_string())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Flatten blocks into space-separated text for scanning.
pub fn to_plain_text(blocks: &[ContentBlock]) -> String {
    blocks
        .iter()
        .map(|b| b.text().trim())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Convert markdown into blocks.
///
/// Supports headings (`#`..`###`), bulleted items (`-`, `*`, `•`), to-dos
/// (`- [ ]`, `- [x]`), numbered items (`1.`), quotes (`>`), fenced code
/// with a language tag, and paragraphs. Consecutive plain lines join into
/// one paragraph; a blank line ends it.
pub fn from_markdown(markdown: &str) -> Vec<ContentBlock> {
    let mut blocks = Vec::new();
    let mut paragraph: Vec<&str> = Vec::new();
    let mut lines = markdown.lines();

    fn flush(paragraph: &mut Vec<&str>, blocks: &mut Vec<ContentBlock>) {
        if !paragraph.is_empty() {
            blocks.push(ContentBlock::Paragraph(paragraph.join(" ")));
            paragraph.clear();
        }
    }

    while let Some(raw) = lines.next() {
        let line = raw.trim_end();
        let trimmed = line.trim_start();

        if let Some(language) = trimmed.strip_prefix("```") {
            flush(&mut paragraph, &mut blocks);
            let mut code = Vec::new();
            for code_line in lines.by_ref() {
                if code_line.trim_start().starts_with("```") {
                    break;
                }
                code.push(code_line);
            }
            blocks.push(ContentBlock::Code {
                language: language.trim().to_string(),
                text: code.join("\n"),
            });
            continue;
        }

        if trimmed.is_empty() {
            flush(&mut paragraph, &mut blocks);
            continue;
        }

        let block = if let Some(rest) = trimmed.strip_prefix("### ") {
            Some(ContentBlock::Heading { level: 3, text: rest.trim().to_string() })
        } else if let Some(rest) = trimmed.strip_prefix("## ") {
            Some(ContentBlock::Heading { level: 2, text: rest.trim().to_string() })
        } else if let Some(rest) = trimmed.strip_prefix("# ") {
            Some(ContentBlock::Heading { level: 1, text: rest.trim().to_string() })
        } else if let Some(rest) = strip_todo(trimmed) {
            Some(rest)
        } else if let Some(rest) = ["- ", "* ", "• "]
            .iter()
            .find_map(|marker| trimmed.strip_prefix(marker))
        {
            Some(ContentBlock::Bulleted(rest.trim().to_string()))
        } else if let Some(rest) = strip_number_marker(trimmed) {
            Some(ContentBlock::Numbered(rest.trim().to_string()))
        } else if let Some(rest) = trimmed.strip_prefix('>') {
            Some(ContentBlock::Quote(rest.trim().to_string()))
        } else {
            None
        };

        match block {
            Some(b) => {
                flush(&mut paragraph, &mut blocks);
                blocks.push(b);
            }
            None => paragraph.push(trimmed),
        }
    }
    flush(&mut paragraph, &mut blocks);

    blocks
}

fn strip_todo(line: &str) -> Option<ContentBlock> {
    let rest = line.strip_prefix("- [").or_else(|| line.strip_prefix("* ["))?;
    let (mark, text) = rest.split_once(']')?;
    let checked = match mark {
        " " | "" => false,
        "x" | "X" => true,
        _ => return None,
    };
    Some(ContentBlock::ToDo {
        checked,
        text: text.trim().to_string(),
    })
}

fn strip_number_marker(line: &str) -> Option<&str> {
    let digits = line.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits == 0 {
        return None;
    }
    line[digits..].strip_prefix(". ")
}

/// Title property payload for page create/update requests.
pub fn title_property(title: &str) -> Value {
    json!({ "title": rich_text_json(title) })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_json_known_kinds() {
        let block = json!({
            "type": "to_do",
            "to_do": { "checked": true, "rich_text": [{ "plain_text": "ship it" }] }
        });
        assert_eq!(
            ContentBlock::from_json(&block),
            Some(ContentBlock::ToDo { checked: true, text: "ship it".into() })
        );

        let code = json!({
            "type": "code",
            "code": { "language": "rust", "rich_text": [{ "plain_text": "fn main() {}" }] }
        });
        assert_eq!(
            ContentBlock::from_json(&code).unwrap().to_markdown(),
            "```rust\nfn main() {}\n```"
        );
    }

    #[test]
    fn test_from_json_textless_block_skipped() {
        let divider = json!({ "type": "divider", "divider": {} });
        assert_eq!(ContentBlock::from_json(&divider), None);

        let callout = json!({
            "type": "callout",
            "callout": { "rich_text": [{ "plain_text": "heads up" }] }
        });
        assert_eq!(
            ContentBlock::from_json(&callout),
            Some(ContentBlock::Other("heads up".into()))
        );
    }

    #[test]
    fn test_plain_text_skips_empty() {
        let blocks = vec![
            ContentBlock::Paragraph("  first ".into()),
            ContentBlock::Paragraph(String::new()),
            ContentBlock::Heading { level: 2, text: "second".into() },
        ];
        assert_eq!(to_plain_text(&blocks), "first second");
    }

    #[test]
    fn test_from_markdown_block_kinds() {
        let md = "# Title\n\nSome intro\ncontinues here.\n\n- item one\n* item two\n1. first\n- [x] done\n- [ ] todo\n> quoted\n\n```sql\nSELECT 1;\n```\n";
        let blocks = from_markdown(md);
        assert_eq!(
            blocks,
            vec![
                ContentBlock::Heading { level: 1, text: "Title".into() },
                ContentBlock::Paragraph("Some intro continues here.".into()),
                ContentBlock::Bulleted("item one".into()),
                ContentBlock::Bulleted("item two".into()),
                ContentBlock::Numbered("first".into()),
                ContentBlock::ToDo { checked: true, text: "done".into() },
                ContentBlock::ToDo { checked: false, text: "todo".into() },
                ContentBlock::Quote("quoted".into()),
                ContentBlock::Code { language: "sql".into(), text: "SELECT 1;".into() },
            ]
        );
    }

    #[test]
    fn test_markdown_round_trip_preserves_kinds() {
        let md = "## Setup\n- install\n1. run\n> note";
        let blocks = from_markdown(md);
        assert_eq!(from_markdown(&to_markdown(&blocks)), blocks);
    }

    #[test]
    fn test_to_json_shape() {
        let body = ContentBlock::Heading { level: 2, text: "Hi".into() }.to_json();
        assert_eq!(body["type"], "heading_2");
        assert_eq!(body["heading_2"]["rich_text"][0]["text"]["content"], "Hi");

        let code = ContentBlock::Code { language: String::new(), text: "x".into() }.to_json();
        assert_eq!(code["code"]["language"], "plain text");
    }
}
