//! Document structure extraction.
//!
//! Turns raw file bytes into an ordered list of typed [`DocElement`]s
//! with heading levels. The trait is the seam the orchestrator calls
//! through, so tests can substitute a canned extractor.
//!
//! Classification rules (deterministic, no per-document heuristics):
//!
//! - **Markdown** — ATX headings (`#` through `######`) become heading
//!   elements at their marker depth; fenced code blocks become code
//!   elements; everything else accumulates into blank-line-separated
//!   paragraphs. Setext headings are not recognized.
//! - **PDF** — text is pulled with `pdf-extract`, then split into
//!   blank-line-separated blocks. A single-line block matching a
//!   numbered-section pattern (`1 Intro`, `2.3 Setup`, `4.1.2 Notes`)
//!   becomes a heading whose level is the number of dot-separated
//!   components; all other blocks are paragraphs.
//! - **Plain text** — paragraphs only; the hierarchy builder wraps them
//!   in a single root.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::time::Duration;

use crate::models::{DocElement, FileType};

/// Longest line still considered a candidate PDF heading.
const PDF_HEADING_MAX_CHARS: usize = 120;

#[async_trait]
pub trait StructureExtractor: Send + Sync {
    async fn extract(&self, bytes: &[u8], file_type: FileType) -> Result<Vec<DocElement>>;
}

/// Built-in extractor for the supported upload types. PDF extraction is
/// CPU-bound and runs on the blocking pool under a bounded timeout; a
/// timeout is a step failure, never left open.
pub struct BuiltinExtractor {
    timeout: Duration,
}

impl BuiltinExtractor {
    pub fn new(timeout_secs: u64) -> Self {
        Self {
            timeout: Duration::from_secs(timeout_secs),
        }
    }
}

#[async_trait]
impl StructureExtractor for BuiltinExtractor {
    async fn extract(&self, bytes: &[u8], file_type: FileType) -> Result<Vec<DocElement>> {
        match file_type {
            FileType::Markdown => {
                let text = std::str::from_utf8(bytes).context("markdown is not valid UTF-8")?;
                Ok(parse_markdown(text))
            }
            FileType::Txt => {
                let text = String::from_utf8_lossy(bytes);
                Ok(parse_plain_text(&text))
            }
            FileType::Pdf => {
                let owned = bytes.to_vec();
                let handle = tokio::task::spawn_blocking(move || {
                    pdf_extract::extract_text_from_mem(&owned)
                        .map_err(|e| anyhow!("PDF extraction failed: {}", e))
                });
                let text = tokio::time::timeout(self.timeout, handle)
                    .await
                    .map_err(|_| anyhow!("PDF extraction timed out"))?
                    .context("PDF extraction task panicked")??;
                Ok(parse_pdf_text(&text))
            }
        }
    }
}

/// Markdown classification: ATX headings, fenced code blocks, paragraphs.
pub fn parse_markdown(text: &str) -> Vec<DocElement> {
    let mut elements = Vec::new();
    let mut paragraph: Vec<&str> = Vec::new();
    let mut code: Vec<&str> = Vec::new();
    let mut in_code = false;

    let flush_paragraph = |buf: &mut Vec<&str>, out: &mut Vec<DocElement>| {
        if !buf.is_empty() {
            out.push(DocElement::paragraph(buf.join("\n")));
            buf.clear();
        }
    };

    for line in text.lines() {
        let trimmed = line.trim_end();

        if trimmed.trim_start().starts_with("```") {
            if in_code {
                elements.push(DocElement::code(code.join("\n")));
                code.clear();
                in_code = false;
            } else {
                flush_paragraph(&mut paragraph, &mut elements);
                in_code = true;
            }
            continue;
        }

        if in_code {
            code.push(line);
            continue;
        }

        if let Some((level, title)) = parse_atx_heading(trimmed) {
            flush_paragraph(&mut paragraph, &mut elements);
            elements.push(DocElement::heading(level, title));
            continue;
        }

        if trimmed.trim().is_empty() {
            flush_paragraph(&mut paragraph, &mut elements);
        } else {
            paragraph.push(trimmed);
        }
    }

    // Unterminated fence: keep the content rather than dropping it.
    if in_code && !code.is_empty() {
        elements.push(DocElement::code(code.join("\n")));
    }
    flush_paragraph(&mut paragraph, &mut elements);

    elements
}

fn parse_atx_heading(line: &str) -> Option<(u32, &str)> {
    let hashes = line.chars().take_while(|c| *c == '#').count();
    if hashes == 0 || hashes > 6 {
        return None;
    }
    let rest = &line[hashes..];
    if !rest.starts_with(' ') {
        return None;
    }
    let title = rest.trim().trim_end_matches('#').trim();
    if title.is_empty() {
        return None;
    }
    Some((hashes as u32, title))
}

pub fn parse_plain_text(text: &str) -> Vec<DocElement> {
    blocks(text)
        .into_iter()
        .map(DocElement::paragraph)
        .collect()
}

/// PDF classification over extracted text: numbered single-line blocks
/// are headings, everything else is a paragraph.
pub fn parse_pdf_text(text: &str) -> Vec<DocElement> {
    blocks(text)
        .into_iter()
        .map(|block| match parse_numbered_heading(&block) {
            Some((level, title)) => DocElement::heading(level, title),
            None => DocElement::paragraph(block),
        })
        .collect()
}

/// Split text into blank-line-separated blocks, trimmed, blanks dropped.
fn blocks(text: &str) -> Vec<String> {
    text.split("\n\n")
        .map(|b| b.trim())
        .filter(|b| !b.is_empty())
        .map(|b| b.to_string())
        .collect()
}

/// Match `N`, `N.N`, `N.N.N`... followed by an optional `.` or `)` and a
/// title, on a single short line. Returns (level, title).
fn parse_numbered_heading(block: &str) -> Option<(u32, String)> {
    if block.contains('\n') || block.chars().count() > PDF_HEADING_MAX_CHARS {
        return None;
    }

    let (number_part, rest) = block.split_once(char::is_whitespace)?;
    let number_part = number_part
        .trim_end_matches('.')
        .trim_end_matches(')');
    if number_part.is_empty() {
        return None;
    }

    let components: Vec<&str> = number_part.split('.').collect();
    if !components
        .iter()
        .all(|c| !c.is_empty() && c.chars().all(|ch| ch.is_ascii_digit()))
    {
        return None;
    }

    let title = rest.trim();
    if title.is_empty() {
        return None;
    }

    Some((components.len() as u32, title.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ElementType;

    #[test]
    fn markdown_headings_and_paragraphs() {
        let md = "# Intro\n\nFirst body.\n\n## Detail\n\nSecond body.";
        let elements = parse_markdown(md);
        assert_eq!(elements.len(), 4);
        assert_eq!(elements[0].element_type, ElementType::Heading);
        assert_eq!(elements[0].level, 1);
        assert_eq!(elements[0].text, "Intro");
        assert_eq!(elements[1].element_type, ElementType::Paragraph);
        assert_eq!(elements[2].level, 2);
        assert_eq!(elements[3].text, "Second body.");
    }

    #[test]
    fn markdown_without_headings_is_all_paragraphs() {
        let md = "Just prose.\n\nMore prose.";
        let elements = parse_markdown(md);
        assert_eq!(elements.len(), 2);
        assert!(elements.iter().all(|e| e.element_type == ElementType::Paragraph));
    }

    #[test]
    fn markdown_fenced_code_is_one_code_element() {
        let md = "# API\n\n```\nfn main() {}\nlet x = 1;\n```\n\nAfter.";
        let elements = parse_markdown(md);
        assert_eq!(elements[1].element_type, ElementType::Code);
        assert!(elements[1].text.contains("fn main() {}"));
        assert!(elements[1].text.contains("let x = 1;"));
        assert_eq!(elements[2].text, "After.");
    }

    #[test]
    fn hash_inside_code_fence_is_not_a_heading() {
        let md = "```\n# not a heading\n```";
        let elements = parse_markdown(md);
        assert_eq!(elements.len(), 1);
        assert_eq!(elements[0].element_type, ElementType::Code);
    }

    #[test]
    fn atx_requires_space_after_hashes() {
        assert!(parse_atx_heading("#Intro").is_none());
        assert_eq!(parse_atx_heading("# Intro"), Some((1, "Intro")));
        assert_eq!(parse_atx_heading("### Deep ###"), Some((3, "Deep")));
        assert!(parse_atx_heading("####### Too deep").is_none());
    }

    #[test]
    fn multi_line_paragraph_stays_together() {
        let md = "line one\nline two\n\nnext paragraph";
        let elements = parse_markdown(md);
        assert_eq!(elements.len(), 2);
        assert_eq!(elements[0].text, "line one\nline two");
    }

    #[test]
    fn plain_text_is_paragraphs_only() {
        let elements = parse_plain_text("alpha\n\nbeta\n\n\n\ngamma");
        assert_eq!(elements.len(), 3);
        assert!(elements.iter().all(|e| e.element_type == ElementType::Paragraph));
    }

    #[test]
    fn pdf_numbered_headings_detected() {
        let text = "1 Introduction\n\nBody text here.\n\n2.3 Setup\n\nMore body.";
        let elements = parse_pdf_text(text);
        assert_eq!(elements[0].element_type, ElementType::Heading);
        assert_eq!(elements[0].level, 1);
        assert_eq!(elements[0].text, "Introduction");
        assert_eq!(elements[2].level, 2);
        assert_eq!(elements[2].text, "Setup");
    }

    #[test]
    fn pdf_numbered_heading_variants() {
        assert_eq!(
            parse_numbered_heading("4.1.2 Notes"),
            Some((3, "Notes".to_string()))
        );
        assert_eq!(
            parse_numbered_heading("2. Overview"),
            Some((1, "Overview".to_string()))
        );
        assert_eq!(
            parse_numbered_heading("3) Appendix"),
            Some((1, "Appendix".to_string()))
        );
        assert!(parse_numbered_heading("Introduction").is_none());
        assert!(parse_numbered_heading("1.x Bad").is_none());
        assert!(parse_numbered_heading("12").is_none());
    }

    #[test]
    fn pdf_multiline_block_is_never_a_heading() {
        let text = "1 Looks like a heading\nbut continues here.";
        let elements = parse_pdf_text(text);
        assert_eq!(elements.len(), 1);
        assert_eq!(elements[0].element_type, ElementType::Paragraph);
    }

    #[tokio::test]
    async fn builtin_extractor_rejects_invalid_markdown_utf8() {
        let extractor = BuiltinExtractor::new(5);
        let err = extractor
            .extract(&[0xff, 0xfe, 0xfd], FileType::Markdown)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("UTF-8"));
    }

    #[tokio::test]
    async fn builtin_extractor_rejects_invalid_pdf() {
        let extractor = BuiltinExtractor::new(5);
        let err = extractor
            .extract(b"not a pdf", FileType::Pdf)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("PDF"));
    }
}
