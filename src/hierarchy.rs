//! Chunk hierarchy builder.
//!
//! Walks the ordered element list from the structure extractor and
//! produces a forest mirroring the document's heading structure. A
//! heading of source level L closes all open ancestors at level >= L and
//! opens a new chunk under the remaining stack top; content elements
//! become leaf chunks under the deepest open ancestor. Heading-level
//! jumps (e.g. 1 straight to 3) attach as direct children — missing
//! intermediate levels are never synthesized. A document with no
//! headings at all collapses to a single root chunk wrapping all content.
//!
//! Hierarchy levels count from the root (root = 1, child = parent + 1)
//! and are independent of the extractor's raw heading levels, which only
//! drive the stack. Sibling sequence numbers start at 1 and increase in
//! reading order, scoped to the immediate parent (to the document, for
//! roots).

use uuid::Uuid;

use crate::models::{DocElement, ElementType};

/// Maximum characters of content promoted into a leaf chunk's title.
const LEAF_TITLE_MAX_CHARS: usize = 80;

/// One node of the built forest, in document order (parents always
/// precede their children). Carries both the structural row and the
/// index-side payload.
#[derive(Debug, Clone)]
pub struct ChunkNode {
    pub id: String,
    pub parent_id: Option<String>,
    pub title: String,
    pub element_type: ElementType,
    /// Hierarchy depth, root = 1.
    pub level: u32,
    /// Position among siblings under the same parent, starting at 1.
    pub seq: u32,
    pub text: String,
    /// Ordered titles from the root down to this chunk (inclusive).
    pub breadcrumb: Vec<String>,
}

/// Open ancestor on the builder stack.
struct OpenHeading {
    node_index: usize,
    /// The extractor's raw heading level, used only for popping.
    source_level: u32,
}

/// Build the chunk forest for one document.
///
/// `fallback_title` (normally the filename) titles the synthetic root
/// used when the document has no headings.
pub fn build_forest(elements: &[DocElement], fallback_title: &str) -> Vec<ChunkNode> {
    let has_headings = elements.iter().any(|e| e.element_type.is_heading());

    if !has_headings {
        return vec![single_root(elements, fallback_title)];
    }

    let mut nodes: Vec<ChunkNode> = Vec::new();
    let mut stack: Vec<OpenHeading> = Vec::new();
    // Sequence counters keyed by parent id ("" for document roots).
    let mut seq: std::collections::HashMap<String, u32> = std::collections::HashMap::new();

    for element in elements {
        if element.element_type.is_heading() {
            while stack
                .last()
                .is_some_and(|open| open.source_level >= element.level)
            {
                stack.pop();
            }

            let (parent_id, level, mut breadcrumb) = match stack.last() {
                Some(open) => {
                    let parent = &nodes[open.node_index];
                    (
                        Some(parent.id.clone()),
                        parent.level + 1,
                        parent.breadcrumb.clone(),
                    )
                }
                None => (None, 1, Vec::new()),
            };

            let title = element.text.trim().to_string();
            breadcrumb.push(title.clone());
            let next_seq = next_seq(&mut seq, parent_id.as_deref());

            nodes.push(ChunkNode {
                id: Uuid::new_v4().to_string(),
                parent_id,
                title: title.clone(),
                element_type: ElementType::Heading,
                level,
                seq: next_seq,
                text: title,
                breadcrumb,
            });
            stack.push(OpenHeading {
                node_index: nodes.len() - 1,
                source_level: element.level,
            });
        } else {
            let text = element.text.trim();
            if text.is_empty() {
                continue;
            }

            let (parent_id, level, mut breadcrumb) = match stack.last() {
                Some(open) => {
                    let parent = &nodes[open.node_index];
                    (
                        Some(parent.id.clone()),
                        parent.level + 1,
                        parent.breadcrumb.clone(),
                    )
                }
                None => (None, 1, Vec::new()),
            };

            let title = leaf_title(text);
            breadcrumb.push(title.clone());
            let next_seq = next_seq(&mut seq, parent_id.as_deref());

            nodes.push(ChunkNode {
                id: Uuid::new_v4().to_string(),
                parent_id,
                title,
                element_type: element.element_type,
                level,
                seq: next_seq,
                text: text.to_string(),
                breadcrumb,
            });
        }
    }

    // Headings with nothing under them still exist, but a document that
    // produced zero nodes (all-blank content) needs its single root.
    if nodes.is_empty() {
        return vec![single_root(elements, fallback_title)];
    }

    nodes
}

fn single_root(elements: &[DocElement], fallback_title: &str) -> ChunkNode {
    let text = elements
        .iter()
        .map(|e| e.text.trim())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n");

    ChunkNode {
        id: Uuid::new_v4().to_string(),
        parent_id: None,
        title: fallback_title.to_string(),
        element_type: ElementType::Paragraph,
        level: 1,
        seq: 1,
        text,
        breadcrumb: vec![fallback_title.to_string()],
    }
}

fn next_seq(seq: &mut std::collections::HashMap<String, u32>, parent_id: Option<&str>) -> u32 {
    let counter = seq.entry(parent_id.unwrap_or("").to_string()).or_insert(0);
    *counter += 1;
    *counter
}

/// First line of a content element, truncated on a char boundary.
fn leaf_title(text: &str) -> String {
    let first_line = text.lines().next().unwrap_or("").trim();
    if first_line.chars().count() <= LEAF_TITLE_MAX_CHARS {
        first_line.to_string()
    } else {
        first_line.chars().take(LEAF_TITLE_MAX_CHARS).collect()
    }
}

/// Check the structural invariants of a built forest: levels increase by
/// exactly one from parent to child (roots at 1), and sibling sequence
/// numbers are unique and strictly increasing in document order.
pub fn validate_forest(nodes: &[ChunkNode]) -> anyhow::Result<()> {
    let by_id: std::collections::HashMap<&str, &ChunkNode> =
        nodes.iter().map(|n| (n.id.as_str(), n)).collect();
    let mut last_seq: std::collections::HashMap<String, u32> = std::collections::HashMap::new();

    for node in nodes {
        match &node.parent_id {
            None => {
                if node.level != 1 {
                    anyhow::bail!("root chunk {} has level {}, expected 1", node.id, node.level);
                }
            }
            Some(pid) => {
                let parent = by_id
                    .get(pid.as_str())
                    .ok_or_else(|| anyhow::anyhow!("chunk {} references unknown parent", node.id))?;
                if node.level != parent.level + 1 {
                    anyhow::bail!(
                        "chunk {} has level {}, expected parent level {} + 1",
                        node.id,
                        node.level,
                        parent.level
                    );
                }
            }
        }

        let key = node.parent_id.clone().unwrap_or_default();
        let prev = last_seq.get(&key).copied().unwrap_or(0);
        if node.seq <= prev {
            anyhow::bail!(
                "chunk {} has non-increasing sibling seq {} (previous {})",
                node.id,
                node.seq,
                prev
            );
        }
        last_seq.insert(key, node.seq);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DocElement;

    #[test]
    fn no_headings_collapses_to_single_root() {
        let elements = vec![
            DocElement::paragraph("First paragraph."),
            DocElement::paragraph("Second paragraph."),
        ];
        let forest = build_forest(&elements, "notes.md");
        assert_eq!(forest.len(), 1);
        let root = &forest[0];
        assert_eq!(root.level, 1);
        assert_eq!(root.seq, 1);
        assert!(root.parent_id.is_none());
        assert_eq!(root.title, "notes.md");
        assert!(root.text.contains("First paragraph."));
        assert!(root.text.contains("Second paragraph."));
        validate_forest(&forest).unwrap();
    }

    #[test]
    fn empty_document_still_yields_a_root() {
        let forest = build_forest(&[], "empty.txt");
        assert_eq!(forest.len(), 1);
        assert_eq!(forest[0].level, 1);
        assert_eq!(forest[0].text, "");
    }

    #[test]
    fn two_sections_with_bodies() {
        // guide.pdf: H1 "Intro", paragraph, H1 "Details", paragraph.
        let elements = vec![
            DocElement::heading(1, "Intro"),
            DocElement::paragraph("Intro body."),
            DocElement::heading(1, "Details"),
            DocElement::paragraph("Details body."),
        ];
        let forest = build_forest(&elements, "guide.pdf");
        assert_eq!(forest.len(), 4);

        let roots: Vec<_> = forest.iter().filter(|n| n.parent_id.is_none()).collect();
        assert_eq!(roots.len(), 2);
        assert_eq!(roots[0].title, "Intro");
        assert_eq!(roots[0].seq, 1);
        assert_eq!(roots[1].title, "Details");
        assert_eq!(roots[1].seq, 2);

        for root in &roots {
            let children: Vec<_> = forest
                .iter()
                .filter(|n| n.parent_id.as_deref() == Some(root.id.as_str()))
                .collect();
            assert_eq!(children.len(), 1);
            assert_eq!(children[0].level, 2);
            assert_eq!(children[0].seq, 1);
        }
        validate_forest(&forest).unwrap();
    }

    #[test]
    fn heading_level_jump_attaches_directly() {
        let elements = vec![
            DocElement::heading(1, "Top"),
            DocElement::heading(3, "Deep"),
            DocElement::paragraph("Deep body."),
        ];
        let forest = build_forest(&elements, "doc.md");
        let top = forest.iter().find(|n| n.title == "Top").unwrap();
        let deep = forest.iter().find(|n| n.title == "Deep").unwrap();
        // No synthesized intermediate: Deep is a direct child at level 2.
        assert_eq!(deep.parent_id.as_deref(), Some(top.id.as_str()));
        assert_eq!(deep.level, 2);
        validate_forest(&forest).unwrap();
    }

    #[test]
    fn heading_pops_siblings_and_deeper_levels() {
        let elements = vec![
            DocElement::heading(1, "A"),
            DocElement::heading(2, "A.1"),
            DocElement::heading(2, "A.2"),
            DocElement::heading(1, "B"),
        ];
        let forest = build_forest(&elements, "doc.md");
        let a = forest.iter().find(|n| n.title == "A").unwrap();
        let a1 = forest.iter().find(|n| n.title == "A.1").unwrap();
        let a2 = forest.iter().find(|n| n.title == "A.2").unwrap();
        let b = forest.iter().find(|n| n.title == "B").unwrap();

        assert_eq!(a1.parent_id.as_deref(), Some(a.id.as_str()));
        assert_eq!(a2.parent_id.as_deref(), Some(a.id.as_str()));
        assert_eq!(a1.seq, 1);
        assert_eq!(a2.seq, 2);
        assert!(b.parent_id.is_none());
        assert_eq!(b.seq, 2);
        validate_forest(&forest).unwrap();
    }

    #[test]
    fn content_before_first_heading_becomes_root_leaf() {
        let elements = vec![
            DocElement::paragraph("Preamble text."),
            DocElement::heading(1, "Section"),
            DocElement::paragraph("Section body."),
        ];
        let forest = build_forest(&elements, "doc.md");
        let preamble = forest.iter().find(|n| n.text == "Preamble text.").unwrap();
        assert!(preamble.parent_id.is_none());
        assert_eq!(preamble.level, 1);
        assert_eq!(preamble.seq, 1);

        let section = forest.iter().find(|n| n.title == "Section").unwrap();
        assert_eq!(section.seq, 2);
        validate_forest(&forest).unwrap();
    }

    #[test]
    fn breadcrumbs_run_root_to_chunk() {
        let elements = vec![
            DocElement::heading(1, "Guide"),
            DocElement::heading(2, "Install"),
            DocElement::paragraph("Run the installer."),
        ];
        let forest = build_forest(&elements, "doc.md");
        let leaf = forest.iter().find(|n| n.text == "Run the installer.").unwrap();
        assert_eq!(
            leaf.breadcrumb,
            vec!["Guide", "Install", "Run the installer."]
        );
        assert_eq!(leaf.level, 3);
    }

    #[test]
    fn blank_content_elements_are_skipped() {
        let elements = vec![
            DocElement::heading(1, "Section"),
            DocElement::paragraph("   "),
            DocElement::paragraph("Real content."),
        ];
        let forest = build_forest(&elements, "doc.md");
        assert_eq!(forest.len(), 2);
        validate_forest(&forest).unwrap();
    }

    #[test]
    fn validate_rejects_bad_levels() {
        let mut forest = build_forest(
            &[
                DocElement::heading(1, "A"),
                DocElement::paragraph("body"),
            ],
            "doc.md",
        );
        forest[1].level = 5;
        assert!(validate_forest(&forest).is_err());
    }

    #[test]
    fn long_leaf_titles_are_truncated() {
        let long = "x".repeat(300);
        let elements = vec![DocElement::heading(1, "H"), DocElement::paragraph(long)];
        let forest = build_forest(&elements, "doc.md");
        let leaf = forest.iter().find(|n| n.level == 2).unwrap();
        assert_eq!(leaf.title.chars().count(), LEAF_TITLE_MAX_CHARS);
        assert_eq!(leaf.text.chars().count(), 300);
    }

    #[test]
    fn code_elements_keep_their_type() {
        let elements = vec![
            DocElement::heading(1, "API"),
            DocElement::code("fn main() {}"),
        ];
        let forest = build_forest(&elements, "doc.md");
        let code = forest.iter().find(|n| n.text == "fn main() {}").unwrap();
        assert_eq!(code.element_type, ElementType::Code);
    }
}
