use once_cell::sync::Lazy;
use regex::Regex;

static BLOCK_SEPARATOR: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n\n+").unwrap());
static BULLET_MARKER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[-*] ").unwrap());
static ORDERED_START: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+\.").unwrap());
static ORDERED_MARKER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+\.\s*").unwrap());
static BOLD_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*\*.*?\*\*").unwrap());
static ITALIC_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*.*?\*").unwrap());

/// Heading prefixes, checked longest first so "### " never reads as level 1.
const HEADING_PREFIXES: [(&str, u8); 3] = [("### ", 3), ("## ", 2), ("# ", 1)];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    Heading { level: u8, text: String },
    UnorderedList(Vec<String>),
    OrderedList(Vec<String>),
    Paragraph(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Span {
    Plain(String),
    Bold(String),
    Italic(String),
}

/// Split markdown into display blocks.
///
/// Only headings, bullet lists, numbered lists and paragraphs are recognised.
/// Anything else (tables, code fences, quotes) falls through as a paragraph.
pub fn parse_blocks(content: &str) -> Vec<Block> {
    BLOCK_SEPARATOR
        .split(content)
        .filter(|block| !block.trim().is_empty())
        .map(classify_block)
        .collect()
}

fn classify_block(block: &str) -> Block {
    for (prefix, level) in HEADING_PREFIXES {
        if let Some(text) = block.strip_prefix(prefix) {
            return Block::Heading {
                level,
                text: text.to_string(),
            };
        }
    }

    let trimmed = block.trim();

    if trimmed.starts_with("- ") || trimmed.starts_with("* ") {
        let items = block
            .split('\n')
            .map(|line| BULLET_MARKER.replace(line, "").trim().to_string())
            .collect();
        return Block::UnorderedList(items);
    }

    if ORDERED_START.is_match(trimmed) {
        let items = block
            .split('\n')
            .map(|line| ORDERED_MARKER.replace(line, "").into_owned())
            .collect();
        return Block::OrderedList(items);
    }

    Block::Paragraph(block.to_string())
}

/// Split a line of text into plain, bold and italic spans.
///
/// Bold runs (`**x**`) are found first; italic runs (`*x*`) are only looked
/// for in the text between them. Unterminated markers stay literal.
pub fn parse_inline(text: &str) -> Vec<Span> {
    let mut spans = Vec::new();
    let mut last = 0;

    for bold in BOLD_RUN.find_iter(text) {
        parse_italic(&text[last..bold.start()], &mut spans);
        let inner = &bold.as_str()[2..bold.len() - 2];
        if !inner.is_empty() {
            spans.push(Span::Bold(inner.to_string()));
        }
        last = bold.end();
    }
    parse_italic(&text[last..], &mut spans);

    spans
}

fn parse_italic(text: &str, spans: &mut Vec<Span>) {
    let mut last = 0;

    for italic in ITALIC_RUN.find_iter(text) {
        push_plain(spans, &text[last..italic.start()]);
        // "**" on its own is a stray pair, not an empty emphasis
        if italic.len() > 2 {
            let inner = &italic.as_str()[1..italic.len() - 1];
            spans.push(Span::Italic(inner.to_string()));
        } else {
            push_plain(spans, italic.as_str());
        }
        last = italic.end();
    }
    push_plain(spans, &text[last..]);
}

fn push_plain(spans: &mut Vec<Span>, text: &str) {
    if text.is_empty() {
        return;
    }
    if let Some(Span::Plain(prev)) = spans.last_mut() {
        prev.push_str(text);
    } else {
        spans.push(Span::Plain(text.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain(s: &str) -> Span {
        Span::Plain(s.to_string())
    }

    #[test]
    fn test_heading_then_paragraph() {
        let blocks = parse_blocks("# Title\n\nSome **bold** text.");
        assert_eq!(
            blocks,
            vec![
                Block::Heading { level: 1, text: "Title".to_string() },
                Block::Paragraph("Some **bold** text.".to_string()),
            ]
        );
        assert_eq!(
            parse_inline("Some **bold** text."),
            vec![plain("Some "), Span::Bold("bold".to_string()), plain(" text.")]
        );
    }

    #[test]
    fn test_bullet_list() {
        assert_eq!(
            parse_blocks("- a\n- b"),
            vec![Block::UnorderedList(vec!["a".to_string(), "b".to_string()])]
        );
        assert_eq!(
            parse_blocks("* first\n* second"),
            vec![Block::UnorderedList(vec!["first".to_string(), "second".to_string()])]
        );
    }

    #[test]
    fn test_numbered_list() {
        let blocks = parse_blocks("1. **Identification**: folio 78r\n2. Visual");
        assert_eq!(
            blocks,
            vec![Block::OrderedList(vec![
                "**Identification**: folio 78r".to_string(),
                "Visual".to_string(),
            ])]
        );
    }

    #[test]
    fn test_heading_levels_round_trip() {
        for (line, level) in [("# One", 1u8), ("## Two", 2), ("### Three", 3)] {
            let blocks = parse_blocks(line);
            match &blocks[0] {
                Block::Heading { level: l, text } => {
                    assert_eq!(*l, level);
                    let prefix = format!("{} ", "#".repeat(level as usize));
                    assert_eq!(format!("{}{}", prefix, text), line);
                }
                other => panic!("expected heading, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_four_hashes_is_not_a_heading() {
        assert_eq!(
            parse_blocks("#### Deep"),
            vec![Block::Paragraph("#### Deep".to_string())]
        );
    }

    #[test]
    fn test_blocks_split_on_blank_line_runs() {
        let blocks = parse_blocks("first\n\n\n\nsecond\nstill second");
        assert_eq!(
            blocks,
            vec![
                Block::Paragraph("first".to_string()),
                Block::Paragraph("second\nstill second".to_string()),
            ]
        );
    }

    #[test]
    fn test_empty_input() {
        assert!(parse_blocks("").is_empty());
        assert!(parse_blocks("\n\n\n").is_empty());
        assert!(parse_inline("").is_empty());
    }

    #[test]
    fn test_italic_and_stray_asterisks() {
        assert_eq!(
            parse_inline("a *word* here"),
            vec![plain("a "), Span::Italic("word".to_string()), plain(" here")]
        );
        assert_eq!(parse_inline("2 * 3 = 6"), vec![plain("2 * 3 = 6")]);
        assert_eq!(parse_inline("**unterminated"), vec![plain("**unterminated")]);
    }

    #[test]
    fn test_bold_and_italic_mixed() {
        assert_eq!(
            parse_inline("**Script**: *Voynichese* glyphs"),
            vec![
                Span::Bold("Script".to_string()),
                plain(": "),
                Span::Italic("Voynichese".to_string()),
                plain(" glyphs"),
            ]
        );
    }

    #[test]
    fn test_parse_is_deterministic() {
        let source = "## Overview\n\n- **herbal** section\n- *balneology*\n\n3. third\n\nclosing *note*";
        let first = parse_blocks(source);
        let second = parse_blocks(source);
        assert_eq!(first, second);
        for block in &first {
            if let Block::Paragraph(text) = block {
                assert_eq!(parse_inline(text), parse_inline(text));
            }
        }
    }

    #[test]
    fn test_partial_stream_prefixes_never_panic() {
        let source = "# Folio\n\n**Identification & Overview**: *likely* 15th c.\n\n- one\n- two";
        for end in 0..=source.len() {
            if source.is_char_boundary(end) {
                let _ = parse_blocks(&source[..end]);
                let _ = parse_inline(&source[..end]);
            }
        }
    }
}
