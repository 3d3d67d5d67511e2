//! Parses model replies into display blocks.
//!
//! Replies follow the layout requested in the prompt guidelines: CAPS
//! headings ending in a colon, normal-case subheadings ending in a colon,
//! `•` bullets and `**bold**` terms. Sections are separated by blank lines.

use once_cell::sync::Lazy;
use regex::Regex;

pub const BULLET: &str = "• ";

static SECTION_BREAK: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n(?:[ \t]*\n)+").expect("valid regex"));
static HEADING: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\p{Lu}[\p{Lu}\p{N} &/'(),.\-]*:$").expect("valid regex"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Span {
    Text(String),
    Bold(String),
    Underline(String),
}

pub type Line = Vec<Span>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    Heading(String),
    Subheading(String),
    SubheadingList { title: String, items: Vec<Line> },
    BulletList(Vec<Line>),
    Paragraph(Line),
}

pub fn format(text: &str) -> Vec<Block> {
    let normalized = text.replace("\r\n", "\n");
    let mut blocks = Vec::new();
    for section in SECTION_BREAK.split(&normalized) {
        let section = section.trim();
        if !section.is_empty() {
            classify_section(section, &mut blocks);
        }
    }
    blocks
}

fn classify_section(section: &str, blocks: &mut Vec<Block>) {
    let (first_line, rest) = match section.split_once('\n') {
        Some((first, rest)) => (first.trim(), rest.trim()),
        None => (section, ""),
    };

    if HEADING.is_match(first_line) {
        blocks.push(Block::Heading(first_line.to_string()));
        if !rest.is_empty() {
            classify_section(rest, blocks);
        }
        return;
    }

    let bullet_count = section.matches(BULLET).count();

    if first_line.ends_with(':') && bullet_count > 1 {
        let mut segments = bullet_segments(section).into_iter();
        let title = segments.next().unwrap_or_default();
        let items = segments.map(|s| parse_inline(&s)).collect();
        blocks.push(Block::SubheadingList { title, items });
    } else if section.ends_with(':') && bullet_count == 0 {
        blocks.push(Block::Subheading(section.to_string()));
    } else if bullet_count > 0 {
        let items = bullet_segments(section).iter().map(|s| parse_inline(s)).collect();
        blocks.push(Block::BulletList(items));
    } else {
        blocks.push(Block::Paragraph(parse_inline(section)));
    }
}

fn bullet_segments(section: &str) -> Vec<String> {
    section
        .split(BULLET)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Splits `**bold**` and `__underline__` runs out of plain text. An opening
/// delimiter without a matching close stays literal.
pub fn parse_inline(text: &str) -> Line {
    let mut spans = Vec::new();
    let mut literal = String::new();
    let mut rest = text;

    while !rest.is_empty() {
        let next = ["**", "__"]
            .iter()
            .filter_map(|d| rest.find(d).map(|pos| (pos, *d)))
            .min_by_key(|(pos, _)| *pos);

        let Some((pos, delim)) = next else {
            literal.push_str(rest);
            break;
        };

        literal.push_str(&rest[..pos]);
        let after = &rest[pos + delim.len()..];
        match after.find(delim) {
            Some(end) if end > 0 => {
                if !literal.is_empty() {
                    spans.push(Span::Text(std::mem::take(&mut literal)));
                }
                let inner = after[..end].to_string();
                spans.push(if delim == "**" { Span::Bold(inner) } else { Span::Underline(inner) });
                rest = &after[end + delim.len()..];
            }
            _ => {
                literal.push_str(delim);
                rest = after;
            }
        }
    }

    if !literal.is_empty() {
        spans.push(Span::Text(literal));
    }
    spans
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> Span {
        Span::Text(s.to_string())
    }

    #[test]
    fn test_heading_paragraph_subheading_list() {
        let blocks = format("HEADING:\n\nBody text\n\nSub:\n• a\n• b");
        assert_eq!(
            blocks,
            vec![
                Block::Heading("HEADING:".to_string()),
                Block::Paragraph(vec![text("Body text")]),
                Block::SubheadingList {
                    title: "Sub:".to_string(),
                    items: vec![vec![text("a")], vec![text("b")]],
                },
            ]
        );
    }

    #[test]
    fn test_formatting_is_idempotent() {
        let raw = "KEY FEATURES:\n• **Fast** drilling\n• Safe\n\nNotes:\n\nPlain __words__ here.";
        assert_eq!(format(raw), format(raw));
    }

    #[test]
    fn test_heading_with_body_keeps_order() {
        let blocks = format("KEY FEATURES:\n• one\n• two\n\nClosing line.");
        assert_eq!(
            blocks,
            vec![
                Block::Heading("KEY FEATURES:".to_string()),
                Block::BulletList(vec![vec![text("one")], vec![text("two")]]),
                Block::Paragraph(vec![text("Closing line.")]),
            ]
        );
    }

    #[test]
    fn test_mixed_case_line_is_not_heading() {
        assert_eq!(format("Overview:"), vec![Block::Subheading("Overview:".to_string())]);
        assert_eq!(format("oVERVIEW:"), vec![Block::Subheading("oVERVIEW:".to_string())]);
    }

    #[test]
    fn test_non_ascii_caps_heading() {
        assert_eq!(format("ÉTUDE GÉNÉRALE:"), vec![Block::Heading("ÉTUDE GÉNÉRALE:".to_string())]);
        assert_eq!(format("Étude:"), vec![Block::Subheading("Étude:".to_string())]);
    }

    #[test]
    fn test_plain_bullet_list() {
        let blocks = format("• first\n•  second  \n");
        assert_eq!(blocks, vec![Block::BulletList(vec![vec![text("first")], vec![text("second")]])]);
    }

    #[test]
    fn test_single_bullet_under_colon_is_a_list() {
        let blocks = format("Sub:\n• only");
        assert_eq!(blocks, vec![Block::BulletList(vec![vec![text("Sub:")], vec![text("only")]])]);
    }

    #[test]
    fn test_sections_split_on_blank_lines() {
        let blocks = format("one\r\n\r\ntwo\n \n\nthree\nstill three");
        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[2], Block::Paragraph(vec![text("three\nstill three")]));
        assert!(format("\n\n  \n").is_empty());
    }

    #[test]
    fn test_inline_bold_and_underline() {
        assert_eq!(
            parse_inline("Use **mud** to __cool__ the bit"),
            vec![
                text("Use "),
                Span::Bold("mud".to_string()),
                text(" to "),
                Span::Underline("cool".to_string()),
                text(" the bit"),
            ]
        );
    }

    #[test]
    fn test_inline_unterminated_is_literal() {
        assert_eq!(parse_inline("a **b c"), vec![text("a **b c")]);
        assert_eq!(parse_inline("**** empty"), vec![text("**** empty")]);
        assert_eq!(
            parse_inline("**x __y** z__"),
            vec![Span::Bold("x __y".to_string()), text(" z__")]
        );
    }

    #[test]
    fn test_bullet_items_get_inline_formatting() {
        let blocks = format("Tools:\n• **Bit** for cutting\n• Mud");
        assert_eq!(
            blocks,
            vec![Block::SubheadingList {
                title: "Tools:".to_string(),
                items: vec![vec![Span::Bold("Bit".to_string()), text(" for cutting")], vec![text("Mud")]],
            }]
        );
    }
}
