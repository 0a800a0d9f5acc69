//! Structural segmentation of Ukrainian legal text into a section forest.
//!
//! Each line is matched against an ordered list of header patterns. A match
//! opens a new section; its parent is the nearest open section with a
//! strictly lower level. Lines before the first header form a top-level
//! "whole document" section.

use once_cell::sync::Lazy;
use regex::Regex;

/// Hierarchy depth of a section. Lower is closer to the root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SectionLevel {
    Document = 0,
    Chapter = 1,
    Article = 2,
    Part = 3,
    Point = 4,
    Subsection = 5,
    ListItem = 6,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DocumentSection {
    pub level: SectionLevel,
    pub number: Option<String>,
    pub title: Option<String>,
    /// Body text without the header line (for titled sections).
    pub content: String,
    /// Index of the parent in the section list.
    pub parent: Option<usize>,
}

impl DocumentSection {
    /// `"{number}. {title}"` (or just the title) when the section has a title.
    pub fn header(&self) -> Option<String> {
        let title = self.title.as_deref()?;
        Some(match &self.number {
            Some(number) => format!("{number}. {title}"),
            None => title.to_string(),
        })
    }
}

/// How the rest of a header line is used.
#[derive(Clone, Copy)]
enum HeaderRest {
    /// Becomes the section title (chapters, articles, parts).
    Title,
    /// The whole line is kept as the first line of the body (points, list items).
    Body,
}

struct HeaderPattern {
    level: SectionLevel,
    regex: Regex,
    rest: HeaderRest,
}

/// Checked in order; the first match wins. Articles must precede numbered
/// lists and subsections must precede plain numbered items.
static HEADER_PATTERNS: Lazy<Vec<HeaderPattern>> = Lazy::new(|| {
    let pattern = |level, re: &str, rest| HeaderPattern {
        level,
        regex: Regex::new(re).expect("valid header regex"),
        rest,
    };
    vec![
        pattern(
            SectionLevel::Chapter,
            r"(?i)^(?:розділ|глава)\s+([IVXLCDM]+|\d+)\.?(?:\s+(.*))?$",
            HeaderRest::Title,
        ),
        pattern(
            SectionLevel::Article,
            r"(?i)^стаття\s+(\d+(?:[.\-]\d+)*)\.?(?:\s+(.*))?$",
            HeaderRest::Title,
        ),
        pattern(
            SectionLevel::Part,
            r"(?i)^частина\s+(\d+)\.?(?:\s+(.*))?$",
            HeaderRest::Title,
        ),
        pattern(
            SectionLevel::Point,
            r"(?i)^(?:пункт\s+|п\.\s*)(\d+(?:\.\d+)*)\.?(?:\s+(.*))?$",
            HeaderRest::Body,
        ),
        pattern(
            SectionLevel::Subsection,
            r"^(\d+\.\d+(?:\.\d+)*)\.?\s+(.*)$",
            HeaderRest::Body,
        ),
        pattern(SectionLevel::ListItem, r"^(\d{1,3})[.)]\s+(.*)$", HeaderRest::Body),
        pattern(SectionLevel::ListItem, r"^[-–—•]\s+(.*)$", HeaderRest::Body),
    ]
});

struct Header {
    level: SectionLevel,
    number: Option<String>,
    title: Option<String>,
    body: Option<String>,
}

fn match_header(line: &str) -> Option<Header> {
    for pattern in HEADER_PATTERNS.iter() {
        let Some(caps) = pattern.regex.captures(line) else {
            continue;
        };

        // Bullets have no number group; everything else has it first.
        let has_number = caps.len() > 2;
        let number = has_number
            .then(|| caps.get(1).map(|m| m.as_str().to_string()))
            .flatten();

        return Some(match pattern.rest {
            HeaderRest::Title => {
                let title = caps
                    .get(2)
                    .map(|m| m.as_str().trim().to_string())
                    .filter(|t| !t.is_empty());
                Header {
                    level: pattern.level,
                    number,
                    title,
                    body: None,
                }
            }
            HeaderRest::Body => Header {
                level: pattern.level,
                number,
                title: None,
                body: Some(line.to_string()),
            },
        });
    }
    None
}

/// Split `text` into sections in document order.
pub fn parse_sections(text: &str) -> Vec<DocumentSection> {
    let mut sections: Vec<DocumentSection> = Vec::new();
    // (level, index) of open sections, innermost last.
    let mut stack: Vec<(SectionLevel, usize)> = Vec::new();

    for raw_line in text.lines() {
        let line = raw_line.trim();

        if let Some(header) = match_header(line) {
            while stack.last().is_some_and(|(level, _)| *level >= header.level) {
                stack.pop();
            }
            let parent = stack.last().map(|(_, idx)| *idx);
            let idx = sections.len();
            sections.push(DocumentSection {
                level: header.level,
                number: header.number,
                title: header.title,
                content: header.body.unwrap_or_default(),
                parent,
            });
            stack.push((header.level, idx));
            continue;
        }

        if sections.is_empty() {
            if line.is_empty() {
                continue;
            }
            sections.push(DocumentSection {
                level: SectionLevel::Document,
                number: None,
                title: None,
                content: String::new(),
                parent: None,
            });
        }

        if let Some(current) = sections.last_mut() {
            if !current.content.is_empty() {
                current.content.push('\n');
            }
            current.content.push_str(line);
        }
    }

    for section in &mut sections {
        let trimmed = section.content.trim();
        if trimmed.len() != section.content.len() {
            section.content = trimmed.to_string();
        }
    }

    sections
}
