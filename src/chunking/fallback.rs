//! Recursive character splitter used when structured chunking fails.
//!
//! Tries separators in order, recursing into any piece that is still too
//! large:
//! 1. Blank lines (paragraphs)
//! 2. Single newlines
//! 3. Spaces
//! 4. Individual characters
//!
//! Separators stay attached to the start of the piece that follows them, so
//! joining the output without overlap reproduces the input modulo trimmed
//! whitespace. Lengths are counted in characters.

use std::collections::VecDeque;

pub const DEFAULT_SEPARATORS: &[&str] = &["\n\n", "\n", " ", ""];

pub struct RecursiveSplitter<'a> {
    chunk_size: usize,
    chunk_overlap: usize,
    separators: &'a [&'a str],
}

impl RecursiveSplitter<'static> {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self::with_separators(chunk_size, chunk_overlap, DEFAULT_SEPARATORS)
    }
}

impl<'a> RecursiveSplitter<'a> {
    pub fn with_separators(chunk_size: usize, chunk_overlap: usize, separators: &'a [&'a str]) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            chunk_overlap,
            separators,
        }
    }

    pub fn split(&self, text: &str) -> Vec<String> {
        if text.trim().is_empty() {
            return Vec::new();
        }
        self.split_with(text, self.separators)
    }

    fn split_with(&self, text: &str, separators: &[&str]) -> Vec<String> {
        // First separator present in the text wins; "" always matches.
        let mut separator = separators.last().copied().unwrap_or("");
        let mut remaining: &[&str] = &[];
        for (i, sep) in separators.iter().enumerate() {
            if sep.is_empty() {
                separator = *sep;
                break;
            }
            if text.contains(sep) {
                separator = *sep;
                remaining = &separators[i + 1..];
                break;
            }
        }

        let mut chunks = Vec::new();
        let mut small: Vec<String> = Vec::new();

        for piece in split_keeping_separator(text, separator) {
            if char_len(&piece) < self.chunk_size {
                small.push(piece);
                continue;
            }

            if !small.is_empty() {
                chunks.extend(self.merge(&small));
                small.clear();
            }
            if remaining.is_empty() {
                chunks.push(piece);
            } else {
                chunks.extend(self.split_with(&piece, remaining));
            }
        }

        if !small.is_empty() {
            chunks.extend(self.merge(&small));
        }

        chunks
    }

    /// Greedily join small pieces up to the chunk size, keeping up to
    /// `chunk_overlap` characters of trailing pieces as the next chunk's start.
    fn merge(&self, pieces: &[String]) -> Vec<String> {
        let mut merged = Vec::new();
        let mut window: VecDeque<&str> = VecDeque::new();
        let mut total = 0usize;

        for piece in pieces {
            let len = char_len(piece);

            if total + len > self.chunk_size && !window.is_empty() {
                push_trimmed(&mut merged, &window);

                while total > self.chunk_overlap || (total + len > self.chunk_size && total > 0) {
                    match window.pop_front() {
                        Some(front) => total -= char_len(front),
                        None => break,
                    }
                }
            }

            window.push_back(piece);
            total += len;
        }

        push_trimmed(&mut merged, &window);
        merged
    }
}

fn push_trimmed(out: &mut Vec<String>, window: &VecDeque<&str>) {
    let joined: String = window.iter().copied().collect();
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        out.push(trimmed.to_string());
    }
}

/// Split so each separator starts the piece after it. Empty pieces are dropped.
fn split_keeping_separator(text: &str, separator: &str) -> Vec<String> {
    if separator.is_empty() {
        return text.chars().map(String::from).collect();
    }

    let mut pieces = Vec::new();
    let mut start = 0;
    for (idx, _) in text.match_indices(separator) {
        if idx > start {
            pieces.push(text[start..idx].to_string());
        }
        start = idx;
    }
    if start < text.len() {
        pieces.push(text[start..].to_string());
    }
    pieces
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_input() {
        let splitter = RecursiveSplitter::new(100, 10);
        assert!(splitter.split("").is_empty());
        assert!(splitter.split("  \n\n ").is_empty());
    }

    #[test]
    fn test_short_text_single_chunk() {
        let splitter = RecursiveSplitter::new(100, 10);
        assert_eq!(splitter.split("Коротке положення."), vec!["Коротке положення."]);
    }

    #[test]
    fn test_separator_attached_to_following_piece() {
        let pieces = split_keeping_separator("a\n\nb\n\nc", "\n\n");
        assert_eq!(pieces, vec!["a", "\n\nb", "\n\nc"]);
    }

    #[test]
    fn test_paragraphs_split_before_lines() {
        let para = "слово ".repeat(15);
        let text = format!("{para}\n\n{para}\n\n{para}");
        let splitter = RecursiveSplitter::new(120, 0);
        let chunks = splitter.split(&text);
        assert_eq!(chunks.len(), 3);
        for chunk in &chunks {
            assert_eq!(chunk, para.trim());
        }
    }

    #[test]
    fn test_chunks_respect_size() {
        let text = "Студент має право на академічну мобільність. ".repeat(40);
        let splitter = RecursiveSplitter::new(128, 32);
        let chunks = splitter.split(&text);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 128, "chunk too long: {}", chunk.chars().count());
        }
    }

    #[test]
    fn test_overlap_repeats_tail_words() {
        let text = (1..=60).map(|i| format!("w{i}")).collect::<Vec<_>>().join(" ");
        let splitter = RecursiveSplitter::new(40, 12);
        let chunks = splitter.split(&text);
        assert!(chunks.len() > 2);
        let last_word = chunks[0].split(' ').last().unwrap();
        assert!(chunks[1].contains(last_word));
    }

    #[test]
    fn test_unbroken_text_splits_by_characters() {
        let text = "я".repeat(300);
        let splitter = RecursiveSplitter::new(100, 0);
        let chunks = splitter.split(&text);
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.chars().count() == 100));
    }
}
