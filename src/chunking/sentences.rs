//! Sentence segmentation tuned for Ukrainian legal text.
//!
//! Boundaries are terminal punctuation followed by whitespace and a
//! sentence-opening character, or a line break after a line that already
//! ends a sentence. Legal abbreviations (`ст.`, `п.`, `т.д.`) and initials
//! do not end a sentence.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

static PARAGRAPH_BREAK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\n[ \t\r\f]*\n").expect("valid paragraph regex"));

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid whitespace regex"));

/// Terminal punctuation, optional closing quotes/brackets, then whitespace.
static BOUNDARY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"[.!?…]+[»"”)\]]*\s+"#).expect("valid boundary regex"));

/// Lower-cased, without the trailing dot.
const ABBREVIATIONS: &[&str] = &[
    "ст", "стт", "п", "пп", "ч", "підп", "абз", "розд", "гл", "т.д", "т.п", "т.ч", "т.зв", "і.т.д",
    "р", "рр", "грн", "коп", "м", "ім", "див", "напр", "тис", "млн", "млрд", "вул", "обл", "буд",
    "каф", "доц", "проф", "акад", "ін", "інш", "с", "№", "зокр", "пор", "дод", "мін", "макс",
];

static ABBREVIATION_SET: Lazy<HashSet<&'static str>> =
    Lazy::new(|| ABBREVIATIONS.iter().copied().collect());

const LINE_TERMINATORS: &[char] = &['.', '!', '?', '…', ';', ':'];

/// Split `text` into trimmed, non-empty sentences with internal whitespace
/// collapsed to single spaces.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();

    for paragraph in PARAGRAPH_BREAK.split(text) {
        for line_group in join_wrapped_lines(paragraph) {
            let normalized = WHITESPACE.replace_all(line_group.trim(), " ");
            split_normalized(&normalized, &mut sentences);
        }
    }

    sentences
}

/// Lines ending in terminal punctuation stand alone; anything else is a
/// soft wrap and joins the next line.
fn join_wrapped_lines(paragraph: &str) -> Vec<String> {
    let mut groups = Vec::new();
    let mut current = String::new();

    for line in paragraph.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(line);
        if line.ends_with(LINE_TERMINATORS) {
            groups.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        groups.push(current);
    }
    groups
}

fn split_normalized(text: &str, out: &mut Vec<String>) {
    let mut start = 0;

    for m in BOUNDARY.find_iter(text) {
        let Some(next) = text[m.end()..].chars().next() else {
            break;
        };
        if !opens_sentence(next) || ends_with_abbreviation(&text[start..m.start()]) {
            continue;
        }
        push_sentence(out, &text[start..m.end()]);
        start = m.end();
    }

    push_sentence(out, &text[start..]);
}

fn opens_sentence(c: char) -> bool {
    c.is_uppercase() || c.is_ascii_digit() || matches!(c, '«' | '"' | '“' | '„' | '(' | '—' | '–' | '-')
}

fn ends_with_abbreviation(before: &str) -> bool {
    let Some(word) = before.split_whitespace().last() else {
        return false;
    };
    let word = word.trim_start_matches(|c: char| !c.is_alphanumeric() && c != '№');
    if word.is_empty() {
        return false;
    }

    let mut chars = word.chars();
    if let (Some(first), None) = (chars.next(), chars.next()) {
        if first.is_uppercase() {
            // Initial, as in "Т. Г. Шевченка".
            return true;
        }
    }

    ABBREVIATION_SET.contains(word.to_lowercase().as_str())
}

fn push_sentence(out: &mut Vec<String>, sentence: &str) {
    let sentence = sentence.trim();
    if !sentence.is_empty() {
        out.push(sentence.to_string());
    }
}
