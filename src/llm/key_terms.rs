//! Salient-phrase extraction for highlighting retrieved fragments.
//!
//! Candidate phrases are the contiguous 1–3-grams of the query's content
//! words. The cross-encoder scores each phrase against the full query and
//! every phrase within 15% of the best one is kept.

use std::collections::HashSet;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::warn;

use crate::llm::CrossEncoder;

const MAX_NGRAM: usize = 3;
const MIN_TOKEN_CHARS: usize = 3;
const RELATIVE_THRESHOLD: f32 = 0.15;

static WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\w+").expect("valid word regex"));

/// Ukrainian function words and filler. Tokens of two characters or fewer
/// are dropped separately, so only longer words are listed.
const STOP_WORDS: &[&str] = &[
    "авжеж", "адже", "але", "без", "був", "була", "були", "було", "бути", "більш", "вам", "вас",
    "весь", "вздовж", "вниз", "внизу", "вона", "вони", "воно", "все", "всередині", "всіх", "від",
    "він", "давай", "давати", "дещо", "для", "завжди", "замість", "коли", "ледве", "майже", "навколо",
    "навіть", "нам", "отже", "отож", "поза", "про", "під", "так", "такий", "також", "тобто", "тож",
    "тощо", "хоча", "цей", "чого", "що", "який", "якої", "які", "їй", "їм", "їх", "її", "або", "ало",
    "ваш", "вже", "всю", "вся", "два", "дві", "ким", "мож", "моя", "моє", "мої", "міг", "між", "мій",
    "над", "нас", "наш", "нею", "неї", "них", "ніж", "ній", "ось", "при", "пір", "раз", "рік", "сам",
    "сих", "сім", "там", "теж", "тим", "тих", "той", "тою", "три", "тут", "хоч", "хто", "цим", "цих",
    "час", "щоб", "яких", "якщо", "інша", "інше", "інші", "буває", "буде", "буду", "будь", "вами",
    "ваша", "ваше", "ваші", "вгору", "вміти", "вісім", "давно", "даром", "добре", "довго", "друго",
    "дякую", "життя", "зараз", "знову", "кожен", "кожна", "кожне", "кожні", "краще", "менше", "могти",
    "можна", "назад", "немає", "нижче", "нього", "однак", "перед", "поруч", "потім", "проти", "після",
    "років", "році", "сама", "саме", "саму", "самі", "свою", "своє", "свої", "себе", "собі", "став",
    "суть", "така", "таке", "такі", "твоя", "твоє", "твій", "тебе", "тими", "тобі", "того", "тоді",
    "тому", "туди", "хіба", "цими", "цієї", "часу", "чому", "якого", "іноді", "інший", "інших",
    "багато", "будемо", "будете", "будуть", "більше", "всього", "всьому", "далеко", "десять", "досить",
    "другий", "дійсно", "звідси", "зовсім", "кругом", "кілька", "людина", "можуть", "навіщо", "нагорі",
    "небудь", "низько", "ніколи", "нікуди", "нічого", "обидва", "одного", "однієї", "перший", "просто",
    "раніше", "раптом", "самим", "самих", "самій", "свого", "своєї", "своїх", "собою", "справ",
    "сказав", "скрізь", "сьомий", "третій", "тільки", "хотіти", "чотири", "чудово", "шостий",
    "близько", "важлива", "важливе", "важливі", "вдалині", "восьмий", "говорив", "десятий", "зайнята",
    "зайнято", "зайняті", "занадто", "значить", "нарешті", "нерідко", "повинно", "посеред", "початку",
    "пізніше", "сказала", "сказати", "скільки", "спасибі", "частіше", "важливий", "двадцять",
    "зазвичай", "зайнятий", "звичайно", "здається", "найбільш", "недалеко", "особливо", "потрібно",
    "спочатку", "сьогодні", "численна", "численне", "численні", "відсотків", "двадцятий", "звідусіль",
    "мільйонів", "нещодавно", "прекрасно", "четвертий", "численний", "дванадцять", "одинадцять",
    "сімнадцять", "тринадцять", "безперервно", "дванадцятий", "одинадцятий", "сімнадцятий",
    "тринадцятий", "шістнадцять", "вісімнадцять", "чотирнадцять", "шістнадцятий", "вісімнадцятий",
    "чотирнадцятий",
];

static STOP_WORD_SET: Lazy<HashSet<&'static str>> =
    Lazy::new(|| STOP_WORDS.iter().copied().collect());

pub struct KeyTermExtractor {
    model: Option<Arc<dyn CrossEncoder>>,
}

impl KeyTermExtractor {
    pub fn new(model: Option<Arc<dyn CrossEncoder>>) -> Self {
        Self { model }
    }

    /// Best-first list of salient query phrases. Empty whenever the
    /// cross-encoder is missing or fails.
    pub fn extract(&self, query: &str) -> Vec<String> {
        let Some(model) = &self.model else {
            return Vec::new();
        };

        let candidates = candidate_phrases(query);
        if candidates.is_empty() {
            return Vec::new();
        }

        let refs: Vec<&str> = candidates.iter().map(String::as_str).collect();
        let scores = match model.score(query, &refs) {
            Ok(scores) if scores.len() == candidates.len() => scores,
            Ok(scores) => {
                warn!(
                    "Key-term scoring returned {} scores for {} candidates",
                    scores.len(),
                    candidates.len()
                );
                return Vec::new();
            }
            Err(e) => {
                warn!("Key-term scoring failed: {e:#}");
                return Vec::new();
            }
        };

        select_key_terms(candidates, scores)
    }
}

/// Content-word n-grams of the query, first-seen order, no duplicates.
fn candidate_phrases(query: &str) -> Vec<String> {
    let lowered = query.to_lowercase();
    let words: Vec<&str> = WORD
        .find_iter(&lowered)
        .map(|m| m.as_str())
        .filter(|w| w.chars().count() >= MIN_TOKEN_CHARS && !STOP_WORD_SET.contains(w))
        .collect();

    let mut seen = HashSet::new();
    let mut candidates = Vec::new();
    for n in 1..=MAX_NGRAM {
        for window in words.windows(n) {
            let phrase = window.join(" ");
            if seen.insert(phrase.clone()) {
                candidates.push(phrase);
            }
        }
    }
    candidates
}

fn select_key_terms(candidates: Vec<String>, scores: Vec<f32>) -> Vec<String> {
    let mut scored: Vec<(String, f32)> = candidates.into_iter().zip(scores).collect();
    scored.sort_by(|a, b| b.1.total_cmp(&a.1));

    let Some(max_score) = scored.first().map(|(_, score)| *score) else {
        return Vec::new();
    };

    // A relative cut only makes sense for a positive top score; otherwise
    // keep just the phrases tied with the best one.
    let threshold = if max_score > 0.0 {
        max_score * RELATIVE_THRESHOLD
    } else {
        max_score
    };

    scored
        .into_iter()
        .filter(|(_, score)| *score >= threshold)
        .map(|(candidate, _)| candidate)
        .collect()
}
