//! Query validation: length, ethics and domain relevance.
//!
//! A keyword screen always runs first. With LLM validation enabled the model
//! then judges ethics and relevance; a failed model call falls back to the
//! keyword test for that check only.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::llm::LanguageModel;
use crate::models::QueryValidation;

const MIN_QUERY_CHARS: usize = 3;

/// Lower-cased stems; a query containing any of them is rejected outright.
pub const UNETHICAL_KEYWORDS: &[&str] = &[
    "політ", "партія", "вибор", "еротик", "порно", "секс", "насильств", "вбивств", "дискримінац",
    "расизм", "фашизм", "нацизм", "нетерпим", "суїцид", "ненавист", "шахрайств", "реклам", "спам",
    "хакінг", "злом", "фінансов схем", "експлуатаці", "фейков новин", "шкідлив пз", "війн",
    "тероризм", "фальшив документ", "плагіат", "персональн дан", "маніпуляц",
];

/// Lower-cased stems of the university regulations domain.
pub const DOMAIN_KEYWORDS: &[&str] = &[
    "кну", "шевченк", "університет", "студент", "викладач", "екзамен", "іспит", "академічн",
    "навчальн", "освітн", "атестаці", "залік", "курс", "доброчесн", "положен", "регламент",
    "документ", "норматив", "семестр", "оцінк", "диплом", "відрахув", "переведен", "стипенді",
    "вступ", "захист", "науков", "бібліотек", "самоврядуван", "додатков курс", "правила поведінк",
    "ініціатив",
];

const TOO_SHORT: &str =
    "Запит занадто короткий. Будь ласка, сформулюйте питання більш детально.";
const UNETHICAL: &str = "Запит стосується неприйнятних тем. Система призначена лише для питань \
                         про нормативні документи університету.";
const IRRELEVANT: &str = "Ваш запит не стосується нормативних документів університету. Будь ласка, \
                          сформулюйте питання про університетські положення та регламенти.";

pub struct QueryValidator {
    llm: Arc<dyn LanguageModel>,
    use_llm_validation: bool,
}

/// Model verdict on a single check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Pass,
    Reject,
}

impl QueryValidator {
    pub fn new(llm: Arc<dyn LanguageModel>, use_llm_validation: bool) -> Self {
        Self {
            llm,
            use_llm_validation,
        }
    }

    pub fn validate(&self, query: &str) -> QueryValidation {
        if query.trim().chars().count() < MIN_QUERY_CHARS {
            return QueryValidation::rejected(true, TOO_SHORT);
        }

        let lowered = query.to_lowercase();
        if contains_any(&lowered, UNETHICAL_KEYWORDS) {
            debug!("Query rejected by unethical keyword screen");
            return QueryValidation::rejected(false, UNETHICAL);
        }

        if self.use_llm_validation {
            self.llm_validate(query, &lowered)
        } else {
            keyword_validate(&lowered)
        }
    }

    fn llm_validate(&self, query: &str, lowered: &str) -> QueryValidation {
        let ethics = self
            .llm
            .complete(&ethics_prompt(query))
            .map(|answer| parse_verdict(&answer, &["НЕЕТИЧНИЙ", "UNETHICAL"], &["ЕТИЧНИЙ", "ETHICAL"]));
        match ethics {
            Ok(Verdict::Pass) => {}
            Ok(Verdict::Reject) => return QueryValidation::rejected(false, UNETHICAL),
            Err(e) => {
                // The unethical keyword screen already passed.
                warn!("Ethics check failed, using keyword fallback: {e:#}");
            }
        }

        let relevance = self.llm.complete(&relevance_prompt(query)).map(|answer| {
            parse_verdict(
                &answer,
                &["НЕРЕЛЕВАНТНИЙ", "IRRELEVANT"],
                &["РЕЛЕВАНТНИЙ", "RELEVANT"],
            )
        });
        match relevance {
            Ok(Verdict::Pass) => QueryValidation::accepted(),
            Ok(Verdict::Reject) => QueryValidation::rejected(true, IRRELEVANT),
            Err(e) => {
                warn!("Relevance check failed, using keyword fallback: {e:#}");
                keyword_validate(lowered)
            }
        }
    }
}

fn keyword_validate(lowered: &str) -> QueryValidation {
    if contains_any(lowered, UNETHICAL_KEYWORDS) {
        return QueryValidation::rejected(false, UNETHICAL);
    }
    if !contains_any(lowered, DOMAIN_KEYWORDS) {
        return QueryValidation::rejected(true, IRRELEVANT);
    }
    QueryValidation::accepted()
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|needle| haystack.contains(needle))
}

/// Negative tokens are checked first since each contains its positive form.
/// An answer with neither token counts as a rejection.
fn parse_verdict(answer: &str, negative: &[&str], positive: &[&str]) -> Verdict {
    let upper = answer.to_uppercase();
    if contains_any(&upper, negative) {
        Verdict::Reject
    } else if contains_any(&upper, positive) {
        Verdict::Pass
    } else {
        Verdict::Reject
    }
}

fn ethics_prompt(query: &str) -> String {
    format!(
        "Ти модератор академічної довідкової системи університету.\n\
         Визнач, чи є запит користувача етичним і прийнятним для академічного середовища.\n\n\
         Запит: {query}\n\n\
         Відповідай одним словом: ЕТИЧНИЙ або НЕЕТИЧНИЙ."
    )
}

fn relevance_prompt(query: &str) -> String {
    format!(
        "Система відповідає лише на питання про нормативні документи університету: \
         положення, регламенти, правила навчання, оцінювання, стипендії, академічну доброчесність.\n\
         Визнач, чи стосується запит користувача цих документів.\n\n\
         Запит: {query}\n\n\
         Відповідай одним словом: РЕЛЕВАНТНИЙ або НЕРЕЛЕВАНТНИЙ."
    )
}
