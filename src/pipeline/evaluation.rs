//! Answer quality evaluation hook and its running history.
//!
//! Scoring itself is delegated to an [`AnswerEvaluator`]; the pipeline only
//! weights the component scores into an overall score and keeps a bounded
//! history for reporting.

use std::collections::VecDeque;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{EvaluationMetrics, RetrievalResult};

/// Evaluations kept for the report; older ones are dropped first.
const HISTORY_CAPACITY: usize = 1000;

/// Window compared at each end of the history to compute the trend.
const TREND_WINDOW: usize = 3;
const TREND_MARGIN: f32 = 0.05;

/// Component scores in `[0, 1]`, plus a per-context relevance verdict in
/// retrieval order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityScores {
    pub faithfulness: f32,
    pub answer_relevancy: f32,
    pub context_relevancy: f32,
    pub mrr: f32,
    pub map: f32,
    #[serde(default)]
    pub individual_relevancy: Vec<bool>,
}

pub trait AnswerEvaluator: Send + Sync {
    fn evaluate(
        &self,
        question: &str,
        answer: &str,
        contexts: &[RetrievalResult],
    ) -> Result<QualityScores>;
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityWeights {
    pub faithfulness: f32,
    pub answer_relevancy: f32,
    pub context_relevancy: f32,
    pub mrr: f32,
    pub map: f32,
}

impl Default for QualityWeights {
    fn default() -> Self {
        Self {
            faithfulness: 0.3,
            answer_relevancy: 0.3,
            context_relevancy: 0.1,
            mrr: 0.15,
            map: 0.15,
        }
    }
}

impl QualityWeights {
    pub fn overall(&self, scores: &QualityScores) -> f32 {
        scores.faithfulness * self.faithfulness
            + scores.answer_relevancy * self.answer_relevancy
            + scores.context_relevancy * self.context_relevancy
            + scores.mrr * self.mrr
            + scores.map * self.map
    }

    pub fn metrics(&self, scores: &QualityScores) -> EvaluationMetrics {
        EvaluationMetrics {
            faithfulness: scores.faithfulness,
            answer_relevancy: scores.answer_relevancy,
            context_relevancy: scores.context_relevancy,
            mrr: scores.mrr,
            map: scores.map,
            overall_score: self.overall(scores),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EvaluationRecord {
    pub timestamp: DateTime<Utc>,
    pub question: String,
    pub answer: String,
    pub num_contexts: usize,
    pub metrics: EvaluationMetrics,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    NoData,
    InsufficientData,
    Improving,
    Declining,
    Stable,
}

#[derive(Debug, Clone, Serialize)]
pub struct EvaluationReport {
    pub total_evaluations: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average_metrics: Option<EvaluationMetrics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_evaluation: Option<EvaluationRecord>,
    pub trend: Trend,
}

#[derive(Debug)]
pub struct EvaluationHistory {
    records: VecDeque<EvaluationRecord>,
    capacity: usize,
}

impl Default for EvaluationHistory {
    fn default() -> Self {
        Self::with_capacity(HISTORY_CAPACITY)
    }
}

impl EvaluationHistory {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            records: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn push(&mut self, record: EvaluationRecord) {
        if self.records.len() == self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    pub fn report(&self) -> EvaluationReport {
        EvaluationReport {
            total_evaluations: self.records.len(),
            average_metrics: self.averages(),
            latest_evaluation: self.records.back().cloned(),
            trend: self.trend(),
        }
    }

    fn averages(&self) -> Option<EvaluationMetrics> {
        if self.records.is_empty() {
            return None;
        }
        let n = self.records.len() as f32;
        let mean = |f: fn(&EvaluationMetrics) -> f32| {
            self.records.iter().map(|r| f(&r.metrics)).sum::<f32>() / n
        };
        Some(EvaluationMetrics {
            faithfulness: mean(|m| m.faithfulness),
            answer_relevancy: mean(|m| m.answer_relevancy),
            context_relevancy: mean(|m| m.context_relevancy),
            mrr: mean(|m| m.mrr),
            map: mean(|m| m.map),
            overall_score: mean(|m| m.overall_score),
        })
    }

    /// Mean overall score of the newest window against the oldest one.
    fn trend(&self) -> Trend {
        if self.records.is_empty() {
            return Trend::NoData;
        }
        if self.records.len() < TREND_WINDOW {
            return Trend::InsufficientData;
        }

        let older = window_mean(self.records.iter());
        let recent = window_mean(self.records.iter().rev());

        if recent > older + TREND_MARGIN {
            Trend::Improving
        } else if recent < older - TREND_MARGIN {
            Trend::Declining
        } else {
            Trend::Stable
        }
    }
}

fn window_mean<'a>(records: impl Iterator<Item = &'a EvaluationRecord>) -> f32 {
    records
        .take(TREND_WINDOW)
        .map(|r| r.metrics.overall_score)
        .sum::<f32>()
        / TREND_WINDOW as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scores(value: f32) -> QualityScores {
        QualityScores {
            faithfulness: value,
            answer_relevancy: value,
            context_relevancy: value,
            mrr: value,
            map: value,
            individual_relevancy: vec![true],
        }
    }

    fn record(overall: f32) -> EvaluationRecord {
        EvaluationRecord {
            timestamp: Utc::now(),
            question: "Питання".into(),
            answer: "Відповідь".into(),
            num_contexts: 1,
            metrics: QualityWeights::default().metrics(&scores(overall)),
        }
    }

    #[test]
    fn test_default_weights_sum_to_one() {
        let overall = QualityWeights::default().overall(&scores(1.0));
        assert!((overall - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_weighted_overall() {
        let s = QualityScores {
            faithfulness: 1.0,
            answer_relevancy: 0.0,
            context_relevancy: 1.0,
            mrr: 0.0,
            map: 0.0,
            individual_relevancy: vec![],
        };
        assert!((QualityWeights::default().overall(&s) - 0.4).abs() < 1e-6);

        let custom = QualityWeights {
            faithfulness: 0.0,
            answer_relevancy: 0.0,
            context_relevancy: 1.0,
            mrr: 0.0,
            map: 0.0,
        };
        assert!((custom.overall(&s) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_empty_report() {
        let report = EvaluationHistory::default().report();
        assert_eq!(report.total_evaluations, 0);
        assert!(report.average_metrics.is_none());
        assert_eq!(report.trend, Trend::NoData);
    }

    #[test]
    fn test_report_averages_and_latest() {
        let mut history = EvaluationHistory::default();
        history.push(record(0.2));
        history.push(record(0.6));
        let report = history.report();
        assert_eq!(report.total_evaluations, 2);
        let avg = report.average_metrics.unwrap();
        assert!((avg.overall_score - 0.4).abs() < 1e-6);
        assert!((report.latest_evaluation.unwrap().metrics.faithfulness - 0.6).abs() < 1e-6);
        assert_eq!(report.trend, Trend::InsufficientData);
    }

    #[test]
    fn test_trend() {
        let mut history = EvaluationHistory::default();
        for v in [0.2, 0.2, 0.2, 0.9, 0.9, 0.9] {
            history.push(record(v));
        }
        assert_eq!(history.report().trend, Trend::Improving);

        let mut history = EvaluationHistory::default();
        for v in [0.5, 0.5, 0.5] {
            history.push(record(v));
        }
        assert_eq!(history.report().trend, Trend::Stable);
    }

    #[test]
    fn test_history_is_bounded() {
        let mut history = EvaluationHistory::with_capacity(2);
        history.push(record(0.1));
        history.push(record(0.2));
        history.push(record(0.3));
        assert_eq!(history.len(), 2);
        let avg = history.report().average_metrics.unwrap();
        assert!((avg.overall_score - 0.25).abs() < 1e-6);
    }
}
