use crate::evaluation::{Dimension, TurnEvaluation};
use crate::models::{Conversation, ConversationMetrics};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Everything recorded for one (backend, scenario) pair
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendRun {
    pub conversation: Conversation,
    pub metrics: ConversationMetrics,
    pub evaluations: Vec<TurnEvaluation>,
}

/// Aggregated performance of one backend across a whole run.
///
/// Derived on demand from the evaluation outcomes, never mutated in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendReport {
    pub backend_id: String,
    /// Mean of composites across scored and failed turns
    pub overall_score: f64,
    pub per_dimension_mean: BTreeMap<Dimension, f64>,
    pub scored_turns: usize,
    /// Turns scored zero because the backend call failed
    pub failed_turns: usize,
    /// Turns with no score because the judge failed
    pub unscored_turns: usize,
}

/// The cross-backend comparison: per-backend reports plus a ranking
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonReport {
    pub reports: BTreeMap<String, BackendReport>,
    /// Backend ids by overall score descending, ties by id ascending
    pub ranking: Vec<String>,
}

impl ComparisonReport {
    pub fn best(&self) -> Option<&BackendReport> {
        self.ranking.first().and_then(|id| self.reports.get(id))
    }
}

/// Fold completed per-backend runs into a ranked comparison.
///
/// Failed turns count in every denominator so a backend that failed
/// everything ranks lowest with a 0.0 score instead of vanishing; turns the
/// judge could not score are excluded from the means but reported.
pub fn aggregate(runs: &[BackendRun]) -> ComparisonReport {
    let mut grouped: BTreeMap<String, Vec<&TurnEvaluation>> = BTreeMap::new();
    for run in runs {
        grouped
            .entry(run.conversation.backend_id.clone())
            .or_default()
            .extend(run.evaluations.iter());
    }

    let mut reports = BTreeMap::new();
    for (backend_id, evaluations) in grouped {
        reports.insert(backend_id.clone(), backend_report(backend_id, &evaluations));
    }

    let mut ranking: Vec<String> = reports.keys().cloned().collect();
    ranking.sort_by(|a, b| {
        let score_a = reports[a].overall_score;
        let score_b = reports[b].overall_score;
        score_b
            .partial_cmp(&score_a)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.cmp(b))
    });

    ComparisonReport { reports, ranking }
}

fn backend_report(backend_id: String, evaluations: &[&TurnEvaluation]) -> BackendReport {
    let countable: Vec<_> = evaluations.iter().filter_map(|e| e.countable()).collect();

    let overall_score = if countable.is_empty() {
        0.0
    } else {
        countable.iter().map(|r| r.composite).sum::<f64>() / countable.len() as f64
    };

    let mut per_dimension_mean = BTreeMap::new();
    for dimension in Dimension::ALL {
        let mean = if countable.is_empty() {
            0.0
        } else {
            countable
                .iter()
                .map(|r| r.scores.get(&dimension).copied().unwrap_or(0.0))
                .sum::<f64>()
                / countable.len() as f64
        };
        per_dimension_mean.insert(dimension, mean);
    }

    let scored_turns = evaluations
        .iter()
        .filter(|e| matches!(e, TurnEvaluation::Scored(_)))
        .count();
    let failed_turns = evaluations
        .iter()
        .filter(|e| matches!(e, TurnEvaluation::FailedTurn(_)))
        .count();
    let unscored_turns = evaluations
        .iter()
        .filter(|e| matches!(e, TurnEvaluation::Unscored { .. }))
        .count();

    BackendReport {
        backend_id,
        overall_score,
        per_dimension_mean,
        scored_turns,
        failed_turns,
        unscored_turns,
    }
}
