use crate::backend::ChatBackend;
use crate::error::BenchError;
use crate::models::{Conversation, Turn};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// The five fixed quality axes every response is rated on
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Dimension {
    Relevance,
    Accuracy,
    Completeness,
    Coherence,
    Creativity,
}

impl Dimension {
    pub const ALL: [Dimension; 5] = [
        Dimension::Relevance,
        Dimension::Accuracy,
        Dimension::Completeness,
        Dimension::Coherence,
        Dimension::Creativity,
    ];

    /// Fixed system-wide weight table; the weights sum to 1.0 exactly.
    pub fn weight(self) -> f64 {
        match self {
            Dimension::Relevance => 0.25,
            Dimension::Accuracy => 0.25,
            Dimension::Completeness => 0.20,
            Dimension::Coherence => 0.15,
            Dimension::Creativity => 0.15,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Dimension::Relevance => "relevance",
            Dimension::Accuracy => "accuracy",
            Dimension::Completeness => "completeness",
            Dimension::Coherence => "coherence",
            Dimension::Creativity => "creativity",
        }
    }
}

/// Weighted sum of a full dimension score map.
pub fn composite(scores: &BTreeMap<Dimension, f64>) -> f64 {
    Dimension::ALL
        .iter()
        .map(|d| d.weight() * scores.get(d).copied().unwrap_or(0.0))
        .sum()
}

/// Scores for one turn plus the derived composite
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationResult {
    /// Index of the scored turn within its conversation
    pub turn_index: usize,
    pub scores: BTreeMap<Dimension, f64>,
    pub composite: f64,
}

impl EvaluationResult {
    pub fn from_scores(turn_index: usize, scores: BTreeMap<Dimension, f64>) -> Self {
        let composite = composite(&scores);
        Self {
            turn_index,
            scores,
            composite,
        }
    }

    /// All-zero result used for failed turns, which stay in aggregation
    /// denominators.
    pub fn zeroed(turn_index: usize) -> Self {
        let scores = Dimension::ALL.iter().map(|d| (*d, 0.0)).collect();
        Self::from_scores(turn_index, scores)
    }
}

/// Outcome of evaluating one turn.
///
/// `FailedTurn` (backend failure, scored zero and counted) is deliberately
/// distinct from `Unscored` (judge failure, excluded from means but reported).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TurnEvaluation {
    Scored(EvaluationResult),
    FailedTurn(EvaluationResult),
    Unscored { turn_index: usize, detail: String },
}

impl TurnEvaluation {
    /// The result that participates in aggregation means, if any.
    pub fn countable(&self) -> Option<&EvaluationResult> {
        match self {
            TurnEvaluation::Scored(result) | TurnEvaluation::FailedTurn(result) => Some(result),
            TurnEvaluation::Unscored { .. } => None,
        }
    }
}

/// A scoring strategy: rate one completed turn given its preceding context.
#[async_trait]
pub trait ScoreStrategy: Send + Sync {
    async fn score(
        &self,
        turn: &Turn,
        context: &[Turn],
    ) -> Result<BTreeMap<Dimension, f64>, BenchError>;
}

const JUDGE_SYSTEM_PROMPT: &str = "You are a strict evaluator of AI assistant responses. \
You reply with a single JSON object and nothing else.";

/// Default strategy: ask a judge backend to rate the response.
///
/// The judge is just another `ChatBackend`, so it shares the adapter code
/// path with the systems under test.
pub struct JudgeEvaluator {
    judge: Arc<dyn ChatBackend>,
}

impl JudgeEvaluator {
    pub fn new(judge: Arc<dyn ChatBackend>) -> Self {
        Self { judge }
    }

    fn build_rubric_prompt(turn: &Turn, context: &[Turn]) -> String {
        let mut prompt = String::new();
        if !context.is_empty() {
            prompt.push_str("Conversation so far:\n");
            for prior in context {
                prompt.push_str(&format!("User: {}\n", prior.prompt));
                if let Some(response) = &prior.response {
                    prompt.push_str(&format!("Assistant: {}\n", response));
                }
            }
            prompt.push('\n');
        }
        prompt.push_str(&format!(
            "Prompt: {}\nResponse to evaluate: {}\n\n\
             Rate the response on these dimensions, each as a number between 0.0 and 1.0: \
             relevance, accuracy, completeness, coherence, creativity. \
             Reply with exactly one JSON object of the form \
             {{\"relevance\": 0.0, \"accuracy\": 0.0, \"completeness\": 0.0, \
             \"coherence\": 0.0, \"creativity\": 0.0}}.",
            turn.prompt,
            turn.response.as_deref().unwrap_or_default(),
        ));
        prompt
    }
}

#[async_trait]
impl ScoreStrategy for JudgeEvaluator {
    async fn score(
        &self,
        turn: &Turn,
        context: &[Turn],
    ) -> Result<BTreeMap<Dimension, f64>, BenchError> {
        let rubric = Self::build_rubric_prompt(turn, context);
        let reply = self
            .judge
            .send(&[], &rubric, None, Some(JUDGE_SYSTEM_PROMPT))
            .await?;
        parse_dimension_scores(&reply.text)
    }
}

/// Parse judge output into exactly five bounded dimension scores.
///
/// Values marginally out of range are clamped to [0,1]; a missing or
/// non-numeric dimension is an `EvaluationParse` error, never a guessed zero.
pub fn parse_dimension_scores(response: &str) -> Result<BTreeMap<Dimension, f64>, BenchError> {
    let parsed = extract_json(response)?;

    // Accept the scores either at the root or under a "scores" wrapper.
    let scores_obj = parsed
        .get("scores")
        .and_then(|s| s.as_object())
        .or_else(|| parsed.as_object())
        .ok_or_else(|| BenchError::EvaluationParse {
            detail: "judge output is not a JSON object".to_string(),
        })?;

    let mut scores = BTreeMap::new();
    for dimension in Dimension::ALL {
        let value = scores_obj
            .get(dimension.name())
            .and_then(|v| v.as_f64())
            .ok_or_else(|| BenchError::EvaluationParse {
                detail: format!("missing or non-numeric dimension {:?}", dimension.name()),
            })?;
        scores.insert(dimension, value.clamp(0.0, 1.0));
    }
    Ok(scores)
}

/// Parse JSON from the response, tolerating JSON embedded in prose.
fn extract_json(response: &str) -> Result<Value, BenchError> {
    if let Ok(parsed) = serde_json::from_str(response) {
        return Ok(parsed);
    }
    let start = response.find('{').ok_or_else(|| BenchError::EvaluationParse {
        detail: "no JSON object in judge output".to_string(),
    })?;
    let end = response.rfind('}').ok_or_else(|| BenchError::EvaluationParse {
        detail: "unterminated JSON object in judge output".to_string(),
    })?;
    serde_json::from_str(&response[start..=end]).map_err(|e| BenchError::EvaluationParse {
        detail: format!("invalid JSON in judge output: {e}"),
    })
}

/// Score every turn of a conversation.
///
/// Failed turns score zero across all dimensions and stay countable; a judge
/// failure leaves the turn unscored but recorded.
pub async fn evaluate_conversation(
    strategy: &dyn ScoreStrategy,
    conversation: &Conversation,
) -> Vec<TurnEvaluation> {
    let mut evaluations = Vec::with_capacity(conversation.turns.len());

    for (index, turn) in conversation.turns.iter().enumerate() {
        if !turn.is_completed() {
            evaluations.push(TurnEvaluation::FailedTurn(EvaluationResult::zeroed(index)));
            continue;
        }

        let context = &conversation.turns[..index];
        match strategy.score(turn, context).await {
            Ok(scores) => {
                evaluations.push(TurnEvaluation::Scored(EvaluationResult::from_scores(
                    index, scores,
                )));
            }
            Err(error) => {
                evaluations.push(TurnEvaluation::Unscored {
                    turn_index: index,
                    detail: error.to_string(),
                });
            }
        }
    }

    evaluations
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Conversation;

    fn uniform_scores(value: f64) -> BTreeMap<Dimension, f64> {
        Dimension::ALL.iter().map(|d| (*d, value)).collect()
    }

    struct FixedStrategy {
        scores: BTreeMap<Dimension, f64>,
    }

    #[async_trait]
    impl ScoreStrategy for FixedStrategy {
        async fn score(
            &self,
            _turn: &Turn,
            _context: &[Turn],
        ) -> Result<BTreeMap<Dimension, f64>, BenchError> {
            Ok(self.scores.clone())
        }
    }

    struct FailingStrategy;

    #[async_trait]
    impl ScoreStrategy for FailingStrategy {
        async fn score(
            &self,
            _turn: &Turn,
            _context: &[Turn],
        ) -> Result<BTreeMap<Dimension, f64>, BenchError> {
            Err(BenchError::EvaluationParse {
                detail: "garbled".to_string(),
            })
        }
    }

    #[test]
    fn test_weights_sum_to_one() {
        let total: f64 = Dimension::ALL.iter().map(|d| d.weight()).sum();
        assert!((total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_composite_is_weighted_sum() {
        let mut scores = uniform_scores(0.0);
        scores.insert(Dimension::Relevance, 0.8);
        scores.insert(Dimension::Accuracy, 0.4);
        let expected = 0.25 * 0.8 + 0.25 * 0.4;
        assert!((composite(&scores) - expected).abs() < 1e-9);
    }

    #[test]
    fn test_all_ones_composite_is_one() {
        let result = EvaluationResult::from_scores(0, uniform_scores(1.0));
        assert!((result.composite - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_zeroed_result() {
        let result = EvaluationResult::zeroed(3);
        assert_eq!(result.turn_index, 3);
        assert_eq!(result.composite, 0.0);
        assert_eq!(result.scores.len(), 5);
    }

    #[test]
    fn test_parse_flat_object() {
        let scores = parse_dimension_scores(
            r#"{"relevance": 0.9, "accuracy": 0.8, "completeness": 0.7, "coherence": 0.6, "creativity": 0.5}"#,
        )
        .unwrap();
        assert_eq!(scores[&Dimension::Relevance], 0.9);
        assert_eq!(scores[&Dimension::Creativity], 0.5);
    }

    #[test]
    fn test_parse_scores_wrapper() {
        let scores = parse_dimension_scores(
            r#"{"scores": {"relevance": 1.0, "accuracy": 1.0, "completeness": 1.0, "coherence": 1.0, "creativity": 1.0}}"#,
        )
        .unwrap();
        assert!((composite(&scores) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_parse_embedded_json() {
        let scores = parse_dimension_scores(
            r#"Here is my assessment: {"relevance": 0.9, "accuracy": 0.9, "completeness": 0.9, "coherence": 0.9, "creativity": 0.9} as requested."#,
        )
        .unwrap();
        assert_eq!(scores.len(), 5);
    }

    #[test]
    fn test_parse_clamps_marginal_values() {
        let scores = parse_dimension_scores(
            r#"{"relevance": 1.5, "accuracy": -0.01, "completeness": 0.5, "coherence": 0.5, "creativity": 0.5}"#,
        )
        .unwrap();
        assert_eq!(scores[&Dimension::Relevance], 1.0);
        assert_eq!(scores[&Dimension::Accuracy], 0.0);
    }

    #[test]
    fn test_parse_missing_dimension_is_error() {
        let result = parse_dimension_scores(
            r#"{"relevance": 0.9, "accuracy": 0.8, "completeness": 0.7, "coherence": 0.6}"#,
        );
        assert!(matches!(result, Err(BenchError::EvaluationParse { .. })));
    }

    #[test]
    fn test_parse_non_numeric_is_error_not_zero() {
        let result = parse_dimension_scores(
            r#"{"relevance": "high", "accuracy": 0.8, "completeness": 0.7, "coherence": 0.6, "creativity": 0.5}"#,
        );
        assert!(matches!(result, Err(BenchError::EvaluationParse { .. })));
    }

    #[test]
    fn test_parse_no_json_is_error() {
        let result = parse_dimension_scores("the response was quite good overall");
        assert!(matches!(result, Err(BenchError::EvaluationParse { .. })));
    }

    #[tokio::test]
    async fn test_evaluate_conversation_scores_completed_turns() {
        let mut conversation = Conversation::new("stub", "s");
        let mut turn = Turn::pending("hello", None);
        turn.response = Some("hi".to_string());
        conversation.turns.push(turn);

        let strategy = FixedStrategy {
            scores: uniform_scores(1.0),
        };
        let evaluations = evaluate_conversation(&strategy, &conversation).await;

        assert_eq!(evaluations.len(), 1);
        match &evaluations[0] {
            TurnEvaluation::Scored(result) => assert!((result.composite - 1.0).abs() < 1e-9),
            other => panic!("expected scored turn, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_evaluate_conversation_zeroes_failed_turns() {
        let mut conversation = Conversation::new("stub", "s");
        let mut failed = Turn::pending("hello", None);
        failed.error = Some("timeout".to_string());
        conversation.turns.push(failed);

        let strategy = FixedStrategy {
            scores: uniform_scores(1.0),
        };
        let evaluations = evaluate_conversation(&strategy, &conversation).await;

        match &evaluations[0] {
            TurnEvaluation::FailedTurn(result) => {
                assert_eq!(result.composite, 0.0);
                assert!(evaluations[0].countable().is_some());
            }
            other => panic!("expected failed turn, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_judge_failure_leaves_turn_unscored() {
        let mut conversation = Conversation::new("stub", "s");
        let mut turn = Turn::pending("hello", None);
        turn.response = Some("hi".to_string());
        conversation.turns.push(turn);

        let evaluations = evaluate_conversation(&FailingStrategy, &conversation).await;

        match &evaluations[0] {
            TurnEvaluation::Unscored { detail, .. } => {
                assert!(detail.contains("garbled"));
                assert!(evaluations[0].countable().is_none());
            }
            other => panic!("expected unscored turn, got {other:?}"),
        }
    }

    #[test]
    fn test_rubric_prompt_includes_context() {
        let mut prior = Turn::pending("My name is Ava.", None);
        prior.response = Some("Hello Ava.".to_string());
        let mut turn = Turn::pending("What is my name?", None);
        turn.response = Some("Ava.".to_string());

        let rubric = JudgeEvaluator::build_rubric_prompt(&turn, &[prior]);
        assert!(rubric.contains("My name is Ava."));
        assert!(rubric.contains("Hello Ava."));
        assert!(rubric.contains("What is my name?"));
        assert!(rubric.contains("creativity"));
    }
}
