use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::{Duration, SystemTime};
use uuid::Uuid;

/// One prompt/response exchange within a conversation.
///
/// A turn with no response represents a failed exchange; the error text is
/// kept for reporting but never feeds back into later context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    /// Prompt sent to the backend
    pub prompt: String,
    /// Optional image URI attached to the prompt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_ref: Option<String>,
    /// Backend response text, absent for failed turns
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    /// Wall-clock latency of the backend call
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency: Option<Duration>,
    /// Failure description when the turn did not complete
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// When the request was issued
    pub timestamp: SystemTime,
}

impl Turn {
    pub fn pending(prompt: &str, image_ref: Option<String>) -> Self {
        Self {
            prompt: prompt.to_string(),
            image_ref,
            response: None,
            latency: None,
            error: None,
            timestamp: SystemTime::now(),
        }
    }

    /// True once the backend answered this turn.
    pub fn is_completed(&self) -> bool {
        self.response.is_some()
    }
}

/// Summary metrics for one completed conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationMetrics {
    /// Wall-clock duration from first request to session end
    pub total_duration: Duration,
    /// Number of turns issued (equals the scenario length)
    pub num_turns: usize,
    /// Number of turns that received a response
    pub completed_turns: usize,
    /// Mean backend latency across completed turns
    pub mean_latency: Duration,
    /// Mean response length in characters across completed turns
    pub mean_response_length: f64,
}

/// Ordered turn history for one (backend, scenario) pair.
///
/// Turns are append-only and kept in request order: the context for turn `n`
/// is exactly `turns[..n]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    /// Unique id for this run
    pub id: Uuid,
    /// Backend that produced the responses
    pub backend_id: String,
    /// Scenario the conversation was driven by
    pub scenario_name: String,
    /// Turn history in request order
    pub turns: Vec<Turn>,
    pub started_at: SystemTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<SystemTime>,
}

impl Conversation {
    pub fn new(backend_id: &str, scenario_name: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            backend_id: backend_id.to_string(),
            scenario_name: scenario_name.to_string(),
            turns: Vec::new(),
            started_at: SystemTime::now(),
            ended_at: None,
        }
    }

    pub fn end(&mut self) {
        if self.ended_at.is_none() {
            self.ended_at = Some(SystemTime::now());
        }
    }

    /// Compute summary metrics from the recorded turns.
    pub fn metrics(&self) -> ConversationMetrics {
        let ended = self.ended_at.unwrap_or_else(SystemTime::now);
        let total_duration = ended
            .duration_since(self.started_at)
            .unwrap_or(Duration::ZERO);

        let completed: Vec<&Turn> = self.turns.iter().filter(|t| t.is_completed()).collect();

        let mean_latency = if completed.is_empty() {
            Duration::ZERO
        } else {
            let sum: Duration = completed.iter().filter_map(|t| t.latency).sum();
            sum / completed.len() as u32
        };

        let mean_response_length = if completed.is_empty() {
            0.0
        } else {
            let sum: usize = completed
                .iter()
                .filter_map(|t| t.response.as_ref())
                .map(|r| r.chars().count())
                .sum();
            sum as f64 / completed.len() as f64
        };

        ConversationMetrics {
            total_duration,
            num_turns: self.turns.len(),
            completed_turns: completed.len(),
            mean_latency,
            mean_response_length,
        }
    }
}

/// One prompt within a scenario, optionally with an attached image
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioPrompt {
    pub prompt: String,
    #[serde(default, alias = "image_url", skip_serializing_if = "Option::is_none")]
    pub image_ref: Option<String>,
}

/// An externally authored, ordered sequence of prompts forming one test case.
///
/// Immutable once loaded and shared read-only across all backend runs so every
/// backend sees the identical prompt sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(alias = "turns")]
    pub prompts: Vec<ScenarioPrompt>,
}

impl Scenario {
    /// Build a one-turn scenario from a single prompt, used by the compare mode.
    pub fn single(name: &str, prompt: &str, image_ref: Option<String>) -> Self {
        Self {
            name: name.to_string(),
            description: String::new(),
            prompts: vec![ScenarioPrompt {
                prompt: prompt.to_string(),
                image_ref,
            }],
        }
    }

    /// Load multi-turn scenarios from a JSON file.
    pub fn load_file(path: &Path) -> Result<Vec<Scenario>> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read scenario file: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse scenario file: {}", path.display()))
    }

    /// Built-in scenarios used by the multi-turn mode when no file is given.
    pub fn default_suite() -> Vec<Scenario> {
        vec![
            Scenario {
                name: "General Knowledge Test".to_string(),
                description: "Testing general knowledge capabilities".to_string(),
                prompts: vec![
                    ScenarioPrompt {
                        prompt: "What is artificial intelligence?".to_string(),
                        image_ref: None,
                    },
                    ScenarioPrompt {
                        prompt: "What are the main types of machine learning?".to_string(),
                        image_ref: None,
                    },
                    ScenarioPrompt {
                        prompt: "Can you explain how neural networks work?".to_string(),
                        image_ref: None,
                    },
                ],
            },
            Scenario {
                name: "Contextual Understanding Test".to_string(),
                description: "Testing contextual understanding and memory".to_string(),
                prompts: vec![
                    ScenarioPrompt {
                        prompt: "My name is Alex and I'm learning about AI.".to_string(),
                        image_ref: None,
                    },
                    ScenarioPrompt {
                        prompt: "What was my name again?".to_string(),
                        image_ref: None,
                    },
                    ScenarioPrompt {
                        prompt: "What am I learning about?".to_string(),
                        image_ref: None,
                    },
                ],
            },
        ]
    }
}

/// One entry of a batch test file: a standalone prompt with optional image
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchCase {
    pub prompt: String,
    #[serde(default, alias = "image_url", skip_serializing_if = "Option::is_none")]
    pub image_ref: Option<String>,
    #[serde(default)]
    pub description: String,
}

impl BatchCase {
    /// Load batch test cases from a JSON file.
    pub fn load_file(path: &Path) -> Result<Vec<BatchCase>> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read batch file: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse batch file: {}", path.display()))
    }

    /// Default cases used by the batch mode when no file is given.
    pub fn default_cases() -> Vec<BatchCase> {
        [
            "What is artificial intelligence?",
            "Explain quantum computing in simple terms",
            "What are the ethical considerations of AI?",
        ]
        .iter()
        .map(|p| BatchCase {
            prompt: p.to_string(),
            image_ref: None,
            description: String::new(),
        })
        .collect()
    }

    /// Lift a batch case into a one-turn scenario so both modes share the
    /// session and evaluation pipeline.
    pub fn into_scenario(self, index: usize) -> Scenario {
        Scenario {
            name: format!("test_case_{}", index + 1),
            description: self.description,
            prompts: vec![ScenarioPrompt {
                prompt: self.prompt,
                image_ref: self.image_ref,
            }],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_turn_completion_state() {
        let mut turn = Turn::pending("hello", None);
        assert!(!turn.is_completed());
        turn.response = Some("hi".to_string());
        assert!(turn.is_completed());
    }

    #[test]
    fn test_conversation_metrics() {
        let mut conversation = Conversation::new("openai", "metrics-test");
        let mut first = Turn::pending("one", None);
        first.response = Some("aaaa".to_string());
        first.latency = Some(Duration::from_millis(100));
        let mut second = Turn::pending("two", None);
        second.response = Some("aaaaaaaa".to_string());
        second.latency = Some(Duration::from_millis(300));
        let mut failed = Turn::pending("three", None);
        failed.error = Some("timeout".to_string());

        conversation.turns = vec![first, second, failed];
        conversation.end();

        let metrics = conversation.metrics();
        assert_eq!(metrics.num_turns, 3);
        assert_eq!(metrics.completed_turns, 2);
        assert_eq!(metrics.mean_latency, Duration::from_millis(200));
        assert!((metrics.mean_response_length - 6.0).abs() < 1e-9);
    }

    #[test]
    fn test_conversation_metrics_all_failed() {
        let mut conversation = Conversation::new("gemini", "all-failed");
        let mut failed = Turn::pending("one", None);
        failed.error = Some("status 500".to_string());
        conversation.turns = vec![failed];
        conversation.end();

        let metrics = conversation.metrics();
        assert_eq!(metrics.completed_turns, 0);
        assert_eq!(metrics.mean_latency, Duration::ZERO);
        assert_eq!(metrics.mean_response_length, 0.0);
    }

    #[test]
    fn test_scenario_file_parsing() {
        let json = r#"
[
  {
    "name": "Contextual Understanding Test",
    "description": "memory across turns",
    "turns": [
      {"prompt": "My name is Ava."},
      {"prompt": "What is my name?", "image_url": "https://example.com/a.png"}
    ]
  }
]
"#;
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", json).unwrap();

        let scenarios = Scenario::load_file(file.path()).unwrap();
        assert_eq!(scenarios.len(), 1);
        assert_eq!(scenarios[0].prompts.len(), 2);
        assert_eq!(scenarios[0].prompts[0].prompt, "My name is Ava.");
        assert_eq!(
            scenarios[0].prompts[1].image_ref.as_deref(),
            Some("https://example.com/a.png")
        );
    }

    #[test]
    fn test_scenario_file_invalid_json() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(Scenario::load_file(file.path()).is_err());
    }

    #[test]
    fn test_batch_case_into_scenario() {
        let case = BatchCase {
            prompt: "What is AI?".to_string(),
            image_ref: None,
            description: "basics".to_string(),
        };
        let scenario = case.into_scenario(0);
        assert_eq!(scenario.name, "test_case_1");
        assert_eq!(scenario.prompts.len(), 1);
        assert_eq!(scenario.prompts[0].prompt, "What is AI?");
    }

    #[test]
    fn test_default_suite_shape() {
        let suite = Scenario::default_suite();
        assert_eq!(suite.len(), 2);
        assert!(suite.iter().all(|s| !s.prompts.is_empty()));
    }
}
