use crate::backend::{ChatBackend, ProxySettings, build_backend};
use crate::config::Config;
use crate::evaluation::{JudgeEvaluator, evaluate_conversation};
use crate::models::{BatchCase, Conversation, Scenario, Turn};
use crate::output;
use crate::report::{BackendRun, ComparisonReport, aggregate};
use crate::session::ConversationSession;
use anyhow::{Context, Result};
use std::io::Write;
use std::sync::Arc;
use tokio::task::JoinSet;

/// Everything one benchmarking run produced
pub struct RunOutcome {
    pub runs: Vec<BackendRun>,
    pub report: ComparisonReport,
}

/// Orchestrates benchmarking runs: builds adapters from configuration, fans
/// sessions out across backends, evaluates the conversations and folds the
/// outcomes into a ranked comparison.
pub struct Runner {
    config: Config,
    proxy: ProxySettings,
    verbose: bool,
}

impl Runner {
    pub fn new(config: Config, proxy: ProxySettings, verbose: bool) -> Self {
        Self {
            config,
            proxy,
            verbose,
        }
    }

    /// One prompt against every selected backend.
    pub async fn run_compare(
        &self,
        selector: &str,
        prompt: &str,
        image_ref: Option<String>,
    ) -> Result<RunOutcome> {
        let scenario = Scenario::single("compare", prompt, image_ref);
        self.run_scenarios(selector, vec![scenario]).await
    }

    /// A file of standalone prompts, each run as a one-turn scenario.
    pub async fn run_batch(&self, selector: &str, cases: Vec<BatchCase>) -> Result<RunOutcome> {
        let scenarios = cases
            .into_iter()
            .enumerate()
            .map(|(index, case)| case.into_scenario(index))
            .collect();
        self.run_scenarios(selector, scenarios).await
    }

    /// Multi-turn scenarios against every selected backend.
    pub async fn run_scenarios(
        &self,
        selector: &str,
        scenarios: Vec<Scenario>,
    ) -> Result<RunOutcome> {
        let backends = self.build_backends(selector)?;
        let judge = build_backend(&self.config.judge, &self.proxy)
            .context("Failed to construct judge backend")?;
        let strategy = JudgeEvaluator::new(judge);

        let conversations = run_sessions(
            &backends,
            &scenarios,
            self.config.system_prompt.clone(),
            self.verbose,
        )
        .await?;

        let mut runs = Vec::with_capacity(conversations.len());
        for conversation in conversations {
            if self.verbose {
                println!(
                    "Evaluating {} / {}",
                    conversation.backend_id, conversation.scenario_name
                );
            }
            let evaluations = evaluate_conversation(&strategy, &conversation).await;
            let metrics = conversation.metrics();
            runs.push(BackendRun {
                conversation,
                metrics,
                evaluations,
            });
        }

        let report = aggregate(&runs);
        let written = output::save_run_artifacts(&self.config.output_dir, &runs, &report)?;
        if self.verbose {
            for path in &written {
                println!("Wrote {}", path.display());
            }
        }

        Ok(RunOutcome { runs, report })
    }

    /// A stdin-driven conversation with one backend; no scoring, the
    /// transcript and metrics are still recorded.
    pub async fn run_interactive(
        &self,
        selector: &str,
        initial_prompt: Option<String>,
        image_ref: Option<String>,
    ) -> Result<()> {
        anyhow::ensure!(
            selector != "all",
            "Interactive mode drives a single backend; pass --backend <id>"
        );
        let backend_config = self.config.select_backends(selector)?.remove(0);
        let backend = build_backend(&backend_config, &self.proxy)?;

        println!(
            "=== Interactive conversation with {} (type 'exit' to end) ===",
            backend.id()
        );

        let mut conversation = Conversation::new(backend.id(), "interactive");
        let mut next_prompt = initial_prompt;
        // The image only rides on the first prompt that goes out.
        let mut pending_image = image_ref;

        loop {
            let prompt = match next_prompt.take() {
                Some(prompt) => {
                    println!("You: {prompt}");
                    prompt
                }
                None => {
                    print!("You: ");
                    std::io::stdout().flush()?;
                    let mut line = String::new();
                    if std::io::stdin().read_line(&mut line)? == 0 {
                        break;
                    }
                    line.trim().to_string()
                }
            };
            if prompt.is_empty() {
                continue;
            }
            if prompt.eq_ignore_ascii_case("exit") {
                break;
            }

            let mut turn = Turn::pending(&prompt, pending_image.take());
            let result = backend
                .send(
                    &conversation.turns,
                    &prompt,
                    turn.image_ref.as_deref(),
                    self.config.system_prompt.as_deref(),
                )
                .await;
            match result {
                Ok(reply) => {
                    println!("{}: {}", backend.id(), reply.text);
                    turn.response = Some(reply.text);
                    turn.latency = Some(reply.latency);
                }
                Err(error) => {
                    eprintln!("Error: {error}");
                    turn.error = Some(error.to_string());
                }
            }
            conversation.turns.push(turn);
        }

        conversation.end();
        let metrics = conversation.metrics();
        println!(
            "Conversation ended: {} turns, {:.2}s total, {:.2}s mean latency",
            metrics.num_turns,
            metrics.total_duration.as_secs_f64(),
            metrics.mean_latency.as_secs_f64(),
        );
        let path = output::save_transcript(&self.config.output_dir, &conversation)?;
        println!("Conversation saved to {}", path.display());
        Ok(())
    }

    fn build_backends(&self, selector: &str) -> Result<Vec<Arc<dyn ChatBackend>>> {
        let mut backends = Vec::new();
        for backend_config in self.config.select_backends(selector)? {
            match build_backend(&backend_config, &self.proxy) {
                Ok(backend) => backends.push(backend),
                Err(error) => {
                    eprintln!("Warning: skipping backend {}: {error}", backend_config.id);
                }
            }
        }
        anyhow::ensure!(
            !backends.is_empty(),
            "No usable backends; check the API key environment variables"
        );
        Ok(backends)
    }
}

/// Run every (backend, scenario) pair on its own task.
///
/// Sessions share nothing mutable; the scenario is shared read-only. Turns
/// within one session stay strictly sequential, and the collected
/// conversations are sorted so reports do not depend on completion order.
pub async fn run_sessions(
    backends: &[Arc<dyn ChatBackend>],
    scenarios: &[Scenario],
    system_prompt: Option<String>,
    verbose: bool,
) -> Result<Vec<Conversation>> {
    let mut tasks = JoinSet::new();
    for scenario in scenarios {
        let scenario = Arc::new(scenario.clone());
        for backend in backends {
            if verbose {
                println!("Running {} / {}", backend.id(), scenario.name);
            }
            let session = ConversationSession::new(backend.clone(), system_prompt.clone(), verbose);
            let scenario = Arc::clone(&scenario);
            tasks.spawn(async move { session.run(&scenario).await });
        }
    }

    let mut conversations = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        conversations.push(joined.context("Conversation session task panicked")?);
    }
    conversations.sort_by(|a, b| {
        a.backend_id
            .cmp(&b.backend_id)
            .then_with(|| a.scenario_name.cmp(&b.scenario_name))
    });
    Ok(conversations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BenchError;
    use crate::evaluation::{Dimension, ScoreStrategy, TurnEvaluation};
    use crate::session::stubs::EchoBackend;
    use async_trait::async_trait;
    use std::collections::BTreeMap;

    struct UniformStrategy(f64);

    #[async_trait]
    impl ScoreStrategy for UniformStrategy {
        async fn score(
            &self,
            _turn: &Turn,
            _context: &[Turn],
        ) -> Result<BTreeMap<Dimension, f64>, BenchError> {
            Ok(Dimension::ALL.iter().map(|d| (*d, self.0)).collect())
        }
    }

    #[tokio::test]
    async fn test_run_sessions_covers_every_pair() {
        let backends: Vec<Arc<dyn ChatBackend>> = vec![
            Arc::new(EchoBackend::new("alpha")),
            Arc::new(EchoBackend::new("beta")),
        ];
        let scenarios = Scenario::default_suite();

        let conversations = run_sessions(&backends, &scenarios, None, false)
            .await
            .unwrap();

        assert_eq!(conversations.len(), backends.len() * scenarios.len());
        // Sorted by backend id then scenario name.
        assert_eq!(conversations[0].backend_id, "alpha");
        assert_eq!(conversations[3].backend_id, "beta");

        // Every conversation is exactly as long as its scenario.
        for conversation in &conversations {
            let scenario = scenarios
                .iter()
                .find(|s| s.name == conversation.scenario_name)
                .unwrap();
            assert_eq!(conversation.turns.len(), scenario.prompts.len());
        }
    }

    #[tokio::test]
    async fn test_failing_backend_still_produces_full_conversations() {
        let backends: Vec<Arc<dyn ChatBackend>> = vec![
            Arc::new(EchoBackend::new("steady")),
            Arc::new(EchoBackend::failing_on("broken", &[0, 1, 2, 3, 4, 5])),
        ];
        let scenarios = vec![Scenario::default_suite().remove(0)];

        let conversations = run_sessions(&backends, &scenarios, None, false)
            .await
            .unwrap();

        let broken = conversations
            .iter()
            .find(|c| c.backend_id == "broken")
            .unwrap();
        assert_eq!(broken.turns.len(), 3);
        assert!(broken.turns.iter().all(|t| !t.is_completed()));
    }

    #[tokio::test]
    async fn test_full_pipeline_ranks_steady_backend_first() {
        let backends: Vec<Arc<dyn ChatBackend>> = vec![
            Arc::new(EchoBackend::new("steady")),
            Arc::new(EchoBackend::failing_on("broken", &[0, 1, 2, 3, 4, 5])),
        ];
        let scenarios = vec![Scenario::default_suite().remove(0)];
        let conversations = run_sessions(&backends, &scenarios, None, false)
            .await
            .unwrap();

        let strategy = UniformStrategy(0.8);
        let mut runs = Vec::new();
        for conversation in conversations {
            let evaluations = evaluate_conversation(&strategy, &conversation).await;
            let metrics = conversation.metrics();
            runs.push(BackendRun {
                conversation,
                metrics,
                evaluations,
            });
        }

        let report = aggregate(&runs);
        assert_eq!(report.ranking, vec!["steady", "broken"]);
        assert!((report.reports["steady"].overall_score - 0.8).abs() < 1e-9);
        assert_eq!(report.reports["broken"].overall_score, 0.0);
        assert!(
            runs.iter()
                .flat_map(|r| r.evaluations.iter())
                .all(|e| !matches!(e, TurnEvaluation::Unscored { .. }))
        );
    }
}
