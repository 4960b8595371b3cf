use crate::evaluation::Dimension;
use crate::report::{BackendRun, ComparisonReport};
use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Output format options
#[derive(Debug, Clone, ValueEnum, Serialize, Deserialize)]
pub enum OutputFormat {
    Plain,
    Json,
}

/// Print the comparison in the selected format
pub fn print_report(report: &ComparisonReport, runs: &[BackendRun], format: OutputFormat) {
    match format {
        OutputFormat::Plain => print_plain(report, runs),
        OutputFormat::Json => print_json(report),
    }
}

fn print_plain(report: &ComparisonReport, runs: &[BackendRun]) {
    println!("=== Backend Ranking ===");
    for (position, backend_id) in report.ranking.iter().enumerate() {
        let backend = &report.reports[backend_id];
        println!(
            "{}. {:<12} overall {:.3}  (scored {}, failed {}, unscored {})",
            position + 1,
            backend.backend_id,
            backend.overall_score,
            backend.scored_turns,
            backend.failed_turns,
            backend.unscored_turns,
        );
    }
    println!();

    println!(
        "{:<12} {:<10} {:<10} {:<13} {:<10} {:<10}",
        "Backend", "Relevance", "Accuracy", "Completeness", "Coherence", "Creativity"
    );
    println!("{}", "-".repeat(67));
    for backend_id in &report.ranking {
        let means = &report.reports[backend_id].per_dimension_mean;
        println!(
            "{:<12} {:<10.3} {:<10.3} {:<13.3} {:<10.3} {:<10.3}",
            backend_id,
            means[&Dimension::Relevance],
            means[&Dimension::Accuracy],
            means[&Dimension::Completeness],
            means[&Dimension::Coherence],
            means[&Dimension::Creativity],
        );
    }
    println!();

    println!("=== Session Metrics ===");
    for run in runs {
        println!(
            "{} / {}: {}/{} turns completed, {:.2}s total, {:.2}s mean latency, {:.0} chars mean response",
            run.conversation.backend_id,
            run.conversation.scenario_name,
            run.metrics.completed_turns,
            run.metrics.num_turns,
            run.metrics.total_duration.as_secs_f64(),
            run.metrics.mean_latency.as_secs_f64(),
            run.metrics.mean_response_length,
        );
    }

    if let Some(best) = report.best() {
        println!();
        println!(
            "Best performing backend: {} with score {:.2}/1.00",
            best.backend_id, best.overall_score
        );
    }
}

fn print_json(report: &ComparisonReport) {
    match serde_json::to_string_pretty(report) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Error serializing report to JSON: {}", e),
    }
}

/// Persist everything a run produced: one transcript per conversation, the
/// evaluation outcomes with the ranked report, and a CSV summary row per
/// conversation.
pub fn save_run_artifacts(
    output_dir: &str,
    runs: &[BackendRun],
    report: &ComparisonReport,
) -> Result<Vec<PathBuf>> {
    let stamp = unix_secs(SystemTime::now());
    let base = Path::new(output_dir);
    let mut written = Vec::new();

    let transcripts = base.join("conversations");
    std::fs::create_dir_all(&transcripts)
        .with_context(|| format!("Failed to create directory: {}", transcripts.display()))?;
    for run in runs {
        let path = transcripts.join(format!(
            "{}_{}_{}.json",
            run.conversation.backend_id, run.conversation.id, stamp
        ));
        write_json(&path, &run.conversation)?;
        written.push(path);
    }

    let evaluations = base.join("evaluations");
    std::fs::create_dir_all(&evaluations)
        .with_context(|| format!("Failed to create directory: {}", evaluations.display()))?;
    let eval_path = evaluations.join(format!("evaluation_results_{stamp}.json"));
    write_json(
        &eval_path,
        &serde_json::json!({
            "report": report,
            "runs": runs,
        }),
    )?;
    written.push(eval_path);

    let csv_path = base.join(format!("summary_{stamp}.csv"));
    std::fs::write(&csv_path, summary_csv(runs))
        .with_context(|| format!("Failed to write summary to: {}", csv_path.display()))?;
    written.push(csv_path);

    Ok(written)
}

/// Persist a single conversation transcript, used by the interactive mode.
pub fn save_transcript(
    output_dir: &str,
    conversation: &crate::models::Conversation,
) -> Result<PathBuf> {
    let dir = Path::new(output_dir).join("conversations");
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
    let path = dir.join(format!(
        "{}_{}_{}.json",
        conversation.backend_id,
        conversation.id,
        unix_secs(conversation.started_at)
    ));
    write_json(&path, conversation)?;
    Ok(path)
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let content =
        serde_json::to_string_pretty(value).context("Failed to serialize results to JSON")?;
    std::fs::write(path, content)
        .with_context(|| format!("Failed to write results to: {}", path.display()))
}

/// Render one summary row per conversation.
fn summary_csv(runs: &[BackendRun]) -> String {
    let mut csv = String::from(
        "id,backend_id,scenario,started_at,ended_at,total_duration_secs,num_turns,completed_turns,mean_latency_secs,mean_response_length\n",
    );
    for run in runs {
        let conversation = &run.conversation;
        csv.push_str(&format!(
            "{},{},{},{},{},{:.2},{},{},{:.2},{:.0}\n",
            conversation.id,
            csv_field(&conversation.backend_id),
            csv_field(&conversation.scenario_name),
            unix_secs(conversation.started_at),
            conversation.ended_at.map(unix_secs).unwrap_or_default(),
            run.metrics.total_duration.as_secs_f64(),
            run.metrics.num_turns,
            run.metrics.completed_turns,
            run.metrics.mean_latency.as_secs_f64(),
            run.metrics.mean_response_length,
        ));
    }
    csv
}

fn csv_field(value: &str) -> String {
    if value.contains(',') || value.contains('"') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn unix_secs(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluation::{EvaluationResult, TurnEvaluation};
    use crate::models::Conversation;
    use crate::report::aggregate;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    fn sample_runs() -> Vec<BackendRun> {
        let scores: BTreeMap<Dimension, f64> =
            Dimension::ALL.iter().map(|d| (*d, 0.8)).collect();
        let mut conversation = Conversation::new("openai", "General Knowledge Test");
        conversation.end();
        let metrics = conversation.metrics();
        vec![BackendRun {
            conversation,
            metrics,
            evaluations: vec![TurnEvaluation::Scored(EvaluationResult::from_scores(
                0, scores,
            ))],
        }]
    }

    #[test]
    fn test_save_run_artifacts_writes_all_files() {
        let dir = tempdir().unwrap();
        let runs = sample_runs();
        let report = aggregate(&runs);

        let written =
            save_run_artifacts(dir.path().to_str().unwrap(), &runs, &report).unwrap();

        // One transcript, one evaluation file, one CSV summary.
        assert_eq!(written.len(), 3);
        for path in &written {
            assert!(path.exists(), "missing artifact {}", path.display());
        }

        let eval_content = std::fs::read_to_string(&written[1]).unwrap();
        assert!(eval_content.contains("ranking"));
        assert!(eval_content.contains("openai"));

        let csv_content = std::fs::read_to_string(&written[2]).unwrap();
        assert!(csv_content.starts_with("id,backend_id,scenario"));
        assert_eq!(csv_content.lines().count(), 2);
    }

    #[test]
    fn test_csv_field_escaping() {
        assert_eq!(csv_field("plain"), "plain");
        assert_eq!(csv_field("a,b"), "\"a,b\"");
        assert_eq!(csv_field("say \"hi\""), "\"say \"\"hi\"\"\"");
    }

    #[test]
    fn test_print_report_does_not_panic() {
        let runs = sample_runs();
        let report = aggregate(&runs);
        print_report(&report, &runs, OutputFormat::Plain);
        print_report(&report, &runs, OutputFormat::Json);
    }

    #[test]
    fn test_print_empty_report() {
        let report = aggregate(&[]);
        print_report(&report, &[], OutputFormat::Plain);
    }
}
