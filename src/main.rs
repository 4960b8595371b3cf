use anyhow::Context;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;

mod backend;
mod config;
mod error;
mod evaluation;
mod models;
mod output;
mod report;
mod runner;
mod session;

use crate::backend::ProxySettings;
use crate::config::Config;
use crate::models::{BatchCase, Scenario};
use crate::output::OutputFormat;
use crate::runner::Runner;

const DEFAULT_PROMPT: &str = "What are the benefits of artificial intelligence?";

#[derive(Debug, Clone, ValueEnum)]
enum Mode {
    /// Stdin-driven conversation with one backend
    Interactive,
    /// One prompt against every selected backend
    Compare,
    /// A file of standalone prompts against every selected backend
    Batch,
    /// Multi-turn scenarios against every selected backend
    MultiTurn,
}

/// Benchmark conversational AI backends against shared multi-turn scenarios
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Mode to run
    #[arg(value_enum, default_value = "interactive")]
    mode: Mode,

    /// Path to the TOML run configuration
    #[arg(short, long, default_value = "convbench.toml")]
    config: PathBuf,

    /// Backend to drive: `all` or one backend id from the config
    #[arg(short, long, default_value = "all")]
    backend: String,

    /// Text prompt for the interactive and compare modes
    #[arg(short, long)]
    prompt: Option<String>,

    /// URI of an image to include with the prompt
    #[arg(short, long)]
    image: Option<String>,

    /// JSON file with batch test cases or multi-turn scenarios
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// HTTP proxy, overrides HTTP_PROXY from the environment
    #[arg(long)]
    http_proxy: Option<String>,

    /// HTTPS proxy, overrides HTTPS_PROXY from the environment
    #[arg(long)]
    https_proxy: Option<String>,

    /// Output format: plain or json
    #[arg(short, long, default_value = "plain")]
    output: OutputFormat,

    /// Verbose output - show per-turn progress
    #[arg(short, long)]
    verbose: bool,
}

fn resolve_proxy(args: &Args) -> ProxySettings {
    let proxy = ProxySettings {
        http: args
            .http_proxy
            .clone()
            .or_else(|| std::env::var("HTTP_PROXY").ok()),
        https: args
            .https_proxy
            .clone()
            .or_else(|| std::env::var("HTTPS_PROXY").ok()),
    };

    // Export so clients built from ambient configuration pick the proxy up
    // too. Called before the runtime starts, while main is still the only
    // thread.
    if let Some(http) = &proxy.http {
        unsafe {
            std::env::set_var("HTTP_PROXY", http);
        }
    }
    if let Some(https) = &proxy.https {
        unsafe {
            std::env::set_var("HTTPS_PROXY", https);
        }
    }

    if !proxy.is_empty() {
        println!(
            "Using proxies: http={:?} https={:?}",
            proxy.http, proxy.https
        );
    }
    proxy
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let proxy = resolve_proxy(&args);
    let config = Config::from_file(&args.config)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?
        .block_on(run(args, config, proxy))
}

async fn run(args: Args, config: Config, proxy: ProxySettings) -> anyhow::Result<()> {
    let runner = Runner::new(config, proxy, args.verbose);

    match args.mode {
        Mode::Interactive => {
            runner
                .run_interactive(&args.backend, args.prompt, args.image)
                .await?;
        }
        Mode::Compare => {
            let prompt = args.prompt.as_deref().unwrap_or(DEFAULT_PROMPT);
            let outcome = runner
                .run_compare(&args.backend, prompt, args.image)
                .await?;
            output::print_report(&outcome.report, &outcome.runs, args.output);
        }
        Mode::Batch => {
            let cases = match &args.file {
                Some(path) => BatchCase::load_file(path)?,
                None => BatchCase::default_cases(),
            };
            let outcome = runner.run_batch(&args.backend, cases).await?;
            output::print_report(&outcome.report, &outcome.runs, args.output);
        }
        Mode::MultiTurn => {
            let scenarios = match &args.file {
                Some(path) => Scenario::load_file(path)?,
                None => Scenario::default_suite(),
            };
            let outcome = runner.run_scenarios(&args.backend, scenarios).await?;
            output::print_report(&outcome.report, &outcome.runs, args.output);
        }
    }

    Ok(())
}
