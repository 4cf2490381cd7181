//! RAG Judge Eval CLI
//!
//! Prediction-powered RAG pipeline scoring

use clap::{Parser, Subcommand};
use rag_judge_eval::{ScorerProvider, ScoringConfig, ScoringReport, ScoringRunner};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rag-judge-eval")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a scoring pass over the configured test sets
    Evaluate {
        /// Scoring configuration file (YAML)
        #[arg(long, default_value = "scoring.yaml")]
        config: String,

        /// Override the LLM judge identifier
        #[arg(long)]
        llm_judge: Option<String>,

        /// Override the human gold label table
        #[arg(long)]
        gold_label_path: Option<String>,

        /// Write the results as JSON to this path
        #[arg(long)]
        output: Option<String>,

        /// Override the resampling seed
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Render a persisted scoring report
    Report {
        /// Input report file (JSON)
        #[arg(long)]
        input: String,
    },
}

fn main() {
    let cli = Cli::parse();

    let fallback = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)),
        )
        .init();

    if cli.verbose {
        tracing::info!("Verbose mode enabled");
    }

    match cli.command {
        Commands::Evaluate {
            config,
            llm_judge,
            gold_label_path,
            output,
            seed,
        } => {
            tracing::info!(
                config = %config,
                llm_judge = ?llm_judge,
                output = ?output,
                "Starting scoring run"
            );

            let mut scoring_config = match ScoringConfig::load(&config) {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("Failed to load configuration: {e}");
                    std::process::exit(1);
                }
            };
            if let Some(judge) = llm_judge {
                scoring_config.llm_judge = Some(judge);
            }
            if let Some(path) = gold_label_path {
                scoring_config.gold_label_path = Some(path.into());
            }
            if let Some(seed) = seed {
                scoring_config.seed = seed;
            }
            if cli.verbose {
                scoring_config.debug_mode = true;
            }

            let mut provider = ScorerProvider::new();
            if scoring_config.local_server {
                provider = provider.with_local_server(scoring_config.host_url.clone());
            }

            let aggregator = match ScoringRunner::new(scoring_config, provider).run() {
                Ok(aggregator) => aggregator,
                Err(e) => {
                    eprintln!("Scoring run failed: {e}");
                    std::process::exit(1);
                }
            };

            if aggregator.is_empty() {
                eprintln!("No task produced a result");
                std::process::exit(1);
            }
            println!("{}", aggregator.to_table());

            if let Some(path) = output {
                if let Err(e) = aggregator.write_json(&path) {
                    eprintln!("Failed to write results: {e}");
                    std::process::exit(1);
                }
                println!("Results written to {path}");
            }
        }
        Commands::Report { input } => {
            tracing::info!(input = %input, "Rendering report");

            match ScoringReport::load(&input) {
                Ok(report) => {
                    println!(
                        "Generated: {} (v{})",
                        report.metadata.generated_at, report.metadata.framework_version
                    );
                    println!("{}", report.to_table());
                }
                Err(e) => {
                    eprintln!("Failed to load report: {e}");
                    std::process::exit(1);
                }
            }
        }
    }
}
