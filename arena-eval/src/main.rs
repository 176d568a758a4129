//! Arena evaluation CLI

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use arena_eval::{
    config::Config,
    pipeline::{read_snapshot, reduce, Pipeline, CHECKPOINT_FILE},
    queries::load_queries_from_file,
    reporting::print_console_report,
};

#[derive(Parser)]
#[command(name = "arena-eval")]
#[command(about = "Pairwise comparative evaluation of LLM endpoints with a model judge")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Save all result artifacts, including evaluation_results.json
    #[arg(long)]
    save: bool,

    /// Discard any stored checkpoint and start over
    #[arg(long)]
    fresh: bool,

    /// JSON file of queries to evaluate instead of generating them
    #[arg(long = "queries_file")]
    queries_file: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Recompute the result from a stored checkpoint, without network calls
    Analyze {
        /// Run directory or checkpoint file
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Generate sample configuration
    InitConfig {
        /// Output path for configuration file
        #[arg(short, long, default_value = "config/arena.toml")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("arena_eval=debug,info")
    } else {
        EnvFilter::new("arena_eval=info,warn")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .init();

    let outcome = match &cli.command {
        Some(Commands::Analyze { input }) => analyze(input, cli.config.as_deref()),
        Some(Commands::InitConfig { output }) => init_config(output),
        None => run_evaluation(&cli).await,
    };

    if let Err(e) = outcome {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run_evaluation(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load(cli.config.as_deref())?;

    println!("=== Arena Evaluation ===");
    println!("Run ID:    {}", config.output.run_id);
    println!("Endpoints: {}", config.endpoint_ids().join(", "));
    if cli.fresh {
        println!("Mode:      fresh (stored checkpoint discarded)");
    }
    println!();

    let mut builder = Pipeline::builder(config).save_artifacts(cli.save);
    if let Some(path) = &cli.queries_file {
        let queries = load_queries_from_file(path)?;
        println!("Loaded {} queries from {}", queries.len(), path.display());
        builder = builder.queries(queries);
    }
    let pipeline = builder.build()?;

    let outcome = pipeline.evaluate(cli.fresh).await?;
    print_console_report(&pipeline.config().task.description, &outcome.result);

    if cli.save {
        println!(
            "\nResults saved to: {}",
            Path::new(&pipeline.config().output.output_dir)
                .join(&pipeline.config().output.run_id)
                .display()
        );
    }
    Ok(())
}

fn analyze(input: &Path, config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let checkpoint = if input.is_dir() {
        input.join(CHECKPOINT_FILE)
    } else {
        input.to_path_buf()
    };
    println!("Analyzing checkpoint: {}", checkpoint.display());

    // Position bias and tie handling come from the config when one is given
    let config = match config_path {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };

    let snapshot = read_snapshot(&checkpoint)?;
    snapshot
        .validate(&snapshot.run_id)
        .map_err(|reason| format!("checkpoint {} is inconsistent: {}", checkpoint.display(), reason))?;

    println!("Stage: {}", snapshot.stage);
    if snapshot.comparisons.is_empty() {
        println!("No comparisons recorded yet; the run has not reached the judging stage.");
    }

    let result = reduce(&snapshot, &config);
    let label = match config_path {
        Some(_) => config.task.description.clone(),
        None => format!("run {}", snapshot.run_id),
    };
    print_console_report(&label, &result);
    Ok(())
}

fn init_config(output: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::default();

    // Ensure parent directory exists
    if let Some(parent) = output.parent() {
        std::fs::create_dir_all(parent)?;
    }

    config.save_toml(output)?;
    println!("Configuration written to: {}", output.display());
    Ok(())
}
