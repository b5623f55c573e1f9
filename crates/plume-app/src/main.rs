use std::process;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{filter::LevelFilter, fmt};

use plume_app::config;
use plume_app::error::AppError;
use plume_app::paths::AppPaths;
use plume_app::pipeline::PipelineContext;
use plume_app::server;
use plume_app::services::engine::{CorrectionEngine, OpenAiChatEngine};
use plume_app::services::jobs::CorrectionJobStore;
use plume_app::services::storage::CorrectionResultStore;

#[derive(Debug, Parser)]
#[command(name = "plume", about = "Manuscript correction service", version)]
struct Cli {
    /// Increase log verbosity (-v for debug, -vv for trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the HTTP correction service.
    Serve,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(determine_log_level(&cli));

    if let Err(err) = run(cli).await {
        eprintln!("{err}");
        process::exit(1);
    }
}

fn determine_log_level(cli: &Cli) -> LevelFilter {
    match cli.verbose {
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    }
}

fn init_tracing(level: LevelFilter) {
    let subscriber = fmt().with_max_level(level).with_target(false).finish();

    if tracing::subscriber::set_global_default(subscriber).is_err() {
        tracing::warn!("Tracing subscriber already set; skipping re-initialization.");
    }
}

async fn run(cli: Cli) -> Result<(), AppError> {
    match cli.command {
        Commands::Serve => {
            let config = config::load()?;
            let paths = AppPaths::new(&config.storage.path)?;
            let jobs = Arc::new(CorrectionJobStore::open(&paths)?);
            let results = Arc::new(CorrectionResultStore::open(&paths)?);
            let engine: Arc<dyn CorrectionEngine> =
                Arc::new(OpenAiChatEngine::from_env(&config.engine)?);

            let state = Arc::new(PipelineContext {
                engine,
                jobs,
                results,
                config,
            });
            server::serve(state).await?;
            Ok(())
        }
    }
}
