use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use cv_intake::artifacts::FsArtifactStore;
use cv_intake::config::AppConfig;
use cv_intake::llm::create_provider;
use cv_intake::notify::SmtpNotifier;
use cv_intake::pipeline::{Pipeline, PipelineDeps, StageName};
use cv_intake::scheduler;
use cv_intake::source::ImapMailSource;
use cv_intake::store::{Database, LibSqlBackend};

#[derive(Debug, Parser)]
#[command(name = "cv-intake")]
#[command(about = "Resume intake, conversion and evaluation pipeline")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the whole pipeline once (default)
    Run,
    /// Run a single stage
    Stage {
        /// ingest, archive, convert, extract, evaluate, invite or report
        name: StageName,
    },
    /// Run the pipeline on the cron schedule until Ctrl-C
    Daemon,
    /// Remove one identifier from the seen-ledger
    Forget { identifier: String },
    /// Empty the seen-ledger
    ResetLedger,
    /// Store an operational setting
    ConfigSet { key: String, value: String },
    /// Store a prompt template from a file
    PromptSet { key: String, file: PathBuf },
}

fn init_tracing(config: &AppConfig) -> Option<WorkerGuard> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("cv_intake=info,info"));
    let stderr = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "cv-intake.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(writer),
                )
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry().with(filter).with(stderr).init();
            None
        }
    }
}

async fn build_pipeline(config: &AppConfig, db: Arc<dyn Database>) -> Result<Pipeline> {
    let llm = create_provider(config.require_llm()?)?;
    let deps = PipelineDeps {
        db,
        artifacts: Arc::new(FsArtifactStore::new(&config.artifact_dir)),
        source: Arc::new(ImapMailSource::new(config.require_imap()?.clone())),
        llm,
        notifier: Arc::new(SmtpNotifier::new(config.require_smtp()?.clone())),
    };
    Ok(Pipeline::new(deps, config.operator_email.clone()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        eprintln!("rustls crypto provider was already installed");
    }

    let config = AppConfig::from_env()?;
    let _log_guard = init_tracing(&config);

    let db: Arc<dyn Database> = Arc::new(
        LibSqlBackend::new_local(&config.db_path)
            .await
            .with_context(|| format!("opening {}", config.db_path.display()))?,
    );

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            let pipeline = build_pipeline(&config, db).await?;
            let summary = pipeline.run_daily().await?;
            for report in &summary.reports {
                println!(
                    "{:<9} eligible={} succeeded={} failed={} skipped={}",
                    report.stage, report.eligible, report.succeeded, report.failed, report.skipped
                );
            }
        }
        Commands::Stage { name } => {
            let pipeline = build_pipeline(&config, db).await?;
            let report = pipeline.run_stage(name).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Daemon => {
            let schedule = scheduler::parse_schedule(&config.schedule)?;
            let pipeline = Arc::new(build_pipeline(&config, db).await?);
            tracing::info!(schedule = %config.schedule, "Daemon started");
            scheduler::run_daemon(pipeline, schedule).await;
        }
        Commands::Forget { identifier } => {
            if db.remove_seen(&identifier).await? {
                println!("Removed {identifier} from the seen-ledger");
            } else {
                println!("{identifier} was not in the seen-ledger");
            }
        }
        Commands::ResetLedger => {
            let removed = db.clear_seen().await?;
            println!("Cleared {removed} identifiers from the seen-ledger");
        }
        Commands::ConfigSet { key, value } => {
            db.put_config(&key, &value).await?;
            println!("Stored {key}");
        }
        Commands::PromptSet { key, file } => {
            let template = std::fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            db.put_prompt(&key, &template).await?;
            println!("Stored prompt {key} ({} bytes)", template.len());
        }
    }

    Ok(())
}
