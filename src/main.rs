use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use upload_orchestrator::models::CandidateFile;
use upload_orchestrator::services::api_client::HttpUploadApi;
use upload_orchestrator::services::notifier::LoggingNotifier;
use upload_orchestrator::services::state_storage::FileStateStorage;
use upload_orchestrator::services::transfer::HttpTransfer;
use upload_orchestrator::{QueueConfig, UploadOrchestrator, UploadRecord};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Use the development preset instead of reading the environment
    #[arg(long, global = true)]
    dev: bool,

    /// Override the state file location
    #[arg(long, global = true)]
    state: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upload files and wait until processing finishes
    Upload {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Show the persisted queue
    Status,
    /// Resume status checks left over from a previous run
    Resume,
    /// Cancel everything and forget the queue
    Clear,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "upload_orchestrator=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = if args.dev {
        QueueConfig::development()
    } else {
        QueueConfig::from_env()
    };
    if let Some(state) = args.state {
        config.state_path = state;
    }

    info!(
        "🚀 Upload queue: API={}, Slots={}, State={}",
        config.api_url,
        config.max_concurrent_uploads,
        config.state_path.display()
    );

    let api = Arc::new(HttpUploadApi::from_config(&config)?);
    let transfer = Arc::new(HttpTransfer::new()?);
    let storage = Arc::new(FileStateStorage::new(config.state_path.clone()));
    let orchestrator =
        UploadOrchestrator::new(config, api, transfer, storage, Arc::new(LoggingNotifier));

    match args.command {
        Command::Upload { paths } => {
            orchestrator.restore();

            let mut files = Vec::with_capacity(paths.len());
            for path in &paths {
                match CandidateFile::from_path(path).await {
                    Ok(file) => files.push(file),
                    Err(e) => error!("❌ Skipping {}: {}", path.display(), e),
                }
            }
            if files.is_empty() {
                anyhow::bail!("no readable files given");
            }

            let ids = orchestrator.enqueue(files).await;
            info!("📥 Queued {} files", ids.len());
            wait_or_interrupt(&orchestrator).await;
        }
        Command::Status => {
            // Read only: another process may still be driving these records.
            print_records(&orchestrator.persisted_records());
        }
        Command::Resume => {
            let summary = orchestrator.restore();
            if summary.resumed > 0 {
                wait_or_interrupt(&orchestrator).await;
            } else {
                print_records(&orchestrator.records());
            }
        }
        Command::Clear => {
            orchestrator.teardown();
        }
    }

    Ok(())
}

/// Ctrl+C leaves the persisted queue in place so `resume` can pick it up.
async fn wait_or_interrupt(orchestrator: &UploadOrchestrator) {
    tokio::select! {
        _ = orchestrator.wait_until_settled() => {
            print_records(&orchestrator.records());
            if orchestrator.is_index_sync_pending() {
                info!("🔄 Search index may take a moment to include new files");
            }
        }
        _ = shutdown_signal() => {
            warn!("🛑 Interrupted; run `resume` to continue status checks");
        }
    }
}

fn print_records(records: &[UploadRecord]) {
    if records.is_empty() {
        println!("(queue is empty)");
        return;
    }
    for record in records {
        let detail = match (&record.error, &record.classification) {
            (Some(error), _) => error.as_str(),
            (None, Some(class)) => class.as_str(),
            (None, None) => "",
        };
        println!(
            "{:<36}  {:<10}  {:>3}%  {:<32}  {}",
            record.id.to_string(),
            record.stage.as_str(),
            record.progress,
            record.file_name,
            detail
        );
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("⌨️  Ctrl+C received");
        },
        _ = terminate => {
            info!("💤 SIGTERM received");
        },
    }
}
