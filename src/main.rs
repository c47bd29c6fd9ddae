use std::process::ExitCode;
use std::sync::Arc;

use chrono::Utc;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use taskhive::cli::{Cli, Commands, QueueKind};
use taskhive::config::{HiveConfig, HivePaths};
use taskhive::engine::Engine;
use taskhive::error::{HiveError, Result};
use taskhive::gates::CommandExecutor;
use taskhive::queue::{ActionQueue, CommitmentQueue};
use taskhive::store::{GhStore, RepoRef};
use taskhive::workspace::WorkspaceRegistry;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("taskhive=debug")
    } else {
        EnvFilter::new("taskhive=info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).without_time())
        .with(filter)
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    let paths = HivePaths::new(&cli.root);

    if let Commands::Init = cli.command {
        paths.init().await?;
        HiveConfig::default().save(&paths.data_dir).await?;
        println!("Initialized {}", paths.data_dir.display());
        return Ok(());
    }

    if !paths.is_initialized() {
        return Err(HiveError::NotInitialized);
    }
    let config = HiveConfig::load(&paths.data_dir).await?;

    match cli.command {
        Commands::Init => unreachable!("handled above"),
        Commands::Watch { slug } => {
            let repo = RepoRef::parse(&slug)
                .ok_or_else(|| HiveError::Config(format!("not an owner/repo slug: {}", slug)))?;
            let registry = WorkspaceRegistry::open(&paths.registry_path).await?;
            registry.watch(&repo, Utc::now()).await?;
            println!("Watching {}", repo);
        }
        Commands::Unwatch { slug } => {
            let registry = WorkspaceRegistry::open(&paths.registry_path).await?;
            registry.unwatch(&slug).await?;
            println!("Unwatched {}", slug);
        }
        Commands::Status => {
            let registry = WorkspaceRegistry::open(&paths.registry_path).await?;
            let actions = ActionQueue::open(&paths.actions_path, config.queue.clone()).await?;
            let commitments =
                CommitmentQueue::open(&paths.commitments_path, config.queue.clone()).await?;

            println!("Workspaces ({}):", registry.len());
            for record in registry.all() {
                let phase = if record.finished_sentinel.is_some() {
                    "finished"
                } else if record.active_plan_issues.is_empty() {
                    "idle"
                } else {
                    "active"
                };
                println!(
                    "  {}  {}  plans: {}  last polled: {}",
                    record.slug(),
                    phase,
                    record.active_plan_issues.len(),
                    record
                        .last_polled
                        .map(|t| t.to_rfc3339())
                        .unwrap_or_else(|| String::from("never")),
                );
            }
            println!("Queued actions: {}", actions.all().len());
            println!("Commitments: {}", commitments.all().len());
        }
        Commands::Poll => {
            let store = Arc::new(GhStore::new(&config.store));
            let executor = Arc::new(CommandExecutor::new(&config.agent));
            let engine = Engine::new(config, paths, store, executor).await?;
            let report = engine.poll_cycle().await?;
            println!(
                "Polled {} workspaces ({} failed): {} attempted, {} published, {} merged, {} recovered, {} sentinels, {} replies sent",
                report.workspaces_polled,
                report.workspaces_failed,
                report.tasks_attempted,
                report.tasks_published,
                report.tasks_merged,
                report.tasks_recovered,
                report.sentinels_created,
                report.actions_sent,
            );
        }
        Commands::Queue { kind } => match kind {
            QueueKind::Actions => {
                let actions = ActionQueue::open(&paths.actions_path, config.queue.clone()).await?;
                for action in actions.all() {
                    println!(
                        "{}  {:?}  {:?}  attempts: {}  {}",
                        action.id, action.priority, action.status, action.attempt_count, action.target,
                    );
                }
            }
            QueueKind::Commitments => {
                let commitments =
                    CommitmentQueue::open(&paths.commitments_path, config.queue.clone()).await?;
                for commitment in commitments.all() {
                    println!(
                        "{}  {:?}  attempts: {}  {}  {}",
                        commitment.id,
                        commitment.status,
                        commitment.attempt_count,
                        commitment.source_thread,
                        commitment.description,
                    );
                }
            }
        },
    }

    Ok(())
}
