//! pr-reconciler CLI
//!
//! Keeps tracked pull requests conflict-free and review-clean.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use pr_reconciler::{
    AgentExecutor, Collaborators, Config, GhCli, NotifierSink, ProtectedBranches, Reconciler,
    Scheduler, StateStore,
};

/// Pull request reconciler - resolves conflicts and addresses reviews once per change
#[derive(Parser)]
#[command(name = "pr-reconciler")]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to $PR_RECONCILER_CONFIG or the user config dir)
    #[arg(long, env = "PR_RECONCILER_CONFIG")]
    config: Option<PathBuf>,

    /// Run a single cycle and exit
    #[arg(long)]
    once: bool,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[derive(Clone, Copy, Default, ValueEnum)]
enum LogFormat {
    #[default]
    Text,
    Json,
}

fn init_tracing(verbose: bool, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("pr_reconciler=debug,notify=debug,info")
        } else {
            EnvFilter::new("pr_reconciler=info,notify=info,warn")
        }
    });

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry.with(fmt::layer()).init(),
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_format);

    let config_path = match cli.config {
        Some(path) => path,
        None => Config::default_path()?,
    };
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load configuration from {}", config_path.display()))?;

    info!(
        config = %config_path.display(),
        state_file = %config.state_file.display(),
        repositories = config.repositories.len(),
        tracked_items = config.tracked_items.len(),
        "Starting pr-reconciler"
    );

    let gh = Arc::new(GhCli::new(&config));
    let executor =
        AgentExecutor::new(config.agent.clone()).context("Failed to initialize agent executor")?;
    let collaborators = Collaborators {
        status: gh.clone(),
        comments: gh.clone(),
        executor: Arc::new(executor),
        drafts: gh.clone(),
        notifier: Arc::new(NotifierSink::new(notify::Notifier::from_env())),
        discovery: gh,
    };

    let reconciler = Reconciler::new(
        collaborators,
        ProtectedBranches::new(&config.protected_branches),
        config.state_file.clone(),
    );
    let mut store = StateStore::load(&config.state_file);

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            shutdown_signal().await;
            cancel.cancel();
        }
    });

    if cli.once {
        let report = reconciler.run_cycle(&mut store, &cancel).await;
        if report.failed() > 0 {
            error!(failed = report.failed(), "Some items failed this cycle");
        }
    } else {
        Scheduler::new(reconciler, config.poll_interval())
            .run(&mut store, cancel)
            .await;
    }

    info!("pr-reconciler stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
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
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C, finishing current item and shutting down"),
        () = terminate => info!("Received SIGTERM, finishing current item and shutting down"),
    }
}
