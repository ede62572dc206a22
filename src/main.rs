use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use roadwatch::auth::LockoutPolicy;
use roadwatch::auth::{AccountStore, SessionManager};
use roadwatch::sync::{HttpRecordSource, Reconciler, ReportStore};
use roadwatch::{Config, PolicyStore};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "roadwatch", version, about = "Citizen road-repair tracker core")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "roadwatch.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Pull the remote report snapshot into the local store.
    Sync {
        #[command(subcommand)]
        action: SyncAction,
    },
    /// Show or change the security policy.
    Policy {
        #[command(subcommand)]
        action: PolicyAction,
    },
    /// Account administration.
    Account {
        #[command(subcommand)]
        action: AccountAction,
    },
    /// Session ledger maintenance.
    Sessions {
        #[command(subcommand)]
        action: SessionAction,
    },
}

#[derive(Subcommand)]
enum SyncAction {
    /// Run one reconciliation and print the outcome.
    Run,
    /// Fetch and print the remote snapshot without applying it.
    Preview,
    /// Show local store counters.
    Status,
}

#[derive(Subcommand)]
enum PolicyAction {
    /// Print the current policy.
    Show,
    /// Update one or both policy fields.
    Set {
        /// Session lifetime in minutes (1..=1440).
        #[arg(long)]
        session_duration: Option<u32>,
        /// Failed-login ceiling before lockout (1..=10).
        #[arg(long)]
        max_attempts: Option<u32>,
    },
}

#[derive(Subcommand)]
enum AccountAction {
    /// Clear the failure counter and lock flag for an email.
    Unlock { email: String },
}

#[derive(Subcommand)]
enum SessionAction {
    /// Delete expired session rows once.
    Sweep,
    /// Run the periodic sweeper until interrupted.
    Watch,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;
    std::fs::create_dir_all(&config.store.data_dir)
        .with_context(|| format!("creating data dir {}", config.store.data_dir.display()))?;

    match cli.command {
        Command::Sync { action } => run_sync(&config, action).await,
        Command::Policy { action } => run_policy(&config, action),
        Command::Account { action } => run_account(&config, action),
        Command::Sessions { action } => run_sessions(&config, action).await,
    }
}

async fn run_sync(config: &Config, action: SyncAction) -> Result<()> {
    let store = Arc::new(ReportStore::open(&config.reports_db())?);
    let source = Arc::new(HttpRecordSource::new(
        &config.records.base_url,
        &config.records.path,
    ));
    let reconciler = Reconciler::new(source, store.clone())
        .with_deadline(Duration::from_secs(config.records.deadline_secs));

    match action {
        SyncAction::Run => {
            let report = reconciler.run().await;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.success {
                std::process::exit(1);
            }
        }
        SyncAction::Preview => {
            let preview = reconciler
                .preview()
                .await
                .context("fetching remote snapshot")?;
            println!("{}", serde_json::to_string_pretty(&preview)?);
        }
        SyncAction::Status => {
            println!("local reports: {}", store.count()?);
            println!("awaiting push: {}", store.dirty_reports()?.len());
        }
    }
    Ok(())
}

fn run_policy(config: &Config, action: PolicyAction) -> Result<()> {
    let policy = PolicyStore::open(&config.policy_db())?;
    match action {
        PolicyAction::Show => {
            let current = policy.get()?;
            println!("session duration: {} min", current.session_duration_minutes);
            println!("max failed attempts: {}", current.max_failed_attempts);
        }
        PolicyAction::Set {
            session_duration,
            max_attempts,
        } => {
            let updated = policy.update(session_duration, max_attempts)?;
            println!(
                "policy updated: {} min / {} attempts",
                updated.session_duration_minutes, updated.max_failed_attempts
            );
        }
    }
    Ok(())
}

fn run_account(config: &Config, action: AccountAction) -> Result<()> {
    let accounts = Arc::new(AccountStore::open(&config.accounts_db())?);
    let policy = Arc::new(PolicyStore::open(&config.policy_db())?);
    let lockout = LockoutPolicy::new(accounts, policy);

    match action {
        AccountAction::Unlock { email } => {
            lockout.reset_attempts(&email)?;
            println!("unlocked {email}");
        }
    }
    Ok(())
}

async fn run_sessions(config: &Config, action: SessionAction) -> Result<()> {
    let policy = Arc::new(PolicyStore::open(&config.policy_db())?);
    let sessions = Arc::new(SessionManager::open(&config.sessions_db(), policy)?);

    match action {
        SessionAction::Sweep => {
            let removed = sessions.sweep_expired()?;
            println!("removed {removed} expired sessions");
        }
        SessionAction::Watch => {
            let interval = Duration::from_secs(config.session.sweep_interval_secs);
            println!("sweeping every {}s; Ctrl-C to stop", interval.as_secs());
            sessions.spawn_sweeper(interval).await?;
        }
    }
    Ok(())
}
