// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use offsync::config::{default_data_dir, Config, SharedConfig};
use offsync::monitor::{
    subscribe, AssumeReachable, HttpReachability, LinkHint, MonitorSubscription, QualityMonitor,
    QualityProbe, StaticLink, SystemLink,
};
use offsync::store::{evict, LocalStore, Outcome, Trigger};
use offsync::sync::{
    AutoSync, CatalogSource, CommitOutcome, FileCatalog, HttpCatalog, HttpRelay, NoopRelay,
    SessionRelay, StartOutcome, StaticCatalog, SyncOrchestrator, SyncState,
};
use offsync::types::{Category, Sensitivity};
use offsync::utils::format_bytes;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Exit codes following sysexits.h conventions
mod exit_codes {
    /// General error
    pub const ERROR: i32 = 1;
    /// Service unavailable - policy or network refused the sync
    pub const SERVICE_UNAVAILABLE: i32 = 69;
}

/// offsync - Keep a local, searchable copy of a remote content catalog.
#[derive(Parser)]
#[command(name = "offsync")]
#[command(version = VERSION)]
#[command(about = "Offline content sync that respects your link and your disk.")]
#[command(long_about = "offsync - Offline content synchronization\n\n\
    Sync now:            offsync sync --catalog https://example.com/catalog.json\n\
    See what's cached:   offsync status\n\
    Find something:      offsync search design\n\
    Check the link:      offsync probe\n\
    Configure:           offsync config show")]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Data directory (defaults to ~/.offsync)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Verbose mode: debug logging
    #[arg(short = 'v', long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Download new and updated items, then commit them
    ///
    /// Examples:
    ///   offsync sync
    ///   offsync sync --catalog ./catalog.json --link wifi
    ///   offsync sync --no-commit
    Sync {
        /// Catalog file path or http(s) URL (defaults to the configured one)
        #[arg(short, long)]
        catalog: Option<String>,
        /// Download into the staging buffer only
        #[arg(long)]
        no_commit: bool,
        /// Assume this link type instead of probing (ethernet, wifi, 5g, 4g, 3g, 2g)
        #[arg(long)]
        link: Option<LinkHint>,
    },

    /// Run the auto-sync scheduler until interrupted
    Daemon {
        /// Catalog file path or http(s) URL (defaults to the configured one)
        #[arg(short, long)]
        catalog: Option<String>,
    },

    /// Show storage usage and the last sync
    #[command(alias = "s")]
    Status,

    /// Search cached items by title, excerpt or category
    Search {
        /// Text to look for (empty lists everything)
        #[arg(default_value = "")]
        query: String,
    },

    /// Show the sync activity log
    Logs {
        /// Number of entries
        #[arg(short = 'n', long, default_value = "10")]
        count: usize,
    },

    /// Evict the oldest items until the cache fits the budget
    Evict {
        /// Budget in MB (defaults to the configured one)
        #[arg(long)]
        budget_mb: Option<u64>,
    },

    /// Remove every cached item
    Clear,

    /// Sample the network once
    Probe {
        /// Assume this link type instead of reading the system
        #[arg(long)]
        link: Option<LinkHint>,
    },

    /// Configure settings
    ///
    /// Examples:
    ///   offsync config show
    ///   offsync config set-budget 250
    ///   offsync config set-wifi-only true
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Storage budget in MB
    SetBudget { mb: u64 },
    /// Refuse metered links
    SetWifiOnly {
        #[arg(action = clap::ArgAction::Set)]
        enabled: bool,
    },
    /// Transfer sensitivity (low, balanced, high)
    SetSensitivity { sensitivity: Sensitivity },
    SetAutoPause {
        #[arg(action = clap::ArgAction::Set)]
        enabled: bool,
    },
    SetAutoResume {
        #[arg(action = clap::ArgAction::Set)]
        enabled: bool,
    },
    SetAutoSync {
        #[arg(action = clap::ArgAction::Set)]
        enabled: bool,
    },
    /// Catalog attempts per sync
    SetRetries { attempts: u32 },
    /// Default catalog location (omit to clear)
    SetCatalogUrl { url: Option<String> },
    /// Categories to sync (none means all)
    SetCategories { categories: Vec<Category> },
    /// Download priority for a category (higher first)
    SetPriority { category: Category, priority: u8 },
}

fn init_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::WARN };
    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let data_dir = cli.data_dir.unwrap_or_else(default_data_dir);
    let config = Config::load(&data_dir)?;

    match cli.command {
        Commands::Sync { catalog, no_commit, link } => {
            let runtime = tokio::runtime::Runtime::new().context("Failed to create Tokio runtime")?;
            runtime.block_on(run_sync(&data_dir, config, catalog, no_commit, link))
        }
        Commands::Daemon { catalog } => {
            let runtime = tokio::runtime::Runtime::new().context("Failed to create Tokio runtime")?;
            runtime.block_on(run_daemon(&data_dir, config, catalog))
        }
        Commands::Probe { link } => {
            let runtime = tokio::runtime::Runtime::new().context("Failed to create Tokio runtime")?;
            runtime.block_on(async {
                let quality = build_probe(&config, link).sample().await;
                println!("{} {}", "[~]".cyan(), quality);
                Ok::<(), anyhow::Error>(())
            })
        }
        Commands::Status => show_status(&data_dir, &config),
        Commands::Search { query } => search(&data_dir, &query),
        Commands::Logs { count } => show_logs(&data_dir, count),
        Commands::Evict { budget_mb } => {
            let store = LocalStore::open(&data_dir)?;
            let budget_mb = budget_mb.unwrap_or(config.storage_budget_mb);
            let evicted = evict(&store, budget_mb)?;
            println!("{} Evicted {} item(s) to fit {} MB", "[OK]".green(), evicted, budget_mb);
            Ok(())
        }
        Commands::Clear => {
            let store = LocalStore::open(&data_dir)?;
            let sync = SyncOrchestrator::builder(store, Arc::new(StaticCatalog::default()), SharedConfig::new(config))
                .build();
            let removed = sync.clear_cache(Trigger::Manual)?;
            println!("{} Removed {} cached item(s)", "[OK]".green(), removed);
            Ok(())
        }
        Commands::Config { command } => handle_config(&data_dir, config, command.unwrap_or(ConfigCommands::Show)),
    }
}

fn build_probe(config: &Config, link: Option<LinkHint>) -> Arc<dyn QualityProbe> {
    match link {
        Some(hint) => Arc::new(QualityMonitor::new(
            Arc::new(StaticLink::new(true, hint)),
            Arc::new(AssumeReachable(true)),
        )),
        None => Arc::new(QualityMonitor::new(
            Arc::new(SystemLink::new()),
            Arc::new(HttpReachability::new(config.probe_url.clone())),
        )),
    }
}

fn build_catalog(config: &Config, catalog: Option<String>) -> Result<Arc<dyn CatalogSource>> {
    let location = catalog
        .or_else(|| config.catalog_url.clone())
        .context("No catalog configured. Pass --catalog or run: offsync config set-catalog-url <url>")?;
    if location.starts_with("http://") || location.starts_with("https://") {
        Ok(Arc::new(
            HttpCatalog::new(location).with_max_bytes(config.max_catalog_mb.saturating_mul(1024 * 1024)),
        ))
    } else {
        Ok(Arc::new(FileCatalog::new(location)))
    }
}

fn build_relay(config: &Config) -> Arc<dyn SessionRelay> {
    match &config.relay_url {
        Some(url) => Arc::new(HttpRelay::new(url.clone())),
        None => Arc::new(NoopRelay),
    }
}

async fn build_orchestrator(
    data_dir: &Path,
    config: Config,
    catalog: Option<String>,
    link: Option<LinkHint>,
) -> Result<(SyncOrchestrator, MonitorSubscription)> {
    let store = LocalStore::open(data_dir)?;
    let catalog = build_catalog(&config, catalog)?;
    let relay = build_relay(&config);
    let interval = Duration::from_secs(config.probe_interval_secs.max(1));
    let monitor = subscribe(build_probe(&config, link), interval).await;

    let sync = SyncOrchestrator::builder(store, catalog, SharedConfig::new(config))
        .relay(relay)
        .quality(monitor.latest())
        .build();
    Ok((sync, monitor))
}

async fn run_sync(
    data_dir: &Path,
    config: Config,
    catalog: Option<String>,
    no_commit: bool,
    link: Option<LinkHint>,
) -> Result<()> {
    use indicatif::{ProgressBar, ProgressStyle};

    let (sync, monitor) = build_orchestrator(data_dir, config, catalog, link).await?;
    println!("{} Network: {}", "[~]".cyan(), monitor.latest());
    let monitor_task = sync.attach_monitor(monitor.receiver());

    match sync.start().await {
        StartOutcome::Started { queued } => {
            println!("{} {} item(s) to download", "[↓]".yellow(), queued);
        }
        StartOutcome::NothingToSync => {
            println!("{} Already up to date", "[OK]".green());
            return Ok(());
        }
        StartOutcome::Rejected(reason) => {
            eprintln!("{} {}", "[X]".red(), reason);
            std::process::exit(exit_codes::SERVICE_UNAVAILABLE);
        }
        other => {
            eprintln!("{} Sync did not start: {:?}", "[!]".yellow(), other);
            return Ok(());
        }
    }

    let mut handle = sync.subscribe();
    let pb = ProgressBar::new(handle.progress().queue_len as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("  {spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} | {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▓░"),
    );
    pb.enable_steady_tick(Duration::from_millis(100));

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let finished = loop {
        tokio::select! {
            changed = handle.changed() => {
                let Some(progress) = changed else { break sync.progress() };
                pb.set_position(progress.cursor as u64);
                let msg = match progress.state {
                    SyncState::Paused => "paused, waiting for a better link".to_string(),
                    _ => match (progress.speed_string(), progress.eta_string()) {
                        (Some(speed), Some(eta)) => format!("{} | ETA {}", speed, eta),
                        _ => progress.state.to_string(),
                    },
                };
                pb.set_message(msg);
                if matches!(progress.state, SyncState::Completed | SyncState::Stopped | SyncState::Idle) {
                    break progress;
                }
            }
            _ = &mut ctrl_c => {
                sync.stop();
                pb.abandon_with_message("stopped");
                println!("{} Stopped; nothing from this session was saved", "[!]".yellow());
                monitor_task.abort();
                return Ok(());
            }
        }
    };
    pb.finish_and_clear();
    monitor_task.abort();

    if finished.state != SyncState::Completed {
        println!("{} Session ended in state {}", "[!]".yellow(), finished.state);
        return Ok(());
    }
    if no_commit {
        println!(
            "{} Downloaded {} item(s); not committed (--no-commit)",
            "[~]".cyan(),
            finished.buffered
        );
        return Ok(());
    }

    match sync.commit(Trigger::Manual) {
        Ok(CommitOutcome::Committed { items, evicted }) => {
            println!("{} Saved {} item(s)", "[OK]".green(), items);
            if evicted > 0 {
                println!("{} Evicted {} old item(s) to stay within budget", "[~]".cyan(), evicted);
            }
            Ok(())
        }
        Ok(CommitOutcome::NothingToCommit) => {
            println!("{} Nothing to save", "[~]".cyan());
            Ok(())
        }
        Err(e) => {
            eprintln!("{} Could not save: {}", "[X]".red(), e);
            std::process::exit(exit_codes::ERROR);
        }
    }
}

async fn run_daemon(data_dir: &Path, config: Config, catalog: Option<String>) -> Result<()> {
    if !config.auto_sync {
        println!(
            "{} auto_sync is off; the scheduler will idle until it is enabled (offsync config set-auto-sync true)",
            "[!]".yellow()
        );
    }
    let interval = config.auto_sync_interval_secs;
    let (sync, monitor) = build_orchestrator(data_dir, config, catalog, None).await?;
    let monitor_task = sync.attach_monitor(monitor.receiver());

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let scheduler = AutoSync::new(sync).spawn(shutdown_rx);
    println!("{} Auto-sync every {}s. Ctrl+C to exit.", "[~]".cyan(), interval);

    tokio::signal::ctrl_c().await.context("Failed to listen for Ctrl+C")?;
    shutdown_tx.send_replace(true);
    scheduler.await.context("Auto-sync task failed")?;
    monitor_task.abort();
    Ok(())
}

fn show_status(data_dir: &Path, config: &Config) -> Result<()> {
    let store = LocalStore::open(data_dir)?;
    let quota_bytes = config.storage_budget_mb.saturating_mul(1024 * 1024);
    let stats = store.storage_stats(Some(quota_bytes))?;

    println!("{}", "offsync status".bold());
    println!("  Items:     {} ({} KB estimated)", stats.item_count, stats.total_kb);
    println!(
        "  Storage:   {} of {} ({:.1}%)",
        stats.used,
        format_bytes(quota_bytes),
        stats.percent_used
    );
    for (category, count) in &stats.per_category {
        println!("    {:<12} {}", category, count);
    }

    match store.recent_logs(1)?.first() {
        Some(entry) => {
            let outcome = match entry.outcome {
                Outcome::Success => entry.outcome.as_str().green(),
                Outcome::Failed => entry.outcome.as_str().red(),
            };
            println!(
                "  Last sync: {} {} - {}",
                entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
                outcome,
                entry.detail
            );
        }
        None => println!("  Last sync: {}", "never".dimmed()),
    }
    Ok(())
}

fn search(data_dir: &Path, query: &str) -> Result<()> {
    let store = LocalStore::open(data_dir)?;
    let mut hits = store.search(query)?;
    hits.sort_by(|a, b| a.title.cmp(&b.title));
    if hits.is_empty() {
        println!("{} No cached items match '{}'", "[~]".cyan(), query);
        return Ok(());
    }
    for item in &hits {
        println!("{} {} {}", format!("[{}]", item.category).cyan(), item.title.bold(), format!("v{}", item.version).dimmed());
        if !item.excerpt.is_empty() {
            println!("    {}", item.excerpt);
        }
    }
    println!("{} result(s)", hits.len());
    Ok(())
}

fn show_logs(data_dir: &Path, count: usize) -> Result<()> {
    let store = LocalStore::open(data_dir)?;
    let logs = store.recent_logs(count)?;
    if logs.is_empty() {
        println!("{} No sync activity yet", "[~]".cyan());
    }
    for entry in logs {
        println!("{}", entry.to_log_line());
    }
    Ok(())
}

fn handle_config(data_dir: &Path, config: Config, command: ConfigCommands) -> Result<()> {
    let shared = SharedConfig::new(config);
    match command {
        ConfigCommands::Show => {
            let json = serde_json::to_string_pretty(&shared.snapshot()).context("Failed to serialize config")?;
            println!("{}", json);
            return Ok(());
        }
        ConfigCommands::SetBudget { mb } => shared.set_storage_budget_mb(mb),
        ConfigCommands::SetWifiOnly { enabled } => shared.set_wifi_only(enabled),
        ConfigCommands::SetSensitivity { sensitivity } => shared.set_sensitivity(sensitivity),
        ConfigCommands::SetAutoPause { enabled } => shared.set_auto_pause(enabled),
        ConfigCommands::SetAutoResume { enabled } => shared.set_auto_resume(enabled),
        ConfigCommands::SetAutoSync { enabled } => shared.set_auto_sync(enabled),
        ConfigCommands::SetRetries { attempts } => shared.set_retry_attempts(attempts),
        ConfigCommands::SetCatalogUrl { url } => shared.set_catalog_url(url),
        ConfigCommands::SetCategories { categories } => shared.set_allowed_categories(categories),
        ConfigCommands::SetPriority { category, priority } => shared.set_category_priority(category, priority),
    }
    shared.snapshot().save(data_dir)?;
    println!("{} Configuration saved", "[OK]".green());
    Ok(())
}
