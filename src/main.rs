mod config;
mod data;
mod execution;
mod market;
mod monitoring;
mod rules;
#[cfg(test)]
mod testing;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use config::{Config, ConfirmationChannel, EnvConfig};
use data::accessor::MarketAccessor;
use data::github::GithubClient;
use data::manifold::ManifoldClient;
use execution::confirm::{Confirmer, ConsoleConfirmer, FixedConfirmer, TelegramConfirmer};
use execution::persistence::{startup_report, MarketDatabase};
use execution::scheduler::Scheduler;
use market::{CreationRequest, Market};
use monitoring::logger::ResolutionLog;
use rules::{TriggerRule, ValueRule};

#[derive(Parser)]
#[command(name = "market-resolver", about = "Resolves prediction markets from stored rules")]
struct Cli {
    /// Path to the TOML configuration
    #[arg(long, default_value = "config.toml")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Poll managed markets until interrupted
    Run {
        /// Check every market now, ignoring check rates
        #[arg(long)]
        refresh: bool,
        /// Run a single cycle and exit
        #[arg(long)]
        once: bool,
    },
    /// Start managing an existing market
    Add {
        /// Platform market id or URL
        market: String,
        /// JSON array of trigger rules, e.g. '[["generic.ResolveAtTime", {"resolve_at": "2030-01-01"}]]'
        #[arg(long)]
        time_rules: String,
        /// JSON array holding exactly one value rule
        #[arg(long)]
        value_rules: String,
        /// Hours between checks
        #[arg(long, default_value_t = 24.0)]
        check_rate: f64,
        #[arg(long, default_value = "")]
        notes: String,
    },
    /// Queue a market creation request from a JSON file
    Queue {
        request: String,
        #[arg(long, default_value_t = 0.0)]
        priority: f64,
    },
    /// Show managed markets and pending requests
    List,
    /// Stop managing markets by row id
    Remove { ids: Vec<i64> },
    /// Print a market's rules and how they evaluate right now
    Explain { id: i64 },
}

fn platform_client(config: &Config, env: &EnvConfig) -> Result<Arc<ManifoldClient>> {
    Ok(Arc::new(ManifoldClient::new(
        config.platform.api_url.clone(),
        Some(env.manifold_api_key.clone()),
        config.platform.timeout_secs,
    )?))
}

fn source_host_client(config: &Config, env: &EnvConfig) -> Result<Arc<GithubClient>> {
    let auth = env.github_username.clone().zip(env.github_token.clone());
    Ok(Arc::new(GithubClient::new(
        config.source_host.api_url.clone(),
        auth,
        config.source_host.timeout_secs,
    )?))
}

fn confirmer(config: &Config, env: &EnvConfig) -> Result<Box<dyn Confirmer>> {
    let confirmer: Box<dyn Confirmer> = match config.confirmation.channel {
        ConfirmationChannel::Console => Box::new(ConsoleConfirmer),
        ConfirmationChannel::Fixed => Box::new(FixedConfirmer::new(config.confirmation.fixed_decision)),
        ConfirmationChannel::Telegram => {
            let (key, chat) = env.telegram()?;
            Box::new(TelegramConfirmer::new(
                key,
                chat,
                config.confirmation.telegram_poll_secs,
                config.confirmation.telegram_timeout_secs,
            ))
        }
    };
    Ok(confirmer)
}

async fn run(config: Config, env: EnvConfig, refresh: bool, once: bool) -> Result<()> {
    let db = MarketDatabase::new(&config.system.database_path)?;
    startup_report(&db)?;

    let platform = platform_client(&config, &env)?;
    let mut scheduler = Scheduler::new(
        db,
        platform.clone(),
        source_host_client(&config, &env)?,
        platform,
        confirmer(&config, &env)?,
    )
    .dry_run(config.system.dry_run);
    if config.monitoring.csv_logging {
        scheduler = scheduler.with_log(ResolutionLog::new(config.monitoring.csv_log_path.clone())?);
    }

    let mut refresh = refresh || config.polling.refresh_on_start;
    let interval = Duration::from_secs(config.polling.interval_secs);
    loop {
        let cycle = scheduler.run_cycle(refresh).await;
        if once {
            return cycle.map(|_| ());
        }
        if let Err(e) = cycle {
            tracing::error!("Cycle failed, retrying next interval: {:#}", e);
        }
        refresh = false;

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutting down...");
                return Ok(());
            }
            _ = tokio::time::sleep(interval) => {}
        }
    }
}

async fn add(
    config: Config,
    env: EnvConfig,
    target: &str,
    time_rules: &str,
    value_rules: &str,
    check_rate: f64,
    notes: String,
) -> Result<()> {
    let time_rules: Vec<TriggerRule> =
        serde_json::from_str(time_rules).context("Failed to parse --time-rules")?;
    let value_rules: Vec<ValueRule> =
        serde_json::from_str(value_rules).context("Failed to parse --value-rules")?;

    let platform = platform_client(&config, &env)?;
    let snapshot = if target.starts_with("http") {
        platform.market_by_url(target).await?
    } else {
        platform.get_market(target).await?
    };

    let market = Market::new(snapshot, time_rules, value_rules, check_rate)?.with_notes(notes);
    let db = MarketDatabase::new(&config.system.database_path)?;
    let row = db.insert_market(&market)?;
    println!("Added {} as row {}\n", market.market().question, row);
    println!("{}", market.explain_abstract());
    Ok(())
}

fn queue(config: &Config, path: &str, priority: f64) -> Result<()> {
    let text = std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path))?;
    let request: CreationRequest =
        serde_json::from_str(&text).with_context(|| format!("Failed to parse request in {}", path))?;
    request.validate()?;

    let db = MarketDatabase::new(&config.system.database_path)?;
    let id = db.queue_request(&request, priority, config.platform.creation_cost)?;
    println!("Queued \"{}\" as pending request {}", request.question, id);
    Ok(())
}

fn list(config: &Config) -> Result<()> {
    let db = MarketDatabase::new(&config.system.database_path)?;
    for (row, market) in db.load_markets()? {
        let last = market
            .last_checked()
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "never".to_string());
        println!(
            "{:>4}  {}  every {}h, last checked {}\n      {}",
            row,
            market.market().question,
            market.check_rate(),
            last,
            market.market().url
        );
        if let Some(values) = market.initial_values() {
            let bets: Vec<String> = values.iter().map(|(answer, amount)| format!("{}: {}", answer, amount)).collect();
            println!("      opened with {}", bets.join(", "));
        }
    }
    for (id, priority, cost, request) in db.pending_requests()? {
        println!("pending {:>4}  {} (priority {}, cost {})", id, request.question, priority, cost);
    }
    Ok(())
}

fn remove(config: &Config, ids: &[i64]) -> Result<()> {
    let db = MarketDatabase::new(&config.system.database_path)?;
    for id in ids {
        if db.remove_market(*id)? {
            println!("Removed {}", id);
        } else {
            println!("No market with row id {}", id);
        }
    }
    Ok(())
}

async fn explain(config: Config, env: EnvConfig, id: i64) -> Result<()> {
    let db = MarketDatabase::new(&config.system.database_path)?;
    let market = db
        .get_market(id)?
        .with_context(|| format!("No market with row id {}", id))?;
    println!("{}\n{}\n", market.market().question, market.market().url);
    println!("{}", market.explain_abstract());

    let platform = platform_client(&config, &env)?;
    let source_host = source_host_client(&config, &env)?;
    let ctx = market.context(platform.as_ref(), source_host.as_ref(), Utc::now());
    println!("{}", market.explain_specific(&ctx).await?);
    println!("Would resolve now: {}", market.should_resolve(&ctx).await?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;

    match cli.command {
        Command::Run { refresh, once } => {
            tracing::info!("Dry run mode: {}", config.system.dry_run);
            run(config, EnvConfig::load()?, refresh, once).await
        }
        Command::Add {
            market,
            time_rules,
            value_rules,
            check_rate,
            notes,
        } => add(config, EnvConfig::load()?, &market, &time_rules, &value_rules, check_rate, notes).await,
        Command::Queue { request, priority } => queue(&config, &request, priority),
        Command::List => list(&config),
        Command::Remove { ids } => remove(&config, &ids),
        Command::Explain { id } => explain(config, EnvConfig::load()?, id).await,
    }
}
