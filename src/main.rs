use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::{LevelFilter, info, warn};
use rand::Rng;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use throttlr::scheduler::QueuePosition;
use throttlr::{
    BoxError, HealthReport, HealthStatus, RateLimitConfig, RateLimiter, Stats, ThrottleConfig, ThrottleError,
    Throttler,
};

mod cli;
mod config;

use cli::Cli;
use cli::commands::Commands;
use config::Config;

fn setup_logging() -> Result<()> {
    // Create log directory
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("throttlr")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("throttlr.log");

    // Setup env_logger with file output
    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("trace"))
        .target(env_logger::Target::Pipe(target))
        .init();

    // Without RUST_LOG the level comes from the config file once it is loaded
    if std::env::var_os("RUST_LOG").is_none() {
        log::set_max_level(LevelFilter::Info);
    }

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

fn apply_log_level(config: &Config) {
    if std::env::var_os("RUST_LOG").is_some() {
        return;
    }
    if let Some(level) = &config.log_level {
        match level.parse::<LevelFilter>() {
            Ok(filter) => log::set_max_level(filter),
            Err(_) => warn!("Ignoring unknown log level '{}'", level),
        }
    }
}

fn run_application(cli: &Cli, config: &Config) -> Result<()> {
    info!("Starting application");

    if cli.is_verbose() {
        println!("{}", "Verbose mode enabled".yellow());
    }

    match &cli.command {
        None => handle_profiles_command(config),
        Some(Commands::Simulate {
            requests,
            profile,
            failure_rate,
            duration_ms,
            json,
        }) => {
            let throttle = config.throttle_config(profile.as_deref())?;
            let workload = Workload {
                requests: *requests,
                failure_rate: *failure_rate,
                duration: Duration::from_millis(*duration_ms),
            };
            handle_simulate_command(&workload, throttle, config, *json, cli.is_verbose())
        }
        Some(Commands::RateLimit {
            key,
            max_requests,
            window_ms,
            calls,
        }) => {
            let limit = RateLimitConfig::new(
                max_requests.unwrap_or(config.rate_limit.max_requests),
                window_ms.unwrap_or(config.rate_limit.window_ms),
            );
            handle_rate_limit_command(key, &limit, *calls)
        }
        Some(Commands::Profiles) => handle_profiles_command(config),
        Some(Commands::Config) => handle_config_command(config),
    }
}

struct Workload {
    requests: usize,
    failure_rate: f64,
    duration: Duration,
}

#[derive(Debug, Default, serde::Serialize)]
struct Outcomes {
    succeeded: usize,
    failed: usize,
    rejected: usize,
}

#[derive(serde::Serialize)]
struct SimulationReport {
    outcomes: Outcomes,
    stats: Stats,
    health: HealthReport,
}

fn handle_simulate_command(
    workload: &Workload,
    throttle: ThrottleConfig,
    config: &Config,
    json: bool,
    verbose: bool,
) -> Result<()> {
    info!(
        "Simulating {} requests (failure rate {}, {}ms each)",
        workload.requests,
        workload.failure_rate,
        workload.duration.as_millis()
    );

    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    let (report, snapshot) = runtime.block_on(simulate(workload, throttle, config))?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to serialize report")?
        );
        return Ok(());
    }

    if verbose {
        print_queue_snapshot(&snapshot);
    }
    print_report(&report);
    Ok(())
}

async fn simulate(
    workload: &Workload,
    throttle: ThrottleConfig,
    config: &Config,
) -> Result<(SimulationReport, Vec<QueuePosition>)> {
    let throttler = Throttler::new(config.throttler.clone());
    let mut outcomes = Outcomes::default();
    let mut handles = Vec::with_capacity(workload.requests);

    for _ in 0..workload.requests {
        let failure_rate = workload.failure_rate;
        let duration = workload.duration;
        let scheduled = throttler
            .schedule(
                move || async move {
                    tokio::time::sleep(duration).await;
                    if rand::rng().random_bool(failure_rate) {
                        Err::<(), BoxError>("simulated failure".into())
                    } else {
                        Ok(())
                    }
                },
                throttle.clone(),
            )
            .await;

        match scheduled {
            Ok(handle) => handles.push(handle),
            Err(ThrottleError::QueueFull { .. }) => outcomes.rejected += 1,
            Err(e) => return Err(e).context("Failed to schedule request"),
        }
    }

    let snapshot = throttler.queue_status().await.context("Failed to read queue status")?;

    for result in futures::future::join_all(handles.into_iter().map(|h| h.result())).await {
        match result {
            Ok(()) => outcomes.succeeded += 1,
            Err(e) => {
                warn!("Request failed: {}", e);
                outcomes.failed += 1;
            }
        }
    }

    let stats = throttler.stats().await.context("Failed to read stats")?;
    let health = throttler.health_status().await.context("Failed to read health")?;

    Ok((
        SimulationReport {
            outcomes,
            stats,
            health,
        },
        snapshot,
    ))
}

fn print_queue_snapshot(snapshot: &[QueuePosition]) {
    println!("{} {} queued after submission", "Queue:".cyan(), snapshot.len());
    for entry in snapshot {
        println!(
            "  #{:<3} {} priority {} ~{}ms",
            entry.position,
            entry.id,
            entry.priority,
            entry.estimated_wait.as_millis()
        );
    }
}

fn print_report(report: &SimulationReport) {
    let outcomes = &report.outcomes;
    let stats = &report.stats;

    println!("{}", "Outcomes".bold());
    println!("  {} {}", "succeeded:".green(), outcomes.succeeded);
    println!("  {} {}", "failed:".red(), outcomes.failed);
    println!("  {} {}", "rejected:".yellow(), outcomes.rejected);

    println!("{}", "Stats".bold());
    println!("  completed: {}", stats.completed);
    println!("  failed: {}", stats.failed);
    println!("  retried: {}", stats.retried);
    println!("  rejected: {}", stats.rejected);
    println!("  cancelled: {}", stats.cancelled);
    println!("  average wait: {}ms", stats.average_wait_time.as_millis());
    println!("  average execution: {}ms", stats.average_execution_time.as_millis());
    println!("  failure rate: {:.1}%", stats.failure_rate() * 100.0);

    let status = match report.health.status {
        HealthStatus::Healthy => report.health.status.to_string().green(),
        HealthStatus::Degraded => report.health.status.to_string().yellow(),
        HealthStatus::Unhealthy => report.health.status.to_string().red(),
    };
    println!(
        "{} {} (checked {})",
        "Health:".bold(),
        status,
        report.health.checked_at.to_rfc3339()
    );
}

fn handle_rate_limit_command(key: &str, limit: &RateLimitConfig, calls: u32) -> Result<()> {
    info!(
        "Exercising rate limit for key {} ({} per {}ms)",
        key, limit.max_requests, limit.window_ms
    );
    println!(
        "{} {} ({} requests per {}ms)",
        "Rate limit:".cyan(),
        key,
        limit.max_requests,
        limit.window_ms
    );

    let limiter = RateLimiter::new();
    for call in 1..=calls {
        let decision = limiter.check_rate_limit(key, limit);
        if decision.allowed {
            limiter.record_request(key, true);
            println!(
                "  {:>3} {} remaining {}",
                call,
                "allowed".green(),
                decision.remaining
            );
        } else {
            let retry_after = decision.retry_after.map(|d| d.as_secs()).unwrap_or_default();
            println!(
                "  {:>3} {} retry after {}s (resets in {}ms)",
                call,
                "denied".red(),
                retry_after,
                decision.reset_in().as_millis()
            );
        }
    }
    Ok(())
}

fn handle_profiles_command(config: &Config) -> Result<()> {
    println!("{}", "Profiles".bold());
    println!(
        "  {:<14} {:>10} {:>6} {:>10} {:>8} {:>7} {:>10}",
        "name", "concurrent", "queue", "timeout", "priority", "retries", "multiplier"
    );
    for (name, profile) in config.effective_profiles() {
        println!(
            "  {:<14} {:>10} {:>6} {:>8}ms {:>8} {:>7} {:>10.1}",
            name,
            profile.max_concurrent,
            profile.max_queue_size,
            profile.timeout_ms,
            profile.priority,
            profile.retry_attempts,
            profile.backoff_multiplier
        );
    }
    Ok(())
}

fn handle_config_command(config: &Config) -> Result<()> {
    let yaml = serde_yaml::to_string(config).context("Failed to serialize config")?;
    print!("{}", yaml);
    Ok(())
}

fn main() -> Result<()> {
    // Setup logging first
    setup_logging().context("Failed to setup logging")?;

    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    apply_log_level(&config);

    info!("Starting with config from: {:?}", cli.config);

    // Run the main application logic
    run_application(&cli, &config).context("Application failed")?;

    Ok(())
}
