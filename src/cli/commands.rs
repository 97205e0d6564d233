//! CLI command definitions using clap.
//!
//! Defines the main CLI structure and subcommands:
//! - simulate: run a synthetic workload and report stats and health
//! - rate-limit: exercise the sliding-window limiter for one key
//! - profiles: list the effective throttle profiles
//! - config: print the effective configuration

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Throttlr - admission control and rate limiting for async work
#[derive(Parser, Debug)]
#[command(name = "throttlr")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

impl Cli {
    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }
}

/// Main subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a synthetic workload through a throttler
    Simulate {
        /// Number of requests to submit
        #[arg(short = 'n', long, default_value_t = 20)]
        requests: usize,

        /// Throttle profile to submit under (defaults to the configured defaults)
        #[arg(short, long)]
        profile: Option<String>,

        /// Probability that any single attempt fails
        #[arg(short, long, default_value_t = 0.0, value_parser = parse_rate)]
        failure_rate: f64,

        /// Simulated duration of each attempt in milliseconds
        #[arg(short, long, default_value_t = 100)]
        duration_ms: u64,

        /// Print stats and health as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check and record calls against a sliding-window rate limit
    RateLimit {
        /// Rate limit key
        #[arg(short, long)]
        key: String,

        /// Requests allowed per window (defaults to the configured limit)
        #[arg(short, long)]
        max_requests: Option<u32>,

        /// Window length in milliseconds (defaults to the configured window)
        #[arg(short, long)]
        window_ms: Option<u64>,

        /// Number of calls to attempt
        #[arg(short = 'n', long, default_value_t = 10)]
        calls: u32,
    },

    /// List built-in and configured throttle profiles
    Profiles,

    /// Print the effective configuration as YAML
    Config,
}

fn parse_rate(s: &str) -> Result<f64, String> {
    let rate: f64 = s.parse().map_err(|_| format!("'{}' is not a number", s))?;
    if (0.0..=1.0).contains(&rate) {
        Ok(rate)
    } else {
        Err(format!("{} is not between 0.0 and 1.0", rate))
    }
}
