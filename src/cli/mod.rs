//! CLI module for throttlr - command-line interface and subcommands.
//!
//! Subcommands drive the throttler and rate limiter from the shell.

pub mod commands;

pub use commands::Cli;
