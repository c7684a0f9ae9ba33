//! CLI module for drainq - command-line interface and subcommands.
//!
//! Provides the main entry point with subcommands for running a backlog and
//! inspecting or cleaning up its persisted state.

pub mod commands;

pub use commands::Cli;
