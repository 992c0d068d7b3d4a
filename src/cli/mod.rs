//! CLI module for benchlab - command-line interface and subcommands.

pub mod commands;

pub use commands::Cli;
