//! Presentation layer for terminal use

pub mod cli;

pub use cli::CliContext;
