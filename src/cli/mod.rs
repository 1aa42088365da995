// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! Command-line interface: argument parsing, terminal output and the `extract` command.

/// CLI arguments.
pub mod args;

/// One-shot extraction into a directory.
pub mod extract;

/// Terminal output helpers and tracing setup.
pub mod logging;
