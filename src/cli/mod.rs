//! CLI interface and argument parsing
//!
//! This module handles command-line parsing, shell completion and the
//! dispatch to `run`, `watch` and `list`.

pub mod app;

pub use app::*;
