//! Shared types, error model, and configuration for kbot.
//!
//! This crate is the foundation depended on by all other kbot crates.
//! It provides:
//! - [`KbotError`]: the unified error type
//! - Domain types ([`Build`], [`ChangelogEntry`], [`BugId`], [`SubTask`], [`TestFileMeta`])
//! - Configuration ([`AppConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, BrewConfig, ReportConfig, config_dir, config_file_path, load_config, load_config_from,
};
pub use error::{KbotError, Result};
pub use types::{Build, BugId, ChangelogEntry, SubTask, TestFileMeta, TestType};
