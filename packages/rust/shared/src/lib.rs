//! Shared types, error model, and configuration for SpecWeaver.
//!
//! This crate is the foundation depended on by all other SpecWeaver crates.
//! It provides:
//! - [`SpecWeaverError`], the unified error type
//! - Domain types ([`Segment`], [`RetrievalResult`], [`Layer`], [`Violation`])
//! - Configuration ([`AppConfig`], [`RetryPolicy`], config loading)
//! - Atomic file writes ([`write_atomic`], [`write_json_atomic`])

pub mod config;
pub mod error;
pub mod fs;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, ChunkingConfig, DefaultsConfig, IndexMode, InvocationConfig, LayerConfig,
    OpenRouterConfig, RetryPolicy, ValidationConfig, api_key, config_dir, config_file_path,
    expand_home, init_config, load_config, load_config_from,
};
pub use error::{RAW_SNIPPET_CHARS, Result, SpecWeaverError};
pub use fs::{sha256_hex, write_atomic, write_json_atomic};
pub use types::{
    IndexSummary, Layer, RetrievalHit, RetrievalResult, Segment, Severity, Violation,
    ViolationKind, ViolationReport,
};
