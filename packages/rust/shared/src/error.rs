//! Error types for SpecWeaver.
//!
//! Library crates use [`SpecWeaverError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Maximum number of raw characters carried by a [`SpecWeaverError::MalformedOutput`].
pub const RAW_SNIPPET_CHARS: usize = 300;

/// Top-level error type for all SpecWeaver operations.
#[derive(Debug, thiserror::Error)]
pub enum SpecWeaverError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// HTTP client construction or transport setup error.
    #[error("network error: {0}")]
    Network(String),

    /// Database or storage layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (bad settings, invalid names, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// The document has no extractable text.
    #[error("document `{document}` contains no extractable text")]
    EmptyDocument { document: String },

    /// The input file type is not recognised by the ingester.
    #[error("unsupported document format: {path:?}")]
    UnsupportedFormat { path: PathBuf },

    /// A search was issued against a store with zero chunks.
    #[error("the chunk index is empty; index a document first")]
    EmptyIndex,

    /// Retrieval returned nothing for a stage or artifact query.
    #[error("no context retrieved for {target} (query: {query:?})")]
    NoContext { target: String, query: String },

    /// Generated text could not be turned into the expected structure.
    #[error("malformed output: {reason}; raw: {raw:?}")]
    MalformedOutput { reason: String, raw: String },

    /// Transient throttling persisted through the whole retry budget.
    #[error("rate limited after {attempts} attempts: {message}")]
    RateLimited { attempts: u32, message: String },

    /// The generation service reported a long-term quota block.
    #[error("quota exhausted: {message}")]
    QuotaExhausted { message: String },

    /// A non-throttling failure that survived the single reconnect attempt.
    #[error("connection error: {message}")]
    Connection { message: String },

    /// An upstream stage output is not on disk.
    #[error("stage `{stage}` requires `{upstream}` output at {path:?}; run that stage first")]
    MissingUpstream {
        stage: String,
        upstream: String,
        path: PathBuf,
    },

    /// A persisted stage output exists but cannot be decoded.
    #[error("stage output at {path:?} is corrupt: {message}")]
    CorruptStageOutput { path: PathBuf, message: String },

    /// A terminal failure stopped all remaining work.
    #[error("aborted after {checkpoint}: {source}")]
    Aborted {
        checkpoint: String,
        #[source]
        source: Box<SpecWeaverError>,
    },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, SpecWeaverError>;

impl SpecWeaverError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a storage error from any displayable source.
    pub fn storage(err: impl std::fmt::Display) -> Self {
        Self::Storage(err.to_string())
    }

    /// Create a malformed-output error, keeping only the head of the raw text.
    pub fn malformed(reason: impl Into<String>, raw: &str) -> Self {
        Self::MalformedOutput {
            reason: reason.into(),
            raw: raw.chars().take(RAW_SNIPPET_CHARS).collect(),
        }
    }

    /// Wrap a terminal error with the last durable checkpoint.
    pub fn aborted(checkpoint: impl Into<String>, source: SpecWeaverError) -> Self {
        Self::Aborted {
            checkpoint: checkpoint.into(),
            source: Box::new(source),
        }
    }

    /// Whether this error must halt every remaining stage or artifact.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::QuotaExhausted { .. } | Self::Aborted { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = SpecWeaverError::config("missing API key");
        assert_eq!(err.to_string(), "config error: missing API key");

        let err = SpecWeaverError::NoContext {
            target: "stage `entities`".into(),
            query: "domain objects".into(),
        };
        assert!(err.to_string().contains("stage `entities`"));
    }

    #[test]
    fn malformed_keeps_head_of_raw_text() {
        let raw = "x".repeat(1_000);
        match SpecWeaverError::malformed("not json", &raw) {
            SpecWeaverError::MalformedOutput { raw, .. } => {
                assert_eq!(raw.chars().count(), RAW_SNIPPET_CHARS);
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn only_quota_and_abort_are_terminal() {
        let quota = SpecWeaverError::QuotaExhausted {
            message: "daily limit".into(),
        };
        assert!(quota.is_terminal());
        assert!(SpecWeaverError::aborted("stage `requirements`", quota).is_terminal());

        let limited = SpecWeaverError::RateLimited {
            attempts: 3,
            message: "429".into(),
        };
        assert!(!limited.is_terminal());
        assert!(!SpecWeaverError::EmptyIndex.is_terminal());
    }
}
