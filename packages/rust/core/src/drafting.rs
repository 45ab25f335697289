//! Requirements drafting from a one-line idea.

use std::path::{Path, PathBuf};

use specweaver_llm::{Generator, ResilientInvoker};
use specweaver_shared::{Result, SpecWeaverError, write_atomic};
use tracing::{info, instrument};

use crate::prompts;

/// Drafted requirements document, written to the data directory.
pub const DRAFT_FILE: &str = "srs_document.txt";

/// Ask the generator for a requirements document describing `idea` and save
/// it as [`DRAFT_FILE`] under `data_dir`.
#[instrument(skip_all, fields(idea_chars = idea.len()))]
pub async fn draft_requirements<G: Generator>(
    invoker: &ResilientInvoker<G>,
    idea: &str,
    data_dir: &Path,
) -> Result<PathBuf> {
    let idea = idea.trim();
    if idea.is_empty() {
        return Err(SpecWeaverError::validation("idea must not be empty"));
    }

    let text = invoker.invoke(&prompts::draft_prompt(idea)).await?;
    let text = text.trim();
    if text.is_empty() {
        return Err(SpecWeaverError::malformed("draft response is empty", text));
    }

    let path = data_dir.join(DRAFT_FILE);
    write_atomic(&path, format!("{text}\n").as_bytes())?;
    info!(path = %path.display(), chars = text.len(), "requirements draft written");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use specweaver_llm::ServiceError;
    use specweaver_shared::RetryPolicy;

    struct Echo;

    impl Generator for Echo {
        async fn generate(&self, prompt: &str) -> std::result::Result<String, ServiceError> {
            if prompt.contains("recipe sharing") {
                Ok("  1. Purpose\n\nUsers share recipes.\n".into())
            } else {
                Ok("   ".into())
            }
        }
    }

    #[tokio::test]
    async fn draft_is_written_trimmed() {
        let dir = std::env::temp_dir().join(format!("sw-draft-test-{}", uuid::Uuid::now_v7()));
        let invoker = ResilientInvoker::new(Echo, RetryPolicy::immediate(1));

        let path = draft_requirements(&invoker, "a recipe sharing site", &dir)
            .await
            .unwrap();

        assert_eq!(path, dir.join(DRAFT_FILE));
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "1. Purpose\n\nUsers share recipes.\n");
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn empty_idea_and_empty_response_are_rejected() {
        let dir = std::env::temp_dir().join(format!("sw-draft-test-{}", uuid::Uuid::now_v7()));
        let invoker = ResilientInvoker::new(Echo, RetryPolicy::immediate(1));

        assert!(matches!(
            draft_requirements(&invoker, "  ", &dir).await,
            Err(SpecWeaverError::Validation { .. })
        ));
        assert!(matches!(
            draft_requirements(&invoker, "a chess club", &dir).await,
            Err(SpecWeaverError::MalformedOutput { .. })
        ));
        assert!(!dir.join(DRAFT_FILE).exists());
    }
}
