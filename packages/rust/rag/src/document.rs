//! Document ingestion.
//!
//! Page extraction from binary formats is done by external tools; this
//! module accepts plain text and pre-extracted page arrays.

use std::path::Path;

use specweaver_shared::{Result, SpecWeaverError};

/// Form feed, the page break marker in plain-text exports.
const PAGE_BREAK: char = '\x0C';

/// Separator placed between pages when they are concatenated for chunking.
pub const PAGE_JOINER: &str = "\n\n";

/// A named document split into pages of extracted text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub name: String,
    pub pages: Vec<String>,
}

impl Document {
    pub fn new(name: impl Into<String>, pages: Vec<String>) -> Self {
        Self {
            name: name.into(),
            pages,
        }
    }

    /// Build a document from plain text, splitting pages on form feeds.
    pub fn from_text(name: impl Into<String>, text: &str) -> Self {
        Self::new(name, text.split(PAGE_BREAK).map(str::to_string).collect())
    }

    /// Load a `.txt`, `.md` or `.json` (array of page strings) file.
    ///
    /// The document is named after the file stem unless `name` is given.
    pub fn load(path: &Path, name: Option<&str>) -> Result<Self> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        let name = match name {
            Some(n) => n.to_string(),
            None => path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "document".into()),
        };

        match extension.as_deref() {
            Some("txt" | "md" | "text" | "markdown") => {
                let text =
                    std::fs::read_to_string(path).map_err(|e| SpecWeaverError::io(path, e))?;
                Ok(Self::from_text(name, &text))
            }
            Some("json") => {
                let raw =
                    std::fs::read_to_string(path).map_err(|e| SpecWeaverError::io(path, e))?;
                let pages: Vec<String> = serde_json::from_str(&raw).map_err(|e| {
                    SpecWeaverError::validation(format!(
                        "{} is not a JSON array of page strings: {e}",
                        path.display()
                    ))
                })?;
                Ok(Self::new(name, pages))
            }
            _ => Err(SpecWeaverError::UnsupportedFormat {
                path: path.to_path_buf(),
            }),
        }
    }

    /// All pages joined, or `EmptyDocument` when nothing but whitespace remains.
    pub fn full_text(&self) -> Result<String> {
        let pages: Vec<&str> = self
            .pages
            .iter()
            .map(|p| p.trim())
            .filter(|p| !p.is_empty())
            .collect();
        if pages.is_empty() {
            return Err(SpecWeaverError::EmptyDocument {
                document: self.name.clone(),
            });
        }
        Ok(pages.join(PAGE_JOINER))
    }
}
