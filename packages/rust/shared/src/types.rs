//! Core domain types shared across the SpecWeaver crates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Chunks and retrieval
// ---------------------------------------------------------------------------

/// One indexed slice of a source document.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    /// Store-wide identifier, strictly increasing across indexing calls.
    pub id: i64,
    pub document_name: String,
    /// Position of the chunk within its document.
    pub position_index: i64,
    pub text: String,
    pub embedding: Vec<f32>,
}

/// Outcome of indexing one document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IndexSummary {
    /// Chunks inserted by this call.
    pub chunks_added: usize,
    /// Chunks removed because the document was re-indexed in replace mode.
    pub chunks_replaced: usize,
    /// Chunks in the store after the call.
    pub total_chunks: usize,
}

/// A single nearest-neighbour match.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievalHit {
    pub segment_id: i64,
    pub document_name: String,
    pub text: String,
    /// Cosine distance to the query, `0.0` is identical.
    pub distance: f32,
}

/// Ordered, text-deduplicated matches for one query.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RetrievalResult {
    pub query: String,
    pub hits: Vec<RetrievalHit>,
}

impl RetrievalResult {
    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    pub fn len(&self) -> usize {
        self.hits.len()
    }

    /// Hit texts in rank order.
    pub fn texts(&self) -> impl Iterator<Item = &str> {
        self.hits.iter().map(|h| h.text.as_str())
    }

    /// All hit texts joined into a single prompt context block.
    pub fn joined(&self, separator: &str) -> String {
        self.texts().collect::<Vec<_>>().join(separator)
    }
}

// ---------------------------------------------------------------------------
// Layers
// ---------------------------------------------------------------------------

/// Architectural layer of a generated artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Layer {
    /// Entities and persistence ("models").
    Data,
    /// Request handling and orchestration ("controllers").
    Coordination,
    /// User-facing surfaces ("views").
    Presentation,
}

impl Layer {
    pub const ALL: [Layer; 3] = [Layer::Data, Layer::Coordination, Layer::Presentation];

    pub fn as_str(self) -> &'static str {
        match self {
            Layer::Data => "data",
            Layer::Coordination => "coordination",
            Layer::Presentation => "presentation",
        }
    }
}

impl std::fmt::Display for Layer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Layer {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "data" | "model" | "models" => Ok(Layer::Data),
            "coordination" | "controller" | "controllers" => Ok(Layer::Coordination),
            "presentation" | "view" | "views" => Ok(Layer::Presentation),
            other => Err(format!("unknown layer: {other}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Violations
// ---------------------------------------------------------------------------

/// How bad a dependency finding is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// Category of a structural finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ViolationKind {
    /// A data-layer unit depends on presentation or coordination.
    DataLayerDependency,
    /// A presentation unit reaches into the data layer directly.
    PresentationBypass,
    /// A coordination unit depends on a sibling coordination unit.
    CoordinationCoupling,
    /// The structural parser rejected the file.
    SyntaxViolation,
    /// A class name is not PascalCase.
    NamingConvention,
}

impl ViolationKind {
    pub fn severity(self) -> Severity {
        match self {
            ViolationKind::DataLayerDependency => Severity::Critical,
            ViolationKind::PresentationBypass
            | ViolationKind::CoordinationCoupling
            | ViolationKind::SyntaxViolation => Severity::Warning,
            ViolationKind::NamingConvention => Severity::Info,
        }
    }
}

/// One finding of the dependency auditor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    #[serde(rename = "type")]
    pub kind: ViolationKind,
    pub severity: Severity,
    /// Path of the offending file, relative to the audited root.
    pub file: String,
    /// 1-based line of the offending statement, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
    pub message: String,
}

impl Violation {
    pub fn new(
        kind: ViolationKind,
        file: impl Into<String>,
        line: Option<usize>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            severity: kind.severity(),
            file: file.into(),
            line,
            message: message.into(),
        }
    }
}

/// The `violations.json` document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViolationReport {
    pub violations: Vec<Violation>,
    pub total_count: usize,
    /// Files inspected by the audit.
    pub files_scanned: usize,
    pub generated_at: DateTime<Utc>,
}

impl ViolationReport {
    pub fn new(violations: Vec<Violation>, files_scanned: usize) -> Self {
        Self {
            total_count: violations.len(),
            violations,
            files_scanned,
            generated_at: Utc::now(),
        }
    }

    /// Number of findings at `severity`.
    pub fn count(&self, severity: Severity) -> usize {
        self.violations
            .iter()
            .filter(|v| v.severity == severity)
            .count()
    }
}
