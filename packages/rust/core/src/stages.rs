//! Extraction stages, their typed outputs, and the on-disk stage store.
//!
//! Stage outputs are the only state carried between stages. Each is written
//! whole to a JSON file in the data directory and re-read from there by the
//! next stage.

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use specweaver_shared::{Result, SpecWeaverError, write_json_atomic};
use tracing::debug;

/// Merged view of entities, actions and surfaces written after the last stage.
pub const ARCHITECTURE_MAP_FILE: &str = "architecture_map.json";

// ---------------------------------------------------------------------------
// Stage
// ---------------------------------------------------------------------------

/// One step of the extraction chain, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Requirements,
    Entities,
    Actions,
    Surfaces,
}

impl Stage {
    pub const ALL: [Stage; 4] = [
        Stage::Requirements,
        Stage::Entities,
        Stage::Actions,
        Stage::Surfaces,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Requirements => "requirements",
            Stage::Entities => "entities",
            Stage::Actions => "actions",
            Stage::Surfaces => "surfaces",
        }
    }

    /// File the stage output is persisted to.
    pub fn file_name(self) -> &'static str {
        match self {
            Stage::Requirements => "requirements_analysis.json",
            Stage::Entities => "model_architecture.json",
            Stage::Actions => "controller_architecture.json",
            Stage::Surfaces => "view_architecture.json",
        }
    }

    /// The stage whose output this one consumes.
    pub fn upstream(self) -> Option<Stage> {
        match self {
            Stage::Requirements => None,
            Stage::Entities => Some(Stage::Requirements),
            Stage::Actions => Some(Stage::Entities),
            Stage::Surfaces => Some(Stage::Actions),
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "requirements" | "requirement" => Ok(Stage::Requirements),
            "entities" | "entity" | "model" | "models" => Ok(Stage::Entities),
            "actions" | "action" | "controller" | "controllers" => Ok(Stage::Actions),
            "surfaces" | "surface" | "view" | "views" => Ok(Stage::Surfaces),
            other => Err(format!(
                "unknown stage `{other}` (expected requirements, entities, actions or surfaces)"
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Stage outputs
// ---------------------------------------------------------------------------

/// A typed stage output.
pub trait StageOutput: Serialize + DeserializeOwned {
    const STAGE: Stage;

    /// Names of the records, in output order.
    fn record_names(&self) -> Vec<&str>;

    fn record_count(&self) -> usize {
        self.record_names().len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainEntity {
    pub name: String,
    #[serde(default)]
    pub purpose: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemFunction {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// Output of [`Stage::Requirements`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequirementsAnalysis {
    #[serde(default)]
    pub project_name: String,
    pub domain_entities: Vec<DomainEntity>,
    #[serde(default)]
    pub system_functions: Vec<SystemFunction>,
}

impl StageOutput for RequirementsAnalysis {
    const STAGE: Stage = Stage::Requirements;

    fn record_names(&self) -> Vec<&str> {
        self.domain_entities
            .iter()
            .map(|e| e.name.as_str())
            .chain(self.system_functions.iter().map(|f| f.name.as_str()))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitySpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// Output of [`Stage::Entities`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityArchitecture {
    pub model: Vec<EntitySpec>,
}

impl StageOutput for EntityArchitecture {
    const STAGE: Stage = Stage::Entities;

    fn record_names(&self) -> Vec<&str> {
        self.model.iter().map(|m| m.name.as_str()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionSpec {
    pub name: String,
    #[serde(default)]
    pub actions: Vec<String>,
}

/// Output of [`Stage::Actions`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionArchitecture {
    pub controller: Vec<ActionSpec>,
}

impl StageOutput for ActionArchitecture {
    const STAGE: Stage = Stage::Actions;

    fn record_names(&self) -> Vec<&str> {
        self.controller.iter().map(|c| c.name.as_str()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SurfaceSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// Output of [`Stage::Surfaces`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SurfaceArchitecture {
    pub view: Vec<SurfaceSpec>,
}

impl StageOutput for SurfaceArchitecture {
    const STAGE: Stage = Stage::Surfaces;

    fn record_names(&self) -> Vec<&str> {
        self.view.iter().map(|v| v.name.as_str()).collect()
    }
}

/// All three architecture layers in one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchitectureMap {
    pub model: Vec<EntitySpec>,
    pub controller: Vec<ActionSpec>,
    pub view: Vec<SurfaceSpec>,
}

impl ArchitectureMap {
    pub fn merge(
        entities: EntityArchitecture,
        actions: ActionArchitecture,
        surfaces: SurfaceArchitecture,
    ) -> Self {
        Self {
            model: entities.model,
            controller: actions.controller,
            view: surfaces.view,
        }
    }

    pub fn unit_count(&self) -> usize {
        self.model.len() + self.controller.len() + self.view.len()
    }
}

/// Decode a generated value into a stage output.
///
/// A missing root key, a wrong shape, or a record without a name is
/// [`SpecWeaverError::MalformedOutput`].
pub fn decode_stage<T: StageOutput>(value: Value) -> Result<T> {
    let raw = value.to_string();
    let output: T = serde_json::from_value(value).map_err(|e| {
        SpecWeaverError::malformed(format!("{} output does not match its schema: {e}", T::STAGE), &raw)
    })?;

    if let Some(index) = output
        .record_names()
        .iter()
        .position(|name| name.trim().is_empty())
    {
        return Err(SpecWeaverError::malformed(
            format!("{} record {index} has an empty name", T::STAGE),
            &raw,
        ));
    }
    Ok(output)
}

// ---------------------------------------------------------------------------
// Stage store
// ---------------------------------------------------------------------------

/// Reads and writes stage outputs in one directory.
#[derive(Debug, Clone)]
pub struct StageStore {
    dir: PathBuf,
}

impl StageStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, stage: Stage) -> PathBuf {
        self.dir.join(stage.file_name())
    }

    pub fn map_path(&self) -> PathBuf {
        self.dir.join(ARCHITECTURE_MAP_FILE)
    }

    pub fn exists(&self, stage: Stage) -> bool {
        self.path(stage).is_file()
    }

    /// Atomically persist a stage output.
    pub fn save<T: StageOutput>(&self, output: &T) -> Result<PathBuf> {
        let path = self.path(T::STAGE);
        write_json_atomic(&path, output)?;
        debug!(stage = %T::STAGE, records = output.record_count(), "stage output saved");
        Ok(path)
    }

    /// Load a stage output, `None` if it has never been written.
    pub fn read<T: StageOutput>(&self) -> Result<Option<T>> {
        read_json(&self.path(T::STAGE))
    }

    /// Load the output `consumer` depends on, failing if it is absent.
    pub fn require<T: StageOutput>(&self, consumer: &str) -> Result<T> {
        self.read::<T>()?
            .ok_or_else(|| SpecWeaverError::MissingUpstream {
                stage: consumer.to_string(),
                upstream: T::STAGE.to_string(),
                path: self.path(T::STAGE),
            })
    }

    pub fn save_map(&self, map: &ArchitectureMap) -> Result<PathBuf> {
        let path = self.map_path();
        write_json_atomic(&path, map)?;
        Ok(path)
    }

    pub fn read_map(&self) -> Result<Option<ArchitectureMap>> {
        read_json(&self.map_path())
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(SpecWeaverError::io(path, e)),
    };
    serde_json::from_str(&content)
        .map(Some)
        .map_err(|e| SpecWeaverError::CorruptStageOutput {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
}
