//! Extraction pipeline and artifact generation for SpecWeaver.
//!
//! This crate ties retrieval, resilient invocation and validation together
//! into the staged extraction run (`ExtractionPipeline`), requirements
//! drafting and the artifact generation batch (`ArtifactGenerator`).

pub mod codegen;
pub mod drafting;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod stages;
pub mod validation;

pub use codegen::{
    ArtifactGenerator, ArtifactOutcome, ArtifactRecord, ArtifactUnit, GENERATION_REPORT_FILE,
    GenerationReport, GenerationRequest, plan_units, safe_identifier,
};
pub use drafting::{DRAFT_FILE, draft_requirements};
pub use pipeline::{ExtractionPipeline, RunReport, StageReport, StageStatus};
pub use progress::{PipelineProgress, SilentProgress};
pub use stages::{ARCHITECTURE_MAP_FILE, ArchitectureMap, Stage, StageOutput, StageStore};
pub use validation::{ArtifactGate, ValidationVerdict};
