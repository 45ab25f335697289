//! Artifact generation batch.
//!
//! Plans one source artifact per architecture record, generates each with
//! targeted context, runs it through the [`ArtifactGate`], and writes
//! accepted artifacts into per-layer directories.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use specweaver_llm::{Generator, ResilientInvoker, strip_code_fences};
use specweaver_rag::Retriever;
use specweaver_shared::{
    DefaultsConfig, Layer, LayerConfig, Result, SpecWeaverError, write_atomic, write_json_atomic,
};
use tracing::{info, instrument, warn};

use crate::progress::PipelineProgress;
use crate::prompts;
use crate::stages::ArchitectureMap;
use crate::validation::{ArtifactGate, ValidationVerdict};

/// Report written next to the generated layers.
pub const GENERATION_REPORT_FILE: &str = "generation_report.json";

// ---------------------------------------------------------------------------
// Planning
// ---------------------------------------------------------------------------

/// One artifact to generate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactUnit {
    pub layer: Layer,
    /// Identifier the artifact must declare.
    pub identifier: String,
    /// Name as it appeared in the architecture.
    pub source_name: String,
    pub description: String,
    pub actions: Vec<String>,
}

/// Turn a free-form name into a PascalCase identifier.
///
/// `/`, `-` and whitespace separate words; each word gets an uppercase first
/// letter and characters that cannot appear in an identifier are dropped.
pub fn safe_identifier(name: &str) -> Option<String> {
    let identifier: String = name
        .split(|c: char| c == '/' || c == '-' || c.is_whitespace())
        .filter(|word| !word.is_empty())
        .map(|word| {
            let word: String = word
                .chars()
                .filter(|c| c.is_alphanumeric() || *c == '_')
                .collect();
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect();
    (!identifier.is_empty()).then_some(identifier)
}

/// Units for every record of the map, skipping names that yield no identifier
/// and repeats within a layer.
pub fn plan_units(map: &ArchitectureMap) -> Vec<ArtifactUnit> {
    let candidates = map
        .model
        .iter()
        .map(|m| (Layer::Data, &m.name, m.description.clone(), Vec::new()))
        .chain(map.controller.iter().map(|c| {
            (
                Layer::Coordination,
                &c.name,
                format!("Coordinates: {}", c.actions.join(", ")),
                c.actions.clone(),
            )
        }))
        .chain(
            map.view
                .iter()
                .map(|v| (Layer::Presentation, &v.name, v.description.clone(), Vec::new())),
        );

    let mut seen = HashSet::new();
    let mut units = Vec::new();
    for (layer, name, description, actions) in candidates {
        let Some(identifier) = safe_identifier(name) else {
            warn!(%layer, name = %name, "skipping record without a usable identifier");
            continue;
        };
        if !seen.insert((layer, identifier.clone())) {
            continue;
        }
        units.push(ArtifactUnit {
            layer,
            identifier,
            source_name: name.clone(),
            description,
            actions,
        });
    }
    units
}

/// A single generation with its validation contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub prompt: String,
    pub expected_identifier: Option<String>,
    /// Regenerations allowed after a rejection.
    pub retry_budget: u32,
}

// ---------------------------------------------------------------------------
// Outcomes and report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ArtifactOutcome {
    /// Accepted by the gate and written.
    Completed {
        path: PathBuf,
        sha256: String,
        attempts: u32,
    },
    /// Every attempt was rejected by the gate.
    Hallucinated {
        attempts: u32,
        verdict: ValidationVerdict,
    },
    /// Retrieval or invocation failed.
    Failed { error: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct ArtifactRecord {
    pub layer: Layer,
    pub identifier: String,
    #[serde(flatten)]
    pub outcome: ArtifactOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct GenerationReport {
    pub generated_at: DateTime<Utc>,
    pub artifacts: Vec<ArtifactRecord>,
    /// Terminal error that stopped the batch, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aborted: Option<String>,
}

impl Default for GenerationReport {
    fn default() -> Self {
        Self {
            generated_at: Utc::now(),
            artifacts: Vec::new(),
            aborted: None,
        }
    }
}

impl GenerationReport {
    fn count(&self, pred: impl Fn(&ArtifactOutcome) -> bool) -> usize {
        self.artifacts.iter().filter(|a| pred(&a.outcome)).count()
    }

    pub fn completed(&self) -> usize {
        self.count(|o| matches!(o, ArtifactOutcome::Completed { .. }))
    }

    pub fn hallucinated(&self) -> usize {
        self.count(|o| matches!(o, ArtifactOutcome::Hallucinated { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, ArtifactOutcome::Failed { .. }))
    }

    /// Identifier of the most recently written artifact.
    pub fn last_completed(&self) -> Option<&str> {
        self.artifacts
            .iter()
            .rev()
            .find(|a| matches!(a.outcome, ArtifactOutcome::Completed { .. }))
            .map(|a| a.identifier.as_str())
    }
}

// ---------------------------------------------------------------------------
// Generator
// ---------------------------------------------------------------------------

pub struct ArtifactGenerator<'a, R, G> {
    retriever: &'a R,
    invoker: &'a ResilientInvoker<G>,
    gate: &'a ArtifactGate,
    layers: &'a LayerConfig,
    output_root: PathBuf,
    top_k: usize,
    context_chars: usize,
}

impl<'a, R: Retriever, G: Generator> ArtifactGenerator<'a, R, G> {
    pub fn new(
        retriever: &'a R,
        invoker: &'a ResilientInvoker<G>,
        gate: &'a ArtifactGate,
        layers: &'a LayerConfig,
        output_root: impl Into<PathBuf>,
    ) -> Self {
        let defaults = DefaultsConfig::default();
        Self {
            retriever,
            invoker,
            gate,
            layers,
            output_root: output_root.into(),
            top_k: defaults.artifact_top_k,
            context_chars: defaults.artifact_context_chars,
        }
    }

    /// Passages retrieved per artifact and how many characters of them to keep.
    pub fn with_context(mut self, top_k: usize, context_chars: usize) -> Self {
        self.top_k = top_k;
        self.context_chars = context_chars;
        self
    }

    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    pub fn artifact_path(&self, unit: &ArtifactUnit) -> PathBuf {
        self.output_root
            .join(self.layers.dir_for(unit.layer))
            .join(format!("{}.{}", unit.identifier, self.layers.extension))
    }

    /// Generate every unit in order.
    ///
    /// Per-artifact failures are recorded and the batch moves on; quota
    /// exhaustion stops it. The report is written in both cases.
    #[instrument(skip_all, fields(units = units.len()))]
    pub async fn generate_all(
        &self,
        units: &[ArtifactUnit],
        progress: &dyn PipelineProgress,
    ) -> Result<GenerationReport> {
        let mut report = GenerationReport::default();
        progress.phase("Generating artifacts");

        for (i, unit) in units.iter().enumerate() {
            progress.task_progress(
                i + 1,
                units.len(),
                &format!("{} {}", unit.layer, unit.identifier),
            );

            let outcome = match self.generate_one(unit).await {
                Ok(outcome) => outcome,
                Err(e) if e.is_terminal() => {
                    let checkpoint = report
                        .last_completed()
                        .map_or_else(|| "no completed artifact".to_string(), |id| {
                            format!("artifact `{id}`")
                        });
                    warn!(identifier = %unit.identifier, error = %e, "stopping batch");
                    report.aborted = Some(e.to_string());
                    self.write_report(&report)?;
                    return Err(SpecWeaverError::aborted(checkpoint, e));
                }
                Err(e) => {
                    warn!(identifier = %unit.identifier, error = %e, "artifact generation failed");
                    ArtifactOutcome::Failed {
                        error: e.to_string(),
                    }
                }
            };

            report.artifacts.push(ArtifactRecord {
                layer: unit.layer,
                identifier: unit.identifier.clone(),
                outcome,
            });
        }

        self.write_report(&report)?;
        info!(
            completed = report.completed(),
            hallucinated = report.hallucinated(),
            failed = report.failed(),
            "artifact generation complete"
        );
        Ok(report)
    }

    /// Retrieve context for one unit and run its generation request.
    pub async fn generate_one(&self, unit: &ArtifactUnit) -> Result<ArtifactOutcome> {
        let query = prompts::artifact_query(unit);
        let context = self.retriever.retrieve(&query, self.top_k).await?;
        if context.is_empty() {
            return Err(SpecWeaverError::NoContext {
                target: format!("artifact `{}`", unit.identifier),
                query,
            });
        }

        let context: String = context
            .joined("\n")
            .chars()
            .take(self.context_chars)
            .collect();
        let request = GenerationRequest {
            prompt: prompts::artifact_prompt(unit, &context),
            expected_identifier: Some(unit.identifier.clone()),
            retry_budget: self.gate.max_regenerations(),
        };
        self.execute(unit, &request).await
    }

    /// Generate, gate, and on acceptance write the artifact.
    ///
    /// A rejected artifact is regenerated with a stricter prompt until the
    /// request's retry budget is spent, after which it is `Hallucinated`.
    pub async fn execute(
        &self,
        unit: &ArtifactUnit,
        request: &GenerationRequest,
    ) -> Result<ArtifactOutcome> {
        let expected = request
            .expected_identifier
            .as_deref()
            .unwrap_or(&unit.identifier);
        let mut prompt = request.prompt.clone();
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            let raw = self.invoker.invoke(&prompt).await?;
            let source = strip_code_fences(&raw);
            let verdict = self.gate.check(&source, expected);

            if verdict.accepted {
                let path = self.artifact_path(unit);
                let sha256 = write_atomic(&path, format!("{source}\n").as_bytes())?;
                info!(identifier = expected, attempts, path = %path.display(), "artifact accepted");
                return Ok(ArtifactOutcome::Completed {
                    path,
                    sha256,
                    attempts,
                });
            }

            warn!(identifier = expected, attempts, reason = %verdict.reason, "artifact rejected");
            if attempts > request.retry_budget {
                return Ok(ArtifactOutcome::Hallucinated { attempts, verdict });
            }
            prompt = prompts::strict_artifact_prompt(&request.prompt, expected, &verdict.reason);
        }
    }

    fn write_report(&self, report: &GenerationReport) -> Result<()> {
        write_json_atomic(&self.output_root.join(GENERATION_REPORT_FILE), report)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::SilentProgress;
    use crate::stages::{ActionSpec, EntitySpec, SurfaceSpec};
    use specweaver_llm::ServiceError;
    use specweaver_shared::{RetrievalHit, RetrievalResult, RetryPolicy, ValidationConfig};
    use std::cell::RefCell;
    use std::collections::VecDeque;

    struct FixedRetriever(Vec<&'static str>);

    impl Retriever for FixedRetriever {
        async fn retrieve(&self, query: &str, k: usize) -> Result<RetrievalResult> {
            Ok(RetrievalResult {
                query: query.into(),
                hits: self
                    .0
                    .iter()
                    .take(k)
                    .enumerate()
                    .map(|(i, text)| RetrievalHit {
                        segment_id: i as i64 + 1,
                        document_name: "srs".into(),
                        text: (*text).into(),
                        distance: 0.1 * i as f32,
                    })
                    .collect(),
            })
        }
    }

    /// Pops queued responses and records every prompt it sees.
    struct QueueGenerator {
        responses: RefCell<VecDeque<std::result::Result<String, ServiceError>>>,
        prompts: RefCell<Vec<String>>,
    }

    impl QueueGenerator {
        fn new(responses: Vec<std::result::Result<String, ServiceError>>) -> Self {
            Self {
                responses: RefCell::new(responses.into()),
                prompts: RefCell::new(Vec::new()),
            }
        }
    }

    impl Generator for QueueGenerator {
        async fn generate(&self, prompt: &str) -> std::result::Result<String, ServiceError> {
            self.prompts.borrow_mut().push(prompt.to_string());
            self.responses
                .borrow_mut()
                .pop_front()
                .unwrap_or_else(|| Err(ServiceError::http(500, "script exhausted")))
        }
    }

    fn source(name: &str) -> std::result::Result<String, ServiceError> {
        Ok(format!(
            "```python\nclass {name}:\n    \"\"\"Generated unit.\"\"\"\n\n    def __init__(self, store):\n        self.store = store\n        self.cache = {{}}\n\n    def remember(self, key, value):\n        self.cache[key] = value\n        return value\n\n    def describe(self):\n        return f\"{name} with {{len(self.cache)}} cached entries\"\n```"
        ))
    }

    fn unit(layer: Layer, identifier: &str) -> ArtifactUnit {
        ArtifactUnit {
            layer,
            identifier: identifier.into(),
            source_name: identifier.into(),
            description: "test unit".into(),
            actions: vec![],
        }
    }

    fn temp_dir() -> PathBuf {
        std::env::temp_dir().join(format!("sw-codegen-test-{}", uuid::Uuid::now_v7()))
    }

    #[test]
    fn safe_identifier_normalises_names() {
        assert_eq!(safe_identifier("product listing").as_deref(), Some("ProductListing"));
        assert_eq!(safe_identifier("Order/Checkout-flow").as_deref(), Some("OrderCheckoutFlow"));
        assert_eq!(safe_identifier("  user (admin) ").as_deref(), Some("UserAdmin"));
        assert_eq!(safe_identifier("InvoiceView").as_deref(), Some("InvoiceView"));
        assert_eq!(safe_identifier(" - / "), None);
    }

    #[test]
    fn plan_covers_all_layers_without_repeats() {
        let map = ArchitectureMap {
            model: vec![
                EntitySpec {
                    name: "Product".into(),
                    description: "item".into(),
                },
                EntitySpec {
                    name: "product".into(),
                    description: "duplicate".into(),
                },
            ],
            controller: vec![ActionSpec {
                name: "CartController".into(),
                actions: vec!["add_item".into()],
            }],
            view: vec![SurfaceSpec {
                name: "cart view".into(),
                description: "shows cart".into(),
            }],
        };
        let units = plan_units(&map);
        let ids: Vec<(Layer, &str)> = units.iter().map(|u| (u.layer, u.identifier.as_str())).collect();
        assert_eq!(
            ids,
            vec![
                (Layer::Data, "Product"),
                (Layer::Coordination, "CartController"),
                (Layer::Presentation, "CartView"),
            ]
        );
        assert_eq!(units[1].actions, vec!["add_item"]);
    }

    #[tokio::test]
    async fn accepted_artifact_is_written() {
        let out = temp_dir();
        let retriever = FixedRetriever(vec!["Products have a name and price."]);
        let invoker = ResilientInvoker::new(
            QueueGenerator::new(vec![source("Product")]),
            RetryPolicy::immediate(1),
        );
        let gate = ArtifactGate::new(&ValidationConfig::default()).unwrap();
        let layers = LayerConfig::default();
        let generator = ArtifactGenerator::new(&retriever, &invoker, &gate, &layers, &out);
        let defaults = DefaultsConfig::default();
        assert_eq!(generator.top_k, defaults.artifact_top_k);
        assert_eq!(generator.context_chars, defaults.artifact_context_chars);

        let report = generator
            .generate_all(&[unit(Layer::Data, "Product")], &SilentProgress)
            .await
            .unwrap();

        assert_eq!(report.completed(), 1);
        let written = std::fs::read_to_string(out.join("models").join("Product.py")).unwrap();
        assert!(written.starts_with("class Product:"));
        assert!(out.join(GENERATION_REPORT_FILE).exists());
        let _ = std::fs::remove_dir_all(&out);
    }

    #[tokio::test]
    async fn wrong_identifier_becomes_hallucinated_after_retries() {
        let out = temp_dir();
        let retriever = FixedRetriever(vec!["Invoices are issued per order."]);
        let invoker = ResilientInvoker::new(
            QueueGenerator::new(vec![
                source("InvoiceModel"),
                source("InvoiceModel"),
                source("InvoiceEntity"),
            ]),
            RetryPolicy::immediate(1),
        );
        let gate = ArtifactGate::new(&ValidationConfig::default()).unwrap();
        let layers = LayerConfig::default();
        let generator = ArtifactGenerator::new(&retriever, &invoker, &gate, &layers, &out);

        let outcome = generator.generate_one(&unit(Layer::Data, "Invoice")).await.unwrap();

        match outcome {
            ArtifactOutcome::Hallucinated { attempts, verdict } => {
                assert_eq!(attempts, 3);
                assert_eq!(verdict.observed_identifier.as_deref(), Some("InvoiceEntity"));
            }
            other => panic!("expected hallucinated, got {other:?}"),
        }
        let prompts = invoker.generator().prompts.borrow();
        assert_eq!(prompts.len(), 3);
        assert!(prompts[1].contains("STRICT REQUIREMENTS"));
        assert!(!out.join("models").join("Invoice.py").exists());
    }

    #[tokio::test]
    async fn regeneration_can_recover() {
        let out = temp_dir();
        let retriever = FixedRetriever(vec!["Carts hold items."]);
        let invoker = ResilientInvoker::new(
            QueueGenerator::new(vec![source("CartDTO"), source("Cart")]),
            RetryPolicy::immediate(1),
        );
        let gate = ArtifactGate::new(&ValidationConfig::default()).unwrap();
        let layers = LayerConfig::default();
        let generator = ArtifactGenerator::new(&retriever, &invoker, &gate, &layers, &out);

        let outcome = generator.generate_one(&unit(Layer::Data, "Cart")).await.unwrap();
        assert!(matches!(outcome, ArtifactOutcome::Completed { attempts: 2, .. }));
        let _ = std::fs::remove_dir_all(&out);
    }

    #[tokio::test]
    async fn failures_do_not_stop_batch_but_quota_does() {
        let out = temp_dir();
        let retriever = FixedRetriever(vec!["Users log in."]);
        let invoker = ResilientInvoker::new(
            QueueGenerator::new(vec![
                // First unit: connection failure twice -> Failed.
                Err(ServiceError::transport("reset")),
                Err(ServiceError::transport("reset")),
                // Second unit: accepted.
                source("LoginView"),
                // Third unit: quota.
                Err(ServiceError::http(429, "daily quota exhausted")),
            ]),
            RetryPolicy::immediate(1),
        );
        let gate = ArtifactGate::new(&ValidationConfig::default()).unwrap();
        let layers = LayerConfig::default();
        let generator = ArtifactGenerator::new(&retriever, &invoker, &gate, &layers, &out);

        let units = [
            unit(Layer::Coordination, "AuthController"),
            unit(Layer::Presentation, "LoginView"),
            unit(Layer::Presentation, "ProfileView"),
            unit(Layer::Presentation, "NeverReachedView"),
        ];
        let err = generator.generate_all(&units, &SilentProgress).await.unwrap_err();

        match &err {
            SpecWeaverError::Aborted { checkpoint, .. } => {
                assert_eq!(checkpoint, "artifact `LoginView`");
            }
            other => panic!("expected abort, got {other:?}"),
        }
        assert!(out.join("views").join("LoginView.py").exists());
        let report: serde_json::Value = serde_json::from_str(
            &std::fs::read_to_string(out.join(GENERATION_REPORT_FILE)).unwrap(),
        )
        .unwrap();
        assert_eq!(report["artifacts"].as_array().unwrap().len(), 2);
        assert_eq!(report["artifacts"][0]["outcome"], "failed");
        assert!(report["aborted"].as_str().unwrap().contains("quota"));
        assert_eq!(invoker.generator().prompts.borrow().len(), 4);
        let _ = std::fs::remove_dir_all(&out);
    }

    #[tokio::test]
    async fn empty_context_fails_the_unit() {
        let out = temp_dir();
        let retriever = FixedRetriever(vec![]);
        let invoker = ResilientInvoker::new(QueueGenerator::new(vec![]), RetryPolicy::immediate(1));
        let gate = ArtifactGate::new(&ValidationConfig::default()).unwrap();
        let layers = LayerConfig::default();
        let generator = ArtifactGenerator::new(&retriever, &invoker, &gate, &layers, &out);

        let err = generator.generate_one(&unit(Layer::Data, "Ghost")).await.unwrap_err();
        assert!(matches!(err, SpecWeaverError::NoContext { .. }));
        assert!(invoker.generator().prompts.borrow().is_empty());
    }
}
