//! Staged extraction: Requirements → Entities → Actions → Surfaces.
//!
//! Every stage reloads its upstream output from the [`StageStore`], queries
//! the retriever with names taken from that output, invokes the generator
//! for structured output and persists the decoded result before the next
//! stage starts.

use std::path::PathBuf;

use serde::Serialize;
use specweaver_llm::{Generator, ResilientInvoker};
use specweaver_rag::Retriever;
use specweaver_shared::{DefaultsConfig, Result, SpecWeaverError};
use tracing::{info, instrument, warn};

use crate::progress::PipelineProgress;
use crate::prompts::{self, CONTEXT_SEPARATOR};
use crate::stages::{
    ActionArchitecture, ArchitectureMap, EntityArchitecture, RequirementsAnalysis, Stage,
    StageOutput, StageStore, SurfaceArchitecture, decode_stage,
};

/// Outcome of one stage within a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StageStatus {
    Completed { records: usize, path: PathBuf },
    /// The stage ran and failed; its output was not written.
    Failed { error: String },
    /// The stage did not run.
    Skipped { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageReport {
    pub stage: Stage,
    #[serde(flatten)]
    pub status: StageStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub stages: Vec<StageReport>,
    /// Written when the run completed Surfaces.
    pub architecture_map: Option<PathBuf>,
}

impl RunReport {
    pub fn status(&self, stage: Stage) -> Option<&StageStatus> {
        self.stages
            .iter()
            .find(|r| r.stage == stage)
            .map(|r| &r.status)
    }

    pub fn completed(&self) -> usize {
        self.stages
            .iter()
            .filter(|r| matches!(r.status, StageStatus::Completed { .. }))
            .count()
    }

    /// Whether every stage in the run completed.
    pub fn is_success(&self) -> bool {
        !self.stages.is_empty() && self.completed() == self.stages.len()
    }
}

pub struct ExtractionPipeline<'a, R, G> {
    retriever: &'a R,
    invoker: &'a ResilientInvoker<G>,
    store: &'a StageStore,
    top_k: usize,
}

impl<'a, R: Retriever, G: Generator> ExtractionPipeline<'a, R, G> {
    pub fn new(retriever: &'a R, invoker: &'a ResilientInvoker<G>, store: &'a StageStore) -> Self {
        Self {
            retriever,
            invoker,
            store,
            top_k: DefaultsConfig::default().top_k,
        }
    }

    /// Passages retrieved per stage.
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn store(&self) -> &StageStore {
        self.store
    }

    /// Run every stage from the start.
    pub async fn run_all(&self, progress: &dyn PipelineProgress) -> Result<RunReport> {
        self.run_from(Stage::Requirements, progress).await
    }

    /// Run `start` and every later stage.
    ///
    /// A stage that fails leaves the later stages of this run skipped.
    /// Quota exhaustion stops the run with [`SpecWeaverError::Aborted`].
    #[instrument(skip_all, fields(start = %start))]
    pub async fn run_from(
        &self,
        start: Stage,
        progress: &dyn PipelineProgress,
    ) -> Result<RunReport> {
        let stages: Vec<Stage> = Stage::ALL.into_iter().filter(|s| *s >= start).collect();
        let mut report = RunReport::default();
        let mut blocked_by: Option<Stage> = None;

        for (i, stage) in stages.iter().copied().enumerate() {
            progress.task_progress(i + 1, stages.len(), stage.as_str());

            if let Some(blocker) = blocked_by {
                report.stages.push(StageReport {
                    stage,
                    status: StageStatus::Skipped {
                        reason: format!("{blocker} did not complete"),
                    },
                });
                continue;
            }

            progress.phase(&format!("Extracting {stage}"));
            let status = match self.run_stage(stage).await {
                Ok((records, path)) => StageStatus::Completed { records, path },
                Err(e) if e.is_terminal() => {
                    let checkpoint = self.checkpoint(&report, stage);
                    warn!(%stage, error = %e, "stopping extraction");
                    return Err(SpecWeaverError::aborted(checkpoint, e));
                }
                Err(e @ SpecWeaverError::MissingUpstream { .. }) => {
                    warn!(%stage, error = %e, "stage precondition not met");
                    blocked_by = Some(stage);
                    StageStatus::Skipped {
                        reason: e.to_string(),
                    }
                }
                Err(e) => {
                    warn!(%stage, error = %e, "stage failed");
                    blocked_by = Some(stage);
                    StageStatus::Failed {
                        error: e.to_string(),
                    }
                }
            };
            report.stages.push(StageReport { stage, status });
        }

        if report.status(Stage::Surfaces).is_some_and(|s| matches!(s, StageStatus::Completed { .. }))
        {
            report.architecture_map = Some(self.merge_architecture()?);
        }

        info!(
            completed = report.completed(),
            stages = report.stages.len(),
            "extraction run finished"
        );
        Ok(report)
    }

    /// Run one stage against the outputs currently on disk.
    ///
    /// Returns the record count and the path of the written output.
    pub async fn run_stage(&self, stage: Stage) -> Result<(usize, PathBuf)> {
        match stage {
            Stage::Requirements => {
                let output: RequirementsAnalysis = self
                    .extract(prompts::requirements_query(), prompts::requirements_prompt)
                    .await?;
                self.persist(&output)
            }
            Stage::Entities => {
                let requirements = self.store.require::<RequirementsAnalysis>(stage.as_str())?;
                let output: EntityArchitecture = self
                    .extract(prompts::entities_query(&requirements), |ctx| {
                        prompts::entities_prompt(ctx, &requirements)
                    })
                    .await?;
                self.persist(&output)
            }
            Stage::Actions => {
                let entities = self.store.require::<EntityArchitecture>(stage.as_str())?;
                let output: ActionArchitecture = self
                    .extract(prompts::actions_query(&entities), |ctx| {
                        prompts::actions_prompt(ctx, &entities)
                    })
                    .await?;
                self.persist(&output)
            }
            Stage::Surfaces => {
                let actions = self.store.require::<ActionArchitecture>(stage.as_str())?;
                let output: SurfaceArchitecture = self
                    .extract(prompts::surfaces_query(&actions), |ctx| {
                        prompts::surfaces_prompt(ctx, &actions)
                    })
                    .await?;
                self.persist(&output)
            }
        }
    }

    /// Merge the three architecture outputs into the architecture map.
    pub fn merge_architecture(&self) -> Result<PathBuf> {
        const CONSUMER: &str = "architecture_map";
        let map = ArchitectureMap::merge(
            self.store.require::<EntityArchitecture>(CONSUMER)?,
            self.store.require::<ActionArchitecture>(CONSUMER)?,
            self.store.require::<SurfaceArchitecture>(CONSUMER)?,
        );
        let path = self.store.save_map(&map)?;
        info!(units = map.unit_count(), path = %path.display(), "architecture map written");
        Ok(path)
    }

    /// Retrieve context for `query`, prompt the generator and decode the
    /// response as `T`.
    #[instrument(skip_all, fields(stage = %T::STAGE))]
    async fn extract<T: StageOutput>(
        &self,
        query: String,
        build_prompt: impl FnOnce(&str) -> String,
    ) -> Result<T> {
        let context = self.retriever.retrieve(&query, self.top_k).await?;
        if context.is_empty() {
            return Err(SpecWeaverError::NoContext {
                target: format!("stage `{}`", T::STAGE),
                query,
            });
        }

        let prompt = build_prompt(&context.joined(CONTEXT_SEPARATOR));
        let value = self.invoker.invoke_structured(&prompt).await?;
        decode_stage(value)
    }

    fn persist<T: StageOutput>(&self, output: &T) -> Result<(usize, PathBuf)> {
        let path = self.store.save(output)?;
        info!(stage = %T::STAGE, records = output.record_count(), "stage completed");
        Ok((output.record_count(), path))
    }

    fn checkpoint(&self, report: &RunReport, current: Stage) -> String {
        let completed = report
            .stages
            .iter()
            .rev()
            .find(|r| matches!(r.status, StageStatus::Completed { .. }))
            .map(|r| r.stage);
        let on_disk = current.upstream().filter(|s| self.store.exists(*s));
        match completed.or(on_disk) {
            Some(stage) => format!("stage `{stage}`"),
            None => "no completed stage".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::SilentProgress;
    use specweaver_llm::ServiceError;
    use specweaver_shared::{RetrievalHit, RetrievalResult, RetryPolicy};
    use std::cell::RefCell;
    use std::collections::VecDeque;

    /// Returns the same passages for every query and records the queries.
    struct FixedRetriever {
        passages: Vec<&'static str>,
        queries: RefCell<Vec<String>>,
    }

    impl FixedRetriever {
        fn new(passages: Vec<&'static str>) -> Self {
            Self {
                passages,
                queries: RefCell::new(Vec::new()),
            }
        }
    }

    impl Retriever for FixedRetriever {
        async fn retrieve(&self, query: &str, k: usize) -> Result<RetrievalResult> {
            self.queries.borrow_mut().push(query.to_string());
            Ok(RetrievalResult {
                query: query.into(),
                hits: self
                    .passages
                    .iter()
                    .take(k)
                    .enumerate()
                    .map(|(i, text)| RetrievalHit {
                        segment_id: i as i64 + 1,
                        document_name: "srs".into(),
                        text: (*text).into(),
                        distance: 0.0,
                    })
                    .collect(),
            })
        }
    }

    struct QueueGenerator(RefCell<VecDeque<std::result::Result<String, ServiceError>>>);

    impl QueueGenerator {
        fn new(responses: Vec<std::result::Result<String, ServiceError>>) -> Self {
            Self(RefCell::new(responses.into()))
        }
    }

    impl Generator for QueueGenerator {
        async fn generate(&self, _prompt: &str) -> std::result::Result<String, ServiceError> {
            self.0
                .borrow_mut()
                .pop_front()
                .unwrap_or_else(|| Err(ServiceError::http(500, "script exhausted")))
        }
    }

    fn ok(s: &str) -> std::result::Result<String, ServiceError> {
        Ok(s.to_string())
    }

    const REQUIREMENTS: &str = r#"```json
{"project_name": "Shop", "domain_entities": [{"name": "Product", "purpose": "item"}], "system_functions": []}
```"#;
    const ENTITIES: &str = r#"{"model": [{"name": "Product", "description": "sellable item"}]}"#;
    const ACTIONS: &str =
        r#"Here you go: {"controller": [{"name": "ProductController", "actions": ["list_products"]}]}"#;
    const SURFACES: &str = r#"{"view": [{"name": "ProductListView", "description": "catalog"}]}"#;

    fn temp_store() -> StageStore {
        StageStore::new(
            std::env::temp_dir().join(format!("sw-pipeline-test-{}", uuid::Uuid::now_v7())),
        )
    }

    fn invoker(
        responses: Vec<std::result::Result<String, ServiceError>>,
    ) -> ResilientInvoker<QueueGenerator> {
        ResilientInvoker::new(QueueGenerator::new(responses), RetryPolicy::immediate(1))
    }

    #[tokio::test]
    async fn full_run_writes_every_stage_and_the_map() {
        let store = temp_store();
        let retriever = FixedRetriever::new(vec!["Products are listed in a catalog."]);
        let invoker = invoker(vec![ok(REQUIREMENTS), ok(ENTITIES), ok(ACTIONS), ok(SURFACES)]);
        let pipeline = ExtractionPipeline::new(&retriever, &invoker, &store);
        assert_eq!(pipeline.top_k, DefaultsConfig::default().top_k);

        let report = pipeline.run_all(&SilentProgress).await.unwrap();

        assert!(report.is_success());
        for stage in Stage::ALL {
            assert!(store.exists(stage), "{stage} output missing");
        }
        let map = store.read_map().unwrap().unwrap();
        assert_eq!(map.view[0].name, "ProductListView");
        assert_eq!(report.architecture_map, Some(store.map_path()));

        // Later queries carry names from earlier outputs.
        let queries = retriever.queries.borrow();
        assert!(queries[1].contains("Product"));
        assert!(queries[3].contains("ProductController (list_products)"));
        let _ = std::fs::remove_dir_all(store.dir());
    }

    #[tokio::test]
    async fn missing_upstream_is_a_precondition_failure() {
        let store = temp_store();
        let retriever = FixedRetriever::new(vec!["context"]);
        let invoker = invoker(vec![ok(REQUIREMENTS), ok(ENTITIES)]);
        let pipeline = ExtractionPipeline::new(&retriever, &invoker, &store);

        pipeline.run_stage(Stage::Requirements).await.unwrap();
        pipeline.run_stage(Stage::Entities).await.unwrap();
        std::fs::remove_file(store.path(Stage::Entities)).unwrap();

        let err = pipeline.run_stage(Stage::Actions).await.unwrap_err();
        match err {
            SpecWeaverError::MissingUpstream { stage, upstream, .. } => {
                assert_eq!(stage, "actions");
                assert_eq!(upstream, "entities");
            }
            other => panic!("expected missing upstream, got {other:?}"),
        }
        // No retrieval happened for the blocked stage.
        assert_eq!(retriever.queries.borrow().len(), 2);

        let report = pipeline.run_from(Stage::Actions, &SilentProgress).await.unwrap();
        assert!(matches!(report.status(Stage::Actions), Some(StageStatus::Skipped { .. })));
        assert!(matches!(report.status(Stage::Surfaces), Some(StageStatus::Skipped { .. })));
        assert_eq!(report.architecture_map, None);
        let _ = std::fs::remove_dir_all(store.dir());
    }

    #[tokio::test]
    async fn empty_context_fails_only_that_stage() {
        let store = temp_store();
        let retriever = FixedRetriever::new(vec![]);
        let invoker = invoker(vec![]);
        let pipeline = ExtractionPipeline::new(&retriever, &invoker, &store);

        let report = pipeline.run_all(&SilentProgress).await.unwrap();

        match report.status(Stage::Requirements) {
            Some(StageStatus::Failed { error }) => assert!(error.contains("no context")),
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(report.stages.len(), 4);
        assert!(!store.exists(Stage::Requirements));
    }

    #[tokio::test]
    async fn malformed_output_fails_stage_without_writing() {
        let store = temp_store();
        let retriever = FixedRetriever::new(vec!["context"]);
        let invoker = invoker(vec![ok(r#"{"models": []}"#)]);
        let pipeline = ExtractionPipeline::new(&retriever, &invoker, &store);

        let err = pipeline.run_stage(Stage::Requirements).await.unwrap_err();
        assert!(matches!(err, SpecWeaverError::MalformedOutput { .. }));
        assert!(!store.exists(Stage::Requirements));
    }

    #[tokio::test]
    async fn quota_aborts_with_last_completed_stage() {
        let store = temp_store();
        let retriever = FixedRetriever::new(vec!["context"]);
        let invoker = invoker(vec![
            ok(REQUIREMENTS),
            ok(ENTITIES),
            Err(ServiceError::http(402, "insufficient credits")),
        ]);
        let pipeline = ExtractionPipeline::new(&retriever, &invoker, &store);

        let err = pipeline.run_all(&SilentProgress).await.unwrap_err();
        match &err {
            SpecWeaverError::Aborted { checkpoint, source } => {
                assert_eq!(checkpoint, "stage `entities`");
                assert!(matches!(**source, SpecWeaverError::QuotaExhausted { .. }));
            }
            other => panic!("expected abort, got {other:?}"),
        }
        assert!(err.is_terminal());
        assert!(store.exists(Stage::Entities));
        assert!(!store.exists(Stage::Actions));

        // Resuming names the stage already on disk.
        let invoker = self::invoker(vec![Err(ServiceError::http(402, "no credits"))]);
        let pipeline = ExtractionPipeline::new(&retriever, &invoker, &store);
        let err = pipeline.run_from(Stage::Actions, &SilentProgress).await.unwrap_err();
        assert!(err.to_string().starts_with("aborted after stage `entities`"));
        let _ = std::fs::remove_dir_all(store.dir());
    }
}
