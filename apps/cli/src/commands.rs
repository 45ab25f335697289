//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use specweaver_audit::Auditor;
use specweaver_core::{
    ArtifactGate, ArtifactGenerator, ArtifactOutcome, ExtractionPipeline, PipelineProgress, Stage,
    StageStatus, StageStore, draft_requirements, plan_units,
};
use specweaver_llm::{OpenRouterGenerator, ResilientInvoker};
use specweaver_rag::{ChunkStore, Document, HashingEmbedder};
use specweaver_shared::{
    AppConfig, IndexMode, Layer, RetryPolicy, Severity, SpecWeaverError, api_key, init_config,
    load_config,
};
use specweaver_storage::Storage;
use tracing::info;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// SpecWeaver: requirements document in, layered source artifacts out.
#[derive(Parser)]
#[command(
    name = "specweaver",
    version,
    about = "Extract a layered architecture from a requirements document and generate validated artifacts.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub(crate) enum Command {
    /// Split, embed and store a document in the chunk index.
    Index {
        /// `.txt`, `.md` or `.json` (array of page strings).
        file: PathBuf,

        /// Document name (defaults to the file stem).
        #[arg(short, long)]
        name: Option<String>,

        /// Add chunks after the existing ones instead of replacing the document.
        #[arg(long)]
        append: bool,
    },

    /// Query the chunk index.
    Search {
        query: String,

        /// Number of passages to return.
        #[arg(short, default_value = "5")]
        k: usize,
    },

    /// Draft a requirements document from a one-line idea.
    Draft { idea: String },

    /// Run the extraction stages.
    Extract {
        /// First stage to run: requirements, entities, actions or surfaces.
        #[arg(long, default_value = "requirements")]
        from: Stage,
    },

    /// Generate source artifacts from the architecture map.
    Generate {
        /// Only generate one layer: data, coordination or presentation.
        #[arg(long)]
        layer: Option<Layer>,
    },

    /// Check generated artifacts for layering violations.
    Audit {
        /// Directory holding the layer directories (defaults to the output dir).
        #[arg(long)]
        root: Option<PathBuf>,
    },

    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "specweaver=info",
        1 => "specweaver=debug",
        _ => "specweaver=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Index { file, name, append } => cmd_index(&file, name.as_deref(), append).await,
        Command::Search { query, k } => cmd_search(&query, k).await,
        Command::Draft { idea } => cmd_draft(&idea).await,
        Command::Extract { from } => cmd_extract(from).await,
        Command::Generate { layer } => cmd_generate(layer).await,
        Command::Audit { root } => cmd_audit(root),
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(),
        },
    }
}

// ---------------------------------------------------------------------------
// Shared setup
// ---------------------------------------------------------------------------

async fn open_chunk_store(config: &AppConfig, readonly: bool) -> Result<ChunkStore> {
    let path = config.index_path();
    let storage = if readonly {
        Storage::open_readonly(&path).await?
    } else {
        Storage::open(&path).await?
    };
    let embedder = HashingEmbedder::new(config.chunking.embedding_dimensions);
    Ok(ChunkStore::open(storage, embedder, &config.chunking).await?)
}

fn build_invoker(config: &AppConfig) -> Result<ResilientInvoker<OpenRouterGenerator>> {
    let key = api_key(config)?;
    let generator = OpenRouterGenerator::new(&config.openrouter, key)?;
    let invoker = ResilientInvoker::new(generator, RetryPolicy::from(&config.invocation));
    info!(
        model = invoker.generator().model(),
        max_attempts = invoker.policy().max_attempts,
        "generation service configured"
    );
    Ok(invoker)
}

/// Print where to resume from when a run was stopped by quota exhaustion.
fn explain_abort(error: &SpecWeaverError, resume: &str) {
    if let SpecWeaverError::Aborted { checkpoint, .. } = error {
        eprintln!();
        eprintln!("  Stopped: the generation service quota is exhausted.");
        eprintln!("  Last completed: {checkpoint}");
        eprintln!("  Resume with:    {resume}");
        eprintln!();
    }
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }

    fn finish(&self) {
        self.spinner.finish_and_clear();
    }
}

impl PipelineProgress for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn task_progress(&self, current: usize, total: usize, detail: &str) {
        self.spinner
            .set_message(format!("[{current}/{total}] {detail}"));
    }
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_index(file: &Path, name: Option<&str>, append: bool) -> Result<()> {
    let config = load_config()?;
    let document = Document::load(file, name)?;
    info!(document = %document.name, pages = document.pages.len(), "indexing document");

    let mut store = open_chunk_store(&config, false).await?;
    if append {
        store.set_mode(IndexMode::Append);
    }
    let summary = store.index(&document).await?;

    println!();
    println!("  Indexed {} ({:?})", document.name, store.mode());
    println!("  Added:    {}", summary.chunks_added);
    println!("  Replaced: {}", summary.chunks_replaced);
    println!("  Total:    {}", summary.total_chunks);
    println!("  Index:    {}", config.index_path().display());
    println!();
    println!("  Documents:");
    for doc in store.documents().await? {
        println!(
            "    {:<24} {:>4} pages {:>6} chunks  {}",
            doc.name, doc.page_count, doc.chunk_count, doc.indexed_at
        );
    }
    println!();
    Ok(())
}

async fn cmd_search(query: &str, k: usize) -> Result<()> {
    let config = load_config()?;
    let store = open_chunk_store(&config, true).await?;
    let result = store.search(query, k).await?;

    if result.is_empty() {
        println!("No passages found.");
        return Ok(());
    }
    for (rank, hit) in result.hits.iter().enumerate() {
        println!(
            "#{} [{}:{}] distance {:.4}",
            rank + 1,
            hit.document_name,
            hit.segment_id,
            hit.distance
        );
        println!("{}", hit.text);
        println!();
    }
    Ok(())
}

async fn cmd_draft(idea: &str) -> Result<()> {
    let config = load_config()?;
    let invoker = build_invoker(&config)?;

    let spinner = CliProgress::new();
    spinner.phase("Drafting requirements");
    let result = draft_requirements(&invoker, idea, &config.data_dir()).await;
    spinner.finish();

    let path = result?;
    println!("Requirements draft written to: {}", path.display());
    println!("Index it with: specweaver index {}", path.display());
    Ok(())
}

async fn cmd_extract(from: Stage) -> Result<()> {
    let config = load_config()?;
    let invoker = build_invoker(&config)?;
    let store = open_chunk_store(&config, true).await?;
    let stages = StageStore::new(config.data_dir());
    let pipeline = ExtractionPipeline::new(&store, &invoker, &stages).with_top_k(config.defaults.top_k);

    info!(from = %from, "starting extraction");
    let progress = CliProgress::new();
    let result = pipeline.run_from(from, &progress).await;
    progress.finish();

    let report = match result {
        Ok(report) => report,
        Err(e) => {
            let resume = stages_resume_hint(&stages);
            explain_abort(&e, &resume);
            return Err(e.into());
        }
    };

    println!();
    for entry in &report.stages {
        match &entry.status {
            StageStatus::Completed { records, path } => {
                println!("  {:<13} {records} records -> {}", entry.stage, path.display());
            }
            StageStatus::Failed { error } => println!("  {:<13} FAILED: {error}", entry.stage),
            StageStatus::Skipped { reason } => println!("  {:<13} skipped: {reason}", entry.stage),
        }
    }
    if let Some(map) = &report.architecture_map {
        println!("  Architecture map: {}", map.display());
    }
    println!();

    if report.is_success() {
        Ok(())
    } else {
        Err(eyre!(
            "extraction incomplete: {} of {} stages completed",
            report.completed(),
            report.stages.len()
        ))
    }
}

/// Command that resumes extraction at the first stage without output.
fn stages_resume_hint(stages: &StageStore) -> String {
    match Stage::ALL.into_iter().find(|s| !stages.exists(*s)) {
        Some(stage) => format!("specweaver extract --from {stage}"),
        None => "specweaver generate".to_string(),
    }
}

async fn cmd_generate(layer: Option<Layer>) -> Result<()> {
    let config = load_config()?;
    let stages = StageStore::new(config.data_dir());
    let map = stages.read_map()?.ok_or_else(|| {
        eyre!(
            "no architecture map at {}; run `specweaver extract` first",
            stages.map_path().display()
        )
    })?;

    let units: Vec<_> = plan_units(&map)
        .into_iter()
        .filter(|u| layer.is_none_or(|l| u.layer == l))
        .collect();
    if units.is_empty() {
        println!("Nothing to generate.");
        return Ok(());
    }

    let invoker = build_invoker(&config)?;
    let store = open_chunk_store(&config, true).await?;
    let gate = ArtifactGate::new(&config.validation)?;
    let generator = ArtifactGenerator::new(&store, &invoker, &gate, &config.layers, config.output_dir())
        .with_context(config.defaults.artifact_top_k, config.defaults.artifact_context_chars);

    info!(units = units.len(), "generating artifacts");
    let progress = CliProgress::new();
    let result = generator.generate_all(&units, &progress).await;
    progress.finish();

    let report = match result {
        Ok(report) => report,
        Err(e) => {
            explain_abort(&e, "specweaver generate");
            return Err(e.into());
        }
    };

    println!();
    for record in &report.artifacts {
        let status = match &record.outcome {
            ArtifactOutcome::Completed { path, attempts, .. } => {
                format!("ok ({attempts} attempt(s)) -> {}", path.display())
            }
            ArtifactOutcome::Hallucinated { attempts, verdict } => {
                format!("hallucinated after {attempts} attempts: {}", verdict.reason)
            }
            ArtifactOutcome::Failed { error } => format!("failed: {error}"),
        };
        println!("  {:<13} {:<28} {status}", record.layer, record.identifier);
    }
    println!();
    println!(
        "  Completed: {}  Hallucinated: {}  Failed: {}",
        report.completed(),
        report.hallucinated(),
        report.failed()
    );
    println!("  Output:    {}", generator.output_root().display());
    println!();
    Ok(())
}

fn cmd_audit(root: Option<PathBuf>) -> Result<()> {
    let config = load_config()?;
    let root = root.unwrap_or_else(|| config.output_dir());
    let mut auditor = Auditor::new(config.layers.clone())?;
    let (report, path) = auditor.audit_to_file(&root)?;

    println!();
    for v in &report.violations {
        let location = match v.line {
            Some(line) => format!("{}:{line}", v.file),
            None => v.file.clone(),
        };
        println!("  {:<8} {location}: {}", format!("{:?}", v.severity).to_uppercase(), v.message);
    }
    println!();
    println!(
        "  Files: {}  Critical: {}  Warning: {}  Info: {}",
        report.files_scanned,
        report.count(Severity::Critical),
        report.count(Severity::Warning),
        report.count(Severity::Info)
    );
    println!("  Report: {}", path.display());
    println!();
    Ok(())
}

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}
