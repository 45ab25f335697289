//! Structural dependency auditor for generated artifacts.
//!
//! Artifacts are partitioned into layers by their top-level directory. Each
//! file is scanned by two independent passes (a tree-sitter parse and a
//! line-oriented lexical scan); both feed the same layering rules and their
//! violations are merged per `(file, kind)`. No generation calls are made.

pub mod lexical;
pub mod report;
pub mod rules;
pub mod structural;

use std::path::{Path, PathBuf};

use specweaver_shared::{Layer, LayerConfig, Result, SpecWeaverError, Violation, ViolationKind, ViolationReport};
use tracing::{info, instrument, warn};
use walkdir::WalkDir;

pub use report::{VIOLATIONS_FILE, merge, write_report};
pub use rules::{Reference, UnitIndex, evaluate, resolve};
pub use structural::StructuralPass;

/// An import statement as seen by a pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportRef {
    /// Module path as written, including leading dots of relative imports.
    pub module: String,
    /// Names listed after `import` in a `from` import.
    pub names: Vec<String>,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassDecl {
    pub name: String,
    pub line: usize,
}

/// What one pass extracted from one file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Findings {
    pub imports: Vec<ImportRef>,
    pub classes: Vec<ClassDecl>,
    /// First line the parser could not make sense of.
    pub syntax_error: Option<usize>,
}

/// A generated source file assigned to a layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub path: PathBuf,
    /// Path relative to the audited root, `/`-separated.
    pub relative: String,
    pub layer: Layer,
    pub stem: String,
}

/// Result of walking an audit root.
#[derive(Debug, Default)]
pub struct Collection {
    pub artifacts: Vec<Artifact>,
    /// Layer entries the walk could not visit, one violation per path.
    pub unreadable: Vec<Violation>,
}

/// Source files under `root` whose top-level directory is a layer directory.
///
/// Symlinks are followed. An entry the walk cannot visit is logged and, when
/// it lies inside a layer directory, reported as unreadable; the walk goes on.
pub fn collect_artifacts(root: &Path, layers: &LayerConfig) -> Result<Collection> {
    if !root.is_dir() {
        return Err(SpecWeaverError::validation(format!(
            "audit root {} is not a directory",
            root.display()
        )));
    }

    let mut collection = Collection::default();
    for entry in WalkDir::new(root).follow_links(true).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                let path = e.path().unwrap_or(root);
                warn!(path = %path.display(), error = %e, "skipping unreadable entry");
                let relative = relative_path(root, path)
                    .filter(|relative| layer_of(relative, layers).is_some());
                if let Some(relative) = relative {
                    collection.unreadable.push(Violation::new(
                        ViolationKind::SyntaxViolation,
                        relative,
                        None,
                        format!("entry could not be read: {e}"),
                    ));
                }
                continue;
            }
        };
        let path = entry.path();
        if !entry.file_type().is_file()
            || path.extension().and_then(|e| e.to_str()) != Some(layers.extension.as_str())
        {
            continue;
        }

        let Some(relative) = relative_path(root, path) else {
            continue;
        };
        let (Some(layer), Some(stem)) = (
            layer_of(&relative, layers),
            path.file_stem().and_then(|s| s.to_str()),
        ) else {
            continue;
        };

        collection.artifacts.push(Artifact {
            path: path.to_path_buf(),
            relative,
            layer,
            stem: stem.to_string(),
        });
    }
    Ok(collection)
}

fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<&str> = relative
        .components()
        .filter_map(|c| c.as_os_str().to_str())
        .collect();
    (!parts.is_empty()).then(|| parts.join("/"))
}

fn layer_of(relative: &str, layers: &LayerConfig) -> Option<Layer> {
    relative
        .split('/')
        .next()
        .and_then(|dir| layers.layer_for_dir(dir))
}

pub struct Auditor {
    layers: LayerConfig,
    structural: StructuralPass,
}

impl Auditor {
    pub fn new(layers: LayerConfig) -> Result<Self> {
        Ok(Self {
            layers,
            structural: StructuralPass::new()?,
        })
    }

    /// Scan every artifact under `root`.
    ///
    /// A file that cannot be read or parsed is reported and the scan moves
    /// on to the next file.
    #[instrument(skip_all, fields(root = %root.display()))]
    pub fn audit(&mut self, root: &Path) -> Result<ViolationReport> {
        let Collection {
            artifacts,
            mut unreadable,
        } = collect_artifacts(root, &self.layers)?;

        let mut scanned = Vec::with_capacity(artifacts.len());
        for artifact in artifacts {
            match std::fs::read_to_string(&artifact.path) {
                Ok(source) => {
                    let structural = self.structural.scan(&source);
                    let lexical = lexical::scan(&source);
                    scanned.push((artifact, structural, lexical));
                }
                Err(e) => {
                    warn!(file = %artifact.relative, error = %e, "cannot read artifact");
                    unreadable.push(Violation::new(
                        ViolationKind::SyntaxViolation,
                        &artifact.relative,
                        None,
                        format!("file could not be read: {e}"),
                    ));
                }
            }
        }

        let mut index = UnitIndex::default();
        for (artifact, structural, lexical) in &scanned {
            index.insert(artifact.stem.clone(), artifact.layer);
            for class in structural.classes.iter().chain(&lexical.classes) {
                index.insert(class.name.clone(), artifact.layer);
            }
        }

        let mut structural_violations = Vec::new();
        let mut lexical_violations = Vec::new();
        for (artifact, structural, lexical) in &scanned {
            structural_violations.extend(evaluate(artifact, structural, &self.layers, &index));
            lexical_violations.extend(evaluate(artifact, lexical, &self.layers, &index));
        }

        let files_scanned = scanned.len() + unreadable.len();
        let violations = merge([structural_violations, lexical_violations, unreadable]);
        let report = ViolationReport::new(violations, files_scanned);
        info!(
            files = files_scanned,
            violations = report.total_count,
            "audit complete"
        );
        Ok(report)
    }

    /// [`audit`](Self::audit) and write the report to `root/violations.json`.
    pub fn audit_to_file(&mut self, root: &Path) -> Result<(ViolationReport, PathBuf)> {
        let report = self.audit(root)?;
        let path = root.join(VIOLATIONS_FILE);
        write_report(&path, &report)?;
        Ok((report, path))
    }
}
