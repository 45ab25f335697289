//! Layering rules applied to one pass's findings for one artifact.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use specweaver_shared::{Layer, LayerConfig, Violation, ViolationKind};

use crate::{Artifact, Findings, ImportRef};

static PASCAL_CASE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z][A-Za-z0-9]*$").expect("valid regex"));

/// A layer unit an import points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub layer: Layer,
    /// Module stem or class name of the referenced unit, when the import names one.
    pub unit: Option<String>,
}

/// Maps known unit names (file stems and class names) to their layer.
#[derive(Debug, Default)]
pub struct UnitIndex {
    units: HashMap<String, Layer>,
}

impl UnitIndex {
    pub fn insert(&mut self, name: impl Into<String>, layer: Layer) {
        self.units.insert(name.into(), layer);
    }

    pub fn layer_of(&self, name: &str) -> Option<Layer> {
        self.units.get(name).copied()
    }
}

/// Layers an import reaches.
///
/// A module path through a layer directory (`views.cart_view`,
/// `..controllers`) resolves by directory; otherwise the imported names are
/// looked up in the unit index.
pub fn resolve(import: &ImportRef, layers: &LayerConfig, index: &UnitIndex) -> Vec<Reference> {
    let parts: Vec<&str> = import
        .module
        .trim_start_matches('.')
        .split('.')
        .filter(|p| !p.is_empty())
        .collect();

    if let Some(pos) = parts.iter().position(|p| layers.layer_for_dir(p).is_some()) {
        let Some(layer) = layers.layer_for_dir(parts[pos]) else {
            return Vec::new();
        };
        return match parts.get(pos + 1) {
            Some(stem) => vec![Reference {
                layer,
                unit: Some((*stem).to_string()),
            }],
            None if import.names.is_empty() => vec![Reference { layer, unit: None }],
            None => import
                .names
                .iter()
                .map(|name| Reference {
                    layer,
                    unit: Some(name.clone()),
                })
                .collect(),
        };
    }

    let mut candidates: Vec<&str> = import.names.iter().map(String::as_str).collect();
    if let Some(last) = parts.last() {
        candidates.push(*last);
    }
    candidates
        .into_iter()
        .filter_map(|name| {
            index.layer_of(name).map(|layer| Reference {
                layer,
                unit: Some(name.to_string()),
            })
        })
        .collect()
}

/// Violations of one artifact according to one pass.
pub fn evaluate(
    artifact: &Artifact,
    findings: &Findings,
    layers: &LayerConfig,
    index: &UnitIndex,
) -> Vec<Violation> {
    let mut violations = Vec::new();

    if let Some(line) = findings.syntax_error {
        violations.push(Violation::new(
            ViolationKind::SyntaxViolation,
            &artifact.relative,
            Some(line),
            "file does not parse as Python",
        ));
    }

    for class in &findings.classes {
        if !PASCAL_CASE_RE.is_match(&class.name) {
            violations.push(Violation::new(
                ViolationKind::NamingConvention,
                &artifact.relative,
                Some(class.line),
                format!("class `{}` should be PascalCase", class.name),
            ));
        }
    }

    for import in &findings.imports {
        for reference in resolve(import, layers, index) {
            if let Some(kind) = classify(artifact, findings, &reference) {
                violations.push(Violation::new(
                    kind,
                    &artifact.relative,
                    Some(import.line),
                    message(kind, artifact.layer, &reference, import),
                ));
            }
        }
    }
    violations
}

fn classify(artifact: &Artifact, findings: &Findings, reference: &Reference) -> Option<ViolationKind> {
    match (artifact.layer, reference.layer) {
        (Layer::Data, Layer::Presentation | Layer::Coordination) => {
            Some(ViolationKind::DataLayerDependency)
        }
        (Layer::Presentation, Layer::Data) => Some(ViolationKind::PresentationBypass),
        (Layer::Coordination, Layer::Coordination) if !is_self(artifact, findings, reference) => {
            Some(ViolationKind::CoordinationCoupling)
        }
        _ => None,
    }
}

fn is_self(artifact: &Artifact, findings: &Findings, reference: &Reference) -> bool {
    match &reference.unit {
        Some(unit) => {
            *unit == artifact.stem || findings.classes.iter().any(|c| c.name == *unit)
        }
        None => false,
    }
}

fn message(kind: ViolationKind, from: Layer, reference: &Reference, import: &ImportRef) -> String {
    let target = match &reference.unit {
        Some(unit) => format!("{} unit `{unit}`", reference.layer),
        None => format!("{} layer", reference.layer),
    };
    let statement = if import.names.is_empty() {
        format!("import {}", import.module)
    } else {
        format!("from {} import {}", import.module, import.names.join(", "))
    };
    match kind {
        ViolationKind::DataLayerDependency => {
            format!("{from} layer depends on {target} (`{statement}`); data units must not know their callers")
        }
        ViolationKind::PresentationBypass => {
            format!("{from} layer reads {target} directly (`{statement}`); go through a controller")
        }
        _ => format!("{from} unit is coupled to {target} (`{statement}`)"),
    }
}
