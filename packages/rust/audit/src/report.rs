//! Merging pass results and writing `violations.json`.

use std::collections::HashSet;
use std::path::Path;

use specweaver_shared::{Result, Violation, ViolationReport, write_json_atomic};
use tracing::debug;

/// File name of the written report.
pub const VIOLATIONS_FILE: &str = "violations.json";

/// Combine the findings of independent passes.
///
/// One violation is kept per `(file, kind)`: the first one seen, so earlier
/// passes win ties. The result is ordered by file, then severity (highest
/// first), then kind.
pub fn merge(passes: impl IntoIterator<Item = Vec<Violation>>) -> Vec<Violation> {
    let mut seen = HashSet::new();
    let mut merged: Vec<Violation> = passes
        .into_iter()
        .flatten()
        .filter(|v| seen.insert((v.file.clone(), v.kind)))
        .collect();
    merged.sort_by(|a, b| {
        a.file
            .cmp(&b.file)
            .then(b.severity.cmp(&a.severity))
            .then(a.kind.cmp(&b.kind))
    });
    merged
}

/// Atomically write `report` to `path`.
pub fn write_report(path: &Path, report: &ViolationReport) -> Result<()> {
    write_json_atomic(path, report)?;
    debug!(path = %path.display(), violations = report.total_count, "violation report written");
    Ok(())
}
