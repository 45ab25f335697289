//! Lexical pass: line-oriented regexes over the raw source.
//!
//! Needs no parse tree, so it still sees the imports of a file the
//! structural pass could not make sense of.

use std::sync::LazyLock;

use regex::Regex;

use crate::{ClassDecl, Findings, ImportRef};

static IMPORT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*import\s+(.+)$").expect("valid regex"));

static FROM_IMPORT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*from\s+(\.*[\w.]*)\s+import\s+(.+)$").expect("valid regex")
});

static CLASS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*class\s+(\w+)").expect("valid regex"));

/// Imports and class declarations found line by line.
pub fn scan(source: &str) -> Findings {
    let mut findings = Findings::default();

    for (index, raw) in source.lines().enumerate() {
        let line = index + 1;
        let code = raw.split('#').next().unwrap_or_default();

        if let Some(caps) = FROM_IMPORT_RE.captures(code) {
            findings.imports.push(ImportRef {
                module: caps[1].to_string(),
                names: split_names(&caps[2]),
                line,
            });
        } else if let Some(caps) = IMPORT_RE.captures(code) {
            findings
                .imports
                .extend(split_names(&caps[1]).into_iter().map(|module| ImportRef {
                    module,
                    names: Vec::new(),
                    line,
                }));
        } else if let Some(caps) = CLASS_RE.captures(code) {
            findings.classes.push(ClassDecl {
                name: caps[1].to_string(),
                line,
            });
        }
    }
    findings
}

/// `a, b as c, (d)` → `[a, b, d]`; `*` is dropped.
fn split_names(list: &str) -> Vec<String> {
    list.trim()
        .trim_start_matches('(')
        .trim_end_matches('\\')
        .trim_end_matches(')')
        .split(',')
        .filter_map(|part| part.split_whitespace().next())
        .filter(|name| *name != "*")
        .map(str::to_string)
        .collect()
}
