//! Structural pass: walks the tree-sitter Python syntax tree.

use specweaver_shared::{Result, SpecWeaverError};
use tree_sitter::{Node, Parser};

use crate::{ClassDecl, Findings, ImportRef};

pub struct StructuralPass {
    parser: Parser,
}

impl StructuralPass {
    pub fn new() -> Result<Self> {
        let mut parser = Parser::new();
        parser
            .set_language(&tree_sitter_python::LANGUAGE.into())
            .map_err(|e| SpecWeaverError::config(format!("failed to load Python grammar: {e}")))?;
        Ok(Self { parser })
    }

    /// Imports and class declarations of `source`.
    ///
    /// The grammar recovers from errors, so a broken file still yields the
    /// declarations that parsed; `syntax_error` records where parsing first
    /// went wrong.
    pub fn scan(&mut self, source: &str) -> Findings {
        let Some(tree) = self.parser.parse(source, None) else {
            return Findings {
                syntax_error: Some(1),
                ..Findings::default()
            };
        };

        let root = tree.root_node();
        let mut findings = Findings::default();
        if root.has_error() {
            let line = first_error(root).unwrap_or(root).start_position().row + 1;
            findings.syntax_error = Some(line);
        }
        collect(root, source.as_bytes(), &mut findings);
        findings
    }
}

fn collect(node: Node, src: &[u8], findings: &mut Findings) {
    let line = node.start_position().row + 1;
    match node.kind() {
        "import_statement" => {
            let mut cursor = node.walk();
            for name in node.children_by_field_name("name", &mut cursor) {
                if let Some(module) = imported_name(name, src) {
                    findings.imports.push(ImportRef {
                        module,
                        names: Vec::new(),
                        line,
                    });
                }
            }
        }
        "import_from_statement" => {
            let module = node
                .child_by_field_name("module_name")
                .map(|n| text(n, src))
                .unwrap_or_default();
            let mut cursor = node.walk();
            let names = node
                .children_by_field_name("name", &mut cursor)
                .filter_map(|n| imported_name(n, src))
                .collect();
            findings.imports.push(ImportRef {
                module,
                names,
                line,
            });
        }
        "class_definition" => {
            if let Some(name) = node.child_by_field_name("name") {
                findings.classes.push(ClassDecl {
                    name: text(name, src),
                    line,
                });
            }
        }
        _ => {}
    }

    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        collect(child, src, findings);
    }
}

/// `a.b` for a dotted name, the original name for `a.b as c`.
fn imported_name(node: Node, src: &[u8]) -> Option<String> {
    let target = match node.kind() {
        "aliased_import" => node.child_by_field_name("name")?,
        _ => node,
    };
    let name = text(target, src);
    (!name.is_empty()).then_some(name)
}

fn first_error(node: Node) -> Option<Node> {
    if node.is_error() || node.is_missing() {
        return Some(node);
    }
    if !node.has_error() {
        return None;
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if let Some(found) = first_error(child) {
            return Some(found);
        }
    }
    None
}

fn text(node: Node, src: &[u8]) -> String {
    node.utf8_text(src).unwrap_or_default().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_imports_and_classes() {
        let mut pass = StructuralPass::new().unwrap();
        let findings = pass.scan(
            "import os, controllers.cart_controller as cc\n\
             from views.cart_view import CartView, CartSummary as Summary\n\
             from . import helpers\n\n\
             class Cart:\n    def total(self):\n        return 0\n",
        );

        assert_eq!(findings.syntax_error, None);
        let modules: Vec<&str> = findings.imports.iter().map(|i| i.module.as_str()).collect();
        assert_eq!(modules, vec!["os", "controllers.cart_controller", "views.cart_view", "."]);
        assert_eq!(findings.imports[2].names, vec!["CartView", "CartSummary"]);
        assert_eq!(findings.imports[2].line, 2);
        assert_eq!(findings.imports[3].names, vec!["helpers"]);
        assert_eq!(findings.classes.len(), 1);
        assert_eq!(findings.classes[0].name, "Cart");
        assert_eq!(findings.classes[0].line, 5);
    }

    #[test]
    fn broken_source_reports_syntax_error_and_keeps_declarations() {
        let mut pass = StructuralPass::new().unwrap();
        let findings = pass.scan(
            "from views.order_view import OrderView\n\nclass Order:\n    def total(self:\n        return 1\n",
        );

        assert!(findings.syntax_error.is_some());
        assert!(findings.imports.iter().any(|i| i.module == "views.order_view"));
    }
}
