//! Artifact validation gate.
//!
//! A generated artifact is accepted only when all of these hold:
//! 1. a primary identifier can be extracted,
//! 2. it carries no suspect suffix the expected identifier lacks,
//! 3. it equals the expected identifier exactly,
//! 4. the artifact is longer than the placeholder threshold,
//! 5. it contains at least one behaviour unit.
//!
//! Checks run in that order and the first failure becomes the verdict reason.

use regex::Regex;
use serde::Serialize;
use specweaver_shared::{Result, SpecWeaverError, ValidationConfig};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationVerdict {
    pub accepted: bool,
    pub reason: String,
    pub observed_identifier: Option<String>,
}

impl ValidationVerdict {
    fn accept(observed: String) -> Self {
        Self {
            accepted: true,
            reason: "artifact satisfies all contracts".into(),
            observed_identifier: Some(observed),
        }
    }

    fn reject(reason: impl Into<String>, observed: Option<String>) -> Self {
        Self {
            accepted: false,
            reason: reason.into(),
            observed_identifier: observed,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ArtifactGate {
    identifier: Regex,
    behavior: Regex,
    min_length: usize,
    suspect_suffixes: Vec<String>,
    max_regenerations: u32,
}

impl ArtifactGate {
    pub fn new(config: &ValidationConfig) -> Result<Self> {
        let identifier = Regex::new(&config.identifier_pattern).map_err(|e| {
            SpecWeaverError::config(format!("invalid identifier_pattern: {e}"))
        })?;
        if identifier.captures_len() < 2 {
            return Err(SpecWeaverError::config(
                "identifier_pattern needs a capture group for the identifier",
            ));
        }
        let behavior = Regex::new(&config.behavior_pattern)
            .map_err(|e| SpecWeaverError::config(format!("invalid behavior_pattern: {e}")))?;

        Ok(Self {
            identifier,
            behavior,
            min_length: config.min_content_length,
            suspect_suffixes: config
                .suspect_suffixes
                .iter()
                .filter(|s| !s.is_empty())
                .cloned()
                .collect(),
            max_regenerations: config.max_regenerations,
        })
    }

    /// Extra generation rounds allowed after a rejection.
    pub fn max_regenerations(&self) -> u32 {
        self.max_regenerations
    }

    /// First identifier declared in `artifact`.
    pub fn primary_identifier(&self, artifact: &str) -> Option<String> {
        self.identifier
            .captures(artifact)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
    }

    pub fn check(&self, artifact: &str, expected: &str) -> ValidationVerdict {
        let Some(observed) = self.primary_identifier(artifact) else {
            return ValidationVerdict::reject("no primary identifier declared", None);
        };

        if let Some(suffix) = self
            .suspect_suffixes
            .iter()
            .find(|s| observed.ends_with(s.as_str()) && !expected.ends_with(s.as_str()))
        {
            return ValidationVerdict::reject(
                format!("identifier `{observed}` adds suffix `{suffix}` to expected `{expected}`"),
                Some(observed),
            );
        }

        if observed != expected {
            return ValidationVerdict::reject(
                format!("expected identifier `{expected}`, found `{observed}`"),
                Some(observed),
            );
        }

        let length = artifact.chars().count();
        if length <= self.min_length {
            return ValidationVerdict::reject(
                format!(
                    "artifact has {length} characters, placeholder threshold is {}",
                    self.min_length
                ),
                Some(observed),
            );
        }

        if !self.behavior.is_match(artifact) {
            return ValidationVerdict::reject("no behaviour unit found", Some(observed));
        }

        ValidationVerdict::accept(observed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate() -> ArtifactGate {
        ArtifactGate::new(&ValidationConfig::default()).unwrap()
    }

    fn class_source(name: &str) -> String {
        format!(
            "class {name}:\n    \"\"\"Stores a customer order.\"\"\"\n\n    def __init__(self, order_id, items):\n        self.order_id = order_id\n        self.items = list(items)\n\n    def total(self):\n        return sum(item.price * item.quantity for item in self.items)\n"
        )
    }

    #[test]
    fn accepts_matching_artifact() {
        let verdict = gate().check(&class_source("Order"), "Order");
        assert!(verdict.accepted, "{}", verdict.reason);
        assert_eq!(verdict.observed_identifier.as_deref(), Some("Order"));
    }

    #[test]
    fn rejects_missing_identifier() {
        let verdict = gate().check(&"def helper():\n    return 1\n".repeat(20), "Order");
        assert!(!verdict.accepted);
        assert_eq!(verdict.observed_identifier, None);
    }

    #[test]
    fn rejects_suspect_suffix() {
        let verdict = gate().check(&class_source("OrderModel"), "Order");
        assert!(!verdict.accepted);
        assert!(verdict.reason.contains("suffix `Model`"));
    }

    #[test]
    fn suffix_allowed_when_expected() {
        let verdict = gate().check(&class_source("OrderData"), "OrderData");
        assert!(verdict.accepted, "{}", verdict.reason);
    }

    #[test]
    fn rejects_different_name_case_sensitive() {
        let verdict = gate().check(&class_source("order"), "Order");
        assert!(!verdict.accepted);
        assert!(verdict.reason.contains("found `order`"));
    }

    #[test]
    fn rejects_placeholder() {
        let verdict = gate().check("class Order:\n    def run(self):\n        pass\n", "Order");
        assert!(!verdict.accepted);
        assert!(verdict.reason.contains("placeholder"));
    }

    #[test]
    fn rejects_without_behaviour() {
        let body = format!("class Order:\n{}", "    total = 0  # running total of line items\n".repeat(8));
        let verdict = gate().check(&body, "Order");
        assert!(!verdict.accepted);
        assert!(verdict.reason.contains("behaviour"));
    }

    #[test]
    fn configurable_suffixes_and_patterns() {
        let config = ValidationConfig {
            suspect_suffixes: vec!["Impl".into()],
            min_content_length: 10,
            ..ValidationConfig::default()
        };
        let gate = ArtifactGate::new(&config).unwrap();
        assert!(gate.check(&class_source("OrderModel"), "Order").reason.contains("found"));
        assert!(!gate.check(&class_source("OrderImpl"), "Order").accepted);

        let bad = ValidationConfig {
            identifier_pattern: r"class\s+\w+".into(),
            ..ValidationConfig::default()
        };
        assert!(ArtifactGate::new(&bad).is_err());
    }
}
