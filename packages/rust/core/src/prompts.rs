//! Retrieval queries and prompt templates.
//!
//! Each stage query names the records produced upstream, so retrieval for
//! later stages is steered by what earlier stages found.

use crate::codegen::ArtifactUnit;
use crate::stages::{ActionArchitecture, EntityArchitecture, RequirementsAnalysis};
use specweaver_shared::Layer;

/// Separator placed between retrieved passages in a prompt.
pub const CONTEXT_SEPARATOR: &str = "\n---\n";

const JSON_ONLY: &str = "Respond with a single JSON object and nothing else. \
    Do not wrap it in markdown fences and do not add commentary.";

fn names<'a>(items: impl IntoIterator<Item = &'a str>) -> String {
    items.into_iter().collect::<Vec<_>>().join(", ")
}

// ---------------------------------------------------------------------------
// Requirements
// ---------------------------------------------------------------------------

pub fn requirements_query() -> String {
    "project overview, users and roles, core domain entities, functional requirements, \
     system functions and business rules"
        .into()
}

pub fn requirements_prompt(context: &str) -> String {
    format!(
        "You are a requirements analyst. Using only the specification excerpts below, \
identify the project, its core domain entities and the functions the system must provide.\n\n\
SPECIFICATION EXCERPTS:\n{context}\n\n\
Return JSON with this shape:\n\
{{\"project_name\": \"...\", \
\"domain_entities\": [{{\"name\": \"...\", \"purpose\": \"...\"}}], \
\"system_functions\": [{{\"name\": \"...\", \"description\": \"...\"}}]}}\n\n{JSON_ONLY}"
    )
}

// ---------------------------------------------------------------------------
// Entities
// ---------------------------------------------------------------------------

pub fn entities_query(requirements: &RequirementsAnalysis) -> String {
    format!(
        "data model, attributes, fields and relationships of: {}",
        names(requirements.domain_entities.iter().map(|e| e.name.as_str()))
    )
}

pub fn entities_prompt(context: &str, requirements: &RequirementsAnalysis) -> String {
    let entities = requirements
        .domain_entities
        .iter()
        .map(|e| format!("- {}: {}", e.name, e.purpose))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "You are a software architect designing the data layer of \"{project}\".\n\n\
DOMAIN ENTITIES:\n{entities}\n\n\
SPECIFICATION EXCERPTS:\n{context}\n\n\
Define one model per domain entity. Use PascalCase singular names without suffixes \
such as Model, Entity or DTO.\n\
Return JSON with this shape:\n\
{{\"model\": [{{\"name\": \"...\", \"description\": \"...\"}}]}}\n\n{JSON_ONLY}",
        project = requirements.project_name,
    )
}

// ---------------------------------------------------------------------------
// Actions
// ---------------------------------------------------------------------------

pub fn actions_query(entities: &EntityArchitecture) -> String {
    format!(
        "operations, workflows and user actions performed on: {}",
        names(entities.model.iter().map(|m| m.name.as_str()))
    )
}

pub fn actions_prompt(context: &str, entities: &EntityArchitecture) -> String {
    format!(
        "You are a software architect designing the coordination layer.\n\n\
MODELS: {models}\n\n\
SPECIFICATION EXCERPTS:\n{context}\n\n\
Define the controllers that coordinate these models and list the actions each exposes. \
Name controllers in PascalCase ending in Controller.\n\
Return JSON with this shape:\n\
{{\"controller\": [{{\"name\": \"...\", \"actions\": [\"...\"]}}]}}\n\n{JSON_ONLY}",
        models = names(entities.model.iter().map(|m| m.name.as_str())),
    )
}

// ---------------------------------------------------------------------------
// Surfaces
// ---------------------------------------------------------------------------

pub fn surfaces_query(actions: &ActionArchitecture) -> String {
    let controllers = actions.controller.iter().map(|c| {
        if c.actions.is_empty() {
            c.name.clone()
        } else {
            format!("{} ({})", c.name, c.actions.join(", "))
        }
    });
    format!(
        "screens, pages, forms and user interface for: {}",
        controllers.collect::<Vec<_>>().join("; ")
    )
}

pub fn surfaces_prompt(context: &str, actions: &ActionArchitecture) -> String {
    let controllers = actions
        .controller
        .iter()
        .map(|c| format!("- {}: {}", c.name, c.actions.join(", ")))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "You are a software architect designing the presentation layer.\n\n\
CONTROLLERS AND ACTIONS:\n{controllers}\n\n\
SPECIFICATION EXCERPTS:\n{context}\n\n\
Define the views users interact with. Name views in PascalCase ending in View.\n\
Return JSON with this shape:\n\
{{\"view\": [{{\"name\": \"...\", \"description\": \"...\"}}]}}\n\n{JSON_ONLY}"
    )
}

// ---------------------------------------------------------------------------
// Artifacts
// ---------------------------------------------------------------------------

pub fn artifact_query(unit: &ArtifactUnit) -> String {
    match unit.layer {
        Layer::Data => format!("{} attributes fields data {}", unit.source_name, unit.description),
        Layer::Coordination => format!(
            "{} operations {}",
            unit.source_name,
            unit.actions.join(" ")
        ),
        Layer::Presentation => format!(
            "{} screen display user interface {}",
            unit.source_name, unit.description
        ),
    }
}

pub fn artifact_prompt(unit: &ArtifactUnit, context: &str) -> String {
    let role = match unit.layer {
        Layer::Data => "a data model class with typed attributes and methods that operate on them",
        Layer::Coordination => {
            "a controller class with one method per action, delegating to model classes"
        }
        Layer::Presentation => {
            "a view class with methods that render output and collect user input"
        }
    };
    let actions = if unit.actions.is_empty() {
        String::new()
    } else {
        format!("\nActions to implement as methods: {}\n", unit.actions.join(", "))
    };
    format!(
        "Write Python source for {role}.\n\n\
The class MUST be named exactly `{identifier}`.\n\
Purpose: {description}\n{actions}\n\
RELEVANT REQUIREMENTS:\n{context}\n\n\
Return only the Python source code.",
        identifier = unit.identifier,
        description = unit.description,
    )
}

/// Retry prompt after the gate rejected an artifact.
pub fn strict_artifact_prompt(base: &str, identifier: &str, rejection: &str) -> String {
    format!(
        "{base}\n\n\
Your previous answer was rejected: {rejection}.\n\
STRICT REQUIREMENTS:\n\
1. Declare exactly one primary class named `{identifier}`. Do not rename it or add suffixes.\n\
2. Implement real methods with bodies; placeholders are rejected.\n\
3. Return only Python source code."
    )
}

// ---------------------------------------------------------------------------
// Drafting
// ---------------------------------------------------------------------------

pub fn draft_prompt(idea: &str) -> String {
    format!(
        "Write a software requirements specification for the following idea:\n\n{idea}\n\n\
Cover: purpose and scope, user roles, domain entities with their attributes, \
functional requirements as numbered statements, and non-functional requirements. \
Write plain text with section headings separated by blank lines."
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::{ActionSpec, DomainEntity};

    #[test]
    fn queries_name_upstream_records() {
        let requirements = RequirementsAnalysis {
            project_name: "Shop".into(),
            domain_entities: vec![
                DomainEntity {
                    name: "Product".into(),
                    purpose: "sellable item".into(),
                },
                DomainEntity {
                    name: "Order".into(),
                    purpose: "purchase".into(),
                },
            ],
            system_functions: vec![],
        };
        assert!(entities_query(&requirements).ends_with("Product, Order"));

        let actions = ActionArchitecture {
            controller: vec![ActionSpec {
                name: "OrderController".into(),
                actions: vec!["checkout".into()],
            }],
        };
        assert!(surfaces_query(&actions).contains("OrderController (checkout)"));
    }

    #[test]
    fn strict_prompt_restates_identifier() {
        let prompt = strict_artifact_prompt("base", "Invoice", "found `InvoiceModel`");
        assert!(prompt.starts_with("base"));
        assert!(prompt.contains("named `Invoice`"));
        assert!(prompt.contains("found `InvoiceModel`"));
    }
}
