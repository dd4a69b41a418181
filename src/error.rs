//! Unified error handling with fix suggestions for the koji-sync CLI.
//!
//! Each pipeline stage (loader, model, template, namespace, solver, hub)
//! keeps its own `thiserror` enum; this module rolls them into a single
//! `SyncError` for the CLI entry point, paired with a `FixSuggestion` trait
//! so every leaf variant can offer actionable remediation text.

use thiserror::Error;

// ============================================================================
// FIX SUGGESTION TRAIT
// ============================================================================

pub trait FixSuggestion {
    fn fix_suggestion(&self) -> Option<&str>;
}

// ============================================================================
// LEAF ERRORS
// ============================================================================

#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("{path}: {source}")]
    Yaml {
        path: std::path::PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("{path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("document at {path}:{line} has no 'type' key")]
    MissingType { path: std::path::PathBuf, line: usize },
}

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("{path}:{line}: {typetag} '{field}': {message}")]
    Validation {
        path: std::path::PathBuf,
        line: usize,
        typetag: String,
        field: String,
        message: String,
    },

    #[error(transparent)]
    Key(#[from] crate::types::KeyError),
}

#[derive(Error, Debug)]
pub enum TemplateError {
    #[error("template '{template}' missing required parameter '{parameter}' (invoked at {site})")]
    MissingParameter {
        template: String,
        parameter: String,
        site: String,
    },

    #[error("template '{template}' render failed: {message}")]
    RenderFailed { template: String, message: String },

    #[error("invalid template definition '{template}': {message}")]
    InvalidDefinition { template: String, message: String },
}

#[derive(Error, Debug)]
pub enum NamespaceError {
    #[error("expansion deadlock: '{site}' could not resolve template '{template_name}' after exhausting the feed line")]
    ExpansionDeadlock { site: String, template_name: String },

    #[error("'{key_or_name}' redefined: first seen at {first}, redefined at {second}")]
    Redefined {
        key_or_name: String,
        first: String,
        second: String,
    },

    #[error("expansion exceeded max depth ({max_depth}) at '{site}'")]
    MaxDepthExceeded { site: String, max_depth: usize },

    #[error(transparent)]
    Template(#[from] TemplateError),
}

#[derive(Error, Debug)]
pub enum SolverError {
    #[error("unbreakable cycle among: {}", .keys.join(", "))]
    UnbreakableCycle { keys: Vec<String> },
}

#[derive(Error, Debug)]
pub enum HubError {
    #[error("hub call '{method}' for {key} failed: {message}")]
    Call {
        method: String,
        arguments: serde_json::Value,
        message: String,
        key: String,
    },

    #[error("authentication failed for profile '{profile}': {cause}")]
    Authentication { profile: String, cause: String },

    #[error("{} change(s) failed while applying", .0.len())]
    Batch(Vec<HubError>),

    #[error("missing dependencies: {}", .keys.join(", "))]
    MissingObjects { keys: Vec<String> },
}

#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error(transparent)]
    MissingObjects(#[from] MissingObjectsDetail),

    #[error("workflow is in state {state:?}, which does not support this operation")]
    InvalidState { state: String },
}

#[derive(Error, Debug)]
#[error("hub is missing {} object(s): {}", .keys.len(), .keys.join(", "))]
pub struct MissingObjectsDetail {
    pub keys: Vec<String>,
}

// ============================================================================
// TOP-LEVEL ERROR
// ============================================================================

#[derive(Error, Debug)]
pub enum SyncError {
    #[error(transparent)]
    Loader(#[from] LoaderError),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error(transparent)]
    Namespace(#[from] NamespaceError),

    #[error(transparent)]
    Solver(#[from] SolverError),

    #[error(transparent)]
    Hub(#[from] HubError),

    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    #[error(transparent)]
    Key(#[from] crate::types::KeyError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl SyncError {
    pub fn other(msg: impl Into<String>) -> Self {
        SyncError::Other(msg.into())
    }
}

impl FixSuggestion for SyncError {
    fn fix_suggestion(&self) -> Option<&str> {
        match self {
            SyncError::Loader(e) => e.fix_suggestion(),
            SyncError::Model(e) => e.fix_suggestion(),
            SyncError::Template(e) => e.fix_suggestion(),
            SyncError::Namespace(e) => e.fix_suggestion(),
            SyncError::Solver(e) => e.fix_suggestion(),
            SyncError::Hub(e) => e.fix_suggestion(),
            SyncError::Workflow(e) => e.fix_suggestion(),
            SyncError::Key(_) => Some("Use a non-empty type tag and object name"),
            SyncError::Io(_) => Some("Check file path exists and has correct permissions"),
            SyncError::Other(_) => None,
        }
    }
}

// ============================================================================
// FIX SUGGESTION IMPLEMENTATIONS
// ============================================================================

impl FixSuggestion for LoaderError {
    fn fix_suggestion(&self) -> Option<&str> {
        Some(match self {
            LoaderError::Yaml { .. } => "Check YAML syntax: indentation, quoting, and document separators (---)",
            LoaderError::Io { .. } => "Check the data/template path exists and is readable",
            LoaderError::MissingType { .. } => "Every document needs a top-level 'type:' key naming its kind or 'template'",
        })
    }
}

impl FixSuggestion for ModelError {
    fn fix_suggestion(&self) -> Option<&str> {
        match self {
            ModelError::Validation { .. } => Some("Check the field against the kind's schema (see --help template show)"),
            ModelError::Key(_) => Some("Use a non-empty type tag and object name"),
        }
    }
}

impl FixSuggestion for TemplateError {
    fn fix_suggestion(&self) -> Option<&str> {
        Some(match self {
            TemplateError::MissingParameter { .. } => "Supply every parameter the template declares as required, or give it a default",
            TemplateError::RenderFailed { .. } => "Check the template body for unresolved ${name} placeholders",
            TemplateError::InvalidDefinition { .. } => "A template document needs 'type: template' plus a 'name' and a body",
        })
    }
}

impl FixSuggestion for NamespaceError {
    fn fix_suggestion(&self) -> Option<&str> {
        match self {
            NamespaceError::ExpansionDeadlock { .. } => {
                Some("The named template was never defined or defined after last use; move its definition earlier or check the name")
            }
            NamespaceError::Redefined { .. } => {
                Some("Rename one of the conflicting definitions, or pass --redefine allow/ignore if this is intentional")
            }
            NamespaceError::MaxDepthExceeded { .. } => {
                Some("This template likely recurses into itself; check for a self-referential invocation")
            }
            NamespaceError::Template(e) => e.fix_suggestion(),
        }
    }
}

impl FixSuggestion for SolverError {
    fn fix_suggestion(&self) -> Option<&str> {
        Some(match self {
            SolverError::UnbreakableCycle { .. } => {
                "Break the cycle by making one of the listed kinds splittable, or remove the circular reference"
            }
        })
    }
}

impl FixSuggestion for HubError {
    fn fix_suggestion(&self) -> Option<&str> {
        match self {
            HubError::Call { .. } => Some("Check the hub profile, credentials, and that the referenced object still exists"),
            HubError::Authentication { .. } => Some("Check KOJI_SYNC_<PROFILE>_URL and your session credentials"),
            HubError::Batch(_) => Some("Inspect each failed change individually; earlier successful changes were still applied"),
            HubError::MissingObjects { .. } => Some("Author the missing objects or remove the reference to them"),
        }
    }
}

impl FixSuggestion for WorkflowError {
    fn fix_suggestion(&self) -> Option<&str> {
        match self {
            WorkflowError::MissingObjects(_) => {
                Some("Run 'koji-sync compare' first to see discovered vs. phantom objects before syncing")
            }
            WorkflowError::InvalidState { .. } => Some("Workflow phases run in a fixed order; check the call site"),
        }
    }
}

// ============================================================================
// DISPLAY HELPERS
// ============================================================================

pub fn format_error_with_suggestion<E: std::error::Error + FixSuggestion>(error: &E) -> String {
    let mut result = error.to_string();
    if let Some(suggestion) = error.fix_suggestion() {
        result.push_str("\n  Fix: ");
        result.push_str(suggestion);
    }
    result
}

pub fn print_error<E: std::error::Error + FixSuggestion>(error: &E) {
    eprintln!("Error: {}", error);
    if let Some(suggestion) = error.fix_suggestion() {
        eprintln!("  Fix: {}", suggestion);
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_error_wraps_solver() {
        let err: SyncError = SolverError::UnbreakableCycle { keys: vec!["tag a".into()] }.into();
        assert!(err.to_string().contains("unbreakable cycle"));
        assert!(err.fix_suggestion().is_some());
    }

    #[test]
    fn test_format_error_with_suggestion() {
        let err = SolverError::UnbreakableCycle { keys: vec!["tag a".into(), "tag b".into()] };
        let formatted = format_error_with_suggestion(&err);
        assert!(formatted.contains("Fix:"));
        assert!(formatted.contains("tag a"));
    }

    #[test]
    fn test_all_loader_errors_have_suggestions() {
        let errors = vec![
            LoaderError::MissingType { path: "x.yaml".into(), line: 1 },
        ];
        for error in errors {
            assert!(error.fix_suggestion().is_some());
        }
    }

    #[test]
    fn test_all_namespace_errors_have_suggestions() {
        let errors = vec![
            NamespaceError::ExpansionDeadlock { site: "x".into(), template_name: "t".into() },
            NamespaceError::Redefined { key_or_name: "tag a".into(), first: "a.yaml:1".into(), second: "b.yaml:2".into() },
            NamespaceError::MaxDepthExceeded { site: "x".into(), max_depth: 100 },
        ];
        for error in errors {
            assert!(error.fix_suggestion().is_some(), "missing suggestion for {:?}", error);
        }
    }

    #[test]
    fn test_all_hub_errors_have_suggestions() {
        let errors = vec![
            HubError::Call { method: "createTag".into(), arguments: serde_json::Value::Null, message: "boom".into(), key: "tag a".into() },
            HubError::Authentication { profile: "koji".into(), cause: "expired".into() },
            HubError::MissingObjects { keys: vec!["tag a".into()] },
        ];
        for error in errors {
            assert!(error.fix_suggestion().is_some(), "missing suggestion for {:?}", error);
        }
    }
}
