//! Engine error taxonomy
//!
//! Every variant is fatal to the whole calculation: a payroll figure is
//! either fully derived or not produced at all.

use thiserror::Error;

/// One per-component validation failure, aggregated so template authors
/// see every broken formula in a single pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentIssue {
    pub code: String,
    pub message: String,
}

impl std::fmt::Display for ComponentIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

fn format_issues(issues: &[ComponentIssue]) -> String {
    issues
        .iter()
        .map(ComponentIssue::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

fn format_cycle(path: &[String]) -> String {
    path.join(" -> ")
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    /// One or more formulas failed the denylist screen or structural
    /// parsing, or the template itself is malformed (duplicate codes,
    /// missing formula text)
    #[error("template validation failed: {}", format_issues(issues))]
    TemplateInvalid { issues: Vec<ComponentIssue> },

    /// The dependency graph contains a cycle; the path is reported verbatim
    #[error("Circular dependency detected: {}", format_cycle(path))]
    CircularDependency { path: Vec<String> },

    /// A formula referenced an identifier with no binding at evaluation time
    #[error("unknown reference '{name}' while evaluating {code}")]
    UnknownReference { code: String, name: String },

    /// Division by zero, overflow, or a malformed numeric operation
    #[error("arithmetic error while evaluating {code}: {reason}")]
    Arithmetic { code: String, reason: String },

    /// Defensive; unreachable through the closed `CalculationType` enum
    #[error("unknown calculation type for component {code}")]
    UnknownCalculationType { code: String },

    /// Invariant breakage inside the engine itself
    #[error("internal error: {0}")]
    Internal(String),
}
