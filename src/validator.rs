//! Formula validation
//!
//! Two layers, both of which must pass before a formula may be scheduled:
//!
//! 1. A textual denylist screen that rejects code-execution primitives
//!    (dynamic evaluation, function definitions, module loading, process or
//!    global namespace access, double-underscore identifiers,
//!    prototype/constructor access) before the parser ever sees the text.
//! 2. Structural parsing against the closed expression grammar, followed by
//!    nesting-depth and function-whitelist/arity checks on the tree.
//!
//! The grammar itself has no facility for arbitrary code execution; the
//! denylist is defense in depth, not the primary barrier.

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

use crate::ast::Expr;
use crate::eval::Builtin;
use crate::parser::parse_formula;

/// Longest formula the engine will look at
pub const MAX_FORMULA_LEN: usize = 1024;

/// Deepest expression tree the engine will evaluate
pub const MAX_FORMULA_DEPTH: usize = 32;

static KEYWORD_DENYLIST: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(eval|exec|function|require|import|process|global|globalthis|constructor|prototype|module)\b",
    )
    .expect("denylist pattern")
});

// Fragments with no place in any arithmetic formula
const FRAGMENT_DENYLIST: &[&str] = &["=>", "__", ";", "`", "\"", "'", "[", "]", "{", "}"];

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FormulaError {
    #[error("formula contains forbidden construct '{0}'")]
    ForbiddenConstruct(String),

    #[error("formula exceeds {MAX_FORMULA_LEN} characters")]
    TooLong,

    #[error("formula syntax error: {0}")]
    Syntax(String),

    #[error("formula nesting exceeds {MAX_FORMULA_DEPTH} levels")]
    TooDeep,

    #[error("unknown function '{0}'")]
    UnknownFunction(String),

    #[error("function '{name}' expects {expected} argument(s), got {got}")]
    WrongArity {
        name: String,
        expected: String,
        got: usize,
    },
}

/// Screen, parse, and structurally check one formula.
///
/// Returns the parsed tree on success so callers evaluate exactly what was
/// validated; a formula that fails any layer is never partially evaluated.
pub fn validate_formula(text: &str) -> Result<Arc<Expr>, FormulaError> {
    screen_text(text)?;

    let expr = parse_formula(text).map_err(FormulaError::Syntax)?;

    if expr.depth() > MAX_FORMULA_DEPTH {
        return Err(FormulaError::TooDeep);
    }

    let mut calls = Vec::new();
    expr.collect_calls(&mut calls);
    for (name, got) in calls {
        let builtin =
            Builtin::from_name(&name).ok_or_else(|| FormulaError::UnknownFunction(name.clone()))?;
        let (min, max) = builtin.arity();
        let in_range = got >= min && max.map_or(true, |m| got <= m);
        if !in_range {
            return Err(FormulaError::WrongArity {
                name,
                expected: builtin.arity_description(),
                got,
            });
        }
    }

    Ok(expr)
}

/// Textual denylist screen, run before any parsing
pub fn screen_text(text: &str) -> Result<(), FormulaError> {
    if text.len() > MAX_FORMULA_LEN {
        return Err(FormulaError::TooLong);
    }

    if let Some(found) = KEYWORD_DENYLIST.find(text) {
        return Err(FormulaError::ForbiddenConstruct(found.as_str().to_string()));
    }

    for fragment in FRAGMENT_DENYLIST {
        if text.contains(fragment) {
            return Err(FormulaError::ForbiddenConstruct((*fragment).to_string()));
        }
    }

    Ok(())
}
