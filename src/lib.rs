//! salary-engine: deterministic salary-structure calculation
//!
//! This crate contains the pure calculation logic with NO persistence or
//! transport dependencies:
//! - Component definition types and the closed formula AST
//! - Nom-based expression parser with a shared parse cache
//! - Denylist + structural formula validator
//! - Dependency extraction, per-call dependency graph, cycle detection
//! - Kahn-scheduler with deterministic tie-breaking
//! - Tree-walk evaluator with the builtin function library
//! - The calculation orchestrator and its error taxonomy
//!
//! Persistence of templates, HTTP surfaces, tax-slab lookup, and
//! compliance warnings live with the caller; `external` defines the seams.

pub mod ast;
pub mod component;
pub mod context;
pub mod deps;
pub mod engine;
pub mod error;
pub mod eval;
pub mod external;
pub mod graph;
pub mod parser;
pub mod schedule;
pub mod validator;

// Re-export the public surface
pub use ast::{BinOp, Expr, UnaryOp};
pub use component::{normalize_code, CalculationType, ComponentDefinition, ComponentKind};
pub use context::{CalcOptions, CalculationResult, EmployeeLocation, EvalContext};
pub use engine::{SalaryCalculator, NET_CODE, TOTAL_EMPLOYER_COST_CODE};
pub use error::{ComponentIssue, EngineError};
pub use eval::{round_currency, Builtin};
pub use external::{ComplianceReview, ComplianceWarning, ProfessionalTaxLookup};
pub use graph::{DependencyGraph, BASIC_CODE, GROSS_CODE};
pub use parser::parse_formula;
pub use schedule::topological_order;
pub use validator::{validate_formula, FormulaError};
