//! Salary component definitions
//!
//! A component is one declarative line item of a salary template. Templates
//! interchange as JSON with camelCase field names, so the serde shapes here
//! are the wire contract for template authoring tools.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// What the component contributes to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentKind {
    Earning,
    Deduction,
    EmployerContribution,
}

/// How the component's monthly value is derived
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalculationType {
    Fixed,
    PercentOfCtc,
    PercentOfBasic,
    PercentOfGross,
    Formula,
}

/// One named line item of a salary structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentDefinition {
    /// Unique within a template; compared after normalization
    pub code: String,
    pub kind: ComponentKind,
    pub calculation_type: CalculationType,
    /// Absolute amount for `fixed`, percentage points otherwise;
    /// unused for `formula`
    #[serde(default)]
    pub value: Option<Decimal>,
    /// Required when `calculation_type` is `formula`
    #[serde(default)]
    pub formula_expression: Option<String>,
    /// Explicit dependencies, merged with those inferred from the formula
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Presentation only, irrelevant to evaluation order
    #[serde(default)]
    pub display_order: i32,
    /// Metadata consumed by the compliance collaborator, not the engine
    #[serde(default)]
    pub is_locked: bool,
    #[serde(default)]
    pub is_statutory: bool,
}

impl ComponentDefinition {
    pub fn fixed(code: &str, kind: ComponentKind, amount: Decimal) -> Self {
        Self::bare(code, kind, CalculationType::Fixed, Some(amount), None)
    }

    pub fn percent_of_ctc(code: &str, kind: ComponentKind, percent: Decimal) -> Self {
        Self::bare(code, kind, CalculationType::PercentOfCtc, Some(percent), None)
    }

    pub fn percent_of_basic(code: &str, kind: ComponentKind, percent: Decimal) -> Self {
        Self::bare(code, kind, CalculationType::PercentOfBasic, Some(percent), None)
    }

    pub fn percent_of_gross(code: &str, kind: ComponentKind, percent: Decimal) -> Self {
        Self::bare(code, kind, CalculationType::PercentOfGross, Some(percent), None)
    }

    pub fn formula(code: &str, kind: ComponentKind, expression: &str) -> Self {
        Self::bare(
            code,
            kind,
            CalculationType::Formula,
            None,
            Some(expression.to_string()),
        )
    }

    fn bare(
        code: &str,
        kind: ComponentKind,
        calculation_type: CalculationType,
        value: Option<Decimal>,
        formula_expression: Option<String>,
    ) -> Self {
        Self {
            code: code.to_string(),
            kind,
            calculation_type,
            value,
            formula_expression,
            depends_on: Vec::new(),
            display_order: 0,
            is_locked: false,
            is_statutory: false,
        }
    }

    pub fn with_depends_on(mut self, codes: &[&str]) -> Self {
        self.depends_on = codes.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn normalized_code(&self) -> String {
        normalize_code(&self.code)
    }

    pub fn is_earning(&self) -> bool {
        self.kind == ComponentKind::Earning
    }
}

/// Canonical form for component codes and formula identifiers
pub fn normalize_code(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}
