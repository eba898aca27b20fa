//! Collaborator seams
//!
//! The engine never performs I/O; anything it cannot derive from the
//! template and options must be resolved by the caller first. These traits
//! are the contracts those callers implement.

use chrono::NaiveDate;
use rust_decimal::Decimal;

use crate::component::ComponentDefinition;
use crate::context::CalculationResult;

/// Jurisdiction professional-tax lookup.
///
/// Callers resolve the amount before invoking the engine and bind it into
/// `CalcOptions::extra_bindings` (conventionally as `PROFESSIONAL_TAX`) so
/// a fixed or formula deduction can consume it.
pub trait ProfessionalTaxLookup {
    fn professional_tax(
        &self,
        state_or_region: &str,
        monthly_gross: Decimal,
        effective_date: NaiveDate,
    ) -> Decimal;
}

/// A statutory misconfiguration flagged downstream of a calculation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComplianceWarning {
    pub component_code: String,
    pub message: String,
}

/// Consumes a finished calculation plus the original template and flags
/// statutory misconfigurations. Strictly downstream: implementations must
/// never mutate the result.
pub trait ComplianceReview {
    fn review(
        &self,
        components: &[ComponentDefinition],
        result: &CalculationResult,
    ) -> Vec<ComplianceWarning>;
}
