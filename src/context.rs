//! Calculation options, evaluation context, and result types

use std::collections::{BTreeMap, BTreeSet};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::graph::GROSS_CODE;

pub const CTC_BINDING: &str = "CTC";
pub const MONTHLY_CTC_BINDING: &str = "MONTHLY_CTC";
pub const EMPLOYEE_LOCATION_BINDING: &str = "EMPLOYEE_LOCATION";
pub const PF_CAP_BINDING: &str = "PF_CAP";
pub const ESI_THRESHOLD_BINDING: &str = "ESI_THRESHOLD";

/// Location class used for the HRA tier and exposed to formulas as
/// `EMPLOYEE_LOCATION` (metro = 1, non_metro = 0)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmployeeLocation {
    Metro,
    NonMetro,
}

impl EmployeeLocation {
    pub fn as_binding(self) -> Decimal {
        match self {
            EmployeeLocation::Metro => Decimal::ONE,
            EmployeeLocation::NonMetro => Decimal::ZERO,
        }
    }
}

/// Options bag for one calculation run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CalcOptions {
    /// Recompute the remainder component after the full schedule so the
    /// monthly CTC envelope balances exactly
    pub auto_balance_special_allowance: bool,
    /// Whether employer contributions already live inside the CTC envelope
    pub include_employer_in_ctc: bool,
    pub employee_location: EmployeeLocation,
    /// Replaces the HRA component's declared percentage when present
    pub hra_percent_override: Option<Decimal>,
    /// Monthly cap amount bound to formulas as `PF_CAP`
    pub pf_cap: Decimal,
    /// Monthly gross threshold bound to formulas as `ESI_THRESHOLD`
    pub esi_threshold: Decimal,
    /// Remainder component code; `SPECIAL_ALLOWANCE` when unset
    pub balance_component: Option<String>,
    /// Caller-resolved bindings (e.g. a pre-computed professional tax)
    pub extra_bindings: BTreeMap<String, Decimal>,
}

impl Default for CalcOptions {
    fn default() -> Self {
        Self {
            auto_balance_special_allowance: true,
            include_employer_in_ctc: true,
            employee_location: EmployeeLocation::NonMetro,
            hra_percent_override: None,
            pf_cap: Decimal::from(1800),
            esi_threshold: Decimal::from(21000),
            balance_component: None,
            extra_bindings: BTreeMap::new(),
        }
    }
}

/// Mutable accumulator for one calculation run.
///
/// `components` fills incrementally as the schedule executes; a component's
/// evaluator only ever sees codes scheduled before it, plus the read-only
/// environment bindings.
#[derive(Debug, Clone)]
pub struct EvalContext {
    pub annual_ctc: Decimal,
    pub monthly_ctc: Decimal,
    pub components: BTreeMap<String, Decimal>,
    env: BTreeMap<String, Decimal>,
    earning_codes: BTreeSet<String>,
}

impl EvalContext {
    pub fn new(
        annual_ctc: Decimal,
        monthly_ctc: Decimal,
        options: &CalcOptions,
        earning_codes: BTreeSet<String>,
    ) -> Self {
        let mut env = BTreeMap::new();
        env.insert(
            EMPLOYEE_LOCATION_BINDING.to_string(),
            options.employee_location.as_binding(),
        );
        env.insert(PF_CAP_BINDING.to_string(), options.pf_cap);
        env.insert(ESI_THRESHOLD_BINDING.to_string(), options.esi_threshold);
        for (name, value) in &options.extra_bindings {
            env.insert(crate::component::normalize_code(name), *value);
        }

        Self {
            annual_ctc,
            monthly_ctc,
            components: BTreeMap::new(),
            env,
            earning_codes,
        }
    }

    /// Resolve one normalized identifier: computed components first, then
    /// the synthetic CTC constants, then the environment. `None` means the
    /// identifier has no binding and evaluation must fail.
    pub fn lookup(&self, name: &str) -> Option<Decimal> {
        if let Some(value) = self.components.get(name) {
            return Some(*value);
        }
        match name {
            CTC_BINDING => Some(self.annual_ctc),
            MONTHLY_CTC_BINDING => Some(self.monthly_ctc),
            _ => self.env.get(name).copied(),
        }
    }

    /// Sum of already-computed earning components, excluding `except`
    pub fn earnings_so_far(&self, except: &str) -> Decimal {
        self.earning_codes
            .iter()
            .filter(|code| code.as_str() != except)
            .filter_map(|code| self.components.get(code))
            .sum()
    }

    /// Running earning total for the synthetic `GROSS` node
    pub fn gross_so_far(&self) -> Decimal {
        self.earnings_so_far(GROSS_CODE)
    }
}

/// The engine's output for one calculation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalculationResult {
    /// Every component's computed monthly value, plus the synthesized
    /// `GROSS`, `NET`, and `TOTAL_EMPLOYER_COST` entries
    pub components: BTreeMap<String, Decimal>,
    pub earnings: Decimal,
    pub deductions: Decimal,
    pub net: Decimal,
    pub employer_contributions: Decimal,
    pub total_employer_cost: Decimal,
}
