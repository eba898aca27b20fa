//! Salary calculation orchestrator
//!
//! Linear pipeline: validate every formula (aggregating all issues) →
//! build the dependency graph → detect cycles → schedule → evaluate in
//! topological order → auto-balance the remainder component → aggregate.
//! Any failure at any stage aborts the whole run; there is no partial
//! result mode.
//!
//! The engine is pure and synchronous: graph and context are built fresh
//! per call, so concurrent calculations never share mutable state. The
//! only cross-call state is the formula parse cache.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::debug;

use crate::ast::Expr;
use crate::component::{CalculationType, ComponentDefinition, ComponentKind};
use crate::context::{CalcOptions, CalculationResult, EvalContext};
use crate::error::{ComponentIssue, EngineError};
use crate::eval::{evaluate_component, round_currency};
use crate::graph::{DependencyGraph, GROSS_CODE};
use crate::schedule::topological_order;
use crate::validator::validate_formula;

pub const NET_CODE: &str = "NET";
pub const TOTAL_EMPLOYER_COST_CODE: &str = "TOTAL_EMPLOYER_COST";

const DEFAULT_BALANCE_CODE: &str = "SPECIAL_ALLOWANCE";

/// Drives one full salary breakdown per call
#[derive(Debug, Clone, Default)]
pub struct SalaryCalculator {
    options: CalcOptions,
}

impl SalaryCalculator {
    pub fn new(options: CalcOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &CalcOptions {
        &self.options
    }

    /// Compute the monthly breakdown for `annual_ctc` over `components`.
    pub fn calculate(
        &self,
        components: &[ComponentDefinition],
        annual_ctc: Decimal,
    ) -> Result<CalculationResult, EngineError> {
        if annual_ctc < Decimal::ZERO {
            return Err(EngineError::Arithmetic {
                code: "CTC".to_string(),
                reason: "annual CTC must be non-negative".to_string(),
            });
        }

        // Step 1: validate every formula up front, aggregating all issues
        let parsed = self.validate_template(components)?;
        debug!(components = components.len(), "template validated");

        // Steps 2-3: graph shape, then acyclicity
        let graph = DependencyGraph::build(components);
        if let Some(path) = graph.find_cycle() {
            return Err(EngineError::CircularDependency { path });
        }

        // Step 4: evaluation order
        let order = topological_order(&graph)?;
        debug!(order = ?order, "schedule built");

        // Step 5: ordered evaluation
        let monthly_ctc = round_currency(annual_ctc / twelve());
        let earning_codes: BTreeSet<String> = components
            .iter()
            .filter(|c| c.is_earning())
            .map(|c| c.normalized_code())
            .collect();
        let mut ctx = EvalContext::new(annual_ctc, monthly_ctc, &self.options, earning_codes.clone());

        for code in &order {
            let node = graph.nodes.get(code).ok_or_else(|| {
                EngineError::Internal(format!("scheduled component {code} missing from graph"))
            })?;
            match &node.definition {
                // Synthetic GROSS: running sum of earnings computed so far
                None => {
                    let gross = round_currency(ctx.gross_so_far());
                    ctx.components.insert(GROSS_CODE.to_string(), gross);
                }
                Some(def) => {
                    let expr = parsed.get(code).map(Arc::as_ref);
                    let value = evaluate_component(def, expr, &ctx, &self.options)?;
                    ctx.components.insert(code.clone(), value);
                }
            }
        }

        // Step 6: authoritative auto-balance pass over the remainder
        // component, now that every earning holds a value
        if self.options.auto_balance_special_allowance {
            let balance_code = self
                .options
                .balance_component
                .as_deref()
                .map(crate::component::normalize_code)
                .unwrap_or_else(|| DEFAULT_BALANCE_CODE.to_string());
            if earning_codes.contains(&balance_code) {
                let others = ctx.earnings_so_far(&balance_code);
                let residual = round_currency((monthly_ctc - others).max(Decimal::ZERO));
                debug!(component = %balance_code, value = %residual, "auto-balanced");
                ctx.components.insert(balance_code, residual);
            }
        }

        // Step 7: aggregate
        Ok(self.aggregate(components, annual_ctc, ctx))
    }

    fn validate_template(
        &self,
        components: &[ComponentDefinition],
    ) -> Result<BTreeMap<String, Arc<Expr>>, EngineError> {
        let mut issues: Vec<ComponentIssue> = Vec::new();
        let mut parsed: BTreeMap<String, Arc<Expr>> = BTreeMap::new();
        let mut seen: BTreeSet<String> = BTreeSet::new();

        for def in components {
            let code = def.normalized_code();

            if code.is_empty() {
                issues.push(ComponentIssue {
                    code: def.code.clone(),
                    message: "component code is empty".to_string(),
                });
                continue;
            }
            if !seen.insert(code.clone()) {
                issues.push(ComponentIssue {
                    code: code.clone(),
                    message: "duplicate component code".to_string(),
                });
                continue;
            }

            if def.calculation_type == CalculationType::Formula {
                match &def.formula_expression {
                    None => issues.push(ComponentIssue {
                        code,
                        message: "formula component declares no expression".to_string(),
                    }),
                    Some(text) => match validate_formula(text) {
                        Ok(expr) => {
                            parsed.insert(code, expr);
                        }
                        Err(err) => issues.push(ComponentIssue {
                            code,
                            message: err.to_string(),
                        }),
                    },
                }
            }
        }

        if issues.is_empty() {
            Ok(parsed)
        } else {
            Err(EngineError::TemplateInvalid { issues })
        }
    }

    fn aggregate(
        &self,
        components: &[ComponentDefinition],
        annual_ctc: Decimal,
        ctx: EvalContext,
    ) -> CalculationResult {
        let mut earnings = Decimal::ZERO;
        let mut deductions = Decimal::ZERO;
        let mut employer_contributions = Decimal::ZERO;

        for def in components {
            let code = def.normalized_code();
            let value = ctx.components.get(&code).copied().unwrap_or(Decimal::ZERO);
            match def.kind {
                ComponentKind::Earning => earnings += value,
                ComponentKind::Deduction => deductions += value,
                ComponentKind::EmployerContribution => employer_contributions += value,
            }
        }

        let net = earnings - deductions;
        let total_employer_cost = if self.options.include_employer_in_ctc {
            annual_ctc
        } else {
            annual_ctc + employer_contributions * twelve()
        };

        let mut result_components = ctx.components;
        result_components.insert(GROSS_CODE.to_string(), earnings);
        result_components.insert(NET_CODE.to_string(), net);
        result_components.insert(TOTAL_EMPLOYER_COST_CODE.to_string(), total_employer_cost);

        CalculationResult {
            components: result_components,
            earnings,
            deductions,
            net,
            employer_contributions,
            total_employer_cost,
        }
    }
}

fn twelve() -> Decimal {
    Decimal::from(12)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn calc() -> SalaryCalculator {
        SalaryCalculator::new(CalcOptions::default())
    }

    #[test]
    fn test_validation_aggregates_every_issue() {
        let components = vec![
            ComponentDefinition::formula("A", ComponentKind::Earning, "eval(1)"),
            ComponentDefinition::formula("B", ComponentKind::Earning, "1 +"),
            ComponentDefinition::fixed("B", ComponentKind::Earning, Decimal::from(1)),
        ];
        let err = calc().calculate(&components, Decimal::from(600_000));
        match err {
            Err(EngineError::TemplateInvalid { issues }) => {
                assert_eq!(issues.len(), 3);
                let codes: Vec<&str> = issues.iter().map(|i| i.code.as_str()).collect();
                assert_eq!(codes, vec!["A", "B", "B"]);
            }
            other => panic!("expected TemplateInvalid, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_formula_expression_is_an_issue() {
        let mut def = ComponentDefinition::formula("A", ComponentKind::Earning, "1");
        def.formula_expression = None;
        let err = calc().calculate(&[def], Decimal::from(100));
        assert!(matches!(err, Err(EngineError::TemplateInvalid { .. })));
    }

    #[test]
    fn test_negative_ctc_rejected() {
        let err = calc().calculate(&[], Decimal::from(-1));
        assert!(matches!(err, Err(EngineError::Arithmetic { .. })));
    }

    #[test]
    fn test_empty_template_yields_zero_result() {
        let result = calc().calculate(&[], Decimal::from(600_000)).unwrap();
        assert_eq!(result.earnings, Decimal::ZERO);
        assert_eq!(result.net, Decimal::ZERO);
        assert_eq!(result.components[GROSS_CODE], Decimal::ZERO);
        assert_eq!(
            result.components[TOTAL_EMPLOYER_COST_CODE],
            Decimal::from(600_000)
        );
    }

    #[test]
    fn test_auto_balance_skipped_when_disabled() {
        let components = vec![
            ComponentDefinition::percent_of_ctc("BASIC", ComponentKind::Earning, Decimal::from(40)),
            ComponentDefinition::formula(
                "SPECIAL_ALLOWANCE",
                ComponentKind::Earning,
                "RemainingCTC()",
            ),
        ];
        let calculator = SalaryCalculator::new(CalcOptions {
            auto_balance_special_allowance: false,
            ..CalcOptions::default()
        });
        let result = calculator
            .calculate(&components, Decimal::from(600_000))
            .unwrap();
        // The in-line RemainingCTC result stands un-superseded
        assert_eq!(
            result.components["SPECIAL_ALLOWANCE"],
            Decimal::from(30_000)
        );
    }

    #[test]
    fn test_custom_balance_component_code() {
        let components = vec![
            ComponentDefinition::percent_of_ctc("BASIC", ComponentKind::Earning, Decimal::from(40)),
            ComponentDefinition::fixed("FLEX_PAY", ComponentKind::Earning, Decimal::ZERO),
        ];
        let calculator = SalaryCalculator::new(CalcOptions {
            balance_component: Some("flex_pay".to_string()),
            ..CalcOptions::default()
        });
        let result = calculator
            .calculate(&components, Decimal::from(600_000))
            .unwrap();
        assert_eq!(result.components["FLEX_PAY"], Decimal::from(30_000));
        assert_eq!(result.earnings, Decimal::from(50_000));
    }

    #[test]
    fn test_balance_ignored_when_component_absent() {
        let components = vec![ComponentDefinition::percent_of_ctc(
            "BASIC",
            ComponentKind::Earning,
            Decimal::from(40),
        )];
        let result = calc().calculate(&components, Decimal::from(600_000)).unwrap();
        assert_eq!(result.earnings, Decimal::from(20_000));
        assert!(!result.components.contains_key("SPECIAL_ALLOWANCE"));
    }
}
