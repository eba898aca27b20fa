//! Component evaluation and the builtin function library
//!
//! Intermediate formula arithmetic keeps full `Decimal` precision; every
//! value written back to the context is rounded to currency precision
//! (2 places, half-up) so later components read bankable amounts. All
//! arithmetic is checked: division by zero and overflow surface as
//! `Arithmetic` errors rather than panics.

use rust_decimal::{Decimal, RoundingStrategy};
use tracing::trace;

use crate::ast::{BinOp, Expr, UnaryOp};
use crate::component::{CalculationType, ComponentDefinition};
use crate::context::{CalcOptions, EvalContext};
use crate::error::EngineError;
use crate::graph::{BASIC_CODE, GROSS_CODE};

const HUNDRED: Decimal = Decimal::ONE_HUNDRED;

/// Round to a bankable currency amount, half-up
pub fn round_currency(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Whitelisted formula functions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Min,
    Max,
    Round,
    Floor,
    Ceil,
    Abs,
    If,
    RemainingCtc,
}

impl Builtin {
    /// Function-name matching is case-insensitive; both `REMAINING_CTC`
    /// and the original `RemainingCTC` spelling resolve
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "MIN" => Some(Builtin::Min),
            "MAX" => Some(Builtin::Max),
            "ROUND" => Some(Builtin::Round),
            "FLOOR" => Some(Builtin::Floor),
            "CEIL" => Some(Builtin::Ceil),
            "ABS" => Some(Builtin::Abs),
            "IF" => Some(Builtin::If),
            "REMAINING_CTC" | "REMAININGCTC" => Some(Builtin::RemainingCtc),
            _ => None,
        }
    }

    /// (minimum arity, maximum arity; `None` = unbounded)
    pub fn arity(self) -> (usize, Option<usize>) {
        match self {
            Builtin::Min | Builtin::Max => (2, None),
            Builtin::Round => (1, Some(2)),
            Builtin::Floor | Builtin::Ceil | Builtin::Abs => (1, Some(1)),
            Builtin::If => (3, Some(3)),
            Builtin::RemainingCtc => (0, Some(0)),
        }
    }

    pub fn arity_description(self) -> String {
        match self.arity() {
            (min, None) => format!("at least {min}"),
            (min, Some(max)) if min == max => min.to_string(),
            (min, Some(max)) => format!("{min} to {max}"),
        }
    }
}

/// Compute one component's currency-rounded monthly value.
///
/// `parsed` is the validated expression for formula components; non-formula
/// kinds ignore it.
pub fn evaluate_component(
    def: &ComponentDefinition,
    parsed: Option<&Expr>,
    ctx: &EvalContext,
    options: &CalcOptions,
) -> Result<Decimal, EngineError> {
    let code = def.normalized_code();

    let raw = match def.calculation_type {
        CalculationType::Fixed => required_value(def, &code)?,
        CalculationType::PercentOfCtc => {
            checked_div(checked_mul(ctx.monthly_ctc, required_value(def, &code)?, &code)?, HUNDRED, &code)?
        }
        CalculationType::PercentOfBasic => {
            let basic = ctx.lookup(BASIC_CODE).ok_or_else(|| EngineError::UnknownReference {
                code: code.clone(),
                name: BASIC_CODE.to_string(),
            })?;
            let percent = hra_percent(def, &code, options)?;
            checked_div(checked_mul(basic, percent, &code)?, HUNDRED, &code)?
        }
        CalculationType::PercentOfGross => {
            let gross = ctx.lookup(GROSS_CODE).ok_or_else(|| EngineError::UnknownReference {
                code: code.clone(),
                name: GROSS_CODE.to_string(),
            })?;
            checked_div(checked_mul(gross, required_value(def, &code)?, &code)?, HUNDRED, &code)?
        }
        CalculationType::Formula => {
            let expr = parsed.ok_or_else(|| {
                EngineError::Internal(format!("formula component {code} reached evaluation unparsed"))
            })?;
            eval_expr(expr, ctx, &code)?
        }
    };

    let rounded = round_currency(raw);
    trace!(component = %code, value = %rounded, "evaluated");
    Ok(rounded)
}

fn required_value(def: &ComponentDefinition, code: &str) -> Result<Decimal, EngineError> {
    def.value.ok_or_else(|| EngineError::Arithmetic {
        code: code.to_string(),
        reason: "component declares no value".to_string(),
    })
}

// The HRA component's declared percentage yields to the caller-resolved
// location tier when one is present
fn hra_percent(
    def: &ComponentDefinition,
    code: &str,
    options: &CalcOptions,
) -> Result<Decimal, EngineError> {
    if code == "HRA" {
        if let Some(override_percent) = options.hra_percent_override {
            return Ok(override_percent);
        }
    }
    required_value(def, code)
}

/// Tree-walk evaluation against the current context.
///
/// `current_code` names the component being evaluated, for error reporting
/// and for `REMAINING_CTC`'s self-exclusion.
pub fn eval_expr(
    expr: &Expr,
    ctx: &EvalContext,
    current_code: &str,
) -> Result<Decimal, EngineError> {
    match expr {
        Expr::Number(n) => Ok(*n),
        Expr::Ident(name) => {
            let normalized = crate::component::normalize_code(name);
            ctx.lookup(&normalized)
                .ok_or_else(|| EngineError::UnknownReference {
                    code: current_code.to_string(),
                    name: name.clone(),
                })
        }
        Expr::Unary { op: UnaryOp::Neg, operand } => {
            let v = eval_expr(operand, ctx, current_code)?;
            Ok(-v)
        }
        Expr::Binary { op, lhs, rhs } => eval_binary(*op, lhs, rhs, ctx, current_code),
        Expr::Call { name, args } => eval_call(name, args, ctx, current_code),
    }
}

fn eval_binary(
    op: BinOp,
    lhs: &Expr,
    rhs: &Expr,
    ctx: &EvalContext,
    current_code: &str,
) -> Result<Decimal, EngineError> {
    let l = eval_expr(lhs, ctx, current_code)?;
    let r = eval_expr(rhs, ctx, current_code)?;

    match op {
        BinOp::Add => checked_add(l, r, current_code),
        BinOp::Sub => checked_sub(l, r, current_code),
        BinOp::Mul => checked_mul(l, r, current_code),
        BinOp::Div => checked_div(l, r, current_code),
        BinOp::Eq => Ok(bool_decimal(l == r)),
        BinOp::Ne => Ok(bool_decimal(l != r)),
        BinOp::Lt => Ok(bool_decimal(l < r)),
        BinOp::Le => Ok(bool_decimal(l <= r)),
        BinOp::Gt => Ok(bool_decimal(l > r)),
        BinOp::Ge => Ok(bool_decimal(l >= r)),
        BinOp::And => Ok(bool_decimal(!l.is_zero() && !r.is_zero())),
        BinOp::Or => Ok(bool_decimal(!l.is_zero() || !r.is_zero())),
    }
}

fn eval_call(
    name: &str,
    args: &[Expr],
    ctx: &EvalContext,
    current_code: &str,
) -> Result<Decimal, EngineError> {
    let builtin = Builtin::from_name(name).ok_or_else(|| EngineError::UnknownReference {
        code: current_code.to_string(),
        name: name.to_string(),
    })?;

    match builtin {
        Builtin::Min | Builtin::Max => {
            let mut values = Vec::with_capacity(args.len());
            for arg in args {
                values.push(eval_expr(arg, ctx, current_code)?);
            }
            let picked = if builtin == Builtin::Min {
                values.into_iter().min()
            } else {
                values.into_iter().max()
            };
            picked.ok_or_else(|| EngineError::Arithmetic {
                code: current_code.to_string(),
                reason: format!("{name} requires at least one argument"),
            })
        }
        Builtin::Round => {
            let value = eval_expr(arg(args, 0, name, current_code)?, ctx, current_code)?;
            let places = match args.get(1) {
                Some(expr) => decimal_places(eval_expr(expr, ctx, current_code)?, current_code)?,
                None => 0,
            };
            Ok(value.round_dp_with_strategy(places, RoundingStrategy::MidpointAwayFromZero))
        }
        Builtin::Floor => Ok(eval_expr(arg(args, 0, name, current_code)?, ctx, current_code)?.floor()),
        Builtin::Ceil => Ok(eval_expr(arg(args, 0, name, current_code)?, ctx, current_code)?.ceil()),
        Builtin::Abs => Ok(eval_expr(arg(args, 0, name, current_code)?, ctx, current_code)?.abs()),
        Builtin::If => {
            // Only the taken branch evaluates
            let cond = eval_expr(arg(args, 0, name, current_code)?, ctx, current_code)?;
            if cond.is_zero() {
                eval_expr(arg(args, 2, name, current_code)?, ctx, current_code)
            } else {
                eval_expr(arg(args, 1, name, current_code)?, ctx, current_code)
            }
        }
        Builtin::RemainingCtc => {
            // Order-sensitive by design: only earnings already in the
            // context contribute; the auto-balance pass is authoritative
            let allocated = ctx.earnings_so_far(current_code);
            let remaining = checked_sub(ctx.monthly_ctc, allocated, current_code)?;
            Ok(remaining.max(Decimal::ZERO))
        }
    }
}

// Arity is validated before scheduling; this guards direct eval paths
fn arg<'a>(
    args: &'a [Expr],
    index: usize,
    name: &str,
    code: &str,
) -> Result<&'a Expr, EngineError> {
    args.get(index).ok_or_else(|| EngineError::Arithmetic {
        code: code.to_string(),
        reason: format!("{name} is missing argument {}", index + 1),
    })
}

fn bool_decimal(b: bool) -> Decimal {
    if b {
        Decimal::ONE
    } else {
        Decimal::ZERO
    }
}

fn decimal_places(value: Decimal, code: &str) -> Result<u32, EngineError> {
    use rust_decimal::prelude::ToPrimitive;
    if value.fract().is_zero() && value >= Decimal::ZERO {
        if let Some(places) = value.to_u32() {
            if places <= 28 {
                return Ok(places);
            }
        }
    }
    Err(EngineError::Arithmetic {
        code: code.to_string(),
        reason: format!("invalid rounding precision {value}"),
    })
}

fn checked_add(l: Decimal, r: Decimal, code: &str) -> Result<Decimal, EngineError> {
    l.checked_add(r).ok_or_else(|| overflow(code, "+"))
}

fn checked_sub(l: Decimal, r: Decimal, code: &str) -> Result<Decimal, EngineError> {
    l.checked_sub(r).ok_or_else(|| overflow(code, "-"))
}

fn checked_mul(l: Decimal, r: Decimal, code: &str) -> Result<Decimal, EngineError> {
    l.checked_mul(r).ok_or_else(|| overflow(code, "*"))
}

fn checked_div(l: Decimal, r: Decimal, code: &str) -> Result<Decimal, EngineError> {
    if r.is_zero() {
        return Err(EngineError::Arithmetic {
            code: code.to_string(),
            reason: "division by zero".to_string(),
        });
    }
    l.checked_div(r).ok_or_else(|| overflow(code, "/"))
}

fn overflow(code: &str, op: &str) -> EngineError {
    EngineError::Arithmetic {
        code: code.to_string(),
        reason: format!("overflow in '{op}'"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::ComponentKind;
    use crate::context::CalcOptions;
    use std::collections::BTreeSet;
    use std::str::FromStr;

    fn ctx_with(components: &[(&str, i64)]) -> EvalContext {
        let earning_codes: BTreeSet<String> =
            components.iter().map(|(c, _)| c.to_string()).collect();
        let mut ctx = EvalContext::new(
            Decimal::from(600_000),
            Decimal::from(50_000),
            &CalcOptions::default(),
            earning_codes,
        );
        for (code, value) in components {
            ctx.components.insert(code.to_string(), Decimal::from(*value));
        }
        ctx
    }

    fn eval(text: &str, ctx: &EvalContext) -> Result<Decimal, EngineError> {
        let expr = crate::parser::parse_formula_uncached(text).unwrap();
        eval_expr(&expr, ctx, "TEST")
    }

    #[test]
    fn test_fixed_component_rounds() {
        let def = ComponentDefinition::fixed(
            "LTA",
            ComponentKind::Earning,
            Decimal::from_str("1000.005").unwrap(),
        );
        let v = evaluate_component(&def, None, &ctx_with(&[]), &CalcOptions::default()).unwrap();
        assert_eq!(v, Decimal::from_str("1000.01").unwrap());
    }

    #[test]
    fn test_percent_of_ctc_uses_monthly_envelope() {
        let def =
            ComponentDefinition::percent_of_ctc("BASIC", ComponentKind::Earning, Decimal::from(40));
        let v = evaluate_component(&def, None, &ctx_with(&[]), &CalcOptions::default()).unwrap();
        assert_eq!(v, Decimal::from(20_000));
    }

    #[test]
    fn test_percent_of_basic_reads_context() {
        let def =
            ComponentDefinition::percent_of_basic("DA", ComponentKind::Earning, Decimal::from(10));
        let ctx = ctx_with(&[("BASIC", 20_000)]);
        let v = evaluate_component(&def, None, &ctx, &CalcOptions::default()).unwrap();
        assert_eq!(v, Decimal::from(2_000));
    }

    #[test]
    fn test_percent_of_basic_without_basic_fails() {
        let def =
            ComponentDefinition::percent_of_basic("DA", ComponentKind::Earning, Decimal::from(10));
        let err = evaluate_component(&def, None, &ctx_with(&[]), &CalcOptions::default());
        assert!(matches!(err, Err(EngineError::UnknownReference { name, .. }) if name == "BASIC"));
    }

    #[test]
    fn test_hra_override_replaces_declared_percent() {
        let def =
            ComponentDefinition::percent_of_basic("HRA", ComponentKind::Earning, Decimal::from(40));
        let ctx = ctx_with(&[("BASIC", 20_000)]);
        let options = CalcOptions {
            hra_percent_override: Some(Decimal::from(50)),
            ..CalcOptions::default()
        };
        let v = evaluate_component(&def, None, &ctx, &options).unwrap();
        assert_eq!(v, Decimal::from(10_000));

        // Non-HRA components keep their declared percentage
        let other =
            ComponentDefinition::percent_of_basic("DA", ComponentKind::Earning, Decimal::from(40));
        let v = evaluate_component(&other, None, &ctx, &options).unwrap();
        assert_eq!(v, Decimal::from(8_000));
    }

    #[test]
    fn test_percent_of_gross_reads_context() {
        let def = ComponentDefinition::percent_of_gross(
            "ESI_EMP",
            ComponentKind::Deduction,
            Decimal::new(75, 2),
        );
        let ctx = ctx_with(&[("GROSS", 20_000)]);
        let v = evaluate_component(&def, None, &ctx, &CalcOptions::default()).unwrap();
        assert_eq!(v, Decimal::from(150));
    }

    #[test]
    fn test_arithmetic_and_identifiers() {
        let ctx = ctx_with(&[("BASIC", 20_000)]);
        assert_eq!(eval("BASIC * 12 / 100", &ctx).unwrap(), Decimal::from(2_400));
        assert_eq!(eval("CTC / 12", &ctx).unwrap(), Decimal::from(50_000));
        assert_eq!(eval("MONTHLY_CTC - BASIC", &ctx).unwrap(), Decimal::from(30_000));
    }

    #[test]
    fn test_identifier_case_insensitive() {
        let ctx = ctx_with(&[("BASIC", 20_000)]);
        assert_eq!(eval("basic / 2", &ctx).unwrap(), Decimal::from(10_000));
    }

    #[test]
    fn test_unknown_reference_is_an_error_not_zero() {
        let err = eval("NONEXISTENT_CODE + 1", &ctx_with(&[]));
        assert!(matches!(
            err,
            Err(EngineError::UnknownReference { name, .. }) if name == "NONEXISTENT_CODE"
        ));
    }

    #[test]
    fn test_division_by_zero() {
        let err = eval("1 / 0", &ctx_with(&[]));
        assert!(matches!(err, Err(EngineError::Arithmetic { reason, .. }) if reason.contains("zero")));
    }

    #[test]
    fn test_min_max() {
        let ctx = ctx_with(&[("BASIC", 20_000)]);
        assert_eq!(
            eval("MIN(BASIC * 12 / 100, PF_CAP)", &ctx).unwrap(),
            Decimal::from(1_800)
        );
        assert_eq!(eval("MAX(1, 2, 3)", &ctx).unwrap(), Decimal::from(3));
    }

    #[test]
    fn test_round_floor_ceil_abs() {
        let ctx = ctx_with(&[]);
        assert_eq!(eval("ROUND(2.5)", &ctx).unwrap(), Decimal::from(3));
        assert_eq!(
            eval("ROUND(2.345, 2)", &ctx).unwrap(),
            Decimal::from_str("2.35").unwrap()
        );
        assert_eq!(eval("FLOOR(2.9)", &ctx).unwrap(), Decimal::from(2));
        assert_eq!(eval("CEIL(2.1)", &ctx).unwrap(), Decimal::from(3));
        assert_eq!(eval("ABS(-5)", &ctx).unwrap(), Decimal::from(5));
    }

    #[test]
    fn test_if_evaluates_only_taken_branch() {
        let ctx = ctx_with(&[]);
        assert_eq!(eval("IF(1 > 2, 10, 20)", &ctx).unwrap(), Decimal::from(20));
        // The untaken branch divides by zero and must not run
        assert_eq!(eval("IF(1 < 2, 10, 1 / 0)", &ctx).unwrap(), Decimal::from(10));
    }

    #[test]
    fn test_comparisons_and_connectives() {
        let ctx = ctx_with(&[]);
        assert_eq!(eval("1 == 1", &ctx).unwrap(), Decimal::ONE);
        assert_eq!(eval("1 != 1", &ctx).unwrap(), Decimal::ZERO);
        assert_eq!(eval("1 < 2 && 3 > 2", &ctx).unwrap(), Decimal::ONE);
        assert_eq!(eval("1 > 2 || 3 > 2", &ctx).unwrap(), Decimal::ONE);
    }

    #[test]
    fn test_remaining_ctc_sums_other_earnings_only() {
        // The current component is excluded even if it already holds a value
        let ctx = ctx_with(&[("BASIC", 20_000), ("HRA", 10_000), ("TEST", 999)]);
        let expr = crate::parser::parse_formula_uncached("RemainingCTC()").unwrap();
        assert_eq!(eval_expr(&expr, &ctx, "TEST").unwrap(), Decimal::from(20_000));
    }

    #[test]
    fn test_remaining_ctc_floors_at_zero() {
        let ctx = ctx_with(&[("BASIC", 60_000)]);
        let expr = crate::parser::parse_formula_uncached("RemainingCTC()").unwrap();
        assert_eq!(eval_expr(&expr, &ctx, "SA").unwrap(), Decimal::ZERO);
    }

    #[test]
    fn test_invalid_round_precision() {
        let ctx = ctx_with(&[]);
        assert!(matches!(
            eval("ROUND(1.5, -1)", &ctx),
            Err(EngineError::Arithmetic { .. })
        ));
        assert!(matches!(
            eval("ROUND(1.5, 1.5)", &ctx),
            Err(EngineError::Arithmetic { .. })
        ));
    }
}
