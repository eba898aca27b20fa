//! Nom-based formula parser
//!
//! Precedence, loosest to tightest: `||`, `&&`, comparison, additive,
//! multiplicative, unary minus, primary (number, call, identifier,
//! parenthesized expression).
//!
//! Parsing is pure and structural, so successful parses are memoized in a
//! process-wide cache keyed by the literal formula text. Population races
//! are harmless: both racers produce the same tree.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, RwLock};

use nom::{
    branch::alt,
    bytes::complete::tag,
    character::complete::{alpha1, alphanumeric1, char, digit1, multispace0},
    combinator::{all_consuming, opt, recognize, value},
    error::{convert_error, ParseError as NomParseError, VerboseError},
    multi::{many0, separated_list0},
    sequence::{delimited, pair, preceded, tuple},
    IResult,
};
use once_cell::sync::Lazy;
use rust_decimal::Decimal;

use crate::ast::{BinOp, Expr};

static PARSE_CACHE: Lazy<RwLock<HashMap<String, Arc<Expr>>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Parse a formula, consulting the shared parse cache.
///
/// Only successful parses are cached; the error string carries nom's
/// verbose trace for the template author.
pub fn parse_formula(input: &str) -> Result<Arc<Expr>, String> {
    if let Ok(cache) = PARSE_CACHE.read() {
        if let Some(expr) = cache.get(input) {
            return Ok(Arc::clone(expr));
        }
    }

    let expr = Arc::new(parse_formula_uncached(input)?);

    if let Ok(mut cache) = PARSE_CACHE.write() {
        cache
            .entry(input.to_string())
            .or_insert_with(|| Arc::clone(&expr));
    }

    Ok(expr)
}

/// Parse a formula without touching the cache
pub fn parse_formula_uncached(input: &str) -> Result<Expr, String> {
    match all_consuming(delimited(
        multispace0::<_, VerboseError<&str>>,
        expr,
        multispace0,
    ))(input)
    {
        Ok((_, parsed)) => Ok(parsed),
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => Err(convert_error(input, e)),
        Err(nom::Err::Incomplete(_)) => Err("incomplete input".to_string()),
    }
}

// ============================================================================
// Internal parsers
// ============================================================================

fn ws<'a, O, E, F>(inner: F) -> impl FnMut(&'a str) -> IResult<&'a str, O, E>
where
    E: NomParseError<&'a str>,
    F: FnMut(&'a str) -> IResult<&'a str, O, E>,
{
    preceded(multispace0, inner)
}

fn expr<'a, E: NomParseError<&'a str>>(input: &'a str) -> IResult<&'a str, Expr, E> {
    or_expr(input)
}

fn or_expr<'a, E: NomParseError<&'a str>>(input: &'a str) -> IResult<&'a str, Expr, E> {
    let (input, first) = and_expr(input)?;
    let (input, rest) = many0(preceded(ws(tag("||")), and_expr))(input)?;
    Ok((
        input,
        rest.into_iter()
            .fold(first, |lhs, rhs| Expr::binary(BinOp::Or, lhs, rhs)),
    ))
}

fn and_expr<'a, E: NomParseError<&'a str>>(input: &'a str) -> IResult<&'a str, Expr, E> {
    let (input, first) = comparison(input)?;
    let (input, rest) = many0(preceded(ws(tag("&&")), comparison))(input)?;
    Ok((
        input,
        rest.into_iter()
            .fold(first, |lhs, rhs| Expr::binary(BinOp::And, lhs, rhs)),
    ))
}

fn comparison_op<'a, E: NomParseError<&'a str>>(input: &'a str) -> IResult<&'a str, BinOp, E> {
    alt((
        value(BinOp::Le, tag("<=")),
        value(BinOp::Ge, tag(">=")),
        value(BinOp::Eq, tag("==")),
        value(BinOp::Ne, tag("!=")),
        value(BinOp::Lt, tag("<")),
        value(BinOp::Gt, tag(">")),
    ))(input)
}

fn comparison<'a, E: NomParseError<&'a str>>(input: &'a str) -> IResult<&'a str, Expr, E> {
    let (input, lhs) = additive(input)?;
    let (input, tail) = opt(pair(ws(comparison_op), additive))(input)?;
    Ok(match tail {
        Some((op, rhs)) => (input, Expr::binary(op, lhs, rhs)),
        None => (input, lhs),
    })
}

fn additive_op<'a, E: NomParseError<&'a str>>(input: &'a str) -> IResult<&'a str, BinOp, E> {
    alt((value(BinOp::Add, char('+')), value(BinOp::Sub, char('-'))))(input)
}

fn additive<'a, E: NomParseError<&'a str>>(input: &'a str) -> IResult<&'a str, Expr, E> {
    let (input, first) = term(input)?;
    let (input, rest) = many0(pair(ws(additive_op), term))(input)?;
    Ok((
        input,
        rest.into_iter()
            .fold(first, |lhs, (op, rhs)| Expr::binary(op, lhs, rhs)),
    ))
}

fn term_op<'a, E: NomParseError<&'a str>>(input: &'a str) -> IResult<&'a str, BinOp, E> {
    alt((value(BinOp::Mul, char('*')), value(BinOp::Div, char('/'))))(input)
}

fn term<'a, E: NomParseError<&'a str>>(input: &'a str) -> IResult<&'a str, Expr, E> {
    let (input, first) = unary(input)?;
    let (input, rest) = many0(pair(ws(term_op), unary))(input)?;
    Ok((
        input,
        rest.into_iter()
            .fold(first, |lhs, (op, rhs)| Expr::binary(op, lhs, rhs)),
    ))
}

fn unary<'a, E: NomParseError<&'a str>>(input: &'a str) -> IResult<&'a str, Expr, E> {
    let (input, _) = multispace0(input)?;
    if let Ok((rest, _)) = char::<_, E>('-')(input) {
        let (rest, operand) = unary(rest)?;
        return Ok((rest, Expr::neg(operand)));
    }
    primary(input)
}

fn primary<'a, E: NomParseError<&'a str>>(input: &'a str) -> IResult<&'a str, Expr, E> {
    let (input, _) = multispace0(input)?;
    alt((
        number,
        call_or_ident,
        delimited(char('('), expr, ws(char(')'))),
    ))(input)
}

// Number literals: unsigned decimal, negation is handled by `unary`
fn number<'a, E: NomParseError<&'a str>>(input: &'a str) -> IResult<&'a str, Expr, E> {
    let (remaining, num_str) =
        recognize(tuple((digit1, opt(pair(char('.'), digit1)))))(input)?;

    match Decimal::from_str(num_str) {
        Ok(d) => Ok((remaining, Expr::Number(d))),
        Err(_) => Err(nom::Err::Error(E::from_error_kind(
            input,
            nom::error::ErrorKind::Float,
        ))),
    }
}

fn identifier<'a, E: NomParseError<&'a str>>(input: &'a str) -> IResult<&'a str, &'a str, E> {
    recognize(pair(
        alt((alpha1, tag("_"))),
        many0(alt((alphanumeric1, tag("_")))),
    ))(input)
}

// An identifier followed by an argument list is a function call
fn call_or_ident<'a, E: NomParseError<&'a str>>(input: &'a str) -> IResult<&'a str, Expr, E> {
    let (input, name) = identifier(input)?;
    let (input, args) = opt(delimited(
        ws(char('(')),
        separated_list0(ws(char(',')), expr),
        ws(char(')')),
    ))(input)?;

    Ok(match args {
        Some(args) => (
            input,
            Expr::Call {
                name: name.to_string(),
                args,
            },
        ),
        None => (input, Expr::Ident(name.to_string())),
    })
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::UnaryOp;

    fn parse(input: &str) -> Expr {
        parse_formula_uncached(input).unwrap()
    }

    #[test]
    fn test_number_literal() {
        assert_eq!(parse("42"), Expr::Number(Decimal::from(42)));
        assert_eq!(
            parse("3.14"),
            Expr::Number(Decimal::from_str("3.14").unwrap())
        );
    }

    #[test]
    fn test_negative_number() {
        assert_eq!(parse("-5"), Expr::neg(Expr::Number(Decimal::from(5))));
    }

    #[test]
    fn test_identifier() {
        assert_eq!(parse("BASIC"), Expr::Ident("BASIC".into()));
        assert_eq!(parse("PF_CAP"), Expr::Ident("PF_CAP".into()));
    }

    #[test]
    fn test_precedence_mul_over_add() {
        // 1 + 2 * 3 parses as 1 + (2 * 3)
        let e = parse("1 + 2 * 3");
        assert_eq!(e.to_string(), "(1 + (2 * 3))");
    }

    #[test]
    fn test_left_associativity() {
        let e = parse("10 - 3 - 2");
        assert_eq!(e.to_string(), "((10 - 3) - 2)");
    }

    #[test]
    fn test_parentheses_override() {
        let e = parse("(1 + 2) * 3");
        assert_eq!(e.to_string(), "((1 + 2) * 3)");
    }

    #[test]
    fn test_comparison() {
        let e = parse("GROSS >= 21000");
        assert_eq!(e.to_string(), "(GROSS >= 21000)");
    }

    #[test]
    fn test_boolean_connectives() {
        let e = parse("A > 1 && B < 2 || C == 3");
        assert_eq!(e.to_string(), "(((A > 1) && (B < 2)) || (C == 3))");
    }

    #[test]
    fn test_function_call() {
        let e = parse("MIN(BASIC * 12 / 100, PF_CAP)");
        if let Expr::Call { name, args } = e {
            assert_eq!(name, "MIN");
            assert_eq!(args.len(), 2);
        } else {
            panic!("expected Call");
        }
    }

    #[test]
    fn test_nullary_call() {
        let e = parse("RemainingCTC()");
        assert_eq!(
            e,
            Expr::Call {
                name: "RemainingCTC".into(),
                args: vec![]
            }
        );
    }

    #[test]
    fn test_nested_calls() {
        let e = parse("MAX(MIN(A, B), ROUND(C, 2))");
        assert_eq!(e.to_string(), "MAX(MIN(A, B), ROUND(C, 2))");
    }

    #[test]
    fn test_if_with_comparison_argument() {
        let e = parse("IF(GROSS <= ESI_THRESHOLD, GROSS * 0.75 / 100, 0)");
        if let Expr::Call { name, args } = e {
            assert_eq!(name, "IF");
            assert_eq!(args.len(), 3);
        } else {
            panic!("expected Call");
        }
    }

    #[test]
    fn test_whitespace_variations() {
        assert_eq!(parse("1+2"), parse(" 1  +\t2 "));
    }

    #[test]
    fn test_double_negation() {
        let e = parse("--5");
        assert!(matches!(e, Expr::Unary { op: UnaryOp::Neg, .. }));
    }

    #[test]
    fn test_error_trailing_garbage() {
        assert!(parse_formula_uncached("1 + 2 @").is_err());
    }

    #[test]
    fn test_error_unclosed_paren() {
        assert!(parse_formula_uncached("(1 + 2").is_err());
    }

    #[test]
    fn test_error_dangling_operator() {
        assert!(parse_formula_uncached("1 +").is_err());
    }

    #[test]
    fn test_error_empty_input() {
        assert!(parse_formula_uncached("").is_err());
    }

    #[test]
    fn test_error_string_literal_rejected() {
        // The grammar has no string type at all
        assert!(parse_formula_uncached("\"BASIC\"").is_err());
    }

    #[test]
    fn test_cache_returns_same_tree() {
        let a = parse_formula("BASIC * 40 / 100").unwrap();
        let b = parse_formula("BASIC * 40 / 100").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_cache_skips_failures() {
        assert!(parse_formula("1 +").is_err());
        // A later well-formed parse is unaffected
        assert!(parse_formula("1 + 1").is_ok());
    }
}
