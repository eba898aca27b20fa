//! Typed expression AST for salary formulas
//!
//! The grammar is deliberately closed: numeric literals, identifiers,
//! arithmetic, comparisons, boolean connectives, and whitelisted function
//! calls. There is no facility for definitions, assignment, or any other
//! code-execution construct, so evaluation is a plain tree walk against a
//! binding map.

use std::collections::BTreeSet;
use std::fmt;

use rust_decimal::Decimal;

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
}

/// Binary operators, arithmetic and boolean
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::And => "&&",
            BinOp::Or => "||",
        }
    }
}

/// A parsed formula expression
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(Decimal),
    Ident(String),
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Call {
        name: String,
        args: Vec<Expr>,
    },
}

impl Expr {
    pub fn binary(op: BinOp, lhs: Expr, rhs: Expr) -> Self {
        Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn neg(operand: Expr) -> Self {
        Expr::Unary {
            op: UnaryOp::Neg,
            operand: Box::new(operand),
        }
    }

    /// Maximum nesting depth of the tree, used to bound formulas defensively
    pub fn depth(&self) -> usize {
        match self {
            Expr::Number(_) | Expr::Ident(_) => 1,
            Expr::Unary { operand, .. } => 1 + operand.depth(),
            Expr::Binary { lhs, rhs, .. } => 1 + lhs.depth().max(rhs.depth()),
            Expr::Call { args, .. } => {
                1 + args.iter().map(Expr::depth).max().unwrap_or(0)
            }
        }
    }

    /// Collect every identifier referenced by the expression (not call names)
    pub fn collect_identifiers(&self, out: &mut BTreeSet<String>) {
        match self {
            Expr::Number(_) => {}
            Expr::Ident(name) => {
                out.insert(name.clone());
            }
            Expr::Unary { operand, .. } => operand.collect_identifiers(out),
            Expr::Binary { lhs, rhs, .. } => {
                lhs.collect_identifiers(out);
                rhs.collect_identifiers(out);
            }
            Expr::Call { args, .. } => {
                for arg in args {
                    arg.collect_identifiers(out);
                }
            }
        }
    }

    /// Collect every function call as (name, argument count)
    pub fn collect_calls(&self, out: &mut Vec<(String, usize)>) {
        match self {
            Expr::Number(_) | Expr::Ident(_) => {}
            Expr::Unary { operand, .. } => operand.collect_calls(out),
            Expr::Binary { lhs, rhs, .. } => {
                lhs.collect_calls(out);
                rhs.collect_calls(out);
            }
            Expr::Call { name, args } => {
                out.push((name.clone(), args.len()));
                for arg in args {
                    arg.collect_calls(out);
                }
            }
        }
    }
}

impl fmt::Display for Expr {
    /// Render the expression back to formula source, fully parenthesized
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Number(n) => write!(f, "{}", n),
            Expr::Ident(name) => write!(f, "{}", name),
            Expr::Unary { op: UnaryOp::Neg, operand } => write!(f, "-{}", operand),
            Expr::Binary { op, lhs, rhs } => {
                write!(f, "({} {} {})", lhs, op.symbol(), rhs)
            }
            Expr::Call { name, args } => {
                let rendered: Vec<String> = args.iter().map(|a| a.to_string()).collect();
                write!(f, "{}({})", name, rendered.join(", "))
            }
        }
    }
}
