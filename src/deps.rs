//! Dependency extraction
//!
//! Produces the set of component codes one definition reads, merging three
//! sources: the explicit `depends_on` list, whole-word identifier tokens in
//! the formula text that name codes actually present in the template, and
//! the implicit edges `percent_of_basic -> BASIC` /
//! `percent_of_gross -> GROSS`.

use std::collections::BTreeSet;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::component::{normalize_code, CalculationType, ComponentDefinition};
use crate::graph::{BASIC_CODE, GROSS_CODE};

// Identifier tokens, same shape the expression grammar accepts. Word
// boundaries fall out of the token scan itself: BASIC never matches inside
// BASIC_2 because the scan consumes the whole token.
static TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Za-z_][A-Za-z0-9_]*").expect("token pattern"));

/// De-duplicated set of codes `def` depends on.
///
/// `known_codes` is the normalized code set of the template being
/// calculated (plus synthetic nodes); formula tokens outside it are left
/// for the evaluator to resolve against the environment.
pub fn extract_dependencies(
    def: &ComponentDefinition,
    known_codes: &BTreeSet<String>,
) -> BTreeSet<String> {
    let mut deps: BTreeSet<String> = def.depends_on.iter().map(|c| normalize_code(c)).collect();

    match def.calculation_type {
        CalculationType::PercentOfBasic => {
            deps.insert(BASIC_CODE.to_string());
        }
        CalculationType::PercentOfGross => {
            deps.insert(GROSS_CODE.to_string());
        }
        CalculationType::Formula => {
            if let Some(text) = &def.formula_expression {
                for token in TOKEN.find_iter(text) {
                    let code = normalize_code(token.as_str());
                    if known_codes.contains(&code) {
                        deps.insert(code);
                    }
                }
            }
        }
        CalculationType::Fixed | CalculationType::PercentOfCtc => {}
    }

    deps
}
