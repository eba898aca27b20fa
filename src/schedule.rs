//! Topological scheduling
//!
//! Kahn's algorithm over the dependency graph with a min-heap ready queue,
//! so ties among simultaneously-ready nodes break by ascending code. That
//! makes the full order deterministic across platforms, which the
//! reproducibility tests rely on.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, BTreeMap};

use tracing::trace;

use crate::error::EngineError;
use crate::graph::DependencyGraph;

/// Total evaluation order: every dependency precedes its dependents.
///
/// Callers must have run cycle detection first; the length check here is a
/// defensive double-check, surfaced as an internal error because a cyclic
/// graph should never reach scheduling.
pub fn topological_order(graph: &DependencyGraph) -> Result<Vec<String>, EngineError> {
    let mut in_degree: BTreeMap<&str, usize> = graph
        .nodes
        .iter()
        .map(|(code, node)| (code.as_str(), node.dependencies.len()))
        .collect();

    let mut ready: BinaryHeap<Reverse<&str>> = in_degree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(code, _)| Reverse(*code))
        .collect();

    let mut order: Vec<String> = Vec::with_capacity(graph.len());

    while let Some(Reverse(code)) = ready.pop() {
        trace!(component = code, position = order.len(), "scheduled");
        order.push(code.to_string());

        if let Some(node) = graph.nodes.get(code) {
            for dependent in &node.dependents {
                if let Some(degree) = in_degree.get_mut(dependent.as_str()) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.push(Reverse(dependent.as_str()));
                    }
                }
            }
        }
    }

    if order.len() != graph.len() {
        return Err(EngineError::Internal(format!(
            "topological order covered {} of {} nodes; cycle detection must run first",
            order.len(),
            graph.len()
        )));
    }

    Ok(order)
}
