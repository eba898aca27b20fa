//! Dependency graph construction and cycle detection
//!
//! The graph is ephemeral: built fresh for every calculation from the flat
//! component list, keyed by normalized code. Forward edges come from the
//! dependency extractor; reverse (dependent) edges are filled in a second
//! pass once all forward edges are known.
//!
//! `GROSS` is injected as a synthetic node depending on every earning, so
//! anything reading `GROSS` is scheduled after all earnings without the
//! template having to declare it.

use std::collections::{BTreeMap, BTreeSet};

use crate::component::ComponentDefinition;
use crate::deps::extract_dependencies;

pub const BASIC_CODE: &str = "BASIC";
pub const GROSS_CODE: &str = "GROSS";

/// One node of the per-calculation dependency graph
#[derive(Debug, Clone)]
pub struct ComponentNode {
    /// `None` for the synthetic `GROSS` node
    pub definition: Option<ComponentDefinition>,
    /// Codes this node reads; always a subset of the graph's node set
    pub dependencies: BTreeSet<String>,
    /// Codes that read this node (reverse adjacency)
    pub dependents: BTreeSet<String>,
}

impl ComponentNode {
    pub fn is_synthetic(&self) -> bool {
        self.definition.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct DependencyGraph {
    pub nodes: BTreeMap<String, ComponentNode>,
}

impl DependencyGraph {
    /// Build forward and reverse adjacency for the given component set.
    ///
    /// Dependencies naming codes absent from the template are dropped here;
    /// if a formula actually reads such a code the evaluator raises
    /// `UnknownReference` instead.
    pub fn build(components: &[ComponentDefinition]) -> Self {
        let mut known: BTreeSet<String> =
            components.iter().map(|c| c.normalized_code()).collect();
        let user_defined_gross = known.contains(GROSS_CODE);
        known.insert(GROSS_CODE.to_string());

        let mut nodes: BTreeMap<String, ComponentNode> = BTreeMap::new();

        for def in components {
            let code = def.normalized_code();
            let dependencies: BTreeSet<String> = extract_dependencies(def, &known)
                .into_iter()
                .filter(|dep| known.contains(dep))
                .collect();
            nodes.insert(
                code,
                ComponentNode {
                    definition: Some(def.clone()),
                    dependencies,
                    dependents: BTreeSet::new(),
                },
            );
        }

        if !user_defined_gross {
            let earning_codes: BTreeSet<String> = components
                .iter()
                .filter(|c| c.is_earning())
                .map(|c| c.normalized_code())
                .collect();
            nodes.insert(
                GROSS_CODE.to_string(),
                ComponentNode {
                    definition: None,
                    dependencies: earning_codes,
                    dependents: BTreeSet::new(),
                },
            );
        }

        // Second pass: reverse adjacency
        let edges: Vec<(String, String)> = nodes
            .iter()
            .flat_map(|(code, node)| {
                node.dependencies
                    .iter()
                    .map(move |dep| (dep.clone(), code.clone()))
            })
            .collect();
        for (dep, dependent) in edges {
            if let Some(node) = nodes.get_mut(&dep) {
                node.dependents.insert(dependent);
            }
        }

        Self { nodes }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Depth-first cycle search with an explicit stack.
    ///
    /// Returns the offending path (first node repeated at the end) for the
    /// first cycle found, or `None` when the graph is a DAG. Start order is
    /// the BTreeMap key order, so the reported cycle is deterministic.
    pub fn find_cycle(&self) -> Option<Vec<String>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Unvisited,
            InProgress,
            Done,
        }

        let mut marks: BTreeMap<&str, Mark> = self
            .nodes
            .keys()
            .map(|code| (code.as_str(), Mark::Unvisited))
            .collect();

        for start in self.nodes.keys() {
            if marks[start.as_str()] != Mark::Unvisited {
                continue;
            }

            // (code, ordered dependency list, next child index)
            let mut stack: Vec<(&str, Vec<&str>, usize)> = Vec::new();
            marks.insert(start.as_str(), Mark::InProgress);
            stack.push((start.as_str(), self.children(start), 0));

            while let Some(top) = stack.last_mut() {
                let code = top.0;
                let child = if top.2 < top.1.len() {
                    let c = top.1[top.2];
                    top.2 += 1;
                    Some(c)
                } else {
                    None
                };

                let Some(child) = child else {
                    marks.insert(code, Mark::Done);
                    stack.pop();
                    continue;
                };

                match marks[child] {
                    Mark::Unvisited => {
                        marks.insert(child, Mark::InProgress);
                        let grandchildren = self.children(child);
                        stack.push((child, grandchildren, 0));
                    }
                    Mark::InProgress => {
                        // Child is on the current path: slice out the cycle
                        let pos = stack
                            .iter()
                            .position(|(c, _, _)| *c == child)
                            .unwrap_or(0);
                        let mut path: Vec<String> =
                            stack[pos..].iter().map(|(c, _, _)| c.to_string()).collect();
                        path.push(child.to_string());
                        return Some(path);
                    }
                    Mark::Done => {}
                }
            }
        }

        None
    }

    fn children(&self, code: &str) -> Vec<&str> {
        self.nodes
            .get(code)
            .map(|n| n.dependencies.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }
}
