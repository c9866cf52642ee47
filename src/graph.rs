//! Named-Type Reference Graph
//!
//! Computes strongly connected components over named-type references.
//! Two questions are answered here:
//! - does any type contain itself without an array/map/union in between
//!   (a parse error), and
//! - which types are mutually recursive (emitters box those references).

use petgraph::algo::kosaraju_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use std::collections::{BTreeMap, HashMap};

use crate::schema::SchemaNode;

/// How a reference reaches its target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdgeKind {
    /// Record field whose type is the target itself
    Direct,
    /// Through an array, map, or union
    Indirect,
}

/// Directed graph of references between named types
pub struct TypeGraph {
    graph: DiGraph<String, EdgeKind>,
    index: HashMap<String, NodeIndex>,
}

impl TypeGraph {
    /// Build from `(full name, definition)` pairs. Targets outside the set
    /// still get a node so edges are never dropped.
    pub fn build<'a>(definitions: impl IntoIterator<Item = (&'a str, &'a SchemaNode)>) -> Self {
        let mut tg = Self {
            graph: DiGraph::new(),
            index: HashMap::new(),
        };

        let mut pending = Vec::new();
        for (name, def) in definitions {
            let from = tg.node(name);
            let mut refs = Vec::new();
            collect_refs(def, false, &mut refs);
            pending.push((from, refs));
        }

        for (from, refs) in pending {
            for (target, kind) in refs {
                let to = tg.node(&target);
                tg.graph.add_edge(from, to, kind);
            }
        }

        tg
    }

    fn node(&mut self, name: &str) -> NodeIndex {
        if let Some(idx) = self.index.get(name) {
            return *idx;
        }
        let idx = self.graph.add_node(name.to_string());
        self.index.insert(name.to_string(), idx);
        idx
    }

    /// Cycles made only of direct containment edges. Each cycle is returned
    /// as the sorted member names of its component.
    pub fn direct_cycles(&self) -> Vec<Vec<String>> {
        let direct = self
            .graph
            .filter_map(|_, n| Some(n.clone()), |_, e| (*e == EdgeKind::Direct).then_some(*e));

        let mut cycles = Vec::new();
        for scc in kosaraju_scc(&direct) {
            let cyclic = scc.len() > 1
                || direct
                    .edges_directed(scc[0], Direction::Outgoing)
                    .any(|e| e.target() == scc[0]);
            if cyclic {
                let mut members: Vec<String> =
                    scc.iter().filter_map(|i| direct.node_weight(*i).cloned()).collect();
                members.sort();
                cycles.push(members);
            }
        }
        cycles.sort();
        cycles
    }

    /// Recursive component id for every type that participates in a cycle
    /// (of any edge kind). Ids are stable for a given input.
    pub fn recursive_components(&self) -> BTreeMap<String, usize> {
        let mut components: Vec<Vec<String>> = Vec::new();
        for scc in kosaraju_scc(&self.graph) {
            let cyclic = scc.len() > 1
                || self
                    .graph
                    .edges_directed(scc[0], Direction::Outgoing)
                    .any(|e| e.target() == scc[0]);
            if cyclic {
                let mut members: Vec<String> = scc
                    .iter()
                    .filter_map(|i| self.graph.node_weight(*i).cloned())
                    .collect();
                members.sort();
                components.push(members);
            }
        }
        components.sort();

        let mut result = BTreeMap::new();
        for (id, members) in components.into_iter().enumerate() {
            for member in members {
                result.insert(member, id);
            }
        }
        result
    }
}

fn collect_refs(node: &SchemaNode, indirect: bool, out: &mut Vec<(String, EdgeKind)>) {
    match node {
        SchemaNode::Reference(name) => {
            let kind = if indirect { EdgeKind::Indirect } else { EdgeKind::Direct };
            out.push((name.fullname(), kind));
        }
        SchemaNode::Record(r) => {
            for field in &r.fields {
                collect_refs(&field.schema, indirect, out);
            }
        }
        SchemaNode::Array(inner) | SchemaNode::Map(inner) => collect_refs(inner, true, out),
        SchemaNode::Union(u) => {
            for branch in u.branches() {
                collect_refs(branch, true, out);
            }
        }
        SchemaNode::Enum(_) | SchemaNode::Fixed(_) | SchemaNode::Primitive(_) => {}
    }
}
