//! Serializer guard: turns field values and arbitrary value graphs into flat
//! JSON text without recursing unboundedly and without looping on cycles.
//!
//! Containers nested deeper than [`GuardLimits::max_depth`] are replaced by
//! [`Placeholder::Truncated`]; a graph node revisited on its own path is
//! replaced by [`Placeholder::Cycle`]. Both survive [`unflatten`] so callers
//! can tell a lossy value from a real one.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

use crate::error::CoreError;
use crate::field_value::{FieldValue, Placeholder};
use crate::record::Snapshot;

/// Each nesting level costs two JSON levels (`{"List":[...]}`) and
/// serde_json refuses documents nested past 128, so depth stays well under.
pub const MAX_SUPPORTED_DEPTH: usize = 48;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardLimits {
    pub max_depth: usize,
    pub max_bytes: usize,
}

impl Default for GuardLimits {
    fn default() -> Self {
        Self {
            max_depth: 32,
            max_bytes: 8 * 1024 * 1024,
        }
    }
}

impl GuardLimits {
    fn depth(&self) -> usize {
        self.max_depth.min(MAX_SUPPORTED_DEPTH)
    }
}

/// Copy of `value` with over-deep containers truncated.
pub fn bound(value: &FieldValue, limits: &GuardLimits) -> FieldValue {
    bound_at(value, 0, limits.depth())
}

fn bound_at(value: &FieldValue, depth: usize, max_depth: usize) -> FieldValue {
    match value {
        FieldValue::List(_) | FieldValue::Map(_) if depth >= max_depth => {
            FieldValue::Placeholder(Placeholder::Truncated)
        }
        FieldValue::List(items) => FieldValue::List(
            items
                .iter()
                .map(|v| bound_at(v, depth + 1, max_depth))
                .collect(),
        ),
        FieldValue::Map(entries) => FieldValue::Map(
            entries
                .iter()
                .map(|(k, v)| (k.clone(), bound_at(v, depth + 1, max_depth)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// [`bound`], failing on values that JSON cannot represent.
pub fn sanitize(value: &FieldValue, limits: &GuardLimits) -> Result<FieldValue, CoreError> {
    let bounded = bound(value, limits);
    reject_non_finite(&bounded)?;
    Ok(bounded)
}

/// [`sanitize`] every field of every record in place.
pub fn sanitize_snapshot(snapshot: &mut Snapshot, limits: &GuardLimits) -> Result<(), CoreError> {
    for record in snapshot.records_mut() {
        for value in record.fields.values_mut() {
            *value = sanitize(value, limits)?;
        }
    }
    Ok(())
}

pub fn flatten(value: &FieldValue, limits: &GuardLimits) -> Result<String, CoreError> {
    let bounded = sanitize(value, limits)?;
    let text =
        serde_json::to_string(&bounded).map_err(|e| CoreError::Serialization(e.to_string()))?;
    if text.len() > limits.max_bytes {
        return Err(CoreError::Serialization(format!(
            "flattened value is {} bytes, limit is {}",
            text.len(),
            limits.max_bytes
        )));
    }
    Ok(text)
}

pub fn unflatten(text: &str) -> Result<FieldValue, CoreError> {
    serde_json::from_str(text).map_err(|e| CoreError::Serialization(e.to_string()))
}

// JSON has no NaN/inf; serde_json would silently write `null`.
fn reject_non_finite(value: &FieldValue) -> Result<(), CoreError> {
    match value {
        FieldValue::Float(f) if !f.is_finite() => Err(CoreError::Serialization(format!(
            "non-finite float {f} cannot be flattened"
        ))),
        FieldValue::List(items) => items.iter().try_for_each(reject_non_finite),
        FieldValue::Map(entries) => entries.values().try_for_each(reject_non_finite),
        _ => Ok(()),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

#[derive(Debug, Clone)]
pub enum GraphNode {
    Value(FieldValue),
    List(Vec<NodeId>),
    Map(Vec<(String, NodeId)>),
}

/// Arena of nodes that reference each other by index. Models object graphs
/// handed over by collaborators, which may share or loop back on nodes.
#[derive(Debug, Clone, Default)]
pub struct ValueGraph {
    nodes: Vec<GraphNode>,
}

impl ValueGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, node: GraphNode) -> NodeId {
        self.nodes.push(node);
        NodeId(self.nodes.len() - 1)
    }

    /// Replace a node in place; used to close loops after both ends exist.
    pub fn set(&mut self, id: NodeId, node: GraphNode) {
        if let Some(slot) = self.nodes.get_mut(id.0) {
            *slot = node;
        }
    }

    pub fn get(&self, id: NodeId) -> Option<&GraphNode> {
        self.nodes.get(id.0)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Materialize the tree reachable from `root`. Shared nodes are copied;
/// only a node already on the current path counts as a cycle.
pub fn resolve_graph(graph: &ValueGraph, root: NodeId, limits: &GuardLimits) -> FieldValue {
    let mut on_path = HashSet::new();
    resolve_at(graph, root, 0, limits.depth(), &mut on_path)
}

fn resolve_at(
    graph: &ValueGraph,
    id: NodeId,
    depth: usize,
    max_depth: usize,
    on_path: &mut HashSet<NodeId>,
) -> FieldValue {
    let Some(node) = graph.get(id) else {
        return FieldValue::Null;
    };
    let resolved = match node {
        GraphNode::Value(value) => return bound_at(value, depth, max_depth),
        _ if on_path.contains(&id) => return FieldValue::Placeholder(Placeholder::Cycle),
        _ if depth >= max_depth => return FieldValue::Placeholder(Placeholder::Truncated),
        GraphNode::List(children) => {
            on_path.insert(id);
            FieldValue::List(
                children
                    .iter()
                    .map(|child| resolve_at(graph, *child, depth + 1, max_depth, on_path))
                    .collect(),
            )
        }
        GraphNode::Map(entries) => {
            on_path.insert(id);
            let mut map = BTreeMap::new();
            for (key, child) in entries {
                map.insert(
                    key.clone(),
                    resolve_at(graph, *child, depth + 1, max_depth, on_path),
                );
            }
            FieldValue::Map(map)
        }
    };
    on_path.remove(&id);
    resolved
}

pub fn flatten_graph(
    graph: &ValueGraph,
    root: NodeId,
    limits: &GuardLimits,
) -> Result<String, CoreError> {
    flatten(&resolve_graph(graph, root, limits), limits)
}
