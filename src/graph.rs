//! Concurrency-safe dependency graph of observed endpoints and flows.
//!
//! Nodes are keyed by address; edges are kept per source address in the order
//! they were observed and are never deduplicated. Every mutation takes the
//! write lock and every read (render, flatten) takes the read lock.

use serde::{Deserialize, Serialize};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum NodeType {
    #[default]
    Service,
    Pod,
}

impl From<NodeType> for u8 {
    fn from(node_type: NodeType) -> Self {
        match node_type {
            NodeType::Service => 0,
            NodeType::Pod => 1,
        }
    }
}

impl TryFrom<u8> for NodeType {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(NodeType::Service),
            1 => Ok(NodeType::Pod),
            other => Err(format!("unknown node type {}", other)),
        }
    }
}

/// One endpoint, identified by its address.
///
/// `name` and `identity` are only ever filled in by external enrichment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    #[serde(rename = "type")]
    pub node_type: NodeType,
    pub address: String,
    pub name: String,
    pub identity: String,
}

impl Node {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Self::default()
        }
    }

    /// Fill-forward merge: copy a field from `other` only where ours is empty.
    /// The node type is fixed at first insertion and is never merged.
    pub fn merge(&mut self, other: Node) {
        fill_empty(&mut self.address, other.address);
        fill_empty(&mut self.name, other.name);
        fill_empty(&mut self.identity, other.identity);
    }
}

fn fill_empty(field: &mut String, incoming: String) {
    if field.is_empty() && !incoming.is_empty() {
        *field = incoming;
    }
}

/// One observed directional flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    pub source_address: String,
    pub dest_address: String,
    pub source_port: u16,
    pub dest_port: u16,
    pub protocol: String,
    pub length: usize,
}

impl fmt::Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}:{} -> {}:{} ({} bytes)",
            self.protocol,
            self.source_address,
            self.source_port,
            self.dest_address,
            self.dest_port,
            self.length
        )
    }
}

/// Flattened, owned copy of the graph, as written to export files.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

#[derive(Debug, Default)]
struct GraphState {
    nodes: HashMap<String, Node>,
    edges: HashMap<String, Vec<Edge>>,
}

#[derive(Debug, Default)]
pub struct Graph {
    state: RwLock<GraphState>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    // Neither map carries an invariant that a panicking writer could break
    // halfway, so a poisoned lock is still safe to use.
    fn read_state(&self) -> RwLockReadGuard<'_, GraphState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, GraphState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert a node, or fill-forward merge it into the node already at its address.
    pub fn add_node(&self, node: Node) {
        let mut state = self.write_state();

        match state.nodes.entry(node.address.clone()) {
            Entry::Occupied(mut existing) => existing.get_mut().merge(node),
            Entry::Vacant(slot) => {
                slot.insert(node);
            }
        }
    }

    /// Append an edge to the sequence of its source address.
    pub fn add_edge(&self, edge: Edge) {
        let mut state = self.write_state();
        state
            .edges
            .entry(edge.source_address.clone())
            .or_default()
            .push(edge);
    }

    pub fn reset(&self) {
        let mut state = self.write_state();
        *state = GraphState::default();
    }

    pub fn node(&self, address: &str) -> Option<Node> {
        self.read_state().nodes.get(address).cloned()
    }

    pub fn edges_from(&self, address: &str) -> Vec<Edge> {
        self.read_state()
            .edges
            .get(address)
            .cloned()
            .unwrap_or_default()
    }

    pub fn node_count(&self) -> usize {
        self.read_state().nodes.len()
    }

    /// Number of source addresses with at least one edge.
    pub fn source_count(&self) -> usize {
        self.read_state().edges.len()
    }

    pub fn edge_count(&self) -> usize {
        self.read_state().edges.values().map(Vec::len).sum()
    }

    /// Copy both maps out under the read lock. Per-source edge order is kept.
    pub fn snapshot(&self) -> GraphSnapshot {
        let state = self.read_state();

        GraphSnapshot {
            nodes: state.nodes.values().cloned().collect(),
            edges: state.edges.values().flatten().cloned().collect(),
        }
    }

    pub fn render(&self) -> String {
        self.to_string()
    }
}

/// One line per node without edges, one line per outgoing edge otherwise:
/// `address -> sourcePort -> destPort -> destAddress`.
impl fmt::Display for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.read_state();

        for node in state.nodes.values() {
            match state.edges.get(&node.address) {
                Some(edges) if !edges.is_empty() => {
                    for edge in edges {
                        writeln!(
                            f,
                            "{} -> {} -> {} -> {}",
                            node.address, edge.source_port, edge.dest_port, edge.dest_address
                        )?;
                    }
                }
                _ => writeln!(f, "{}", node.address)?,
            }
        }

        Ok(())
    }
}
