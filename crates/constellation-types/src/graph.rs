//! The Constellation graph model (C1): immutable data types for graphs,
//! nodes, edges and the topological order the Runner walks.

use std::collections::{HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Case-insensitive substring that marks an edge as the sole cycle mechanism.
pub const LOOP_CONDITION_TOKEN: &str = "loop";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("constellation must have exactly one Start node")]
    MissingStart,
    #[error("constellation must have exactly one End node")]
    MissingEnd,
    #[error("edge '{edge_id}' references unknown node '{node_id}'")]
    DanglingEdge { edge_id: String, node_id: String },
    #[error("constellation graph contains a cycle not mediated by a loop edge")]
    Cyclic,
    #[error("node '{0}' not found in constellation")]
    NodeNotFound(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub id: String,
    pub source: String,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

impl Edge {
    pub fn is_loop_edge(&self) -> bool {
        self.condition
            .as_deref()
            .map(|c| c.to_lowercase().contains(LOOP_CONDITION_TOKEN))
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartNode {
    pub id: String,
    /// Populated by the Runner at the start of a Run; read by Stars that
    /// inspect the Start node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_query: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constellation_purpose: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndNode {
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StarNode {
    pub id: String,
    pub star_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default)]
    pub requires_confirmation: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmation_prompt: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Node {
    Start(StartNode),
    End(EndNode),
    Star(StarNode),
}

impl Node {
    pub fn id(&self) -> &str {
        match self {
            Node::Start(n) => &n.id,
            Node::End(n) => &n.id,
            Node::Star(n) => &n.id,
        }
    }

    pub fn as_star(&self) -> Option<&StarNode> {
        match self {
            Node::Star(n) => Some(n),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Constellation {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub start: StartNode,
    pub end: EndNode,
    #[serde(default)]
    pub nodes: Vec<StarNode>,
    #[serde(default)]
    pub edges: Vec<Edge>,
    #[serde(default = "default_max_loop_iterations")]
    pub max_loop_iterations: u32,
    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,
    #[serde(default = "default_retry_delay_base")]
    pub retry_delay_base: f64,
}

fn default_max_loop_iterations() -> u32 {
    3
}

fn default_max_retry_attempts() -> u32 {
    2
}

fn default_retry_delay_base() -> f64 {
    0.5
}

impl Constellation {
    /// Structural invariants from spec §3: exactly one Start/End, every edge
    /// endpoint resolves, and the graph is acyclic once loop edges are
    /// removed. Does NOT validate `star_id` resolution — that requires a
    /// Star registry and is checked by the Star Execution Adapter instead.
    pub fn validate(&self) -> Result<(), GraphError> {
        let mut ids: HashSet<&str> = HashSet::new();
        ids.insert(self.start.id.as_str());
        ids.insert(self.end.id.as_str());
        for node in &self.nodes {
            ids.insert(node.id.as_str());
        }

        for edge in &self.edges {
            if !ids.contains(edge.source.as_str()) {
                return Err(GraphError::DanglingEdge {
                    edge_id: edge.id.clone(),
                    node_id: edge.source.clone(),
                });
            }
            if !ids.contains(edge.target.as_str()) {
                return Err(GraphError::DanglingEdge {
                    edge_id: edge.id.clone(),
                    node_id: edge.target.clone(),
                });
            }
        }

        self.topological_order()?;
        Ok(())
    }

    pub fn get_node(&self, node_id: &str) -> Option<Node> {
        if node_id == self.start.id {
            return Some(Node::Start(self.start.clone()));
        }
        if node_id == self.end.id {
            return Some(Node::End(self.end.clone()));
        }
        self.nodes
            .iter()
            .find(|n| n.id == node_id)
            .cloned()
            .map(Node::Star)
    }

    fn non_loop_edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.iter().filter(|e| !e.is_loop_edge())
    }

    /// Topological order over the DAG with loop edges removed. Start is
    /// always first, End is always last.
    pub fn topological_order(&self) -> Result<Vec<String>, GraphError> {
        let mut all_ids: Vec<String> = Vec::with_capacity(self.nodes.len() + 2);
        all_ids.push(self.start.id.clone());
        for n in &self.nodes {
            all_ids.push(n.id.clone());
        }
        all_ids.push(self.end.id.clone());

        let mut in_degree: HashMap<&str, usize> =
            all_ids.iter().map(|id| (id.as_str(), 0)).collect();
        let mut adjacency: HashMap<&str, Vec<&str>> =
            all_ids.iter().map(|id| (id.as_str(), Vec::new())).collect();

        for edge in self.non_loop_edges() {
            if let Some(list) = adjacency.get_mut(edge.source.as_str()) {
                list.push(edge.target.as_str());
            }
            if let Some(deg) = in_degree.get_mut(edge.target.as_str()) {
                *deg += 1;
            }
        }

        // Start is defined to come first regardless of in-degree; seed the
        // queue with Start, then any other zero-in-degree node.
        let mut queue: VecDeque<&str> = VecDeque::new();
        queue.push_back(self.start.id.as_str());
        let mut queued: HashSet<&str> = HashSet::new();
        queued.insert(self.start.id.as_str());

        for id in &all_ids {
            let id = id.as_str();
            if id != self.start.id && in_degree.get(id).copied().unwrap_or(0) == 0 && !queued.contains(id)
            {
                queue.push_back(id);
                queued.insert(id);
            }
        }

        let mut order: Vec<String> = Vec::with_capacity(all_ids.len());
        let mut remaining_in_degree = in_degree.clone();
        while let Some(id) = queue.pop_front() {
            order.push(id.to_string());
            if let Some(neighbors) = adjacency.get(id) {
                for &next in neighbors {
                    if let Some(deg) = remaining_in_degree.get_mut(next) {
                        *deg = deg.saturating_sub(1);
                        if *deg == 0 && !queued.contains(next) {
                            queue.push_back(next);
                            queued.insert(next);
                        }
                    }
                }
            }
        }

        if order.len() != all_ids.len() {
            return Err(GraphError::Cyclic);
        }

        // Ensure End sorts last even if it had no outgoing edges to force it.
        order.retain(|id| id != &self.end.id);
        order.push(self.end.id.clone());

        Ok(order)
    }

    pub fn get_upstream_nodes(&self, node_id: &str) -> Vec<StarNode> {
        self.non_loop_edges()
            .filter(|e| e.target == node_id)
            .filter_map(|e| self.nodes.iter().find(|n| n.id == e.source).cloned())
            .collect()
    }

    pub fn get_downstream_nodes(&self, node_id: &str) -> Vec<StarNode> {
        self.non_loop_edges()
            .filter(|e| e.source == node_id)
            .filter_map(|e| self.nodes.iter().find(|n| n.id == e.target).cloned())
            .collect()
    }

    /// Ordered display names of StarNodes only (Start/End excluded),
    /// mirroring `_get_node_names` in the original runner.
    pub fn node_names(&self) -> Vec<String> {
        self.nodes
            .iter()
            .map(|n| n.display_name.clone().unwrap_or_else(|| n.id.clone()))
            .collect()
    }

    /// The outgoing edge whose condition contains `loop`, if any.
    pub fn loop_edge_from(&self, node_id: &str) -> Option<&Edge> {
        self.edges
            .iter()
            .find(|e| e.source == node_id && e.is_loop_edge())
    }
}
