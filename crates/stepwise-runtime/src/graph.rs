use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use stepwise_core::fan_in::IncomingEdge;
use stepwise_core::{Result, StepError, DEFAULT_CHANNEL};

use crate::registry::Registry;

/// Whether a node starts waves or processes them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Trigger,
    Component,
}

/// A node in a workflow graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSpec {
    pub id: String,
    pub kind: NodeKind,
    /// Registered component or trigger name.
    #[serde(rename = "ref")]
    pub reference: String,
    #[serde(default = "empty_configuration")]
    pub configuration: serde_json::Value,
}

impl NodeSpec {
    pub fn component(
        id: impl Into<String>,
        reference: impl Into<String>,
        configuration: serde_json::Value,
    ) -> Self {
        Self {
            id: id.into(),
            kind: NodeKind::Component,
            reference: reference.into(),
            configuration,
        }
    }

    pub fn trigger(
        id: impl Into<String>,
        reference: impl Into<String>,
        configuration: serde_json::Value,
    ) -> Self {
        Self {
            id: id.into(),
            kind: NodeKind::Trigger,
            reference: reference.into(),
            configuration,
        }
    }
}

fn empty_configuration() -> serde_json::Value {
    serde_json::json!({})
}

fn default_channel() -> String {
    DEFAULT_CHANNEL.to_string()
}

/// A directed edge carrying one output channel of its source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    pub source_id: String,
    #[serde(default = "default_channel")]
    pub channel: String,
    pub target_id: String,
}

impl Edge {
    pub fn new(source_id: impl Into<String>, target_id: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            channel: default_channel(),
            target_id: target_id.into(),
        }
    }

    pub fn on_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = channel.into();
        self
    }
}

/// A workflow: nodes plus the edges between them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowGraph {
    pub id: String,
    pub nodes: Vec<NodeSpec>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

impl WorkflowGraph {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            nodes: Vec::new(),
            edges: Vec::new(),
        }
    }

    pub fn with_node(mut self, node: NodeSpec) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn with_edge(mut self, edge: Edge) -> Self {
        self.edges.push(edge);
        self
    }

    pub fn node(&self, id: &str) -> Option<&NodeSpec> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn require_node(&self, id: &str) -> Result<&NodeSpec> {
        self.node(id).ok_or_else(|| {
            StepError::NotFound(format!("node '{}' in workflow '{}'", id, self.id))
        })
    }

    /// Distinct upstream node ids of `node_id`, in edge order.
    pub fn previous_nodes(&self, node_id: &str) -> Vec<String> {
        let mut nodes: Vec<String> = Vec::new();
        for edge in self.edges.iter().filter(|e| e.target_id == node_id) {
            if !nodes.contains(&edge.source_id) {
                nodes.push(edge.source_id.clone());
            }
        }
        nodes
    }

    pub fn incoming_edges(&self, node_id: &str) -> Vec<IncomingEdge> {
        self.edges
            .iter()
            .filter(|e| e.target_id == node_id)
            .map(|e| IncomingEdge::new(e.source_id.clone(), e.channel.clone()))
            .collect()
    }

    /// Edges leaving `node_id` on `channel`.
    pub fn outgoing<'a>(
        &'a self,
        node_id: &'a str,
        channel: &'a str,
    ) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges
            .iter()
            .filter(move |e| e.source_id == node_id && e.channel == channel)
    }

    /// Check structure and references against a registry.
    pub fn validate(&self, registry: &Registry) -> Result<()> {
        if self.id.is_empty() {
            return Err(StepError::Config("workflow id must not be empty".into()));
        }

        let mut seen = HashSet::new();
        for node in &self.nodes {
            if !seen.insert(node.id.as_str()) {
                return Err(StepError::Config(format!(
                    "duplicate node id '{}' in workflow '{}'",
                    node.id, self.id
                )));
            }

            let known = match node.kind {
                NodeKind::Component => registry.component(&node.reference).is_some(),
                NodeKind::Trigger => registry.trigger(&node.reference).is_some(),
            };
            if !known {
                return Err(StepError::Config(format!(
                    "node '{}' references unknown {:?} '{}'",
                    node.id, node.kind, node.reference
                )));
            }
        }

        for edge in &self.edges {
            if self.node(&edge.source_id).is_none() {
                return Err(StepError::Config(format!(
                    "edge source '{}' does not exist",
                    edge.source_id
                )));
            }
            match self.node(&edge.target_id) {
                None => {
                    return Err(StepError::Config(format!(
                        "edge target '{}' does not exist",
                        edge.target_id
                    )))
                }
                Some(target) if target.kind == NodeKind::Trigger => {
                    return Err(StepError::Config(format!(
                        "edge into trigger node '{}'",
                        target.id
                    )))
                }
                Some(_) => {}
            }
        }

        Ok(())
    }
}
