//! Per-root-event input collection for multi-input nodes.
//!
//! A component that returns a [`FanInPolicy`] from `Component::fan_in` has
//! its inputs collected by the engine: one collecting execution per
//! `(node, root event)`, fed through `observe` until `ready`, after which
//! `execute` runs once with the aggregate as input.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::context::ExecutionContext;
use crate::metadata::ComponentMetadata;
use crate::queue::QueueItem;
use crate::Result;

/// An edge feeding a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncomingEdge {
    pub source_node_id: String,
    pub channel: String,
}

impl IncomingEdge {
    pub fn new(source_node_id: impl Into<String>, channel: impl Into<String>) -> Self {
        Self {
            source_node_id: source_node_id.into(),
            channel: channel.into(),
        }
    }
}

/// Correlation key for an input arriving from `source` on `channel`.
pub fn edge_key(source: &str, channel: &str) -> String {
    format!("{}::{}", source, channel)
}

/// Collection state of a fan-in execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FanInState {
    /// Root event being collected.
    pub group_key: String,
    /// Keys that must be observed, in declared order.
    pub expected: Vec<String>,
    /// Observed values by key.
    pub observed: BTreeMap<String, serde_json::Value>,
}

impl ComponentMetadata for FanInState {
    const KIND: &'static str = "fanIn";
}

impl FanInState {
    pub fn new(group_key: impl Into<String>, expected: Vec<String>) -> Self {
        Self {
            group_key: group_key.into(),
            expected,
            observed: BTreeMap::new(),
        }
    }

    /// Record an observation. The first value seen for a key wins.
    pub fn record(&mut self, key: String, value: serde_json::Value) -> bool {
        if self.observed.contains_key(&key) {
            return false;
        }
        self.observed.insert(key, value);
        true
    }

    /// Expected keys not yet observed.
    pub fn missing(&self) -> Vec<&str> {
        self.expected
            .iter()
            .filter(|k| !self.observed.contains_key(*k))
            .map(String::as_str)
            .collect()
    }
}

/// Correlation primitives of a fan-in node.
pub trait FanInPolicy: Send + Sync {
    /// Keys that must be observed, one per incoming edge.
    fn expected(&self, edges: &[IncomingEdge]) -> Vec<String> {
        let mut keys: Vec<String> = Vec::with_capacity(edges.len());
        for edge in edges {
            let key = edge_key(&edge.source_node_id, &edge.channel);
            if !keys.contains(&key) {
                keys.push(key);
            }
        }
        keys
    }

    /// Map an input to its correlation key and stored value.
    fn observe(
        &self,
        source: &str,
        channel: &str,
        payload: &serde_json::Value,
    ) -> (String, serde_json::Value) {
        (edge_key(source, channel), payload.clone())
    }

    /// True iff every expected key has been observed.
    fn ready(&self, expected: &[String], observed: &BTreeMap<String, serde_json::Value>) -> bool {
        expected.iter().all(|k| observed.contains_key(k))
    }

    /// Observed values in `expected` order; missing keys are skipped.
    fn aggregate(
        &self,
        expected: &[String],
        observed: &BTreeMap<String, serde_json::Value>,
    ) -> serde_json::Value {
        serde_json::Value::Array(
            expected
                .iter()
                .filter_map(|k| observed.get(k).cloned())
                .collect(),
        )
    }

    /// Called once when the engine opens a collecting execution.
    fn begin(&self, _ctx: &mut ExecutionContext) -> Result<()> {
        Ok(())
    }

    /// Called after each observation; may finish the execution early.
    fn on_observe(&self, _item: &QueueItem, _ctx: &mut ExecutionContext) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct EdgePolicy;
    impl FanInPolicy for EdgePolicy {}

    fn edges() -> Vec<IncomingEdge> {
        vec![
            IncomingEdge::new("build", "default"),
            IncomingEdge::new("lint", "default"),
            IncomingEdge::new("test", "passed"),
        ]
    }

    #[test]
    fn test_expected_follows_edge_order() {
        let expected = EdgePolicy.expected(&edges());
        assert_eq!(
            expected,
            vec!["build::default", "lint::default", "test::passed"]
        );
    }

    #[test]
    fn test_aggregate_ignores_arrival_order() {
        let policy = EdgePolicy;
        let expected = policy.expected(&edges());
        let mut state = FanInState::new("root", expected.clone());

        for (source, channel, value) in [
            ("test", "passed", json!("t")),
            ("build", "default", json!("b")),
            ("lint", "default", json!("l")),
        ] {
            let (key, stored) = policy.observe(source, channel, &value);
            state.record(key, stored);
        }

        assert!(policy.ready(&expected, &state.observed));
        assert_eq!(
            policy.aggregate(&expected, &state.observed),
            json!(["b", "l", "t"])
        );
    }

    #[test]
    fn test_not_ready_until_all_observed() {
        let policy = EdgePolicy;
        let expected = policy.expected(&edges());
        let mut state = FanInState::new("root", expected.clone());
        state.record(edge_key("lint", "default"), json!(1));

        assert!(!policy.ready(&expected, &state.observed));
        assert_eq!(state.missing(), vec!["build::default", "test::passed"]);
        assert_eq!(policy.aggregate(&expected, &state.observed), json!([1]));
    }

    #[test]
    fn test_first_observation_wins() {
        let mut state = FanInState::new("root", vec!["a::default".into()]);
        assert!(state.record("a::default".into(), json!(1)));
        assert!(!state.record("a::default".into(), json!(2)));
        assert_eq!(state.observed["a::default"], json!(1));
    }
}
