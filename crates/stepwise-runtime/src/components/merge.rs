use std::time::Duration;

use futures::future::BoxFuture;
use serde::Deserialize;

use stepwise_core::fan_in::FanInPolicy;
use stepwise_core::{
    outputs_on, ActionCall, ActionDefinition, Component, ExecutionContext, ExecutionStateContext,
    ExpressionEngine, FanInState, MetadataContext, QueueItem, RequestContext, Result, StepError,
    DEFAULT_CHANNEL,
};

pub const TIMEOUT_ACTION: &str = "timeoutReached";
pub const STOPPED_CHANNEL: &str = "stopped";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TimeoutPolicy {
    #[default]
    AcceptPartial,
    Fail,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeConfig {
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
    #[serde(default)]
    pub timeout_policy: TimeoutPolicy,
    /// Finishes on `stopped` as soon as one input matches.
    #[serde(default)]
    pub stop_if: Option<String>,
}

/// Waits for one input per incoming edge of the current root event, then
/// passes them on as one array in edge order.
pub struct Merge {
    expressions: ExpressionEngine,
}

impl Merge {
    pub fn new() -> Self {
        Self {
            expressions: ExpressionEngine::new(),
        }
    }
}

impl Default for Merge {
    fn default() -> Self {
        Self::new()
    }
}

impl FanInPolicy for Merge {
    fn begin(&self, ctx: &mut ExecutionContext) -> Result<()> {
        let config: MergeConfig = ctx.config()?;
        if let Some(seconds) = config.timeout_seconds {
            ctx.schedule_action_call(
                TIMEOUT_ACTION,
                serde_json::json!({}),
                Duration::from_secs(seconds),
            )?;
        }
        Ok(())
    }

    fn on_observe(&self, item: &QueueItem, ctx: &mut ExecutionContext) -> Result<()> {
        let config: MergeConfig = ctx.config()?;
        let Some(stop_if) = config.stop_if else {
            return Ok(());
        };

        if self.expressions.eval_bool(&stop_if, &item.data)? {
            tracing::debug!(
                node_id = %item.node_id,
                source_node_id = %item.source_node_id,
                "Merge stopped by input"
            );
            ctx.finish(outputs_on(STOPPED_CHANNEL, vec![item.data.clone()]))?;
        }
        Ok(())
    }
}

impl Component for Merge {
    fn name(&self) -> &'static str {
        "merge"
    }

    fn setup(&self, configuration: &serde_json::Value) -> Result<()> {
        let config: MergeConfig = serde_json::from_value(configuration.clone())
            .map_err(|e| StepError::Config(format!("invalid merge configuration: {}", e)))?;
        if config.timeout_seconds == Some(0) {
            return Err(StepError::Config(
                "merge timeoutSeconds must be greater than zero".into(),
            ));
        }
        if let Some(stop_if) = &config.stop_if {
            self.expressions.validate(stop_if)?;
        }
        Ok(())
    }

    fn execute<'a>(&'a self, ctx: &'a mut ExecutionContext) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let aggregate = ctx.input().clone();
            ctx.pass(outputs_on(DEFAULT_CHANNEL, vec![aggregate]))
        })
    }

    fn actions(&self) -> Vec<ActionDefinition> {
        vec![ActionDefinition::internal(TIMEOUT_ACTION)]
    }

    fn handle_action<'a>(
        &'a self,
        call: &'a ActionCall,
        ctx: &'a mut ExecutionContext,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            if call.name != TIMEOUT_ACTION {
                return Err(StepError::UnknownAction(call.name.clone()));
            }
            if ctx.is_finished() {
                return Ok(());
            }

            let config: MergeConfig = ctx.config()?;
            let state: FanInState = ctx.load()?;

            match config.timeout_policy {
                TimeoutPolicy::AcceptPartial => {
                    tracing::debug!(
                        execution_id = %ctx.execution_id(),
                        missing = ?state.missing(),
                        "Merge timed out, passing partial inputs"
                    );
                    let aggregate = self.aggregate(&state.expected, &state.observed);
                    ctx.set_input(aggregate.clone());
                    ctx.pass(outputs_on(DEFAULT_CHANNEL, vec![aggregate]))
                }
                TimeoutPolicy::Fail => {
                    let missing = state.missing().join(", ");
                    ctx.fail("timeout", &format!("timed out waiting for {}", missing))
                }
            }
        })
    }

    fn fan_in(&self) -> Option<&dyn FanInPolicy> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use stepwise_core::fan_in::IncomingEdge;
    use stepwise_core::testing::TestContext;
    use stepwise_core::{assert_failed, assert_passed, ActionOrigin, ExecutionState};

    fn timeout_call() -> ActionCall {
        ActionCall::new(TIMEOUT_ACTION, json!({}), ActionOrigin::Timer)
    }

    fn partial_state() -> FanInState {
        let merge = Merge::new();
        let expected = merge.expected(&[
            IncomingEdge::new("a", "default"),
            IncomingEdge::new("b", "default"),
        ]);
        let mut state = FanInState::new("root", expected);
        let (key, value) = merge.observe("b", "default", &json!({"from": "b"}));
        state.record(key, value);
        state
    }

    #[test]
    fn test_setup_validation() {
        let merge = Merge::new();
        assert!(merge.setup(&json!({})).is_ok());
        assert!(merge
            .setup(&json!({"timeoutSeconds": 30, "timeoutPolicy": "fail"}))
            .is_ok());
        assert!(merge.setup(&json!({"timeoutSeconds": 0})).is_err());
        assert!(merge.setup(&json!({"timeoutPolicy": "retry"})).is_err());
        assert!(merge.setup(&json!({"stopIf": "status =="})).is_err());
    }

    #[tokio::test]
    async fn test_execute_passes_aggregate() {
        let merge = Merge::new();
        let mut ctx = TestContext::builder("join")
            .with_payload(json!([1, 2]))
            .build();

        merge.execute(&mut ctx).await.unwrap();
        assert_passed!(ctx);
        assert_eq!(ctx.execution().outputs[DEFAULT_CHANNEL], vec![json!([1, 2])]);
    }

    #[test]
    fn test_begin_schedules_timeout() {
        let merge = Merge::new();
        let mut ctx = TestContext::builder("join")
            .with_configuration(json!({"timeoutSeconds": 60}))
            .build();

        merge.begin(&mut ctx).unwrap();
        assert_eq!(ctx.scheduled().len(), 1);
        assert_eq!(ctx.scheduled()[0].action, TIMEOUT_ACTION);

        let mut untimed = TestContext::builder("join").build();
        merge.begin(&mut untimed).unwrap();
        assert!(untimed.scheduled().is_empty());
    }

    #[tokio::test]
    async fn test_timeout_accepts_partial() {
        let merge = Merge::new();
        let mut ctx = TestContext::builder("join")
            .with_configuration(json!({"timeoutSeconds": 60}))
            .build();
        ctx.store(&partial_state()).unwrap();

        merge.handle_action(&timeout_call(), &mut ctx).await.unwrap();
        assert_passed!(ctx);
        assert_eq!(
            ctx.execution().outputs[DEFAULT_CHANNEL],
            vec![json!([{"from": "b"}])]
        );
    }

    #[tokio::test]
    async fn test_timeout_fail_policy() {
        let merge = Merge::new();
        let mut ctx = TestContext::builder("join")
            .with_configuration(json!({"timeoutSeconds": 60, "timeoutPolicy": "fail"}))
            .build();
        ctx.store(&partial_state()).unwrap();

        merge.handle_action(&timeout_call(), &mut ctx).await.unwrap();
        assert_failed!(ctx, "timeout");
    }

    #[tokio::test]
    async fn test_late_timeout_is_noop() {
        let merge = Merge::new();
        let mut ctx = TestContext::builder("join").build();
        ctx.pass(outputs_on(DEFAULT_CHANNEL, vec![json!([])])).unwrap();

        merge.handle_action(&timeout_call(), &mut ctx).await.unwrap();
        assert_eq!(ctx.execution().state, ExecutionState::Finished);
        assert!(ctx.execution().passed());
    }

    #[test]
    fn test_stop_if_finishes_on_stopped() {
        let merge = Merge::new();
        let mut ctx = TestContext::builder("join")
            .with_configuration(json!({"stopIf": "status == 'failed'"}))
            .build();

        let ok = QueueItem::new("wf", "join", "a", "default", uuid::Uuid::new_v4(), json!({"status": "passed"}));
        merge.on_observe(&ok, &mut ctx).unwrap();
        assert!(!ctx.is_finished());

        let failed = QueueItem::new("wf", "join", "b", "default", uuid::Uuid::new_v4(), json!({"status": "failed"}));
        merge.on_observe(&failed, &mut ctx).unwrap();
        assert!(ctx.is_finished());
        assert!(ctx.execution().outputs.contains_key(STOPPED_CHANNEL));
    }
}
