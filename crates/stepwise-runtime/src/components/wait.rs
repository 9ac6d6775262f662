use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use stepwise_core::{
    outputs_on, ActionCall, ActionDefinition, Component, ComponentMetadata, ExecutionContext,
    ExecutionStateContext, MetadataContext, RequestContext, Result, StepError, DEFAULT_CHANNEL,
};

pub const TIME_REACHED_ACTION: &str = "timeReached";
pub const PUSH_THROUGH_ACTION: &str = "pushThrough";

#[derive(Debug, Clone, Deserialize)]
pub struct WaitConfig {
    pub seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitMetadata {
    pub fire_at: DateTime<Utc>,
}

impl ComponentMetadata for WaitMetadata {
    const KIND: &'static str = "wait";
}

/// Delays a payload by a fixed number of seconds.
pub struct Wait;

fn pass_input(ctx: &mut ExecutionContext) -> Result<()> {
    let input = ctx.input().clone();
    ctx.pass(outputs_on(DEFAULT_CHANNEL, vec![input]))
}

impl Component for Wait {
    fn name(&self) -> &'static str {
        "wait"
    }

    fn setup(&self, configuration: &serde_json::Value) -> Result<()> {
        serde_json::from_value::<WaitConfig>(configuration.clone())
            .map(|_| ())
            .map_err(|e| StepError::Config(format!("invalid wait configuration: {}", e)))
    }

    fn execute<'a>(&'a self, ctx: &'a mut ExecutionContext) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            if ctx.load_optional::<WaitMetadata>()?.is_some() {
                return ctx.wait();
            }

            let config: WaitConfig = ctx.config()?;
            if config.seconds == 0 {
                return pass_input(ctx);
            }

            let delay = Duration::from_secs(config.seconds);
            ctx.schedule_action_call(TIME_REACHED_ACTION, serde_json::json!({}), delay)?;
            let fire_at = ctx
                .scheduled()
                .last()
                .map(|c| c.run_at)
                .unwrap_or_else(|| ctx.now());
            ctx.store(&WaitMetadata { fire_at })?;
            ctx.wait()
        })
    }

    fn actions(&self) -> Vec<ActionDefinition> {
        vec![
            ActionDefinition::internal(TIME_REACHED_ACTION),
            ActionDefinition::user(PUSH_THROUGH_ACTION),
        ]
    }

    fn handle_action<'a>(
        &'a self,
        call: &'a ActionCall,
        ctx: &'a mut ExecutionContext,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            match call.name.as_str() {
                TIME_REACHED_ACTION => {
                    if ctx.is_finished() {
                        return Ok(());
                    }
                    ctx.load::<WaitMetadata>()?;
                    pass_input(ctx)
                }
                PUSH_THROUGH_ACTION => pass_input(ctx),
                other => Err(StepError::UnknownAction(other.to_string())),
            }
        })
    }
}
