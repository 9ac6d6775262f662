use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use stepwise_core::{
    outputs_on, ActionCall, ActionDefinition, Component, ComponentMetadata, ExecutionContext,
    ExecutionStateContext, MetadataContext, ParameterDef, Result, StepError, DEFAULT_CHANNEL,
};

pub const APPROVE_ACTION: &str = "approve";
pub const REJECT_ACTION: &str = "reject";

#[derive(Debug, Clone, Deserialize)]
pub struct ApprovalConfig {
    pub count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    pub approved_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalMetadata {
    pub required_count: u32,
    pub approvals: Vec<ApprovalRecord>,
}

impl ComponentMetadata for ApprovalMetadata {
    const KIND: &'static str = "approval";
}

impl ApprovalMetadata {
    fn has_approved(&self, actor: &str) -> bool {
        self.approvals
            .iter()
            .any(|r| r.actor.as_deref() == Some(actor))
    }

    fn quorum_reached(&self) -> bool {
        self.approvals.len() >= self.required_count as usize
    }
}

/// Waits for `count` approvals. A single rejection fails the execution.
pub struct Approval;

impl Approval {
    fn approve(&self, call: &ActionCall, ctx: &mut ExecutionContext) -> Result<()> {
        let mut metadata: ApprovalMetadata = ctx.load()?;
        let actor = call.param_str("actor").map(str::to_string);

        if let Some(actor) = &actor {
            if metadata.has_approved(actor) {
                tracing::debug!(
                    execution_id = %ctx.execution_id(),
                    actor = %actor,
                    "Ignoring repeated approval"
                );
                return Ok(());
            }
        }

        metadata.approvals.push(ApprovalRecord {
            actor,
            comment: call.param_str("comment").map(str::to_string),
            approved_at: ctx.now(),
        });

        if metadata.quorum_reached() {
            let payload = serde_json::json!({ "approvals": metadata.approvals });
            ctx.store(&metadata)?;
            return ctx.finish(outputs_on(DEFAULT_CHANNEL, vec![payload]));
        }

        ctx.store(&metadata)
    }

    fn reject(&self, call: &ActionCall, ctx: &mut ExecutionContext) -> Result<()> {
        let reason = call
            .param_str("reason")
            .filter(|r| !r.trim().is_empty())
            .ok_or_else(|| StepError::InvalidArgument("reject requires a reason".into()))?;

        // Still a loud error when the metadata is gone.
        let _: ApprovalMetadata = ctx.load()?;
        ctx.fail("rejected", reason)
    }
}

impl Component for Approval {
    fn name(&self) -> &'static str {
        "approval"
    }

    fn setup(&self, configuration: &serde_json::Value) -> Result<()> {
        let config: ApprovalConfig = serde_json::from_value(configuration.clone())
            .map_err(|e| StepError::Config(format!("invalid approval configuration: {}", e)))?;
        if config.count < 1 {
            return Err(StepError::Config(
                "approval count must be at least 1".into(),
            ));
        }
        Ok(())
    }

    fn execute<'a>(&'a self, ctx: &'a mut ExecutionContext) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            if ctx.load_optional::<ApprovalMetadata>()?.is_none() {
                let config: ApprovalConfig = ctx.config()?;
                ctx.store(&ApprovalMetadata {
                    required_count: config.count,
                    approvals: Vec::new(),
                })?;
            }
            ctx.wait()
        })
    }

    fn actions(&self) -> Vec<ActionDefinition> {
        vec![
            ActionDefinition::user(APPROVE_ACTION)
                .with_parameter(ParameterDef::optional("comment", "Note left with the approval"))
                .with_parameter(ParameterDef::optional("actor", "Who approved")),
            ActionDefinition::user(REJECT_ACTION)
                .with_parameter(ParameterDef::required("reason", "Why the change was rejected"))
                .with_parameter(ParameterDef::optional("actor", "Who rejected")),
        ]
    }

    fn handle_action<'a>(
        &'a self,
        call: &'a ActionCall,
        ctx: &'a mut ExecutionContext,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            if ctx.is_finished() {
                return Err(StepError::AlreadyFinished);
            }
            match call.name.as_str() {
                APPROVE_ACTION => self.approve(call, ctx),
                REJECT_ACTION => self.reject(call, ctx),
                other => Err(StepError::UnknownAction(other.to_string())),
            }
        })
    }
}
