use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::context::ExecutionContext;
use crate::fan_in::FanInPolicy;
use crate::{Result, StepError};

/// A parameter accepted by an action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterDef {
    pub name: String,
    pub required: bool,
    pub description: String,
}

impl ParameterDef {
    pub fn required(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required: true,
            description: description.into(),
        }
    }

    pub fn optional(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required: false,
            description: description.into(),
        }
    }
}

/// An action a component can handle after its initial execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionDefinition {
    pub name: String,
    /// Whether users (API, webhooks) may invoke the action, as opposed to
    /// timers and subscriptions only.
    pub user_accessible: bool,
    pub parameters: Vec<ParameterDef>,
}

impl ActionDefinition {
    /// An action only invoked by timers or subscriptions.
    pub fn internal(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            user_accessible: false,
            parameters: Vec::new(),
        }
    }

    /// An action users may invoke.
    pub fn user(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            user_accessible: true,
            parameters: Vec::new(),
        }
    }

    pub fn with_parameter(mut self, parameter: ParameterDef) -> Self {
        self.parameters.push(parameter);
        self
    }

    /// Check that every required parameter is present and non-null.
    pub fn validate_parameters(&self, parameters: &serde_json::Value) -> Result<()> {
        for p in self.parameters.iter().filter(|p| p.required) {
            let present = parameters
                .get(&p.name)
                .map(|v| !v.is_null())
                .unwrap_or(false);
            if !present {
                return Err(StepError::InvalidArgument(format!(
                    "action '{}' requires parameter '{}'",
                    self.name, p.name
                )));
            }
        }
        Ok(())
    }
}

/// Where an action invocation came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionOrigin {
    /// A scheduled action call fired.
    Timer,
    /// A subscribed event arrived.
    Subscription,
    /// A user or webhook invoked the action.
    User,
}

/// One invocation of a named action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionCall {
    pub name: String,
    pub parameters: serde_json::Value,
    pub origin: ActionOrigin,
}

impl ActionCall {
    pub fn new(
        name: impl Into<String>,
        parameters: serde_json::Value,
        origin: ActionOrigin,
    ) -> Self {
        Self {
            name: name.into(),
            parameters,
            origin,
        }
    }

    /// String parameter, if present.
    pub fn param_str(&self, name: &str) -> Option<&str> {
        self.parameters.get(name).and_then(|v| v.as_str())
    }
}

/// A workflow step implementation, selected by name from the registry.
pub trait Component: Send + Sync + 'static {
    /// Registry name.
    fn name(&self) -> &'static str;

    /// Validate a node configuration before the workflow runs.
    fn setup(&self, _configuration: &serde_json::Value) -> Result<()> {
        Ok(())
    }

    /// Run the node for its triggering input.
    fn execute<'a>(&'a self, ctx: &'a mut ExecutionContext) -> BoxFuture<'a, Result<()>>;

    /// Actions the component handles after `execute`.
    fn actions(&self) -> Vec<ActionDefinition> {
        Vec::new()
    }

    /// Handle a timer, subscription or user action.
    fn handle_action<'a>(
        &'a self,
        call: &'a ActionCall,
        _ctx: &'a mut ExecutionContext,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move { Err(StepError::UnknownAction(call.name.clone())) })
    }

    /// Fan-in policy, for components that want their inputs collected per
    /// root event before `execute` runs.
    fn fan_in(&self) -> Option<&dyn FanInPolicy> {
        None
    }

    /// Look up a declared action.
    fn action(&self, name: &str) -> Option<ActionDefinition> {
        self.actions().into_iter().find(|a| a.name == name)
    }
}

/// An entry point that turns external events into a root event.
pub trait Trigger: Send + Sync + 'static {
    /// Registry name.
    fn name(&self) -> &'static str;

    /// Validate a trigger node configuration.
    fn setup(&self, _configuration: &serde_json::Value) -> Result<()> {
        Ok(())
    }

    /// Decide whether an event starts a run, returning the payload to emit.
    fn accept(
        &self,
        configuration: &serde_json::Value,
        event: &serde_json::Value,
    ) -> Result<Option<serde_json::Value>>;
}
