//! Condition-driven routing: `if` picks a branch, `filter` drops payloads.

use futures::future::BoxFuture;
use serde::Deserialize;

use stepwise_core::{
    outputs_on, Component, ExecutionContext, ExecutionStateContext, ExpressionEngine, Outputs,
    Result, StepError, DEFAULT_CHANNEL,
};

pub const TRUE_CHANNEL: &str = "true";
pub const FALSE_CHANNEL: &str = "false";

#[derive(Debug, Clone, Deserialize)]
pub struct ConditionConfig {
    pub expression: String,
}

fn parse_condition(
    component: &str,
    expressions: &ExpressionEngine,
    configuration: &serde_json::Value,
) -> Result<ConditionConfig> {
    let config: ConditionConfig = serde_json::from_value(configuration.clone()).map_err(|e| {
        StepError::Config(format!("invalid {} configuration: {}", component, e))
    })?;
    expressions.validate(&config.expression)?;
    Ok(config)
}

pub struct If {
    expressions: ExpressionEngine,
}

impl If {
    pub fn new() -> Self {
        Self {
            expressions: ExpressionEngine::new(),
        }
    }
}

impl Default for If {
    fn default() -> Self {
        Self::new()
    }
}

impl Component for If {
    fn name(&self) -> &'static str {
        "if"
    }

    fn setup(&self, configuration: &serde_json::Value) -> Result<()> {
        parse_condition(self.name(), &self.expressions, configuration).map(|_| ())
    }

    fn execute<'a>(&'a self, ctx: &'a mut ExecutionContext) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let config: ConditionConfig = ctx.config()?;
            let input = ctx.input().clone();
            let branch = if self.expressions.eval_bool(&config.expression, &input)? {
                TRUE_CHANNEL
            } else {
                FALSE_CHANNEL
            };
            ctx.finish(outputs_on(branch, vec![input]))
        })
    }
}

pub struct Filter {
    expressions: ExpressionEngine,
}

impl Filter {
    pub fn new() -> Self {
        Self {
            expressions: ExpressionEngine::new(),
        }
    }
}

impl Default for Filter {
    fn default() -> Self {
        Self::new()
    }
}

impl Component for Filter {
    fn name(&self) -> &'static str {
        "filter"
    }

    fn setup(&self, configuration: &serde_json::Value) -> Result<()> {
        parse_condition(self.name(), &self.expressions, configuration).map(|_| ())
    }

    fn execute<'a>(&'a self, ctx: &'a mut ExecutionContext) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let config: ConditionConfig = ctx.config()?;
            let input = ctx.input().clone();
            if self.expressions.eval_bool(&config.expression, &input)? {
                ctx.pass(outputs_on(DEFAULT_CHANNEL, vec![input]))
            } else {
                ctx.pass(Outputs::new())
            }
        })
    }
}
