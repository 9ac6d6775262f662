use serde::Deserialize;

use stepwise_core::{ExpressionEngine, Result, StepError, Trigger};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StartConfig {
    /// Events for which this evaluates falsy are dropped.
    #[serde(default)]
    pub filter: Option<String>,
}

/// Manual trigger: every accepted event starts a new wave.
pub struct Start {
    expressions: ExpressionEngine,
}

impl Start {
    pub fn new() -> Self {
        Self {
            expressions: ExpressionEngine::new(),
        }
    }

    fn config(configuration: &serde_json::Value) -> Result<StartConfig> {
        serde_json::from_value(configuration.clone())
            .map_err(|e| StepError::Config(format!("invalid start configuration: {}", e)))
    }
}

impl Default for Start {
    fn default() -> Self {
        Self::new()
    }
}

impl Trigger for Start {
    fn name(&self) -> &'static str {
        "start"
    }

    fn setup(&self, configuration: &serde_json::Value) -> Result<()> {
        if let Some(filter) = Self::config(configuration)?.filter {
            self.expressions.validate(&filter)?;
        }
        Ok(())
    }

    fn accept(
        &self,
        configuration: &serde_json::Value,
        event: &serde_json::Value,
    ) -> Result<Option<serde_json::Value>> {
        let config = Self::config(configuration)?;
        match config.filter {
            Some(filter) if !self.expressions.eval_bool(&filter, event)? => Ok(None),
            _ => Ok(Some(event.clone())),
        }
    }
}
