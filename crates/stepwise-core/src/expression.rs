//! Expression evaluation for correlation fields and conditions.
//!
//! Expressions use minijinja's expression syntax and are evaluated against a
//! payload: its top-level keys are variables and the whole payload is bound
//! as `payload`.

use minijinja::{Environment, UndefinedBehavior, Value};

use crate::{Result, StepError};

/// Evaluates expressions against JSON payloads.
#[derive(Debug, Clone)]
pub struct ExpressionEngine {
    undefined: UndefinedBehavior,
}

impl Default for ExpressionEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ExpressionEngine {
    pub fn new() -> Self {
        Self {
            undefined: UndefinedBehavior::Strict,
        }
    }

    fn environment<'source>(&self) -> Environment<'source> {
        let mut env = Environment::new();
        env.set_undefined_behavior(self.undefined);
        env
    }

    /// Check that an expression compiles.
    pub fn validate(&self, expression: &str) -> Result<()> {
        let env = self.environment();
        env.compile_expression(expression)
            .map(|_| ())
            .map_err(|e| StepError::Expression(format!("invalid expression '{}': {}", expression, e)))
    }

    /// Evaluate an expression, rejecting undefined results.
    pub fn eval(&self, expression: &str, payload: &serde_json::Value) -> Result<Value> {
        let env = self.environment();
        let compiled = env
            .compile_expression(expression)
            .map_err(|e| StepError::Expression(format!("invalid expression '{}': {}", expression, e)))?;

        let value = compiled.eval(payload_context(payload)).map_err(|e| {
            StepError::Expression(format!("failed to evaluate '{}': {}", expression, e))
        })?;

        if value.is_undefined() {
            return Err(StepError::Expression(format!(
                "expression '{}' evaluated to undefined",
                expression
            )));
        }

        Ok(value)
    }

    /// Evaluate an expression that must produce a string.
    pub fn eval_string(&self, expression: &str, payload: &serde_json::Value) -> Result<String> {
        let value = self.eval(expression, payload)?;
        value.as_str().map(str::to_string).ok_or_else(|| {
            StepError::Expression(format!(
                "expression '{}' evaluated to {} instead of a string",
                expression,
                value.kind()
            ))
        })
    }

    /// Evaluate an expression as a condition.
    pub fn eval_bool(&self, expression: &str, payload: &serde_json::Value) -> Result<bool> {
        Ok(self.eval(expression, payload)?.is_true())
    }
}

fn payload_context(payload: &serde_json::Value) -> Value {
    let mut context = match payload {
        serde_json::Value::Object(map) => map.clone(),
        _ => serde_json::Map::new(),
    };
    context
        .entry("payload".to_string())
        .or_insert_with(|| payload.clone());
    Value::from_serialize(&context)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_eval_string_field() {
        let engine = ExpressionEngine::new();
        let payload = json!({"data": {"env": "prod"}});
        assert_eq!(engine.eval_string("data.env", &payload).unwrap(), "prod");
        assert_eq!(
            engine.eval_string("payload.data.env", &payload).unwrap(),
            "prod"
        );
    }

    #[test]
    fn test_non_string_is_rejected() {
        let engine = ExpressionEngine::new();
        let payload = json!({"count": 3});
        let err = engine.eval_string("count", &payload).unwrap_err();
        assert!(matches!(err, StepError::Expression(_)));
    }

    #[test]
    fn test_missing_field_is_rejected() {
        let engine = ExpressionEngine::new();
        let payload = json!({"data": {}});
        assert!(engine.eval_string("data.env", &payload).is_err());
        assert!(engine.eval_string("missing.env", &payload).is_err());
    }

    #[test]
    fn test_eval_bool() {
        let engine = ExpressionEngine::new();
        let payload = json!({"status": "passed", "retries": 2});
        assert!(engine.eval_bool("status == 'passed'", &payload).unwrap());
        assert!(!engine.eval_bool("retries > 5", &payload).unwrap());
    }

    #[test]
    fn test_invalid_syntax() {
        let engine = ExpressionEngine::new();
        assert!(engine.validate("data.").is_err());
        assert!(engine.validate("data.env == 'x'").is_ok());
    }
}
