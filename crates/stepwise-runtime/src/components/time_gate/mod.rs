//! Hold payloads until a daily time window allows them through.

mod window;

pub use window::{GateMode, TimeWindow};

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use stepwise_core::{
    outputs_on, ActionCall, ActionDefinition, Component, ComponentMetadata, ExecutionContext,
    ExecutionStateContext, MetadataContext, RequestContext, Result, StepError, DEFAULT_CHANNEL,
};

pub const TIME_REACHED_ACTION: &str = "timeReached";
pub const PUSH_THROUGH_ACTION: &str = "pushThrough";

/// Reschedules closer than this to the pending boundary are skipped.
const RESCHEDULE_TOLERANCE_MS: i64 = 1000;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeGateConfig {
    pub mode: GateMode,
    pub start_time: String,
    pub end_time: String,
    pub days: Vec<String>,
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

impl TimeGateConfig {
    pub fn window(&self) -> Result<TimeWindow> {
        let days = self
            .days
            .iter()
            .map(|d| window::parse_day(d))
            .collect::<Result<Vec<_>>>()?;
        TimeWindow::new(
            window::parse_time(&self.start_time)?,
            window::parse_time(&self.end_time)?,
            days,
            window::parse_timezone(&self.timezone)?,
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeGateMetadata {
    pub next_valid_time: Option<DateTime<Utc>>,
}

impl ComponentMetadata for TimeGateMetadata {
    const KIND: &'static str = "timeGate";
}

pub struct TimeGate;

impl TimeGate {
    /// Pass now, or arm a timer for the next boundary.
    fn evaluate(&self, ctx: &mut ExecutionContext, mut metadata: TimeGateMetadata) -> Result<()> {
        let config: TimeGateConfig = ctx.config()?;
        let window = config.window()?;
        let now = ctx.now();
        let boundary = window.next_boundary(config.mode, now)?;

        if boundary <= now {
            return pass_input(ctx);
        }

        if let Some(scheduled) = metadata.next_valid_time {
            if (boundary - scheduled).num_milliseconds().abs() < RESCHEDULE_TOLERANCE_MS {
                return ctx.wait();
            }
        }

        let delay = (boundary - now)
            .to_std()
            .map_err(|e| StepError::Internal(format!("negative gate delay: {}", e)))?;
        ctx.schedule_action_call(TIME_REACHED_ACTION, serde_json::json!({}), delay)?;

        metadata.next_valid_time = Some(boundary);
        ctx.store(&metadata)?;
        ctx.wait()
    }
}

fn pass_input(ctx: &mut ExecutionContext) -> Result<()> {
    let input = ctx.input().clone();
    ctx.pass(outputs_on(DEFAULT_CHANNEL, vec![input]))
}

impl Component for TimeGate {
    fn name(&self) -> &'static str {
        "timeGate"
    }

    fn setup(&self, configuration: &serde_json::Value) -> Result<()> {
        let config: TimeGateConfig = serde_json::from_value(configuration.clone())
            .map_err(|e| StepError::Config(format!("invalid timeGate configuration: {}", e)))?;
        config.window().map(|_| ())
    }

    fn execute<'a>(&'a self, ctx: &'a mut ExecutionContext) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let metadata = ctx.load_optional::<TimeGateMetadata>()?.unwrap_or_default();
            self.evaluate(ctx, metadata)
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
                    let mut metadata: TimeGateMetadata = ctx.load()?;
                    // A timer superseded by a later boundary leaves that one armed.
                    if metadata.next_valid_time.is_some_and(|t| t <= ctx.now()) {
                        metadata.next_valid_time = None;
                    }
                    self.evaluate(ctx, metadata)
                }
                PUSH_THROUGH_ACTION => pass_input(ctx),
                other => Err(StepError::UnknownAction(other.to_string())),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use stepwise_core::testing::TestContext;
    use stepwise_core::{assert_err_variant, assert_passed, assert_waiting, ActionOrigin};

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn monday_hours() -> serde_json::Value {
        json!({
            "mode": "include",
            "startTime": "09:00",
            "endTime": "17:00",
            "days": ["monday"]
        })
    }

    #[test]
    fn test_setup_validation() {
        assert!(TimeGate.setup(&monday_hours()).is_ok());
        assert!(TimeGate
            .setup(&json!({"mode": "include", "startTime": "09:00", "endTime": "09:00", "days": ["monday"]}))
            .is_err());
        assert!(TimeGate
            .setup(&json!({"mode": "include", "startTime": "09:00", "endTime": "17:00", "days": []}))
            .is_err());
        assert!(TimeGate
            .setup(&json!({"mode": "sometimes", "startTime": "09:00", "endTime": "17:00", "days": ["monday"]}))
            .is_err());
    }

    #[tokio::test]
    async fn test_tuesday_schedules_next_monday() {
        let now = utc("2024-01-02T10:00:00Z");
        let mut ctx = TestContext::builder("gate")
            .with_configuration(monday_hours())
            .with_now(now)
            .build();

        TimeGate.execute(&mut ctx).await.unwrap();
        assert_waiting!(ctx);
        assert_eq!(ctx.scheduled().len(), 1);
        assert_eq!(ctx.scheduled()[0].run_at, utc("2024-01-08T09:00:00Z"));

        let metadata: TimeGateMetadata = ctx.load().unwrap();
        assert_eq!(metadata.next_valid_time, Some(utc("2024-01-08T09:00:00Z")));
    }

    #[tokio::test]
    async fn test_inside_window_passes_immediately() {
        let mut ctx = TestContext::builder("gate")
            .with_configuration(monday_hours())
            .with_payload(json!({"sha": "abc"}))
            .with_now(utc("2024-01-08T09:30:00Z"))
            .build();

        TimeGate.execute(&mut ctx).await.unwrap();
        assert_passed!(ctx);
        assert!(ctx.scheduled().is_empty());
        assert_eq!(
            ctx.execution().outputs[DEFAULT_CHANNEL],
            vec![json!({"sha": "abc"})]
        );
    }

    #[tokio::test]
    async fn test_unchanged_reevaluation_does_not_reschedule() {
        let now = utc("2024-01-02T10:00:00Z");
        let mut first = TestContext::builder("gate")
            .with_configuration(monday_hours())
            .with_now(now)
            .build();
        TimeGate.execute(&mut first).await.unwrap();
        let metadata = first.execution().metadata.clone().unwrap();

        let mut second = TestContext::builder("gate")
            .with_configuration(monday_hours())
            .with_metadata(metadata)
            .with_now(now + chrono::Duration::milliseconds(500))
            .build();
        TimeGate.execute(&mut second).await.unwrap();

        assert_waiting!(second);
        assert!(second.scheduled().is_empty());
    }

    #[tokio::test]
    async fn test_changed_window_reschedules() {
        let now = utc("2024-01-02T10:00:00Z");
        let mut first = TestContext::builder("gate")
            .with_configuration(monday_hours())
            .with_now(now)
            .build();
        TimeGate.execute(&mut first).await.unwrap();

        let mut second = TestContext::builder("gate")
            .with_configuration(json!({
                "mode": "include",
                "startTime": "08:00",
                "endTime": "17:00",
                "days": ["monday"]
            }))
            .with_metadata(first.execution().metadata.clone().unwrap())
            .with_now(now)
            .build();
        TimeGate.execute(&mut second).await.unwrap();

        assert_eq!(second.scheduled().len(), 1);
        assert_eq!(second.scheduled()[0].run_at, utc("2024-01-08T08:00:00Z"));
    }

    #[tokio::test]
    async fn test_time_reached_passes_at_boundary() {
        let boundary = utc("2024-01-08T09:00:00Z");
        let mut ctx = TestContext::builder("gate")
            .with_configuration(monday_hours())
            .with_metadata(json!({
                "kind": "timeGate",
                "version": 1,
                "data": {"nextValidTime": "2024-01-08T09:00:00Z"}
            }))
            .with_now(boundary)
            .build();

        let call = ActionCall::new(TIME_REACHED_ACTION, json!({}), ActionOrigin::Timer);
        TimeGate.handle_action(&call, &mut ctx).await.unwrap();
        assert_passed!(ctx);
    }

    #[tokio::test]
    async fn test_superseded_timer_keeps_pending_boundary() {
        // Armed for Tuesday 09:00, then moved to Monday after a window change.
        let mut ctx = TestContext::builder("gate")
            .with_configuration(monday_hours())
            .with_metadata(json!({
                "kind": "timeGate",
                "version": 1,
                "data": {"nextValidTime": "2024-01-08T09:00:00Z"}
            }))
            .with_now(utc("2024-01-02T09:00:00Z"))
            .build();

        let call = ActionCall::new(TIME_REACHED_ACTION, json!({}), ActionOrigin::Timer);
        TimeGate.handle_action(&call, &mut ctx).await.unwrap();

        assert_waiting!(ctx);
        assert!(ctx.scheduled().is_empty());
        let metadata: TimeGateMetadata = ctx.load().unwrap();
        assert_eq!(metadata.next_valid_time, Some(utc("2024-01-08T09:00:00Z")));
    }

    #[tokio::test]
    async fn test_time_reached_on_finished_is_noop() {
        let mut ctx = TestContext::builder("gate")
            .with_configuration(monday_hours())
            .build();
        ctx.fail("error", "boom").unwrap();

        let call = ActionCall::new(TIME_REACHED_ACTION, json!({}), ActionOrigin::Timer);
        TimeGate.handle_action(&call, &mut ctx).await.unwrap();
        assert!(ctx.execution().failed());
        assert!(ctx.scheduled().is_empty());
    }

    #[tokio::test]
    async fn test_time_reached_without_metadata_fails_loud() {
        let mut ctx = TestContext::builder("gate")
            .with_configuration(monday_hours())
            .build();

        let call = ActionCall::new(TIME_REACHED_ACTION, json!({}), ActionOrigin::Timer);
        let result = TimeGate.handle_action(&call, &mut ctx).await;
        assert_err_variant!(result, StepError::Metadata(_));
    }

    #[tokio::test]
    async fn test_push_through() {
        let mut ctx = TestContext::builder("gate")
            .with_configuration(monday_hours())
            .with_payload(json!({"urgent": true}))
            .build();

        let call = ActionCall::new(PUSH_THROUGH_ACTION, json!({}), ActionOrigin::User);
        TimeGate.handle_action(&call, &mut ctx).await.unwrap();
        assert_passed!(ctx);
        assert!(TimeGate.action(PUSH_THROUGH_ACTION).unwrap().user_accessible);
    }
}
