//! Run once per distinct combination of correlated field values.
//!
//! The first input computes its field set and the upstream nodes still owing
//! a matching input (`waitingFor`). Buffered items whose field set hashes to
//! the same value clear their source; anything else stays in the queue for
//! another group. While sources are outstanding the execution waits on
//! `queue.item` and repeats the match for each new item.

use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use stepwise_core::{
    outputs_on, ActionCall, ActionDefinition, Component, ComponentMetadata, ExecutionContext,
    ExecutionStateContext, ExpressionEngine, MetadataContext, QueueItem, RequestContext, Result,
    StepError, WorkflowContext, DEFAULT_CHANNEL, QUEUE_ITEM_EVENT,
};

pub const QUEUE_ITEM_ACTION: &str = "queueItem";

#[derive(Debug, Clone, Deserialize)]
pub struct FieldDef {
    pub name: String,
    pub expression: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GroupByConfig {
    pub fields: Vec<FieldDef>,
}

pub type FieldSet = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupByMetadata {
    pub field_set: FieldSet,
    pub waiting_for: Vec<String>,
}

impl ComponentMetadata for GroupByMetadata {
    const KIND: &'static str = "groupBy";
}

/// Content hash of a field set. Key order does not matter.
pub fn field_set_hash(fields: &FieldSet) -> u64 {
    let mut hasher = DefaultHasher::new();
    fields.hash(&mut hasher);
    hasher.finish()
}

pub struct GroupBy {
    expressions: ExpressionEngine,
}

impl GroupBy {
    pub fn new() -> Self {
        Self {
            expressions: ExpressionEngine::new(),
        }
    }

    fn field_set(&self, config: &GroupByConfig, payload: &serde_json::Value) -> Result<FieldSet> {
        config
            .fields
            .iter()
            .map(|field| {
                let value = self
                    .expressions
                    .eval_string(&field.expression, payload)
                    .map_err(|e| {
                        StepError::Expression(format!("field '{}': {}", field.name, e))
                    })?;
                Ok((field.name.clone(), value))
            })
            .collect()
    }

    /// Match buffered items against the group until nothing is owed.
    fn drain(
        &self,
        config: &GroupByConfig,
        metadata: &mut GroupByMetadata,
        ctx: &mut ExecutionContext,
    ) -> Result<()> {
        let hash = field_set_hash(&metadata.field_set);

        while !metadata.waiting_for.is_empty() {
            let Some(item) = ctx.dequeue() else {
                break;
            };
            if self.matches(config, metadata, hash, &item)? {
                metadata.waiting_for.retain(|n| n != &item.source_node_id);
                ctx.consume(&item)?;
            }
        }

        Ok(())
    }

    fn matches(
        &self,
        config: &GroupByConfig,
        metadata: &GroupByMetadata,
        hash: u64,
        item: &QueueItem,
    ) -> Result<bool> {
        // Sources already matched in this group ignore repeats.
        if !metadata.waiting_for.contains(&item.source_node_id) {
            return Ok(false);
        }
        let fields = self.field_set(config, &item.data)?;
        Ok(field_set_hash(&fields) == hash)
    }

    fn settle(&self, metadata: GroupByMetadata, ctx: &mut ExecutionContext) -> Result<()> {
        if metadata.waiting_for.is_empty() {
            let payload = serde_json::to_value(&metadata.field_set)?;
            return ctx.pass(outputs_on(DEFAULT_CHANNEL, vec![payload]));
        }

        ctx.store(&metadata)?;
        ctx.subscribe_to(QUEUE_ITEM_EVENT, QUEUE_ITEM_ACTION)?;
        ctx.wait()
    }
}

impl Default for GroupBy {
    fn default() -> Self {
        Self::new()
    }
}

impl Component for GroupBy {
    fn name(&self) -> &'static str {
        "groupBy"
    }

    fn setup(&self, configuration: &serde_json::Value) -> Result<()> {
        let config: GroupByConfig = serde_json::from_value(configuration.clone())
            .map_err(|e| StepError::Config(format!("invalid groupBy configuration: {}", e)))?;

        if config.fields.is_empty() {
            return Err(StepError::Config("groupBy requires at least one field".into()));
        }
        for (i, field) in config.fields.iter().enumerate() {
            if field.name.is_empty() {
                return Err(StepError::Config("groupBy field name must not be empty".into()));
            }
            if config.fields[..i].iter().any(|f| f.name == field.name) {
                return Err(StepError::Config(format!(
                    "duplicate groupBy field '{}'",
                    field.name
                )));
            }
            self.expressions.validate(&field.expression)?;
        }
        Ok(())
    }

    fn execute<'a>(&'a self, ctx: &'a mut ExecutionContext) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let config: GroupByConfig = ctx.config()?;
            let field_set = self.field_set(&config, ctx.input())?;

            // Re-evaluation keeps the sources already matched.
            let waiting_for = match ctx.load_optional::<GroupByMetadata>()? {
                Some(existing) => existing.waiting_for,
                None => {
                    let source = ctx.source_node().map(str::to_string);
                    ctx.previous_nodes()
                        .iter()
                        .filter(|n| Some(n.as_str()) != source.as_deref())
                        .cloned()
                        .collect()
                }
            };

            let mut metadata = GroupByMetadata {
                field_set,
                waiting_for,
            };
            self.drain(&config, &mut metadata, ctx)?;
            self.settle(metadata, ctx)
        })
    }

    fn actions(&self) -> Vec<ActionDefinition> {
        vec![ActionDefinition::internal(QUEUE_ITEM_ACTION)]
    }

    fn handle_action<'a>(
        &'a self,
        call: &'a ActionCall,
        ctx: &'a mut ExecutionContext,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            if call.name != QUEUE_ITEM_ACTION {
                return Err(StepError::UnknownAction(call.name.clone()));
            }
            if ctx.is_finished() {
                return Ok(());
            }

            let config: GroupByConfig = ctx.config()?;
            let mut metadata: GroupByMetadata = ctx.load()?;
            self.drain(&config, &mut metadata, ctx)?;
            self.settle(metadata, ctx)
        })
    }
}
