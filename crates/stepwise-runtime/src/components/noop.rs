use futures::future::BoxFuture;

use stepwise_core::{
    outputs_on, Component, ExecutionContext, ExecutionStateContext, Result, DEFAULT_CHANNEL,
};

/// Passes its input through unchanged.
pub struct Noop;

impl Component for Noop {
    fn name(&self) -> &'static str {
        "noop"
    }

    fn execute<'a>(&'a self, ctx: &'a mut ExecutionContext) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let input = ctx.input().clone();
            ctx.pass(outputs_on(DEFAULT_CHANNEL, vec![input]))
        })
    }
}
