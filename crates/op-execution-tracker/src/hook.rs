use anyhow::Result;
use async_trait::async_trait;
use op_core::{ExecutionContext, OutboundEnvelope};
use std::time::Duration;

/// Observer invoked around every dispatch
///
/// Hooks sit outside the request's failure path: the orchestrator logs and
/// discards any error they return.
#[async_trait]
pub trait DispatchHook: Send + Sync {
    fn name(&self) -> &str;

    async fn before(&self, _ctx: &ExecutionContext) -> Result<()> {
        Ok(())
    }

    async fn after(
        &self,
        _ctx: &ExecutionContext,
        _response: &OutboundEnvelope,
        _elapsed: Duration,
    ) -> Result<()> {
        Ok(())
    }
}
