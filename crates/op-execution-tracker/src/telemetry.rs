use anyhow::Result;
use async_trait::async_trait;
use op_core::{ExecutionContext, OutboundEnvelope};
use std::time::Duration;
use tracing::{info, instrument, warn};

use crate::hook::DispatchHook;

/// Dispatch telemetry through `tracing` spans
pub struct DispatchTelemetry {
    /// Service name for tracing
    service_name: String,
}

impl DispatchTelemetry {
    /// Create new telemetry service
    pub fn new(service_name: &str) -> Self {
        Self {
            service_name: service_name.to_string(),
        }
    }
}

#[async_trait]
impl DispatchHook for DispatchTelemetry {
    fn name(&self) -> &str {
        "telemetry"
    }

    #[instrument(skip(self, ctx), fields(
        correlation_id = %ctx.correlation_id,
        operation = %ctx.operation,
        depth = ctx.depth,
        service = %self.service_name
    ))]
    async fn before(&self, ctx: &ExecutionContext) -> Result<()> {
        info!(
            parent_correlation_id = ?ctx.parent_correlation_id,
            actor_id = %ctx.actor_id,
            "Dispatch started"
        );
        Ok(())
    }

    #[instrument(skip(self, ctx, response), fields(
        correlation_id = %ctx.correlation_id,
        operation = %ctx.operation,
        outcome = %response.outcome,
        duration_ms = elapsed.as_millis() as u64,
        service = %self.service_name
    ))]
    async fn after(
        &self,
        ctx: &ExecutionContext,
        response: &OutboundEnvelope,
        elapsed: Duration,
    ) -> Result<()> {
        match &response.error {
            None => info!(
                audit_event_id = ?response.audit_event_id,
                replayed = response.replayed,
                "Dispatch completed"
            ),
            Some(error) => warn!(
                kind = %error.kind,
                sub_kind = ?error.sub_kind,
                audit_event_id = ?response.audit_event_id,
                "Dispatch failed"
            ),
        }
        Ok(())
    }
}
