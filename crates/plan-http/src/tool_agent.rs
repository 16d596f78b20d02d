//! The real tool agent lives behind an RPC boundary this workspace does not
//! implement (spec §1, "Tool agent: external RPC service"). `EchoToolAgent`
//! is the stand-in `RawToolAgent` used to run the engine end to end in
//! `planctl` and the demo scenarios: it completes every invocation
//! immediately, echoing the input back as output.

use async_trait::async_trait;
use chrono::Utc;

use plan_client::RawToolAgent;
use plan_contracts::state::StepState;
use plan_contracts::tool::{ToolError, ToolEvent, ToolInvocation};

pub struct EchoToolAgent;

#[async_trait]
impl RawToolAgent for EchoToolAgent {
    async fn call(&self, invocation: &ToolInvocation) -> Result<Vec<ToolEvent>, ToolError> {
        Ok(vec![ToolEvent {
            invocation_id: invocation.invocation_id.clone(),
            plan_id: invocation.plan_id.clone(),
            step_id: invocation.step_id.clone(),
            state: StepState::Completed,
            summary: Some(format!("{} executed", invocation.capability_label)),
            output: Some(invocation.input.clone()),
            occurred_at: Utc::now(),
            attempt: None,
        }])
    }
}
