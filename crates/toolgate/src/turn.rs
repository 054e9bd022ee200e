//! One agent turn.
//!
//! A [`Turn`] dispatches the calls of a single turn (or stream) one at a
//! time and owns that turn's [`SelfHealingValidator`]. Success payloads of
//! tools that declare an output contract are checked and, if invalid,
//! replaced with a fallback built from the turn's earlier results.
//!
//! Create a fresh `Turn` for every turn; nothing carries over.

use crate::context::ToolCallContext;
use crate::tools::core::ToolResult;
use crate::tools::dispatch::Dispatcher;
use crate::validate::{Healed, PriorResult, SelfHealingValidator};
use serde_json::Value;
use tracing::debug;

/// Outcome of one call in a turn, kept for inspection.
#[derive(Debug, Clone, PartialEq)]
pub struct CallRecord {
    pub tool: String,
    pub success: bool,
    /// Set when the output was replaced by a fallback.
    pub repaired: bool,
    pub loop_broken: bool,
}

pub struct Turn<'a> {
    dispatcher: &'a Dispatcher,
    ctx: &'a ToolCallContext,
    validator: SelfHealingValidator,
    prior: Vec<PriorResult>,
    calls: Vec<CallRecord>,
}

impl<'a> Turn<'a> {
    pub fn new(dispatcher: &'a Dispatcher, ctx: &'a ToolCallContext) -> Self {
        Self {
            dispatcher,
            ctx,
            validator: SelfHealingValidator::new(),
            prior: Vec::new(),
            calls: Vec::new(),
        }
    }

    /// Dispatch one call with the context's capabilities.
    ///
    /// Takes `&mut self`, so calls within a turn are strictly sequential.
    pub async fn call(&mut self, name: &str, args: Value) -> ToolResult {
        let result = self.dispatcher.execute(name, args, self.ctx).await;

        let payload = match result {
            ToolResult::Success(payload) => payload,
            failure @ ToolResult::Failure(_) => {
                self.record(name, false, false, false);
                return failure;
            }
        };

        let contract = self
            .dispatcher
            .registry()
            .lookup(name)
            .and_then(|def| def.output_contract.clone());

        let Some(contract) = contract else {
            self.remember(name, &payload);
            self.record(name, true, false, false);
            return ToolResult::Success(payload);
        };

        match self.validator.check(contract.as_ref(), payload, &self.prior) {
            Healed::Valid(payload) => {
                self.remember(name, &payload);
                self.record(name, true, false, false);
                ToolResult::Success(payload)
            }
            healed @ Healed::Repaired(_) => {
                let loop_broken = healed.is_loop_broken();
                debug!(
                    "[turn] {name} output repaired by {} (loop_broken={loop_broken})",
                    contract.name()
                );
                self.record(name, true, true, loop_broken);
                ToolResult::Success(healed.into_payload())
            }
        }
    }

    pub fn context(&self) -> &ToolCallContext {
        self.ctx
    }

    /// Successful, valid payloads so far, oldest first.
    pub fn prior_results(&self) -> &[PriorResult] {
        &self.prior
    }

    pub fn calls(&self) -> &[CallRecord] {
        &self.calls
    }

    pub fn validator(&self) -> &SelfHealingValidator {
        &self.validator
    }

    fn remember(&mut self, tool: &str, payload: &Value) {
        self.prior.push(PriorResult {
            tool: tool.to_string(),
            payload: payload.clone(),
        });
    }

    fn record(&mut self, tool: &str, success: bool, repaired: bool, loop_broken: bool) {
        self.calls.push(CallRecord {
            tool: tool.to_string(),
            success,
            repaired,
            loop_broken,
        });
    }
}
