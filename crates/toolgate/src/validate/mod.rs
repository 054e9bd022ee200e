//! Self-healing validation of structured agent output.
//!
//! A [`ShapeContract`] checks one kind of structured output and knows how to
//! build a minimal valid fallback for it. [`SelfHealingValidator`] applies
//! contracts for one turn:
//!
//! 1. Valid output passes through untouched and resets the contract's
//!    failure streak.
//! 2. The first invalid output in a streak is replaced by the fallback plus
//!    a diagnosis naming each violated invariant, inviting one corrective
//!    retry.
//! 3. A second consecutive invalid output is replaced by the fallback with
//!    `loop_broken` set and an instruction to answer in plain text.
//!
//! Create one validator per turn. Counters are never shared between turns.

mod render_spec;

pub use render_spec::{RenderSpecContract, fallback_render_spec};

use serde::Serialize;
use serde_json::{Value, json};
use std::collections::HashMap;
use tracing::{info, warn};

/// One violated invariant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    /// Stable identifier of the invariant, e.g. `root_in_elements`.
    pub invariant: &'static str,
    pub message: String,
}

impl Violation {
    pub fn new(invariant: &'static str, message: impl Into<String>) -> Self {
        Self {
            invariant,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Validation {
    Valid,
    Invalid(Vec<Violation>),
}

impl Validation {
    pub fn is_valid(&self) -> bool {
        matches!(self, Validation::Valid)
    }

    fn from_violations(violations: Vec<Violation>) -> Self {
        if violations.is_empty() {
            Validation::Valid
        } else {
            Validation::Invalid(violations)
        }
    }
}

/// Payload of an earlier successful tool call in the same turn.
#[derive(Debug, Clone, PartialEq)]
pub struct PriorResult {
    pub tool: String,
    pub payload: Value,
}

/// Shape invariants for one kind of structured output.
pub trait ShapeContract: Send + Sync {
    /// Short name used in diagnostics and counters.
    fn name(&self) -> &str;

    fn validate(&self, output: &Value) -> Validation;

    /// A minimal output that satisfies [`validate`](Self::validate). May use
    /// the rejected output (e.g. to keep a requested id) and earlier results
    /// from the same turn.
    fn fallback(&self, rejected: &Value, prior: &[PriorResult]) -> Value;
}

/// Replacement for an invalid output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Repair {
    pub contract: String,
    pub output: Value,
    pub violations: Vec<Violation>,
    /// Position in the current streak of consecutive invalid outputs.
    pub attempt: u32,
    pub loop_broken: bool,
    pub instruction: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Healed {
    Valid(Value),
    Repaired(Repair),
}

impl Healed {
    /// The output to use: the original when valid, otherwise the fallback.
    pub fn output(&self) -> &Value {
        match self {
            Healed::Valid(v) => v,
            Healed::Repaired(r) => &r.output,
        }
    }

    pub fn is_loop_broken(&self) -> bool {
        matches!(self, Healed::Repaired(r) if r.loop_broken)
    }

    /// Payload to return to the agent. Repairs wrap the fallback with a
    /// `validation` block carrying the diagnosis.
    pub fn into_payload(self) -> Value {
        match self {
            Healed::Valid(v) => v,
            Healed::Repaired(r) => json!({
                "output": r.output,
                "validation": {
                    "contract": r.contract,
                    "valid": false,
                    "violations": r.violations,
                    "attempt": r.attempt,
                    "loop_broken": r.loop_broken,
                    "instruction": r.instruction,
                },
            }),
        }
    }
}

/// Per-turn validator with a consecutive-failure counter per contract.
#[derive(Debug, Default)]
pub struct SelfHealingValidator {
    streaks: HashMap<String, u32>,
}

impl SelfHealingValidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current consecutive invalid count for a contract.
    pub fn streak(&self, contract: &str) -> u32 {
        self.streaks.get(contract).copied().unwrap_or(0)
    }

    pub fn check(
        &mut self,
        contract: &dyn ShapeContract,
        output: Value,
        prior: &[PriorResult],
    ) -> Healed {
        let violations = match contract.validate(&output) {
            Validation::Valid => {
                self.streaks.remove(contract.name());
                return Healed::Valid(output);
            }
            Validation::Invalid(v) => v,
        };

        let attempt = {
            let streak = self.streaks.entry(contract.name().to_string()).or_insert(0);
            *streak += 1;
            *streak
        };
        let loop_broken = attempt >= 2;
        let summary = violations
            .iter()
            .map(|v| v.invariant)
            .collect::<Vec<_>>()
            .join(", ");

        let instruction = if loop_broken {
            warn!(
                "[validate] {} invalid {attempt} times in a row ({summary}); breaking the loop",
                contract.name()
            );
            format!(
                "Your {} output was invalid again. Do not retry structured output; answer in \
                 plain text instead.",
                contract.name()
            )
        } else {
            info!(
                "[validate] {} invalid ({summary}); returning fallback",
                contract.name()
            );
            format!(
                "Your {} output was replaced with a fallback. Fix these problems and try once \
                 more: {}",
                contract.name(),
                violations
                    .iter()
                    .map(|v| v.message.as_str())
                    .collect::<Vec<_>>()
                    .join("; ")
            )
        };

        let fallback = contract.fallback(&output, prior);
        Healed::Repaired(Repair {
            contract: contract.name().to_string(),
            output: fallback,
            violations,
            attempt,
            loop_broken,
            instruction,
        })
    }
}
