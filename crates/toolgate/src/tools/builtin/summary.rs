use super::super::core::{FailureKind, HandlerFuture, ToolDefinition, ToolFailure, ToolHandler, parse_args};
use super::super::names::ToolName;
use super::{BuiltinServices, USE_AI, finish};
use crate::context::ToolCallContext;
use crate::json_schema_for;
use crate::ledger::{CreditLedger, MeteringConfig, ReserveRequest, run_metered};
use crate::service::CompletionService;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;

const MAX_INPUT_CHARS: usize = 50_000;

#[derive(Deserialize, JsonSchema)]
struct SummaryArgs {
    /// The text to summarize.
    text: String,
    /// Model override. Defaults to the configured summary model.
    #[serde(default)]
    model: Option<String>,
}

struct GenerateSummary {
    ledger: Arc<CreditLedger>,
    completion: Arc<dyn CompletionService>,
    metering: MeteringConfig,
    default_model: String,
}

impl ToolHandler for GenerateSummary {
    fn call<'a>(&'a self, args: Value, ctx: &'a ToolCallContext) -> HandlerFuture<'a> {
        Box::pin(async move {
            match parse_args::<SummaryArgs>(args) {
                Ok(args) => finish(self.summarize(args, ctx).await),
                Err(failure) => failure,
            }
        })
    }
}

impl GenerateSummary {
    async fn summarize(&self, args: SummaryArgs, ctx: &ToolCallContext) -> Result<Value, ToolFailure> {
        let text = args.text.trim();
        let chars = text.chars().count();
        if chars == 0 {
            return Err(ToolFailure::new(
                FailureKind::InvalidArguments,
                "text must not be empty",
            ));
        }
        if chars > MAX_INPUT_CHARS {
            return Err(ToolFailure::new(
                FailureKind::InvalidArguments,
                format!("text is {chars} characters; the limit is {MAX_INPUT_CHARS}"),
            ));
        }

        let model = args.model.unwrap_or_else(|| self.default_model.clone());
        let request = ReserveRequest::new(ctx.scope_key(), self.metering.cost_for(chars))
            .model_id(model.as_str())
            .feature(ToolName::GenerateSummary.as_str())
            .metadata(json!({"chars": chars, "session_id": ctx.session_id()}));

        let metered = run_metered(&self.ledger, request, &self.metering, || {
            self.completion.summarize(text, &model)
        })
        .await?;

        Ok(json!({
            "summary": metered.value.text,
            "model": model,
            "credits_charged": metered.charged,
            "remaining_credits": metered.remaining_credits,
            "reservation_id": metered.reservation_id,
        }))
    }
}

pub(super) fn generate_summary(services: &BuiltinServices) -> ToolDefinition {
    ToolDefinition::new(
        ToolName::GenerateSummary,
        "Summarize text with an AI model. Costs credits: 1 per call plus 1 per 1000 characters \
         by default.",
        json_schema_for::<SummaryArgs>(),
        GenerateSummary {
            ledger: Arc::clone(&services.ledger),
            completion: Arc::clone(&services.completion),
            metering: services.metering.clone(),
            default_model: services.summary_model.clone(),
        },
    )
    .requires(USE_AI)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::ScopeKey;
    use crate::service::{Completion, ServiceError, ServiceFuture};
    use crate::store::MemoryStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Echo {
        calls: AtomicUsize,
        fail_with: Option<ServiceError>,
    }

    impl CompletionService for Echo {
        fn summarize<'a>(&'a self, text: &'a str, _model: &'a str) -> ServiceFuture<'a, Completion> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let outcome = match &self.fail_with {
                Some(e) => Err(e.clone()),
                None => Ok(Completion {
                    text: format!("summary of {} chars", text.len()),
                    prompt_tokens: None,
                    completion_tokens: None,
                }),
            };
            Box::pin(async move { outcome })
        }
    }

    fn setup(allocated: i64, fail_with: Option<ServiceError>) -> (ToolDefinition, Arc<CreditLedger>, Arc<Echo>) {
        let ledger = Arc::new(CreditLedger::open_in_memory().unwrap());
        ledger
            .set_allocation(&ScopeKey::new("w1", "u1"), allocated)
            .unwrap();
        let echo = Arc::new(Echo {
            calls: AtomicUsize::new(0),
            fail_with,
        });
        let services = BuiltinServices::new(ledger.clone(), echo.clone());
        (generate_summary(&services), ledger, echo)
    }

    fn ctx() -> ToolCallContext {
        ToolCallContext::new("u1", "w1", Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn charges_base_plus_kilochars() {
        let (def, ledger, _) = setup(10, None);
        let text = "a".repeat(1500);
        let result = def.handler().call(json!({"text": text}), &ctx()).await;
        let payload = result.payload().unwrap();
        assert_eq!(payload["credits_charged"], 3);
        assert_eq!(payload["remaining_credits"], 7);
        assert_eq!(
            ledger.balance(&ScopeKey::new("w1", "u1")).unwrap().remaining(),
            7
        );
    }

    #[tokio::test]
    async fn service_failure_refunds_the_hold() {
        let (def, ledger, echo) = setup(
            10,
            Some(ServiceError::Http {
                status: 500,
                body: "down".into(),
            }),
        );
        let result = def.handler().call(json!({"text": "hello"}), &ctx()).await;
        let failure = result.failure_ref().unwrap();
        assert_eq!(failure.kind, FailureKind::Transient);
        assert_eq!(echo.calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            ledger.balance(&ScopeKey::new("w1", "u1")).unwrap().remaining(),
            10
        );
    }

    #[tokio::test]
    async fn empty_balance_skips_the_service() {
        let (def, _, echo) = setup(0, None);
        let result = def.handler().call(json!({"text": "hello"}), &ctx()).await;
        assert_eq!(
            result.failure_ref().unwrap().kind,
            FailureKind::InsufficientCredits
        );
        assert_eq!(echo.calls.load(Ordering::SeqCst), 0);
    }
}
