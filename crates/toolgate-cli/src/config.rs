//! CLI configuration with sensible defaults.
//!
//! [`CliConfig`] captures what the `toolgate` binary needs and turns it
//! into library types: the ledger via [`open_ledger`](CliConfig::open_ledger),
//! the built-in services via [`build_services`](CliConfig::build_services),
//! and the dispatcher via [`build_dispatcher`](CliConfig::build_dispatcher).

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use toolgate::ledger::{CreditLedger, LedgerError, MeteringConfig};
use toolgate::pagination::PaginationConfig;
use toolgate::service::{
    CompletionService, DisabledCompletionService, HttpCompletionService, RetryConfig,
    ServiceError,
};
use toolgate::tools::{
    BuiltinServices, DispatchConfig, Dispatcher, RegistryError, builtin_registry,
};

/// Settings for one CLI invocation.
#[derive(Debug, Clone)]
pub struct CliConfig {
    /// Ledger database file. Default: `"toolgate.db"`.
    pub db_path: PathBuf,
    /// OpenAI-compatible chat completions URL. `None` disables
    /// `generate_summary`.
    pub completion_endpoint: Option<String>,
    pub api_key: Option<String>,
    /// Default: `"openai/gpt-4o-mini"`.
    pub summary_model: String,
    /// Per-call dispatcher timeout. Default: 60 s.
    pub tool_timeout: Option<Duration>,
    /// Retries of transient completion failures within one hold. Default: `1`.
    pub completion_retries: u32,
    pub validate_args: bool,
    pub page_size: usize,
    pub max_page_size: usize,
}

impl Default for CliConfig {
    fn default() -> Self {
        let pagination = PaginationConfig::default();
        Self {
            db_path: PathBuf::from("toolgate.db"),
            completion_endpoint: None,
            api_key: None,
            summary_model: toolgate::tools::builtin::DEFAULT_SUMMARY_MODEL.to_string(),
            tool_timeout: DispatchConfig::default().timeout,
            completion_retries: 1,
            validate_args: true,
            page_size: pagination.default_page_size,
            max_page_size: pagination.max_page_size,
        }
    }
}

impl CliConfig {
    pub fn open_ledger(&self) -> Result<Arc<CreditLedger>, LedgerError> {
        Ok(Arc::new(CreditLedger::open(&self.db_path)?))
    }

    /// The HTTP completion client when an endpoint is configured, otherwise
    /// a service that fails every call.
    pub fn completion_service(&self) -> Result<Arc<dyn CompletionService>, ServiceError> {
        let Some(endpoint) = &self.completion_endpoint else {
            return Ok(Arc::new(DisabledCompletionService::new(
                "no completion endpoint configured (pass --completion-endpoint)",
            )));
        };
        let mut service = HttpCompletionService::new(endpoint.as_str())?;
        if let Some(key) = &self.api_key {
            service = service.with_api_key(key.as_str());
        }
        Ok(Arc::new(service))
    }

    pub fn metering(&self) -> MeteringConfig {
        MeteringConfig::default()
            .with_retry(RetryConfig::with_retries(self.completion_retries))
    }

    pub fn pagination(&self) -> PaginationConfig {
        PaginationConfig::default()
            .with_max_page_size(self.max_page_size)
            .with_default_page_size(self.page_size)
    }

    pub fn dispatch(&self) -> DispatchConfig {
        DispatchConfig::default()
            .with_arg_validation(self.validate_args)
            .with_timeout(self.tool_timeout)
    }

    pub fn build_services(
        &self,
        ledger: Arc<CreditLedger>,
        completion: Arc<dyn CompletionService>,
    ) -> BuiltinServices {
        BuiltinServices::new(ledger, completion)
            .with_metering(self.metering())
            .with_pagination(self.pagination())
            .with_summary_model(self.summary_model.as_str())
    }

    pub fn build_dispatcher(&self, services: &BuiltinServices) -> Result<Dispatcher, RegistryError> {
        let registry = builtin_registry(services)?;
        Ok(Dispatcher::new(Arc::new(registry)).with_config(self.dispatch()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use toolgate::tools::ToolName;

    #[test]
    fn defaults_match_library_defaults() {
        let config = CliConfig::default();
        assert_eq!(config.db_path, PathBuf::from("toolgate.db"));
        assert_eq!(config.tool_timeout, Some(Duration::from_secs(60)));
        assert_eq!(config.page_size, 20);
        assert_eq!(config.max_page_size, 100);
        assert!(config.validate_args);
    }

    #[test]
    fn dispatcher_carries_every_builtin_tool() {
        let dir = tempfile::tempdir().unwrap();
        let config = CliConfig {
            db_path: dir.path().join("credits.db"),
            tool_timeout: Some(Duration::from_secs(5)),
            ..Default::default()
        };
        let ledger = config.open_ledger().unwrap();
        let services = config.build_services(ledger, config.completion_service().unwrap());
        let dispatcher = config.build_dispatcher(&services).unwrap();
        assert_eq!(dispatcher.registry().len(), ToolName::ALL.len());
        assert_eq!(dispatcher.config().timeout, Some(Duration::from_secs(5)));
    }

    #[tokio::test]
    async fn missing_endpoint_disables_completions() {
        let service = CliConfig::default().completion_service().unwrap();
        let err = service.summarize("text", "model").await.unwrap_err();
        assert!(matches!(err, ServiceError::Disabled(_)));
    }
}
