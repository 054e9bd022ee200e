//! `toolgate` command-line tool.
//!
//! Runs tool calls through the dispatcher and manages the credit ledger
//! stored in a SQLite file. Set `TOOLGATE_API_KEY` to authenticate against
//! the completion endpoint.
//!
//! # Examples
//!
//! ```sh
//! # Grant credits, then summarize text on them
//! toolgate allocate --workspace ws-1 --user u-1 100
//! toolgate --completion-endpoint https://openrouter.ai/api/v1/chat/completions \
//!     call generate_summary --workspace ws-1 --user u-1 --capability use_ai \
//!     --args '{"text": "..."}'
//!
//! # Several calls in one turn (the task store lives for one invocation)
//! toolgate run turn.json --workspace ws-1 --user u-1 --capability manage_tasks
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use serde_json::{Value, json};
use toolgate::context::ToolCallContext;
use toolgate::ledger::{CreditLedger, ScopeKey};
use toolgate::store::MemoryStore;
use toolgate::tools::Dispatcher;
use toolgate::tools::reflection::format_tool_failure;
use toolgate::tools::builtin::DEFAULT_SUMMARY_MODEL;
use toolgate::turn::Turn;
use toolgate_cli::CliConfig;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Safe tool dispatch and credit metering for LLM agents.
#[derive(Parser)]
#[command(name = "toolgate", version)]
struct Cli {
    /// Ledger database file.
    #[arg(long, global = true, default_value = "toolgate.db")]
    db: PathBuf,

    /// Log level used when RUST_LOG is unset.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// OpenAI-compatible chat completions URL for generate_summary.
    #[arg(long, global = true)]
    completion_endpoint: Option<String>,

    /// Default model for generate_summary.
    #[arg(long, global = true, default_value = DEFAULT_SUMMARY_MODEL)]
    summary_model: String,

    /// Per-call timeout in seconds (0 disables it).
    #[arg(long, global = true, default_value_t = 60)]
    tool_timeout_secs: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct Scope {
    #[arg(long)]
    workspace: String,
    #[arg(long)]
    user: String,
}

impl Scope {
    fn key(&self) -> ScopeKey {
        ScopeKey::new(self.workspace.as_str(), self.user.as_str())
    }
}

#[derive(Args)]
struct Caller {
    #[command(flatten)]
    scope: Scope,

    /// Capability granted to the caller. Repeatable.
    #[arg(long = "capability")]
    capabilities: Vec<String>,

    #[arg(long)]
    session: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Print the function-calling definitions of every tool.
    Tools,
    /// Set the allocated credits of a balance.
    Allocate {
        #[command(flatten)]
        scope: Scope,
        amount: i64,
    },
    /// Grant bonus credits on top of the allocation.
    Bonus {
        #[command(flatten)]
        scope: Scope,
        amount: i64,
    },
    /// Show a balance and its reservation totals.
    Balance {
        #[command(flatten)]
        scope: Scope,
    },
    /// Show the audit log of a balance.
    History {
        #[command(flatten)]
        scope: Scope,
    },
    /// Run one tool call.
    Call {
        tool: String,
        /// Arguments as a JSON object.
        #[arg(long, default_value = "{}")]
        args: String,
        #[command(flatten)]
        caller: Caller,
    },
    /// Run a JSON array of {"tool", "args"} calls as one turn.
    Run {
        script: PathBuf,
        #[command(flatten)]
        caller: Caller,
    },
    /// Expire and refund every pending reservation past its expiry.
    Sweep,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok((output, ok)) => {
            let text = serde_json::to_string_pretty(&output).unwrap_or_else(|_| output.to_string());
            println!("{text}");
            if !ok {
                std::process::exit(2);
            }
        }
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}

fn config_from(cli: &Cli) -> CliConfig {
    CliConfig {
        db_path: cli.db.clone(),
        completion_endpoint: cli.completion_endpoint.clone(),
        api_key: std::env::var("TOOLGATE_API_KEY").ok(),
        summary_model: cli.summary_model.clone(),
        tool_timeout: (cli.tool_timeout_secs > 0).then(|| Duration::from_secs(cli.tool_timeout_secs)),
        ..Default::default()
    }
}

/// Returns the JSON to print and whether every tool call succeeded.
async fn run(cli: Cli) -> CliResult<(Value, bool)> {
    let config = config_from(&cli);
    let ledger = config.open_ledger()?;

    let output = match cli.command {
        Command::Tools => {
            let dispatcher = dispatcher(&config, ledger)?;
            json!(dispatcher.registry().specs())
        }
        Command::Allocate { scope, amount } => {
            let balance = ledger.set_allocation(&scope.key(), amount)?;
            balance_json(&ledger, &scope.key(), serde_json::to_value(balance)?)?
        }
        Command::Bonus { scope, amount } => {
            let balance = ledger.add_bonus(&scope.key(), amount)?;
            balance_json(&ledger, &scope.key(), serde_json::to_value(balance)?)?
        }
        Command::Balance { scope } => {
            let balance = ledger.balance(&scope.key())?;
            balance_json(&ledger, &scope.key(), serde_json::to_value(balance)?)?
        }
        Command::History { scope } => serde_json::to_value(ledger.transactions(&scope.key())?)?,
        Command::Sweep => {
            let swept = ledger.sweep_expired()?;
            json!({"swept": swept.len(), "reservations": swept})
        }
        Command::Call { tool, args, caller } => {
            let parsed: Value = serde_json::from_str(&args)?;
            let dispatcher = dispatcher(&config, ledger)?;
            let ctx = context(&caller);
            let mut turn = Turn::new(&dispatcher, &ctx);
            let result = turn.call(&tool, parsed).await;
            if let Some(failure) = result.failure_ref() {
                warn!("{}", format_tool_failure(&tool, &args, failure));
            }
            return Ok((result.to_json(), result.is_success()));
        }
        Command::Run { script, caller } => {
            let calls = read_script(&script)?;
            let dispatcher = dispatcher(&config, ledger)?;
            let ctx = context(&caller);
            let mut turn = Turn::new(&dispatcher, &ctx);
            let mut results = Vec::with_capacity(calls.len());
            let mut all_ok = true;
            for (tool, args) in calls {
                let args_text = args.to_string();
                let result = turn.call(&tool, args).await;
                if let Some(failure) = result.failure_ref() {
                    warn!("{}", format_tool_failure(&tool, &args_text, failure));
                }
                all_ok &= result.is_success();
                results.push(json!({"tool": tool, "ok": result.is_success(), "result": result.to_json()}));
            }
            info!("[cli] turn finished after {} call(s)", results.len());
            return Ok((json!(results), all_ok));
        }
    };
    Ok((output, true))
}

fn dispatcher(config: &CliConfig, ledger: Arc<CreditLedger>) -> CliResult<Dispatcher> {
    let services = config.build_services(ledger, config.completion_service()?);
    Ok(config.build_dispatcher(&services)?)
}

fn context(caller: &Caller) -> ToolCallContext {
    let ctx = ToolCallContext::new(
        caller.scope.user.as_str(),
        caller.scope.workspace.as_str(),
        Arc::new(MemoryStore::new()),
    )
    .with_capabilities(caller.capabilities.iter().map(String::as_str));
    match &caller.session {
        Some(session) => ctx.with_session_id(session.as_str()),
        None => ctx,
    }
}

fn balance_json(ledger: &CreditLedger, scope: &ScopeKey, balance: Value) -> CliResult<Value> {
    let totals = ledger.reservation_totals(scope)?;
    let remaining = ledger.balance(scope)?.remaining();
    Ok(json!({
        "scope": scope.to_string(),
        "balance": balance,
        "remaining": remaining,
        "reservations": totals,
    }))
}

/// Parse a turn script: `[{"tool": "create_task", "args": {...}}, ...]`.
fn read_script(path: &Path) -> CliResult<Vec<(String, Value)>> {
    let raw = std::fs::read_to_string(path)?;
    let Value::Array(entries) = serde_json::from_str::<Value>(&raw)? else {
        return Err(format!("{}: expected a JSON array of calls", path.display()).into());
    };
    entries
        .into_iter()
        .enumerate()
        .map(|(i, mut entry)| -> CliResult<(String, Value)> {
            let tool = entry
                .get("tool")
                .and_then(Value::as_str)
                .ok_or_else(|| format!("{}: call {i} has no \"tool\"", path.display()))?
                .to_string();
            let args = entry
                .get_mut("args")
                .map(Value::take)
                .unwrap_or_else(|| json!({}));
            Ok((tool, args))
        })
        .collect()
}
