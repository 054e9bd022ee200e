//! Scoped holds and metered execution.
//!
//! [`ReservationGuard`] owns one pending reservation. Committing consumes
//! it; every other exit path (an error, a timeout, the enclosing future
//! being dropped) releases the hold from `Drop`. [`run_metered`] is the
//! standard reserve → bounded external call → commit sequence built on it.

use super::{
    CommitReceipt, CreditLedger, LedgerError, ReleaseReceipt, ReserveRequest, duration_ms,
};
use crate::service::{RetryConfig, ServiceError};
use crate::tools::core::{FailureKind, ToolFailure};
use serde_json::{Value, json};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

/// A pending reservation that is released unless committed.
#[derive(Debug)]
#[must_use = "dropping the guard releases the reservation"]
pub struct ReservationGuard {
    ledger: Arc<CreditLedger>,
    reservation_id: String,
    amount: i64,
    remaining_credits: i64,
    settled: bool,
}

impl ReservationGuard {
    /// Reserve credits and take ownership of the hold.
    pub fn acquire(ledger: Arc<CreditLedger>, request: &ReserveRequest) -> Result<Self, LedgerError> {
        let receipt = ledger.reserve(request)?;
        Ok(Self {
            ledger,
            reservation_id: receipt.reservation_id,
            amount: request.amount,
            remaining_credits: receipt.remaining_credits,
            settled: false,
        })
    }

    pub fn reservation_id(&self) -> &str {
        &self.reservation_id
    }

    pub fn amount(&self) -> i64 {
        self.amount
    }

    /// Remaining credits right after the hold was placed.
    pub fn remaining_credits(&self) -> i64 {
        self.remaining_credits
    }

    /// Finalize the hold as spent.
    ///
    /// On a storage error the hold is still pending and the guard's `Drop`
    /// releases it. Any other outcome settles the reservation.
    pub fn commit(mut self, metadata: &Value) -> Result<CommitReceipt, LedgerError> {
        let result = self.ledger.commit(&self.reservation_id, metadata);
        self.settled = !matches!(result, Err(LedgerError::Storage(_)));
        result
    }

    /// Release the hold now, recording `metadata` as the reason.
    pub fn release(mut self, metadata: &Value) -> Result<ReleaseReceipt, LedgerError> {
        let result = self.ledger.release(&self.reservation_id, metadata);
        self.settled = result.is_ok();
        result
    }
}

impl Drop for ReservationGuard {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        warn!(
            "[ledger] reservation {} dropped unsettled; releasing {} credits",
            self.reservation_id, self.amount
        );
        if let Err(e) = self
            .ledger
            .release(&self.reservation_id, &json!({"reason": "guard_dropped"}))
        {
            error!(
                "[ledger] cleanup release of {} failed: {e}",
                self.reservation_id
            );
        }
    }
}

// ── Metered execution ──────────────────────────────────────────────

/// Pricing and limits for metered calls.
#[derive(Debug, Clone, PartialEq)]
pub struct MeteringConfig {
    /// Flat credits per call.
    pub base_cost: i64,
    /// Additional credits per started 1000 input characters.
    pub cost_per_kilochar: i64,
    pub reservation_ttl: Duration,
    /// Upper bound on each external call attempt.
    pub call_timeout: Duration,
    pub retry: RetryConfig,
}

impl Default for MeteringConfig {
    fn default() -> Self {
        Self {
            base_cost: 1,
            cost_per_kilochar: 1,
            reservation_ttl: super::DEFAULT_RESERVATION_TTL,
            call_timeout: Duration::from_secs(30),
            retry: RetryConfig::default(),
        }
    }
}

impl MeteringConfig {
    pub fn with_base_cost(mut self, cost: i64) -> Self {
        self.base_cost = cost;
        self
    }

    pub fn with_cost_per_kilochar(mut self, cost: i64) -> Self {
        self.cost_per_kilochar = cost;
        self
    }

    pub fn with_reservation_ttl(mut self, ttl: Duration) -> Self {
        self.reservation_ttl = ttl;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Credits to hold for an input of `chars` characters.
    pub fn cost_for(&self, chars: usize) -> i64 {
        let kilochars = i64::try_from(chars.div_ceil(1000)).unwrap_or(i64::MAX);
        self.base_cost
            .saturating_add(kilochars.saturating_mul(self.cost_per_kilochar))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MeteredError {
    /// The hold could not be placed, or the commit failed for a reason other
    /// than expiry.
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("external call timed out after {}s; the reservation was released", .0.as_secs_f64())]
    Timeout(Duration),
    #[error("{0}; the reservation was released")]
    Service(ServiceError),
    /// The work finished but its hold had expired, so it was not billed and
    /// the result was discarded.
    #[error("reservation '{0}' expired before the result could be billed; the result was discarded")]
    Expired(String),
}

impl From<MeteredError> for ToolFailure {
    fn from(err: MeteredError) -> Self {
        let kind = match &err {
            MeteredError::Ledger(LedgerError::InsufficientCredits { .. }) => {
                FailureKind::InsufficientCredits
            }
            MeteredError::Ledger(LedgerError::ReservationExpired(_)) | MeteredError::Expired(_) => {
                FailureKind::ReservationExpired
            }
            MeteredError::Ledger(LedgerError::InvalidAmount(_)) => FailureKind::InvalidArguments,
            MeteredError::Ledger(_) => FailureKind::Internal,
            MeteredError::Timeout(_) => FailureKind::Transient,
            MeteredError::Service(e) if e.is_transient() => FailureKind::Transient,
            MeteredError::Service(_) => FailureKind::Internal,
        };
        ToolFailure::new(kind, err.to_string())
    }
}

/// A committed metered result.
#[derive(Debug, Clone, PartialEq)]
pub struct Metered<T> {
    pub value: T,
    pub reservation_id: String,
    pub charged: i64,
    pub remaining_credits: i64,
    /// External call attempts made, including the successful one.
    pub attempts: u32,
}

/// Reserve, run `op` under a timeout (retrying transient failures within
/// the same hold), then commit.
///
/// Every failure path releases the hold. If the future returned by this
/// function is dropped mid-flight, the guard's `Drop` releases it. The
/// reserve and commit steps run on tokio's blocking pool.
pub async fn run_metered<T, F, Fut>(
    ledger: &Arc<CreditLedger>,
    request: ReserveRequest,
    config: &MeteringConfig,
    mut op: F,
) -> Result<Metered<T>, MeteredError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ServiceError>>,
{
    let request = if request.ttl.is_none() {
        request.ttl(config.reservation_ttl)
    } else {
        request
    };
    let guard = {
        let ledger = Arc::clone(ledger);
        let request = request.clone();
        blocking(move || ReservationGuard::acquire(ledger, &request)).await?
    };
    debug!(
        "[metered] holding {} for {} as {}",
        request.amount,
        request.scope,
        guard.reservation_id()
    );

    let mut attempt: u32 = 0;
    let value = loop {
        let failure = match tokio::time::timeout(config.call_timeout, op()).await {
            Ok(Ok(value)) => break value,
            Ok(Err(e)) => MeteredError::Service(e),
            Err(_) => MeteredError::Timeout(config.call_timeout),
        };
        let retryable = match &failure {
            MeteredError::Service(e) => e.is_transient(),
            MeteredError::Timeout(_) => true,
            _ => false,
        };
        if retryable && attempt < config.retry.max_retries {
            let delay = config.retry.delay_for_attempt(attempt);
            warn!(
                "[metered] attempt {} failed ({failure}); retrying in {}ms",
                attempt + 1,
                duration_ms(delay)
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
            continue;
        }

        let reason = json!({"reason": "external_call_failed", "error": failure.to_string()});
        if let Err(e) = guard.release(&reason) {
            error!("[metered] release after failure did not complete: {e}");
        }
        return Err(failure);
    };

    let reservation_id = guard.reservation_id().to_string();
    let attempts = attempt + 1;
    let metadata = json!({"attempts": attempts});
    match blocking(move || guard.commit(&metadata)).await {
        Ok(receipt) => Ok(Metered {
            value,
            reservation_id,
            charged: receipt.amount,
            remaining_credits: receipt.remaining_credits,
            attempts,
        }),
        Err(LedgerError::ReservationExpired(id)) => {
            warn!("[metered] result discarded: reservation {id} expired before commit");
            Err(MeteredError::Expired(id))
        }
        Err(e) => Err(MeteredError::Ledger(e)),
    }
}

/// Run a ledger operation on the blocking pool so a busy database does not
/// stall the runtime. A guard produced there and never awaited is dropped
/// by the runtime, which releases it.
async fn blocking<R, F>(f: F) -> Result<R, LedgerError>
where
    F: FnOnce() -> Result<R, LedgerError> + Send + 'static,
    R: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| LedgerError::Storage(format!("ledger task failed: {e}")))?
}
