//! Credit reservation ledger.
//!
//! Metered tools hold credits before calling an unreliable external service
//! and settle the hold afterwards:
//!
//! ```text
//!             commit (pending, not past expiry)
//!   PENDING ─────────────────────────────────────▶ COMMITTED
//!      │  release (not past expiry)
//!      ├────────────────────────────▶ RELEASED
//!      │  touched after expiry / sweep
//!      └────────────────────────────▶ EXPIRED
//! ```
//!
//! Every transition is one-way and happens at most once. A hold increments
//! `used` immediately, so `remaining = allocated + bonus - used` already
//! excludes pending holds; commit keeps the increment, release and expiry
//! refund it.
//!
//! - [`sqlite`]: [`CreditLedger`], the SQLite-backed store.
//! - [`guard`]: [`ReservationGuard`] and [`run_metered`] for callers.

pub mod guard;
pub mod sqlite;

pub use guard::{Metered, MeteredError, MeteringConfig, ReservationGuard, run_metered};
pub use sqlite::{CreditLedger, DEFAULT_RESERVATION_TTL};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

// ── Keys and balances ──────────────────────────────────────────────

/// Owner of a credit balance: one user within one workspace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopeKey {
    pub workspace_id: String,
    pub user_id: String,
}

impl ScopeKey {
    pub fn new(workspace_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            workspace_id: workspace_id.into(),
            user_id: user_id.into(),
        }
    }
}

impl fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.workspace_id, self.user_id)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CreditBalance {
    pub allocated: i64,
    pub used: i64,
    pub bonus: i64,
}

impl CreditBalance {
    pub fn remaining(&self) -> i64 {
        self.allocated + self.bonus - self.used
    }
}

// ── Reservations ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReservationStatus {
    Pending,
    Committed,
    Released,
    Expired,
}

impl ReservationStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Committed => "committed",
            Self::Released => "released",
            Self::Expired => "expired",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "committed" => Some(Self::Committed),
            "released" => Some(Self::Released),
            "expired" => Some(Self::Expired),
            _ => None,
        }
    }

    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Reservation {
    pub id: String,
    pub scope: ScopeKey,
    pub amount: i64,
    pub status: ReservationStatus,
    pub model_id: Option<String>,
    pub feature: Option<String>,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
}

/// Parameters for [`CreditLedger::reserve`].
#[derive(Debug, Clone, PartialEq)]
pub struct ReserveRequest {
    pub scope: ScopeKey,
    pub amount: i64,
    pub model_id: Option<String>,
    pub feature: Option<String>,
    pub metadata: Value,
    /// Hold lifetime. `None` uses the ledger's default.
    pub ttl: Option<Duration>,
}

impl ReserveRequest {
    pub fn new(scope: ScopeKey, amount: i64) -> Self {
        Self {
            scope,
            amount,
            model_id: None,
            feature: None,
            metadata: Value::Null,
            ttl: None,
        }
    }

    pub fn model_id(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = Some(model_id.into());
        self
    }

    pub fn feature(mut self, feature: impl Into<String>) -> Self {
        self.feature = Some(feature.into());
        self
    }

    pub fn metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReserveReceipt {
    pub reservation_id: String,
    pub remaining_credits: i64,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitReceipt {
    pub reservation_id: String,
    pub amount: i64,
    pub remaining_credits: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseReceipt {
    pub reservation_id: String,
    /// Status after the call. Already-terminal reservations report their
    /// existing status.
    pub status: ReservationStatus,
    /// Whether this call performed the transition (and refunded the hold).
    pub refunded: bool,
    pub remaining_credits: i64,
}

/// Reason for a balance change in the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Allocation,
    Bonus,
    Deduction,
}

impl TransactionKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Allocation => "allocation",
            Self::Bonus => "bonus",
            Self::Deduction => "deduction",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "allocation" => Some(Self::Allocation),
            "bonus" => Some(Self::Bonus),
            "deduction" => Some(Self::Deduction),
            _ => None,
        }
    }
}

/// Immutable audit record.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditTransaction {
    pub seq: i64,
    pub scope: ScopeKey,
    pub kind: TransactionKind,
    /// Signed change to the balance: deductions are negative, allocation
    /// rows hold the difference from the previous allocation.
    pub amount: i64,
    pub reservation_id: Option<String>,
    pub model_id: Option<String>,
    pub feature: Option<String>,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

/// Sums of reservation amounts per state for one balance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReservationTotals {
    pub pending: i64,
    pub committed: i64,
    pub released: i64,
    pub expired: i64,
}

// ── Errors ─────────────────────────────────────────────────────────

/// Stable wire codes for ledger failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InsufficientCredits,
    ReservationExpired,
    ReservationNotFound,
    ReservationFinalized,
    InvalidAmount,
    StorageError,
}

impl ErrorCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InsufficientCredits => "INSUFFICIENT_CREDITS",
            Self::ReservationExpired => "RESERVATION_EXPIRED",
            Self::ReservationNotFound => "RESERVATION_NOT_FOUND",
            Self::ReservationFinalized => "RESERVATION_FINALIZED",
            Self::InvalidAmount => "INVALID_AMOUNT",
            Self::StorageError => "STORAGE_ERROR",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("insufficient credits: requested {requested}, remaining {remaining}")]
    InsufficientCredits { requested: i64, remaining: i64 },
    /// Missing, or past its expiry when touched.
    #[error("reservation '{0}' has expired or does not exist")]
    ReservationExpired(String),
    #[error("reservation '{0}' not found")]
    ReservationNotFound(String),
    #[error("reservation '{id}' is already {status}")]
    ReservationFinalized {
        id: String,
        status: ReservationStatus,
    },
    #[error("invalid credit amount {0}")]
    InvalidAmount(i64),
    #[error("ledger storage error: {0}")]
    Storage(String),
}

impl LedgerError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InsufficientCredits { .. } => ErrorCode::InsufficientCredits,
            Self::ReservationExpired(_) => ErrorCode::ReservationExpired,
            Self::ReservationNotFound(_) => ErrorCode::ReservationNotFound,
            Self::ReservationFinalized { .. } => ErrorCode::ReservationFinalized,
            Self::InvalidAmount(_) => ErrorCode::InvalidAmount,
            Self::Storage(_) => ErrorCode::StorageError,
        }
    }
}

impl From<rusqlite::Error> for LedgerError {
    fn from(err: rusqlite::Error) -> Self {
        LedgerError::Storage(err.to_string())
    }
}

// ── Wire responses ─────────────────────────────────────────────────

/// `{success, reservationId?, remainingCredits?, errorCode?}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReserveResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reservation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_credits: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
}

impl From<Result<ReserveReceipt, LedgerError>> for ReserveResponse {
    fn from(result: Result<ReserveReceipt, LedgerError>) -> Self {
        match result {
            Ok(r) => Self {
                success: true,
                reservation_id: Some(r.reservation_id),
                remaining_credits: Some(r.remaining_credits),
                error_code: None,
            },
            Err(e) => Self {
                success: false,
                reservation_id: None,
                remaining_credits: match e {
                    LedgerError::InsufficientCredits { remaining, .. } => Some(remaining),
                    _ => None,
                },
                error_code: Some(e.code()),
            },
        }
    }
}

/// `{success, remainingCredits?, errorCode?}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_credits: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
}

impl From<Result<CommitReceipt, LedgerError>> for CommitResponse {
    fn from(result: Result<CommitReceipt, LedgerError>) -> Self {
        match result {
            Ok(r) => Self {
                success: true,
                remaining_credits: Some(r.remaining_credits),
                error_code: None,
            },
            Err(e) => Self {
                success: false,
                remaining_credits: None,
                error_code: Some(e.code()),
            },
        }
    }
}

/// `{success, errorCode?}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
}

impl From<Result<ReleaseReceipt, LedgerError>> for ReleaseResponse {
    fn from(result: Result<ReleaseReceipt, LedgerError>) -> Self {
        Self {
            success: result.is_ok(),
            error_code: result.err().map(|e| e.code()),
        }
    }
}

// ── Clock ──────────────────────────────────────────────────────────

/// Time source for expiry decisions.
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    millis: AtomicI64,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            millis: AtomicI64::new(start.timestamp_millis()),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.millis.fetch_add(duration_ms(by), Ordering::SeqCst);
    }

    pub fn set(&self, to: DateTime<Utc>) {
        self.millis.store(to.timestamp_millis(), Ordering::SeqCst);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        from_ms(self.millis.load(Ordering::SeqCst))
    }
}

pub(crate) fn duration_ms(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}

pub(crate) fn from_ms(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}
