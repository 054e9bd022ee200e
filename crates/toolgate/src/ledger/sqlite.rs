//! SQLite-backed [`CreditLedger`].
//!
//! Each operation runs in one `IMMEDIATE` transaction, so the write lock is
//! taken before anything is read. The guarding statement of every state
//! change is a conditional `UPDATE` (balance sufficient, reservation still
//! pending, not past expiry); a zero row count means the precondition did
//! not hold and nothing was written. This holds across processes sharing
//! the database file, not only across threads sharing one `CreditLedger`.

use super::{
    Clock, CommitReceipt, CreditBalance, CreditTransaction, LedgerError, ReleaseReceipt,
    Reservation, ReservationStatus, ReservationTotals, ReserveReceipt, ReserveRequest, ScopeKey,
    SystemClock, TransactionKind, duration_ms, from_ms,
};
use rusqlite::{Connection, OptionalExtension, Row, Transaction, TransactionBehavior, params};
use serde_json::{Value, json};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default lifetime of a hold (5 minutes).
pub const DEFAULT_RESERVATION_TTL: Duration = Duration::from_secs(300);

const SCHEMA: &str = r#"
PRAGMA foreign_keys=ON;

CREATE TABLE IF NOT EXISTS credit_balances (
  workspace_id TEXT NOT NULL,
  user_id TEXT NOT NULL,
  allocated INTEGER NOT NULL DEFAULT 0 CHECK (allocated >= 0),
  bonus INTEGER NOT NULL DEFAULT 0 CHECK (bonus >= 0),
  used INTEGER NOT NULL DEFAULT 0 CHECK (used >= 0),
  updated_at_ms INTEGER NOT NULL,
  PRIMARY KEY (workspace_id, user_id),
  CHECK (allocated + bonus - used >= 0)
);

CREATE TABLE IF NOT EXISTS credit_reservations (
  id TEXT PRIMARY KEY,
  workspace_id TEXT NOT NULL,
  user_id TEXT NOT NULL,
  amount INTEGER NOT NULL CHECK (amount > 0),
  status TEXT NOT NULL CHECK (status IN ('pending', 'committed', 'released', 'expired')),
  model_id TEXT,
  feature TEXT,
  metadata_json TEXT NOT NULL,
  created_at_ms INTEGER NOT NULL,
  expires_at_ms INTEGER NOT NULL,
  settled_at_ms INTEGER,
  settle_metadata_json TEXT,
  FOREIGN KEY (workspace_id, user_id) REFERENCES credit_balances (workspace_id, user_id)
);

CREATE INDEX IF NOT EXISTS idx_credit_reservations_pending
  ON credit_reservations (status, expires_at_ms);

CREATE TABLE IF NOT EXISTS credit_transactions (
  seq INTEGER PRIMARY KEY AUTOINCREMENT,
  workspace_id TEXT NOT NULL,
  user_id TEXT NOT NULL,
  kind TEXT NOT NULL CHECK (kind IN ('allocation', 'bonus', 'deduction')),
  amount INTEGER NOT NULL,
  reservation_id TEXT,
  model_id TEXT,
  feature TEXT,
  metadata_json TEXT NOT NULL,
  created_at_ms INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_credit_transactions_scope
  ON credit_transactions (workspace_id, user_id, seq);
"#;

const RESERVATION_COLUMNS: &str = "id, workspace_id, user_id, amount, status, model_id, feature, \
     metadata_json, created_at_ms, expires_at_ms, settled_at_ms";

/// Reserve / commit / release against per-scope credit balances.
#[derive(Debug)]
pub struct CreditLedger {
    conn: Mutex<Connection>,
    clock: Arc<dyn Clock>,
    default_ttl: Duration,
}

impl CreditLedger {
    /// Open (or create) a ledger database file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LedgerError> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, LedgerError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, LedgerError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            clock: Arc::new(SystemClock),
            default_ttl: DEFAULT_RESERVATION_TTL,
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn now_ms(&self) -> i64 {
        self.clock.now().timestamp_millis()
    }

    // ── Protocol ───────────────────────────────────────────────────

    /// Place a hold of `request.amount` credits.
    ///
    /// The sufficiency check and the `used` increment are one conditional
    /// `UPDATE`; two concurrent reservations can never both pass against a
    /// stale balance.
    pub fn reserve(&self, request: &ReserveRequest) -> Result<ReserveReceipt, LedgerError> {
        if request.amount <= 0 {
            return Err(LedgerError::InvalidAmount(request.amount));
        }
        let scope = &request.scope;
        let now = self.now_ms();
        let ttl = request.ttl.unwrap_or(self.default_ttl);
        let expires_at = now.saturating_add(duration_ms(ttl));

        let mut conn = self.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let held = tx.execute(
            r#"
            UPDATE credit_balances
            SET used = used + ?3, updated_at_ms = ?4
            WHERE workspace_id = ?1 AND user_id = ?2 AND allocated + bonus - used >= ?3
            "#,
            params![scope.workspace_id, scope.user_id, request.amount, now],
        )?;
        if held == 0 {
            let remaining = balance_tx(&tx, scope)?.remaining();
            info!(
                "[ledger] reserve {} for {scope} rejected: remaining {remaining}",
                request.amount
            );
            return Err(LedgerError::InsufficientCredits {
                requested: request.amount,
                remaining,
            });
        }

        let id = uuid::Uuid::new_v4().to_string();
        tx.execute(
            r#"
            INSERT INTO credit_reservations
              (id, workspace_id, user_id, amount, status, model_id, feature,
               metadata_json, created_at_ms, expires_at_ms)
            VALUES (?1, ?2, ?3, ?4, 'pending', ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                id,
                scope.workspace_id,
                scope.user_id,
                request.amount,
                request.model_id,
                request.feature,
                request.metadata.to_string(),
                now,
                expires_at
            ],
        )?;
        let remaining = balance_tx(&tx, scope)?.remaining();
        tx.commit()?;

        debug!(
            "[ledger] reserved {} for {scope} as {id} (remaining {remaining})",
            request.amount
        );
        Ok(ReserveReceipt {
            reservation_id: id,
            remaining_credits: remaining,
            expires_at: from_ms(expires_at),
        })
    }

    /// Finalize a hold as spent and append a deduction record.
    ///
    /// A missing reservation, or one past its expiry, fails with
    /// [`LedgerError::ReservationExpired`]; in the latter case the hold is
    /// expired and refunded in the same transaction. A second commit (or a
    /// commit after release) fails with
    /// [`LedgerError::ReservationFinalized`] and changes nothing.
    pub fn commit(&self, reservation_id: &str, metadata: &Value) -> Result<CommitReceipt, LedgerError> {
        let now = self.now_ms();
        let mut conn = self.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let committed = tx.execute(
            r#"
            UPDATE credit_reservations
            SET status = 'committed', settled_at_ms = ?2, settle_metadata_json = ?3
            WHERE id = ?1 AND status = 'pending' AND expires_at_ms > ?2
            "#,
            params![reservation_id, now, metadata.to_string()],
        )?;

        let Some(reservation) = reservation_tx(&tx, reservation_id)? else {
            warn!("[ledger] commit of unknown reservation {reservation_id}");
            return Err(LedgerError::ReservationExpired(reservation_id.to_string()));
        };

        if committed == 0 {
            return match reservation.status {
                ReservationStatus::Pending => {
                    expire_tx(&tx, &reservation, now, metadata)?;
                    tx.commit()?;
                    warn!(
                        "[ledger] reservation {reservation_id} expired before commit; hold of {} refunded",
                        reservation.amount
                    );
                    Err(LedgerError::ReservationExpired(reservation_id.to_string()))
                }
                ReservationStatus::Expired => {
                    Err(LedgerError::ReservationExpired(reservation_id.to_string()))
                }
                status => Err(LedgerError::ReservationFinalized {
                    id: reservation_id.to_string(),
                    status,
                }),
            };
        }

        append_transaction_tx(
            &tx,
            &reservation.scope,
            TransactionKind::Deduction,
            -reservation.amount,
            Some(reservation_id),
            reservation.model_id.as_deref(),
            reservation.feature.as_deref(),
            metadata,
            now,
        )?;
        let remaining = balance_tx(&tx, &reservation.scope)?.remaining();
        tx.commit()?;

        debug!(
            "[ledger] committed {reservation_id}: -{} for {} (remaining {remaining})",
            reservation.amount, reservation.scope
        );
        Ok(CommitReceipt {
            reservation_id: reservation_id.to_string(),
            amount: reservation.amount,
            remaining_credits: remaining,
        })
    }

    /// Undo a hold and refund it.
    ///
    /// Idempotent: releasing a reservation that is already committed,
    /// released or expired is a logged no-op that reports the existing
    /// status. A pending hold past its expiry is recorded as expired rather
    /// than released; the refund is identical.
    pub fn release(&self, reservation_id: &str, metadata: &Value) -> Result<ReleaseReceipt, LedgerError> {
        let now = self.now_ms();
        let mut conn = self.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let Some(reservation) = reservation_tx(&tx, reservation_id)? else {
            return Err(LedgerError::ReservationNotFound(reservation_id.to_string()));
        };

        if reservation.status.is_terminal() {
            debug!(
                "[ledger] release of {reservation_id} ignored: already {}",
                reservation.status
            );
            let remaining = balance_tx(&tx, &reservation.scope)?.remaining();
            return Ok(ReleaseReceipt {
                reservation_id: reservation_id.to_string(),
                status: reservation.status,
                refunded: false,
                remaining_credits: remaining,
            });
        }

        let status = if reservation.expires_at.timestamp_millis() <= now {
            expire_tx(&tx, &reservation, now, metadata)?
        } else {
            transition_tx(&tx, &reservation, ReservationStatus::Released, now, metadata)?
        };
        let remaining = balance_tx(&tx, &reservation.scope)?.remaining();
        tx.commit()?;

        debug!(
            "[ledger] {status} {reservation_id}: refunded {} to {} (remaining {remaining})",
            reservation.amount, reservation.scope
        );
        Ok(ReleaseReceipt {
            reservation_id: reservation_id.to_string(),
            status,
            refunded: true,
            remaining_credits: remaining,
        })
    }

    /// Expire and refund every pending hold past its expiry.
    ///
    /// Operator-invoked; nothing schedules it. Uses the same conditional
    /// transition as lazy expiry, so it cannot race a commit.
    pub fn sweep_expired(&self) -> Result<Vec<Reservation>, LedgerError> {
        let now = self.now_ms();
        let mut conn = self.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let stale: Vec<Reservation> = {
            let mut stmt = tx.prepare(&format!(
                "SELECT {RESERVATION_COLUMNS} FROM credit_reservations \
                 WHERE status = 'pending' AND expires_at_ms <= ?1 ORDER BY expires_at_ms"
            ))?;
            stmt.query_map(params![now], reservation_from_row)?
                .collect::<Result<_, _>>()?
        };

        let sweep_meta = serde_json::json!({"reason": "sweep"});
        let mut swept = Vec::with_capacity(stale.len());
        for mut reservation in stale {
            expire_tx(&tx, &reservation, now, &sweep_meta)?;
            reservation.status = ReservationStatus::Expired;
            reservation.settled_at = Some(from_ms(now));
            swept.push(reservation);
        }
        tx.commit()?;

        if !swept.is_empty() {
            info!("[ledger] swept {} expired reservation(s)", swept.len());
        }
        Ok(swept)
    }

    // ── Balances ───────────────────────────────────────────────────

    /// Set the allocated credits for a scope, creating the balance if needed.
    ///
    /// The audit row records the change from the previous allocation, so
    /// the amounts of a scope's settled log sum to its remaining credits.
    /// Fails with `InvalidAmount` if the new allocation would leave
    /// `remaining` negative.
    pub fn set_allocation(&self, scope: &ScopeKey, allocated: i64) -> Result<CreditBalance, LedgerError> {
        if allocated < 0 {
            return Err(LedgerError::InvalidAmount(allocated));
        }
        let now = self.now_ms();
        let mut conn = self.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        ensure_balance_tx(&tx, scope, now)?;
        let previous = balance_tx(&tx, scope)?.allocated;

        let changed = tx.execute(
            r#"
            UPDATE credit_balances
            SET allocated = ?3, updated_at_ms = ?4
            WHERE workspace_id = ?1 AND user_id = ?2 AND ?3 + bonus - used >= 0
            "#,
            params![scope.workspace_id, scope.user_id, allocated, now],
        )?;
        if changed == 0 {
            return Err(LedgerError::InvalidAmount(allocated));
        }
        append_transaction_tx(
            &tx,
            scope,
            TransactionKind::Allocation,
            allocated - previous,
            None,
            None,
            None,
            &json!({"allocated": allocated}),
            now,
        )?;
        let balance = balance_tx(&tx, scope)?;
        tx.commit()?;
        info!("[ledger] allocation for {scope} set to {allocated}");
        Ok(balance)
    }

    /// Grant bonus credits on top of the allocation.
    pub fn add_bonus(&self, scope: &ScopeKey, amount: i64) -> Result<CreditBalance, LedgerError> {
        if amount <= 0 {
            return Err(LedgerError::InvalidAmount(amount));
        }
        let now = self.now_ms();
        let mut conn = self.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        ensure_balance_tx(&tx, scope, now)?;
        tx.execute(
            "UPDATE credit_balances SET bonus = bonus + ?3, updated_at_ms = ?4 \
             WHERE workspace_id = ?1 AND user_id = ?2",
            params![scope.workspace_id, scope.user_id, amount, now],
        )?;
        append_transaction_tx(
            &tx,
            scope,
            TransactionKind::Bonus,
            amount,
            None,
            None,
            None,
            &Value::Null,
            now,
        )?;
        let balance = balance_tx(&tx, scope)?;
        tx.commit()?;
        info!("[ledger] bonus of {amount} granted to {scope}");
        Ok(balance)
    }

    /// Current totals. A scope with no balance row reads as all zeros.
    pub fn balance(&self, scope: &ScopeKey) -> Result<CreditBalance, LedgerError> {
        let conn = self.lock();
        balance_tx(&conn, scope)
    }

    pub fn reservation(&self, reservation_id: &str) -> Result<Option<Reservation>, LedgerError> {
        let conn = self.lock();
        reservation_tx(&conn, reservation_id)
    }

    /// Audit log for a scope, oldest first.
    pub fn transactions(&self, scope: &ScopeKey) -> Result<Vec<CreditTransaction>, LedgerError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            r#"
            SELECT seq, workspace_id, user_id, kind, amount, reservation_id, model_id, feature,
                   metadata_json, created_at_ms
            FROM credit_transactions
            WHERE workspace_id = ?1 AND user_id = ?2
            ORDER BY seq
            "#,
        )?;
        let rows = stmt
            .query_map(params![scope.workspace_id, scope.user_id], |row| {
                let kind: String = row.get(3)?;
                Ok(CreditTransaction {
                    seq: row.get(0)?,
                    scope: ScopeKey::new(row.get::<_, String>(1)?, row.get::<_, String>(2)?),
                    kind: TransactionKind::parse(&kind).unwrap_or(TransactionKind::Deduction),
                    amount: row.get(4)?,
                    reservation_id: row.get(5)?,
                    model_id: row.get(6)?,
                    feature: row.get(7)?,
                    metadata: parse_json(&row.get::<_, String>(8)?),
                    created_at: from_ms(row.get(9)?),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Sum of reservation amounts per status for a scope.
    pub fn reservation_totals(&self, scope: &ScopeKey) -> Result<ReservationTotals, LedgerError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT status, COALESCE(SUM(amount), 0) FROM credit_reservations \
             WHERE workspace_id = ?1 AND user_id = ?2 GROUP BY status",
        )?;
        let mut totals = ReservationTotals::default();
        let rows = stmt.query_map(params![scope.workspace_id, scope.user_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (status, sum) = row?;
            match ReservationStatus::parse(&status) {
                Some(ReservationStatus::Pending) => totals.pending = sum,
                Some(ReservationStatus::Committed) => totals.committed = sum,
                Some(ReservationStatus::Released) => totals.released = sum,
                Some(ReservationStatus::Expired) => totals.expired = sum,
                None => {}
            }
        }
        Ok(totals)
    }
}

// ── Transaction helpers ────────────────────────────────────────────
//
// Take `&Connection` so they work on both a `Transaction` (via deref) and a
// bare connection for read-only queries.

fn ensure_balance_tx(conn: &Connection, scope: &ScopeKey, now: i64) -> Result<(), LedgerError> {
    conn.execute(
        "INSERT INTO credit_balances (workspace_id, user_id, updated_at_ms) VALUES (?1, ?2, ?3) \
         ON CONFLICT (workspace_id, user_id) DO NOTHING",
        params![scope.workspace_id, scope.user_id, now],
    )?;
    Ok(())
}

fn balance_tx(conn: &Connection, scope: &ScopeKey) -> Result<CreditBalance, LedgerError> {
    let balance = conn
        .query_row(
            "SELECT allocated, used, bonus FROM credit_balances \
             WHERE workspace_id = ?1 AND user_id = ?2",
            params![scope.workspace_id, scope.user_id],
            |row| {
                Ok(CreditBalance {
                    allocated: row.get(0)?,
                    used: row.get(1)?,
                    bonus: row.get(2)?,
                })
            },
        )
        .optional()?;
    Ok(balance.unwrap_or_default())
}

fn reservation_tx(conn: &Connection, id: &str) -> Result<Option<Reservation>, LedgerError> {
    Ok(conn
        .query_row(
            &format!("SELECT {RESERVATION_COLUMNS} FROM credit_reservations WHERE id = ?1"),
            params![id],
            reservation_from_row,
        )
        .optional()?)
}

fn reservation_from_row(row: &Row<'_>) -> rusqlite::Result<Reservation> {
    let status: String = row.get(4)?;
    let status = ReservationStatus::parse(&status).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            4,
            rusqlite::types::Type::Text,
            format!("unknown reservation status '{status}'").into(),
        )
    })?;
    Ok(Reservation {
        id: row.get(0)?,
        scope: ScopeKey::new(row.get::<_, String>(1)?, row.get::<_, String>(2)?),
        amount: row.get(3)?,
        status,
        model_id: row.get(5)?,
        feature: row.get(6)?,
        metadata: parse_json(&row.get::<_, String>(7)?),
        created_at: from_ms(row.get(8)?),
        expires_at: from_ms(row.get(9)?),
        settled_at: row.get::<_, Option<i64>>(10)?.map(from_ms),
    })
}

/// Move a pending reservation to `status` and refund its hold.
///
/// The update is conditional on `status = 'pending'`; if another settlement
/// already happened nothing is refunded.
fn transition_tx(
    tx: &Transaction<'_>,
    reservation: &Reservation,
    status: ReservationStatus,
    now: i64,
    metadata: &Value,
) -> Result<ReservationStatus, LedgerError> {
    let changed = tx.execute(
        r#"
        UPDATE credit_reservations
        SET status = ?2, settled_at_ms = ?3, settle_metadata_json = ?4
        WHERE id = ?1 AND status = 'pending'
        "#,
        params![reservation.id, status.as_str(), now, metadata.to_string()],
    )?;
    if changed == 1 {
        tx.execute(
            "UPDATE credit_balances SET used = used - ?3, updated_at_ms = ?4 \
             WHERE workspace_id = ?1 AND user_id = ?2",
            params![
                reservation.scope.workspace_id,
                reservation.scope.user_id,
                reservation.amount,
                now
            ],
        )?;
    }
    Ok(status)
}

fn expire_tx(
    tx: &Transaction<'_>,
    reservation: &Reservation,
    now: i64,
    metadata: &Value,
) -> Result<ReservationStatus, LedgerError> {
    warn!(
        "[ledger] reservation {} for {} expired; releasing hold of {}",
        reservation.id, reservation.scope, reservation.amount
    );
    transition_tx(tx, reservation, ReservationStatus::Expired, now, metadata)
}

#[allow(clippy::too_many_arguments)]
fn append_transaction_tx(
    conn: &Connection,
    scope: &ScopeKey,
    kind: TransactionKind,
    amount: i64,
    reservation_id: Option<&str>,
    model_id: Option<&str>,
    feature: Option<&str>,
    metadata: &Value,
    now: i64,
) -> Result<(), LedgerError> {
    conn.execute(
        r#"
        INSERT INTO credit_transactions
          (workspace_id, user_id, kind, amount, reservation_id, model_id, feature,
           metadata_json, created_at_ms)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        "#,
        params![
            scope.workspace_id,
            scope.user_id,
            kind.as_str(),
            amount,
            reservation_id,
            model_id,
            feature,
            metadata.to_string(),
            now
        ],
    )?;
    Ok(())
}

fn parse_json(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::ManualClock;
    use serde_json::json;

    fn scope() -> ScopeKey {
        ScopeKey::new("w1", "u1")
    }

    fn ledger_with(allocated: i64) -> (CreditLedger, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let ledger = CreditLedger::open_in_memory()
            .unwrap()
            .with_clock(clock.clone());
        ledger.set_allocation(&scope(), allocated).unwrap();
        (ledger, clock)
    }

    #[test]
    fn reserve_without_balance_is_insufficient() {
        let ledger = CreditLedger::open_in_memory().unwrap();
        let err = ledger
            .reserve(&ReserveRequest::new(ScopeKey::new("w", "nobody"), 1))
            .unwrap_err();
        assert_eq!(
            err,
            LedgerError::InsufficientCredits {
                requested: 1,
                remaining: 0
            }
        );
    }

    #[test]
    fn non_positive_amounts_are_rejected() {
        let (ledger, _) = ledger_with(10);
        for amount in [0, -5] {
            assert_eq!(
                ledger.reserve(&ReserveRequest::new(scope(), amount)),
                Err(LedgerError::InvalidAmount(amount))
            );
        }
        assert_eq!(ledger.balance(&scope()).unwrap().used, 0);
    }

    #[test]
    fn reserve_holds_and_commit_deducts() {
        let (ledger, _) = ledger_with(50);
        let receipt = ledger
            .reserve(&ReserveRequest::new(scope(), 20).model_id("m").feature("summary"))
            .unwrap();
        assert_eq!(receipt.remaining_credits, 30);

        let committed = ledger.commit(&receipt.reservation_id, &json!({"tokens": 12})).unwrap();
        assert_eq!(committed.remaining_credits, 30);
        assert_eq!(committed.amount, 20);

        let audit = ledger.transactions(&scope()).unwrap();
        let deduction = audit.last().unwrap();
        assert_eq!(deduction.kind, TransactionKind::Deduction);
        assert_eq!(deduction.amount, -20);
        assert_eq!(deduction.reservation_id.as_deref(), Some(receipt.reservation_id.as_str()));
        assert_eq!(deduction.feature.as_deref(), Some("summary"));
    }

    #[test]
    fn commit_after_expiry_refunds_and_fails() {
        let (ledger, clock) = ledger_with(10);
        let receipt = ledger
            .reserve(&ReserveRequest::new(scope(), 4).ttl(Duration::from_secs(1)))
            .unwrap();
        clock.advance(Duration::from_secs(2));

        let err = ledger.commit(&receipt.reservation_id, &Value::Null).unwrap_err();
        assert_eq!(err.code(), crate::ledger::ErrorCode::ReservationExpired);
        assert_eq!(ledger.balance(&scope()).unwrap().remaining(), 10);
        assert_eq!(
            ledger.reservation(&receipt.reservation_id).unwrap().unwrap().status,
            ReservationStatus::Expired
        );
        // No deduction was recorded.
        assert!(ledger
            .transactions(&scope())
            .unwrap()
            .iter()
            .all(|t| t.kind != TransactionKind::Deduction));
    }

    #[test]
    fn release_after_expiry_marks_expired_and_refunds() {
        let (ledger, clock) = ledger_with(10);
        let receipt = ledger
            .reserve(&ReserveRequest::new(scope(), 4).ttl(Duration::from_secs(1)))
            .unwrap();
        clock.advance(Duration::from_secs(5));

        let released = ledger
            .release(&receipt.reservation_id, &json!({"reason": "late"}))
            .unwrap();
        assert_eq!(released.status, ReservationStatus::Expired);
        assert!(released.refunded);
        assert_eq!(released.remaining_credits, 10);
        assert_eq!(ledger.balance(&scope()).unwrap().remaining(), 10);
        assert_eq!(
            ledger.reservation(&receipt.reservation_id).unwrap().unwrap().status,
            ReservationStatus::Expired
        );
    }

    #[test]
    fn allocation_rows_record_the_change() {
        let (ledger, _) = ledger_with(10);
        ledger.set_allocation(&scope(), 25).unwrap();
        ledger.add_bonus(&scope(), 5).unwrap();
        let receipt = ledger.reserve(&ReserveRequest::new(scope(), 7)).unwrap();
        ledger.commit(&receipt.reservation_id, &Value::Null).unwrap();
        ledger.set_allocation(&scope(), 20).unwrap();

        let log = ledger.transactions(&scope()).unwrap();
        let allocations: Vec<i64> = log
            .iter()
            .filter(|t| t.kind == TransactionKind::Allocation)
            .map(|t| t.amount)
            .collect();
        assert_eq!(allocations, vec![10, 15, -5]);
        let total: i64 = log.iter().map(|t| t.amount).sum();
        assert_eq!(total, ledger.balance(&scope()).unwrap().remaining());
        assert_eq!(total, 18);
    }

    #[test]
    fn commit_of_unknown_reservation_is_expired() {
        let (ledger, _) = ledger_with(10);
        assert_eq!(
            ledger.commit("missing", &Value::Null),
            Err(LedgerError::ReservationExpired("missing".into()))
        );
    }

    #[test]
    fn release_is_idempotent_and_reports_status() {
        let (ledger, _) = ledger_with(10);
        let receipt = ledger.reserve(&ReserveRequest::new(scope(), 6)).unwrap();

        let first = ledger.release(&receipt.reservation_id, &Value::Null).unwrap();
        assert!(first.refunded);
        assert_eq!(first.status, ReservationStatus::Released);
        assert_eq!(first.remaining_credits, 10);

        let second = ledger.release(&receipt.reservation_id, &Value::Null).unwrap();
        assert!(!second.refunded);
        assert_eq!(second.remaining_credits, 10);

        assert_eq!(
            ledger.release("missing", &Value::Null),
            Err(LedgerError::ReservationNotFound("missing".into()))
        );
    }

    #[test]
    fn release_after_commit_changes_nothing() {
        let (ledger, _) = ledger_with(10);
        let receipt = ledger.reserve(&ReserveRequest::new(scope(), 3)).unwrap();
        ledger.commit(&receipt.reservation_id, &Value::Null).unwrap();
        let release = ledger.release(&receipt.reservation_id, &Value::Null).unwrap();
        assert_eq!(release.status, ReservationStatus::Committed);
        assert!(!release.refunded);
        assert_eq!(ledger.balance(&scope()).unwrap().remaining(), 7);
    }

    #[test]
    fn sweep_expires_only_stale_holds() {
        let (ledger, clock) = ledger_with(10);
        let short = ledger
            .reserve(&ReserveRequest::new(scope(), 2).ttl(Duration::from_secs(1)))
            .unwrap();
        let long = ledger
            .reserve(&ReserveRequest::new(scope(), 3).ttl(Duration::from_secs(600)))
            .unwrap();
        clock.advance(Duration::from_secs(5));

        let swept = ledger.sweep_expired().unwrap();
        assert_eq!(swept.len(), 1);
        assert_eq!(swept[0].id, short.reservation_id);
        assert_eq!(ledger.balance(&scope()).unwrap().remaining(), 7);
        assert!(ledger.sweep_expired().unwrap().is_empty());

        ledger.commit(&long.reservation_id, &Value::Null).unwrap();
        let totals = ledger.reservation_totals(&scope()).unwrap();
        assert_eq!(totals.committed, 3);
        assert_eq!(totals.expired, 2);
        assert_eq!(totals.pending, 0);
    }

    #[test]
    fn allocation_cannot_drop_below_used() {
        let (ledger, _) = ledger_with(10);
        ledger.reserve(&ReserveRequest::new(scope(), 8)).unwrap();
        assert_eq!(
            ledger.set_allocation(&scope(), 5),
            Err(LedgerError::InvalidAmount(5))
        );
        let balance = ledger.add_bonus(&scope(), 5).unwrap();
        assert_eq!(balance.remaining(), 7);
        assert_eq!(ledger.set_allocation(&scope(), 5).unwrap().remaining(), 2);
    }

    #[test]
    fn file_backed_ledger_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.db");
        {
            let ledger = CreditLedger::open(&path).unwrap();
            ledger.set_allocation(&scope(), 42).unwrap();
        }
        let reopened = CreditLedger::open(&path).unwrap();
        assert_eq!(reopened.balance(&scope()).unwrap().allocated, 42);
    }
}
