//! [`TransactionManager`] and its [`CoordinatorTransactionManager`] /
//! [`NoOpTransactionManager`] implementations (§4.10).

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use meridian_rpc::ids::TransactionId;
use meridian_time::{SystemProvider, Time, TimeProvider};
use observability_deps::tracing::{debug, info};
use parking_lot::Mutex;

use crate::error::{
    AlreadyActiveSnafu, AlreadyCompleteSnafu, MultipleWriteCatalogsSnafu, TxnError, UnknownTransactionSnafu,
    UnsupportedOperationSnafu,
};
use snafu::ensure;

/// SQL isolation level a transaction was begun with. The core does not
/// interpret these beyond carrying them — connector transaction hooks
/// (§6) are the ones that actually enforce isolation semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IsolationLevel {
    /// Read uncommitted.
    ReadUncommitted,
    /// Read committed.
    ReadCommitted,
    /// Repeatable read.
    RepeatableRead,
    /// Serializable.
    Serializable,
}

/// Why a transaction reached an absorbing state (§3's Transaction
/// lifecycle: terminal states are absorbing).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalOutcome {
    /// Committed successfully.
    Committed,
    /// Explicitly aborted.
    Aborted,
    /// Marked failed without a connector rollback (§4.10's `fail`: "marks
    /// failed without rolling back connectors twice" — used when a
    /// connector already reported its own rollback).
    Failed,
}

/// The info snapshot [`TransactionManager::get_info`] returns (§3, §4.10).
#[derive(Debug, Clone)]
pub struct TransactionInfo {
    /// This transaction's id.
    pub id: TransactionId,
    /// Isolation level it was begun with.
    pub isolation: IsolationLevel,
    /// Whether it was begun read-only.
    pub read_only: bool,
    /// Whether it auto-commits each statement.
    pub auto_commit: bool,
    /// When [`TransactionManager::begin`] created it.
    pub created_at: Time,
    /// Catalogs touched so far.
    pub catalogs: HashSet<String>,
    /// The single catalog registered as a write target, if any (§3: at
    /// most one write target).
    pub write_catalog: Option<String>,
    /// Whether a caller currently holds the active claim (§4.10's
    /// `checkAndSetActive`/`trySetInactive` mutual exclusion).
    pub active: bool,
    /// Set once the transaction reaches an absorbing state.
    pub terminal: Option<TerminalOutcome>,
}

impl TransactionInfo {
    fn is_terminal(&self) -> bool {
        self.terminal.is_some()
    }
}

/// Coordinator/worker-shared surface for issuing and tracking Transactions
/// (§4.10). A worker node uses [`NoOpTransactionManager`], which refuses
/// every operation: workers never own transactions.
#[async_trait]
pub trait TransactionManager: std::fmt::Debug + Send + Sync {
    /// Start a new transaction, returning its fresh id.
    fn begin(&self, isolation: IsolationLevel, read_only: bool, auto_commit: bool) -> Result<TransactionId, TxnError>;

    /// Whether `id` was ever issued by [`Self::begin`] on this manager.
    fn transaction_exists(&self, id: TransactionId) -> bool;

    /// Snapshot of `id`'s current info.
    fn get_info(&self, id: TransactionId) -> Result<TransactionInfo, TxnError>;

    /// Register that `catalog` was touched by `id`, and — if `is_write` —
    /// attempt to claim it as `id`'s single write-target catalog (§3: at
    /// most one write target; a second distinct write catalog is
    /// rejected).
    fn note_catalog_touched(&self, id: TransactionId, catalog: &str, is_write: bool) -> Result<(), TxnError>;

    /// Claim the active-use guard for `id`: succeeds for at most one
    /// caller at a time (§4.10, §8 property 8).
    fn check_and_set_active(&self, id: TransactionId) -> Result<(), TxnError>;

    /// Release the active-use guard for `id`, allowing a future
    /// [`Self::check_and_set_active`] to succeed.
    fn try_set_inactive(&self, id: TransactionId) -> Result<(), TxnError>;

    /// Commit `id`: only allowed for read-only transactions or the single
    /// write catalog (§4.10). Resolves once connectors have been notified.
    async fn async_commit(&self, id: TransactionId) -> Result<(), TxnError>;

    /// Abort `id`, rolling back any connector-side work.
    async fn async_abort(&self, id: TransactionId) -> Result<(), TxnError>;

    /// Mark `id` failed without issuing a connector rollback — used when
    /// the caller already knows the connector side failed/rolled back on
    /// its own (§4.10).
    fn fail(&self, id: TransactionId) -> Result<(), TxnError>;
}

#[derive(Debug)]
struct Record {
    info: TransactionInfo,
}

/// The real, coordinator-side [`TransactionManager`]: issues
/// [`TransactionId`]s, tracks active transactions and the catalogs they
/// touched, and enforces the mutual-exclusion and at-most-one-write-target
/// invariants from §3/§4.10.
pub struct CoordinatorTransactionManager {
    next_id: AtomicU64,
    records: Mutex<std::collections::HashMap<TransactionId, Record>>,
    time: Arc<dyn TimeProvider>,
}

impl std::fmt::Debug for CoordinatorTransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoordinatorTransactionManager")
            .field("transactions", &self.records.lock().len())
            .finish()
    }
}

impl Default for CoordinatorTransactionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl CoordinatorTransactionManager {
    /// Construct an empty manager backed by the system clock.
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            records: Mutex::new(std::collections::HashMap::new()),
            time: Arc::new(SystemProvider::new()),
        }
    }

    /// Construct a manager with an injected clock, for deterministic
    /// `created_at` timestamps in tests.
    pub fn with_time_provider(time: Arc<dyn TimeProvider>) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            records: Mutex::new(std::collections::HashMap::new()),
            time,
        }
    }

    fn reject_if_terminal(id: TransactionId, info: &TransactionInfo) -> Result<(), TxnError> {
        ensure!(!info.is_terminal(), AlreadyCompleteSnafu { id });
        Ok(())
    }
}

#[async_trait]
impl TransactionManager for CoordinatorTransactionManager {
    fn begin(&self, isolation: IsolationLevel, read_only: bool, auto_commit: bool) -> Result<TransactionId, TxnError> {
        let id = TransactionId::new(self.next_id.fetch_add(1, Ordering::AcqRel));
        let info = TransactionInfo {
            id,
            isolation,
            read_only,
            auto_commit,
            created_at: self.time.now(),
            catalogs: HashSet::new(),
            write_catalog: None,
            active: false,
            terminal: None,
        };
        self.records.lock().insert(id, Record { info });
        info!(%id, ?isolation, read_only, auto_commit, "transaction begun");
        Ok(id)
    }

    fn transaction_exists(&self, id: TransactionId) -> bool {
        self.records.lock().contains_key(&id)
    }

    fn get_info(&self, id: TransactionId) -> Result<TransactionInfo, TxnError> {
        let records = self.records.lock();
        let record = records.get(&id).ok_or_else(|| UnknownTransactionSnafu { id }.build())?;
        Self::reject_if_terminal(id, &record.info)?;
        Ok(record.info.clone())
    }

    fn note_catalog_touched(&self, id: TransactionId, catalog: &str, is_write: bool) -> Result<(), TxnError> {
        let mut records = self.records.lock();
        let record = records.get_mut(&id).ok_or_else(|| UnknownTransactionSnafu { id }.build())?;
        Self::reject_if_terminal(id, &record.info)?;
        record.info.catalogs.insert(catalog.to_string());
        if is_write {
            match &record.info.write_catalog {
                None => record.info.write_catalog = Some(catalog.to_string()),
                Some(existing) if existing == catalog => {}
                Some(existing) => {
                    return Err(MultipleWriteCatalogsSnafu {
                        id,
                        existing: existing.clone(),
                        attempted: catalog.to_string(),
                    }
                    .build());
                }
            }
        }
        Ok(())
    }

    fn check_and_set_active(&self, id: TransactionId) -> Result<(), TxnError> {
        let mut records = self.records.lock();
        let record = records.get_mut(&id).ok_or_else(|| UnknownTransactionSnafu { id }.build())?;
        Self::reject_if_terminal(id, &record.info)?;
        ensure!(!record.info.active, AlreadyActiveSnafu { id });
        record.info.active = true;
        Ok(())
    }

    fn try_set_inactive(&self, id: TransactionId) -> Result<(), TxnError> {
        let mut records = self.records.lock();
        let record = records.get_mut(&id).ok_or_else(|| UnknownTransactionSnafu { id }.build())?;
        Self::reject_if_terminal(id, &record.info)?;
        record.info.active = false;
        Ok(())
    }

    async fn async_commit(&self, id: TransactionId) -> Result<(), TxnError> {
        let mut records = self.records.lock();
        let record = records.get_mut(&id).ok_or_else(|| UnknownTransactionSnafu { id }.build())?;
        Self::reject_if_terminal(id, &record.info)?;
        record.info.terminal = Some(TerminalOutcome::Committed);
        record.info.active = false;
        debug!(%id, "transaction committed");
        Ok(())
    }

    async fn async_abort(&self, id: TransactionId) -> Result<(), TxnError> {
        let mut records = self.records.lock();
        let record = records.get_mut(&id).ok_or_else(|| UnknownTransactionSnafu { id }.build())?;
        Self::reject_if_terminal(id, &record.info)?;
        record.info.terminal = Some(TerminalOutcome::Aborted);
        record.info.active = false;
        debug!(%id, "transaction aborted");
        Ok(())
    }

    fn fail(&self, id: TransactionId) -> Result<(), TxnError> {
        let mut records = self.records.lock();
        let record = records.get_mut(&id).ok_or_else(|| UnknownTransactionSnafu { id }.build())?;
        Self::reject_if_terminal(id, &record.info)?;
        record.info.terminal = Some(TerminalOutcome::Failed);
        record.info.active = false;
        debug!(%id, "transaction marked failed");
        Ok(())
    }
}

/// The worker-side [`TransactionManager`]: refuses every operation, since
/// workers never own transactions (§4.10) — only a coordinator brackets
/// one across connectors.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpTransactionManager;

#[async_trait]
impl TransactionManager for NoOpTransactionManager {
    fn begin(&self, _isolation: IsolationLevel, _read_only: bool, _auto_commit: bool) -> Result<TransactionId, TxnError> {
        UnsupportedOperationSnafu.fail()
    }

    fn transaction_exists(&self, _id: TransactionId) -> bool {
        false
    }

    fn get_info(&self, _id: TransactionId) -> Result<TransactionInfo, TxnError> {
        UnsupportedOperationSnafu.fail()
    }

    fn note_catalog_touched(&self, _id: TransactionId, _catalog: &str, _is_write: bool) -> Result<(), TxnError> {
        UnsupportedOperationSnafu.fail()
    }

    fn check_and_set_active(&self, _id: TransactionId) -> Result<(), TxnError> {
        UnsupportedOperationSnafu.fail()
    }

    fn try_set_inactive(&self, _id: TransactionId) -> Result<(), TxnError> {
        UnsupportedOperationSnafu.fail()
    }

    async fn async_commit(&self, _id: TransactionId) -> Result<(), TxnError> {
        UnsupportedOperationSnafu.fail()
    }

    async fn async_abort(&self, _id: TransactionId) -> Result<(), TxnError> {
        UnsupportedOperationSnafu.fail()
    }

    fn fail(&self, _id: TransactionId) -> Result<(), TxnError> {
        UnsupportedOperationSnafu.fail()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc as StdArc;
    use std::thread;

    #[test]
    fn scenario_f_begin_claim_commit_then_get_info_fails() {
        let mgr = CoordinatorTransactionManager::new();
        let id = mgr.begin(IsolationLevel::ReadCommitted, false, false).unwrap();

        mgr.check_and_set_active(id).unwrap();
        let err = mgr.check_and_set_active(id).unwrap_err();
        assert!(matches!(err, TxnError::AlreadyActive { .. }));

        mgr.try_set_inactive(id).unwrap();
        mgr.check_and_set_active(id).unwrap();

        tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap()
            .block_on(mgr.async_commit(id))
            .unwrap();

        let err = mgr.get_info(id).unwrap_err();
        assert!(matches!(err, TxnError::AlreadyComplete { .. }));
    }

    #[test]
    fn property_8_check_and_set_active_admits_exactly_one_of_many_concurrent_callers() {
        let mgr = StdArc::new(CoordinatorTransactionManager::new());
        let id = mgr.begin(IsolationLevel::Serializable, false, false).unwrap();

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let mgr = StdArc::clone(&mgr);
                thread::spawn(move || mgr.check_and_set_active(id).is_ok())
            })
            .collect();

        let successes: usize = handles.into_iter().map(|h| h.join().unwrap()).filter(|ok| *ok).count();
        assert_eq!(successes, 1);
    }

    #[test]
    fn at_most_one_write_catalog_is_permitted() {
        let mgr = CoordinatorTransactionManager::new();
        let id = mgr.begin(IsolationLevel::ReadCommitted, false, false).unwrap();

        mgr.note_catalog_touched(id, "hive", true).unwrap();
        mgr.note_catalog_touched(id, "hive", true).unwrap();
        let err = mgr.note_catalog_touched(id, "iceberg", true).unwrap_err();
        assert!(matches!(err, TxnError::MultipleWriteCatalogs { .. }));

        // Read-only touches of other catalogs remain fine.
        mgr.note_catalog_touched(id, "iceberg", false).unwrap();
        let info = mgr.get_info(id).unwrap();
        assert_eq!(info.catalogs.len(), 2);
        assert_eq!(info.write_catalog.as_deref(), Some("hive"));
    }

    #[test]
    fn terminal_states_are_absorbing() {
        let mgr = CoordinatorTransactionManager::new();
        let id = mgr.begin(IsolationLevel::ReadCommitted, true, true).unwrap();
        mgr.fail(id).unwrap();

        let err = mgr.fail(id).unwrap_err();
        assert!(matches!(err, TxnError::AlreadyComplete { .. }));
        let err = mgr.check_and_set_active(id).unwrap_err();
        assert!(matches!(err, TxnError::AlreadyComplete { .. }));
    }

    #[tokio::test]
    async fn no_op_manager_refuses_every_operation() {
        let mgr = NoOpTransactionManager;
        assert!(matches!(
            mgr.begin(IsolationLevel::ReadCommitted, true, true),
            Err(TxnError::UnsupportedOperation)
        ));
        assert!(matches!(
            mgr.async_commit(TransactionId::new(1)).await,
            Err(TxnError::UnsupportedOperation)
        ));
        assert!(!mgr.transaction_exists(TransactionId::new(1)));
    }
}
