use std::collections::HashSet;
use parking_lot::{Mutex, RwLock};
use thiserror::Error;

use crate::common::types::{Rid, TxnId};

/// Transaction isolation levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
}

/// Two-phase locking states. A transaction grows until its first unlock,
/// then shrinks; it may take no further locks while shrinking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Growing,
    Shrinking,
    Committed,
    Aborted,
}

/// Why the lock manager aborted a transaction
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    #[error("shared lock requested under read-uncommitted isolation")]
    LockSharedOnReadUncommitted,

    #[error("lock requested while shrinking")]
    LockOnShrinking,

    #[error("another transaction is already upgrading this lock")]
    UpgradeConflict,

    #[error("wounded by an older transaction")]
    Deadlock,
}

/// Raised by the lock manager; the transaction is in `Aborted` state when
/// callers see this.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("transaction {txn_id} aborted: {reason}")]
pub struct TransactionAbort {
    pub txn_id: TxnId,
    pub reason: AbortReason,
}

/// An active database transaction.
///
/// IDs are handed out monotonically, so a numerically smaller ID means an
/// older transaction; wound-wait deadlock prevention leans on that order.
/// State is readable and writable from other threads, which is how a wound
/// reaches a waiting victim.
pub struct Transaction {
    id: TxnId,
    isolation_level: IsolationLevel,
    state: RwLock<TransactionState>,
    shared_lock_set: Mutex<HashSet<Rid>>,
    exclusive_lock_set: Mutex<HashSet<Rid>>,
}

impl Transaction {
    pub fn new(id: TxnId, isolation_level: IsolationLevel) -> Self {
        Self {
            id,
            isolation_level,
            state: RwLock::new(TransactionState::Growing),
            shared_lock_set: Mutex::new(HashSet::new()),
            exclusive_lock_set: Mutex::new(HashSet::new()),
        }
    }

    pub fn id(&self) -> TxnId {
        self.id
    }

    pub fn isolation_level(&self) -> IsolationLevel {
        self.isolation_level
    }

    pub fn state(&self) -> TransactionState {
        *self.state.read()
    }

    pub fn set_state(&self, state: TransactionState) {
        *self.state.write() = state;
    }

    pub fn is_shared_locked(&self, rid: Rid) -> bool {
        self.shared_lock_set.lock().contains(&rid)
    }

    pub fn is_exclusive_locked(&self, rid: Rid) -> bool {
        self.exclusive_lock_set.lock().contains(&rid)
    }

    /// Snapshot of the rows locked in shared mode
    pub fn shared_rids(&self) -> Vec<Rid> {
        self.shared_lock_set.lock().iter().copied().collect()
    }

    /// Snapshot of the rows locked in exclusive mode
    pub fn exclusive_rids(&self) -> Vec<Rid> {
        self.exclusive_lock_set.lock().iter().copied().collect()
    }

    pub(crate) fn add_shared(&self, rid: Rid) {
        self.shared_lock_set.lock().insert(rid);
    }

    pub(crate) fn remove_shared(&self, rid: Rid) {
        self.shared_lock_set.lock().remove(&rid);
    }

    pub(crate) fn add_exclusive(&self, rid: Rid) {
        self.exclusive_lock_set.lock().insert(rid);
    }

    pub(crate) fn remove_exclusive(&self, rid: Rid) {
        self.exclusive_lock_set.lock().remove(&rid);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_transaction_is_growing() {
        let txn = Transaction::new(1, IsolationLevel::ReadCommitted);
        assert_eq!(txn.id(), 1);
        assert_eq!(txn.state(), TransactionState::Growing);
        assert_eq!(txn.isolation_level(), IsolationLevel::ReadCommitted);
        assert!(txn.shared_rids().is_empty());
        assert!(txn.exclusive_rids().is_empty());
    }

    #[test]
    fn lock_sets_track_membership() {
        let txn = Transaction::new(2, IsolationLevel::RepeatableRead);
        let rid = Rid::new(3, 4);

        txn.add_shared(rid);
        assert!(txn.is_shared_locked(rid));
        assert!(!txn.is_exclusive_locked(rid));

        txn.remove_shared(rid);
        txn.add_exclusive(rid);
        assert!(!txn.is_shared_locked(rid));
        assert!(txn.is_exclusive_locked(rid));
    }
}
