use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use parking_lot::Mutex;

use crate::common::types::TxnId;
use crate::transaction::lock_manager::LockManager;
use crate::transaction::transaction::{IsolationLevel, Transaction, TransactionState};

/// Transaction manager: hands out monotonically increasing transaction IDs
/// (the age order wound-wait relies on) and tracks the active set.
pub struct TransactionManager {
    next_txn_id: AtomicU32,
    lock_manager: Arc<LockManager>,
    active_transactions: Mutex<HashMap<TxnId, Arc<Transaction>>>,
}

impl TransactionManager {
    pub fn new(lock_manager: Arc<LockManager>) -> Self {
        Self {
            next_txn_id: AtomicU32::new(1),
            lock_manager,
            active_transactions: Mutex::new(HashMap::new()),
        }
    }

    /// Begin a new transaction
    pub fn begin(&self, isolation_level: IsolationLevel) -> Arc<Transaction> {
        let txn_id = self.next_txn_id.fetch_add(1, Ordering::SeqCst);
        let txn = Arc::new(Transaction::new(txn_id, isolation_level));
        self.active_transactions.lock().insert(txn_id, txn.clone());
        txn
    }

    /// Commit a transaction, releasing every lock it still holds
    pub fn commit(&self, txn: &Arc<Transaction>) {
        txn.set_state(TransactionState::Committed);
        self.release_locks(txn);
        self.active_transactions.lock().remove(&txn.id());
    }

    /// Abort a transaction, releasing every lock it still holds. Also the
    /// cleanup path for wound-wait victims.
    pub fn abort(&self, txn: &Arc<Transaction>) {
        txn.set_state(TransactionState::Aborted);
        self.release_locks(txn);
        self.active_transactions.lock().remove(&txn.id());
    }

    /// Look up an active transaction by ID
    pub fn get(&self, txn_id: TxnId) -> Option<Arc<Transaction>> {
        self.active_transactions.lock().get(&txn_id).cloned()
    }

    fn release_locks(&self, txn: &Arc<Transaction>) {
        for rid in txn.shared_rids() {
            self.lock_manager.unlock(txn, rid);
        }
        for rid in txn.exclusive_rids() {
            self.lock_manager.unlock(txn, rid);
        }
    }
}
