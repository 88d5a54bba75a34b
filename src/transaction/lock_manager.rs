use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use parking_lot::{Condvar, Mutex};

use crate::common::types::{Rid, TxnId};
use crate::transaction::transaction::{
    AbortReason, IsolationLevel, Transaction, TransactionAbort, TransactionState,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

struct LockRequest {
    txn: Arc<Transaction>,
    mode: LockMode,
    granted: bool,
}

/// Per-row queue of lock requests, in arrival order.
///
/// `shared_count` counts granted shared holders; `exclusive_held` is set
/// while a granted exclusive holder exists; `upgrading` marks a transaction
/// mid-upgrade. Waiters sleep on the queue's condvar and re-check both the
/// predicate and their own transaction state on every wakeup.
struct LockRequestQueue {
    requests: VecDeque<LockRequest>,
    cv: Arc<Condvar>,
    shared_count: u32,
    exclusive_held: bool,
    upgrading: bool,
}

impl Default for LockRequestQueue {
    fn default() -> Self {
        Self {
            requests: VecDeque::new(),
            cv: Arc::new(Condvar::new()),
            shared_count: 0,
            exclusive_held: false,
            upgrading: false,
        }
    }
}

impl LockRequestQueue {
    fn find_request_mut(&mut self, txn_id: TxnId) -> Option<&mut LockRequest> {
        self.requests.iter_mut().find(|r| r.txn.id() == txn_id)
    }

    fn remove_request(&mut self, txn_id: TxnId) -> Option<LockRequest> {
        let pos = self.requests.iter().position(|r| r.txn.id() == txn_id)?;
        self.requests.remove(pos)
    }
}

/// Row lock manager: strict request queues per row, two-phase locking
/// enforcement, shared/exclusive modes with upgrade, and wound-wait deadlock
/// prevention (an older transaction aborts the younger ones in its way).
///
/// One latch guards the whole lock table; per-queue condvars wake waiters.
/// The buffer pool latch is never taken while this latch is held.
pub struct LockManager {
    latch: Mutex<HashMap<Rid, LockRequestQueue>>,
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

impl LockManager {
    pub fn new() -> Self {
        Self {
            latch: Mutex::new(HashMap::new()),
        }
    }

    /// Take a shared lock on a row. Blocks while an exclusive holder is
    /// active. Fails (aborting the transaction) under read-uncommitted
    /// isolation, after the shrinking phase began, or when wounded while
    /// waiting.
    pub fn lock_shared(&self, txn: &Arc<Transaction>, rid: Rid) -> Result<bool, TransactionAbort> {
        let txn_id = txn.id();
        let mut table = self.latch.lock();

        if txn.isolation_level() == IsolationLevel::ReadUncommitted {
            txn.set_state(TransactionState::Aborted);
            return Err(TransactionAbort {
                txn_id,
                reason: AbortReason::LockSharedOnReadUncommitted,
            });
        }
        if txn.state() == TransactionState::Shrinking {
            txn.set_state(TransactionState::Aborted);
            return Err(TransactionAbort {
                txn_id,
                reason: AbortReason::LockOnShrinking,
            });
        }

        let queue = table.entry(rid).or_default();
        queue.requests.push_back(LockRequest {
            txn: txn.clone(),
            mode: LockMode::Shared,
            granted: false,
        });

        if queue.exclusive_held {
            Self::wound_younger(queue, txn_id);
            loop {
                if txn.state() == TransactionState::Aborted {
                    break;
                }
                let queue = match table.get_mut(&rid) {
                    Some(queue) => queue,
                    None => break,
                };
                if !queue.exclusive_held {
                    break;
                }
                let cv = queue.cv.clone();
                cv.wait(&mut table);
            }
        }

        if txn.state() == TransactionState::Aborted {
            if let Some(queue) = table.get_mut(&rid) {
                queue.remove_request(txn_id);
            }
            return Err(TransactionAbort {
                txn_id,
                reason: AbortReason::Deadlock,
            });
        }

        txn.add_shared(rid);
        if let Some(queue) = table.get_mut(&rid) {
            queue.shared_count += 1;
            if let Some(request) = queue.find_request_mut(txn_id) {
                request.granted = true;
            }
        }

        Ok(true)
    }

    /// Take an exclusive lock on a row. Blocks while any holder exists.
    pub fn lock_exclusive(
        &self,
        txn: &Arc<Transaction>,
        rid: Rid,
    ) -> Result<bool, TransactionAbort> {
        let txn_id = txn.id();
        let mut table = self.latch.lock();

        if txn.state() == TransactionState::Shrinking {
            txn.set_state(TransactionState::Aborted);
            return Err(TransactionAbort {
                txn_id,
                reason: AbortReason::LockOnShrinking,
            });
        }

        let queue = table.entry(rid).or_default();
        queue.requests.push_back(LockRequest {
            txn: txn.clone(),
            mode: LockMode::Exclusive,
            granted: false,
        });

        if queue.exclusive_held || queue.shared_count > 0 {
            Self::wound_younger(queue, txn_id);
            loop {
                if txn.state() == TransactionState::Aborted {
                    break;
                }
                let queue = match table.get_mut(&rid) {
                    Some(queue) => queue,
                    None => break,
                };
                if !queue.exclusive_held && queue.shared_count == 0 {
                    break;
                }
                let cv = queue.cv.clone();
                cv.wait(&mut table);
            }
        }

        if txn.state() == TransactionState::Aborted {
            if let Some(queue) = table.get_mut(&rid) {
                queue.remove_request(txn_id);
            }
            return Err(TransactionAbort {
                txn_id,
                reason: AbortReason::Deadlock,
            });
        }

        txn.add_exclusive(rid);
        // The grant and the flag become visible in the same critical
        // section, so no later requester can miss an active exclusive.
        if let Some(queue) = table.get_mut(&rid) {
            queue.exclusive_held = true;
            if let Some(request) = queue.find_request_mut(txn_id) {
                request.granted = true;
            }
        }

        Ok(true)
    }

    /// Upgrade a held shared lock to exclusive. Only one transaction may be
    /// upgrading a row at a time; a second one aborts with
    /// `UpgradeConflict`.
    pub fn lock_upgrade(
        &self,
        txn: &Arc<Transaction>,
        rid: Rid,
    ) -> Result<bool, TransactionAbort> {
        let txn_id = txn.id();
        let mut table = self.latch.lock();

        if txn.state() == TransactionState::Shrinking {
            txn.set_state(TransactionState::Aborted);
            return Err(TransactionAbort {
                txn_id,
                reason: AbortReason::LockOnShrinking,
            });
        }

        let queue = match table.get_mut(&rid) {
            Some(queue) => queue,
            None => return Ok(false),
        };
        if queue.find_request_mut(txn_id).is_none() {
            return Ok(false);
        }
        if queue.upgrading {
            txn.set_state(TransactionState::Aborted);
            return Err(TransactionAbort {
                txn_id,
                reason: AbortReason::UpgradeConflict,
            });
        }

        // Surrender the shared grant and re-enter the queue as an
        // ungranted exclusive request.
        txn.remove_shared(rid);
        queue.shared_count = queue.shared_count.saturating_sub(1);
        if let Some(request) = queue.find_request_mut(txn_id) {
            request.mode = LockMode::Exclusive;
            request.granted = false;
        }
        queue.upgrading = true;

        if queue.exclusive_held || queue.shared_count > 0 {
            Self::wound_younger(queue, txn_id);
            loop {
                if txn.state() == TransactionState::Aborted {
                    break;
                }
                let queue = match table.get_mut(&rid) {
                    Some(queue) => queue,
                    None => break,
                };
                if !queue.exclusive_held && queue.shared_count == 0 {
                    break;
                }
                let cv = queue.cv.clone();
                cv.wait(&mut table);
            }
        }

        if txn.state() == TransactionState::Aborted {
            if let Some(queue) = table.get_mut(&rid) {
                queue.upgrading = false;
                queue.remove_request(txn_id);
            }
            return Err(TransactionAbort {
                txn_id,
                reason: AbortReason::Deadlock,
            });
        }

        txn.add_exclusive(rid);
        if let Some(queue) = table.get_mut(&rid) {
            queue.upgrading = false;
            queue.exclusive_held = true;
            if let Some(request) = queue.find_request_mut(txn_id) {
                request.granted = true;
            }
        }

        Ok(true)
    }

    /// Release a row lock. The first release moves a growing transaction to
    /// shrinking, except a shared release under read-committed isolation.
    /// Returns false when the transaction held no request on the row.
    pub fn unlock(&self, txn: &Arc<Transaction>, rid: Rid) -> bool {
        let txn_id = txn.id();
        let mut table = self.latch.lock();

        txn.remove_shared(rid);
        txn.remove_exclusive(rid);

        let queue = match table.get_mut(&rid) {
            Some(queue) => queue,
            None => return false,
        };
        let request = match queue.remove_request(txn_id) {
            Some(request) => request,
            None => return false,
        };

        let keeps_growing = request.mode == LockMode::Shared
            && txn.isolation_level() == IsolationLevel::ReadCommitted;
        if !keeps_growing && txn.state() == TransactionState::Growing {
            txn.set_state(TransactionState::Shrinking);
        }

        if request.granted {
            match request.mode {
                LockMode::Shared => {
                    queue.shared_count = queue.shared_count.saturating_sub(1);
                    if queue.shared_count == 0 {
                        queue.cv.notify_all();
                    }
                }
                LockMode::Exclusive => {
                    queue.exclusive_held = false;
                    queue.cv.notify_all();
                }
            }
        }

        true
    }

    /// Wound-wait: abort every younger transaction with a live request on
    /// this queue. Granted victims surrender their grant immediately and
    /// leave the queue (their abort will release nothing here); waiting
    /// victims are woken to clean themselves up and report deadlock.
    fn wound_younger(queue: &mut LockRequestQueue, requester: TxnId) {
        let mut wounded = false;
        let mut i = 0;
        while i < queue.requests.len() {
            let other = queue.requests[i].txn.id();
            let alive = queue.requests[i].txn.state() != TransactionState::Aborted;
            if other > requester && alive {
                queue.requests[i].txn.set_state(TransactionState::Aborted);
                wounded = true;
                log::debug!("transaction {} wounds {}", requester, other);
                if queue.requests[i].granted {
                    let mode = queue.requests[i].mode;
                    match mode {
                        LockMode::Shared => {
                            queue.shared_count = queue.shared_count.saturating_sub(1);
                        }
                        LockMode::Exclusive => {
                            queue.exclusive_held = false;
                        }
                    }
                    queue.requests.remove(i);
                    continue;
                }
            }
            i += 1;
        }
        if wounded {
            queue.cv.notify_all();
        }
    }
}
