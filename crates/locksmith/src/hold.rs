//! Thread-local hold context.
//!
//! Each thread keeps a stack of the locks it currently holds, in
//! acquisition order. The detector reads it to derive "held before"
//! edges; unlock pops from it and checks LIFO discipline. The stack is
//! only ever touched by its own thread, so it needs no synchronization.

use std::cell::RefCell;
use std::sync::Arc;

use smallvec::SmallVec;

use crate::registry::LockRecord;

/// Inline capacity for held-lock snapshots; deeper nesting spills to the heap.
pub(crate) const INLINE_HELD: usize = 8;

/// Snapshot of held locks, oldest first.
pub(crate) type HeldLocks = SmallVec<[Arc<LockRecord>; INLINE_HELD]>;

#[derive(Debug, Clone)]
struct HeldLock {
    domain: u64,
    record: Arc<LockRecord>,
    /// `false` for bypassed acquisitions, which the detector ignores.
    tracked: bool,
}

impl HeldLock {
    /// Entries match by record identity, never by ID: a destroyed lock's
    /// ID may already belong to a different record.
    fn is(&self, domain: u64, record: &Arc<LockRecord>) -> bool {
        self.domain == domain && Arc::ptr_eq(&self.record, record)
    }
}

/// Result of removing an entry from the hold context.
#[derive(Debug, Clone)]
pub(crate) enum Popped {
    /// The entry was the most recent one in its domain.
    InOrder,
    /// The entry was found below a more recently acquired lock.
    OutOfOrder { most_recent: Arc<LockRecord> },
    /// The calling thread does not hold the lock.
    NotHeld,
}

/// Per-thread stack of held locks.
#[derive(Debug, Default)]
pub(crate) struct HoldContext {
    held: Vec<HeldLock>,
}

impl HoldContext {
    pub(crate) const fn new() -> Self {
        Self { held: Vec::new() }
    }

    pub(crate) fn push(&mut self, domain: u64, record: Arc<LockRecord>, tracked: bool) {
        self.held.push(HeldLock {
            domain,
            record,
            tracked,
        });
    }

    /// Removes the most recent entry for `record` in `domain`.
    pub(crate) fn pop(&mut self, domain: u64, record: &Arc<LockRecord>) -> Popped {
        let Some(pos) = self.held.iter().rposition(|h| h.is(domain, record)) else {
            return Popped::NotHeld;
        };
        let most_recent = self
            .held
            .iter()
            .rposition(|h| h.domain == domain)
            .unwrap_or(pos);
        self.held.remove(pos);
        if most_recent == pos {
            return Popped::InOrder;
        }
        // `most_recent > pos`, so the removal shifted it down by one.
        Popped::OutOfOrder {
            most_recent: Arc::clone(&self.held[most_recent - 1].record),
        }
    }

    pub(crate) fn contains(&self, domain: u64, record: &Arc<LockRecord>) -> bool {
        self.held.iter().any(|h| h.is(domain, record))
    }

    /// Tracked locks held in `domain`, oldest first.
    pub(crate) fn snapshot(&self, domain: u64) -> HeldLocks {
        self.held
            .iter()
            .filter(|h| h.domain == domain && h.tracked)
            .map(|h| Arc::clone(&h.record))
            .collect()
    }

    /// IDs of all locks held in `domain`, bypassed ones included.
    pub(crate) fn held_ids(&self, domain: u64) -> Vec<usize> {
        self.held
            .iter()
            .filter(|h| h.domain == domain)
            .map(|h| h.record.id())
            .collect()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.held.is_empty()
    }
}

impl Drop for HoldContext {
    fn drop(&mut self) {
        if !self.is_empty() {
            // Thread exited holding tracked locks; only bookkeeping is lost.
            tracing::debug!(
                held = self.held.len(),
                "thread exited with locks still recorded as held"
            );
        }
    }
}

thread_local! {
    static HOLD_CONTEXT: RefCell<HoldContext> = const { RefCell::new(HoldContext::new()) };
}

/// Runs `f` against the calling thread's hold context.
///
/// Returns `None` if the thread-local has already been torn down, which
/// only happens while the thread is exiting.
pub(crate) fn with_hold_context<R>(f: impl FnOnce(&mut HoldContext) -> R) -> Option<R> {
    HOLD_CONTEXT
        .try_with(|ctx| f(&mut ctx.borrow_mut()))
        .ok()
}
