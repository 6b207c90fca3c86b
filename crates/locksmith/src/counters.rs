//! Lock tracking safety counters.
//!
//! Always-on atomic counters for acquisitions, contention, order
//! violations and allocation failures. All counters use relaxed ordering:
//! they are advisory and never synchronize with the lock state itself.

use std::sync::atomic::{AtomicU64, Ordering};

/// Per-context safety counters.
#[derive(Debug, Default)]
#[allow(clippy::struct_field_names)]
pub(crate) struct SafetyCounters {
    acquisitions_total: AtomicU64,
    contention_total: AtomicU64,
    lock_order_violation_total: AtomicU64,
    release_order_violation_total: AtomicU64,
    out_of_memory_total: AtomicU64,
}

impl SafetyCounters {
    pub(crate) const fn new() -> Self {
        Self {
            acquisitions_total: AtomicU64::new(0),
            contention_total: AtomicU64::new(0),
            lock_order_violation_total: AtomicU64::new(0),
            release_order_violation_total: AtomicU64::new(0),
            out_of_memory_total: AtomicU64::new(0),
        }
    }

    #[inline]
    pub(crate) fn record_acquisition(&self) {
        self.acquisitions_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Would-block and timed-out outcomes.
    #[inline]
    pub(crate) fn record_contention(&self) {
        self.contention_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_lock_order_violation(&self) {
        self.lock_order_violation_total
            .fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_release_order_violation(&self) {
        self.release_order_violation_total
            .fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_out_of_memory(&self) {
        self.out_of_memory_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            acquisitions_total: self.acquisitions_total.load(Ordering::Relaxed),
            contention_total: self.contention_total.load(Ordering::Relaxed),
            lock_order_violation_total: self.lock_order_violation_total.load(Ordering::Relaxed),
            release_order_violation_total: self
                .release_order_violation_total
                .load(Ordering::Relaxed),
            out_of_memory_total: self.out_of_memory_total.load(Ordering::Relaxed),
        }
    }
}

/// Immutable snapshot of counter values for reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[allow(clippy::struct_field_names)]
pub struct CounterSnapshot {
    /// Successful acquisitions, bypassed ones included.
    pub acquisitions_total: u64,
    /// Non-blocking attempts that found the lock held, plus timeouts.
    pub contention_total: u64,
    /// Detected lock-order inversions.
    pub lock_order_violation_total: u64,
    /// Unlocks that did not follow LIFO order.
    pub release_order_violation_total: u64,
    /// Allocation failures in the registry or before-sets.
    pub out_of_memory_total: u64,
}
