//! Interception layer: tracked mutex handles and the operations that
//! drive the registry and detector around the native primitive.
//!
//! Per-handle state machine:
//!
//! ```text
//! UNINITIALIZED --init--> UNLOCKED <--lock/unlock--> LOCKED
//!                            |
//!                         destroy
//!                            v
//!                      UNINITIALIZED (handle may be re-initialized)
//! ```
//!
//! Mutual exclusion itself is provided by `parking_lot::RawMutex`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock};
use std::time::{Duration, Instant};

use arc_swap::ArcSwapOption;
use parking_lot::lock_api::{RawMutex as _, RawMutexTimed as _};

use crate::config::{LocksmithConfig, ViolationPolicy};
use crate::counters::{CounterSnapshot, SafetyCounters};
use crate::detector;
use crate::error::{Error, Result};
use crate::hold::{with_hold_context, HeldLocks, Popped};
use crate::registry::{LockRecord, Registry};
use crate::report::{ErrorCallback, Reporter};

/// Native mutex type requested at init.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum MutexKind {
    /// Relocking from the owning thread blocks forever.
    #[default]
    Normal,
    /// Relocking from the owning thread fails with `SelfDeadlock`.
    ErrorCheck,
}

/// Native attributes passed to init.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MutexAttrs {
    /// Mutex type.
    pub kind: MutexKind,
}

impl MutexAttrs {
    /// Attributes for an error-checking mutex.
    #[must_use]
    pub const fn error_check() -> Self {
        Self {
            kind: MutexKind::ErrorCheck,
        }
    }
}

/// How a successful acquisition relates to the observed lock order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum Acquisition {
    /// No conflict with any previously observed order.
    Ordered,
    /// An inversion was reported but the lock was acquired anyway
    /// (`ViolationPolicy::Proceed`).
    Inverted,
}

/// How a release relates to the thread's acquisition order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum Release {
    /// The released lock was the most recently acquired one.
    InOrder,
    /// A more recently acquired lock is still held; reported as a
    /// release-order violation. The lock was released regardless.
    OutOfOrder,
}

/// User-visible mutex handle.
///
/// A handle is inert until [`Locksmith::init`] binds it to a lock record.
/// The binding is a one-shot atomic claim; a second init on a bound handle
/// fails with `CreateWhileInUse`.
///
/// Dropping an initialized handle releases its ID like
/// [`Locksmith::destroy`], unless the mutex is still locked. In that case
/// the ID is retired: it stays allocated for the life of the context and
/// counts against `max_locks`. See [`Locksmith::retired_ids`].
pub struct TrackedMutex {
    raw: parking_lot::RawMutex,
    claim: ArcSwapOption<LockRecord>,
}

impl TrackedMutex {
    /// Creates an uninitialized handle.
    #[must_use]
    pub fn new() -> Self {
        Self {
            raw: parking_lot::RawMutex::INIT,
            claim: ArcSwapOption::empty(),
        }
    }

    /// Whether the handle is currently bound to a lock record.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.claim.load().is_some()
    }

    /// Registry ID of the bound record.
    #[must_use]
    pub fn id(&self) -> Option<usize> {
        self.record().map(|r| r.id())
    }

    /// Diagnostic label of the bound record.
    #[must_use]
    pub fn label(&self) -> Option<String> {
        self.record().map(|r| r.label())
    }

    /// Successful acquisitions of the bound record.
    #[must_use]
    pub fn acquisitions(&self) -> Option<u64> {
        self.record().map(|r| r.acquisitions())
    }

    /// Whether the native primitive is currently held by any thread.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.raw.is_locked()
    }

    fn record(&self) -> Option<Arc<LockRecord>> {
        self.claim.load_full()
    }
}

impl Default for TrackedMutex {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TrackedMutex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackedMutex")
            .field("record", &self.record())
            .field("locked", &self.is_locked())
            .finish()
    }
}

impl Drop for TrackedMutex {
    fn drop(&mut self) {
        let Some(record) = self.claim.swap(None) else {
            return;
        };
        if self.raw.is_locked() {
            // A hold context still lists the record; a new lock under the same
            // ID would pick up edges from it.
            if let Some(registry) = record.registry() {
                registry.retire(&record);
            }
            return;
        }
        if let Some(registry) = record.registry() {
            registry.release(&record);
            tracing::debug!(lock = %record.label(), "tracked mutex dropped without destroy");
        }
    }
}

static NEXT_DOMAIN: AtomicU64 = AtomicU64::new(1);

static GLOBAL: LazyLock<Locksmith> = LazyLock::new(|| {
    let config = LocksmithConfig::load().unwrap_or_else(|err| {
        tracing::warn!(error = %err, "invalid locksmith configuration, using defaults");
        LocksmithConfig::default()
    });
    Locksmith::new(config)
});

#[derive(Debug)]
struct Shared {
    domain: u64,
    config: LocksmithConfig,
    registry: Arc<Registry>,
    reporter: Reporter,
    counters: SafetyCounters,
}

/// Lock-order tracking context.
///
/// Owns one registry, one error callback, one configuration and one counter
/// set. Cloning is cheap and yields a handle to the same context.
/// [`Locksmith::global`] is the process-wide instance used by the free
/// functions at the crate root.
#[derive(Debug, Clone)]
pub struct Locksmith {
    shared: Arc<Shared>,
}

impl Locksmith {
    /// Creates an independent context.
    #[must_use]
    pub fn new(config: LocksmithConfig) -> Self {
        let registry = Arc::new(Registry::new(config.before_min, config.max_locks));
        Self {
            shared: Arc::new(Shared {
                domain: NEXT_DOMAIN.fetch_add(1, Ordering::Relaxed),
                config,
                registry,
                reporter: Reporter::new(),
                counters: SafetyCounters::new(),
            }),
        }
    }

    /// The process-wide context, configured from `locksmith.toml` and
    /// `LOCKSMITH_*` on first use.
    #[must_use]
    pub fn global() -> &'static Self {
        &GLOBAL
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &LocksmithConfig {
        &self.shared.config
    }

    /// Replaces the error callback. The previous one is dropped.
    pub fn set_error_callback(&self, callback: impl Fn(i32, &str) + Send + Sync + 'static) {
        let callback: ErrorCallback = Arc::new(callback);
        self.shared.reporter.set_callback(callback);
    }

    /// Binds `mutex` to a new lock record.
    ///
    /// # Errors
    ///
    /// - `OutOfMemory` if no ID or record could be allocated.
    /// - `CreateWhileInUse` if `mutex` is already bound; the freshly
    ///   allocated record is released again.
    pub fn init(&self, name: Option<&str>, mutex: &TrackedMutex, attrs: MutexAttrs) -> Result<()> {
        let record = match self.shared.registry.register(self.domain(), name, attrs.kind) {
            Ok(record) => record,
            Err(err) => {
                self.shared.counters.record_out_of_memory();
                return self.fail(err);
            }
        };
        let previous = mutex
            .claim
            .compare_and_swap(&None::<Arc<LockRecord>>, Some(Arc::clone(&record)));
        if previous.is_some() {
            drop(previous);
            self.shared.registry.release(&record);
            return self.fail(Error::CreateWhileInUse {
                name: name.unwrap_or("<unnamed>").to_owned(),
            });
        }
        tracing::debug!(lock = %record.label(), kind = ?attrs.kind, "lock registered");
        Ok(())
    }

    /// Blocking acquire.
    ///
    /// The order check runs before blocking, so an inversion is reported
    /// before it can turn into a deadlock.
    ///
    /// # Errors
    ///
    /// `NotInitialized`, `SelfDeadlock` (error-checking mutex already held
    /// by this thread) or `LockOrderViolation` under the refuse policy.
    pub fn lock(&self, mutex: &TrackedMutex) -> Result<Acquisition> {
        let record = self.resolve(mutex)?;
        let held = self.prepare_blocking(&record)?;
        let outcome = self.check_order(&record, &held)?;
        mutex.raw.lock();
        self.confirm_binding(mutex, &record)?;
        self.commit(&record, &held, outcome, true);
        Ok(outcome)
    }

    /// Non-blocking acquire.
    ///
    /// With `bypass`, order checking is skipped and the acquisition is kept
    /// out of every before-set; it is still recorded as held so the
    /// matching unlock is valid.
    ///
    /// # Errors
    ///
    /// `NotInitialized`, `WouldBlock` when the lock is held, or
    /// `LockOrderViolation` under the refuse policy (the native lock is
    /// released again before returning).
    pub fn try_lock(&self, mutex: &TrackedMutex, bypass: bool) -> Result<Acquisition> {
        let record = self.resolve(mutex)?;
        if !mutex.raw.try_lock() {
            self.shared.counters.record_contention();
            tracing::trace!(lock = %record.label(), "try_lock would block");
            return Err(Error::WouldBlock(record.label()));
        }
        self.confirm_binding(mutex, &record)?;
        if bypass {
            self.commit(&record, &[], Acquisition::Ordered, false);
            return Ok(Acquisition::Ordered);
        }
        let held = with_hold_context(|ctx| ctx.snapshot(self.domain())).unwrap_or_default();
        match self.check_order(&record, &held) {
            Ok(outcome) => {
                self.commit(&record, &held, outcome, true);
                Ok(outcome)
            }
            Err(err) => {
                // SAFETY: `unlock` requires the lock to be held in this context.
                // - Condition 1: `try_lock` above succeeded on this thread.
                // - Condition 2: Nothing was recorded, so no one else will release it.
                // Reason: A refused acquisition must leave the lock as it found it.
                unsafe { mutex.raw.unlock() };
                Err(err)
            }
        }
    }

    /// Acquire bounded by `deadline`.
    ///
    /// # Errors
    ///
    /// As [`lock`](Self::lock), plus `TimedOut` when the deadline passes
    /// first. A timeout leaves the hold context, counters and before-sets
    /// untouched.
    pub fn timed_lock(&self, mutex: &TrackedMutex, deadline: Instant) -> Result<Acquisition> {
        let record = self.resolve(mutex)?;
        let held = self.prepare_blocking(&record)?;
        let outcome = self.check_order(&record, &held)?;
        if !mutex.raw.try_lock_until(deadline) {
            self.shared.counters.record_contention();
            tracing::trace!(lock = %record.label(), "timed lock expired");
            return Err(Error::TimedOut(record.label()));
        }
        self.confirm_binding(mutex, &record)?;
        self.commit(&record, &held, outcome, true);
        Ok(outcome)
    }

    /// [`timed_lock`](Self::timed_lock) with a relative timeout.
    pub fn timed_lock_for(&self, mutex: &TrackedMutex, timeout: Duration) -> Result<Acquisition> {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.timed_lock(mutex, deadline),
            None => self.lock(mutex),
        }
    }

    /// Releases `mutex` and pops it from the hold context.
    ///
    /// # Errors
    ///
    /// `NotInitialized`, or `NotOwner` when the calling thread does not hold
    /// the lock (nothing is released in that case).
    pub fn unlock(&self, mutex: &TrackedMutex) -> Result<Release> {
        let record = self.resolve(mutex)?;
        let popped = with_hold_context(|ctx| ctx.pop(self.domain(), &record))
            .unwrap_or(Popped::NotHeld);
        if matches!(popped, Popped::NotHeld) {
            return self.fail(Error::NotOwner(record.label()));
        }
        // SAFETY: `unlock` requires the lock to be held in this context.
        // - Condition 1: The hold context had an entry for this exact record,
        //   pushed by this thread after its native acquire succeeded.
        // - Condition 2: The acquire confirmed `mutex` was still bound to the
        //   record while holding the native lock, and a record is bound to one
        //   handle only, so the entry refers to this handle's primitive.
        // Reason: The native release is the wrapped primitive's only unlock path.
        unsafe { mutex.raw.unlock() };
        match popped {
            Popped::OutOfOrder { most_recent } => {
                self.shared.counters.record_release_order_violation();
                self.shared.reporter.report(&Error::ReleaseOrderViolation {
                    released: record.label(),
                    expected: most_recent.label(),
                });
                Ok(Release::OutOfOrder)
            }
            _ => Ok(Release::InOrder),
        }
    }

    /// Unbinds `mutex` and frees its ID.
    ///
    /// # Errors
    ///
    /// `NotInitialized`, or `DestroyWhileLocked` if any thread holds the
    /// lock; the lock then stays registered and usable.
    pub fn destroy(&self, mutex: &TrackedMutex) -> Result<()> {
        let record = self.resolve(mutex)?;
        if !mutex.raw.try_lock() {
            return self.fail(Error::DestroyWhileLocked(record.label()));
        }
        mutex.claim.store(None);
        self.shared.registry.release(&record);
        // SAFETY: `unlock` requires the lock to be held in this context.
        // - Condition 1: `try_lock` above succeeded on this thread.
        // - Condition 2: The probe was never recorded in any hold context.
        // Reason: The probe only guards against destroying a held lock.
        unsafe { mutex.raw.unlock() };
        tracing::debug!(lock = %record.label(), "lock destroyed");
        Ok(())
    }

    /// Snapshot of this context's safety counters.
    #[must_use]
    pub fn counters(&self) -> CounterSnapshot {
        self.shared.counters.snapshot()
    }

    /// IDs of all live locks, ascending.
    #[must_use]
    pub fn live_locks(&self) -> Vec<usize> {
        self.shared.registry.live_ids()
    }

    /// Number of live locks.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.shared.registry.live_count()
    }

    /// Size of the ID space allocated so far.
    #[must_use]
    pub fn id_space(&self) -> usize {
        self.shared.registry.capacity()
    }

    /// IDs permanently retired because their handle was dropped while
    /// locked.
    #[must_use]
    pub fn retired_ids(&self) -> usize {
        self.shared.registry.retired()
    }

    /// Live record for `id`.
    #[must_use]
    pub fn record(&self, id: usize) -> Option<Arc<LockRecord>> {
        self.shared.registry.get(id)
    }

    /// IDs the calling thread holds in this context, oldest first.
    #[must_use]
    pub fn held_locks(&self) -> Vec<usize> {
        with_hold_context(|ctx| ctx.held_ids(self.domain())).unwrap_or_default()
    }

    /// Whether `first` has been observed held at the moment `second` was
    /// acquired.
    #[must_use]
    pub fn observed_before(&self, first: &TrackedMutex, second: &TrackedMutex) -> bool {
        match (first.id(), second.record()) {
            (Some(first), Some(second)) if second.domain() == self.domain() => {
                second.observed_after(first)
            }
            _ => false,
        }
    }

    pub(crate) fn report(&self, err: &Error) {
        self.shared.reporter.report(err);
    }

    #[inline]
    fn domain(&self) -> u64 {
        self.shared.domain
    }

    fn fail<T>(&self, err: Error) -> Result<T> {
        self.shared.reporter.report(&err);
        Err(err)
    }

    fn resolve(&self, mutex: &TrackedMutex) -> Result<Arc<LockRecord>> {
        match mutex.record() {
            Some(record) if record.domain() == self.domain() => Ok(record),
            _ => self.fail(Error::NotInitialized),
        }
    }

    /// Held-ID snapshot for a blocking acquire, rejecting an error-checking
    /// relock by the owner.
    fn prepare_blocking(&self, record: &Arc<LockRecord>) -> Result<HeldLocks> {
        let domain = self.domain();
        let (held, relock) = with_hold_context(|ctx| {
            (ctx.snapshot(domain), ctx.contains(domain, record))
        })
        .unwrap_or_default();
        if relock && record.kind() == MutexKind::ErrorCheck {
            return self.fail(Error::SelfDeadlock(record.label()));
        }
        Ok(held)
    }

    /// Fails with `NotInitialized` if `mutex` was destroyed (or rebound)
    /// between resolving `record` and acquiring the native lock. The native
    /// lock is released again in that case.
    fn confirm_binding(&self, mutex: &TrackedMutex, record: &Arc<LockRecord>) -> Result<()> {
        if mutex
            .record()
            .is_some_and(|bound| Arc::ptr_eq(&bound, record))
        {
            return Ok(());
        }
        // SAFETY: `unlock` requires the lock to be held in this context.
        // - Condition 1: The caller acquired the native lock on this thread.
        // - Condition 2: Nothing was recorded for this acquisition.
        // Reason: A handle destroyed under a pending acquire must not stay locked.
        unsafe { mutex.raw.unlock() };
        tracing::debug!(lock = %record.label(), "lock destroyed during acquire");
        self.fail(Error::NotInitialized)
    }

    fn check_order(&self, record: &LockRecord, held: &[Arc<LockRecord>]) -> Result<Acquisition> {
        let Some(other) = detector::find_inversion(record, held) else {
            return Ok(Acquisition::Ordered);
        };
        self.shared.counters.record_lock_order_violation();
        let err = Error::LockOrderViolation {
            acquiring: record.label(),
            held: other.label(),
        };
        self.shared.reporter.report(&err);
        match self.shared.config.on_violation {
            ViolationPolicy::Refuse => Err(err),
            ViolationPolicy::Proceed => Ok(Acquisition::Inverted),
        }
    }

    /// Bookkeeping after the native acquire succeeded.
    fn commit(
        &self,
        record: &Arc<LockRecord>,
        held: &[Arc<LockRecord>],
        outcome: Acquisition,
        tracked: bool,
    ) {
        if tracked && outcome == Acquisition::Ordered {
            if let Err(err) = detector::record_before(record, held) {
                self.shared.counters.record_out_of_memory();
                self.report(&Error::OutOfMemory(format!(
                    "recording order for {}: {err}",
                    record.label()
                )));
            }
        }
        with_hold_context(|ctx| ctx.push(self.domain(), Arc::clone(record), tracked));
        record.record_acquisition();
        self.shared.counters.record_acquisition();
    }
}

// Compile-time check: handles and contexts are shared across threads.
#[allow(dead_code)]
const _: fn() = || {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<TrackedMutex>();
    assert_send_sync::<Locksmith>();
};
