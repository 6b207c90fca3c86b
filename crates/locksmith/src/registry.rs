//! Lock registry: directory of live lock records indexed by small IDs.
//!
//! IDs are allocated first-fit from a used-ID bit-vector, so a destroyed
//! lock's ID is handed out again before the ID space grows. All registry
//! mutation runs under one internal mutex. That mutex only ever guards
//! bounded bookkeeping and is never held across a native acquire.
//!
//! Lock order inside this module: registry mutex, then a record's
//! before-set mutex. The detector takes before-set mutexes alone, one at a
//! time, so the two paths cannot deadlock.

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::bitfield::BitField;
use crate::error::{Error, Result};
use crate::mutex::MutexKind;

/// One live tracked mutex.
pub struct LockRecord {
    id: usize,
    domain: u64,
    name: Option<String>,
    kind: MutexKind,
    acquisitions: AtomicU64,
    registry: Weak<Registry>,
    /// Bit `j` set: lock `j` was held when this lock was acquired.
    before: Mutex<BitField>,
}

impl LockRecord {
    /// Registry-assigned ID, unique among live records.
    #[inline]
    #[must_use]
    pub fn id(&self) -> usize {
        self.id
    }

    /// Diagnostic name given at init.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Native attributes the lock was initialized with.
    #[must_use]
    pub fn kind(&self) -> MutexKind {
        self.kind
    }

    /// Successful acquisitions so far.
    #[must_use]
    pub fn acquisitions(&self) -> u64 {
        self.acquisitions.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn domain(&self) -> u64 {
        self.domain
    }

    /// Owning registry, if it is still alive.
    pub(crate) fn registry(&self) -> Option<Arc<Registry>> {
        self.registry.upgrade()
    }

    #[inline]
    pub(crate) fn record_acquisition(&self) {
        self.acquisitions.fetch_add(1, Ordering::Relaxed);
    }

    /// Whether `other` was ever observed held when this lock was acquired.
    #[must_use]
    pub fn observed_after(&self, other: usize) -> bool {
        self.before.lock().test(other)
    }

    /// Current before-set capacity in bits.
    #[must_use]
    pub fn before_capacity(&self) -> usize {
        self.before.lock().capacity()
    }

    /// Runs `f` with the before-set locked.
    pub(crate) fn with_before<R>(&self, f: impl FnOnce(&mut BitField) -> R) -> R {
        f(&mut self.before.lock())
    }

    /// Label used in diagnostics: `name(id)` or `#id`.
    #[must_use]
    pub fn label(&self) -> String {
        match &self.name {
            Some(name) => format!("{name}({})", self.id),
            None => format!("#{}", self.id),
        }
    }
}

impl fmt::Debug for LockRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockRecord")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("acquisitions", &self.acquisitions())
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
struct RegistryInner {
    slots: Vec<Option<Arc<LockRecord>>>,
    /// One bit per slot; capacity always equals `slots.len()`.
    used: BitField,
}

impl RegistryInner {
    /// Lowest free ID, or the next ID past the end when all are in use.
    fn next_free_id(&self) -> usize {
        self.used.first_clear().unwrap_or(self.slots.len())
    }

    /// Marks `id` used, growing `slots` and `used` together when `id` lies
    /// past the end. Leaves everything untouched on allocation failure.
    fn allocate_id(&mut self, id: usize) -> Result<()> {
        if id >= self.slots.len() {
            let new_len = id + 1;
            self.slots
                .try_reserve(new_len - self.slots.len())
                .map_err(|e| Error::OutOfMemory(format!("growing lock slots: {e}")))?;
            self.used
                .grow(new_len)
                .map_err(|e| Error::OutOfMemory(format!("growing used-ID map: {e}")))?;
            self.slots.resize(new_len, None);
        }
        self.used
            .set(id)
            .map_err(|e| Error::OutOfMemory(format!("marking lock ID {id}: {e}")))
    }

    /// Frees `id` and scrubs it from every live before-set so a future
    /// owner of the ID starts with no recorded edges.
    fn release_id(&mut self, id: usize) -> Option<Arc<LockRecord>> {
        if !self.used.test(id) {
            return None;
        }
        self.used.clear(id);
        let record = self.slots.get_mut(id).and_then(Option::take);
        for live in self.slots.iter().flatten() {
            live.with_before(|before| before.clear(id));
        }
        record
    }
}

/// Process- or context-wide lock directory.
pub(crate) struct Registry {
    inner: Mutex<RegistryInner>,
    before_min: usize,
    max_locks: usize,
    /// IDs kept out of circulation because their handle was dropped locked.
    retired: AtomicUsize,
}

impl Registry {
    pub(crate) fn new(before_min: usize, max_locks: usize) -> Self {
        Self {
            inner: Mutex::new(RegistryInner::default()),
            before_min: before_min.max(1),
            max_locks,
            retired: AtomicUsize::new(0),
        }
    }

    /// Allocates an ID and a fresh record for it.
    ///
    /// Fails with `OutOfMemory` when the ID cap is reached or an allocation
    /// fails; in both cases no registry state changes.
    pub(crate) fn register(
        self: &Arc<Self>,
        domain: u64,
        name: Option<&str>,
        kind: MutexKind,
    ) -> Result<Arc<LockRecord>> {
        let mut inner = self.inner.lock();
        let id = inner.next_free_id();
        if id >= self.max_locks {
            return Err(Error::OutOfMemory(format!(
                "lock ID limit of {} reached",
                self.max_locks
            )));
        }
        let before = BitField::with_capacity(self.before_min.max(inner.slots.len()))
            .map_err(|e| Error::OutOfMemory(format!("allocating before-set: {e}")))?;
        inner.allocate_id(id)?;
        let record = Arc::new(LockRecord {
            id,
            domain,
            name: name.map(str::to_owned),
            kind,
            acquisitions: AtomicU64::new(0),
            registry: Arc::downgrade(self),
            before: Mutex::new(before),
        });
        inner.slots[id] = Some(Arc::clone(&record));
        Ok(record)
    }

    /// Releases `record`'s ID if the slot still belongs to it.
    pub(crate) fn release(&self, record: &Arc<LockRecord>) -> bool {
        let mut inner = self.inner.lock();
        let owned = inner
            .slots
            .get(record.id)
            .and_then(Option::as_ref)
            .is_some_and(|live| Arc::ptr_eq(live, record));
        owned && inner.release_id(record.id).is_some()
    }

    /// Leaves `record`'s ID allocated for good and counts it.
    pub(crate) fn retire(&self, record: &LockRecord) {
        let retired = self.retired.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::warn!(lock = %record.label(), retired, "lock ID retired");
    }

    pub(crate) fn retired(&self) -> usize {
        self.retired.load(Ordering::Relaxed)
    }

    pub(crate) fn get(&self, id: usize) -> Option<Arc<LockRecord>> {
        self.inner.lock().slots.get(id).cloned().flatten()
    }

    /// IDs of all live records, ascending.
    pub(crate) fn live_ids(&self) -> Vec<usize> {
        self.inner.lock().used.ones().collect()
    }

    pub(crate) fn live_count(&self) -> usize {
        self.inner.lock().used.count_ones()
    }

    /// Size of the ID space (slots ever allocated).
    pub(crate) fn capacity(&self) -> usize {
        self.inner.lock().slots.len()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("live", &self.live_count())
            .field("before_min", &self.before_min)
            .field("max_locks", &self.max_locks)
            .field("retired", &self.retired())
            .finish_non_exhaustive()
    }
}
