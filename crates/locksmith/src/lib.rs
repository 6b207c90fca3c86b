//! # Locksmith
//!
//! Runtime lock-order verification for mutexes.
//!
//! Locksmith wraps the lifecycle of a mutex (init, lock, try-lock,
//! timed-lock, unlock, destroy) and learns, online, which locks each lock
//! has been acquired after. When a thread is about to take two locks in
//! the opposite order of one already observed, the inversion is reported
//! before it can become a deadlock.
//!
//! ## Quick Start
//!
//! ```rust
//! use locksmith::{Error, Locksmith, LocksmithConfig, MutexAttrs, TrackedMutex};
//!
//! let ls = Locksmith::new(LocksmithConfig::default());
//! let (a, b) = (TrackedMutex::new(), TrackedMutex::new());
//! ls.init(Some("a"), &a, MutexAttrs::default())?;
//! ls.init(Some("b"), &b, MutexAttrs::default())?;
//!
//! // a before b
//! let _ = ls.lock(&a)?;
//! let _ = ls.lock(&b)?;
//! let _ = ls.unlock(&b)?;
//! let _ = ls.unlock(&a)?;
//!
//! // b before a is now an inversion
//! let _ = ls.lock(&b)?;
//! assert!(matches!(ls.lock(&a), Err(Error::LockOrderViolation { .. })));
//! let _ = ls.unlock(&b)?;
//! # Ok::<(), Error>(())
//! ```
//!
//! Every anomaly is returned to the caller and also handed to the
//! context's error callback (stderr by default). Nothing here aborts the
//! process.

#![warn(missing_docs)]
#![cfg_attr(
    test,
    allow(
        clippy::doc_markdown,
        clippy::uninlined_format_args,
        clippy::manual_assert
    )
)]

pub mod bitfield;
pub mod config;
mod counters;
mod detector;
pub mod error;
mod hold;
#[cfg(test)]
mod hold_tests;
pub mod mutex;
pub mod registry;
pub mod report;
pub mod version;

use std::time::Instant;

pub use bitfield::BitField;
pub use config::{ConfigError, LocksmithConfig, ViolationPolicy};
pub use counters::CounterSnapshot;
pub use error::{errno_status, Error, Result};
pub use mutex::{Acquisition, Locksmith, MutexAttrs, MutexKind, Release, TrackedMutex};
pub use registry::LockRecord;
pub use report::{error_cb_to_stderr, ErrorCallback};
pub use version::{Version, API_VERSION};

/// Packed API version (`major << 16 | minor`).
#[must_use]
pub fn get_version() -> u32 {
    API_VERSION.pack()
}

/// Renders a packed version as `"<major>.<minor>"` into `buf`.
///
/// See [`version::render`]. Failures are also reported through the global
/// error callback.
pub fn version_to_str(code: u32, buf: &mut [u8]) -> Result<usize> {
    version::render(code, buf).inspect_err(|err| Locksmith::global().report(err))
}

/// Replaces the global context's error callback.
pub fn set_error_callback(callback: impl Fn(i32, &str) + Send + Sync + 'static) {
    Locksmith::global().set_error_callback(callback);
}

/// [`Locksmith::init`] on the global context.
pub fn mutex_init(name: Option<&str>, mutex: &TrackedMutex, attrs: MutexAttrs) -> Result<()> {
    Locksmith::global().init(name, mutex, attrs)
}

/// [`Locksmith::lock`] on the global context.
pub fn mutex_lock(mutex: &TrackedMutex) -> Result<Acquisition> {
    Locksmith::global().lock(mutex)
}

/// [`Locksmith::try_lock`] on the global context.
pub fn mutex_trylock(mutex: &TrackedMutex, bypass: bool) -> Result<Acquisition> {
    Locksmith::global().try_lock(mutex, bypass)
}

/// [`Locksmith::timed_lock`] on the global context.
pub fn mutex_timedlock(mutex: &TrackedMutex, deadline: Instant) -> Result<Acquisition> {
    Locksmith::global().timed_lock(mutex, deadline)
}

/// [`Locksmith::unlock`] on the global context.
pub fn mutex_unlock(mutex: &TrackedMutex) -> Result<Release> {
    Locksmith::global().unlock(mutex)
}

/// [`Locksmith::destroy`] on the global context.
pub fn mutex_destroy(mutex: &TrackedMutex) -> Result<()> {
    Locksmith::global().destroy(mutex)
}
