//! Error taxonomy for lock tracking.
//!
//! Every variant carries a stable internal code (`Error::code`) and an
//! OS-style errno (`Error::errno`) so native mutex call sites can keep
//! their `0 / errno` conventions.

use thiserror::Error;

/// Locksmith error type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Allocation failed while growing the registry or creating a record.
    #[error("out of memory: {0}")]
    OutOfMemory(String),

    /// `init` on a handle that is already bound to a lock record.
    #[error("mutex {name} has already been initialized")]
    CreateWhileInUse {
        /// Diagnostic name passed to the rejected `init`.
        name: String,
    },

    /// Operation on a handle that was never successfully initialized.
    #[error("mutex has not been initialized")]
    NotInitialized,

    /// Acquiring `acquiring` while holding `held` contradicts an order
    /// observed earlier.
    #[error(
        "lock order inversion: acquiring {acquiring} while holding {held}, \
         but {held} was previously acquired after {acquiring}"
    )]
    LockOrderViolation {
        /// Lock being acquired.
        acquiring: String,
        /// Lock already held by the calling thread.
        held: String,
    },

    /// Unlock does not match the most recent acquisition on this thread.
    #[error("release order violation: unlocking {released} but {expected} was locked more recently")]
    ReleaseOrderViolation {
        /// Lock being released.
        released: String,
        /// Lock at the top of the thread's hold context.
        expected: String,
    },

    /// Destroy attempted on a lock that is currently held.
    #[error("cannot destroy {0} while it is locked")]
    DestroyWhileLocked(String),

    /// Timed acquisition deadline elapsed.
    #[error("timed out waiting for {0}")]
    TimedOut(String),

    /// Non-blocking acquisition found the lock already held.
    #[error("{0} is already locked")]
    WouldBlock(String),

    /// Destination buffer cannot hold the rendered text.
    #[error("buffer too small: need {needed} bytes, have {available}")]
    BufferTooSmall {
        /// Bytes required.
        needed: usize,
        /// Bytes available.
        available: usize,
    },

    /// Formatting failed unexpectedly.
    #[error("encoding failure")]
    EncodingFailure,

    /// Unlock from a thread that does not hold the lock.
    #[error("{0} is not held by the calling thread")]
    NotOwner(String),

    /// Blocking relock of an error-checking mutex by its owner.
    #[error("{0} is already held by the calling thread")]
    SelfDeadlock(String),
}

impl Error {
    /// Stable internal error code.
    #[must_use]
    pub const fn code(&self) -> i32 {
        match self {
            Self::OutOfMemory(_) => 1,
            Self::CreateWhileInUse { .. } => 2,
            Self::NotInitialized => 3,
            Self::LockOrderViolation { .. } => 4,
            Self::ReleaseOrderViolation { .. } => 5,
            Self::DestroyWhileLocked(_) => 6,
            Self::TimedOut(_) => 7,
            Self::WouldBlock(_) => 8,
            Self::BufferTooSmall { .. } => 9,
            Self::EncodingFailure => 10,
            Self::NotOwner(_) => 11,
            Self::SelfDeadlock(_) => 12,
        }
    }

    /// Conventional errno value for native mutex call sites.
    #[must_use]
    pub const fn errno(&self) -> i32 {
        match self {
            Self::OutOfMemory(_) => libc::ENOMEM,
            Self::CreateWhileInUse { .. } | Self::DestroyWhileLocked(_) | Self::WouldBlock(_) => {
                libc::EBUSY
            }
            Self::NotInitialized => libc::EINVAL,
            Self::LockOrderViolation { .. } | Self::SelfDeadlock(_) => libc::EDEADLK,
            Self::ReleaseOrderViolation { .. } | Self::NotOwner(_) => libc::EPERM,
            Self::TimedOut(_) => libc::ETIMEDOUT,
            Self::BufferTooSmall { .. } => libc::ENAMETOOLONG,
            Self::EncodingFailure => libc::EIO,
        }
    }
}

/// Result type alias for locksmith operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Maps a result to the `0 / errno` convention of native mutex calls.
#[must_use]
pub fn errno_status<T>(result: &Result<T>) -> i32 {
    match result {
        Ok(_) => 0,
        Err(err) => err.errno(),
    }
}
