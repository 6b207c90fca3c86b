//! Error reporting sink.
//!
//! Each context holds one callback `(code, message)`. Anomalies are logged
//! through `tracing` first, then handed to the callback. The callback sits
//! in an `ArcSwap`: reporting loads it without taking any lock, and a
//! replacement only affects reports that start after it.

use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::error::Error;

/// Error callback signature: internal error code and rendered message.
pub type ErrorCallback = Arc<dyn Fn(i32, &str) + Send + Sync>;

/// Default sink: one line on the standard diagnostic stream.
pub fn error_cb_to_stderr(code: i32, msg: &str) {
    eprintln!("LOCKSMITH ERROR {code}: {msg}");
}

pub(crate) struct Reporter {
    callback: ArcSwap<ErrorCallback>,
}

impl Reporter {
    pub(crate) fn new() -> Self {
        let callback: ErrorCallback = Arc::new(error_cb_to_stderr);
        Self {
            callback: ArcSwap::from_pointee(callback),
        }
    }

    pub(crate) fn set_callback(&self, callback: ErrorCallback) {
        self.callback.store(Arc::new(callback));
    }

    /// Logs `err` and forwards it to the installed callback.
    pub(crate) fn report(&self, err: &Error) {
        let code = err.code();
        let msg = err.to_string();
        tracing::warn!(code, errno = err.errno(), "{msg}");
        let callback = self.callback.load_full();
        (*callback)(code, &msg);
    }
}

impl std::fmt::Debug for Reporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reporter").finish_non_exhaustive()
    }
}
