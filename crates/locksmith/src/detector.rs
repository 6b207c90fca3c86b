//! Lock-order inversion detector.
//!
//! A record's before-set holds the IDs of locks that were held at the
//! moment the record was acquired. For a target lock `T` and the calling
//! thread's held locks `H`: if some `L` in `H` has `T` in its before-set,
//! `T` was once held while `L` was acquired, and this thread now wants
//! `T` while holding `L`. Both orders have been observed; that is an
//! inversion.
//!
//! Only direct edges are recorded. A cycle that only closes through an
//! intermediate lock (A→B, B→C, C→A) is not caught.
//!
//! Before-set updates are serialized per record. Checking and recording
//! are separate steps, so two threads racing the opposite orders for the
//! first time can both pass the check. Such a lost race only weakens
//! detection.

use std::collections::TryReserveError;
use std::sync::Arc;

use crate::registry::LockRecord;

/// Returns the first held lock that was previously acquired while
/// `target` was held.
#[must_use]
pub(crate) fn find_inversion<'a>(
    target: &LockRecord,
    held: &'a [Arc<LockRecord>],
) -> Option<&'a Arc<LockRecord>> {
    held.iter()
        .find(|lock| lock.id() != target.id() && lock.observed_after(target.id()))
}

/// Records every held lock as acquired before `target`.
///
/// The before-set is grown once to cover the largest held ID before any bit
/// is written. Growth happens under the record's own lock, so it never races
/// a concurrent read.
pub(crate) fn record_before(
    target: &LockRecord,
    held: &[Arc<LockRecord>],
) -> Result<(), TryReserveError> {
    let Some(max_id) = held.iter().map(|lock| lock.id()).max() else {
        return Ok(());
    };
    target.with_before(|before| {
        before.grow(max_id + 1)?;
        for lock in held {
            if lock.id() != target.id() {
                before.set(lock.id())?;
            }
        }
        Ok(())
    })
}
