use std::sync::{Mutex, MutexGuard};

use tracing::warn;

/// Lock `lock`, recovering the guard if another thread panicked while holding it.
///
/// The memory backend only stores self-contained byte strings, so a poisoned
/// guard still holds a usable map.
pub(crate) fn mutex_lock<'a, T>(
    lock: &'a Mutex<T>,
    backend: &'static str,
    op: &'static str,
) -> MutexGuard<'a, T> {
    match lock.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!(
                op,
                backend,
                lock_kind = "mutex.lock",
                result = "poisoned_recovered",
                hint = "entries written by the panicking thread may be missing",
                "Recovered from poisoned storage lock"
            );
            poisoned.into_inner()
        }
    }
}
