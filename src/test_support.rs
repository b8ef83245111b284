//! Shared helpers for tests that touch process-global state.

use std::sync::{Mutex, MutexGuard, OnceLock};

/// Serializes tests that change the working directory or reap children;
/// both are process-wide effects.
pub(crate) fn process_lock() -> MutexGuard<'static, ()> {
    static MUTEX: OnceLock<Mutex<()>> = OnceLock::new();
    MUTEX
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}
