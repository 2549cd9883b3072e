//! Shared helpers for integration tests.

use once_cell::sync::Lazy;
use parking_lot::{Mutex, MutexGuard};

static RUNTIME_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

/// Serializes tests that drive the process-wide runtime. Hold the guard for
/// the whole test; the runtime is a singleton.
pub fn runtime_guard() -> MutexGuard<'static, ()> {
    RUNTIME_LOCK.lock()
}
