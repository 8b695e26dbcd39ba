use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a short critical section, recovering the data if a holder panicked.
///
/// Guards from this helper must never be held across an `.await`.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
