#[cfg(feature = "loom")]
mod imp {
    pub(crate) use loom::sync::{Condvar, Mutex, MutexGuard};
}

#[cfg(not(feature = "loom"))]
mod imp {
    pub(crate) use std::sync::{Condvar, Mutex, MutexGuard};
}

pub(crate) use imp::*;

/// Lock `mutex`, treating poisoning as fatal.
///
/// A worker that panicked mid-pass left the graph's bookkeeping in an
/// unknown state; no other worker may keep consuming from it.
pub(crate) fn lock<'a, T>(mutex: &'a Mutex<T>, op: &str) -> MutexGuard<'a, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(_) => panic!("{op}: graph state poisoned by a panicked worker"),
    }
}

/// Block on `condvar`, treating poisoning as fatal.
pub(crate) fn wait<'a, T>(
    condvar: &Condvar,
    guard: MutexGuard<'a, T>,
    op: &str,
) -> MutexGuard<'a, T> {
    match condvar.wait(guard) {
        Ok(guard) => guard,
        Err(_) => panic!("{op}: graph state poisoned by a panicked worker"),
    }
}
