//! Converter guard: arbitrates concurrent access to a single converter
//! kind so thread-unsafe converters never run concurrently with anything
//! else, while thread-safe converters can run in parallel with each other.

use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::RwLock;

/// Thread-safe converters spin until no exclusive waiter is pending, then
/// take a shared read lock. Non-thread-safe converters register as a
/// pending waiter first (so no new thread-safe reader can starve them
/// indefinitely), then take the exclusive write lock.
#[derive(Default)]
pub struct ConverterGuard {
    lock: RwLock<()>,
    pending_writers: AtomicUsize,
}

/// Held for the duration of one converter call; dropping it releases the
/// lock and, for the exclusive case, is irrelevant since the pending
/// count was already decremented once the write lock was acquired.
pub enum ConverterGuardHandle<'a> {
    Shared(parking_lot::RwLockReadGuard<'a, ()>),
    Exclusive(parking_lot::RwLockWriteGuard<'a, ()>),
}

impl ConverterGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enter(&self, thread_safe: bool) -> ConverterGuardHandle<'_> {
        if thread_safe {
            loop {
                if self.pending_writers.load(Ordering::Acquire) == 0 {
                    if let Some(guard) = self.lock.try_read() {
                        return ConverterGuardHandle::Shared(guard);
                    }
                }
                std::thread::yield_now();
            }
        } else {
            self.pending_writers.fetch_add(1, Ordering::AcqRel);
            let guard = self.lock.write();
            self.pending_writers.fetch_sub(1, Ordering::AcqRel);
            ConverterGuardHandle::Exclusive(guard)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn shared_entries_can_coexist() {
        let guard = Arc::new(ConverterGuard::new());
        let _a = guard.enter(true);
        let _b = guard.enter(true);
    }

    #[test]
    fn exclusive_entry_excludes_further_access() {
        let guard = ConverterGuard::new();
        let handle = guard.enter(false);
        assert!(matches!(handle, ConverterGuardHandle::Exclusive(_)));
    }
}
