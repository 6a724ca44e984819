use std::sync::atomic::{AtomicBool, Ordering};

/// Non-blocking "at most one at a time" guard over an `AtomicBool`.
///
/// `try_acquire` returns `None` when the flag is already set; the flag is
/// cleared when the guard drops, whatever way the guarded operation ended.
pub struct InProgressGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> InProgressGuard<'a> {
    pub fn try_acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for InProgressGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}
