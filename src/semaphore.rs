//! A classic counting semaphore: a userspace atomic fast path, a kernel
//! semaphore slow path created lazily the first time anyone actually has
//! to block.

use alloc::boxed::Box;
use core::fmt;
use core::ptr;
use core::sync::atomic::{AtomicIsize, AtomicPtr, Ordering};

use crate::error::{panic_fatal, FatalError};
use crate::kwait::{KernelSemaphore, SemaphorePolicy};
use crate::time::{Timeout, WaitResult};

/// A counting semaphore backed by a kernel wait primitive on the slow
/// path.
///
/// `value` may go negative; its magnitude then counts blocked waiters.
/// `orig` is the creation-time count and never changes; it's what
/// [`Drop`] checks to catch a semaphore destroyed while still in use.
pub struct Semaphore {
    value: AtomicIsize,
    orig: isize,
    // Lazily allocated: most semaphores are only ever touched on the fast
    // path and never need a kernel primitive at all. Guarded by a plain
    // CAS rather than `OnceGate` to avoid this module depending on `once`.
    ksem: AtomicPtr<KernelSemaphore>,
}

impl Semaphore {
    /// Create a semaphore with `value` permits available. Returns `None`
    /// if `value < 0` — a negative starting count has no sensible
    /// meaning (it would claim waiters exist before anyone waited).
    pub fn new(value: isize) -> Option<Self> {
        if value < 0 {
            return None;
        }
        Some(Semaphore {
            value: AtomicIsize::new(value),
            orig: value,
            ksem: AtomicPtr::new(ptr::null_mut()),
        })
    }

    /// Current permit count, for diagnostics. A negative reading means
    /// `-value` threads are blocked in [`Semaphore::wait`]. Racy the
    /// instant it's read; useful only as a snapshot.
    pub fn value(&self) -> isize {
        self.value.load(Ordering::Relaxed)
    }

    fn ksem(&self) -> &KernelSemaphore {
        let mut ptr = self.ksem.load(Ordering::Acquire);
        if ptr.is_null() {
            let new = Box::into_raw(Box::new(KernelSemaphore::new(SemaphorePolicy::Fifo)));
            match self.ksem.compare_exchange(
                ptr::null_mut(),
                new,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => ptr = new,
                Err(actual) => {
                    // Lost the race to create it; drop our own attempt and
                    // use the winner's.
                    unsafe {
                        drop(Box::from_raw(new));
                    }
                    ptr = actual;
                }
            }
        }
        unsafe { &*ptr }
    }

    /// Release one permit. Returns `true` if a waiter was woken, `false`
    /// if the permit was simply banked for a future [`Semaphore::wait`].
    ///
    /// # Panics
    /// If the permit count overflows (far more signals than any matching
    /// waits could account for), this is a fatal unbalanced-signal error.
    pub fn signal(&self) -> bool {
        let new = self.value.fetch_add(1, Ordering::Release) + 1;
        if new > 0 {
            return false;
        }
        if new == isize::MIN {
            panic_fatal(FatalError::UnbalancedSignal);
        }
        #[cfg(feature = "log")]
        log::trace!("dispatch_core: semaphore: waking via kernel semaphore");
        self.ksem().signal(1);
        true
    }

    /// Acquire one permit, blocking for at most `timeout`.
    pub fn wait(&self, timeout: Timeout) -> WaitResult {
        let new = self.value.fetch_sub(1, Ordering::Acquire) - 1;
        if new >= 0 {
            return WaitResult::Success;
        }
        self.wait_slow(timeout)
    }

    #[cold]
    fn wait_slow(&self, timeout: Timeout) -> WaitResult {
        let ksem = self.ksem();
        match timeout {
            Timeout::Forever => {
                ksem.wait(None);
                WaitResult::Success
            }
            Timeout::Now => {
                if self.undo_decrement() {
                    return WaitResult::TimedOut;
                }
                // A signal landed between our decrement and the undo CAS
                // failing; it already posted to the kernel semaphore for
                // us, so drain it to stay balanced.
                ksem.wait(None);
                WaitResult::Success
            }
            Timeout::After(d) => {
                if ksem.wait(Some(d)) {
                    return WaitResult::Success;
                }
                if self.undo_decrement() {
                    return WaitResult::TimedOut;
                }
                ksem.wait(None);
                WaitResult::Success
            }
        }
    }

    /// Try to CAS `value` back up by one, undoing the fast-path decrement.
    /// Returns `true` if the undo succeeded (no signal arrived), `false`
    /// if a concurrent `signal` beat us to it.
    fn undo_decrement(&self) -> bool {
        let mut current = self.value.load(Ordering::Relaxed);
        loop {
            if current >= 0 {
                return false;
            }
            match self.value.compare_exchange_weak(
                current,
                current + 1,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        if self.value.load(Ordering::Relaxed) < self.orig {
            panic_fatal(FatalError::SemaphoreInUse);
        }
        let ptr = *self.ksem.get_mut();
        if !ptr.is_null() {
            unsafe {
                drop(Box::from_raw(ptr));
            }
        }
    }
}

impl fmt::Debug for Semaphore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Semaphore")
            .field("value", &self.value.load(Ordering::Relaxed))
            .field("orig", &self.orig)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    #[test]
    fn rejects_negative_initial_value() {
        assert!(Semaphore::new(-1).is_none());
    }

    #[test]
    fn fast_path_does_not_block() {
        let sem = Semaphore::new(1).unwrap();
        assert_eq!(sem.wait(Timeout::Forever), WaitResult::Success);
        assert_eq!(sem.value(), 0);
    }

    #[test]
    fn wait_now_times_out_on_empty_semaphore() {
        let sem = Semaphore::new(0).unwrap();
        assert_eq!(sem.wait(Timeout::Now), WaitResult::TimedOut);
        assert_eq!(sem.value(), 0);
    }

    #[test]
    fn wait_with_timeout_expires() {
        let sem = Semaphore::new(0).unwrap();
        let start = Instant::now();
        assert_eq!(
            sem.wait(Timeout::After(Duration::from_millis(20))),
            WaitResult::TimedOut
        );
        assert!(start.elapsed() >= Duration::from_millis(20));
        assert_eq!(sem.value(), 0);
    }

    #[test]
    fn producer_consumer_wakes_waiter() {
        let sem = Arc::new(Semaphore::new(0).unwrap());
        let sem2 = sem.clone();
        let start = Instant::now();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(15));
            sem2.signal()
        });
        assert_eq!(sem.wait(Timeout::Forever), WaitResult::Success);
        assert!(start.elapsed() >= Duration::from_millis(15));
        assert!(handle.join().unwrap());
    }

    #[test]
    #[should_panic(expected = "in use")]
    fn destroying_in_use_semaphore_is_fatal() {
        let sem = Semaphore::new(1).unwrap();
        sem.wait(Timeout::Now);
        drop(sem);
    }
}
