//! A single-execution barrier: [`OnceGate::call_once`] runs its closure
//! exactly once across any number of racing threads, parking every other
//! caller until that run completes.

use core::sync::atomic::{fence, AtomicUsize, Ordering};

use crate::error::{panic_fatal, FatalError};
use crate::{kwait, low32};

// state encoding (word-sized, matches spec §3's OnceGate):
//   UNSTARTED   = 0
//   RUNNING(id) = id | WAITERS_BIT?   (id has its low bit clear)
//   DONE        = all-ones
const WAITERS_BIT: usize = 0b1;
const DONE: usize = usize::MAX;

/// A once-gate, statically zero-initialized.
///
/// ```
/// use dispatch_core::OnceGate;
///
/// static INIT: OnceGate = OnceGate::new();
/// static mut VALUE: u32 = 0;
///
/// fn get() -> u32 {
///     INIT.call_once(|| unsafe { VALUE = 42 });
///     unsafe { VALUE }
/// }
/// ```
pub struct OnceGate {
    state: AtomicUsize,
}

impl OnceGate {
    /// Create a gate in the not-yet-run state.
    pub const fn new() -> Self {
        OnceGate {
            state: AtomicUsize::new(0),
        }
    }

    /// Whether the initializer has already completed. Lock-free; safe to
    /// call from any thread at any time.
    #[inline]
    pub fn is_completed(&self) -> bool {
        self.state.load(Ordering::Acquire) == DONE
    }

    /// Run `f` exactly once for this gate, across however many threads
    /// call this concurrently. Returns (after `f` has completed at least
    /// once, on any thread) once that run is visible to the caller.
    ///
    /// # Panics
    /// If a thread re-enters `call_once` on the same gate from inside its
    /// own initializer (directly or through a nested call), this is a
    /// fatal recursive-lock error (spec §4.2): the gate can never
    /// complete, so there is no safe way to return.
    #[inline]
    pub fn call_once(&self, f: impl FnOnce()) {
        if self.state.load(Ordering::Acquire) == DONE {
            return;
        }
        self.call_once_slow(f);
    }

    #[cold]
    fn call_once_slow(&self, f: impl FnOnce()) {
        let id = thread_token();
        match self
            .state
            .compare_exchange(0, id, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => {
                #[cfg(feature = "log")]
                log::trace!("dispatch_core: once-gate: running initializer");
                f();
                let prior = self.state.swap(DONE, Ordering::Release);
                if prior & WAITERS_BIT != 0 {
                    kwait::wake_all(low32(&self.state));
                }
            }
            Err(mut current) => {
                loop {
                    if current == DONE {
                        fence(Ordering::Acquire);
                        return;
                    }
                    if current & !WAITERS_BIT == id {
                        panic_fatal(FatalError::RecursiveOnce);
                    }
                    let with_waiters = current | WAITERS_BIT;
                    if current != with_waiters {
                        match self.state.compare_exchange(
                            current,
                            with_waiters,
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        ) {
                            Ok(_) => current = with_waiters,
                            Err(actual) => {
                                current = actual;
                                continue;
                            }
                        }
                    }
                    #[cfg(feature = "log")]
                    log::trace!("dispatch_core: once-gate: waiting for initializer");
                    kwait::wait(low32(&self.state), with_waiters as u32, None);
                    current = self.state.load(Ordering::Acquire);
                }
            }
        }
    }
}

impl Default for OnceGate {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "std")]
fn thread_token() -> usize {
    #[repr(align(4))]
    struct Token(u8);
    std::thread_local! {
        static TOKEN: Token = Token(0);
    }
    TOKEN.with(|t| t as *const Token as usize)
}

// Without `std` there is no portable per-thread storage to derive a stable
// identity from. Every slow-path call gets a fresh id instead: the gate
// itself stays correct (a loser's `current` never accidentally matches a
// later caller's `id`), but the recursive-entry fatal check in
// `call_once_slow` can no longer fire, since a thread re-entering from
// inside its own initializer will simply mint a new, different id.
#[cfg(not(feature = "std"))]
fn thread_token() -> usize {
    static COUNTER: AtomicUsize = AtomicUsize::new(4);
    COUNTER.fetch_add(4, Ordering::Relaxed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::thread;

    #[test]
    fn runs_once_across_racing_threads() {
        static GATE: OnceGate = OnceGate::new();
        static COUNTER: AtomicU32 = AtomicU32::new(0);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                thread::spawn(|| {
                    GATE.call_once(|| {
                        COUNTER.fetch_add(1, Ordering::SeqCst);
                    });
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(COUNTER.load(Ordering::SeqCst), 1);
        assert!(GATE.is_completed());
    }

    #[test]
    fn fast_path_after_completion_does_not_rerun() {
        let gate = OnceGate::new();
        let mut calls = 0;
        gate.call_once(|| calls += 1);
        gate.call_once(|| calls += 1);
        assert_eq!(calls, 1);
    }

    #[test]
    #[should_panic(expected = "recursive")]
    fn recursive_entry_is_fatal() {
        let gate = OnceGate::new();
        gate.call_once(|| {
            gate.call_once(|| {});
        });
    }
}
