//! The semaphore-shaped half of `kwait`: a kernel-managed FIFO/LIFO
//! counter. [`crate::semaphore::Semaphore`] only ever touches this on its
//! slow path, once its own userspace fast-path atomic has gone negative.
//!
//! Implemented once, platform-independently, on `std::sync::{Mutex,
//! Condvar}` rather than per-platform (Mach semaphore / POSIX named
//! semaphore / Win32 semaphore handle) — the spec explicitly allows
//! treating the kernel-semaphore pool as "a lazily-initialized singleton"
//! (spec §9), and a condvar-guarded waiter queue gives the FIFO/LIFO policy
//! real teeth, which a bare OS semaphore handle (always FIFO-ish, platform
//! dependent) would not.

use alloc::collections::VecDeque;
use alloc::sync::Arc;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::kwait::SemaphorePolicy;

struct Parked {
    woken: Mutex<bool>,
    cv: Condvar,
}

struct State {
    /// Signals that arrived with nobody parked to receive them yet.
    banked: u64,
    waiters: VecDeque<Arc<Parked>>,
}

/// A reusable, lazily-created kernel wait primitive backing one
/// [`crate::semaphore::Semaphore`].
pub struct KernelSemaphore {
    policy: SemaphorePolicy,
    state: Mutex<State>,
}

impl KernelSemaphore {
    pub fn new(policy: SemaphorePolicy) -> Self {
        KernelSemaphore {
            policy,
            state: Mutex::new(State {
                banked: 0,
                waiters: VecDeque::new(),
            }),
        }
    }

    /// Wake `n` waiters (or bank the signal if nobody is parked).
    pub fn signal(&self, n: u64) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        for _ in 0..n {
            let next = match self.policy {
                SemaphorePolicy::Fifo => state.waiters.pop_front(),
                SemaphorePolicy::Lifo => state.waiters.pop_back(),
            };
            match next {
                Some(parked) => {
                    *parked.woken.lock().unwrap_or_else(|e| e.into_inner()) = true;
                    parked.cv.notify_one();
                }
                None => state.banked += 1,
            }
        }
    }

    /// Block until a signal arrives or `timeout` elapses. `None` means
    /// wait forever.
    pub fn wait(&self, timeout: Option<Duration>) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.banked > 0 {
            state.banked -= 1;
            return true;
        }
        let parked = Arc::new(Parked {
            woken: Mutex::new(false),
            cv: Condvar::new(),
        });
        state.waiters.push_back(parked.clone());
        drop(state);

        let mut woken = parked.woken.lock().unwrap_or_else(|e| e.into_inner());
        let success = match timeout {
            None => {
                while !*woken {
                    woken = parked.cv.wait(woken).unwrap_or_else(|e| e.into_inner());
                }
                true
            }
            Some(d) => {
                let deadline = Instant::now() + d;
                loop {
                    if *woken {
                        break true;
                    }
                    let now = Instant::now();
                    if now >= deadline {
                        break false;
                    }
                    let (guard, result) = parked
                        .cv
                        .wait_timeout(woken, deadline - now)
                        .unwrap_or_else(|e| e.into_inner());
                    woken = guard;
                    if result.timed_out() && !*woken {
                        break false;
                    }
                }
            }
        };
        drop(woken);

        if !success {
            // We timed out (or were interrupted spuriously into a timeout):
            // remove ourselves so a later `signal` doesn't wake a thread
            // that already left.
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            state.waiters.retain(|p| !Arc::ptr_eq(p, &parked));
        }
        success
    }
}
