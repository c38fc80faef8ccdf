//! Portable fallback backend for any Unix without a dedicated fast path
//! above (or any platform when built with `feature = "fallback"`).
//!
//! The teacher crate's own posix fallback stashes a pointer to a
//! stack-local parker in the unused high bits of the pointer-sized atomic
//! it waits on. [`Futex`] here is implemented once for a plain `AtomicU32`
//! shared by every backend, so there are no spare bits to stash a pointer
//! in; instead this keeps a small process-global table, keyed by the
//! waited-on address, of the threads parked there — the same role the
//! teacher's embedded pointer plays, just out-of-line. Each entry is a
//! `Mutex`+`Condvar` pair, which is what the teacher's own posix backend
//! waits on under the hood (`pthread_cond_wait`/`pthread_cond_timedwait`).

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::kwait::{Futex, WakeupReason};

struct Parked {
    woken: Mutex<bool>,
    cv: Condvar,
}

type Table = BTreeMap<usize, Vec<Arc<Parked>>>;

static TABLE: Mutex<Option<Table>> = Mutex::new(None);

fn with_table<R>(f: impl FnOnce(&mut Table) -> R) -> R {
    let mut guard = TABLE.lock().unwrap_or_else(|e| e.into_inner());
    f(guard.get_or_insert_with(BTreeMap::new))
}

fn key_of(word: &AtomicU32) -> usize {
    word as *const AtomicU32 as usize
}

fn deregister(word: &AtomicU32, me: &Arc<Parked>) {
    with_table(|table| {
        if let Some(v) = table.get_mut(&key_of(word)) {
            v.retain(|p| !Arc::ptr_eq(p, me));
            if v.is_empty() {
                table.remove(&key_of(word));
            }
        }
    });
}

impl Futex for AtomicU32 {
    fn futex_wait(&self, expected: u32, timeout: Option<Duration>) -> WakeupReason {
        if self.load(Ordering::SeqCst) != expected {
            return WakeupReason::NoMatch;
        }
        let parked = Arc::new(Parked {
            woken: Mutex::new(false),
            cv: Condvar::new(),
        });
        with_table(|table| table.entry(key_of(self)).or_default().push(parked.clone()));

        // A wake could have arrived between the first load and registering
        // in the table; re-check before committing to sleep.
        if self.load(Ordering::SeqCst) != expected {
            deregister(self, &parked);
            return WakeupReason::NoMatch;
        }

        let mut woken = parked.woken.lock().unwrap_or_else(|e| e.into_inner());
        let reason = match timeout {
            None => {
                while !*woken {
                    woken = parked
                        .cv
                        .wait(woken)
                        .unwrap_or_else(|e| e.into_inner());
                }
                WakeupReason::WokenUp
            }
            Some(d) => {
                let deadline = Instant::now() + d;
                loop {
                    if *woken {
                        break WakeupReason::WokenUp;
                    }
                    let now = Instant::now();
                    if now >= deadline {
                        break WakeupReason::TimedOut;
                    }
                    let (guard, result) = parked
                        .cv
                        .wait_timeout(woken, deadline - now)
                        .unwrap_or_else(|e| e.into_inner());
                    woken = guard;
                    if result.timed_out() && !*woken {
                        break WakeupReason::TimedOut;
                    }
                }
            }
        };
        drop(woken);
        deregister(self, &parked);
        reason
    }

    fn futex_wake(&self) -> usize {
        let waiters = with_table(|table| table.remove(&key_of(self)).unwrap_or_default());
        for parked in &waiters {
            *parked.woken.lock().unwrap_or_else(|e| e.into_inner()) = true;
            parked.cv.notify_all();
        }
        waiters.len()
    }
}
