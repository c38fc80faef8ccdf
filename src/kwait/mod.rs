//! Kernel-wait abstraction.
//!
//! Two shapes, per spec §4.1:
//!
//! * address-based: [`wait`]/[`wake_all`] park and unpark threads on a
//!   32-bit word, backed directly by the platform's futex-like syscall.
//!   Used by [`crate::once::OnceGate`] and [`crate::group::Group::wait`].
//! * semaphore-based: [`KernelSemaphore`], a kernel-managed FIFO/LIFO
//!   counter. Used by [`crate::semaphore::Semaphore`]'s slow path.
//!
//! A successful wake happens-before the matching wait returning
//! [`WakeupReason::WokenUp`]; callers establish the protected invariant by
//! writing the state word with `Release` before calling a wake function.

use core::sync::atomic::AtomicU32;
use core::time::Duration;

#[cfg(feature = "std")]
mod condvar_sem;
#[cfg(feature = "std")]
pub use condvar_sem::KernelSemaphore;

#[cfg(all(any(target_os = "linux", target_os = "android"), not(feature = "fallback")))]
#[path = "linux.rs"]
mod backend;

#[cfg(all(any(target_os = "macos", target_os = "ios"), not(feature = "fallback")))]
#[path = "darwin.rs"]
mod backend;

#[cfg(all(windows, not(feature = "fallback")))]
#[path = "windows.rs"]
mod backend;

#[cfg(all(
    feature = "std",
    any(
        all(unix, feature = "fallback"),
        all(
            unix,
            not(any(
                target_os = "linux",
                target_os = "android",
                target_os = "macos",
                target_os = "ios"
            ))
        )
    )
))]
#[path = "posix.rs"]
mod backend;

/// Reason the backend gave for a wait returning. Informational only —
/// callers must re-check their own condition regardless, since several
/// platforms cannot reliably distinguish a spurious wakeup from a real one.
#[allow(dead_code)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WakeupReason {
    /// The word did not hold `expected`; the thread never parked.
    NoMatch,
    /// The timeout elapsed before a wake arrived.
    TimedOut,
    /// An OS-level interrupt returned the thread early.
    Interrupt,
    /// A `wake` call woke this thread.
    WokenUp,
    /// May be a real wake or may not be; the platform can't tell.
    Unknown,
}

/// Implemented by exactly one platform backend module for `AtomicU32`,
/// selected at compile time through `cfg`.
pub(crate) trait Futex {
    /// Atomically check `*self == expected` and, if so, park the calling
    /// thread until woken or `timeout` elapses. Does not loop over
    /// spurious wakeups; callers re-check and re-call.
    fn futex_wait(&self, expected: u32, timeout: Option<Duration>) -> WakeupReason;

    /// Wake every thread parked on `self`. Returns the number of threads
    /// woken where the backend can report it, 0 otherwise.
    fn futex_wake(&self) -> usize;
}

/// Park the calling thread while `word == expected`, or until `timeout`
/// elapses. Spurious wakeups are possible; re-check the caller's own
/// condition after this returns.
#[inline]
pub(crate) fn wait(word: &AtomicU32, expected: u32, timeout: Option<Duration>) -> WakeupReason {
    word.futex_wait(expected, timeout)
}

/// Wake every thread parked on `word`.
#[inline]
pub(crate) fn wake_all(word: &AtomicU32) -> usize {
    word.futex_wake()
}

/// FIFO or LIFO ordering for [`KernelSemaphore`]'s waiter queue. Dispatch
/// queues default to FIFO; a LIFO policy trades fairness for cache locality
/// when the most-recently-parked waiter is likely still warm.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SemaphorePolicy {
    Fifo,
    Lifo,
}
