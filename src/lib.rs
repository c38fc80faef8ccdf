//! Lock-minimal once-gate, counting semaphore and task-group primitives.
//!
//! These three types share one pattern: a packed atomic state word mutated
//! only by compare-and-swap, with a kernel-level wait/wake primitive used
//! purely as the slow path under contention. The fast path never touches
//! the kernel; the slow path is specified in [`kwait`].
//!
//! Dispatch queues, work-item scheduling and object allocation live outside
//! this crate. A task [`group::Group`] is generic over a
//! [`group::QueueSubmitter`] collaborator so it can be wired up to whatever
//! queue implementation a caller has, without this crate knowing about
//! queues itself.
#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

pub mod error;
pub mod group;
pub mod kwait;
pub mod once;
// `Semaphore`'s slow path is backed by `kwait::KernelSemaphore`, which is
// itself only implemented on top of `std::sync::{Mutex, Condvar}` (see
// `kwait/condvar_sem.rs`) — there is no portable no_std kernel-semaphore
// primitive to fall back to, so the whole module requires `std`.
#[cfg(feature = "std")]
pub mod semaphore;
pub mod time;

pub use error::FatalError;
pub use group::{Group, QueueSubmitter};
pub use once::OnceGate;
#[cfg(feature = "std")]
pub use semaphore::Semaphore;
pub use time::{Timeout, WaitResult};

use core::sync::atomic::{AtomicU32, AtomicUsize};

// View the low 32 bits of a pointer-sized atomic as an `AtomicU32`, the
// sub-word kernel wait primitives (futex, ulock, `WaitOnAddress`) actually
// compare. Only the half that starts at the same address as the full atomic
// may be used this way, hence the endianness split.
#[cfg(all(target_pointer_width = "64", target_endian = "little"))]
#[inline]
pub(crate) fn low32(ptr: &AtomicUsize) -> &AtomicU32 {
    unsafe { &*(ptr as *const AtomicUsize as *const AtomicU32) }
}

#[cfg(all(target_pointer_width = "64", target_endian = "big"))]
#[inline]
pub(crate) fn low32(ptr: &AtomicUsize) -> &AtomicU32 {
    unsafe { &*((ptr as *const AtomicUsize as *const AtomicU32).offset(1)) }
}

#[cfg(target_pointer_width = "32")]
#[inline]
pub(crate) fn low32(ptr: &AtomicUsize) -> &AtomicU32 {
    unsafe { &*(ptr as *const AtomicUsize as *const AtomicU32) }
}
