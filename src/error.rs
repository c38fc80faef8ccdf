//! Fatal-contract-violation reporting.
//!
//! The three primitives in this crate treat a handful of caller mistakes
//! (over-signaling a semaphore, leaving a group more times than it was
//! entered, destroying a busy semaphore or group, a once-gate re-entering
//! its own initializer) the same way the C implementation this crate is
//! modeled on does: they are not recoverable errors, they are proof the
//! caller's bookkeeping is already broken, so we log and abort rather than
//! return a `Result` nobody can meaningfully handle.

use core::fmt;

/// A contract violation that can only mean corrupted caller state.
///
/// Every variant here corresponds to a `DISPATCH_CLIENT_CRASH` site in the
/// implementation this crate's semantics are drawn from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FatalError {
    /// A thread called [`crate::once::OnceGate::call_once`] from inside its
    /// own initializer.
    RecursiveOnce,
    /// [`crate::semaphore::Semaphore::signal`] overflowed the permit count.
    UnbalancedSignal,
    /// A [`crate::semaphore::Semaphore`] was dropped while `value < orig`.
    SemaphoreInUse,
    /// [`crate::group::Group::enter`] would overflow the 30-bit count.
    GroupEnterOverflow,
    /// [`crate::group::Group::leave`] observed a count that was already
    /// zero.
    UnbalancedLeave,
    /// A [`crate::group::Group`] was dropped while its count was non-zero.
    GroupInUse,
}

impl FatalError {
    pub fn message(self) -> &'static str {
        match self {
            FatalError::RecursiveOnce => "recursive call to OnceGate::call_once",
            FatalError::UnbalancedSignal => "unbalanced call to Semaphore::signal",
            FatalError::SemaphoreInUse => "semaphore deallocated while in use",
            FatalError::GroupEnterOverflow => "too many nested Group::enter calls",
            FatalError::UnbalancedLeave => "unbalanced call to Group::leave",
            FatalError::GroupInUse => "group deallocated while in use",
        }
    }
}

impl fmt::Display for FatalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

#[cfg(feature = "std")]
impl std::error::Error for FatalError {}

/// Report `err` and terminate. Never returns.
///
/// Logs at `error` level through the `log` facade (when the `log` feature
/// is enabled) before panicking, so the last thing an embedder's logger
/// sees is the specific invariant that broke, not just a panic message.
#[cold]
#[track_caller]
pub(crate) fn panic_fatal(err: FatalError) -> ! {
    #[cfg(feature = "log")]
    log::error!("dispatch_core: fatal: {}", err);
    panic!("dispatch_core: fatal: {}", err);
}
