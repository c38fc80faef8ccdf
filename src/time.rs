//! Timeout arithmetic shared by [`crate::semaphore::Semaphore::wait`] and
//! [`crate::group::Group::wait`].

use core::time::Duration;

/// A relative deadline for a blocking wait.
///
/// `Timeout` is always relative to "now", not an absolute instant: the
/// kernel-wait backends re-derive an absolute deadline right before
/// blocking, so a caller that spends time between constructing a `Timeout`
/// and calling `wait` does not steal from the wait itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Timeout {
    /// Don't block at all; equivalent to `After(Duration::ZERO)` but skips
    /// the kernel round-trip entirely.
    Now,
    /// Block for at most this long.
    After(Duration),
    /// Block until woken; never times out on its own.
    Forever,
}

impl Timeout {
    pub(crate) fn is_now(self) -> bool {
        matches!(self, Timeout::Now) || matches!(self, Timeout::After(d) if d.is_zero())
    }

    pub(crate) fn as_duration(self) -> Option<Duration> {
        match self {
            Timeout::Now => Some(Duration::ZERO),
            Timeout::After(d) => Some(d),
            Timeout::Forever => None,
        }
    }
}

impl From<Duration> for Timeout {
    fn from(d: Duration) -> Self {
        Timeout::After(d)
    }
}

/// Outcome of a bounded-time wait.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitResult {
    /// The condition was satisfied (semaphore signaled, group drained).
    Success,
    /// The timeout elapsed first.
    TimedOut,
}

impl WaitResult {
    pub fn is_success(self) -> bool {
        matches!(self, WaitResult::Success)
    }

    pub fn is_timed_out(self) -> bool {
        matches!(self, WaitResult::TimedOut)
    }
}
