//! A join barrier tracking N in-flight work items: [`Group::enter`] /
//! [`Group::leave`] bookkeeping, a bounded-time [`Group::wait`], and a
//! chained [`Group::notify`] callback list dispatched when the count
//! drains back to zero.
//!
//! Dispatch-queue submission itself is outside this crate; a [`Group`] is
//! generic over a [`QueueSubmitter`] collaborator so it can hand work to
//! whatever queue a caller has without this crate knowing what a queue is.

use alloc::boxed::Box;
use core::fmt;
use core::marker::PhantomData;
use core::ptr;
use core::sync::atomic::{AtomicPtr, AtomicU32, AtomicU64, Ordering};

use crate::error::{panic_fatal, FatalError};
use crate::kwait::{self, WakeupReason};
use crate::time::{Timeout, WaitResult};

#[cfg(feature = "std")]
use std::time::Instant;

// Low 32 bits of `state`: `value:30 | has_notifs:1 | waiters:1`. `value` is
// stored as a multiple of `VALUE_INTERVAL`, counting *down* from zero as
// work is entered and back up to zero as it leaves, so the low two bits are
// always free for the flags regardless of how many enters are outstanding.
const WAITERS_BIT: u32 = 1 << 0;
const HAS_NOTIFS_BIT: u32 = 1 << 1;
const VALUE_INTERVAL: u32 = 1 << 2;
const VALUE_MASK: u32 = !(WAITERS_BIT | HAS_NOTIFS_BIT);

/// The abstract "hand this closure to a queue" collaborator a [`Group`]
/// needs for [`Group::notify`] and [`Group::async_work`]. This crate does
/// not implement a dispatch queue itself; callers plug in whatever queue
/// type they have.
pub trait QueueSubmitter {
    /// A cheaply-cloned handle identifying which queue to submit to.
    type Queue: Clone + Send;

    /// Hand `f` to `queue` for execution, at roughly `priority_hint`.
    fn submit(&self, queue: &Self::Queue, priority_hint: i32, f: Box<dyn FnOnce() + Send>);
}

struct NotifyNode<Q: QueueSubmitter> {
    next: *mut NotifyNode<Q>,
    submitter: Q,
    queue: Q::Queue,
    priority_hint: i32,
    f: Option<Box<dyn FnOnce() + Send>>,
}

/// A task group: tracks outstanding work via [`Group::enter`]/[`Group::leave`]
/// pairs, lets callers [`Group::wait`] for the count to drain, and runs
/// [`Group::notify`] callbacks once it does.
pub struct Group<Q: QueueSubmitter> {
    state: AtomicU64,
    notify_head: AtomicPtr<NotifyNode<Q>>,
    _marker: PhantomData<Q>,
}

impl<Q: QueueSubmitter> Group<Q> {
    /// An empty, undrained-count group.
    pub fn new() -> Self {
        Group {
            state: AtomicU64::new(0),
            notify_head: AtomicPtr::new(ptr::null_mut()),
            _marker: PhantomData,
        }
    }

    /// A group constructed with one outstanding `enter` already accounted
    /// for, so it can never be observed in the drained state before the
    /// caller's first unit of work has even started.
    pub fn create_entered() -> Self {
        let g = Self::new();
        g.bits32().fetch_sub(VALUE_INTERVAL, Ordering::Relaxed);
        g
    }

    fn bits32(&self) -> &AtomicU32 {
        low32(&self.state)
    }

    fn gen32(&self) -> &AtomicU32 {
        high32(&self.state)
    }

    /// Mark one unit of work as started. Every `enter` must be matched by
    /// exactly one [`Group::leave`].
    ///
    /// # Panics
    /// If nested `enter` calls would overflow the 30-bit outstanding count.
    pub fn enter(&self) {
        let old = self.bits32().fetch_sub(VALUE_INTERVAL, Ordering::Acquire);
        if old & VALUE_MASK == VALUE_INTERVAL {
            panic_fatal(FatalError::GroupEnterOverflow);
        }
    }

    /// Mark one unit of work as finished. When this is the last outstanding
    /// `enter`, wakes any [`Group::wait`]ers and dispatches any queued
    /// [`Group::notify`] callbacks.
    ///
    /// Adds to the *full* 64-bit `state`, not just the low 32-bit `value`
    /// view `enter` uses: when `value` is the last outstanding unit, this
    /// carries out of the value field directly into `gen` as part of the
    /// same read-modify-write, so the 0-crossing and the generation bump
    /// are one atomic step rather than two.
    ///
    /// # Panics
    /// If called more times than [`Group::enter`] was.
    pub fn leave(&self) {
        let old = self
            .state
            .fetch_add(VALUE_INTERVAL as u64, Ordering::Release);
        let old_low = old as u32;
        if old_low & VALUE_MASK == 0 {
            panic_fatal(FatalError::UnbalancedLeave);
        }
        if old_low & VALUE_MASK == VALUE_MASK {
            #[cfg(feature = "log")]
            log::trace!("dispatch_core: group: drained, waking waiters/notifs");
            self.finish_drain(old_low);
        }
    }

    /// Block until the outstanding count reaches zero, or `timeout` elapses.
    pub fn wait(&self, timeout: Timeout) -> WaitResult {
        let current = self.state.load(Ordering::Acquire);
        if (current as u32) & VALUE_MASK == 0 {
            return WaitResult::Success;
        }
        if timeout.is_now() {
            return WaitResult::TimedOut;
        }

        #[cfg(feature = "std")]
        let deadline = timeout.as_duration().map(|d| Instant::now() + d);
        #[cfg(not(feature = "std"))]
        let fallback_duration = timeout.as_duration();

        loop {
            let current = self.state.load(Ordering::Acquire);
            if (current as u32) & VALUE_MASK == 0 {
                return WaitResult::Success;
            }
            if (current as u32) & WAITERS_BIT == 0 {
                self.bits32().fetch_or(WAITERS_BIT, Ordering::AcqRel);
            }
            let snapshot_gen = (current >> 32) as u32;

            #[cfg(feature = "std")]
            let remaining = match deadline {
                None => None,
                Some(dl) => {
                    let now = Instant::now();
                    if now >= dl {
                        return WaitResult::TimedOut;
                    }
                    Some(dl - now)
                }
            };
            #[cfg(not(feature = "std"))]
            let remaining = fallback_duration;

            let reason = kwait::wait(self.gen32(), snapshot_gen, remaining);
            if matches!(reason, WakeupReason::TimedOut) {
                return WaitResult::TimedOut;
            }
        }
    }

    /// Run `f` on `queue` (via `submitter`) once the group's outstanding
    /// count next drains to zero. If it is already zero, `f` runs
    /// immediately (via this call, not asynchronously).
    pub fn notify(
        &self,
        submitter: &Q,
        queue: Q::Queue,
        priority_hint: i32,
        f: impl FnOnce() + Send + 'static,
    ) where
        Q: Clone,
    {
        let node = Box::new(NotifyNode {
            next: ptr::null_mut(),
            submitter: submitter.clone(),
            queue,
            priority_hint,
            f: Some(Box::new(f)),
        });
        self.push_notify(node);

        let old = self.bits32().fetch_or(HAS_NOTIFS_BIT, Ordering::AcqRel);
        if old & VALUE_MASK == 0 {
            // The group was already drained: no future `leave` will cross
            // zero to trigger this, so dispatch what we just queued now.
            self.drain_notify_list();
        }
    }

    /// `enter` the group, submit `f` to `queue`, and `leave` once `f`
    /// completes — the composition real dispatch-group "async" entry
    /// points are built from.
    ///
    /// # Safety contract
    /// `self` must remain valid until the submitted work runs. This
    /// mirrors the implicit retain a refcounted dispatch group holds for
    /// the duration of an in-flight async operation; this crate does not
    /// model refcounting itself; callers async-working on a `Group` are
    /// expected to keep it alive (e.g. behind an `Arc`) until it drains.
    pub fn async_work(
        &self,
        submitter: &Q,
        queue: Q::Queue,
        priority_hint: i32,
        f: impl FnOnce() + Send + 'static,
    ) where
        Self: 'static,
    {
        self.enter();
        let this = self as *const Self as usize;
        submitter.submit(
            &queue,
            priority_hint,
            Box::new(move || {
                f();
                // SAFETY: see the safety contract on `async_work` above.
                let group = unsafe { &*(this as *const Self) };
                group.leave();
            }),
        );
    }

    fn push_notify(&self, node: Box<NotifyNode<Q>>) {
        let raw = Box::into_raw(node);
        let mut head = self.notify_head.load(Ordering::Acquire);
        loop {
            unsafe {
                (*raw).next = head;
            }
            match self.notify_head.compare_exchange_weak(
                head,
                raw,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return,
                Err(actual) => head = actual,
            }
        }
    }

    /// Atomically take the whole notify list and run each entry, oldest
    /// first. Pushes build a LIFO stack; this reverses it on the way out
    /// to restore submission order.
    fn drain_notify_list(&self) {
        let mut node = self.notify_head.swap(ptr::null_mut(), Ordering::AcqRel);
        let mut ordered: *mut NotifyNode<Q> = ptr::null_mut();
        while !node.is_null() {
            let next = unsafe { (*node).next };
            unsafe {
                (*node).next = ordered;
            }
            ordered = node;
            node = next;
        }
        let mut cur = ordered;
        while !cur.is_null() {
            let mut boxed = unsafe { Box::from_raw(cur) };
            cur = boxed.next;
            if let Some(f) = boxed.f.take() {
                boxed.submitter.submit(&boxed.queue, boxed.priority_hint, f);
            }
        }
    }

    /// `gen` has already been carried into by `leave`'s fetch-add; this
    /// just clears the status bits left over from the drained cycle.
    /// `has_notifs_bit` always clears, since we're about to drain whatever
    /// list existed at the moment of the last `leave`. `waiters_bit` only
    /// clears if `value` still reads zero: a concurrent `enter` racing
    /// with this drain means a new generation is already under way, and
    /// clobbering `waiters_bit` could strand a waiter that arrived for it.
    fn finish_drain(&self, old_low: u32) {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            let mut desired = current & !(HAS_NOTIFS_BIT as u64);
            if current as u32 & VALUE_MASK == 0 {
                desired &= !(WAITERS_BIT as u64);
            }
            if desired == current {
                break;
            }
            match self.state.compare_exchange_weak(
                current,
                desired,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
        self.wake(old_low);
    }

    fn wake(&self, old_low: u32) {
        if old_low & HAS_NOTIFS_BIT != 0 {
            self.drain_notify_list();
        }
        if old_low & WAITERS_BIT != 0 {
            #[cfg(feature = "log")]
            log::trace!("dispatch_core: group: waking waiters");
            kwait::wake_all(self.gen32());
        }
    }
}

impl<Q: QueueSubmitter> Default for Group<Q> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Q: QueueSubmitter> Drop for Group<Q> {
    fn drop(&mut self) {
        let low = *self.state.get_mut() as u32;
        if low & VALUE_MASK != 0 {
            panic_fatal(FatalError::GroupInUse);
        }
        // Ordinarily empty by construction (see `notify`'s inline-drain
        // path); freed here only to defend against a leftover node in a
        // scenario this crate's own logic did not anticipate.
        self.drain_notify_list();
    }
}

impl<Q: QueueSubmitter> fmt::Debug for Group<Q> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.load(Ordering::Relaxed);
        let low = state as u32;
        let raw = (low & VALUE_MASK) as i32;
        let outstanding = -raw / VALUE_INTERVAL as i32;
        f.debug_struct("Group")
            .field("gen", &(state >> 32))
            .field("count", &outstanding)
            .field("has_notifs", &(low & HAS_NOTIFS_BIT != 0))
            .field("waiters", &(low & WAITERS_BIT != 0))
            .finish()
    }
}

#[cfg(all(target_endian = "little"))]
#[inline]
fn low32(state: &AtomicU64) -> &AtomicU32 {
    unsafe { &*(state as *const AtomicU64 as *const AtomicU32) }
}

#[cfg(all(target_endian = "little"))]
#[inline]
fn high32(state: &AtomicU64) -> &AtomicU32 {
    unsafe { &*((state as *const AtomicU64 as *const AtomicU32).offset(1)) }
}

#[cfg(target_endian = "big")]
#[inline]
fn low32(state: &AtomicU64) -> &AtomicU32 {
    unsafe { &*((state as *const AtomicU64 as *const AtomicU32).offset(1)) }
}

#[cfg(target_endian = "big")]
#[inline]
fn high32(state: &AtomicU64) -> &AtomicU32 {
    unsafe { &*(state as *const AtomicU64 as *const AtomicU32) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering as StdOrdering};
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::Duration;

    #[derive(Clone)]
    struct ThreadPool;

    impl QueueSubmitter for ThreadPool {
        type Queue = ();
        fn submit(&self, _queue: &(), _priority_hint: i32, f: Box<dyn FnOnce() + Send>) {
            thread::spawn(f);
        }
    }

    #[test]
    fn drains_after_matched_enter_leave() {
        let group: Group<ThreadPool> = Group::new();
        group.enter();
        group.enter();
        group.leave();
        assert_eq!(group.wait(Timeout::Now), WaitResult::TimedOut);
        group.leave();
        assert_eq!(group.wait(Timeout::Now), WaitResult::Success);
    }

    #[test]
    #[should_panic(expected = "unbalanced")]
    fn extra_leave_is_fatal() {
        let group: Group<ThreadPool> = Group::new();
        group.leave();
    }

    #[test]
    fn wait_blocks_until_async_work_completes() {
        let group: Arc<Group<ThreadPool>> = Arc::new(Group::new());
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..10 {
            let counter = counter.clone();
            group.async_work(&ThreadPool, (), 0, move || {
                thread::sleep(Duration::from_millis(5));
                counter.fetch_add(1, StdOrdering::SeqCst);
            });
        }
        assert_eq!(group.wait(Timeout::Forever), WaitResult::Success);
        assert_eq!(counter.load(StdOrdering::SeqCst), 10);
    }

    #[test]
    fn wait_with_timeout_expires_while_work_outstanding() {
        let group: Group<ThreadPool> = Group::new();
        group.enter();
        assert_eq!(
            group.wait(Timeout::After(Duration::from_millis(20))),
            WaitResult::TimedOut
        );
        group.leave();
    }

    #[test]
    fn notify_runs_immediately_on_already_drained_group() {
        let group: Group<ThreadPool> = Group::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        let o1 = order.clone();
        group.notify(&ThreadPool, (), 0, move || o1.lock().unwrap().push(1));
        thread::sleep(Duration::from_millis(10));
        assert_eq!(*order.lock().unwrap(), vec![1]);
    }

    #[test]
    fn notify_runs_in_submission_order_after_drain() {
        let group: Group<ThreadPool> = Group::new();
        group.enter();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..5 {
            let order = order.clone();
            group.notify(&ThreadPool, (), 0, move || order.lock().unwrap().push(i));
        }
        group.leave();
        thread::sleep(Duration::from_millis(20));
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn create_entered_starts_undrained() {
        let group: Group<ThreadPool> = Group::create_entered();
        assert_eq!(group.wait(Timeout::Now), WaitResult::TimedOut);
        group.leave();
        assert_eq!(group.wait(Timeout::Now), WaitResult::Success);
    }
}
