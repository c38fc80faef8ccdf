//! Integration tests for [`dispatch_core::Group`] covering the literal
//! end-to-end scenarios a task group is expected to satisfy: draining
//! after N racing `leave`s, notify delivery to more than one queue, and
//! `async_work` composition.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use dispatch_core::{Group, QueueSubmitter, Timeout, WaitResult};

/// A minimal queue submitter that just spawns a thread per submission,
/// tagged with whichever queue handle the caller passed in. Good enough to
/// exercise `notify`/`async_work` without this crate knowing what a real
/// dispatch queue is.
#[derive(Clone)]
struct ThreadPool;

impl QueueSubmitter for ThreadPool {
    type Queue = &'static str;

    fn submit(&self, _queue: &&'static str, _priority_hint: i32, f: Box<dyn FnOnce() + Send>) {
        thread::spawn(f);
    }
}

#[test]
fn group_drain_after_three_racing_leaves() {
    let group: Arc<Group<ThreadPool>> = Arc::new(Group::new());
    group.enter();
    group.enter();
    group.enter();

    let handles: Vec<_> = (0..3)
        .map(|i| {
            let group = group.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(5 * (i + 1)));
                group.leave();
            })
        })
        .collect();

    assert_eq!(group.wait(Timeout::Forever), WaitResult::Success);
    for h in handles {
        h.join().unwrap();
    }
}

#[test]
fn group_notify_delivers_to_distinct_queues_after_leave() {
    let group: Group<ThreadPool> = Group::new();
    let log = Arc::new(Mutex::new(Vec::new()));

    group.enter();

    let log_a = log.clone();
    group.notify(&ThreadPool, "Q1", 0, move || log_a.lock().unwrap().push("A"));
    let log_b = log.clone();
    group.notify(&ThreadPool, "Q2", 0, move || log_b.lock().unwrap().push("B"));

    // Neither notify may have run yet: the group has not drained.
    assert!(log.lock().unwrap().is_empty());

    group.leave();

    // Both queues drain asynchronously; wait for them to land.
    for _ in 0..100 {
        if log.lock().unwrap().len() == 2 {
            break;
        }
        thread::sleep(Duration::from_millis(5));
    }

    let mut seen = log.lock().unwrap().clone();
    seen.sort();
    assert_eq!(seen, vec!["A", "B"]);
}

#[test]
fn group_async_work_ten_times_increments_shared_counter() {
    let group: Arc<Group<ThreadPool>> = Arc::new(Group::new());
    let counter = Arc::new(AtomicUsize::new(0));

    for _ in 0..10 {
        let counter = counter.clone();
        group.async_work(&ThreadPool, "Q", 0, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
    }

    assert_eq!(group.wait(Timeout::Forever), WaitResult::Success);
    assert_eq!(counter.load(Ordering::SeqCst), 10);
}

#[test]
fn group_wait_now_on_empty_group_succeeds_without_blocking() {
    let group: Group<ThreadPool> = Group::new();
    assert_eq!(group.wait(Timeout::Now), WaitResult::Success);
}

#[test]
fn group_wait_now_on_nonempty_group_times_out_without_sticking_waiters_bit() {
    let group: Group<ThreadPool> = Group::new();
    group.enter();
    assert_eq!(group.wait(Timeout::Now), WaitResult::TimedOut);
    // A later `leave` must still be able to drain and wake any real waiter;
    // nothing from the `Now` probe above should have wedged the state.
    group.leave();
    assert_eq!(group.wait(Timeout::Now), WaitResult::Success);
}
