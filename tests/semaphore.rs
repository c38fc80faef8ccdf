//! Integration tests for the literal producer/consumer and timeout
//! scenarios spec §8 describes for [`dispatch_core::Semaphore`].

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use dispatch_core::{Semaphore, Timeout, WaitResult};

#[test]
fn consumer_blocks_until_producer_signals() {
    let sem = Arc::new(Semaphore::new(0).unwrap());
    let producer = sem.clone();

    let start = Instant::now();
    let handle = thread::spawn(move || {
        thread::sleep(Duration::from_millis(10));
        producer.signal()
    });

    assert_eq!(sem.wait(Timeout::Forever), WaitResult::Success);
    assert!(start.elapsed() >= Duration::from_millis(10));
    assert!(handle.join().unwrap());
}

#[test]
fn one_millisecond_wait_on_empty_semaphore_times_out() {
    let sem = Semaphore::new(0).unwrap();
    let start = Instant::now();

    assert_eq!(
        sem.wait(Timeout::After(Duration::from_millis(1))),
        WaitResult::TimedOut
    );
    assert!(start.elapsed() >= Duration::from_millis(1));
    assert_eq!(sem.value(), 0);
}
