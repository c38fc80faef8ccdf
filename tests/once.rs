//! Integration test for the literal "8 racing threads" scenario spec §8
//! describes for [`dispatch_core::OnceGate`].

use std::sync::atomic::{AtomicU32, Ordering};
use std::thread;

use dispatch_core::OnceGate;

static GATE: OnceGate = OnceGate::new();
static COUNTER: AtomicU32 = AtomicU32::new(0);

#[test]
fn eight_racing_threads_run_the_initializer_exactly_once() {
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
