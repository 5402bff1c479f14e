//! Cross-thread event injection: `LoopHandle::post_event`/`wakeup`/`stop`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use reo::Loop;

#[test]
fn post_event_runs_on_owning_thread() {
    let mut lp = Loop::new().unwrap();
    let handle = lp.handle();
    let owner_tid = lp.tid();

    let seen_tid = Arc::new(AtomicUsize::new(0));
    let seen_tid2 = seen_tid.clone();

    let th = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        handle.post_event(move |lp| {
            seen_tid2.store(lp.tid() as usize, Ordering::SeqCst);
            lp.stop();
        });
    });

    lp.run().unwrap();
    th.join().unwrap();

    assert_eq!(seen_tid.load(Ordering::SeqCst), owner_tid as usize);
}

#[test]
fn many_posted_events_all_run() {
    let mut lp = Loop::new().unwrap();
    let handle = lp.handle();

    const N: usize = 1000;
    let counter = Arc::new(AtomicUsize::new(0));

    let poster_counter = counter.clone();
    let poster_handle = handle.clone();
    let th = thread::spawn(move || {
        for _ in 0..N {
            let counter = poster_counter.clone();
            poster_handle.post_event(move |_lp| {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
    });
    th.join().unwrap();

    let stop_counter = counter.clone();
    handle.post_event(move |lp| {
        if stop_counter.load(Ordering::SeqCst) >= N {
            lp.stop();
        }
    });

    let stopper = handle.clone();
    thread::spawn(move || {
        thread::sleep(Duration::from_millis(200));
        stopper.stop();
    });

    lp.run().unwrap();
    assert_eq!(counter.load(Ordering::SeqCst), N);
}

#[test]
fn wakeup_unblocks_a_parked_loop() {
    let mut lp = Loop::new().unwrap();
    let handle = lp.handle();

    let th = thread::spawn(move || {
        thread::sleep(Duration::from_millis(30));
        handle.wakeup();
        thread::sleep(Duration::from_millis(30));
        handle.stop();
    });

    lp.run().unwrap();
    th.join().unwrap();
}
