//! Scenario: a repeating timer fires roughly once per interval until
//! the loop is stopped.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use reo::Loop;

#[test]
fn periodic_timer_fires_at_roughly_the_set_interval() {
    let mut lp = Loop::new().unwrap();
    let count = Arc::new(AtomicUsize::new(0));

    let count_for_timer = count.clone();
    lp.timer_add(100_000, u32::MAX, move |_lp, _id| {
        count_for_timer.fetch_add(1, Ordering::SeqCst);
    });

    let stopper = lp.handle();
    thread::spawn(move || {
        thread::sleep(Duration::from_millis(1_050));
        stopper.stop();
    });

    lp.run().unwrap();

    let fired = count.load(Ordering::SeqCst);
    assert!((9..=11).contains(&fired), "expected 9..=11 fires, got {fired}");
}
