//! Scenario: connecting to a black-hole address (RFC 5737 TEST-NET-1,
//! which never responds) times out instead of hanging the loop
//! forever.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use reo::{IoType, Loop};

#[test]
fn connect_to_black_hole_times_out() {
    let mut lp = Loop::new().unwrap();
    let addr = "192.0.2.1:80".parse().unwrap();

    let fd = lp.connect_async(addr, IoType::Tcp, 0, 500_000).unwrap();

    let closed = Arc::new(AtomicBool::new(false));
    let error_kind = Arc::new(Mutex::new(None));
    let closed_for_cb = closed.clone();
    let error_kind_for_cb = error_kind.clone();
    lp.handles_mut().get_mut(fd).unwrap().on_close = Some(Box::new(move |_lp, h| {
        closed_for_cb.store(true, Ordering::SeqCst);
        *error_kind_for_cb.lock().unwrap() = h.last_error.as_ref().map(io::Error::kind);
    }));

    let watchdog = lp.handle();
    thread::spawn(move || {
        thread::sleep(Duration::from_millis(1_500));
        watchdog.stop();
    });

    lp.run().unwrap();

    assert!(closed.load(Ordering::SeqCst), "connect should have timed out and closed the handle");
    assert_eq!(*error_kind.lock().unwrap(), Some(io::ErrorKind::TimedOut));
}
