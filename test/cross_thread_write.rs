//! Scenario: many foreign threads post writes to the same channel
//! concurrently; every byte arrives exactly once, ordering aside.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use reo::channel::Status;
use reo::{Loop, TcpClient, TcpServer};

const WRITES: usize = 1_000;

#[test]
fn concurrent_cross_thread_writes_all_arrive() {
    let mut server_lp = Loop::new().unwrap();
    let mut server = TcpServer::bind("127.0.0.1:0").unwrap();
    let addr = server.local_addr().unwrap();

    let received_count = Arc::new(AtomicUsize::new(0));
    let received_count_for_cb = received_count.clone();
    server.on_message(move |_handle, data| {
        received_count_for_cb.fetch_add(data.len(), Ordering::SeqCst);
    });
    server.attach(&mut server_lp).unwrap();

    let server_handle = server_lp.handle();
    let server_thread = thread::spawn(move || {
        server_lp.run().unwrap();
    });

    let mut client_lp = Loop::new().unwrap();
    let mut client = TcpClient::new(addr).unwrap();

    let channel_slot = Arc::new(Mutex::new(None));
    let channel_slot_for_cb = channel_slot.clone();
    client.on_connection(move |channel| {
        if channel.status == Status::Connected {
            *channel_slot_for_cb.lock().unwrap() = Some(channel);
        }
    });
    client.start(&mut client_lp).unwrap();

    let client_handle = client_lp.handle();
    let driver_channel_slot = channel_slot.clone();
    thread::spawn(move || {
        for _ in 0..200 {
            if driver_channel_slot.lock().unwrap().is_some() {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }

        let writers: Vec<_> = (0..WRITES)
            .map(|_| {
                let channel_slot = driver_channel_slot.clone();
                let client_handle = client_handle.clone();
                thread::spawn(move || {
                    let channel = channel_slot.lock().unwrap().unwrap();
                    client_handle.post_event(move |lp| {
                        let _ = channel.send(lp, b"x");
                    });
                })
            })
            .collect();
        for w in writers {
            w.join().unwrap();
        }
    });

    let watchdog = client_lp.handle();
    thread::spawn(move || {
        thread::sleep(Duration::from_millis(3_000));
        watchdog.stop();
    });

    client_lp.run().unwrap();
    thread::sleep(Duration::from_millis(200));

    server_handle.stop();
    server_thread.join().unwrap();

    assert_eq!(received_count.load(Ordering::SeqCst), WRITES);
}
