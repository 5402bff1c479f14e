//! Scenario: a client sends one line, the server echoes it back, both
//! sides observe the bytes and close cleanly.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use reo::channel::{SocketChannel, Status};
use reo::{Loop, TcpClient, TcpServer};

#[test]
fn echo_round_trip() {
    let mut server_lp = Loop::new().unwrap();
    let mut server = TcpServer::bind("127.0.0.1:0").unwrap();
    let addr = server.local_addr().unwrap();

    server.on_message(|handle, data| {
        let _ = handle.write(data);
    });
    server.attach(&mut server_lp).unwrap();

    let server_handle = server_lp.handle();
    let server_thread = thread::spawn(move || {
        server_lp.run().unwrap();
    });

    let mut client_lp = Loop::new().unwrap();
    let mut client = TcpClient::new(addr).unwrap();

    let connected = Arc::new(AtomicBool::new(false));
    let channel_slot: Arc<Mutex<Option<SocketChannel>>> = Arc::new(Mutex::new(None));
    let received = Arc::new(Mutex::new(Vec::new()));

    let connected_for_cb = connected.clone();
    let channel_slot_for_cb = channel_slot.clone();
    client.on_connection(move |channel| {
        if channel.status == Status::Connected {
            connected_for_cb.store(true, Ordering::SeqCst);
            *channel_slot_for_cb.lock().unwrap() = Some(channel);
        }
    });

    let received_for_cb = received.clone();
    let client_stopper = client_lp.handle();
    client.on_message(move |_handle, data| {
        received_for_cb.lock().unwrap().extend_from_slice(data);
        client_stopper.stop();
    });

    client.start(&mut client_lp).unwrap();

    // Sends "hello\n" through the client's channel once connected,
    // driven cross-thread via `post_event` (the channel is just a
    // Copy (fd, id) pair, valid only when run back on the owning loop).
    let sender_handle = client_lp.handle();
    let channel_slot_for_send = channel_slot.clone();
    thread::spawn(move || {
        for _ in 0..200 {
            if let Some(channel) = *channel_slot_for_send.lock().unwrap() {
                sender_handle.post_event(move |lp| {
                    let _ = channel.send(lp, b"hello\n");
                });
                return;
            }
            thread::sleep(Duration::from_millis(10));
        }
    });

    let watchdog = client_lp.handle();
    thread::spawn(move || {
        thread::sleep(Duration::from_millis(3_000));
        watchdog.stop();
    });

    client_lp.run().unwrap();

    server_handle.stop();
    server_thread.join().unwrap();

    assert!(connected.load(Ordering::SeqCst));
    assert_eq!(&received.lock().unwrap()[..], b"hello\n");
}
