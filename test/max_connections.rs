//! Scenario: a server capped at one connection drops a second
//! concurrent client immediately, keeping `connection_count() == 1`.

use std::net::TcpStream;
use std::thread;
use std::time::Duration;

use reo::TcpServer;

#[test]
fn second_connection_is_rejected_past_the_cap() {
    let mut lp = reo::Loop::new().unwrap();
    let mut server = TcpServer::bind("127.0.0.1:0").unwrap();
    server.set_max_connections(1);
    let addr = server.local_addr().unwrap();
    server.attach(&mut lp).unwrap();

    let handle = lp.handle();
    let server_thread = thread::spawn(move || {
        lp.run().unwrap();
    });

    let _first = TcpStream::connect(addr).unwrap();
    thread::sleep(Duration::from_millis(100));
    assert_eq!(server.connection_count(), 1);

    let mut second = TcpStream::connect(addr).unwrap();
    thread::sleep(Duration::from_millis(100));

    use std::io::Read;
    let mut buf = [0u8; 16];
    let n = second.read(&mut buf).unwrap_or(0);
    assert_eq!(n, 0, "rejected connection should see EOF, not stay open");
    assert_eq!(server.connection_count(), 1);

    handle.stop();
    server_thread.join().unwrap();
}
