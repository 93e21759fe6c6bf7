use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::{Duration as StdDuration, Instant as StdInstant};

use weir_net::reactor::{EventLoop, LoopEvent, Tick};
use weir_protocol::TextProtocol;

/// Drives a real `EventLoop` bound to a loopback TCP port, accepts one
/// connection, and echoes the first line a client sends.
#[test]
fn accepts_and_echoes_a_line() {
    let mut event_loop: EventLoop<TextProtocol> = EventLoop::new().unwrap();
    let protocol = Arc::new(TextProtocol);
    event_loop.listen_tcp("127.0.0.1:18734".parse().unwrap(), protocol).unwrap();

    let client = std::thread::spawn(|| {
        std::thread::sleep(StdDuration::from_millis(50));
        let mut stream = TcpStream::connect("127.0.0.1:18734").expect("client connect");
        stream.write_all(b"ping\n").unwrap();
        let mut buf = [0u8; 16];
        let n = stream.read(&mut buf).unwrap();
        String::from_utf8_lossy(&buf[..n]).to_string()
    });

    let mut replied = false;
    let deadline = StdInstant::now() + StdDuration::from_secs(2);
    while StdInstant::now() < deadline && !replied {
        let tick = event_loop.tick(|evloop, event| {
            if let LoopEvent::Message { conn, message } = event {
                evloop.send(conn, message);
                replied = true;
            }
        });
        if let Tick::Fatal(reason) = tick {
            panic!("fatal: {reason}");
        }
    }

    let received = client.join().unwrap();
    assert_eq!(received, "ping\n");
}
