//! Port scanner stage driven through the bus: open ports publish TcpPort
//! events, closed ports only move the statistics.

use std::sync::Arc;

use clap::Parser;
use parking_lot::Mutex;

use aquatone::agents::{Agent, TcpPortScanner};
use aquatone::cli::Options;
use aquatone::events::{Event, Topic};
use aquatone::session::Session;

fn session_scanning(port: u16, dir: &tempfile::TempDir) -> Arc<Session> {
    let options = Options::parse_from([
        "aquatone",
        "-o",
        dir.path().to_str().unwrap(),
        "-p",
        &port.to_string(),
    ]);
    Session::new(options).unwrap()
}

fn collect_tcp_ports(session: &Arc<Session>) -> Arc<Mutex<Vec<(u16, String)>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    session.bus.subscribe(Topic::TcpPort, move |event| {
        let sink = Arc::clone(&sink);
        async move {
            if let Event::TcpPort { port, host } = event {
                sink.lock().push((port, host));
            }
        }
    });
    seen
}

#[tokio::test]
async fn open_port_publishes_tcp_port_event() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        loop {
            let _ = listener.accept().await;
        }
    });

    let dir = tempfile::tempdir().unwrap();
    let session = session_scanning(port, &dir);
    TcpPortScanner.register(&session).unwrap();
    let seen = collect_tcp_ports(&session);

    session.bus.publish(Event::Host("127.0.0.1".into()));
    session.drain().await;

    assert_eq!(seen.lock().as_slice(), &[(port, "127.0.0.1".to_string())]);
    let stats = session.stats.snapshot();
    assert_eq!(stats.port_open, 1);
    assert_eq!(stats.port_closed, 0);
}

#[tokio::test]
async fn closed_port_only_counts() {
    let port = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };

    let dir = tempfile::tempdir().unwrap();
    let session = session_scanning(port, &dir);
    TcpPortScanner.register(&session).unwrap();
    let seen = collect_tcp_ports(&session);

    session.bus.publish(Event::Host("127.0.0.1".into()));
    session.drain().await;

    assert!(seen.lock().is_empty());
    let stats = session.stats.snapshot();
    assert_eq!(stats.port_open, 0);
    assert_eq!(stats.port_closed, 1);
    assert_eq!(session.page_count(), 0);
}

#[tokio::test]
async fn unresolvable_host_scans_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let session = session_scanning(80, &dir);
    TcpPortScanner.register(&session).unwrap();
    let seen = collect_tcp_ports(&session);

    session
        .bus
        .publish(Event::Host("definitely-not-resolvable.invalid".into()));
    session.drain().await;

    assert!(seen.lock().is_empty());
    let stats = session.stats.snapshot();
    assert_eq!(stats.port_open, 0);
    assert_eq!(stats.port_closed, 0);
}
