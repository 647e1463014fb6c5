//! Host → TcpPort: determines which configured ports accept TCP connections.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::sync::Semaphore;
use tracing::{debug, error, info};

use crate::events::{Event, Topic};
use crate::session::Session;

use super::Agent;

/// Connection attempts per port and the gap between them.
pub const PORT_ATTEMPTS: u32 = 2;
pub const PORT_RETRY_GAP: Duration = Duration::from_millis(500);

/// Semaphore depth used when `--threads` is left at 0.
pub const DEFAULT_THREADS: usize = 100;

/// Dials get at least this long regardless of `--scan-timeout`.
const MINIMUM_DIAL_TIMEOUT: Duration = Duration::from_secs(5);

const READ_CHECK_TIMEOUT: Duration = Duration::from_secs(1);

pub struct TcpPortScanner;

impl Agent for TcpPortScanner {
    fn id(&self) -> &'static str {
        "agent:tcp_port_scanner"
    }

    fn register(&self, session: &Arc<Session>) -> Result<()> {
        let depth = match session.options.threads {
            0 => DEFAULT_THREADS,
            threads => threads,
        };
        let slots = Arc::new(Semaphore::new(depth));
        let handler_session = Arc::clone(session);

        session.bus.subscribe(Topic::Host, move |event| {
            let session = Arc::clone(&handler_session);
            let slots = Arc::clone(&slots);
            async move {
                if let Event::Host(host) = event {
                    on_host(session, slots, host).await;
                }
            }
        });
        Ok(())
    }
}

async fn on_host(session: Arc<Session>, slots: Arc<Semaphore>, host: String) {
    debug!("received new host: {}", host);

    // Resolve first; a host that does not resolve is not scanned at all.
    if let Err(err) = tokio::net::lookup_host((host.as_str(), 0u16)).await {
        error!("failed to resolve host {}: {}", host, err);
        return;
    }

    let dial_timeout = Duration::from_millis(session.options.scan_timeout).max(MINIMUM_DIAL_TIMEOUT);

    for port in session.ports.clone() {
        let token = session.wait_group.enter();
        let session = Arc::clone(&session);
        let slots = Arc::clone(&slots);
        let host = host.clone();

        tokio::spawn(async move {
            let _token = token;
            let Ok(_permit) = slots.acquire().await else {
                return;
            };

            let mut open = false;
            for attempt in 0..PORT_ATTEMPTS {
                if attempt > 0 {
                    debug!("retrying port {} on {} (attempt {})", port, host, attempt + 1);
                    tokio::time::sleep(PORT_RETRY_GAP).await;
                }
                if probe_port(&host, port, dial_timeout).await {
                    open = true;
                    break;
                }
            }

            if open {
                session.stats.increment_port_open();
                info!("{}: port {} open", host, port);
                session.bus.publish(Event::TcpPort { port, host });
            } else {
                session.stats.increment_port_closed();
                debug!("port {} is closed on {}", port, host);
            }
        });
    }
}

/// A port counts as open once the dial succeeds. The follow-up one-byte read
/// defeats firewalls that complete the handshake and then drop the
/// connection; its errors are tolerated.
async fn probe_port(host: &str, port: u16, dial_timeout: Duration) -> bool {
    match tokio::time::timeout(dial_timeout, TcpStream::connect((host, port))).await {
        Ok(Ok(mut stream)) => {
            let mut byte = [0u8; 1];
            let _ = tokio::time::timeout(READ_CHECK_TIMEOUT, stream.read(&mut byte)).await;
            true
        }
        Ok(Err(err)) => {
            debug!("error scanning port {} on {}: {}", port, host, err);
            false
        }
        Err(_) => {
            debug!("timeout scanning port {} on {}", port, host);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn detects_open_and_closed_ports() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let open_port = listener.local_addr().unwrap().port();

        let closed_port = {
            let probe = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            probe.local_addr().unwrap().port()
        };

        assert!(probe_port("127.0.0.1", open_port, Duration::from_secs(5)).await);
        assert!(!probe_port("127.0.0.1", closed_port, Duration::from_secs(5)).await);
    }
}
