//! The eight pipeline agents. Each one subscribes to its stage's events at
//! registration and transforms them into downstream events or page mutations.

use std::sync::Arc;

use anyhow::Result;
use tracing::debug;

use crate::session::Session;

pub mod tcp_port_scanner;
pub mod url_hostname_resolver;
pub mod url_page_title_extractor;
pub mod url_publisher;
pub mod url_requester;
pub mod url_screenshotter;
pub mod url_takeover_detector;
pub mod url_technology_fingerprinter;

pub use tcp_port_scanner::TcpPortScanner;
pub use url_hostname_resolver::UrlHostnameResolver;
pub use url_page_title_extractor::UrlPageTitleExtractor;
pub use url_publisher::UrlPublisher;
pub use url_requester::UrlRequester;
pub use url_screenshotter::UrlScreenshotter;
pub use url_takeover_detector::UrlTakeoverDetector;
pub use url_technology_fingerprinter::UrlTechnologyFingerprinter;

pub trait Agent {
    fn id(&self) -> &'static str;
    fn register(&self, session: &Arc<Session>) -> Result<()>;
}

/// Registers the fixed agent list against the session's event bus.
pub fn register_all(session: &Arc<Session>) -> Result<()> {
    let agents: Vec<Box<dyn Agent>> = vec![
        Box::new(TcpPortScanner),
        Box::new(UrlPublisher),
        Box::new(UrlRequester),
        Box::new(UrlHostnameResolver),
        Box::new(UrlPageTitleExtractor),
        Box::new(UrlScreenshotter),
        Box::new(UrlTechnologyFingerprinter),
        Box::new(UrlTakeoverDetector),
    ];

    for agent in agents {
        debug!("registering agent {}", agent.id());
        agent.register(session)?;
    }
    Ok(())
}
