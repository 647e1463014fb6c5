//! UrlResponsive: resolves the page hostname to its IP addresses.

use std::sync::Arc;

use anyhow::Result;
use tracing::debug;

use crate::events::{Event, Topic};
use crate::session::Session;

use super::Agent;

pub struct UrlHostnameResolver;

impl Agent for UrlHostnameResolver {
    fn id(&self) -> &'static str {
        "agent:url_hostname_resolver"
    }

    fn register(&self, session: &Arc<Session>) -> Result<()> {
        let handler_session = Arc::clone(session);

        session.bus.subscribe(Topic::UrlResponsive, move |event| {
            let session = Arc::clone(&handler_session);
            async move {
                let Event::UrlResponsive(url) = event else {
                    return;
                };
                let Some(page) = session.get_page(&url) else {
                    debug!("no page found for URL: {}", url);
                    return;
                };

                let token = session.wait_group.enter();
                tokio::spawn(async move {
                    let _token = token;
                    match tokio::net::lookup_host((page.hostname.as_str(), 0u16)).await {
                        Ok(addrs) => {
                            let mut ips: Vec<String> =
                                addrs.map(|addr| addr.ip().to_string()).collect();
                            ips.dedup();
                            page.set_addrs(ips);
                        }
                        Err(err) => {
                            debug!("unable to resolve {}: {}", page.hostname, err);
                        }
                    }
                });
            }
        });
        Ok(())
    }
}
