//! UrlResponsive: renders each responsive URL to a PNG with headless Chrome.

use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, error, info};

use crate::browser::Chrome;
use crate::events::{Event, Topic};
use crate::session::Session;

use super::Agent;

pub struct UrlScreenshotter;

impl Agent for UrlScreenshotter {
    fn id(&self) -> &'static str {
        "agent:url_screenshotter"
    }

    fn register(&self, session: &Arc<Session>) -> Result<()> {
        // Missing Chrome is a fatal setup error.
        let chrome = Arc::new(Chrome::new(&session.options)?);

        let handler_session = Arc::clone(session);
        let handler_chrome = Arc::clone(&chrome);
        session.bus.subscribe(Topic::UrlResponsive, move |event| {
            let session = Arc::clone(&handler_session);
            let chrome = Arc::clone(&handler_chrome);
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
                    let screenshot_rel = format!("screenshots/{}.png", page.base_filename());
                    let destination = session.file_path(&screenshot_rel);

                    match chrome.capture(&url, &destination).await {
                        Ok(()) => {
                            session.stats.increment_screenshot_successful();
                            page.set_screenshot(screenshot_rel);
                            info!("{}: screenshot successful", url);
                        }
                        Err(err) => {
                            session.stats.increment_screenshot_failed();
                            error!("{}: screenshot failed: {}", url, err);
                        }
                    }
                });
            }
        });

        // Temp profile cleanup once the pipeline is shutting down.
        session.bus.subscribe(Topic::SessionEnd, move |_| {
            let chrome = Arc::clone(&chrome);
            async move {
                chrome.cleanup();
            }
        });
        Ok(())
    }
}
