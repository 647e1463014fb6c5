//! UrlResponsive: pulls the `<title>` text out of the saved body.

use std::sync::Arc;

use anyhow::Result;
use scraper::{Html, Selector};
use tracing::debug;

use crate::events::{Event, Topic};
use crate::session::Session;

use super::Agent;

pub struct UrlPageTitleExtractor;

impl Agent for UrlPageTitleExtractor {
    fn id(&self) -> &'static str {
        "agent:url_page_title_extractor"
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
                    let body_rel = page.body_path();
                    if body_rel.is_empty() {
                        return;
                    }
                    let body = match tokio::fs::read_to_string(session.file_path(&body_rel)).await
                    {
                        Ok(body) => body,
                        Err(err) => {
                            debug!("{}: unable to read body file: {}", url, err);
                            return;
                        }
                    };
                    if let Some(title) = extract_title(&body) {
                        page.set_page_title(title);
                    }
                });
            }
        });
        Ok(())
    }
}

fn extract_title(body: &str) -> Option<String> {
    let document = Html::parse_document(body);
    let selector = Selector::parse("title").ok()?;
    let element = document.select(&selector).next()?;
    let title = element.text().collect::<String>().trim().to_string();
    (!title.is_empty()).then_some(title)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_trimmed_title() {
        let body = "<html><head><title>  Admin Login \n</title></head><body></body></html>";
        assert_eq!(extract_title(body), Some("Admin Login".to_string()));
    }

    #[test]
    fn missing_or_empty_title_yields_none() {
        assert_eq!(extract_title("<html><body><h1>x</h1></body></html>"), None);
        assert_eq!(
            extract_title("<html><head><title>   </title></head></html>"),
            None
        );
    }

    #[test]
    fn first_title_wins() {
        let body = "<html><head><title>one</title><title>two</title></head></html>";
        assert_eq!(extract_title(body), Some("one".to_string()));
    }
}
