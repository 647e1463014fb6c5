//! Url → UrlResponsive: performs the single GET, creates the page, captures
//! headers and body, and writes the on-disk artifacts.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::redirect::Policy;
use reqwest::{Client, Proxy};
use tracing::{debug, error, info, warn};

use crate::events::{Event, Topic};
use crate::page::Page;
use crate::session::Session;
use crate::user_agent::random_user_agent;

use super::Agent;

pub struct UrlRequester;

impl Agent for UrlRequester {
    fn id(&self) -> &'static str {
        "agent:url_requester"
    }

    fn register(&self, session: &Arc<Session>) -> Result<()> {
        let client = build_client(session).context("unable to build HTTP client")?;
        let handler_session = Arc::clone(session);

        session.bus.subscribe(Topic::Url, move |event| {
            let session = Arc::clone(&handler_session);
            let client = client.clone();
            async move {
                let Event::Url(url) = event else {
                    return;
                };
                let token = session.wait_group.enter();
                tokio::spawn(async move {
                    let _token = token;
                    on_url(session, client, url).await;
                });
            }
        });
        Ok(())
    }
}

fn build_client(session: &Session) -> Result<Client> {
    let mut builder = Client::builder()
        .danger_accept_invalid_certs(true)
        .redirect(Policy::limited(5))
        .timeout(Duration::from_millis(session.options.http_timeout))
        .tcp_nodelay(true)
        .pool_max_idle_per_host(10);

    if !session.options.proxy.is_empty() {
        builder = builder.proxy(Proxy::all(&session.options.proxy)?);
    }
    Ok(builder.build()?)
}

async fn on_url(session: Arc<Session>, client: Client, url: String) {
    debug!("received new URL: {}", url);

    let response = match client
        .get(&url)
        .header(reqwest::header::USER_AGENT, random_user_agent())
        .send()
        .await
    {
        Ok(response) => response,
        Err(err) => {
            session.stats.increment_request_failed();
            debug!("{}: request failed: {}", url, err);
            return;
        }
    };

    session.stats.increment_request_successful();
    let status = response.status();
    session.stats.increment_response_code(status.as_u16());

    let status_line = match status.canonical_reason() {
        Some(reason) => format!("{} {}", status.as_u16(), reason),
        None => status.as_u16().to_string(),
    };
    info!("{}: {}", url, status_line);

    let page = match Page::new(&url) {
        Ok(page) => page,
        Err(err) => {
            warn!("{}: unable to create page: {}", url, err);
            return;
        }
    };
    page.set_status(status_line.clone());

    let mut captured_headers: Vec<(String, String)> = Vec::new();
    for (name, value) in response.headers() {
        let value = value.to_str().unwrap_or_default().to_string();
        captured_headers.push((name.as_str().to_string(), value));
    }
    for (name, value) in &captured_headers {
        page.add_header(name, value);
    }

    let base = page.base_filename();

    let headers_rel = format!("headers/{}.txt", base);
    let mut dump = String::with_capacity(256);
    dump.push_str(&status_line);
    dump.push('\n');
    for (name, value) in &captured_headers {
        dump.push_str(name);
        dump.push_str(": ");
        dump.push_str(value);
        dump.push('\n');
    }
    match tokio::fs::write(session.file_path(&headers_rel), dump).await {
        Ok(()) => page.set_headers_path(headers_rel),
        Err(err) => error!("{}: unable to write headers file: {}", url, err),
    }

    if session.options.save_body {
        match response.bytes().await {
            Ok(body) => {
                let body_rel = format!("html/{}.html", base);
                match tokio::fs::write(session.file_path(&body_rel), &body).await {
                    Ok(()) => page.set_body_path(body_rel),
                    Err(err) => error!("{}: unable to write body file: {}", url, err),
                }
            }
            Err(err) => debug!("{}: unable to read response body: {}", url, err),
        }
    }

    // The page must be in the map before downstream agents hear about it.
    session.add_page(page);
    session.bus.publish(Event::UrlResponsive(url));
}
