//! Process-wide session state: options, statistics, the URL→Page map, the
//! similarity clusters, the event bus and the wait-group barrier.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::cli::Options;
use crate::events::{EventBus, WaitGroup};
use crate::page::{Page, PageData};
use crate::ports;

pub const NAME: &str = "aquatone";
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Run statistics. Counters are atomic; timestamps are fixed at session start
/// and end.
pub struct Stats {
    pub started_at: DateTime<Utc>,
    finished_at: Mutex<Option<DateTime<Utc>>>,
    request_successful: AtomicU64,
    request_failed: AtomicU64,
    response_code_2xx: AtomicU64,
    response_code_3xx: AtomicU64,
    response_code_4xx: AtomicU64,
    response_code_5xx: AtomicU64,
    port_open: AtomicU64,
    port_closed: AtomicU64,
    screenshot_successful: AtomicU64,
    screenshot_failed: AtomicU64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsData {
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub request_successful: u64,
    pub request_failed: u64,
    pub response_code_2xx: u64,
    pub response_code_3xx: u64,
    pub response_code_4xx: u64,
    pub response_code_5xx: u64,
    pub port_open: u64,
    pub port_closed: u64,
    pub screenshot_successful: u64,
    pub screenshot_failed: u64,
}

impl Stats {
    fn new() -> Self {
        Self {
            started_at: Utc::now(),
            finished_at: Mutex::new(None),
            request_successful: AtomicU64::new(0),
            request_failed: AtomicU64::new(0),
            response_code_2xx: AtomicU64::new(0),
            response_code_3xx: AtomicU64::new(0),
            response_code_4xx: AtomicU64::new(0),
            response_code_5xx: AtomicU64::new(0),
            port_open: AtomicU64::new(0),
            port_closed: AtomicU64::new(0),
            screenshot_successful: AtomicU64::new(0),
            screenshot_failed: AtomicU64::new(0),
        }
    }

    pub fn increment_request_successful(&self) {
        self.request_successful.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_request_failed(&self) {
        self.request_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Bumps the counter for the response's status class.
    pub fn increment_response_code(&self, status: u16) {
        match status / 100 {
            2 => self.response_code_2xx.fetch_add(1, Ordering::Relaxed),
            3 => self.response_code_3xx.fetch_add(1, Ordering::Relaxed),
            4 => self.response_code_4xx.fetch_add(1, Ordering::Relaxed),
            5 => self.response_code_5xx.fetch_add(1, Ordering::Relaxed),
            _ => return,
        };
    }

    pub fn increment_port_open(&self) {
        self.port_open.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_port_closed(&self) {
        self.port_closed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_screenshot_successful(&self) {
        self.screenshot_successful.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_screenshot_failed(&self) {
        self.screenshot_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn finish(&self) {
        *self.finished_at.lock() = Some(Utc::now());
    }

    pub fn snapshot(&self) -> StatsData {
        StatsData {
            started_at: self.started_at,
            finished_at: *self.finished_at.lock(),
            request_successful: self.request_successful.load(Ordering::Relaxed),
            request_failed: self.request_failed.load(Ordering::Relaxed),
            response_code_2xx: self.response_code_2xx.load(Ordering::Relaxed),
            response_code_3xx: self.response_code_3xx.load(Ordering::Relaxed),
            response_code_4xx: self.response_code_4xx.load(Ordering::Relaxed),
            response_code_5xx: self.response_code_5xx.load(Ordering::Relaxed),
            port_open: self.port_open.load(Ordering::Relaxed),
            port_closed: self.port_closed.load(Ordering::Relaxed),
            screenshot_successful: self.screenshot_successful.load(Ordering::Relaxed),
            screenshot_failed: self.screenshot_failed.load(Ordering::Relaxed),
        }
    }
}

/// The serializable form of a finished (or loaded) session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionData {
    pub version: String,
    pub options: Options,
    pub stats: StatsData,
    pub ports: Vec<u16>,
    pub pages: HashMap<String, PageData>,
    pub page_similarity_clusters: HashMap<String, Vec<String>>,
}

pub struct Session {
    pub options: Options,
    pub out_dir: PathBuf,
    pub ports: Vec<u16>,
    pub stats: Stats,
    pub bus: EventBus,
    pub wait_group: WaitGroup,
    pages: DashMap<String, Arc<Page>>,
    clusters: Mutex<Vec<(String, Vec<String>)>>,
}

impl Session {
    /// Builds the session, validating the output directory and creating the
    /// artifact subdirectories. Fatal on any failure.
    pub fn new(options: Options) -> Result<Arc<Self>> {
        let out_dir = PathBuf::from(&options.out);
        if out_dir.exists() && !out_dir.is_dir() {
            bail!("output destination {} is not a directory", out_dir.display());
        }
        for sub in ["html", "headers", "screenshots"] {
            std::fs::create_dir_all(out_dir.join(sub))
                .with_context(|| format!("unable to create output directory {}", sub))?;
        }

        parse_resolution(&options.resolution)?;
        let ports = ports::parse(&options.ports)?;

        Ok(Arc::new(Self {
            out_dir,
            ports,
            stats: Stats::new(),
            bus: EventBus::new(),
            wait_group: WaitGroup::new(),
            pages: DashMap::new(),
            clusters: Mutex::new(Vec::new()),
            options,
        }))
    }

    /// Absolute path of an artifact inside the output directory.
    pub fn file_path(&self, relative: &str) -> PathBuf {
        self.out_dir.join(relative)
    }

    /// Inserts a page keyed by its URL. The page must be in the map before
    /// `UrlResponsive` is published for it.
    pub fn add_page(&self, page: Page) -> Arc<Page> {
        let page = Arc::new(page);
        self.pages.insert(page.url.clone(), Arc::clone(&page));
        page
    }

    pub fn get_page(&self, url: &str) -> Option<Arc<Page>> {
        self.pages.get(url).map(|entry| Arc::clone(entry.value()))
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Pages in stable URL order, for the post-drain passes.
    pub fn pages_sorted(&self) -> Vec<Arc<Page>> {
        let mut pages: Vec<Arc<Page>> = self
            .pages
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        pages.sort_by(|a, b| a.url.cmp(&b.url));
        pages
    }

    pub fn set_clusters(&self, clusters: Vec<(String, Vec<String>)>) {
        *self.clusters.lock() = clusters;
    }

    /// Blocks until the pipeline is quiescent: no bus handler queued or
    /// running and no agent work unit outstanding. Work can only be created
    /// from in-flight work, so both counters being zero at once means done.
    pub async fn drain(&self) {
        loop {
            self.bus.settled().await;
            self.wait_group.wait().await;
            if self.bus.is_idle() && self.wait_group.is_idle() {
                return;
            }
        }
    }

    pub fn export(&self) -> SessionData {
        SessionData {
            version: VERSION.to_string(),
            options: self.options.clone(),
            stats: self.stats.snapshot(),
            ports: self.ports.clone(),
            pages: self
                .pages
                .iter()
                .map(|entry| (entry.key().clone(), entry.value().snapshot()))
                .collect(),
            page_similarity_clusters: self.clusters.lock().iter().cloned().collect(),
        }
    }

    /// Writes the session file. Callers treat failure as non-fatal.
    pub fn save(&self, filename: &str) -> Result<()> {
        let data = self.export();
        let json = serde_json::to_string(&data)?;
        std::fs::write(self.file_path(filename), json)?;
        Ok(())
    }
}

/// Reads a previously saved session file.
pub fn load(path: &Path) -> Result<SessionData> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("unable to read session file at {}", path.display()))?;
    let data: SessionData = serde_json::from_str(&raw)
        .with_context(|| format!("unable to parse session file at {}", path.display()))?;
    Ok(data)
}

/// Validates the `--resolution` flag as `width,height`.
pub fn parse_resolution(spec: &str) -> Result<(u32, u32)> {
    let (width, height) = spec
        .split_once(',')
        .ok_or_else(|| anyhow::anyhow!("invalid resolution: {}", spec))?;
    let width: u32 = width.trim().parse().context("invalid resolution width")?;
    let height: u32 = height.trim().parse().context("invalid resolution height")?;
    if width == 0 || height == 0 {
        bail!("resolution must be non-zero: {}", spec);
    }
    Ok((width, height))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn test_options(out: &str) -> Options {
        Options::parse_from(["aquatone", "-o", out])
    }

    #[test]
    fn creates_artifact_directories() {
        let dir = tempfile::tempdir().unwrap();
        let session = Session::new(test_options(dir.path().to_str().unwrap())).unwrap();
        assert!(dir.path().join("html").is_dir());
        assert!(dir.path().join("headers").is_dir());
        assert!(dir.path().join("screenshots").is_dir());
        assert_eq!(session.ports, ports::MEDIUM.to_vec());
    }

    #[test]
    fn rejects_file_as_output_directory() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("occupied");
        std::fs::write(&file, "x").unwrap();
        assert!(Session::new(test_options(file.to_str().unwrap())).is_err());
    }

    #[test]
    fn resolution_parsing() {
        assert_eq!(parse_resolution("1440,900").unwrap(), (1440, 900));
        assert!(parse_resolution("1440").is_err());
        assert!(parse_resolution("0,900").is_err());
        assert!(parse_resolution("wide,tall").is_err());
    }

    #[test]
    fn export_round_trips_through_json() {
        let dir = tempfile::tempdir().unwrap();
        let session = Session::new(test_options(dir.path().to_str().unwrap())).unwrap();

        let page = crate::page::Page::new("http://example.com/").unwrap();
        page.set_status("200 OK".into());
        page.add_header("Server", "nginx");
        session.add_page(page);
        session.set_clusters(vec![("cluster-1".into(), vec!["http://example.com/".into()])]);
        session.stats.increment_request_successful();
        session.stats.increment_response_code(200);
        session.stats.finish();

        session.save("aquatone_session.json").unwrap();
        let loaded = load(&dir.path().join("aquatone_session.json")).unwrap();

        assert_eq!(loaded.version, VERSION);
        assert_eq!(loaded.stats.request_successful, 1);
        assert_eq!(loaded.stats.response_code_2xx, 1);
        assert!(loaded.stats.finished_at.is_some());
        assert_eq!(loaded.pages.len(), 1);
        let page = &loaded.pages["http://example.com/"];
        assert_eq!(page.status, "200 OK");
        assert!(page.headers[0].decreases_security);
        assert_eq!(
            loaded.page_similarity_clusters["cluster-1"],
            vec!["http://example.com/"]
        );
    }

    #[tokio::test]
    async fn drain_returns_on_idle_session() {
        let dir = tempfile::tempdir().unwrap();
        let session = Session::new(test_options(dir.path().to_str().unwrap())).unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(1), session.drain())
            .await
            .expect("drain should return immediately on an idle session");
    }
}
