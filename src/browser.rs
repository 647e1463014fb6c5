//! Headless Chrome/Chromium driven as a black-box subprocess: binary
//! discovery, version gate, per-session temp profile and kill-on-deadline
//! screenshot capture.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::process::Command;
use tracing::{debug, warn};
use uuid::Uuid;
use which::which;

use crate::cli::Options;
use crate::user_agent::random_user_agent;

const CHROME_BINARY_NAMES: &[&str] = &[
    "google-chrome",
    "google-chrome-stable",
    "google-chrome-beta",
    "chromium-browser",
    "chromium",
];

const CHROME_FIXED_PATHS: &[&str] = &[
    "/usr/bin/google-chrome",
    "/usr/bin/google-chrome-beta",
    "/usr/bin/google-chrome-unstable",
    "/usr/bin/chromium-browser",
    "/usr/bin/chromium",
    "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
    "/Applications/Google Chrome Canary.app/Contents/MacOS/Google Chrome Canary",
    "/Applications/Chromium.app/Contents/MacOS/Chromium",
    "C:/Program Files (x86)/Google/Chrome/Application/chrome.exe",
];

const MINIMUM_MAJOR_VERSION: u32 = 72;

static VERSION_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+)\.").unwrap());

pub struct Chrome {
    path: PathBuf,
    user_dir: PathBuf,
    resolution: String,
    proxy: Option<String>,
    timeout: Duration,
}

impl Chrome {
    /// Locates the binary, verifies its version and creates the temporary
    /// profile directory. Fatal when no usable binary is found.
    pub fn new(options: &Options) -> Result<Self> {
        let path = locate(options)?;
        check_version(&path)?;

        let user_dir =
            std::env::temp_dir().join(format!("aquatone-chrome-{}", Uuid::new_v4().simple()));
        std::fs::create_dir_all(&user_dir)
            .context("unable to create temporary user directory for Chrome")?;
        debug!("created Chrome user directory at {}", user_dir.display());

        Ok(Self {
            path,
            user_dir,
            resolution: options.resolution.clone(),
            proxy: (!options.proxy.is_empty()).then(|| options.proxy.clone()),
            timeout: Duration::from_millis(options.screenshot_timeout),
        })
    }

    /// Renders `url` to a PNG at `destination`. The child process is killed
    /// when the deadline passes.
    pub async fn capture(&self, url: &str, destination: &Path) -> Result<()> {
        let mut args: Vec<String> = vec![
            "--headless".into(),
            "--disable-gpu".into(),
            "--hide-scrollbars".into(),
            "--mute-audio".into(),
            "--disable-notifications".into(),
            "--no-first-run".into(),
            "--disable-crash-reporter".into(),
            "--ignore-certificate-errors".into(),
            "--incognito".into(),
            "--disable-infobars".into(),
            "--disable-sync".into(),
            "--no-default-browser-check".into(),
            format!("--user-data-dir={}", self.user_dir.display()),
            format!("--user-agent={}", random_user_agent()),
            format!("--window-size={}", self.resolution),
            format!("--screenshot={}", destination.display()),
        ];

        if unsafe { libc::geteuid() } == 0 {
            args.push("--no-sandbox".into());
        }
        if let Some(proxy) = &self.proxy {
            args.push(format!("--proxy-server={}", proxy));
        }
        args.push(url.to_string());

        let mut child = Command::new(&self.path)
            .args(&args)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .context("unable to start Chrome")?;

        match tokio::time::timeout(self.timeout, child.wait()).await {
            Ok(Ok(status)) if status.success() => Ok(()),
            Ok(Ok(status)) => bail!("Chrome exited with {}", status),
            Ok(Err(err)) => {
                let _ = child.start_kill();
                Err(err).context("unable to wait for Chrome")
            }
            Err(_) => {
                // Deadline passed: kill and reap; failures here are tolerated
                // since the process may already be gone.
                let _ = child.start_kill();
                let _ = child.wait().await;
                bail!("screenshot timed out")
            }
        }
    }

    /// Deletes the temporary profile directory on session end.
    pub fn cleanup(&self) {
        if let Err(err) = std::fs::remove_dir_all(&self.user_dir) {
            debug!(
                "unable to delete Chrome user directory {}: {}",
                self.user_dir.display(),
                err
            );
        } else {
            debug!("deleted Chrome user directory {}", self.user_dir.display());
        }
    }
}

fn locate(options: &Options) -> Result<PathBuf> {
    if !options.chrome_path.is_empty() {
        let path = PathBuf::from(&options.chrome_path);
        if !path.exists() {
            bail!(
                "Chrome path {} specified with --chrome-path does not exist",
                path.display()
            );
        }
        return Ok(path);
    }

    for name in CHROME_BINARY_NAMES {
        if let Ok(path) = which(name) {
            return Ok(path);
        }
    }
    for fixed in CHROME_FIXED_PATHS {
        let path = PathBuf::from(fixed);
        if path.exists() {
            return Ok(path);
        }
    }

    bail!(
        "unable to locate an installation of Chrome or Chromium; \
         install one or point --chrome-path at the executable"
    )
}

/// Runs `--version` and warns when the major version predates reliable
/// headless screenshotting. A binary that cannot execute at all is a fatal
/// setup error, the same as a missing one.
fn check_version(path: &Path) -> Result<()> {
    let output = std::process::Command::new(path)
        .arg("--version")
        .output()
        .with_context(|| {
            format!(
                "failed to execute {} --version; ensure it is a valid Chrome/Chromium executable",
                path.display()
            )
        })?;
    let version = String::from_utf8_lossy(&output.stdout);
    debug!("Chrome version output: {}", version.trim());

    match parse_major_version(&version) {
        Some(major) if major < MINIMUM_MAJOR_VERSION => {
            warn!(
                "Chrome/Chromium version {} is older than {}; screenshots of HTTPS URLs may be unreliable",
                major, MINIMUM_MAJOR_VERSION
            );
        }
        Some(_) => {}
        None => warn!(
            "unable to determine Chrome version from {:?}; screenshots may be unreliable",
            version.trim()
        ),
    }
    Ok(())
}

fn parse_major_version(version: &str) -> Option<u32> {
    VERSION_RE
        .captures(version)
        .and_then(|captures| captures.get(1))
        .and_then(|major| major.as_str().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_major_version_from_banner() {
        assert_eq!(
            parse_major_version("Google Chrome 120.0.6099.109"),
            Some(120)
        );
        assert_eq!(parse_major_version("Chromium 71.0.3578.98 built"), Some(71));
        assert_eq!(parse_major_version("no digits here"), None);
    }

    #[test]
    fn explicit_chrome_path_must_exist() {
        let mut options = <Options as clap::Parser>::parse_from(["aquatone"]);
        options.chrome_path = "/definitely/not/a/real/chrome".into();
        assert!(locate(&options).is_err());
    }

    #[test]
    fn unexecutable_chrome_binary_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let fake = dir.path().join("chrome");
        std::fs::write(&fake, "not a binary").unwrap();

        let mut options = <Options as clap::Parser>::parse_from(["aquatone"]);
        options.chrome_path = fake.to_str().unwrap().to_string();
        assert!(locate(&options).is_ok());
        assert!(Chrome::new(&options).is_err());
    }
}
