//! Command line surface. The parsed options are read-only after startup and
//! are serialized into the session file.

use clap::Parser;
use serde::{Deserialize, Serialize};

/// Discover and report on HTTP services across large target sets.
#[derive(Parser, Debug, Clone, Serialize, Deserialize)]
#[command(
    name = "aquatone",
    about = "Visual inspection and reporting tool for HTTP services",
    disable_version_flag = true
)]
#[serde(rename_all = "camelCase")]
pub struct Options {
    /// Number of concurrent threads for port scanning (0 = default of 100)
    #[arg(short = 't', long, default_value_t = 0)]
    pub threads: usize,

    /// Directory to write artifacts to
    #[arg(short = 'o', long, default_value = ".")]
    pub out: String,

    /// Load a saved session file and generate the HTML report only
    #[arg(short = 's', long = "session", default_value = "")]
    pub session_path: String,

    /// Path to a custom HTML template for the report
    #[arg(short = 'T', long = "template-path", default_value = "")]
    pub template_path: String,

    /// Ports to scan on hosts: a comma-separated list or one of the aliases
    /// small, medium, large, xlarge
    #[arg(short = 'p', long, default_value = "medium")]
    pub ports: String,

    /// Proxy for HTTP requests and Chrome
    #[arg(short = 'x', long, default_value = "")]
    pub proxy: String,

    /// Full path to the Chrome/Chromium executable
    #[arg(short = 'c', long = "chrome-path", default_value = "")]
    pub chrome_path: String,

    /// Screenshot resolution as width,height
    #[arg(short = 'r', long, default_value = "1440,900")]
    pub resolution: String,

    /// Timeout in milliseconds for TCP port scans
    #[arg(short = 'S', long = "scan-timeout", default_value_t = 100)]
    pub scan_timeout: u64,

    /// Timeout in milliseconds for HTTP requests
    #[arg(short = 'H', long = "http-timeout", default_value_t = 3000)]
    pub http_timeout: u64,

    /// Timeout in milliseconds for screenshots
    #[arg(short = 'z', long = "screenshot-timeout", default_value_t = 30000)]
    pub screenshot_timeout: u64,

    /// Parse stdin as Nmap/Masscan XML
    #[arg(short = 'm', long, default_value_t = false)]
    pub nmap: bool,

    /// Save response bodies to files
    #[arg(
        short = 'b',
        long = "save-body",
        default_value_t = true,
        action = clap::ArgAction::Set,
        num_args = 0..=1,
        default_missing_value = "true"
    )]
    pub save_body: bool,

    /// Suppress all output except errors
    #[arg(short = 'q', long, default_value_t = false)]
    pub silent: bool,

    /// Print debugging information
    #[arg(short = 'd', long, default_value_t = false)]
    pub debug: bool,

    /// Print the version and exit
    #[arg(short = 'v', long, default_value_t = false)]
    pub version: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_table() {
        let options = Options::parse_from(["aquatone"]);
        assert_eq!(options.threads, 0);
        assert_eq!(options.out, ".");
        assert_eq!(options.ports, "medium");
        assert_eq!(options.resolution, "1440,900");
        assert_eq!(options.scan_timeout, 100);
        assert_eq!(options.http_timeout, 3000);
        assert_eq!(options.screenshot_timeout, 30000);
        assert!(options.save_body);
        assert!(!options.nmap);
        assert!(!options.silent);
        assert!(!options.debug);
        assert!(!options.version);
    }

    #[test]
    fn save_body_can_be_disabled() {
        let options = Options::parse_from(["aquatone", "--save-body", "false"]);
        assert!(!options.save_body);
        let options = Options::parse_from(["aquatone", "-b"]);
        assert!(options.save_body);
    }

    #[test]
    fn short_flags_parse() {
        let options = Options::parse_from([
            "aquatone", "-t", "50", "-o", "/tmp/scan", "-p", "80,443", "-S", "250", "-m",
        ]);
        assert_eq!(options.threads, 50);
        assert_eq!(options.out, "/tmp/scan");
        assert_eq!(options.ports, "80,443");
        assert_eq!(options.scan_timeout, 250);
        assert!(options.nmap);
    }
}
