//! Drives a run end to end: setup, agent registration, target publication,
//! pipeline drain, page analysis, report render and session save.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

use crate::agents;
use crate::agents::tcp_port_scanner::DEFAULT_THREADS;
use crate::cli::Options;
use crate::clustering;
use crate::events::Event;
use crate::parsers;
use crate::report::Report;
use crate::session::{self, Session, SessionData, NAME, VERSION};

pub async fn run(options: Options) -> Result<()> {
    init_logging(&options);

    if options.version {
        println!("{} v{}", NAME, VERSION);
        return Ok(());
    }

    if !options.session_path.is_empty() {
        return render_saved_session(&options);
    }

    let session = Session::new(options.clone())?;
    if !options.silent {
        println!(
            "{} v{} started at {}\n",
            NAME,
            VERSION,
            session.stats.started_at.to_rfc3339()
        );
    }

    agents::register_all(&session)?;

    let targets = read_targets(&options)?;
    if targets.is_empty() {
        bail!("no targets found in input");
    }
    if !options.silent {
        let ports = session
            .ports
            .iter()
            .map(|port| port.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        let threads = match options.threads {
            0 => DEFAULT_THREADS,
            threads => threads,
        };
        println!("Targets    : {}", targets.len());
        println!("Threads    : {}", threads);
        println!("Ports      : {}", ports);
        println!("Output dir : {}\n", session.out_dir.display());
    }

    publish_targets(&session, &targets);
    session.drain().await;

    session.bus.publish(Event::SessionEnd);
    session.drain().await;

    analyze_pages(&session);

    render_report(
        &session.export(),
        &options,
        &session.file_path("aquatone_report.html"),
    )?;

    session.stats.finish();
    if let Err(err) = session.save("aquatone_session.json") {
        error!("failed to save session file: {}", err);
    }

    if !options.silent {
        print_stats(&session);
    }
    Ok(())
}

fn init_logging(options: &Options) {
    let level = if options.debug {
        "debug"
    } else if options.silent {
        "error"
    } else {
        "info"
    };
    let filter = format!("aquatone={level},reqwest=warn,hyper=warn,h2=warn");
    let env_filter = EnvFilter::try_new(&filter).unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .try_init();
}

fn read_targets(options: &Options) -> Result<Vec<String>> {
    let stdin = std::io::stdin();
    if options.nmap {
        parsers::nmap::parse(stdin.lock()).context("unable to parse input as Nmap/Masscan XML")
    } else {
        parsers::regex::parse(stdin.lock()).context("unable to parse input")
    }
}

/// Dispatches each target into the pipeline. Nmap `host:port` entries skip
/// the port scanner; everything else enters as a Url or Host event.
fn publish_targets(session: &Arc<Session>, targets: &[String]) {
    session.bus.publish(Event::SessionStart);

    for target in targets {
        if session.options.nmap {
            match split_host_port(target) {
                Some((host, port)) => session.bus.publish(Event::TcpPort { port, host }),
                None => session.bus.publish(Event::Host(target.clone())),
            }
        } else if is_http_url(target) {
            session.bus.publish(Event::Url(target.clone()));
        } else if target.contains("://") {
            debug!("skipping target with unsupported scheme: {}", target);
        } else {
            session.bus.publish(Event::Host(target.clone()));
        }
    }
}

fn split_host_port(target: &str) -> Option<(String, u16)> {
    let (host, port) = target.rsplit_once(':')?;
    let port = port.parse().ok()?;
    (!host.is_empty()).then(|| (host.to_string(), port))
}

fn is_http_url(target: &str) -> bool {
    let lowered = target.to_lowercase();
    (lowered.starts_with("http://") || lowered.starts_with("https://"))
        && url::Url::parse(target).is_ok()
}

/// Sequential post-drain pass: compute the DOM skeleton of every saved body,
/// record analyzed URLs, then cluster.
fn analyze_pages(session: &Session) {
    if !session.options.silent {
        println!("Calculating page structures...");
    }

    let urls_path = session.file_path("aquatone_urls.txt");
    let mut urls_file = match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&urls_path)
    {
        Ok(file) => Some(file),
        Err(err) => {
            error!("failed to open {}: {}", urls_path.display(), err);
            None
        }
    };

    let mut structured: Vec<(String, Vec<String>)> = Vec::new();
    for page in session.pages_sorted() {
        let mut structure = Vec::new();
        let body_rel = page.body_path();
        if !body_rel.is_empty() {
            match std::fs::read_to_string(session.file_path(&body_rel)) {
                Ok(body) => {
                    structure = clustering::page_structure(&body);
                    page.set_page_structure(structure.clone());
                    if let Some(file) = urls_file.as_mut() {
                        if let Err(err) = writeln!(file, "{}", page.url) {
                            error!("failed to record {}: {}", page.url, err);
                        }
                    }
                }
                Err(err) => {
                    debug!("skipping structure for {}: {}", page.url, err);
                }
            }
        }
        structured.push((page.url.clone(), structure));
    }

    if !session.options.silent {
        println!("Clustering similar pages...");
    }
    session.set_clusters(clustering::cluster_pages(&structured));
}

fn render_report(data: &SessionData, options: &Options, destination: &Path) -> Result<()> {
    let template = if options.template_path.is_empty() {
        None
    } else {
        Some(
            std::fs::read_to_string(&options.template_path)
                .context("can't read report template file")?,
        )
    };

    let html = Report::new(data, template)
        .render()
        .context("error rendering report")?;
    std::fs::write(destination, html)
        .with_context(|| format!("error writing report to {}", destination.display()))?;

    if !options.silent {
        println!("Wrote HTML report to: {}\n", destination.display());
    }
    Ok(())
}

/// `--session`: no pipeline, just re-render the report from saved data.
fn render_saved_session(options: &Options) -> Result<()> {
    let data = session::load(Path::new(&options.session_path))?;
    let out_dir = PathBuf::from(&options.out);
    std::fs::create_dir_all(&out_dir).context("unable to create output directory")?;

    if !options.silent {
        println!("Loaded session at {}", options.session_path);
    }
    render_report(&data, options, &out_dir.join("aquatone_report.html"))
}

fn print_stats(session: &Session) {
    let stats = session.stats.snapshot();

    println!("Time:");
    println!(" - Started at  : {}", stats.started_at.to_rfc3339());
    if let Some(finished) = stats.finished_at {
        println!(" - Finished at : {}", finished.to_rfc3339());
        println!(
            " - Duration    : {}s\n",
            (finished - stats.started_at).num_seconds()
        );
    }

    println!("Requests:");
    println!(" - Successful : {}", stats.request_successful);
    println!(" - Failed     : {}\n", stats.request_failed);
    println!(" - 2xx : {}", stats.response_code_2xx);
    println!(" - 3xx : {}", stats.response_code_3xx);
    println!(" - 4xx : {}", stats.response_code_4xx);
    println!(" - 5xx : {}\n", stats.response_code_5xx);

    println!("Screenshots:");
    println!(" - Successful : {}", stats.screenshot_successful);
    println!(" - Failed     : {}\n", stats.screenshot_failed);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_targets() {
        assert!(is_http_url("http://example.com"));
        assert!(is_http_url("HTTPS://example.com/x"));
        assert!(!is_http_url("ftp://example.com"));
        assert!(!is_http_url("example.com"));
    }

    #[test]
    fn splits_nmap_entries() {
        assert_eq!(split_host_port("h:8080"), Some(("h".to_string(), 8080)));
        assert_eq!(split_host_port("h"), None);
        assert_eq!(split_host_port("h:notaport"), None);
        assert_eq!(split_host_port(":80"), None);
    }
}
