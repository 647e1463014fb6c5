//! HTML report: an embedded shell with token substitution, one section per
//! similarity cluster, one card per page.

use anyhow::{bail, Result};

use crate::session::SessionData;

const DEFAULT_TEMPLATE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>{{title}}</title>
<style>
  body { font-family: -apple-system, "Segoe UI", Helvetica, Arial, sans-serif; margin: 0; background: #f4f5f7; color: #24292f; }
  header { background: #1b2a38; color: #fff; padding: 18px 28px; }
  header h1 { margin: 0; font-size: 20px; }
  header .generated { color: #9fb3c8; font-size: 12px; margin-top: 4px; }
  .summary { display: flex; flex-wrap: wrap; gap: 14px; padding: 18px 28px; }
  .summary .stat { background: #fff; border: 1px solid #d8dee4; border-radius: 6px; padding: 10px 16px; }
  .summary .stat b { display: block; font-size: 18px; }
  .cluster { margin: 0 28px 26px; }
  .cluster h2 { font-size: 14px; color: #57606a; border-bottom: 1px solid #d8dee4; padding-bottom: 6px; }
  .pages { display: flex; flex-wrap: wrap; gap: 16px; }
  .page { background: #fff; border: 1px solid #d8dee4; border-radius: 6px; width: 360px; overflow: hidden; }
  .page img { width: 100%; display: block; border-bottom: 1px solid #d8dee4; }
  .page .missing { display: block; padding: 40px 0; text-align: center; color: #8c959f; border-bottom: 1px solid #d8dee4; }
  .page .body { padding: 10px 14px 14px; }
  .page h3 { margin: 0 0 4px; font-size: 14px; word-break: break-all; }
  .page .status { font-size: 12px; color: #57606a; }
  .page .addrs { font-size: 11px; color: #8c959f; word-break: break-all; }
  .tag { display: inline-block; background: #ddf4ff; color: #0969da; border-radius: 10px; padding: 1px 8px; font-size: 11px; margin: 2px 2px 0 0; }
  .note-error { background: #ffebe9; color: #cf222e; border-radius: 4px; padding: 4px 8px; font-size: 12px; margin-top: 6px; }
  .headers { margin-top: 8px; font-size: 11px; }
  .headers summary { cursor: pointer; color: #57606a; }
  .headers td { padding: 1px 6px 1px 0; vertical-align: top; word-break: break-all; }
  .header-bad { color: #cf222e; }
  .header-good { color: #1a7f37; }
</style>
</head>
<body>
<header><h1>{{title}}</h1><div class="generated">{{generated}}</div></header>
<div class="summary">{{summary}}</div>
{{content}}
</body>
</html>
"#;

pub struct Report<'a> {
    session: &'a SessionData,
    template: String,
}

impl<'a> Report<'a> {
    pub fn new(session: &'a SessionData, template: Option<String>) -> Self {
        Self {
            session,
            template: template.unwrap_or_else(|| DEFAULT_TEMPLATE.to_string()),
        }
    }

    pub fn render(&self) -> Result<String> {
        if !self.template.contains("{{content}}") {
            bail!("report template has no {{{{content}}}} token");
        }
        Ok(self
            .template
            .replace("{{title}}", "aquatone report")
            .replace("{{generated}}", &self.generated_line())
            .replace("{{summary}}", &self.summary())
            .replace("{{content}}", &self.content()))
    }

    fn generated_line(&self) -> String {
        match self.session.stats.finished_at {
            Some(finished) => format!(
                "generated {} · started {}",
                finished.to_rfc3339(),
                self.session.stats.started_at.to_rfc3339()
            ),
            None => format!("started {}", self.session.stats.started_at.to_rfc3339()),
        }
    }

    fn summary(&self) -> String {
        let stats = &self.session.stats;
        let entries = [
            ("Pages", self.session.pages.len() as u64),
            ("Clusters", self.session.page_similarity_clusters.len() as u64),
            ("Requests OK", stats.request_successful),
            ("Requests failed", stats.request_failed),
            ("Ports open", stats.port_open),
            ("Screenshots", stats.screenshot_successful),
        ];
        entries
            .iter()
            .map(|(label, value)| format!("<div class=\"stat\"><b>{}</b>{}</div>", value, label))
            .collect()
    }

    fn content(&self) -> String {
        // Largest clusters first; ties broken by id so output is stable.
        let mut clusters: Vec<(&String, &Vec<String>)> =
            self.session.page_similarity_clusters.iter().collect();
        clusters.sort_by(|a, b| b.1.len().cmp(&a.1.len()).then_with(|| a.0.cmp(b.0)));

        let mut out = String::new();
        for (index, (_, urls)) in clusters.iter().enumerate() {
            out.push_str(&format!(
                "<section class=\"cluster\"><h2>Cluster {} · {} page{}</h2><div class=\"pages\">",
                index + 1,
                urls.len(),
                if urls.len() == 1 { "" } else { "s" }
            ));
            for url in *urls {
                if let Some(page) = self.session.pages.get(url) {
                    out.push_str(&page_card(page));
                }
            }
            out.push_str("</div></section>");
        }

        // Pages that never entered a cluster still belong in the report.
        let clustered: std::collections::HashSet<&String> = self
            .session
            .page_similarity_clusters
            .values()
            .flatten()
            .collect();
        let mut orphans: Vec<&String> = self
            .session
            .pages
            .keys()
            .filter(|url| !clustered.contains(url))
            .collect();
        orphans.sort();
        if !orphans.is_empty() {
            out.push_str("<section class=\"cluster\"><h2>Unclustered</h2><div class=\"pages\">");
            for url in orphans {
                if let Some(page) = self.session.pages.get(url) {
                    out.push_str(&page_card(page));
                }
            }
            out.push_str("</div></section>");
        }
        out
    }
}

fn page_card(page: &crate::page::PageData) -> String {
    let mut card = String::from("<div class=\"page\">");

    if page.has_screenshot {
        card.push_str(&format!(
            "<a href=\"{0}\"><img src=\"{0}\" alt=\"screenshot\" loading=\"lazy\"></a>",
            escape(&page.screenshot_path)
        ));
    } else {
        card.push_str("<span class=\"missing\">no screenshot</span>");
    }

    card.push_str("<div class=\"body\">");
    card.push_str(&format!(
        "<h3><a href=\"{0}\">{1}</a></h3>",
        escape(&page.url),
        escape(if page.page_title.is_empty() {
            &page.url
        } else {
            &page.page_title
        })
    ));
    card.push_str(&format!("<div class=\"status\">{}</div>", escape(&page.status)));
    if !page.addrs.is_empty() {
        card.push_str(&format!(
            "<div class=\"addrs\">{}</div>",
            escape(&page.addrs.join(", "))
        ));
    }

    for tag in &page.tags {
        let inner = if tag.has_link() {
            format!("<a href=\"{}\">{}</a>", escape(&tag.link), escape(&tag.text))
        } else {
            escape(&tag.text)
        };
        card.push_str(&format!(
            "<span class=\"tag\" data-hash=\"{}\">{}</span>",
            escape(&tag.hash),
            inner
        ));
    }

    for note in &page.notes {
        card.push_str(&format!(
            "<div class=\"note-{}\">{}</div>",
            escape(&note.note_type),
            escape(&note.text)
        ));
    }

    if !page.headers.is_empty() {
        card.push_str("<details class=\"headers\"><summary>headers</summary><table>");
        for header in &page.headers {
            let class = if header.decreases_security {
                " class=\"header-bad\""
            } else if header.increases_security {
                " class=\"header-good\""
            } else {
                ""
            };
            card.push_str(&format!(
                "<tr{}><td>{}</td><td>{}</td></tr>",
                class,
                escape(&header.name),
                escape(&header.value)
            ));
        }
        card.push_str("</table></details>");
    }

    card.push_str("</div></div>");
    card
}

fn escape(text: &str) -> String {
    v_htmlescape::escape(text).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Options;
    use crate::page::Page;
    use crate::session::{SessionData, StatsData};
    use clap::Parser;
    use std::collections::HashMap;

    fn sample_session() -> SessionData {
        let page = Page::new("http://example.com/").unwrap();
        page.set_status("200 OK".into());
        page.set_page_title("Example <Domain> 'quoted'".into());
        page.add_header("Server", "nginx");
        page.add_tag("Nginx", "Web servers", "https://nginx.org/");
        page.add_note("Possible subdomain takeover", "error");

        let mut pages = HashMap::new();
        pages.insert("http://example.com/".to_string(), page.snapshot());

        let mut clusters = HashMap::new();
        clusters.insert("c1".to_string(), vec!["http://example.com/".to_string()]);

        SessionData {
            version: "0.1.0".into(),
            options: Options::parse_from(["aquatone"]),
            stats: StatsData {
                started_at: chrono::Utc::now(),
                finished_at: Some(chrono::Utc::now()),
                request_successful: 1,
                request_failed: 0,
                response_code_2xx: 1,
                response_code_3xx: 0,
                response_code_4xx: 0,
                response_code_5xx: 0,
                port_open: 1,
                port_closed: 0,
                screenshot_successful: 0,
                screenshot_failed: 1,
            },
            ports: vec![80, 443],
            pages,
            page_similarity_clusters: clusters,
        }
    }

    #[test]
    fn renders_pages_and_escapes_content() {
        let session = sample_session();
        let html = Report::new(&session, None).render().unwrap();
        assert!(html.contains("http://example.com/"));
        assert!(html.contains("Example &lt;Domain&gt; &#x27;quoted&#x27;"));
        assert!(html.contains("200 OK"));
        assert!(html.contains("Possible subdomain takeover"));
        assert!(html.contains("class=\"header-bad\""));
        assert!(!html.contains("{{content}}"));
    }

    #[test]
    fn custom_template_must_carry_the_content_token() {
        let session = sample_session();
        assert!(Report::new(&session, Some("<html>static</html>".into()))
            .render()
            .is_err());

        let html = Report::new(&session, Some("<body>{{content}}</body>".into()))
            .render()
            .unwrap();
        assert!(html.starts_with("<body>"));
        assert!(html.contains("http://example.com/"));
    }

    #[test]
    fn pages_outside_clusters_are_reported() {
        let mut session = sample_session();
        session.page_similarity_clusters.clear();
        let html = Report::new(&session, None).render().unwrap();
        assert!(html.contains("Unclustered"));
        assert!(html.contains("http://example.com/"));
    }
}
