//! UrlResponsive: matches response headers and the saved body against a
//! fixed table of technology signatures and tags the page with the hits.

use std::sync::Arc;

use anyhow::Result;
use tracing::debug;

use crate::events::{Event, Topic};
use crate::page::PageData;
use crate::session::Session;

use super::Agent;

/// One known technology. Header matchers pair a lowercased header name with
/// a lowercased value fragment (empty fragment = any value); body matchers
/// are lowercased fragments of the response body.
struct Fingerprint {
    name: &'static str,
    category: &'static str,
    website: &'static str,
    headers: &'static [(&'static str, &'static str)],
    body: &'static [&'static str],
}

static FINGERPRINTS: &[Fingerprint] = &[
    Fingerprint {
        name: "Nginx",
        category: "Web servers",
        website: "https://nginx.org/",
        headers: &[("server", "nginx")],
        body: &[],
    },
    Fingerprint {
        name: "Apache",
        category: "Web servers",
        website: "https://httpd.apache.org/",
        headers: &[("server", "apache")],
        body: &[],
    },
    Fingerprint {
        name: "Microsoft IIS",
        category: "Web servers",
        website: "https://www.iis.net/",
        headers: &[("server", "microsoft-iis")],
        body: &[],
    },
    Fingerprint {
        name: "LiteSpeed",
        category: "Web servers",
        website: "https://www.litespeedtech.com/",
        headers: &[("server", "litespeed")],
        body: &[],
    },
    Fingerprint {
        name: "OpenResty",
        category: "Web servers",
        website: "https://openresty.org/",
        headers: &[("server", "openresty")],
        body: &[],
    },
    Fingerprint {
        name: "Caddy",
        category: "Web servers",
        website: "https://caddyserver.com/",
        headers: &[("server", "caddy")],
        body: &[],
    },
    Fingerprint {
        name: "PHP",
        category: "Programming languages",
        website: "https://www.php.net/",
        headers: &[("x-powered-by", "php"), ("set-cookie", "phpsessid")],
        body: &[],
    },
    Fingerprint {
        name: "ASP.NET",
        category: "Web frameworks",
        website: "https://dotnet.microsoft.com/apps/aspnet",
        headers: &[
            ("x-powered-by", "asp.net"),
            ("x-aspnet-version", ""),
            ("x-aspnetmvc-version", ""),
        ],
        body: &["__viewstate"],
    },
    Fingerprint {
        name: "Express",
        category: "Web frameworks",
        website: "https://expressjs.com/",
        headers: &[("x-powered-by", "express")],
        body: &[],
    },
    Fingerprint {
        name: "Django",
        category: "Web frameworks",
        website: "https://www.djangoproject.com/",
        headers: &[("set-cookie", "csrftoken")],
        body: &["csrfmiddlewaretoken"],
    },
    Fingerprint {
        name: "Ruby on Rails",
        category: "Web frameworks",
        website: "https://rubyonrails.org/",
        headers: &[("x-powered-by", "phusion passenger"), ("set-cookie", "_rails")],
        body: &[],
    },
    Fingerprint {
        name: "Laravel",
        category: "Web frameworks",
        website: "https://laravel.com/",
        headers: &[("set-cookie", "laravel_session")],
        body: &[],
    },
    Fingerprint {
        name: "WordPress",
        category: "CMS",
        website: "https://wordpress.org/",
        headers: &[("x-pingback", "xmlrpc.php")],
        body: &["/wp-content/", "/wp-includes/"],
    },
    Fingerprint {
        name: "Drupal",
        category: "CMS",
        website: "https://www.drupal.org/",
        headers: &[("x-drupal-cache", ""), ("x-generator", "drupal")],
        body: &["drupal.settings"],
    },
    Fingerprint {
        name: "Joomla",
        category: "CMS",
        website: "https://www.joomla.org/",
        headers: &[],
        body: &["content=\"joomla!", "/media/jui/"],
    },
    Fingerprint {
        name: "Jenkins",
        category: "CI",
        website: "https://www.jenkins.io/",
        headers: &[("x-jenkins", "")],
        body: &[],
    },
    Fingerprint {
        name: "Kibana",
        category: "Dashboards",
        website: "https://www.elastic.co/kibana",
        headers: &[("kbn-name", "")],
        body: &[],
    },
    Fingerprint {
        name: "Grafana",
        category: "Dashboards",
        website: "https://grafana.com/",
        headers: &[("set-cookie", "grafana_session")],
        body: &["grafana-app"],
    },
    Fingerprint {
        name: "Cloudflare",
        category: "CDN",
        website: "https://www.cloudflare.com/",
        headers: &[("server", "cloudflare"), ("cf-ray", "")],
        body: &[],
    },
    Fingerprint {
        name: "Varnish",
        category: "Caching",
        website: "https://varnish-cache.org/",
        headers: &[("via", "varnish"), ("x-varnish", "")],
        body: &[],
    },
    Fingerprint {
        name: "Amazon CloudFront",
        category: "CDN",
        website: "https://aws.amazon.com/cloudfront/",
        headers: &[("via", "cloudfront"), ("x-amz-cf-id", "")],
        body: &[],
    },
    Fingerprint {
        name: "Fastly",
        category: "CDN",
        website: "https://www.fastly.com/",
        headers: &[("x-fastly-request-id", "")],
        body: &[],
    },
    Fingerprint {
        name: "Akamai",
        category: "CDN",
        website: "https://www.akamai.com/",
        headers: &[("server", "akamaighost"), ("x-akamai-transformed", "")],
        body: &[],
    },
    Fingerprint {
        name: "jQuery",
        category: "JavaScript libraries",
        website: "https://jquery.com/",
        headers: &[],
        body: &["jquery.js", "jquery.min.js"],
    },
    Fingerprint {
        name: "React",
        category: "JavaScript frameworks",
        website: "https://react.dev/",
        headers: &[],
        body: &["data-reactroot", "react-dom"],
    },
    Fingerprint {
        name: "AngularJS",
        category: "JavaScript frameworks",
        website: "https://angularjs.org/",
        headers: &[],
        body: &["ng-app", "angular.js", "angular.min.js"],
    },
    Fingerprint {
        name: "Vue.js",
        category: "JavaScript frameworks",
        website: "https://vuejs.org/",
        headers: &[],
        body: &["vue.js", "vue.min.js", "data-v-app"],
    },
    Fingerprint {
        name: "Bootstrap",
        category: "UI frameworks",
        website: "https://getbootstrap.com/",
        headers: &[],
        body: &["bootstrap.css", "bootstrap.min.css", "bootstrap.min.js"],
    },
    Fingerprint {
        name: "Google Analytics",
        category: "Analytics",
        website: "https://marketingplatform.google.com/about/analytics/",
        headers: &[],
        body: &["google-analytics.com/analytics.js", "www.googletagmanager.com/gtag"],
    },
    Fingerprint {
        name: "Shopify",
        category: "Ecommerce",
        website: "https://www.shopify.com/",
        headers: &[("x-shopid", "")],
        body: &["cdn.shopify.com"],
    },
];

pub struct UrlTechnologyFingerprinter;

impl Agent for UrlTechnologyFingerprinter {
    fn id(&self) -> &'static str {
        "agent:url_technology_fingerprinter"
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
                    let data = page.snapshot();

                    let body_rel = page.body_path();
                    let body = if body_rel.is_empty() {
                        String::new()
                    } else {
                        tokio::fs::read_to_string(session.file_path(&body_rel))
                            .await
                            .unwrap_or_default()
                            .to_lowercase()
                    };

                    for fingerprint in matches(&data, &body) {
                        debug!("{}: detected {}", url, fingerprint.name);
                        page.add_unique_tag(
                            fingerprint.name,
                            fingerprint.category,
                            fingerprint.website,
                        );
                    }
                });
            }
        });
        Ok(())
    }
}

fn matches(data: &PageData, lowercased_body: &str) -> Vec<&'static Fingerprint> {
    FINGERPRINTS
        .iter()
        .filter(|fingerprint| {
            let header_hit = fingerprint.headers.iter().any(|(name, fragment)| {
                data.headers.iter().any(|header| {
                    header.name.eq_ignore_ascii_case(name)
                        && (fragment.is_empty()
                            || header.value.to_lowercase().contains(fragment))
                })
            });
            let body_hit = !lowercased_body.is_empty()
                && fingerprint
                    .body
                    .iter()
                    .any(|fragment| lowercased_body.contains(fragment));
            header_hit || body_hit
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::Page;

    fn page_with_headers(headers: &[(&str, &str)]) -> PageData {
        let page = Page::new("http://example.com/").unwrap();
        for (name, value) in headers {
            page.add_header(name, value);
        }
        page.snapshot()
    }

    #[test]
    fn matches_server_header_case_insensitively() {
        let data = page_with_headers(&[("Server", "NGINX/1.24.0")]);
        let hits = matches(&data, "");
        assert!(hits.iter().any(|f| f.name == "Nginx"));
    }

    #[test]
    fn matches_body_fragments() {
        let data = page_with_headers(&[]);
        let body = "<html><script src=\"/assets/jquery.min.js\"></script>\
                    <link href=\"/wp-content/themes/x.css\"></html>"
            .to_lowercase();
        let hits = matches(&data, &body);
        let names: Vec<&str> = hits.iter().map(|f| f.name).collect();
        assert!(names.contains(&"jQuery"));
        assert!(names.contains(&"WordPress"));
    }

    #[test]
    fn any_value_matcher_hits_on_header_presence() {
        let data = page_with_headers(&[("X-Jenkins", "2.440")]);
        assert!(matches(&data, "").iter().any(|f| f.name == "Jenkins"));
    }

    #[test]
    fn clean_page_matches_nothing() {
        let data = page_with_headers(&[("Content-Type", "text/plain")]);
        assert!(matches(&data, "plain text").is_empty());
    }
}
