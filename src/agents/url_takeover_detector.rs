//! UrlResponsive: flags hostnames whose CNAME points at a third-party
//! service while the response body carries that service's unclaimed-resource
//! fingerprint.

use std::net::IpAddr;
use std::sync::Arc;

use anyhow::Result;
use hickory_resolver::name_server::TokioConnectionProvider;
use hickory_resolver::proto::rr::{RData, RecordType};
use hickory_resolver::TokioResolver;
use tracing::{debug, warn};

use crate::events::{Event, Topic};
use crate::session::Session;

use super::Agent;

/// One hosted service that can be claimed by an attacker when the DNS record
/// outlives the resource. CNAME patterns are matched against the resolved
/// CNAME chain; fingerprints against the lowercased response body.
struct TakeoverSignature {
    service: &'static str,
    cnames: &'static [&'static str],
    fingerprints: &'static [&'static str],
}

static TAKEOVER_SIGNATURES: &[TakeoverSignature] = &[
    TakeoverSignature {
        service: "AWS S3",
        cnames: &[".s3.amazonaws.com", ".s3-website", "s3.amazonaws.com"],
        fingerprints: &["nosuchbucket", "the specified bucket does not exist"],
    },
    TakeoverSignature {
        service: "AWS CloudFront",
        cnames: &[".cloudfront.net"],
        fingerprints: &["bad request", "the request could not be satisfied"],
    },
    TakeoverSignature {
        service: "GitHub Pages",
        cnames: &[".github.io", ".github.map.fastly.net"],
        fingerprints: &["there isn't a github pages site here"],
    },
    TakeoverSignature {
        service: "Heroku",
        cnames: &[".herokuapp.com", ".herokudns.com", ".herokussl.com"],
        fingerprints: &["no such app", "herokucdn.com/error-pages/no-such-app.html"],
    },
    TakeoverSignature {
        service: "Shopify",
        cnames: &["shops.myshopify.com", ".myshopify.com"],
        fingerprints: &["sorry, this shop is currently unavailable"],
    },
    TakeoverSignature {
        service: "Fastly",
        cnames: &[".fastly.net"],
        fingerprints: &["fastly error: unknown domain"],
    },
    TakeoverSignature {
        service: "Pantheon",
        cnames: &[".pantheonsite.io"],
        fingerprints: &["the gods are wise", "404 error unknown site"],
    },
    TakeoverSignature {
        service: "Tumblr",
        cnames: &["domains.tumblr.com", ".tumblr.com"],
        fingerprints: &["whatever you were looking for doesn't currently exist"],
    },
    TakeoverSignature {
        service: "Zendesk",
        cnames: &[".zendesk.com"],
        fingerprints: &["help center closed"],
    },
    TakeoverSignature {
        service: "Netlify",
        cnames: &[".netlify.app", ".netlify.com"],
        fingerprints: &["not found - request id"],
    },
    TakeoverSignature {
        service: "Ghost",
        cnames: &[".ghost.io"],
        fingerprints: &["the thing you were looking for is no longer here"],
    },
    TakeoverSignature {
        service: "Surge.sh",
        cnames: &["na-west1.surge.sh", ".surge.sh"],
        fingerprints: &["project not found"],
    },
    TakeoverSignature {
        service: "Bitbucket",
        cnames: &["bitbucket.io", ".bitbucket.io"],
        fingerprints: &["repository not found"],
    },
    TakeoverSignature {
        service: "Fly.io",
        cnames: &[".fly.dev"],
        fingerprints: &["404 not found"],
    },
    TakeoverSignature {
        service: "Vercel",
        cnames: &["cname.vercel-dns.com", ".vercel.app"],
        fingerprints: &["deployment_not_found"],
    },
    TakeoverSignature {
        service: "Azure",
        cnames: &[
            ".azurewebsites.net",
            ".cloudapp.azure.com",
            ".trafficmanager.net",
            ".blob.core.windows.net",
        ],
        fingerprints: &["404 web site not found", "this azure web app is stopped"],
    },
];

pub struct UrlTakeoverDetector;

impl Agent for UrlTakeoverDetector {
    fn id(&self) -> &'static str {
        "agent:url_takeover_detector"
    }

    fn register(&self, session: &Arc<Session>) -> Result<()> {
        let resolver = match TokioResolver::builder(TokioConnectionProvider::default()) {
            Ok(builder) => Arc::new(builder.build()),
            Err(err) => {
                // Degradation only: pages simply carry no takeover notes.
                warn!("unable to create DNS resolver, takeover detection disabled: {}", err);
                return Ok(());
            }
        };
        let handler_session = Arc::clone(session);

        session.bus.subscribe(Topic::UrlResponsive, move |event| {
            let session = Arc::clone(&handler_session);
            let resolver = Arc::clone(&resolver);
            async move {
                let Event::UrlResponsive(url) = event else {
                    return;
                };
                let Some(page) = session.get_page(&url) else {
                    debug!("no page found for URL: {}", url);
                    return;
                };
                if page.hostname.parse::<IpAddr>().is_ok() {
                    return;
                }

                let token = session.wait_group.enter();
                tokio::spawn(async move {
                    let _token = token;

                    let cnames = lookup_cnames(&resolver, &page.hostname).await;
                    if cnames.is_empty() {
                        return;
                    }

                    let body_rel = page.body_path();
                    if body_rel.is_empty() {
                        return;
                    }
                    let body = tokio::fs::read_to_string(session.file_path(&body_rel))
                        .await
                        .unwrap_or_default()
                        .to_lowercase();

                    for signature in TAKEOVER_SIGNATURES {
                        if signature_matches(signature, &cnames, &body) {
                            warn!(
                                "{}: possible {} subdomain takeover",
                                page.hostname, signature.service
                            );
                            page.add_note(
                                &format!(
                                    "Possible subdomain takeover: hostname points at an unclaimed {} resource",
                                    signature.service
                                ),
                                "error",
                            );
                        }
                    }
                });
            }
        });
        Ok(())
    }
}

async fn lookup_cnames(resolver: &TokioResolver, hostname: &str) -> Vec<String> {
    match resolver.lookup(hostname, RecordType::CNAME).await {
        Ok(lookup) => lookup
            .iter()
            .filter_map(|rdata| match rdata {
                RData::CNAME(target) => {
                    Some(target.to_utf8().trim_end_matches('.').to_lowercase())
                }
                _ => None,
            })
            .collect(),
        Err(err) => {
            debug!("CNAME lookup failed for {}: {}", hostname, err);
            Vec::new()
        }
    }
}

fn signature_matches(signature: &TakeoverSignature, cnames: &[String], body: &str) -> bool {
    let cname_hit = signature
        .cnames
        .iter()
        .any(|pattern| cnames.iter().any(|cname| cname.contains(pattern)));
    cname_hit
        && signature
            .fingerprints
            .iter()
            .any(|fingerprint| body.contains(fingerprint))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signature(service: &'static str) -> &'static TakeoverSignature {
        TAKEOVER_SIGNATURES
            .iter()
            .find(|s| s.service == service)
            .unwrap()
    }

    #[test]
    fn requires_both_cname_and_body_fingerprint() {
        let s3 = signature("AWS S3");
        let cnames = vec!["bucket.s3.amazonaws.com".to_string()];

        assert!(signature_matches(s3, &cnames, "error: nosuchbucket"));
        assert!(!signature_matches(s3, &cnames, "<html>all good</html>"));
        assert!(!signature_matches(
            s3,
            &["example.herokudns.com".to_string()],
            "error: nosuchbucket"
        ));
    }

    #[test]
    fn github_pages_fingerprint() {
        let gh = signature("GitHub Pages");
        let cnames = vec!["org.github.io".to_string()];
        let body = "there isn't a github pages site here.";
        assert!(signature_matches(gh, &cnames, body));
    }

    #[test]
    fn no_signature_matches_without_cnames() {
        for s in TAKEOVER_SIGNATURES {
            assert!(!signature_matches(s, &[], "nosuchbucket project not found"));
        }
    }
}
