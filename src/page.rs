//! The enriched record of one responsive URL: status, headers, tags, notes,
//! artifact paths and the DOM skeleton used for clustering.

use anyhow::{anyhow, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use url::Url;
use uuid::Uuid;

/// One captured response header with its security classification.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Header {
    pub name: String,
    pub value: String,
    pub decreases_security: bool,
    pub increases_security: bool,
}

fn degrades_security(name: &str, value: &str) -> bool {
    match name {
        "server" | "wpe-backend" | "x-powered-by" | "x-cf-powered-by" | "x-pingback" => true,
        "access-control-allow-origin" => value == "*",
        "x-xss-protection" => !value.starts_with('1'),
        _ => false,
    }
}

fn hardens_security(name: &str, value: &str) -> bool {
    match name {
        "content-security-policy"
        | "content-security-policy-report-only"
        | "strict-transport-security"
        | "x-frame-options"
        | "referrer-policy"
        | "public-key-pins" => true,
        "x-permitted-cross-domain-policies" => value.eq_ignore_ascii_case("master-only"),
        "x-content-type-options" => value.eq_ignore_ascii_case("nosniff"),
        "x-xss-protection" => value.starts_with('1'),
        _ => false,
    }
}

impl Header {
    pub fn new(name: &str, value: &str) -> Self {
        let mut header = Self {
            name: name.to_string(),
            value: value.to_string(),
            decreases_security: false,
            increases_security: false,
        };
        header.set_security_flags();
        header
    }

    /// Classify against the fixed tables. The two flags are mutually
    /// exclusive; a degrading match wins.
    pub fn set_security_flags(&mut self) {
        let name = self.name.to_lowercase();
        if degrades_security(&name, &self.value) {
            self.decreases_security = true;
            self.increases_security = false;
        } else if hardens_security(&name, &self.value) {
            self.decreases_security = false;
            self.increases_security = true;
        } else {
            self.decreases_security = false;
            self.increases_security = false;
        }
    }
}

/// A detected technology. The hash is the identity used for deduplication in
/// the report UI.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tag {
    pub text: String,
    #[serde(rename = "type")]
    pub tag_type: String,
    pub link: String,
    pub hash: String,
}

impl Tag {
    pub fn new(text: &str, tag_type: &str, link: &str) -> Self {
        let mut hasher = Sha1::new();
        hasher.update(text.as_bytes());
        hasher.update(tag_type.as_bytes());
        hasher.update(link.as_bytes());
        Self {
            text: text.to_string(),
            tag_type: tag_type.to_string(),
            link: link.to_string(),
            hash: format!("{:x}", hasher.finalize()),
        }
    }

    pub fn has_link(&self) -> bool {
        !self.link.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    pub text: String,
    #[serde(rename = "type")]
    pub note_type: String,
}

/// The serializable page record. `page_structure` never reaches disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageData {
    pub uuid: String,
    pub url: String,
    pub hostname: String,
    #[serde(default)]
    pub addrs: Vec<String>,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub page_title: String,
    #[serde(default)]
    pub headers_path: String,
    #[serde(default)]
    pub body_path: String,
    #[serde(default)]
    pub screenshot_path: String,
    #[serde(default)]
    pub has_screenshot: bool,
    #[serde(default)]
    pub headers: Vec<Header>,
    #[serde(default)]
    pub tags: Vec<Tag>,
    #[serde(default)]
    pub notes: Vec<Note>,
    #[serde(skip)]
    pub page_structure: Vec<String>,
}

/// A page is created by the URL requester when a response is obtained and
/// mutated by the enrichment agents; the record is guarded by its own mutex.
pub struct Page {
    pub url: String,
    pub hostname: String,
    data: Mutex<PageData>,
}

impl Page {
    pub fn new(page_url: &str) -> Result<Self> {
        let parsed = Url::parse(page_url)?;
        let hostname = parsed
            .host_str()
            .ok_or_else(|| anyhow!("URL has no host: {}", page_url))?
            .to_string();

        Ok(Self {
            url: page_url.to_string(),
            hostname: hostname.clone(),
            data: Mutex::new(PageData {
                uuid: Uuid::new_v4().to_string(),
                url: page_url.to_string(),
                hostname,
                addrs: Vec::new(),
                status: String::new(),
                page_title: String::new(),
                headers_path: String::new(),
                body_path: String::new(),
                screenshot_path: String::new(),
                has_screenshot: false,
                headers: Vec::new(),
                tags: Vec::new(),
                notes: Vec::new(),
                page_structure: Vec::new(),
            }),
        })
    }

    pub fn snapshot(&self) -> PageData {
        self.data.lock().clone()
    }

    pub fn add_header(&self, name: &str, value: &str) {
        self.data.lock().headers.push(Header::new(name, value));
    }

    pub fn add_tag(&self, text: &str, tag_type: &str, link: &str) {
        self.data.lock().tags.push(Tag::new(text, tag_type, link));
    }

    /// Adds a tag unless one with the same text is already present.
    pub fn add_unique_tag(&self, text: &str, tag_type: &str, link: &str) {
        let mut data = self.data.lock();
        if data.tags.iter().any(|t| t.text == text) {
            return;
        }
        data.tags.push(Tag::new(text, tag_type, link));
    }

    pub fn add_note(&self, text: &str, note_type: &str) {
        self.data.lock().notes.push(Note {
            text: text.to_string(),
            note_type: note_type.to_string(),
        });
    }

    pub fn set_status(&self, status: String) {
        self.data.lock().status = status;
    }

    pub fn set_addrs(&self, addrs: Vec<String>) {
        self.data.lock().addrs = addrs;
    }

    pub fn set_page_title(&self, title: String) {
        self.data.lock().page_title = title;
    }

    pub fn set_headers_path(&self, path: String) {
        self.data.lock().headers_path = path;
    }

    pub fn set_body_path(&self, path: String) {
        self.data.lock().body_path = path;
    }

    pub fn set_screenshot(&self, path: String) {
        let mut data = self.data.lock();
        data.screenshot_path = path;
        data.has_screenshot = true;
    }

    pub fn set_page_structure(&self, structure: Vec<String>) {
        self.data.lock().page_structure = structure;
    }

    pub fn body_path(&self) -> String {
        self.data.lock().body_path.clone()
    }

    pub fn base_filename(&self) -> String {
        base_filename(&self.url)
    }

    pub fn from_data(data: PageData) -> Self {
        Self {
            url: data.url.clone(),
            hostname: data.hostname.clone(),
            data: Mutex::new(data),
        }
    }
}

/// Filesystem-safe base name for a URL's artifacts:
/// `lower(scheme __ host __ hash16)` with `.` → `_` and `:` → `__` in the
/// host, where hash16 is the first 16 hex characters of SHA-1(path ‖
/// fragment). The query string never participates.
pub fn base_filename(page_url: &str) -> String {
    let parsed = match Url::parse(page_url) {
        Ok(u) => u,
        Err(_) => return String::new(),
    };

    let mut hasher = Sha1::new();
    hasher.update(parsed.path().as_bytes());
    if let Some(fragment) = parsed.fragment() {
        hasher.update(fragment.as_bytes());
    }
    let digest = format!("{:x}", hasher.finalize());

    let mut host = parsed.host_str().unwrap_or_default().replace('.', "_");
    if let Some(port) = parsed.port() {
        host.push_str(&format!("__{}", port));
    }

    format!("{}__{}__{}", parsed.scheme(), host, &digest[..16]).to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn security_flag_tables() {
        let cases = [
            // name, value, decreases, increases
            ("Strict-Transport-Security", "max-age=31536000", false, true),
            ("X-Frame-Options", "DENY", false, true),
            ("X-XSS-Protection", "1; mode=block", false, true),
            ("Content-Security-Policy", "default-src 'self'", false, true),
            ("Referrer-Policy", "no-referrer", false, true),
            ("Public-Key-Pins", "pin-sha256=\"abc\"", false, true),
            ("X-Permitted-Cross-Domain-Policies", "master-only", false, true),
            ("X-Content-Type-Options", "nosniff", false, true),
            ("Server", "Apache/2.4.1 (Unix)", true, false),
            ("X-Powered-By", "PHP/7.0.0", true, false),
            ("Access-Control-Allow-Origin", "*", true, false),
            ("X-XSS-Protection", "0", true, false),
            ("WPE-Backend", "apache", true, false),
            ("X-CF-Powered-By", "WordPress", true, false),
            ("X-Pingback", "http://example.com/xmlrpc.php", true, false),
            ("Cache-Control", "no-cache", false, false),
            ("Content-Type", "text/html; charset=utf-8", false, false),
            ("X-Custom-Header", "SomeValue", false, false),
            ("X-Permitted-Cross-Domain-Policies", "none", false, false),
            ("Access-Control-Allow-Origin", "https://example.com", false, false),
        ];

        for (name, value, decreases, increases) in cases {
            let header = Header::new(name, value);
            assert_eq!(
                header.decreases_security, decreases,
                "decreases flag for {name}: {value}"
            );
            assert_eq!(
                header.increases_security, increases,
                "increases flag for {name}: {value}"
            );
            assert!(
                !(header.decreases_security && header.increases_security),
                "flags must be mutually exclusive for {name}"
            );
        }
    }

    #[test]
    fn classification_ignores_name_case() {
        for name in ["SERVER", "Server", "server"] {
            let header = Header::new(name, "nginx");
            assert!(header.decreases_security, "{name} should decrease");
        }
    }

    #[test]
    fn base_filename_shape_and_stability() {
        let re = regex::Regex::new(r"^[a-z]+__[a-z0-9_]+__[0-9a-f]{16}$").unwrap();
        for url in [
            "http://example.com",
            "https://sub.domain.example.com/resource",
            "http://test.org/Some/MixedCasePath",
            "http://example.com/path#section1",
        ] {
            let name = base_filename(url);
            assert!(re.is_match(&name), "{url} produced {name}");
            assert_eq!(name, base_filename(url), "must be stable");
        }
    }

    #[test]
    fn base_filename_includes_non_default_port() {
        let name = base_filename("http://example.com:8080/path");
        assert!(
            name.starts_with("http__example_com__8080__"),
            "got {name}"
        );
        let re = regex::Regex::new(r"^[a-z]+__[a-z0-9_]+__\d+__[0-9a-f]{16}$").unwrap();
        assert!(re.is_match(&name));
    }

    #[test]
    fn base_filename_varies_with_path_and_fragment_only() {
        let plain = base_filename("http://example.com/a");
        assert_ne!(plain, base_filename("http://example.com/b"));
        assert_ne!(plain, base_filename("http://example.com/a#frag"));
        // Query strings are ignored.
        assert_eq!(plain, base_filename("http://example.com/a?q=1"));
        assert_eq!(
            base_filename("http://example.com/a?q=1"),
            base_filename("http://example.com/a?q=2")
        );
    }

    #[test]
    fn tag_hash_is_identity() {
        let a = Tag::new("nginx", "Web servers", "https://nginx.org/");
        let b = Tag::new("nginx", "Web servers", "https://nginx.org/");
        let c = Tag::new("nginx", "Reverse proxies", "https://nginx.org/");
        assert_eq!(a.hash, b.hash);
        assert_ne!(a.hash, c.hash);
        assert_eq!(a.hash.len(), 40);
    }

    #[test]
    fn page_structure_is_not_serialized() {
        let page = Page::new("http://example.com/").unwrap();
        page.set_page_structure(vec!["0:html".into(), "1:body".into()]);
        let json = serde_json::to_string(&page.snapshot()).unwrap();
        assert!(!json.contains("pageStructure"));
        assert!(json.contains("\"url\":\"http://example.com/\""));
    }
}
