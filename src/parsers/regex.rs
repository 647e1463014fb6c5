//! Relaxed target extraction from raw text: any http(s) URL or bare host
//! token per line, order-preserving and deduplicated.

use std::collections::HashSet;
use std::io::BufRead;

use anyhow::Result;
use once_cell::sync::Lazy;
use regex::Regex;

static TARGET_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)https?://[^\s\x22'<>]+|\b[a-z0-9]([a-z0-9-]*[a-z0-9])?(\.[a-z0-9]([a-z0-9-]*[a-z0-9])?)+\b",
    )
    .expect("target pattern must compile")
});

pub fn parse<R: BufRead>(reader: R) -> Result<Vec<String>> {
    let mut targets = Vec::new();
    let mut seen = HashSet::new();

    for line in reader.lines() {
        let line = line?;
        for found in TARGET_RE.find_iter(&line) {
            let target = found.as_str().to_string();
            if seen.insert(target.clone()) {
                targets.push(target);
            }
        }
    }
    Ok(targets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn extracts_urls_and_hosts() {
        let input = "http://example.com/login\nscan example.org please\n192.0.2.1\n";
        let targets = parse(Cursor::new(input)).unwrap();
        assert_eq!(
            targets,
            vec!["http://example.com/login", "example.org", "192.0.2.1"]
        );
    }

    #[test]
    fn dedupes_preserving_first_occurrence_order() {
        let input = "example.com\nhttps://a.example.com\nexample.com\n";
        let targets = parse(Cursor::new(input)).unwrap();
        assert_eq!(targets, vec!["example.com", "https://a.example.com"]);
    }

    #[test]
    fn ignores_noise_lines() {
        let input = "# comment line\n---\n\n";
        assert!(parse(Cursor::new(input)).unwrap().is_empty());
    }

    #[test]
    fn finds_multiple_targets_on_one_line() {
        let input = "a.example.com b.example.com https://c.example.com/x\n";
        let targets = parse(Cursor::new(input)).unwrap();
        assert_eq!(
            targets,
            vec!["a.example.com", "b.example.com", "https://c.example.com/x"]
        );
    }
}
