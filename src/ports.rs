//! Port list aliases and parsing for the `--ports` flag.

use anyhow::{bail, Result};

pub const SMALL: &[u16] = &[80, 443];

pub const MEDIUM: &[u16] = &[80, 443, 8000, 8080, 8443];

pub const LARGE: &[u16] = &[
    80, 81, 443, 591, 2082, 2087, 2095, 2096, 3000, 8000, 8001, 8008, 8080, 8083, 8443, 8834, 8888,
];

pub const XLARGE: &[u16] = &[
    80, 81, 300, 443, 591, 593, 832, 981, 1010, 1311, 2082, 2087, 2095, 2096, 2480, 3000, 3128,
    3333, 4243, 4567, 4711, 4712, 4993, 5000, 5104, 5108, 5800, 6543, 7000, 7396, 7474, 8000,
    8001, 8008, 8014, 8042, 8069, 8080, 8081, 8083, 8088, 8090, 8091, 8118, 8123, 8172, 8222, 8243,
    8280, 8281, 8333, 8443, 8500, 8834, 8880, 8888, 8983, 9000, 9043, 9060, 9080, 9090, 9091,
    9200, 9443, 9800, 9981, 12443, 16080, 18091, 18092, 20720, 28017,
];

/// Resolve the `--ports` argument: an alias name or a comma-separated list.
/// Order is preserved, duplicates are removed.
pub fn parse(spec: &str) -> Result<Vec<u16>> {
    match spec.trim().to_lowercase().as_str() {
        "small" => return Ok(SMALL.to_vec()),
        "medium" | "" => return Ok(MEDIUM.to_vec()),
        "large" => return Ok(LARGE.to_vec()),
        "xlarge" => return Ok(XLARGE.to_vec()),
        _ => {}
    }

    let mut ports = Vec::new();
    for token in spec.split(',') {
        let token = token.trim();
        if token.is_empty() {
            continue;
        }
        let port: u32 = token
            .parse()
            .map_err(|_| anyhow::anyhow!("invalid port: {}", token))?;
        if port == 0 || port > 65535 {
            bail!("port out of range: {}", port);
        }
        let port = port as u16;
        if !ports.contains(&port) {
            ports.push(port);
        }
    }

    if ports.is_empty() {
        bail!("no ports to scan in {:?}", spec);
    }
    Ok(ports)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aliases_resolve() {
        assert_eq!(parse("small").unwrap(), vec![80, 443]);
        assert_eq!(parse("medium").unwrap(), MEDIUM.to_vec());
        assert_eq!(parse("LARGE").unwrap(), LARGE.to_vec());
        assert_eq!(parse("xlarge").unwrap(), XLARGE.to_vec());
    }

    #[test]
    fn xlarge_is_a_superset_of_large() {
        assert_eq!(XLARGE.len(), 73);
        for port in LARGE {
            assert!(XLARGE.contains(port), "xlarge is missing {}", port);
        }
        assert!(XLARGE.contains(&8083));
    }

    #[test]
    fn custom_list_keeps_order_and_dedupes() {
        assert_eq!(parse("8080,80,8080,443").unwrap(), vec![8080, 80, 443]);
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse("80,abc").is_err());
        assert!(parse("0").is_err());
        assert!(parse("70000").is_err());
        assert!(parse(",").is_err());
    }
}
