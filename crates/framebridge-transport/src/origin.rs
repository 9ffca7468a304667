//! Origin parsing and derivation.
//!
//! Every zone origin is computed from the page origin plus a fixed subdomain
//! prefix. Callers recompute on each check instead of caching a value handed
//! to them by a message.

use std::fmt;

use url::Url;

use crate::error::{Result, TransportError};

/// A tuple origin (`scheme://host[:port]`) restricted to http and https.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Origin {
    scheme: String,
    host: String,
    port: Option<u16>,
}

impl Origin {
    /// Parse an origin or any absolute URL, keeping only its origin part.
    pub fn parse(input: &str) -> Result<Self> {
        let url = Url::parse(input.trim()).map_err(|err| invalid(input, err.to_string()))?;
        match url.scheme() {
            "http" | "https" => {}
            other => return Err(invalid(input, format!("unsupported scheme '{other}'"))),
        }
        let host = url
            .host_str()
            .filter(|host| !host.is_empty())
            .ok_or_else(|| invalid(input, "missing host".to_string()))?;

        Ok(Self {
            scheme: url.scheme().to_string(),
            host: host.to_ascii_lowercase(),
            port: url.port(),
        })
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// Prefix the host with `label.`, keeping scheme and port.
    pub fn with_subdomain(&self, label: &str) -> Result<Self> {
        if !is_dns_label(label) {
            return Err(invalid(
                &self.to_string(),
                format!("invalid subdomain label '{label}'"),
            ));
        }
        Ok(Self {
            scheme: self.scheme.clone(),
            host: format!("{}.{}", label.to_ascii_lowercase(), self.host),
            port: self.port,
        })
    }

    /// True when `other` (as reported by a message event) is this origin.
    pub fn matches(&self, other: &str) -> bool {
        Origin::parse(other).is_ok_and(|parsed| &parsed == self)
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme, self.host)?;
        if let Some(port) = self.port {
            write!(f, ":{port}")?;
        }
        Ok(())
    }
}

/// Origin of the session domain for a page served from `page_origin`.
pub fn session_origin(page_origin: &str, prefix: &str) -> Result<Origin> {
    Origin::parse(page_origin)?.with_subdomain(prefix)
}

fn is_dns_label(label: &str) -> bool {
    !label.is_empty()
        && label.len() <= 63
        && !label.starts_with('-')
        && !label.ends_with('-')
        && label
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-')
}

fn invalid(origin: &str, reason: String) -> TransportError {
    TransportError::InvalidOrigin {
        origin: origin.to_string(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_session_origin_with_port() {
        let origin = session_origin("https://example.org:8443/some/page?x=1", "domus").unwrap();
        assert_eq!(origin.to_string(), "https://domus.example.org:8443");
    }

    #[test]
    fn default_port_is_dropped() {
        let origin = Origin::parse("https://Example.org:443").unwrap();
        assert_eq!(origin.to_string(), "https://example.org");
        assert!(origin.matches("https://example.org"));
    }

    #[test]
    fn matches_is_exact_on_scheme_and_host() {
        let origin = session_origin("https://example.org", "domus").unwrap();
        assert!(origin.matches("https://domus.example.org"));
        assert!(!origin.matches("http://domus.example.org"));
        assert!(!origin.matches("https://evil.domus.example.org"));
        assert!(!origin.matches("https://example.org"));
        assert!(!origin.matches("null"));
    }

    #[test]
    fn rejects_non_http_origins() {
        assert!(matches!(
            Origin::parse("file:///etc/passwd"),
            Err(TransportError::InvalidOrigin { .. })
        ));
        assert!(Origin::parse("not a url").is_err());
    }

    #[test]
    fn rejects_bad_subdomain_label() {
        let origin = Origin::parse("https://example.org").unwrap();
        assert!(origin.with_subdomain("").is_err());
        assert!(origin.with_subdomain("-bad").is_err());
        assert!(origin.with_subdomain("a.b").is_err());
    }
}
