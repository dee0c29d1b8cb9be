//! Domain blocklist filtering for candidate URLs.

use tracing::debug;
use url::Url;

/// Pure predicate over URLs: scheme must be HTTP(S) and the host must not
/// equal a blocked domain or sit under one (strict dot-boundary suffix, so
/// `notyoutube.com` does not match a `youtube.com` entry).
#[derive(Debug, Clone, Default)]
pub struct UrlFilter {
    /// Lowercased blocked domains.
    blocked: Vec<String>,
    /// The same entries with a leading dot, for subdomain matching.
    blocked_suffixes: Vec<String>,
}

impl UrlFilter {
    pub fn new(disallowed_domains: &[String]) -> Self {
        let blocked: Vec<String> = disallowed_domains
            .iter()
            .map(|d| d.trim().trim_start_matches('.').to_lowercase())
            .filter(|d| !d.is_empty())
            .collect();
        let blocked_suffixes = blocked.iter().map(|d| format!(".{d}")).collect();
        Self {
            blocked,
            blocked_suffixes,
        }
    }

    /// Check a raw URL string. Unparsable URLs are denied.
    pub fn is_allowed(&self, raw: &str) -> bool {
        match Url::parse(raw) {
            Ok(url) => self.allows(&url),
            Err(e) => {
                debug!(url = raw, error = %e, "Rejecting unparsable URL");
                false
            }
        }
    }

    /// Check an already-parsed URL.
    pub fn allows(&self, url: &Url) -> bool {
        if url.scheme() != "http" && url.scheme() != "https" {
            return false;
        }
        let host = match url.host_str() {
            Some(h) => h.to_lowercase(),
            None => return false,
        };
        let blocked = self
            .blocked
            .iter()
            .zip(&self.blocked_suffixes)
            .any(|(domain, suffix)| host == *domain || host.ends_with(suffix.as_str()));
        !blocked
    }
}
