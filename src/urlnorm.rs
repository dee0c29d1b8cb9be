//! URL canonicalization and origin extraction.
//!
//! Canonical form: lowercase scheme and host, default ports dropped,
//! fragment stripped, query parameters sorted. Canonicalization is
//! idempotent, so canonically equal URLs compare equal as strings.

use url::Url;

/// Canonicalize a raw URL string.
///
/// The `url` crate already lowercases scheme and host and drops default
/// ports on parse; this adds fragment stripping and stable query ordering.
pub fn canonicalize(raw: &str) -> Result<Url, url::ParseError> {
    let mut url = Url::parse(raw)?;
    url.set_fragment(None);

    if url.query().is_some() {
        let mut pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        if pairs.is_empty() {
            url.set_query(None);
        } else {
            pairs.sort();
            url.query_pairs_mut().clear().extend_pairs(pairs);
        }
    }

    Ok(url)
}

/// The origin of a URL as `scheme://host:port`, with the effective port
/// made explicit. Robots rules, pacing clocks, and connection pooling are
/// all keyed by this.
pub fn origin(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port_or_known_default() {
        Some(port) => format!("{}://{}:{}", url.scheme(), host, port),
        None => format!("{}://{}", url.scheme(), host),
    }
}
