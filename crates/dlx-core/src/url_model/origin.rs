//! Origin keying for the shared per-host connection budget.

/// Returns the `scheme://host:port` key used to group connections sharing
/// one host's budget. Two URLs with the same origin key contend for the
/// same slice of `max_connections_per_host`.
pub fn origin_key(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let scheme = parsed.scheme();
    let host = parsed.host_str()?;
    match parsed.port() {
        Some(port) => Some(format!("{scheme}://{host}:{port}")),
        None => Some(format!("{scheme}://{host}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_host_same_key() {
        assert_eq!(
            origin_key("https://example.com/a.iso"),
            origin_key("https://example.com/b.iso")
        );
    }

    #[test]
    fn distinct_port_distinct_key() {
        assert_ne!(
            origin_key("https://example.com:8443/a"),
            origin_key("https://example.com/a")
        );
    }

    #[test]
    fn distinct_host_distinct_key() {
        assert_ne!(
            origin_key("https://a.example.com/x"),
            origin_key("https://b.example.com/x")
        );
    }

    #[test]
    fn invalid_url_returns_none() {
        assert_eq!(origin_key("not a url"), None);
    }
}
