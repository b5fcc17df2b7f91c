//! Parses collected HTTP response header lines for the probe.

#[derive(Debug, Default)]
pub(super) struct ParsedHeaders {
    pub content_length: Option<u64>,
    pub accept_ranges: bool,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub content_type: Option<String>,
    pub content_disposition: Option<String>,
    /// Total size from `Content-Range: bytes 0-0/<total>`, when present.
    pub content_range_total: Option<u64>,
}

pub(super) fn parse_headers(lines: &[String]) -> ParsedHeaders {
    let mut out = ParsedHeaders::default();

    for line in lines {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let name = name.trim();
        let value = value.trim();

        if name.eq_ignore_ascii_case("content-length") {
            if let Ok(n) = value.parse::<u64>() {
                out.content_length = Some(n);
            }
        } else if name.eq_ignore_ascii_case("accept-ranges") {
            out.accept_ranges = value.eq_ignore_ascii_case("bytes");
        } else if name.eq_ignore_ascii_case("etag") {
            out.etag = Some(value.trim_matches('"').to_string());
        } else if name.eq_ignore_ascii_case("last-modified") {
            out.last_modified = Some(value.to_string());
        } else if name.eq_ignore_ascii_case("content-type") {
            out.content_type = Some(value.to_string());
        } else if name.eq_ignore_ascii_case("content-disposition") {
            out.content_disposition = Some(value.to_string());
        } else if name.eq_ignore_ascii_case("content-range") {
            out.content_range_total = parse_content_range_total(value);
        }
    }

    out
}

/// Parses the `<total>` out of `bytes 0-0/12345`. Returns `None` for `*` (unknown total).
fn parse_content_range_total(value: &str) -> Option<u64> {
    let rest = value.strip_prefix("bytes ")?;
    let (_, total) = rest.split_once('/')?;
    total.trim().parse::<u64>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_content_length_and_ranges() {
        let lines = [
            "HTTP/1.1 200 OK".to_string(),
            "Content-Length: 12345".to_string(),
            "Accept-Ranges: bytes".to_string(),
        ];
        let r = parse_headers(&lines);
        assert_eq!(r.content_length, Some(12345));
        assert!(r.accept_ranges);
        assert!(r.etag.is_none());
    }

    #[test]
    fn parses_etag_and_last_modified() {
        let lines = [
            "ETag: \"abc-123\"".to_string(),
            "Last-Modified: Wed, 21 Oct 2015 07:28:00 GMT".to_string(),
        ];
        let r = parse_headers(&lines);
        assert_eq!(r.etag.as_deref(), Some("abc-123"));
        assert_eq!(
            r.last_modified.as_deref(),
            Some("Wed, 21 Oct 2015 07:28:00 GMT")
        );
    }

    #[test]
    fn parses_content_range_total() {
        let lines = ["Content-Range: bytes 0-0/98765".to_string()];
        let r = parse_headers(&lines);
        assert_eq!(r.content_range_total, Some(98765));
    }

    #[test]
    fn content_range_unknown_total() {
        let lines = ["Content-Range: bytes 0-0/*".to_string()];
        let r = parse_headers(&lines);
        assert_eq!(r.content_range_total, None);
    }
}
