//! URL modeling and filename derivation.
//!
//! Derives a safe default output filename from the URL path or a
//! `Content-Disposition` header when the caller submits a download without
//! an explicit final path.

mod content_disposition;
mod origin;
mod path;
mod sanitize;

pub use content_disposition::parse_content_disposition_filename;
pub use origin::origin_key;
pub use path::filename_from_url_path;
pub use sanitize::sanitize_filename;

/// Default filename when the URL path and `Content-Disposition` yield nothing usable.
const DEFAULT_FILENAME: &str = "download.bin";

/// Derives a filesystem-safe filename for a download.
///
/// Prefers the filename from `content_disposition` (if present and
/// parseable), otherwise uses the last path segment of `url`.
pub fn derive_filename(url: &str, content_disposition: Option<&str>) -> String {
    let candidate = content_disposition
        .and_then(parse_content_disposition_filename)
        .filter(|s| !s.is_empty())
        .or_else(|| filename_from_url_path(url));

    let raw = match candidate {
        Some(c) => c,
        None => return DEFAULT_FILENAME.to_string(),
    };

    let sanitized = sanitize_filename(&raw);
    if sanitized.is_empty() || sanitized == "." || sanitized == ".." {
        DEFAULT_FILENAME.to_string()
    } else {
        sanitized
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_filename_from_url_path() {
        assert_eq!(
            derive_filename("https://example.com/archive.zip", None),
            "archive.zip"
        );
        assert_eq!(
            derive_filename("https://cdn.example.com/path/to/distro.iso", None),
            "distro.iso"
        );
    }

    #[test]
    fn derive_filename_from_content_disposition_overrides_url() {
        assert_eq!(
            derive_filename(
                "https://example.com/archive.zip",
                Some("attachment; filename=\"real-name.tar.gz\"")
            ),
            "real-name.tar.gz"
        );
    }

    #[test]
    fn derive_filename_empty_url_path_fallback() {
        assert_eq!(derive_filename("https://example.com/", None), "download.bin");
        assert_eq!(derive_filename("https://example.com", None), "download.bin");
    }

    #[test]
    fn derive_filename_reserved_names_fallback() {
        assert_eq!(derive_filename("https://example.com/.", None), "download.bin");
        assert_eq!(derive_filename("https://example.com/..", None), "download.bin");
    }
}
