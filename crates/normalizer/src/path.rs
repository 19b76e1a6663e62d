//! Path canonicalization and Destination header parsing.

use contracts::ResourcePath;
use url::Url;

/// Base used to resolve absolute-path Destination headers (`/dst`).
const RELATIVE_BASE: &str = "http://localhost/";

/// Canonicalize a raw request path.
///
/// - query and fragment are discarded
/// - percent-decoded exactly once
/// - empty and `.` segments removed, `..` pops a segment (never above root)
/// - no trailing slash, except the root `/`
///
/// Returns `None` for relative paths or when decoding yields invalid UTF-8.
pub fn canonicalize_path(raw: &str) -> Option<ResourcePath> {
    let raw = raw.split(['?', '#']).next().unwrap_or_default();
    if !raw.starts_with('/') {
        return None;
    }
    let decoded = urlencoding::decode(raw).ok()?;

    let mut segments: Vec<&str> = Vec::new();
    for segment in decoded.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }

    if segments.is_empty() {
        return Some(ResourcePath::new("/"));
    }
    let mut canonical = String::with_capacity(decoded.len());
    for segment in segments {
        canonical.push('/');
        canonical.push_str(segment);
    }
    Some(canonical.into())
}

/// Extract the canonical target path from a WebDAV `Destination` header.
///
/// Accepts an absolute URI (`http://host/dst`, only the path is kept) or an
/// absolute path (`/dst`). Anything else is unusable.
pub fn destination_path(header: &str) -> Option<ResourcePath> {
    let header = header.trim();
    if header.is_empty() {
        return None;
    }

    let url = match Url::parse(header) {
        Ok(url) => url,
        Err(url::ParseError::RelativeUrlWithoutBase) if header.starts_with('/') => {
            Url::parse(RELATIVE_BASE).ok()?.join(header).ok()?
        }
        Err(_) => return None,
    };

    if url.cannot_be_a_base() {
        return None;
    }
    canonicalize_path(url.path())
}
