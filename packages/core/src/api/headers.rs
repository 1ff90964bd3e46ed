use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use axum::http::{header, HeaderMap, HeaderValue};
use chrono::{DateTime, Utc};

/// Quoted ETag derived from the response bytes.
pub fn compute_etag(body: &[u8]) -> String {
    let mut hasher = DefaultHasher::new();
    body.hash(&mut hasher);
    format!("\"{:x}\"", hasher.finish())
}

/// RFC 7231 HTTP-date for Last-Modified.
pub fn last_modified(timestamp: DateTime<Utc>) -> Option<HeaderValue> {
    HeaderValue::from_str(&timestamp.format("%a, %d %b %Y %H:%M:%S GMT").to_string()).ok()
}

/// Returns true when `If-None-Match` contains `*` or the exact current ETag.
pub fn if_none_match_matches(headers: &HeaderMap, current_etag: &str) -> bool {
    headers
        .get(header::IF_NONE_MATCH)
        .and_then(|value| value.to_str().ok())
        .map(|raw| {
            raw.split(',')
                .map(|tag| tag.trim())
                .any(|tag| tag == "*" || tag == current_etag)
        })
        .unwrap_or(false)
}
