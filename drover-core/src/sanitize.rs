//! Upload filename sanitization.

const MAX_FILENAME_BYTES: usize = 120;
const FALLBACK_NAME: &str = "upload";

/// Reduce a client-supplied filename to a safe blob path component.
///
/// Takes the basename only, replaces every character outside
/// `[A-Za-z0-9._-]` with `_`, and caps the result at 120 bytes. Names
/// that collapse to nothing (or to a bare dot sequence) become `upload`.
pub fn sanitize_filename(raw: &str) -> String {
    let base = raw
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(raw);

    let mut safe: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    safe.truncate(MAX_FILENAME_BYTES);

    if safe.is_empty() || safe.bytes().all(|b| b == b'.') {
        FALLBACK_NAME.to_string()
    } else {
        safe
    }
}
