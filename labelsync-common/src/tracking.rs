//! Tracking number normalization
//!
//! Carrier tracking numbers arrive from spreadsheets, file names and client
//! requests in many shapes. Every lookup and every label file on disk uses the
//! canonical form produced here, which is also safe to use as a filename stem.

/// Maximum length of a canonical tracking key, in characters
pub const MAX_TRACKING_LEN: usize = 128;

fn is_key_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-')
}

fn is_edge_char(c: char) -> bool {
    matches!(c, '.' | '_')
}

/// Canonicalize a free-form identifier into a stable key
///
/// Trims the input, replaces every run of characters outside
/// `[A-Za-z0-9_.-]` with a single underscore, collapses repeated underscores,
/// strips leading/trailing `.` and `_`, and truncates to
/// [`MAX_TRACKING_LEN`] characters.
///
/// An empty result means the input carried no usable identifier; callers skip
/// such records rather than treating them as errors.
///
/// # Examples
///
/// ```
/// use labelsync_common::normalize_tracking;
///
/// assert_eq!(normalize_tracking("  1Z 999/AA1 "), "1Z_999_AA1");
/// assert_eq!(normalize_tracking("__.LX123.pdf._"), "LX123.pdf");
/// assert_eq!(normalize_tracking("///"), "");
/// ```
pub fn normalize_tracking(input: &str) -> String {
    let mut out = String::with_capacity(input.len());

    for c in input.trim().chars() {
        let c = if is_key_char(c) { c } else { '_' };
        if c == '_' && out.ends_with('_') {
            continue;
        }
        out.push(c);
    }

    let trimmed = out.trim_matches(is_edge_char);
    // All remaining characters are ASCII, so byte length equals char count.
    let truncated = if trimmed.len() > MAX_TRACKING_LEN {
        &trimmed[..MAX_TRACKING_LEN]
    } else {
        trimmed
    };

    truncated.trim_end_matches(is_edge_char).to_string()
}

/// Returns true when `key` is already in canonical form
pub fn is_canonical(key: &str) -> bool {
    normalize_tracking(key) == key
}
