use std::borrow::Cow;

/// Safely returns a prefix of the string with at most `max_chars` characters.
/// This respects UTF-8 character boundaries.
pub fn prefix_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Cuts `s` to `max_chars` characters and appends `marker` when anything was dropped.
pub fn truncate_with_marker<'a>(s: &'a str, max_chars: usize, marker: &str) -> Cow<'a, str> {
    let prefix = prefix_chars(s, max_chars);
    if prefix.len() == s.len() {
        Cow::Borrowed(s)
    } else {
        Cow::Owned(format!("{}{}", prefix.trim_end(), marker))
    }
}

/// Short single-line preview for log output.
pub fn log_preview(s: &str, max_chars: usize) -> String {
    let flat = s.replace('\n', "\\n");
    truncate_with_marker(&flat, max_chars, "...").into_owned()
}
