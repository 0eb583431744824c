//! Small deterministic glob matcher for SCAN's MATCH option.
//!
//! Only `*` is special: it matches any run of characters, including an
//! empty one. Everything else matches literally.

/// Match `text` against `pattern`.
pub fn match_glob(pattern: &str, text: &str) -> bool {
    if !pattern.contains('*') {
        return pattern == text;
    }

    let parts: Vec<&str> = pattern.split('*').collect();
    let first = parts[0];
    let last = parts[parts.len() - 1];

    if !text.starts_with(first) {
        return false;
    }
    let mut pos = first.len();

    // Middle parts must appear in order.
    for part in &parts[1..parts.len() - 1] {
        if part.is_empty() {
            continue;
        }
        match text[pos..].find(part) {
            Some(found) => pos = pos + found + part.len(),
            None => return false,
        }
    }

    if last.is_empty() {
        return true;
    }
    text.len() >= pos + last.len() && text[pos..].ends_with(last)
}
