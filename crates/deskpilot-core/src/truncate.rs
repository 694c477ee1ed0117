const MARKER_PREFIX: &str = "Output truncated. Showing the last ";

fn marker(max_chars: usize, scrollback: bool) -> String {
    if scrollback {
        format!("{MARKER_PREFIX}{max_chars} characters; scroll up in the output pane for the rest.\n\n")
    } else {
        format!("{MARKER_PREFIX}{max_chars} characters.\n\n")
    }
}

/// Strips a marker left by an earlier truncation so repeated passes over a
/// growing console entry never stack markers.
fn strip_marker(text: &str) -> &str {
    if let Some(rest) = text.strip_prefix(MARKER_PREFIX)
        && let Some(end) = rest.find("\n\n")
    {
        &rest[end + 2..]
    } else {
        text
    }
}

/// Bounds console output to the last `max_chars` bytes, prefixed with a
/// fixed marker. Text at or under the bound is returned unchanged. Pure and
/// deterministic; `scrollback` selects the richer marker used when the
/// execution surface keeps the full output reachable.
#[must_use]
pub fn truncate_output(text: &str, max_chars: usize, scrollback: bool) -> String {
    let body = strip_marker(text);
    if body.len() <= max_chars {
        return body.to_string();
    }
    let mut start = body.len() - max_chars;
    while start < body.len() && !body.is_char_boundary(start) {
        start += 1;
    }
    format!("{}{}", marker(max_chars, scrollback), &body[start..])
}
