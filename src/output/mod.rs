// Terminal rendering of stage reports and stored results.

pub mod terminal;

/// Cut a label to `max_chars` characters (not bytes), marking the cut with "...".
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte, _)) => format!("{}...", &text[..byte]),
        None => text.to_string(),
    }
}
