//! Bounded output tails.

/// Append `line` to `buffer` (newline-separated), keeping only the most recent
/// `max_bytes`. Trims from the front at a UTF-8 boundary.
pub fn append_limited(buffer: &mut String, line: &str, max_bytes: usize) {
    if !buffer.is_empty() {
        buffer.push('\n');
    }
    buffer.push_str(line);

    if buffer.len() > max_bytes {
        let overflow = buffer.len() - max_bytes;
        let mut cut_at = overflow;
        while cut_at < buffer.len() && !buffer.is_char_boundary(cut_at) {
            cut_at += 1;
        }
        buffer.drain(..cut_at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_recent_tail() {
        let mut out = String::new();
        append_limited(&mut out, "12345", 8);
        append_limited(&mut out, "6789", 8);
        assert_eq!(out, "345\n6789");
    }

    #[test]
    fn cuts_on_char_boundary() {
        let mut out = String::new();
        // Each 'é' is two bytes; an odd limit forces the cut past a boundary.
        append_limited(&mut out, "éééé", 5);
        assert!(out.len() <= 5);
        assert_eq!(out, "éé");
    }

    #[test]
    fn small_input_is_untouched() {
        let mut out = String::new();
        append_limited(&mut out, "a", 64);
        append_limited(&mut out, "b", 64);
        assert_eq!(out, "a\nb");
    }
}
