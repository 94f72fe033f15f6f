//! A fixed-size window over the last bytes received from the boot-loader.

/// Capacity of the [`SyncWindow`]; also the longest supported prompt.
pub const WINDOW_CAPACITY: usize = 32;

/// Ring buffer keeping the most recent [`WINDOW_CAPACITY`] bytes, used to
/// spot the menu prompt at the tail of whatever the boot-loader prints.
#[derive(Debug, Clone)]
pub(crate) struct SyncWindow {
    buf: [u8; WINDOW_CAPACITY],
    /// Index where the next byte goes.
    head: usize,
    len: usize,
}
impl SyncWindow {
    pub(crate) fn new() -> Self {
        SyncWindow {
            buf: [0; WINDOW_CAPACITY],
            head: 0,
            len: 0,
        }
    }

    pub(crate) fn push(&mut self, byte: u8) {
        self.buf[self.head] = byte;
        self.head = (self.head + 1) % WINDOW_CAPACITY;
        self.len = (self.len + 1).min(WINDOW_CAPACITY);
    }

    /// Whether the most recently pushed bytes are exactly `suffix`.
    pub(crate) fn ends_with(&self, suffix: &[u8]) -> bool {
        if suffix.is_empty() || suffix.len() > self.len {
            return false;
        }
        // Walk backwards from the newest byte.
        suffix.iter().rev().enumerate().all(|(back, expected)| {
            let index = (self.head + WINDOW_CAPACITY - 1 - back) % WINDOW_CAPACITY;
            self.buf[index] == *expected
        })
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn window_with(bytes: &[u8]) -> SyncWindow {
        let mut window = SyncWindow::new();
        bytes.iter().for_each(|b| window.push(*b));
        window
    }

    #[test]
    fn empty_window_matches_nothing() {
        let window = SyncWindow::new();
        assert!(!window.ends_with(b"BL >"));
        assert!(!window.ends_with(b""));
    }

    #[test]
    fn match_at_the_tail_only() {
        let window = window_with(b"1. upload ebl\r\n2. run\r\nBL >");
        assert!(window.ends_with(b"BL >"));
        assert!(window.ends_with(b">"));
        assert!(!window.ends_with(b"BL"));

        let window = window_with(b"BL > ");
        assert!(!window.ends_with(b"BL >"));
    }

    #[test]
    fn match_across_wrap_around() {
        let mut noise = vec![b'.'; WINDOW_CAPACITY * 3 + 5];
        noise.extend_from_slice(b"BL >");
        assert!(window_with(&noise).ends_with(b"BL >"));
    }

    #[test]
    fn full_window_match() {
        let prompt = [b'p'; WINDOW_CAPACITY];
        let mut bytes = vec![b'x'; 7];
        bytes.extend_from_slice(&prompt);
        assert!(window_with(&bytes).ends_with(&prompt));
        assert!(!window_with(&prompt[1..]).ends_with(&prompt));
    }
}
