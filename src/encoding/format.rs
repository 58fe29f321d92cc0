//! Renders raw keys and values for log output.

use itertools::Itertools as _;

/// Formats raw byte slices without any decoding.
pub struct Raw;

impl Raw {
    /// Formats raw bytes as an escaped ASCII string.
    pub fn bytes(bytes: &[u8]) -> String {
        let escaped = bytes
            .iter()
            .copied()
            .flat_map(std::ascii::escape_default)
            .collect_vec();
        format!("\"{}\"", String::from_utf8_lossy(&escaped))
    }

    /// Like [`Raw::bytes`], but cuts long inputs after `max` bytes.
    pub fn truncated(bytes: &[u8], max: usize) -> String {
        if bytes.len() <= max {
            return Self::bytes(bytes);
        }
        format!("{}…(+{})", Self::bytes(&bytes[..max]), bytes.len() - max)
    }

    /// Formats a batch of keys as a comma-separated list.
    pub fn list<'a>(items: impl IntoIterator<Item = &'a [u8]>) -> String {
        format!("[{}]", items.into_iter().map(Self::bytes).join(", "))
    }
}
