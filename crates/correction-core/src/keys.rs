//! World-state key layout
//!
//! Batches live directly under their id. Correction bookkeeping lives under a
//! configurable prefix: `<prefix><batch>` holds the index and
//! `<prefix><batch>~<seq>` holds each request, so a prefix scan over
//! `<prefix><batch>~` returns a batch's requests in sequence order.

/// Separates a batch id from a request sequence number
pub const KEY_SEPARATOR: char = '~';

/// Width of the zero-padded sequence component
const SEQUENCE_WIDTH: usize = 10;

#[derive(Debug, Clone)]
pub struct KeySpace {
    correction_prefix: String,
}

impl KeySpace {
    pub fn new(correction_prefix: impl Into<String>) -> Self {
        Self {
            correction_prefix: correction_prefix.into(),
        }
    }

    pub fn batch_key(&self, batch_id: &str) -> String {
        batch_id.to_string()
    }

    pub fn correction_index_key(&self, batch_id: &str) -> String {
        format!("{}{}", self.correction_prefix, batch_id)
    }

    pub fn correction_request_key(&self, batch_id: &str, sequence: u64) -> String {
        format!(
            "{}{}{}{:0width$}",
            self.correction_prefix,
            batch_id,
            KEY_SEPARATOR,
            sequence,
            width = SEQUENCE_WIDTH
        )
    }

    pub fn correction_request_scan_prefix(&self, batch_id: &str) -> String {
        format!("{}{}{}", self.correction_prefix, batch_id, KEY_SEPARATOR)
    }

    /// Ids that would collide with correction bookkeeping keys
    pub fn is_reserved(&self, batch_id: &str) -> bool {
        batch_id.starts_with(&self.correction_prefix) || batch_id.contains(KEY_SEPARATOR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_keys_sort_by_sequence() {
        let keys = KeySpace::new("CORRECTION_");
        let second = keys.correction_request_key("1", 2);
        let tenth = keys.correction_request_key("1", 10);

        assert_eq!(second, "CORRECTION_1~0000000002");
        assert!(second < tenth);
        assert!(tenth.starts_with(&keys.correction_request_scan_prefix("1")));
    }

    #[test]
    fn test_scan_prefix_does_not_cover_longer_ids() {
        let keys = KeySpace::new("CORRECTION_");
        let other = keys.correction_request_key("10", 1);
        assert!(!other.starts_with(&keys.correction_request_scan_prefix("1")));
    }

    #[test]
    fn test_reserved_ids() {
        let keys = KeySpace::new("CORRECTION_");
        assert!(keys.is_reserved("CORRECTION_1"));
        assert!(keys.is_reserved("1~2"));
        assert!(!keys.is_reserved("1"));
    }
}
