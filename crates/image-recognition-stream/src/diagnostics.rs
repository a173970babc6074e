//! Per-message diagnostics.
//!
//! - [`fingerprint`]: SHA-1 digest of a payload, for log correlation
//! - [`MessageCounter`]: sequence number of processed messages

use std::sync::atomic::{AtomicU64, Ordering};

use sha1::{Digest, Sha1};

/// Lowercase hex SHA-1 digest of `bytes`.
pub fn fingerprint(bytes: &[u8]) -> String {
    hex::encode(Sha1::digest(bytes))
}

/// Counts processed messages.
///
/// The first call to [`next`](Self::next) returns 1. The count lives for
/// the process lifetime only.
#[derive(Debug, Default)]
pub struct MessageCounter {
    count: AtomicU64,
}

impl MessageCounter {
    /// Create a counter at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment the counter and return the new value.
    pub fn next(&self) -> u64 {
        self.count.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Number of messages counted so far.
    pub fn current(&self) -> u64 {
        self.count.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn test_fingerprint_empty() {
        assert_eq!(fingerprint(b""), "da39a3ee5e6b4b0d3255bfef95601890afd80709");
    }

    #[test]
    fn test_fingerprint_known_vector() {
        assert_eq!(
            fingerprint(b"abc"),
            "a9993e364706816aba3e25717850c26c9cd0d89d"
        );
    }

    #[test]
    fn test_fingerprint_sensitive_to_one_byte() {
        let a = fingerprint(&[0xff, 0xd8, 0xff, 0xe0]);
        let b = fingerprint(&[0xff, 0xd8, 0xff, 0xe1]);
        assert_ne!(a, b);
        assert_eq!(a, fingerprint(&[0xff, 0xd8, 0xff, 0xe0]));
        assert_eq!(a.len(), 40);
        assert!(a.chars().all(|c| matches!(c, '0'..='9' | 'a'..='f')));
    }

    #[test]
    fn test_counter_starts_at_one() {
        let counter = MessageCounter::new();
        assert_eq!(counter.current(), 0);
        assert_eq!(counter.next(), 1);
        assert_eq!(counter.next(), 2);
        assert_eq!(counter.current(), 2);
    }

    #[test]
    fn test_counter_concurrent_increments_are_unique() {
        let counter = Arc::new(MessageCounter::new());

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let counter = Arc::clone(&counter);
                std::thread::spawn(move || (0..100).map(|_| counter.next()).collect::<Vec<_>>())
            })
            .collect();

        let mut seen: Vec<u64> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        seen.sort_unstable();

        assert_eq!(seen, (1..=400).collect::<Vec<_>>());
    }
}
