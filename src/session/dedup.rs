//! # Duplicate Audio Filter
//!
//! Clients occasionally retransmit the same audio blob (network
//! retries, double-clicks). Processing it twice would produce two
//! LLM turns for one utterance, so each session keeps a short-window
//! cache of recently seen payload hashes. Entries expire after 5
//! seconds and are purged lazily on each check.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::time::{Duration, Instant};

const DEDUP_TTL: Duration = Duration::from_secs(5);

/// How much of the payload participates in the hash. The prefix plus
/// total length is enough to tell retransmissions apart from distinct
/// utterances without hashing multi-megabyte blobs.
const HASH_PREFIX_LEN: usize = 4096;

#[derive(Debug, Default)]
pub struct DedupFilter {
    seen: HashMap<u64, Instant>,
}

impl DedupFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` when identical bytes were already submitted
    /// within the TTL window. A miss records the payload.
    pub fn is_duplicate(&mut self, audio: &[u8]) -> bool {
        self.is_duplicate_at(audio, Instant::now())
    }

    fn is_duplicate_at(&mut self, audio: &[u8], now: Instant) -> bool {
        self.seen
            .retain(|_, first_seen| now.duration_since(*first_seen) < DEDUP_TTL);

        let key = hash_audio(audio);
        match self.seen.get(&key) {
            Some(_) => true,
            None => {
                self.seen.insert(key, now);
                false
            }
        }
    }
}

fn hash_audio(audio: &[u8]) -> u64 {
    let prefix_len = audio.len().min(HASH_PREFIX_LEN);
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    audio[..prefix_len].hash(&mut hasher);
    audio.len().hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_within_window() {
        let mut filter = DedupFilter::new();
        let audio = vec![7u8; 1024];
        assert!(!filter.is_duplicate(&audio));
        assert!(filter.is_duplicate(&audio));
    }

    #[test]
    fn test_distinct_payloads_pass() {
        let mut filter = DedupFilter::new();
        assert!(!filter.is_duplicate(&[1, 2, 3]));
        assert!(!filter.is_duplicate(&[4, 5, 6]));
    }

    #[test]
    fn test_same_prefix_different_length_is_distinct() {
        let mut filter = DedupFilter::new();
        let short = vec![9u8; HASH_PREFIX_LEN];
        let long = vec![9u8; HASH_PREFIX_LEN + 100];
        assert!(!filter.is_duplicate(&short));
        assert!(!filter.is_duplicate(&long));
    }

    #[test]
    fn test_entry_expires_after_ttl() {
        let mut filter = DedupFilter::new();
        let audio = vec![3u8; 64];
        let start = Instant::now();
        assert!(!filter.is_duplicate_at(&audio, start));
        // Still inside the window.
        assert!(filter.is_duplicate_at(&audio, start + Duration::from_secs(4)));
        // Past the window: treated as a fresh submission.
        assert!(!filter.is_duplicate_at(&audio, start + Duration::from_secs(6)));
    }
}
