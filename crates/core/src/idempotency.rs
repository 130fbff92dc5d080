use chrono::Utc;
use rand::{distributions::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

// Shared by every factory so keys stay unique for the whole process.
static SEQUENCE: AtomicU64 = AtomicU64::new(0);

const SUFFIX_LEN: usize = 6;

/// Client-chosen token letting the backend deduplicate a retried request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct IdempotencyKeyFactory;

impl IdempotencyKeyFactory {
    pub fn new() -> Self {
        Self
    }

    /// `{purpose}-{unix-millis}-{sequence}-{random}`.
    ///
    /// Call once per logical operation; reuse the returned key only when resending that
    /// same operation.
    pub fn next(&self, purpose: &str) -> IdempotencyKey {
        let seq = SEQUENCE.fetch_add(1, Ordering::Relaxed);
        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(SUFFIX_LEN)
            .map(char::from)
            .collect();
        IdempotencyKey(format!(
            "{purpose}-{}-{seq}-{suffix}",
            Utc::now().timestamp_millis()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn never_repeats_across_ten_thousand_calls() {
        let factory = IdempotencyKeyFactory::new();
        let mut seen = HashSet::new();
        for _ in 0..10_000 {
            assert!(seen.insert(factory.next("web-qr")));
        }
    }

    #[test]
    fn separate_factories_do_not_collide() {
        let a = IdempotencyKeyFactory::new().next("web-link");
        let b = IdempotencyKeyFactory::new().next("web-link");
        assert_ne!(a, b);
    }

    #[test]
    fn key_starts_with_purpose() {
        let key = IdempotencyKeyFactory::new().next("web-qr");
        assert!(key.as_str().starts_with("web-qr-"));
        assert_eq!(key.to_string(), key.as_str());
    }
}
