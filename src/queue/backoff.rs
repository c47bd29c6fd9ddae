use std::time::Duration;

use rand::Rng;
use sha2::{Digest, Sha256};

/// Exponential retry delay: base doubling per attempt, capped, plus up to
/// 30% random jitter so concurrent workers do not retry in lockstep.
pub fn retry_delay(attempt: u32, base_secs: u64, cap_secs: u64) -> Duration {
    let exp = attempt.saturating_sub(1).min(20);
    let raw = base_secs.saturating_mul(1u64 << exp);
    let capped = raw.min(cap_secs);
    let jitter = rand::thread_rng().gen_range(0.0..0.3);
    Duration::from_secs_f64(capped as f64 * (1.0 + jitter))
}

/// Collapse whitespace and case so trivially re-worded duplicates hash the
/// same.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Content+target dedup key.
pub fn dedup_key(target: &str, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(target.as_bytes());
    hasher.update(b"\0");
    hasher.update(normalize_text(text).as_bytes());
    let digest = hasher.finalize();
    hex_prefix(&digest, 16)
}

fn hex_prefix(bytes: &[u8], take: usize) -> String {
    bytes
        .iter()
        .take(take)
        .map(|b| format!("{:02x}", b))
        .collect()
}
