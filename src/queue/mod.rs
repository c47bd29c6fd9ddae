//! Durable queues: outbound replies and made promises.
//!
//! Both queues are append-logically, rewrite-compactly persisted JSONL
//! files giving the engine at-least-once, deduplicated delivery semantics
//! under intermittent external-API failure.

mod actions;
mod backoff;
mod commitments;

pub use actions::{ActionPriority, ActionQueue, ActionStatus, QueuedAction};
pub use backoff::{dedup_key, normalize_text, retry_delay};
pub use commitments::{Commitment, CommitmentQueue, CommitmentStatus, SweepReport};
