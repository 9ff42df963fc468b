//! Bounded-queue webhook delivery for session events.
//!
//! One queue and one consumer task per session: producers enqueue with a
//! short timeout (drop-newest on overflow, trading never blocks), the
//! consumer posts signed JSON in FIFO order with bounded retries. Delivery
//! is at-least-once within the retry budget; the upstream platform
//! tolerates duplicates.

pub mod emitter;
pub mod signature;

pub use emitter::{WebhookConfig, WebhookEmitter, WebhookStats, MAX_QUEUE_SIZE};
pub use signature::sign_body;
