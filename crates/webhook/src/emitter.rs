use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use rand::Rng;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};
use uuid::Uuid;

use grid_hedge_core::events::SessionEvent;
use grid_hedge_core::traits::EventSink;

use crate::signature::sign_body;

/// Queue capacity per session.
pub const MAX_QUEUE_SIZE: usize = 1000;

/// How long a producer may wait for queue space before the event is dropped.
const ENQUEUE_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct WebhookConfig {
    pub url: String,
    pub secret: String,
    /// Per-delivery request deadline.
    pub timeout_secs: u64,
    /// Delivery attempts per event.
    pub max_retries: u32,
    /// Base backoff between attempts; doubles per retry with jitter on top.
    pub retry_delay_ms: u64,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            secret: String::new(),
            timeout_secs: 5,
            max_retries: 3,
            retry_delay_ms: 1_000,
        }
    }
}

impl WebhookConfig {
    #[must_use]
    pub fn new(url: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            secret: secret.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    sent: AtomicU64,
    dropped: AtomicU64,
    failed: AtomicU64,
}

/// Delivery counters for one session's emitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WebhookStats {
    pub sent: u64,
    /// Events dropped at enqueue because the queue stayed full.
    pub dropped: u64,
    /// Events dropped after the retry budget was exhausted.
    pub failed: u64,
    /// Events currently waiting in the queue.
    pub queue_depth: usize,
}

/// Producer half of a session's webhook pipeline.
///
/// Cloneable; all clones feed the single consumer task spawned alongside the
/// first instance. Dropping every clone lets the consumer drain and exit.
#[derive(Clone)]
pub struct WebhookEmitter {
    tx: mpsc::Sender<Value>,
    counters: Arc<Counters>,
    user_id: String,
    user_bot_id: String,
}

impl WebhookEmitter {
    /// Spawns the delivery task and returns the emitter plus its join handle.
    #[must_use]
    pub fn spawn(
        config: WebhookConfig,
        user_id: impl Into<String>,
        user_bot_id: impl Into<String>,
    ) -> (Self, JoinHandle<()>) {
        Self::spawn_with_queue_size(config, user_id, user_bot_id, MAX_QUEUE_SIZE)
    }

    #[must_use]
    pub fn spawn_with_queue_size(
        config: WebhookConfig,
        user_id: impl Into<String>,
        user_bot_id: impl Into<String>,
        queue_size: usize,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(queue_size.max(1));
        let counters = Arc::new(Counters::default());
        let worker = DeliveryWorker {
            config,
            rx,
            counters: counters.clone(),
            http: reqwest::Client::new(),
        };
        let handle = tokio::spawn(worker.run());
        (
            Self {
                tx,
                counters,
                user_id: user_id.into(),
                user_bot_id: user_bot_id.into(),
            },
            handle,
        )
    }

    /// Wraps the event in the wire envelope and offers it to the queue.
    ///
    /// Returns `false` when the queue stayed full for the enqueue timeout
    /// and the event was dropped.
    pub async fn enqueue(&self, event: SessionEvent) -> bool {
        let kind = event.kind();
        let payload = self.envelope(&event);
        match self.tx.send_timeout(payload, ENQUEUE_TIMEOUT).await {
            Ok(()) => true,
            Err(_) => {
                let dropped = self.counters.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(kind, dropped, "webhook queue full, dropping event");
                false
            }
        }
    }

    #[must_use]
    pub fn stats(&self) -> WebhookStats {
        WebhookStats {
            sent: self.counters.sent.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            queue_depth: self.tx.max_capacity() - self.tx.capacity(),
        }
    }

    fn envelope(&self, event: &SessionEvent) -> Value {
        let mut data = event.data();
        if let Value::Object(map) = &mut data {
            map.insert("userId".to_string(), json!(self.user_id));
            map.insert("userBotId".to_string(), json!(self.user_bot_id));
        }
        json!({
            "event": event.kind(),
            "timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            "data": data,
        })
    }
}

#[async_trait]
impl EventSink for WebhookEmitter {
    async fn emit(&self, event: SessionEvent) {
        self.enqueue(event).await;
    }
}

struct DeliveryWorker {
    config: WebhookConfig,
    rx: mpsc::Receiver<Value>,
    counters: Arc<Counters>,
    http: reqwest::Client,
}

impl DeliveryWorker {
    async fn run(mut self) {
        while let Some(payload) = self.rx.recv().await {
            self.deliver(payload).await;
        }
        debug!("webhook queue drained, delivery task exiting");
    }

    async fn deliver(&self, payload: Value) {
        let body = payload.to_string();
        let signature = sign_body(&self.config.secret, &body);
        let delivery_id = Uuid::new_v4().to_string();
        let timestamp = Utc::now().timestamp_millis().to_string();

        for attempt in 1..=self.config.max_retries.max(1) {
            let result = self
                .http
                .post(&self.config.url)
                .timeout(Duration::from_secs(self.config.timeout_secs))
                .header("Content-Type", "application/json")
                .header("X-Webhook-Signature", &signature)
                .header("X-Webhook-Timestamp", &timestamp)
                .header("X-Webhook-Id", &delivery_id)
                .body(body.clone())
                .send()
                .await;

            match result {
                Ok(response) if response.status().is_success() => {
                    self.counters.sent.fetch_add(1, Ordering::Relaxed);
                    debug!(%delivery_id, "webhook delivered");
                    return;
                }
                Ok(response) => {
                    warn!(
                        status = %response.status(),
                        attempt,
                        "webhook delivery rejected"
                    );
                }
                Err(e) => {
                    warn!(error = %e, attempt, "webhook delivery failed");
                }
            }

            if attempt < self.config.max_retries {
                let backoff = self.config.retry_delay_ms << (attempt - 1);
                let jitter = rand::thread_rng().gen_range(0..=self.config.retry_delay_ms / 2 + 1);
                tokio::time::sleep(Duration::from_millis(backoff + jitter)).await;
            }
        }

        self.counters.failed.fetch_add(1, Ordering::Relaxed);
        error!(
            attempts = self.config.max_retries,
            "webhook delivery dropped after retry budget"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use grid_hedge_core::events::StatusChanged;
    use std::time::Instant;

    fn status_event(n: u64) -> SessionEvent {
        SessionEvent::StatusChanged(StatusChanged {
            previous_status: "running".into(),
            new_status: format!("event-{n}"),
            reason: String::new(),
        })
    }

    /// Emitter wired to a raw channel with no consumer, for backpressure
    /// tests.
    fn detached_emitter(queue: usize) -> (WebhookEmitter, mpsc::Receiver<Value>) {
        let (tx, rx) = mpsc::channel(queue);
        (
            WebhookEmitter {
                tx,
                counters: Arc::new(Counters::default()),
                user_id: "user-1".into(),
                user_bot_id: "bot-1".into(),
            },
            rx,
        )
    }

    #[tokio::test]
    async fn envelope_wraps_event_with_identity() {
        let (emitter, mut rx) = detached_emitter(8);
        assert!(emitter.enqueue(status_event(1)).await);

        let payload = rx.recv().await.unwrap();
        assert_eq!(payload["event"], "status_changed");
        assert_eq!(payload["data"]["userId"], "user-1");
        assert_eq!(payload["data"]["userBotId"], "bot-1");
        assert!(payload["timestamp"].as_str().unwrap().ends_with('Z'));
    }

    #[tokio::test]
    async fn full_queue_drops_the_newest_event_after_timeout() {
        let (emitter, mut rx) = detached_emitter(MAX_QUEUE_SIZE);

        for n in 0..MAX_QUEUE_SIZE as u64 {
            assert!(emitter.enqueue(status_event(n)).await, "event {n} queued");
        }

        // The consumer is blocked, so event 1001 must time out and drop.
        let started = Instant::now();
        assert!(!emitter.enqueue(status_event(MAX_QUEUE_SIZE as u64)).await);
        assert!(started.elapsed() >= ENQUEUE_TIMEOUT);
        assert_eq!(emitter.stats().dropped, 1);

        // Draining afterwards preserves FIFO order.
        let first = rx.recv().await.unwrap();
        assert_eq!(first["data"]["newStatus"], "event-0");
        let second = rx.recv().await.unwrap();
        assert_eq!(second["data"]["newStatus"], "event-1");
    }

    #[tokio::test]
    async fn stats_report_queue_depth() {
        let (emitter, _rx) = detached_emitter(16);
        emitter.enqueue(status_event(0)).await;
        emitter.enqueue(status_event(1)).await;
        let stats = emitter.stats();
        assert_eq!(stats.queue_depth, 2);
        assert_eq!(stats.sent, 0);
    }

    #[tokio::test]
    async fn consumer_exits_when_every_producer_is_dropped() {
        let (emitter, handle) = WebhookEmitter::spawn_with_queue_size(
            WebhookConfig::new("http://127.0.0.1:1/webhook", "secret"),
            "user-1",
            "bot-1",
            8,
        );
        drop(emitter);
        // Nothing was queued, so the worker should drain and finish.
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("worker should exit")
            .expect("worker should not panic");
    }
}
