use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use grid_hedge_core::config::SessionConfig;
use grid_hedge_core::error::ConfigError;
use grid_hedge_core::traits::{EventSink, ExchangeAdapter, NullSink};
use grid_hedge_exchange_bitget::{BitgetAdapter, BitgetAuth, BitgetClient, BitgetClientConfig};
use grid_hedge_webhook::{WebhookConfig, WebhookEmitter};

use crate::commands::{SessionState, SessionStatus};
use crate::engine::SessionEngine;
use crate::handle::SessionHandle;

/// Default cap on concurrent sessions per process.
pub const DEFAULT_MAX_SESSIONS: usize = 100;

/// Command mailbox depth per session.
const COMMAND_BUFFER: usize = 32;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("session not found: {user_id}")]
    SessionNotFound { user_id: String },

    #[error("session capacity exhausted ({max} sessions)")]
    CapacityExhausted { max: usize },

    #[error("session {user_id} is already running")]
    AlreadyRunning { user_id: String },

    #[error(transparent)]
    InvalidConfig(#[from] ConfigError),

    #[error("session {user_id} is not accepting commands")]
    ChannelClosed { user_id: String },
}

/// Process-level resource counters for the admin surface.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceUsage {
    pub total_sessions: usize,
    pub running_sessions: usize,
    pub max_sessions: usize,
}

struct SessionEntry {
    handle: SessionHandle,
    task: JoinHandle<()>,
}

/// Process-wide registry of session engines, keyed by user id.
///
/// The registry map is the only structure shared across sessions; each
/// engine runs in its own task and owns its state exclusively. An engine
/// crash never affects its siblings.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, SessionEntry>>,
    max_sessions: usize,
}

impl SessionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_SESSIONS)
    }

    #[must_use]
    pub fn with_capacity(max_sessions: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_sessions: max_sessions.max(1),
        }
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.max_sessions
    }

    /// Registers a session against the live exchange, wiring the webhook
    /// emitter when a destination is configured.
    ///
    /// # Errors
    /// Rejects invalid configurations, duplicate running sessions, and
    /// registrations beyond the session cap.
    pub async fn register(&self, config: SessionConfig) -> Result<SessionHandle, RegistryError> {
        config.validate()?;

        let auth = BitgetAuth::new(
            config.exchange.api_key.clone(),
            config.exchange.api_secret.clone(),
            config.exchange.passphrase.clone(),
            config.exchange.demo,
        );
        let client = BitgetClient::new(auth, BitgetClientConfig::default());
        let adapter: Arc<dyn ExchangeAdapter> = Arc::new(BitgetAdapter::new(client));

        let sink: Arc<dyn EventSink> = match &config.webhook {
            Some(webhook) if !webhook.url.is_empty() => {
                let (emitter, _task) = WebhookEmitter::spawn(
                    WebhookConfig::new(webhook.url.clone(), webhook.secret.clone()),
                    config.user_id.clone(),
                    config.user_bot_id.clone(),
                );
                Arc::new(emitter)
            }
            _ => Arc::new(NullSink),
        };

        self.register_with(config, adapter, sink).await
    }

    /// Registers a session with an explicit adapter and sink. Used by tests
    /// and by callers that already hold an adapter.
    ///
    /// # Errors
    /// Rejects invalid configurations, duplicate running sessions, and
    /// registrations beyond the session cap.
    pub async fn register_with(
        &self,
        config: SessionConfig,
        adapter: Arc<dyn ExchangeAdapter>,
        sink: Arc<dyn EventSink>,
    ) -> Result<SessionHandle, RegistryError> {
        config.validate()?;
        let user_id = config.user_id.clone();

        // A running session must be stopped before its settings change.
        let existing = {
            let sessions = self.sessions.read().await;
            sessions.get(&user_id).map(|entry| entry.handle.clone())
        };
        if let Some(handle) = existing {
            if let Ok(status) = handle.status().await {
                if matches!(status.state, SessionState::Running | SessionState::Starting) {
                    return Err(RegistryError::AlreadyRunning { user_id });
                }
            }
            self.remove_entry(&user_id).await;
        }

        let mut sessions = self.sessions.write().await;
        if sessions.len() >= self.max_sessions {
            return Err(RegistryError::CapacityExhausted {
                max: self.max_sessions,
            });
        }

        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let engine = SessionEngine::new(config, adapter, sink, rx);
        let task_user = user_id.clone();
        let task = tokio::spawn(async move {
            if let Err(e) = engine.run().await {
                error!(user_id = %task_user, "session task error: {e}");
            }
        });

        let handle = SessionHandle::new(tx);
        sessions.insert(
            user_id.clone(),
            SessionEntry {
                handle: handle.clone(),
                task,
            },
        );
        info!(%user_id, total = sessions.len(), "session registered");
        Ok(handle)
    }

    /// Starts trading for a registered session.
    ///
    /// # Errors
    /// Fails when the session is unknown or its engine task has exited.
    pub async fn start(&self, user_id: &str) -> Result<(), RegistryError> {
        let handle = self.handle(user_id).await?;
        handle
            .start()
            .await
            .map_err(|_| RegistryError::ChannelClosed {
                user_id: user_id.to_string(),
            })
    }

    /// Requests a cooperative stop.
    ///
    /// # Errors
    /// Fails when the session is unknown or its engine task has exited.
    pub async fn stop(&self, user_id: &str) -> Result<(), RegistryError> {
        let handle = self.handle(user_id).await?;
        handle
            .stop()
            .await
            .map_err(|_| RegistryError::ChannelClosed {
                user_id: user_id.to_string(),
            })
    }

    /// Current status of one session.
    ///
    /// # Errors
    /// Fails when the session is unknown or its engine task has exited.
    pub async fn status(&self, user_id: &str) -> Result<SessionStatus, RegistryError> {
        let handle = self.handle(user_id).await?;
        handle
            .status()
            .await
            .map_err(|_| RegistryError::ChannelClosed {
                user_id: user_id.to_string(),
            })
    }

    /// Closes all positions for one session immediately.
    ///
    /// # Errors
    /// Fails when the session is unknown or its engine task has exited.
    pub async fn force_close_positions(&self, user_id: &str) -> Result<usize, RegistryError> {
        let handle = self.handle(user_id).await?;
        handle
            .force_close_positions()
            .await
            .map_err(|_| RegistryError::ChannelClosed {
                user_id: user_id.to_string(),
            })
    }

    /// Removes a session, stopping it first. Idempotent: removing an unknown
    /// user returns `false`. The engine's task is awaited, so the tick loop
    /// has fully exited when this returns.
    pub async fn unregister(&self, user_id: &str) -> bool {
        self.remove_entry(user_id).await
    }

    /// Status of every registered session. Sessions whose task died are
    /// skipped with a warning.
    pub async fn list_all(&self) -> Vec<SessionStatus> {
        let handles: Vec<(String, SessionHandle)> = {
            let sessions = self.sessions.read().await;
            sessions
                .iter()
                .map(|(id, entry)| (id.clone(), entry.handle.clone()))
                .collect()
        };

        let mut statuses = Vec::with_capacity(handles.len());
        for (user_id, handle) in handles {
            match handle.status().await {
                Ok(status) => statuses.push(status),
                Err(_) => warn!(%user_id, "session is not answering status requests"),
            }
        }
        statuses.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        statuses
    }

    pub async fn resource_usage(&self) -> ResourceUsage {
        let statuses = self.list_all().await;
        let running = statuses
            .iter()
            .filter(|s| matches!(s.state, SessionState::Running | SessionState::Starting))
            .count();
        ResourceUsage {
            total_sessions: self.sessions.read().await.len(),
            running_sessions: running,
            max_sessions: self.max_sessions,
        }
    }

    /// Stops every session in parallel with a global deadline. Sessions that
    /// miss the deadline are force-terminated.
    pub async fn shutdown_all(&self, deadline: Duration) {
        let entries: Vec<(String, SessionEntry)> = {
            let mut sessions = self.sessions.write().await;
            sessions.drain().collect()
        };
        if entries.is_empty() {
            return;
        }
        info!(count = entries.len(), "shutting down all sessions");

        let mut waiters = Vec::with_capacity(entries.len());
        for (user_id, entry) in entries {
            waiters.push(tokio::spawn(async move {
                let _ = entry.handle.shutdown().await;
                let mut task = entry.task;
                if tokio::time::timeout(deadline, &mut task).await.is_err() {
                    error!(%user_id, "session missed the shutdown deadline, force-terminating");
                    task.abort();
                    let _ = task.await;
                }
            }));
        }
        for waiter in waiters {
            let _ = waiter.await;
        }
    }

    async fn handle(&self, user_id: &str) -> Result<SessionHandle, RegistryError> {
        self.sessions
            .read()
            .await
            .get(user_id)
            .map(|entry| entry.handle.clone())
            .ok_or_else(|| RegistryError::SessionNotFound {
                user_id: user_id.to_string(),
            })
    }

    async fn remove_entry(&self, user_id: &str) -> bool {
        let entry = self.sessions.write().await.remove(user_id);
        let Some(entry) = entry else {
            return false;
        };

        let _ = entry.handle.shutdown().await;
        if let Err(e) = entry.task.await {
            warn!(%user_id, "session task join error: {e}");
        }
        info!(%user_id, "session unregistered");
        true
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
