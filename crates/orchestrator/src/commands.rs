use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

/// Commands accepted by a session engine's mailbox.
#[derive(Debug)]
pub enum SessionCommand {
    Start,
    Stop,
    GetStatus(oneshot::Sender<SessionStatus>),
    /// Close every open position immediately; replies with the closed count.
    ForceClosePositions(oneshot::Sender<usize>),
    /// Stop if running, then terminate the engine task.
    Shutdown,
}

/// Session lifecycle states.
///
/// Transitions follow `Idle -> Starting -> Running -> Stopping -> Stopped`;
/// any state may fall into `Error`. `Stopped` and `Error` are terminal until
/// the session is re-created through the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Starting,
    Running,
    Stopping,
    Stopped,
    Error,
}

impl SessionState {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Error => "error",
        }
    }

    /// Terminal states only leave through unregister + re-register.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped | Self::Error)
    }
}

/// Point-in-time session summary answered over the command mailbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub user_id: String,
    pub user_bot_id: String,
    pub symbol: String,
    pub state: SessionState,
    pub demo: bool,
    pub current_price: Decimal,
    pub balance: Decimal,
    pub tick_count: u64,
    pub buy_positions: usize,
    pub sell_positions: usize,
    pub total_trades: u64,
    pub winning_trades: u64,
    pub realized_pnl: Decimal,
    pub unrealized_pnl: Decimal,
    pub started_at: Option<DateTime<Utc>>,
    pub uptime_secs: i64,
    pub error: Option<String>,
}
