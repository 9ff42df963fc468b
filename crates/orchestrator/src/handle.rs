use anyhow::Result;
use tokio::sync::{mpsc, oneshot};

use crate::commands::{SessionCommand, SessionStatus};

/// Cloneable handle to one session engine's mailbox.
#[derive(Clone, Debug)]
pub struct SessionHandle {
    tx: mpsc::Sender<SessionCommand>,
}

impl SessionHandle {
    #[must_use]
    pub const fn new(tx: mpsc::Sender<SessionCommand>) -> Self {
        Self { tx }
    }

    /// Starts trading.
    ///
    /// # Errors
    /// Returns an error if the engine task has already terminated.
    pub async fn start(&self) -> Result<()> {
        self.tx.send(SessionCommand::Start).await?;
        Ok(())
    }

    /// Stops trading cooperatively; the in-flight tick finishes first.
    ///
    /// # Errors
    /// Returns an error if the engine task has already terminated.
    pub async fn stop(&self) -> Result<()> {
        self.tx.send(SessionCommand::Stop).await?;
        Ok(())
    }

    /// Fetches the current session status.
    ///
    /// # Errors
    /// Returns an error if the engine task has already terminated.
    pub async fn status(&self) -> Result<SessionStatus> {
        let (tx, rx) = oneshot::channel();
        self.tx.send(SessionCommand::GetStatus(tx)).await?;
        Ok(rx.await?)
    }

    /// Closes every open position immediately, returning the closed count.
    ///
    /// # Errors
    /// Returns an error if the engine task has already terminated.
    pub async fn force_close_positions(&self) -> Result<usize> {
        let (tx, rx) = oneshot::channel();
        self.tx.send(SessionCommand::ForceClosePositions(tx)).await?;
        Ok(rx.await?)
    }

    /// Stops the session if needed and terminates the engine task.
    ///
    /// # Errors
    /// Returns an error if the engine task has already terminated.
    pub async fn shutdown(&self) -> Result<()> {
        self.tx.send(SessionCommand::Shutdown).await?;
        Ok(())
    }
}
