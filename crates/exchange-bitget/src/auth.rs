//! HMAC-SHA256 authentication for the Bitget REST API.
//!
//! The signature is computed over `timestamp + METHOD + requestPath + body`
//! and base64 encoded. Demo accounts add the `paptrading` header; nothing
//! else differs between live and demo requests.

use std::time::{SystemTime, UNIX_EPOCH};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use grid_hedge_core::error::ExchangeError;

type HmacSha256 = Hmac<Sha256>;

pub struct BitgetAuth {
    api_key: String,
    api_secret: String,
    passphrase: String,
    demo: bool,
}

impl std::fmt::Debug for BitgetAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BitgetAuth")
            .field("api_key", &self.api_key)
            .field("api_secret", &"[REDACTED]")
            .field("passphrase", &"[REDACTED]")
            .field("demo", &self.demo)
            .finish()
    }
}

impl BitgetAuth {
    #[must_use]
    pub fn new(
        api_key: impl Into<String>,
        api_secret: impl Into<String>,
        passphrase: impl Into<String>,
        demo: bool,
    ) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret: api_secret.into(),
            passphrase: passphrase.into(),
            demo,
        }
    }

    #[must_use]
    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    #[must_use]
    pub const fn is_demo(&self) -> bool {
        self.demo
    }

    /// Current Unix timestamp in milliseconds.
    ///
    /// # Errors
    /// Returns an error if the system clock reads before the Unix epoch.
    pub fn timestamp_ms() -> Result<u64, ExchangeError> {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .map_err(|e| ExchangeError::Configuration(format!("system clock error: {e}")))
    }

    /// Signs `timestamp + METHOD + requestPath + body` (base64 output).
    ///
    /// # Errors
    /// Returns an error if the secret cannot key the MAC.
    pub fn sign(
        &self,
        timestamp: &str,
        method: &str,
        request_path: &str,
        body: &str,
    ) -> Result<String, ExchangeError> {
        let message = format!("{timestamp}{}{request_path}{body}", method.to_uppercase());
        let mut mac = HmacSha256::new_from_slice(self.api_secret.as_bytes())
            .map_err(|e| ExchangeError::Authentication(format!("invalid secret key: {e}")))?;
        mac.update(message.as_bytes());
        Ok(BASE64.encode(mac.finalize().into_bytes()))
    }

    /// Full header set for a request, signed with the current timestamp.
    ///
    /// # Errors
    /// Returns an error if signing fails.
    pub fn headers(
        &self,
        method: &str,
        request_path: &str,
        body: &str,
    ) -> Result<Vec<(&'static str, String)>, ExchangeError> {
        let timestamp = Self::timestamp_ms()?.to_string();
        self.headers_with_timestamp(&timestamp, method, request_path, body)
    }

    /// Header set with an explicit timestamp (useful for tests).
    ///
    /// # Errors
    /// Returns an error if signing fails.
    pub fn headers_with_timestamp(
        &self,
        timestamp: &str,
        method: &str,
        request_path: &str,
        body: &str,
    ) -> Result<Vec<(&'static str, String)>, ExchangeError> {
        let sign = self.sign(timestamp, method, request_path, body)?;

        let mut headers = vec![
            ("ACCESS-KEY", self.api_key.clone()),
            ("ACCESS-SIGN", sign),
            ("ACCESS-TIMESTAMP", timestamp.to_string()),
            ("ACCESS-PASSPHRASE", self.passphrase.clone()),
            ("locale", "en-US".to_string()),
        ];
        if self.demo {
            headers.push(("paptrading", "1".to_string()));
        }
        Ok(headers)
    }
}
