//! Bitget USDT-futures exchange adapter.
//!
//! Signed REST (HMAC-SHA256) with rate limiting and transient-retry policy
//! hidden behind the [`grid_hedge_core::ExchangeAdapter`] contract. Demo
//! accounts ride the same endpoints with the exchange's paper-trading
//! header, so live and demo are indistinguishable to the engine.

pub mod adapter;
pub mod auth;
pub mod client;
mod types;

pub use adapter::BitgetAdapter;
pub use auth::BitgetAuth;
pub use client::{BitgetClient, BitgetClientConfig, BITGET_API_URL};
