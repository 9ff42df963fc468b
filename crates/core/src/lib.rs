pub mod config;
pub mod error;
pub mod events;
pub mod indicators;
pub mod market;
pub mod traits;

pub use config::SessionConfig;
pub use error::{ConfigError, ExchangeError};
pub use market::{Candle, Side, Signal};
pub use traits::{EventSink, ExchangeAdapter, NullSink};
