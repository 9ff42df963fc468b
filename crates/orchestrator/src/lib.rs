pub mod candle_cache;
pub mod commands;
pub mod engine;
pub mod handle;
pub mod persistence;
pub mod registry;

pub use commands::{SessionCommand, SessionState, SessionStatus};
pub use engine::SessionEngine;
pub use handle::SessionHandle;
pub use persistence::{IndicatorPersistence, IndicatorSnapshot};
pub use registry::{RegistryError, ResourceUsage, SessionRegistry, DEFAULT_MAX_SESSIONS};
