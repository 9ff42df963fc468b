pub mod grid;
pub mod performance;

pub use grid::{GlobalLimitKind, GridPosition, GridStrategy, ProfitDecision};
pub use performance::Performance;
