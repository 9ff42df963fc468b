//! Pure indicator calculators over candle sequences.
//!
//! All three are deterministic given the same input history. State that must
//! survive restarts (the SAR tuple, the CCI history) is carried in small
//! serializable values rather than hidden object state.

pub mod cci;
pub mod lwma;
pub mod sar;

pub use cci::CciState;
pub use lwma::{lwma, WeightDirection};
pub use sar::{SarState, Trend};
