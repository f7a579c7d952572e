pub mod candle;
pub mod decision;
pub mod errors;
pub mod events;
pub mod position;
pub mod signal;
pub mod strategy;

pub use candle::{Candle, Interval, Ticker};
pub use decision::{Decision, DecisionKind, TradePlan};
pub use position::{CloseReason, Position, PositionMode, PositionSide, PositionState};
pub use signal::{SignalLifecycle, SignalState};
pub use strategy::{FilterLanguage, Strategy};
