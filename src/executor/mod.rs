//! Trade executor (C7): paper and live implementations of the
//! [`crate::lifecycle::PositionSink`] port the signal lifecycle manager
//! drives to open, adjust and close positions.

pub mod live;
pub mod paper;
pub mod sizing;

pub use live::LiveExecutor;
pub use paper::PaperExecutor;
