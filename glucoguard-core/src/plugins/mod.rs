//! Built-in computation plugins
//!
//! Each plugin consumes the per-cycle sandbox and optionally publishes one
//! named property. Registration order is priority order: the first plugin
//! to successfully compute a value for a name claims it for the cycle
//! (see [`crate::sandbox::Properties`]).
//!
//! The forecast property shape lives here even though the AR2 model ships
//! in its own crate, so any forecast implementation publishes the same
//! thing the consumers read.

pub mod bgnow;
pub mod cob;
pub mod direction;
pub mod errorcodes;
pub mod iob;
pub mod rawbg;
pub mod timeago;

pub use bgnow::BgNowPlugin;
pub use cob::CobPlugin;
pub use direction::DirectionPlugin;
pub use errorcodes::ErrorCodesPlugin;
pub use iob::IobPlugin;
pub use rawbg::RawBgPlugin;
pub use timeago::TimeAgoPlugin;

use crate::time::Timestamp;

/// One forecast point
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ForecastPoint {
    /// Forecast time, epoch milliseconds
    pub mills: Timestamp,
    /// Predicted glucose, mg/dL
    pub mgdl: f64,
}

/// Short-horizon glucose forecast, published under the `"ar2"` name
#[derive(Debug, Clone, PartialEq)]
pub struct ForecastProperty {
    /// Fixed-cadence points used for alarm evaluation
    pub predicted: Vec<ForecastPoint>,
    /// Display cone: upper/lower pairs widening with the step index
    pub cone: Vec<ForecastPoint>,
    /// Mean squared log-deviation from the 120 mg/dL reference
    pub avg_loss: f64,
    /// One-line rendering for the dashboard
    pub display_line: String,
}
