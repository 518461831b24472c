//! Error types for the data engine
//!
//! The engine favors availability over strictness: malformed input degrades
//! to an absent derived value, never to an aborted cycle. Errors here exist
//! so each plugin and resolver can say precisely *why* it produced nothing;
//! the pipeline catches them, logs them with the plugin name, and moves on.

use thiserror_no_std::Error;

/// Result type for plugin computations
pub type PluginResult<T> = Result<T, PluginError>;

/// Failures inside a plugin's `set_properties`/`check_notifications` hooks
///
/// One plugin failing must not prevent others from running; the pipeline
/// logs these and continues with that plugin's property simply absent for
/// the cycle.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PluginError {
    /// A required profile value could not be resolved
    #[error("missing profile data: {field}")]
    MissingProfile {
        /// Which value lookup came back empty (e.g. "sens", "carbratio")
        field: &'static str,
    },

    /// No glucose entries are available at the evaluation time
    #[error("no glucose data available")]
    NoData,

    /// The most recent reading is too old to compute from
    #[error("glucose data is stale: last reading {age_mins} minutes old")]
    StaleData {
        /// Age of the newest reading, in minutes
        age_mins: u64,
    },

    /// Anything else a plugin wants to surface without aborting the cycle
    #[error("plugin failure: {0}")]
    Other(&'static str),
}

/// Failures while loading or resolving profile documents
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProfileError {
    /// No profile document covers the requested time
    #[error("no profile record available")]
    NoProfile,

    /// The named segment set does not exist in the profile store
    #[error("profile store has no entry named `{0}`")]
    UnknownProfile(String),

    /// `startDate` could not be parsed into a timestamp
    #[error("unparseable profile start date: `{0}`")]
    BadStartDate(String),

    /// The declared UTC offset is outside ±24h
    #[error("profile UTC offset {0} minutes is out of range")]
    BadUtcOffset(i32),
}
