//! Core data engine for GlucoGuard
//!
//! Reconciles CGM glucose/treatment/device records under a
//! full-refresh-or-incremental-update protocol, resolves therapy profiles
//! at arbitrary points in time, derives clinical properties (IOB, COB,
//! delta, forecast inputs) through an ordered plugin pipeline, and reduces
//! plugin notification requests into per-group alarm events.
//!
//! One evaluation cycle is synchronous and single-threaded:
//!
//! ```text
//! payload ──▶ RecordStore::apply ──▶ Sandbox ──▶ Pipeline::run_cycle
//!                                                  │
//!                       properties + alarm events ◀┘
//! ```
//!
//! ```no_run
//! use glucoguard_core::{
//!     alarms::AlarmEngine, pipeline::Pipeline, plugins,
//!     profile::ProfileResolver, records::{Payload, RecordStore},
//!     settings::Settings,
//! };
//!
//! let mut store = RecordStore::new();
//! let mut resolver = ProfileResolver::new();
//! let mut alarms = AlarmEngine::new();
//! let settings = Settings::default();
//!
//! let mut pipeline = Pipeline::new();
//! pipeline.register(Box::new(plugins::BgNowPlugin));
//! pipeline.register(Box::new(plugins::IobPlugin));
//! pipeline.register(Box::new(plugins::CobPlugin));
//!
//! // each tick:
//! let payload: Payload = serde_json::from_str("{}").unwrap();
//! let now = 1_700_000_000_000;
//! store.apply(payload, now);
//! resolver.set_profiles(store.profiles.clone());
//! resolver.update_treatments(&store.treatments);
//! let (properties, events) = pipeline.run_cycle(now, &store, &resolver, &settings, &mut alarms);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod alarms;
pub mod errors;
pub mod pipeline;
pub mod plugins;
pub mod profile;
pub mod records;
pub mod sandbox;
pub mod settings;
pub mod time;
pub mod units;

// Public API
pub use alarms::{AlarmEngine, AlarmEvent, Level, Notify, Snooze};
pub use errors::{PluginError, PluginResult, ProfileError};
pub use pipeline::{Pipeline, Plugin};
pub use profile::{ProfileResolver, ValueKind};
pub use records::{Payload, RecordStore, Treatment};
pub use sandbox::{Properties, PropertyValue, Sandbox};
pub use settings::Settings;
pub use units::Units;

/// Crate version string
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
