//! Domain records and the canonical record store
//!
//! ## Overview
//!
//! Everything the engine reasons about is a time-stamped record: glucose
//! readings, meter checks, calibrations, treatments, device status
//! documents, food entries and therapy profiles. This module defines those
//! records with their wire (JSON) shapes, and [`store::RecordStore`] holds
//! the canonical, time-ordered arrays and reconciles incoming payloads into
//! them.
//!
//! ## Invariants
//!
//! - Within a stored array, `mills` values are non-decreasing after
//!   processing.
//! - Records are immutable once stored, with two exceptions: the on-demand
//!   `scaled` value attached once to a glucose entry, and the
//!   `cut_by`/`cutting` tags attached by duration processing (a derived
//!   view, not the canonical array).

pub mod device_status;
pub mod profile_record;
pub mod store;
pub mod treatment;

pub use device_status::DeviceStatus;
pub use profile_record::{ProfileRecord, ProfileSegmentSet, Segment, ValueSpan};
pub use store::{process_durations, RecordStore};
pub use treatment::{event_types, MergeAction, Treatment};

use std::cell::OnceCell;

use serde::{Deserialize, Serialize};

use crate::time::Timestamp;
use crate::units::{scale_mgdl, Units};

/// Any domain entity keyed by epoch milliseconds
pub trait Timestamped {
    /// Epoch milliseconds of this record
    fn mills(&self) -> Timestamp;
}

/// Glucose sensor reading (sgv)
///
/// Immutable after creation except for the `scaled` display value, which is
/// computed once on demand and cached on the record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Entry {
    /// Reading time, epoch milliseconds
    pub mills: Timestamp,
    /// Glucose in mg/dL (canonical)
    pub mgdl: f64,
    /// Trend arrow reported by the uploader ("Flat", "SingleUp", ...)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub direction: Option<String>,
    /// Sensor noise level (1 = clean)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub noise: Option<u8>,
    /// Filtered raw channel
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filtered: Option<f64>,
    /// Unfiltered raw channel
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unfiltered: Option<f64>,
    /// Uploading device identifier
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    /// Unit-converted display value, attached once on first use
    #[serde(skip)]
    pub scaled: OnceCell<f64>,
}

impl Entry {
    /// Create a bare reading; the usual constructor in tests.
    pub fn new(mills: Timestamp, mgdl: f64) -> Self {
        Self {
            mills,
            mgdl,
            ..Self::default()
        }
    }

    /// Display value in the requested units, computed once and cached.
    pub fn scaled(&self, units: Units) -> f64 {
        *self.scaled.get_or_init(|| scale_mgdl(self.mgdl, units))
    }
}

impl Timestamped for Entry {
    fn mills(&self) -> Timestamp {
        self.mills
    }
}

/// Finger-stick meter reading (mbg)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct MeterReading {
    /// Reading time, epoch milliseconds
    pub mills: Timestamp,
    /// Glucose in mg/dL
    pub mgdl: f64,
    /// Uploading device identifier
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
}

impl Timestamped for MeterReading {
    fn mills(&self) -> Timestamp {
        self.mills
    }
}

/// Sensor calibration record (cal)
///
/// The raw-BG plugin combines these coefficients with an entry's
/// filtered/unfiltered channels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Calibration {
    /// Calibration time, epoch milliseconds
    pub mills: Timestamp,
    /// Scale coefficient
    pub scale: f64,
    /// Intercept coefficient
    pub intercept: f64,
    /// Slope coefficient
    pub slope: f64,
}

impl Timestamped for Calibration {
    fn mills(&self) -> Timestamp {
        self.mills
    }
}

/// Food database entry, identity-merged like treatments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Food {
    /// Stable identity
    #[serde(rename = "_id", alias = "id", skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Creation time, epoch milliseconds (0 for undated catalogue entries)
    pub mills: Timestamp,
    /// Food name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Carbohydrate grams per portion
    #[serde(skip_serializing_if = "Option::is_none")]
    pub carbs: Option<f64>,
    /// Portion size
    #[serde(skip_serializing_if = "Option::is_none")]
    pub portion: Option<f64>,
    /// Portion unit
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    /// Merge action tag, wire only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<MergeAction>,
}

impl Timestamped for Food {
    fn mills(&self) -> Timestamp {
        self.mills
    }
}

/// Inbound payload from the transport layer
///
/// `delta == false` means a full state refresh: every non-empty array
/// replaces the store's array wholesale. `delta == true` means an
/// incremental update reconciled by the merge rules in
/// [`store::RecordStore::apply`].
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Payload {
    /// Incremental-update flag
    pub delta: bool,
    /// Glucose readings
    pub sgvs: Vec<Entry>,
    /// Meter readings
    pub mbgs: Vec<MeterReading>,
    /// Calibrations
    pub cals: Vec<Calibration>,
    /// Treatments, optionally action-tagged
    pub treatments: Vec<Treatment>,
    /// Food entries, optionally action-tagged
    pub food: Vec<Food>,
    /// Device status documents
    pub devicestatus: Vec<DeviceStatus>,
    /// Therapy profiles
    pub profiles: Vec<ProfileRecord>,
    /// Server-side database statistics, passed through untouched
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dbstats: Option<serde_json::Value>,
}
