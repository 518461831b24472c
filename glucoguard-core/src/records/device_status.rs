//! Device status documents
//!
//! Closed-loop systems and pumps report their own view of IOB/COB alongside
//! the treatment log. Multiple device families (OpenAPS, Loop, pump,
//! xDrip-js) may report overlapping but independently-timestamped values;
//! the most recent per device/field family is authoritative, and values
//! older than the 30-minute recency window are ignored entirely.

use serde::{Deserialize, Serialize};

use crate::time::{Timestamp, THIRTY_MINS_MS};

use super::Timestamped;

/// IOB as reported by a looping controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct DeviceIob {
    /// Insulin on board, units
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iob: Option<f64>,
    /// Basal portion of IOB, units
    #[serde(skip_serializing_if = "Option::is_none")]
    pub basaliob: Option<f64>,
    /// Bolus-only IOB; the field pumps report instead of `iob`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bolusiob: Option<f64>,
    /// Insulin activity, U/min
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activity: Option<f64>,
    /// Field-level timestamp when the controller stamps one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mills: Option<Timestamp>,
}

impl DeviceIob {
    /// The usable IOB number: controllers report `iob`, pumps `bolusiob`.
    pub fn amount(&self) -> Option<f64> {
        self.iob.or(self.bolusiob)
    }
}

/// COB as reported by a looping controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct DeviceCob {
    /// Carbs on board, grams
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cob: Option<f64>,
    /// Field-level timestamp when the controller stamps one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mills: Option<Timestamp>,
}

/// OpenAPS status block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct OpenApsStatus {
    /// Controller-computed IOB
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iob: Option<DeviceIob>,
    /// The loop's suggested action, which carries its COB estimate
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested: Option<DeviceCob>,
}

/// Loop (iOS) status block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct LoopStatus {
    /// Controller-computed IOB
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iob: Option<DeviceIob>,
    /// Controller-computed COB
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cob: Option<DeviceCob>,
}

/// Pump-reported status block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PumpStatus {
    /// Pump-tracked bolus IOB
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iob: Option<DeviceIob>,
    /// Reservoir units remaining
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reservoir: Option<f64>,
}

/// One uploaded device status document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct DeviceStatus {
    /// Stable identity
    #[serde(rename = "_id", alias = "id", skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Upload time, epoch milliseconds
    pub mills: Timestamp,
    /// Uploading device identifier
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    /// OpenAPS family report
    #[serde(skip_serializing_if = "Option::is_none")]
    pub openaps: Option<OpenApsStatus>,
    /// Loop family report
    #[serde(rename = "loop", skip_serializing_if = "Option::is_none")]
    pub loop_status: Option<LoopStatus>,
    /// Pump report
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pump: Option<PumpStatus>,
    /// xDrip-js bridge report, passed through untouched
    #[serde(skip_serializing_if = "Option::is_none")]
    pub xdripjs: Option<serde_json::Value>,
}

impl DeviceStatus {
    /// The controller IOB block this document carries, if any.
    pub fn iob_block(&self) -> Option<&DeviceIob> {
        if let Some(openaps) = &self.openaps {
            if openaps.iob.is_some() {
                return openaps.iob.as_ref();
            }
        }
        if let Some(loop_status) = &self.loop_status {
            if loop_status.iob.is_some() {
                return loop_status.iob.as_ref();
            }
        }
        self.pump.as_ref().and_then(|p| p.iob.as_ref())
    }

    /// The controller COB block this document carries, if any.
    pub fn cob_block(&self) -> Option<&DeviceCob> {
        if let Some(openaps) = &self.openaps {
            if openaps.suggested.is_some() {
                return openaps.suggested.as_ref();
            }
        }
        self.loop_status.as_ref().and_then(|l| l.cob.as_ref())
    }

    /// Effective timestamp of a field block: the block's own stamp when the
    /// controller provided one, else the document upload time.
    pub fn field_mills(&self, field_mills: Option<Timestamp>) -> Timestamp {
        field_mills.unwrap_or(self.mills)
    }

    /// Whether a field timestamped `at` is recent enough to be
    /// authoritative at evaluation time `time`.
    pub fn is_recent(at: Timestamp, time: Timestamp) -> bool {
        at <= time && time.saturating_sub(at) <= THIRTY_MINS_MS
    }
}

impl Timestamped for DeviceStatus {
    fn mills(&self) -> Timestamp {
        self.mills
    }
}
