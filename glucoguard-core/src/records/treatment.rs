//! Treatment records
//!
//! A treatment is anything the user or an uploading device did: boluses,
//! carb entries, temp basals, profile switches, temporary targets. Wire
//! shape follows the uploader conventions (camelCase, `_id`, duration in
//! minutes). A treatment may be logically superseded by a later end event
//! of the same family, which truncates its `duration` - never extends it;
//! see [`super::store::process_durations`].

use serde::{Deserialize, Serialize};

use crate::time::{mins_to_ms_f64, Timestamp};
use crate::units::{Units, MMOL_TO_MGDL};

use super::Timestamped;

/// Well-known `eventType` values the engine gives semantics to
///
/// The field itself stays a free string: uploaders invent event types and
/// the store must carry them through untouched.
pub mod event_types {
    /// Temporary basal rate change
    pub const TEMP_BASAL: &str = "Temp Basal";
    /// Profile switch, optionally time-bounded
    pub const PROFILE_SWITCH: &str = "Profile Switch";
    /// Combo (dual-wave) bolus with an extended relative rate
    pub const COMBO_BOLUS: &str = "Combo Bolus";
    /// Temporary BG target override
    pub const TEMP_TARGET: &str = "Temporary Target";
}

/// Delta-merge action tag carried on the wire, stripped before storage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeAction {
    /// Replace the record with the matching id
    Update,
    /// Delete the record with the matching id
    Remove,
}

/// A logged therapy event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Treatment {
    /// Stable identity used by delta updates and removals
    #[serde(rename = "_id", alias = "id", skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Event time, epoch milliseconds
    pub mills: Timestamp,
    /// Free-form event type; see [`event_types`] for the recognized values
    pub event_type: String,
    /// Duration in minutes, for events that span an interval
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    /// Bolus insulin, units
    #[serde(skip_serializing_if = "Option::is_none")]
    pub insulin: Option<f64>,
    /// Carbohydrates, grams
    #[serde(skip_serializing_if = "Option::is_none")]
    pub carbs: Option<f64>,
    /// Named profile this switch activates
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
    /// Temp basal: percent adjustment relative to the scheduled rate
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percent: Option<f64>,
    /// Temp basal: absolute rate override, U/h
    #[serde(skip_serializing_if = "Option::is_none")]
    pub absolute: Option<f64>,
    /// Combo bolus: additive relative rate, U/h
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relative: Option<f64>,
    /// Profile switch: circadian percentage override
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percentage: Option<f64>,
    /// Profile switch: circadian hour offset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeshift: Option<f64>,
    /// Temporary target: top of range
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_top: Option<f64>,
    /// Temporary target: bottom of range
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_bottom: Option<f64>,
    /// Unit tag on target fields as uploaded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub units: Option<Units>,
    /// Delta-merge action, wire only - stripped before storage
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<MergeAction>,
    /// Duration processing: `mills` of the end event that truncated this record
    #[serde(rename = "cuttedby", skip_serializing_if = "Option::is_none")]
    pub cut_by: Option<Timestamp>,
    /// Duration processing: `mills` of the record this end event truncated
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cutting: Option<Timestamp>,
}

impl Treatment {
    /// Whether this treatment spans a positive interval.
    pub fn has_duration(&self) -> bool {
        self.duration.map(|d| d > 0.0).unwrap_or(false)
    }

    /// Duration in milliseconds (0 when absent).
    pub fn duration_ms(&self) -> u64 {
        mins_to_ms_f64(self.duration.unwrap_or(0.0))
    }

    /// End of the spanned interval, epoch milliseconds.
    pub fn end_mills(&self) -> Timestamp {
        self.mills + self.duration_ms()
    }

    /// Whether `time` falls inside this treatment's interval.
    pub fn covers(&self, time: Timestamp) -> bool {
        self.has_duration() && time >= self.mills && time < self.end_mills()
    }

    /// Temp basal rate change?
    pub fn is_temp_basal(&self) -> bool {
        self.event_type == event_types::TEMP_BASAL
    }

    /// Profile switch?
    pub fn is_profile_switch(&self) -> bool {
        self.event_type == event_types::PROFILE_SWITCH
    }

    /// Combo bolus?
    pub fn is_combo_bolus(&self) -> bool {
        self.event_type == event_types::COMBO_BOLUS
    }

    /// Temporary target?
    pub fn is_temp_target(&self) -> bool {
        self.event_type == event_types::TEMP_TARGET
    }

    /// Normalize a temporary target's units to mg/dL.
    ///
    /// An uploaded target declares mmol either explicitly (`units: mmol`)
    /// or implicitly: a target below 20 could not represent a realistic
    /// mg/dL value, so it is assumed to be mmol. Both target fields are
    /// converted by the molar-mass factor and the unit tag is normalized.
    /// Idempotent: converted targets land well above 20 with a mg/dL tag.
    ///
    /// KNOWN HEURISTIC: the `< 20` check can misclassify a deliberately
    /// extreme mg/dL target. Behavior is frozen pending explicit product
    /// sign-off; both branches are covered by tests.
    pub fn normalize_temp_target(&mut self) {
        if !self.is_temp_target() {
            return;
        }
        let (Some(top), Some(bottom)) = (self.target_top, self.target_bottom) else {
            return;
        };

        let tagged_mmol = self.units == Some(Units::Mmol);
        if tagged_mmol || top < 20.0 || bottom < 20.0 {
            self.target_top = Some(top * MMOL_TO_MGDL);
            self.target_bottom = Some(bottom * MMOL_TO_MGDL);
            self.units = Some(Units::MgDl);
        }
    }
}

impl Timestamped for Treatment {
    fn mills(&self) -> Timestamp {
        self.mills
    }
}
