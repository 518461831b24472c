//! Glucose unit handling
//!
//! All internal physiological math runs in mg/dL. mmol/L exists only as a
//! presentation conversion applied when a property is rendered for display;
//! it is never stored as the canonical unit. The conversion factor is the
//! molar mass of glucose (180.18 g/mol) divided by 10 for the dL scale.

use serde::{Deserialize, Serialize};

/// Conversion factor from mmol/L to mg/dL.
pub const MMOL_TO_MGDL: f64 = 18.018018018;

/// Glucose display unit system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Units {
    /// Milligrams per deciliter (canonical)
    #[default]
    #[serde(rename = "mg/dl")]
    MgDl,
    /// Millimoles per liter (display only)
    #[serde(rename = "mmol")]
    Mmol,
}

/// Convert a mg/dL value to mmol/L, rounded to one decimal.
pub fn mgdl_to_mmol(mgdl: f64) -> f64 {
    (mgdl / MMOL_TO_MGDL * 10.0).round() / 10.0
}

/// Scale a canonical mg/dL value into the requested display units.
///
/// mg/dL values are rounded to whole numbers, mmol/L to one decimal.
pub fn scale_mgdl(mgdl: f64, units: Units) -> f64 {
    match units {
        Units::MgDl => mgdl.round(),
        Units::Mmol => mgdl_to_mmol(mgdl),
    }
}

/// Format a scaled value the way the display layer expects.
///
/// mmol/L always shows one decimal place ("5.0", not "5").
pub fn format_scaled(mgdl: f64, units: Units) -> String {
    match units {
        Units::MgDl => format!("{}", scale_mgdl(mgdl, units) as i64),
        Units::Mmol => format!("{:.1}", scale_mgdl(mgdl, units)),
    }
}
