//! CGM error code notifications
//!
//! Readings below 17 mg/dL are not glucose: they are sensor status codes
//! smuggled through the value channel. This plugin decodes the current
//! one and raises a notification at the severity configured for it -
//! urgent by default for the codes that mean the sensor has lost the
//! plot, informational for the transient ones.

use log::debug;

use crate::alarms::{Level, Notify};
use crate::errors::PluginResult;
use crate::pipeline::Plugin;
use crate::sandbox::Sandbox;

/// Values at or above this are glucose, not codes.
const MAX_CODE: f64 = 17.0;

/// Sensor status label for a code.
pub fn code_label(code: u8) -> Option<&'static str> {
    match code {
        1 => Some("?SN: Sensor not active"),
        2 => Some("?MD: Minimal deviation"),
        3 => Some("?NA: No antenna"),
        5 => Some("?NC: Sensor not calibrated"),
        6 => Some("?CD: Counts deviation"),
        9 => Some("?AD: Absolute deviation"),
        10 => Some("???: Power deviation"),
        12 => Some("?RF: Bad RF"),
        _ => None,
    }
}

fn default_level(code: u8) -> Level {
    match code {
        // The sensor itself has gone unreliable
        9 | 10 => Level::Urgent,
        _ => Level::Info,
    }
}

fn configured_level(sbx: &Sandbox, code: u8) -> Level {
    let Some(extended) = sbx.settings.extended_for("errorcodes") else {
        return default_level(code);
    };

    let listed = |key: &str| -> bool {
        extended
            .get(key)
            .and_then(|v| v.as_array())
            .map(|codes| codes.iter().any(|c| c.as_u64() == Some(code as u64)))
            .unwrap_or(false)
    };

    if listed("urgent") {
        Level::Urgent
    } else if listed("warn") {
        Level::Warn
    } else if listed("info") {
        Level::Info
    } else {
        default_level(code)
    }
}

/// Raises notifications for sensor status codes
#[derive(Debug, Default)]
pub struct ErrorCodesPlugin;

impl Plugin for ErrorCodesPlugin {
    fn name(&self) -> &'static str {
        "errorcodes"
    }

    fn check_notifications(&self, sbx: &mut Sandbox) -> PluginResult<()> {
        let Some(entry) = sbx.last_sgv() else {
            return Ok(());
        };
        if entry.mgdl >= MAX_CODE || !sbx.is_current(entry.mills) {
            return Ok(());
        }

        let code = entry.mgdl as u8;
        let Some(label) = code_label(code) else {
            debug!("unrecognized sensor code {}", code);
            return Ok(());
        };

        let level = configured_level(sbx, code);
        sbx.request_notify(Notify::new(
            level,
            label,
            format!("CGM error code {}", code),
            "errorcodes",
        ));
        Ok(())
    }
}
