//! Instrument identification and compatibility checks.

use crate::error::{Result, SwitchError};
use std::cmp::Ordering;

pub const EXPECTED_MODEL: &str = "QSwitch";
pub const LEAST_COMPATIBLE_FIRMWARE: &str = "0.1.0";

/// Parsed `*IDN?` response: `vendor,model,serial,firmware`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub vendor: String,
    pub model: String,
    pub serial: String,
    pub firmware: String,
}

impl Identity {
    pub fn parse(response: &str) -> Result<Self> {
        let fields: Vec<&str> = response.split(',').map(str::trim).collect();
        match fields.as_slice() {
            [vendor, model, serial, firmware] => Ok(Self {
                vendor: vendor.to_string(),
                model: model.to_string(),
                serial: serial.to_string(),
                firmware: firmware.to_string(),
            }),
            _ => Err(SwitchError::BadIdentification(response.to_string())),
        }
    }

    pub fn check_model(&self) -> Result<()> {
        if self.model != EXPECTED_MODEL {
            return Err(SwitchError::WrongModel(self.model.clone()));
        }
        Ok(())
    }

    pub fn check_firmware(&self) -> Result<()> {
        let incompatible = || SwitchError::IncompatibleFirmware {
            found: self.firmware.clone(),
            required: LEAST_COMPATIBLE_FIRMWARE.to_string(),
        };
        let found = parse_version(&self.firmware).ok_or_else(incompatible)?;
        let required = parse_version(LEAST_COMPATIBLE_FIRMWARE).ok_or_else(incompatible)?;
        if compare_versions(&found, &required) == Ordering::Less {
            return Err(incompatible());
        }
        Ok(())
    }
}

/// Dotted numeric version, e.g. "0.1.2" => [0, 1, 2].
fn parse_version(s: &str) -> Option<Vec<u32>> {
    s.split('.').map(|part| part.parse::<u32>().ok()).collect()
}

/// Component-wise comparison; missing trailing components count as 0.
fn compare_versions(a: &[u32], b: &[u32]) -> Ordering {
    let len = a.len().max(b.len());
    (0..len)
        .map(|i| {
            let x = a.get(i).copied().unwrap_or(0);
            let y = b.get(i).copied().unwrap_or(0);
            x.cmp(&y)
        })
        .find(|o| *o != Ordering::Equal)
        .unwrap_or(Ordering::Equal)
}
