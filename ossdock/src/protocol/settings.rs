//! Limits the device enforces on its settings.

use crate::{
    error::{Error, Result},
    protocol::{MAX_DEVICE_NAME_LEN, MIN_LOGGING_INTERVAL_MS},
};

/// Largest frame average the sensor accepts.
pub const MAX_FRAME_AVG: u8 = 10;

/// Longest integration time the sensor accepts (ms).
pub const MAX_INTEGRATION_TIME_MS: u16 = 1000;

/// Width of the packed sensor settings parameter.
pub(crate) const NSP_SETTINGS_DIGITS: usize = 8;

/// Spectral sensor acquisition settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NspSettings {
    /// Let the sensor pick the integration time.
    pub auto_exposure: bool,
    /// Frames averaged per reading (1..=10).
    pub frame_avg: u8,
    /// Integration time in ms (1..=1000), used when auto-exposure is off.
    pub integration_time_ms: u16,
}

impl NspSettings {
    /// Check the ranges the sensor accepts.
    pub fn validate(&self) -> Result<()> {
        if !(1..=MAX_FRAME_AVG).contains(&self.frame_avg) {
            return Err(Error::InvalidArgument(format!(
                "frame average must be 1..={MAX_FRAME_AVG}, got {}",
                self.frame_avg
            )));
        }
        if !(1..=MAX_INTEGRATION_TIME_MS).contains(&self.integration_time_ms) {
            return Err(Error::InvalidArgument(format!(
                "integration time must be 1..={MAX_INTEGRATION_TIME_MS} ms, got {}",
                self.integration_time_ms
            )));
        }
        Ok(())
    }

    /// Fixed-width parameter: flag, 3-digit frame average, 4-digit time.
    pub fn encode(&self) -> String {
        format!(
            "{}{:03}{:04}",
            u8::from(self.auto_exposure),
            self.frame_avg,
            self.integration_time_ms
        )
    }

    /// Read back a parameter produced by [`NspSettings::encode`] and check it.
    pub fn parse(param: &str) -> Result<Self> {
        if param.len() != NSP_SETTINGS_DIGITS || !param.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Error::InvalidArgument(format!(
                "sensor settings must be {NSP_SETTINGS_DIGITS} digits, got {param:?}"
            )));
        }
        let auto_exposure = match &param[..1] {
            "0" => false,
            "1" => true,
            flag => {
                return Err(Error::InvalidArgument(format!(
                    "auto-exposure flag must be 0 or 1, got {flag}"
                )));
            },
        };
        let settings = Self {
            auto_exposure,
            frame_avg: u8::try_from(digits_value(&param[1..4])).unwrap_or(u8::MAX),
            integration_time_ms: u16::try_from(digits_value(&param[4..])).unwrap_or(u16::MAX),
        };
        settings.validate()?;
        Ok(settings)
    }
}

fn digits_value(digits: &str) -> u32 {
    digits
        .bytes()
        .fold(0, |acc, b| acc * 10 + u32::from(b - b'0'))
}

/// Trim a device name and check it fits the firmware's limits.
///
/// Spaces become `_`.
pub fn normalize_device_name(name: &str) -> Result<String> {
    let name = name.trim();
    if name.len() > MAX_DEVICE_NAME_LEN {
        return Err(Error::InvalidArgument(format!(
            "device name must be at most {MAX_DEVICE_NAME_LEN} characters, got {}",
            name.chars().count()
        )));
    }
    if let Some(bad) = name
        .chars()
        .find(|c| !(c.is_ascii_graphic() || *c == ' '))
    {
        return Err(Error::InvalidArgument(format!(
            "device name contains unsupported character {bad:?}"
        )));
    }
    Ok(name.replace(' ', "_"))
}

/// Check a logging interval before it is sent.
pub fn validate_logging_interval(interval_ms: u32) -> Result<()> {
    if interval_ms < MIN_LOGGING_INTERVAL_MS {
        return Err(Error::InvalidArgument(format!(
            "logging interval must be at least {MIN_LOGGING_INTERVAL_MS} ms, got {interval_ms}"
        )));
    }
    Ok(())
}

/// Check a calibration factor before it is sent.
pub fn validate_calibration_factor(factor: f64) -> Result<()> {
    if !factor.is_finite() {
        return Err(Error::InvalidArgument(format!(
            "calibration factor must be a finite number, got {factor}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_name_validation() {
        assert_eq!(normalize_device_name("  Lab 1  ").unwrap(), "Lab_1");
        assert_eq!(normalize_device_name("TwelveChars!").unwrap(), "TwelveChars!");
        assert!(normalize_device_name("ThirteenChars").is_err());
        assert!(normalize_device_name("Lab\t1").is_err());
        assert!(normalize_device_name("Läb").is_err());
    }

    #[test]
    fn test_argument_ranges() {
        assert!(validate_logging_interval(9_999).is_err());
        assert!(validate_logging_interval(10_000).is_ok());
        assert!(validate_calibration_factor(f64::NAN).is_err());
        assert!(validate_calibration_factor(f64::INFINITY).is_err());
        assert!(validate_calibration_factor(-0.5).is_ok());

        let mut settings = NspSettings {
            auto_exposure: false,
            frame_avg: 0,
            integration_time_ms: 100,
        };
        assert!(settings.validate().is_err());
        settings.frame_avg = 10;
        assert!(settings.validate().is_ok());
        assert_eq!(settings.encode(), "00100100");
        settings.integration_time_ms = 1001;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_nsp_settings_parse() {
        let settings = NspSettings::parse("10030500").unwrap();
        assert_eq!(
            settings,
            NspSettings {
                auto_exposure: true,
                frame_avg: 3,
                integration_time_ms: 500,
            }
        );
        assert_eq!(settings.encode(), "10030500");

        for bad in ["1003050", "100305000", "2003050a", "20030500", "10000500", "10110500", "10030000", "10031001"] {
            assert!(
                matches!(NspSettings::parse(bad), Err(Error::InvalidArgument(_))),
                "{bad}"
            );
        }
    }
}
