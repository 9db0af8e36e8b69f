//! Device descriptors built from the handshake answer.
//!
//! The handshake (and the status refresh, which reuses it) answers with:
//!
//! ```text
//! DATA
//! <device name>
//! <logging interval ms>
//! <status: 0 paused, 1 recording>
//! <stored datapoint count>
//! OK
//! ```

use std::fmt;

use crate::error::{Error, Result};
use crate::protocol::{DATA_HEADER, MAX_DEVICE_NAME_LEN};

/// Lines in a handshake answer, header and closing `OK` included.
pub const HANDSHAKE_LINES: usize = 6;

/// Whether the device is logging on its schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "UPPERCASE"))]
pub enum RecordingStatus {
    /// Logging datapoints at the configured interval.
    Recording,
    /// Idle.
    Paused,
}

impl RecordingStatus {
    /// Parse the status flag (`0`/`1`).
    pub fn from_flag(flag: &str) -> Result<Self> {
        match flag.trim() {
            "1" => Ok(Self::Recording),
            "0" => Ok(Self::Paused),
            other => Err(Error::Protocol(format!(
                "status flag must be 0 or 1, got {other:?}"
            ))),
        }
    }

    /// Get a human-readable label.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Recording => "RECORDING",
            Self::Paused => "PAUSED",
        }
    }

    /// Check whether the device is recording.
    pub fn is_recording(self) -> bool {
        matches!(self, Self::Recording)
    }
}

impl fmt::Display for RecordingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A discovered device and its last known status.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct DeviceDescriptor {
    /// Serial port the device answered on.
    pub port: String,
    /// Device name (at most 12 characters, no spaces).
    pub name: String,
    /// Logging interval in milliseconds.
    pub logging_interval_ms: u32,
    /// Datapoints stored on the device.
    pub data_counter: u64,
    /// Recording state.
    pub status: RecordingStatus,
}

impl DeviceDescriptor {
    /// Build a descriptor from the handshake lines received on `port`.
    ///
    /// Fields are taken by position, so a name such as `Ok` or `Jerry` is
    /// just a name.
    pub fn from_handshake<S: AsRef<str>>(port: impl Into<String>, lines: &[S]) -> Result<Self> {
        let header = lines
            .first()
            .map(<S as AsRef<str>>::as_ref)
            .unwrap_or_default();
        if !header.eq_ignore_ascii_case(DATA_HEADER) {
            return Err(Error::Protocol(format!(
                "expected {DATA_HEADER} header, got {header:?}"
            )));
        }
        let [_, name, interval, status, counter, closing] = lines else {
            return Err(Error::Protocol(format!(
                "handshake has {} lines, expected {HANDSHAKE_LINES}",
                lines.len()
            )));
        };
        let (name, interval, status, counter, closing) = (
            name.as_ref(),
            interval.as_ref(),
            status.as_ref(),
            counter.as_ref(),
            closing.as_ref(),
        );
        if !closing.eq_ignore_ascii_case("ok") {
            return Err(Error::Protocol(format!("handshake ended with {closing:?}")));
        }

        if name.chars().count() > MAX_DEVICE_NAME_LEN {
            return Err(Error::Protocol(format!("device name too long: {name:?}")));
        }
        let logging_interval_ms = interval
            .parse()
            .map_err(|_| Error::Protocol(format!("invalid logging interval: {interval:?}")))?;
        let data_counter = counter
            .parse()
            .map_err(|_| Error::Protocol(format!("invalid datapoint counter: {counter:?}")))?;

        Ok(Self {
            port: port.into(),
            name: name.to_string(),
            logging_interval_ms,
            data_counter,
            status: RecordingStatus::from_flag(status)?,
        })
    }

    /// Logging interval in whole seconds.
    pub fn logging_interval_secs(&self) -> u32 {
        self.logging_interval_ms / 1000
    }
}

impl fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} on {}: {}, every {} s, {} datapoints",
            self.name,
            self.port,
            self.status,
            self.logging_interval_secs(),
            self.data_counter
        )
    }
}
