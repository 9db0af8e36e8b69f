//! Line protocol spoken by Open Spectral Sensing devices.
//!
//! ## Wire Format
//!
//! ```text
//! request   <opcode>[_<param>]\n            e.g. 08_Lab1
//! response  <line>\r\n ... OK|..ERR..\r\n    terminal line last
//! handshake DATA, name, interval, status, counter, OK
//! bulk      DATA, <byte count>, <raw bytes ...>OK
//! ```

pub mod command;
pub mod datapoint;
pub mod response;
pub mod settings;

use std::time::Duration;

pub use command::{Command, Opcode, ParamStyle};
pub use datapoint::Datapoint;
pub use response::{Response, is_terminal_line};
pub use settings::{
    MAX_FRAME_AVG, MAX_INTEGRATION_TIME_MS, NspSettings, normalize_device_name,
    validate_calibration_factor, validate_logging_interval,
};

/// Default device baud rate.
pub const BAUD_RATE: u32 = 921_600;

/// Serial read timeout; a few seconds longer than the device sleep period.
pub const SERIAL_TIMEOUT: Duration = Duration::from_secs(10);

/// Delay after each written command before the device starts answering.
pub const SETTLE_DELAY: Duration = Duration::from_millis(100);

/// First line of a structured or bulk response.
pub const DATA_HEADER: &str = "DATA";

/// Trailing bytes of a bulk byte stream.
pub const TERMINAL_MARKER: &[u8; 2] = b"OK";

/// Size reported by the device when a sync request cannot be satisfied.
pub const SYNC_MISMATCH_SIZE: i64 = -1;

/// Lowest wavelength bin in a datapoint row (nm).
pub const MIN_WAVELENGTH_NM: u32 = 340;

/// Highest wavelength bin in a datapoint row (nm, inclusive).
pub const MAX_WAVELENGTH_NM: u32 = 1010;

/// Distance between wavelength bins (nm).
pub const WAVELENGTH_STEP_NM: u32 = 5;

/// Shortest logging interval the device accepts (ms).
pub const MIN_LOGGING_INTERVAL_MS: u32 = 10_000;

/// Longest device name the firmware stores.
pub const MAX_DEVICE_NAME_LEN: usize = 12;

/// Above this many stored datapoints, reading the SD card directly is faster
/// than a serial export.
pub const MAX_TRANSFER_DATAPOINTS: u64 = 100;

/// Wavelength of every bin, in row order.
pub fn wavelengths() -> impl Iterator<Item = u32> {
    (MIN_WAVELENGTH_NM..=MAX_WAVELENGTH_NM).step_by(WAVELENGTH_STEP_NM as usize)
}

/// Number of spectrum values in one datapoint row.
pub fn wavelength_bin_count() -> usize {
    ((MAX_WAVELENGTH_NM - MIN_WAVELENGTH_NM) / WAVELENGTH_STEP_NM + 1) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wavelength_bins() {
        assert_eq!(wavelength_bin_count(), 135);
        let bins: Vec<u32> = wavelengths().collect();
        assert_eq!(bins.len(), wavelength_bin_count());
        assert_eq!(bins.first(), Some(&340));
        assert_eq!(bins.last(), Some(&1010));
    }
}
