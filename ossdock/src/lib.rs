//! # ossdock
//!
//! A library for docking Open Spectral Sensing data loggers over serial.
//!
//! This crate provides the host side of the device's line protocol:
//!
//! - Concurrent discovery of devices on every visible serial port
//! - Request/response commands with a fixed opcode table
//! - Device sessions that track status and staleness
//! - Bulk export and incremental sync of the stored datapoints
//!
//! ## Features
//!
//! - `native` (default): Native serial port support via the `serialport` crate
//! - `serde`: Serialization support for descriptors and datapoints
//!
//! ## Example
//!
//! ```rust,no_run
//! use ossdock::{DeviceSession, LinkConfig, ScanConfig, TransferConfig, discovery, transfer};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ScanConfig::default();
//!     let devices = discovery::scan(&config)?;
//!     let Some(device) = devices.into_iter().next() else {
//!         return Ok(());
//!     };
//!
//!     let mut session = DeviceSession::connect(device, &config.serial, LinkConfig::default())?;
//!     println!("{}", session.descriptor());
//!
//!     let mut file = std::fs::File::create("export.csv")?;
//!     let bytes = transfer::start_export(&mut session, &mut file, TransferConfig::default())?
//!         .run(|received, expected, percent| {
//!             println!("{received}/{expected} ({percent}%)");
//!         })?;
//!     println!("Exported {bytes} bytes");
//!
//!     session.disconnect()?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::sync::{Arc, OnceLock};

pub mod device;
pub mod discovery;
pub mod error;
pub mod port;
pub mod protocol;
pub mod session;
pub mod transfer;
pub mod transport;

static INTERRUPT_CHECKER: OnceLock<Arc<dyn Fn() -> bool + Send + Sync>> = OnceLock::new();

/// Register a global interruption checker used by long-running library loops.
///
/// The checker should return `true` when the current operation should stop
/// (for example after receiving Ctrl-C in CLI applications). Discovery
/// stops waiting for ports and a running transfer aborts.
pub fn set_interrupt_checker<F>(checker: F)
where
    F: Fn() -> bool + Send + Sync + 'static,
{
    let _ = INTERRUPT_CHECKER.set(Arc::new(checker));
}

/// Returns whether interruption was requested by the embedding application.
#[must_use]
pub fn is_interrupted_requested() -> bool {
    INTERRUPT_CHECKER
        .get()
        .is_some_and(|checker| checker())
}

#[cfg(test)]
pub(crate) fn test_set_interrupted(value: bool) {
    use std::sync::atomic::{AtomicBool, Ordering};

    static TEST_INTERRUPT_FLAG: OnceLock<Arc<AtomicBool>> = OnceLock::new();

    let flag = TEST_INTERRUPT_FLAG
        .get_or_init(|| {
            let shared = Arc::new(AtomicBool::new(false));
            let checker = Arc::clone(&shared);
            set_interrupt_checker(move || checker.load(Ordering::Relaxed));
            shared
        })
        .clone();

    flag.store(value, Ordering::Relaxed);
}

// Re-exports for convenience
#[cfg(feature = "native")]
pub use port::{NativePort, NativePortEnumerator};
pub use {
    device::{DeviceDescriptor, RecordingStatus},
    discovery::{ScanConfig, scan_with},
    error::{Error, Result},
    port::{Port, PortEnumerator, PortInfo, SerialConfig},
    protocol::{Command, Datapoint, NspSettings, Opcode, Response},
    session::{Capture, ClockSync, DeviceSession},
    transfer::{Transfer, TransferConfig, TransferEvent, TransferKind, start_export, start_sync},
    transport::{LinkConfig, Transport},
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interrupt_checker_default_false() {
        test_set_interrupted(false);
        assert!(!is_interrupted_requested());
    }

    #[test]
    fn test_interrupt_checker_toggle_true_false() {
        test_set_interrupted(true);
        assert!(is_interrupted_requested());

        test_set_interrupted(false);
        assert!(!is_interrupted_requested());
    }
}
