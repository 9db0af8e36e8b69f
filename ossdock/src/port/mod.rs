//! Port abstraction for serial communication.
//!
//! The protocol layers (transport, session, transfer) only see the [`Port`]
//! trait, so they can be driven by a real serial port or by a scripted port
//! in tests.
//!
//! ```text
//! +----------------------------+
//! | Session / Transfer / Scan  |
//! +-------------+--------------+
//!               |
//!               v
//! +-------------+--------------+
//! |  Transport (line framing)  |
//! +-------------+--------------+
//!               |
//!               v
//! +-------------+--------------+
//! |         Port trait         |
//! +-------------+--------------+
//!               |
//!               v
//! +-------------+--------------+
//! |  NativePort (serialport)   |
//! +----------------------------+
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use ossdock::port::Port;
//!
//! fn example<P: Port>(port: &mut P) -> ossdock::Result<()> {
//!     port.write_all_bytes(b"07\n")?;
//!     println!("{} bytes waiting", port.bytes_available()?);
//!     Ok(())
//! }
//! ```

#[cfg(feature = "native")]
pub mod native;

#[cfg(test)]
pub(crate) mod mock;

use std::io::{Read, Write};
use std::time::Duration;

use crate::error::Result;
use crate::protocol::{BAUD_RATE, SERIAL_TIMEOUT};

/// Serial port configuration.
///
/// Framing is always 8 data bits, no parity, one stop bit and no flow
/// control; the logger firmware offers nothing else.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Port name/path (e.g., "/dev/ttyACM0", "COM3").
    pub port_name: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Read/write timeout.
    pub timeout: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: BAUD_RATE,
            timeout: SERIAL_TIMEOUT,
        }
    }
}

impl SerialConfig {
    /// Create a new configuration with port name and baud rate.
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            ..Default::default()
        }
    }

    /// Set the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Same settings, different port.
    #[must_use]
    pub fn for_port(&self, port_name: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            ..self.clone()
        }
    }
}

/// A serial port visible on this host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    /// Port name/path.
    pub name: String,
    /// USB product string, when the OS reports one.
    pub product: Option<String>,
}

impl PortInfo {
    /// A port known only by its name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            product: None,
        }
    }
}

/// Unified port trait for serial communication.
///
/// Reads honour the configured timeout and report it as
/// [`std::io::ErrorKind::TimedOut`].
pub trait Port: Read + Write + Send {
    /// Set the read/write timeout.
    fn set_timeout(&mut self, timeout: Duration) -> Result<()>;

    /// Get the current timeout.
    fn timeout(&self) -> Duration;

    /// Number of bytes waiting in the OS receive buffer.
    fn bytes_available(&mut self) -> Result<usize>;

    /// Clear input/output buffers.
    fn clear_buffers(&mut self) -> Result<()>;

    /// Get the port name/path.
    fn name(&self) -> &str;

    /// Close the port and release resources.
    ///
    /// After calling this method, the port cannot be used for further I/O.
    fn close(&mut self) -> Result<()>;

    /// Write all bytes, blocking until complete.
    fn write_all_bytes(&mut self, buf: &[u8]) -> Result<()> {
        std::io::Write::write_all(self, buf)?;
        std::io::Write::flush(self)?;
        Ok(())
    }
}

/// Trait for listing available serial ports.
///
/// This is separated from `Port` because it's a static operation that
/// doesn't require an open port instance.
pub trait PortEnumerator {
    /// List all available serial ports.
    fn list_ports() -> Result<Vec<PortInfo>>;
}

#[cfg(feature = "native")]
pub use native::{NativePort, NativePortEnumerator};
