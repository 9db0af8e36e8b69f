//! Error types for ossdock.

use std::io;
use thiserror::Error;

/// Result type for ossdock operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for ossdock operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial port, sink writes).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// The port could not be opened or closed.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The device did not answer within the serial timeout.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Unexpected header, non-numeric size or malformed structured response.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The device reported a size of `-1` for a sync request.
    #[error("Sync mismatch: local and device data have diverged, a full export is required")]
    SyncMismatch,

    /// The device declared a bulk transfer of zero bytes.
    #[error("Device reported nothing to transfer")]
    EmptyTransfer,

    /// A bulk transfer stopped before the terminal marker arrived.
    #[error("Transfer aborted after {received} bytes: {source}")]
    TransferAborted {
        /// Payload bytes received before the failure.
        received: u64,
        /// The underlying failure.
        #[source]
        source: Box<Error>,
    },

    /// A command parameter was rejected before transmission.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// No opcode with that name or code exists.
    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    /// The embedding application requested interruption.
    #[error("Operation interrupted")]
    Interrupted,
}

impl Error {
    /// Whether the session that produced this error is still usable.
    ///
    /// Connection loss and raw I/O failures leave the link in an unknown
    /// state; everything else only aborts the current operation.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Io(_) | Self::Connection(_) => true,
            #[cfg(feature = "native")]
            Self::Serial(_) => true,
            Self::TransferAborted { source, .. } => source.is_fatal(),
            _ => false,
        }
    }
}
