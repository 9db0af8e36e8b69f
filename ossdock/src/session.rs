//! Connected device sessions.
//!
//! A [`DeviceSession`] owns the only transport to one device. Every request
//! waits for its full response before the next one is sent. Commands that can
//! change what the handshake reports mark the session stale until
//! [`DeviceSession::refresh_status`] runs again.

use {
    crate::{
        device::DeviceDescriptor,
        discovery::handshake,
        error::{Error, Result},
        port::Port,
        protocol::{Command, Datapoint, NspSettings, Opcode, Response},
        transport::{LinkConfig, Transport},
    },
    chrono::{Local, NaiveDateTime},
    log::{debug, info, warn},
};

/// Clock format expected by the set-time command.
const CLOCK_FORMAT: &str = "%Y%m%d%H%M%S";

/// Outcome of the clock synchronisation done on connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClockSync {
    /// The device clock was set to this local time.
    Synced(NaiveDateTime),
    /// The device did not accept the time; the session still works.
    Failed {
        /// Why the sync failed.
        reason: String,
    },
}

impl ClockSync {
    /// Whether the device clock was set.
    pub fn is_synced(&self) -> bool {
        matches!(self, Self::Synced(_))
    }
}

/// A datapoint captured on request.
#[derive(Debug, Clone, PartialEq)]
pub struct Capture {
    /// The row exactly as the device sent it.
    pub row: String,
    /// The parsed row.
    pub datapoint: Datapoint,
}

/// An open connection to one device.
pub struct DeviceSession<P: Port> {
    transport: Transport<P>,
    descriptor: DeviceDescriptor,
    stale: bool,
    clock: ClockSync,
}

#[cfg(feature = "native")]
impl DeviceSession<crate::port::NativePort> {
    /// Open the descriptor's port and run the connect handshake.
    ///
    /// Only opening the port can fail; a rejected clock sync is recorded in
    /// [`DeviceSession::clock_sync`].
    pub fn connect(
        descriptor: DeviceDescriptor,
        serial: &crate::port::SerialConfig,
        link: LinkConfig,
    ) -> Result<Self> {
        let serial = serial.for_port(&descriptor.port);
        let transport = Transport::open(&serial, link)?;
        Ok(Self::start(transport, descriptor, Local::now().naive_local()))
    }
}

impl<P: Port> DeviceSession<P> {
    /// Take over an already opened port and run the connect handshake.
    pub fn attach(port: P, descriptor: DeviceDescriptor, link: LinkConfig) -> Self {
        let transport = Transport::with_config(port, link);
        Self::start(transport, descriptor, Local::now().naive_local())
    }

    fn start(transport: Transport<P>, descriptor: DeviceDescriptor, now: NaiveDateTime) -> Self {
        let mut session = Self {
            transport,
            descriptor,
            stale: false,
            clock: ClockSync::Failed {
                reason: "not attempted".to_string(),
            },
        };

        if let Err(e) = session.sync_clock(now) {
            warn!(
                "{}: clock sync failed, continuing with device time: {e}",
                session.port_name()
            );
        }
        match session
            .transport
            .discard_input()
        {
            Ok(0) => {},
            Ok(n) => debug!("Discarded {n} bytes after clock sync"),
            Err(e) => warn!("{}: could not drain input: {e}", session.port_name()),
        }

        info!(
            "Connected to {} on {}",
            session.descriptor.name,
            session.port_name()
        );
        session
    }

    /// Last known device status.
    pub fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    /// Whether a command may have changed the device status since the last
    /// refresh.
    pub fn is_stale(&self) -> bool {
        self.stale
    }

    /// Result of the last clock sync.
    pub fn clock_sync(&self) -> &ClockSync {
        &self.clock
    }

    /// Serial port of this session.
    pub fn port_name(&self) -> &str {
        self.transport
            .name()
    }

    pub(crate) fn transport_mut(&mut self) -> &mut Transport<P> {
        &mut self.transport
    }

    /// Send a command by name and return the raw response.
    ///
    /// The name may carry the leading `_` of internal commands. Bulk
    /// commands are refused; use [`crate::transfer`] for those.
    pub fn invoke(&mut self, name: &str, params: &[&str]) -> Result<Response> {
        let opcode = Opcode::from_name(name)?;
        let command = Command::new(opcode, params.iter().copied())?;
        self.invoke_command(&command)
    }

    /// Send a command and return the raw response, `ERR` included.
    pub fn invoke_command(&mut self, command: &Command) -> Result<Response> {
        if matches!(command.opcode(), Opcode::ExportAll | Opcode::SyncDatapoints) {
            return Err(Error::InvalidArgument(format!(
                "{} streams bulk data and needs a transfer",
                command.opcode()
            )));
        }
        self.exchange(command)
    }

    fn exchange(&mut self, command: &Command) -> Result<Response> {
        debug!("{}: sending {}", self.port_name(), command.opcode());
        self.transport
            .write_line(&command.encode())?;
        if command
            .opcode()
            .mutates_state()
        {
            self.stale = true;
        }
        self.transport
            .read_response()
    }

    /// Send a command and turn an `ERR` answer into an error.
    fn expect_ok(&mut self, command: &Command) -> Result<Response> {
        let response = self.exchange(command)?;
        if response.is_err() {
            return Err(Error::Protocol(format!(
                "device rejected {}: {}",
                command.opcode(),
                response
                    .terminal()
                    .unwrap_or_default()
            )));
        }
        Ok(response)
    }

    /// Query the device status and replace the descriptor.
    ///
    /// On failure the previous descriptor is kept and the session stays
    /// stale if it was.
    pub fn refresh_status(&mut self) -> Result<&DeviceDescriptor> {
        match handshake(&mut self.transport) {
            Ok(descriptor) => {
                debug!("{}: status {descriptor}", self.port_name());
                self.descriptor = descriptor;
                self.stale = false;
                Ok(&self.descriptor)
            },
            Err(e) => {
                warn!("{}: status refresh failed: {e}", self.port_name());
                if !e.is_fatal() {
                    let _ = self
                        .transport
                        .discard_input();
                }
                Err(e)
            },
        }
    }

    /// Set the device clock.
    pub fn sync_clock(&mut self, at: NaiveDateTime) -> Result<()> {
        let command = Command::new(
            Opcode::SetDatetime,
            [at.format(CLOCK_FORMAT)
                .to_string()],
        )?;
        match self.expect_ok(&command) {
            Ok(_) => {
                debug!("{}: clock set to {at}", self.port_name());
                self.clock = ClockSync::Synced(at);
                Ok(())
            },
            Err(e) => {
                self.clock = ClockSync::Failed {
                    reason: e.to_string(),
                };
                Err(e)
            },
        }
    }

    /// Rename the device; see [`normalize_device_name`].
    ///
    /// [`normalize_device_name`]: crate::protocol::normalize_device_name
    pub fn set_device_name(&mut self, name: &str) -> Result<Response> {
        self.expect_ok(&Command::new(Opcode::SetDeviceName, [name])?)
    }

    /// Change the logging interval.
    pub fn set_logging_interval(&mut self, interval_ms: u32) -> Result<Response> {
        self.expect_ok(&Command::new(
            Opcode::SetCollectionInterval,
            [interval_ms.to_string()],
        )?)
    }

    /// Change the calibration factor applied by the device.
    pub fn set_calibration_factor(&mut self, factor: f64) -> Result<Response> {
        self.expect_ok(&Command::new(
            Opcode::SetCalibrationFactor,
            [factor.to_string()],
        )?)
    }

    /// Change the spectral sensor acquisition settings.
    pub fn configure_sensor(&mut self, settings: &NspSettings) -> Result<Response> {
        settings.validate()?;
        self.expect_ok(&Command::new(Opcode::NspSettings, [settings.encode()])?)
    }

    /// Start scheduled logging.
    pub fn start_recording(&mut self) -> Result<Response> {
        self.expect_ok(&Command::bare(Opcode::StartRecording)?)
    }

    /// Stop scheduled logging.
    pub fn stop_recording(&mut self) -> Result<Response> {
        self.expect_ok(&Command::bare(Opcode::StopRecording)?)
    }

    /// Flip between recording and paused.
    pub fn toggle_recording(&mut self) -> Result<Response> {
        self.expect_ok(&Command::bare(Opcode::ToggleDataCapture)?)
    }

    /// Delete every stored datapoint.
    pub fn erase_storage(&mut self) -> Result<Response> {
        self.expect_ok(&Command::bare(Opcode::EraseStorage)?)
    }

    /// Restore the device defaults.
    pub fn reset_device(&mut self) -> Result<Response> {
        self.expect_ok(&Command::bare(Opcode::ResetDevice)?)
    }

    /// Firmware and storage information, one item per line.
    pub fn get_info(&mut self) -> Result<Response> {
        self.expect_ok(&Command::bare(Opcode::GetInfo)?)
    }

    /// Take a reading now. The row is the second line of the answer.
    pub fn manual_capture(&mut self) -> Result<Capture> {
        let response = self.expect_ok(&Command::bare(Opcode::ManualCapture)?)?;
        let row = response
            .line(1)
            .filter(|_| response.lines().len() > 2)
            .ok_or_else(|| Error::Protocol("capture response has no datapoint row".to_string()))?;
        let datapoint = Datapoint::parse(row)?;
        Ok(Capture {
            row: row.to_string(),
            datapoint,
        })
    }

    /// Close the port. The descriptor is handed back for display.
    pub fn disconnect(mut self) -> Result<DeviceDescriptor> {
        self.transport
            .close()?;
        info!("Disconnected from {}", self.descriptor.port);
        Ok(self.descriptor)
    }
}
