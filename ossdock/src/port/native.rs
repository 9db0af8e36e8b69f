//! Serial ports of the host, through the `serialport` crate.

use {
    crate::{
        error::{Error, Result},
        port::{Port, PortEnumerator, PortInfo, SerialConfig},
    },
    log::trace,
    serialport::{ClearBuffer, SerialPort, SerialPortType},
    std::{
        io::{self, Read, Write},
        time::Duration,
    },
};

/// An OS serial port opened at 8N1 without flow control.
pub struct NativePort {
    handle: Option<Box<dyn SerialPort>>,
    name: String,
    timeout: Duration,
}

impl NativePort {
    /// Open the port named in `config`.
    ///
    /// Any failure is reported as [`Error::Connection`] naming the port.
    pub fn open(config: &SerialConfig) -> Result<Self> {
        trace!(
            "Opening {} at {} baud (timeout {:?})",
            config.port_name, config.baud_rate, config.timeout
        );
        let handle = serialport::new(&config.port_name, config.baud_rate)
            .timeout(config.timeout)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .open()
            .map_err(|e| Error::Connection(format!("{}: {e}", config.port_name)))?;

        Ok(Self {
            handle: Some(handle),
            name: config
                .port_name
                .clone(),
            timeout: config.timeout,
        })
    }

    /// The open OS handle, or `NotConnected` once closed.
    fn handle(&mut self) -> io::Result<&mut Box<dyn SerialPort>> {
        self.handle
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "port is closed"))
    }
}

impl Port for NativePort {
    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        if let Some(handle) = self.handle.as_mut() {
            handle.set_timeout(timeout)?;
        }
        self.timeout = timeout;
        Ok(())
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn bytes_available(&mut self) -> Result<usize> {
        let waiting = self
            .handle()?
            .bytes_to_read()?;
        Ok(usize::try_from(waiting).unwrap_or(usize::MAX))
    }

    fn clear_buffers(&mut self) -> Result<()> {
        if let Some(handle) = self.handle.as_mut() {
            handle.clear(ClearBuffer::All)?;
        }
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn close(&mut self) -> Result<()> {
        if self
            .handle
            .take()
            .is_some()
        {
            trace!("Closed {}", self.name);
        }
        Ok(())
    }
}

impl Read for NativePort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.handle()?
            .read(buf)
    }
}

impl Write for NativePort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.handle()?
            .write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.handle()?
            .flush()
    }
}

/// Lists the serial ports of this host.
pub struct NativePortEnumerator;

impl PortEnumerator for NativePortEnumerator {
    fn list_ports() -> Result<Vec<PortInfo>> {
        let ports = serialport::available_ports()?;
        Ok(ports
            .into_iter()
            .map(|p| PortInfo {
                product: match p.port_type {
                    SerialPortType::UsbPort(usb) => usb.product,
                    _ => None,
                },
                name: p.port_name,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_ports_does_not_panic() {
        // Enumeration may legitimately fail without udev; it must not panic
        let _ = NativePortEnumerator::list_ports();
    }

    #[test]
    fn test_serial_config_default() {
        let config = SerialConfig::default();
        assert_eq!(config.baud_rate, 921600);
        assert_eq!(config.timeout, Duration::from_secs(10));
        assert!(config.port_name.is_empty());
    }

    #[test]
    fn test_serial_config_builder() {
        let config = SerialConfig::new("/dev/ttyACM0", 115200).with_timeout(Duration::from_secs(2));
        let other = config.for_port("COM4");
        assert_eq!(other.port_name, "COM4");
        assert_eq!(other.baud_rate, 115200);
        assert_eq!(other.timeout, Duration::from_secs(2));
    }

    #[test]
    fn test_open_missing_port_is_connection_error() {
        let config = SerialConfig::new("/dev/ossdock-does-not-exist", 921600);
        match NativePort::open(&config) {
            Err(Error::Connection(msg)) => assert!(msg.contains("ossdock-does-not-exist")),
            Err(other) => panic!("expected connection error, got {other}"),
            Ok(_) => panic!("opening a missing port must fail"),
        }
    }
}
