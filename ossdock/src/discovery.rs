//! Concurrent device discovery.
//!
//! A device cannot be recognised from USB metadata alone, so every visible
//! port is opened and asked for the handshake. Probes run on one thread per
//! port and report back over a channel; the scan returns once every probe
//! has finished, which bounds it by a single read timeout.

use {
    crate::{
        device::{DeviceDescriptor, HANDSHAKE_LINES},
        error::{Error, Result},
        port::{Port, PortInfo, SerialConfig},
        protocol::{Command, DATA_HEADER, Opcode},
        transport::{LinkConfig, Transport},
    },
    log::{debug, info},
    std::{sync::mpsc, thread, time::Duration},
};

/// Delay between port enumerations while no port is visible.
pub const PORT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Discovery settings.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Serial settings applied to every probed port.
    pub serial: SerialConfig,
    /// Link settings for the probe exchange.
    pub link: LinkConfig,
    /// Delay between enumerations while no port is visible.
    pub poll_interval: Duration,
    /// Keep polling while no port is visible instead of returning empty.
    pub wait_for_ports: bool,
    /// Polled while waiting for ports.
    pub interrupted: fn() -> bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            serial: SerialConfig::default(),
            link: LinkConfig::default(),
            poll_interval: PORT_POLL_INTERVAL,
            wait_for_ports: true,
            interrupted: crate::is_interrupted_requested,
        }
    }
}

impl ScanConfig {
    /// Use these serial settings for every probe.
    #[must_use]
    pub fn with_serial(mut self, serial: SerialConfig) -> Self {
        self.serial = serial;
        self
    }

    /// Use these link settings for every probe.
    #[must_use]
    pub fn with_link(mut self, link: LinkConfig) -> Self {
        self.link = link;
        self
    }

    /// Return immediately when no port is visible.
    #[must_use]
    pub fn no_wait(mut self) -> Self {
        self.wait_for_ports = false;
        self
    }
}

/// Ask the device on `transport` for its status.
///
/// Used both to recognise devices and to refresh a connected session.
pub fn handshake<P: Port>(transport: &mut Transport<P>) -> Result<DeviceDescriptor> {
    transport.write_line(&Command::bare(Opcode::SayHello)?.encode())?;
    // The fields are positional and a name may read like a terminal line
    let mut lines = transport.read_lines(1)?;
    if lines[0].eq_ignore_ascii_case(DATA_HEADER) {
        lines.extend(transport.read_lines(HANDSHAKE_LINES - 1)?);
    }
    DeviceDescriptor::from_handshake(transport.name(), &lines)
}

/// Run the handshake on a freshly opened port, then close it.
pub fn probe<P: Port>(port: P, link: &LinkConfig) -> Result<DeviceDescriptor> {
    let mut transport = Transport::with_config(port, link.clone());
    transport.discard_input()?;
    let outcome = handshake(&mut transport);
    let _ = transport.close();
    outcome
}

/// Probe every port reported by `list`, opening each one with `open`.
///
/// Ports that fail to open or do not answer the handshake are left out.
/// The result is sorted by port name.
pub fn scan_with<L, O, P>(config: &ScanConfig, mut list: L, open: O) -> Result<Vec<DeviceDescriptor>>
where
    L: FnMut() -> Result<Vec<PortInfo>>,
    O: Fn(&SerialConfig) -> Result<P> + Sync,
    P: Port,
{
    let ports = wait_for_ports(config, &mut list)?;
    info!("Probing {} serial port(s)", ports.len());

    let (tx, rx) = mpsc::channel();
    thread::scope(|s| {
        for port in &ports {
            debug!(
                "Probing {} ({})",
                port.name,
                port.product
                    .as_deref()
                    .unwrap_or("unknown product")
            );
            let tx = tx.clone();
            let open = &open;
            let link = &config.link;
            let serial = config
                .serial
                .for_port(&port.name);
            s.spawn(move || {
                let outcome = open(&serial).and_then(|p| probe(p, link));
                let _ = tx.send((serial.port_name, outcome));
            });
        }
    });
    drop(tx);

    let mut found = Vec::new();
    for (name, outcome) in rx {
        match outcome {
            Ok(desc) => {
                debug!("{name}: found {}", desc.name);
                found.push(desc);
            },
            Err(e) => debug!("{name}: no device ({e})"),
        }
    }
    found.sort_by(|a, b| {
        a.port
            .cmp(&b.port)
    });

    info!("Found {} device(s)", found.len());
    Ok(found)
}

fn wait_for_ports<L>(config: &ScanConfig, list: &mut L) -> Result<Vec<PortInfo>>
where
    L: FnMut() -> Result<Vec<PortInfo>>,
{
    loop {
        let ports = list()?;
        if !ports.is_empty() || !config.wait_for_ports {
            return Ok(ports);
        }
        if (config.interrupted)() {
            return Err(Error::Interrupted);
        }
        debug!(
            "No serial ports visible, retrying in {:?}",
            config.poll_interval
        );
        thread::sleep(config.poll_interval);
    }
}

/// Probe every serial port of this host.
#[cfg(feature = "native")]
pub fn scan(config: &ScanConfig) -> Result<Vec<DeviceDescriptor>> {
    use crate::port::{NativePort, NativePortEnumerator, PortEnumerator};

    scan_with(config, NativePortEnumerator::list_ports, NativePort::open)
}
