//! Device selection.
//!
//! An explicit port (flag, environment or config) is probed directly.
//! Otherwise every serial port is scanned and:
//! - a single answering device is used as-is
//! - several devices are offered in a dialoguer prompt
//! - non-interactive mode fails instead of prompting

use {
    crate::CliError,
    anyhow::{Context, Result},
    console::style,
    dialoguer::{Error as DialoguerError, Select, theme::ColorfulTheme},
    log::{debug, info},
    ossdock::{DeviceDescriptor, NativePort, ScanConfig, discovery},
    std::{cmp::Ordering, io::IsTerminal},
};

/// Options for device selection.
#[derive(Debug, Clone, Default)]
pub struct SelectOptions {
    /// Explicit port from CLI, environment or config.
    pub port: Option<String>,
    /// Non-interactive mode (fail if several devices answer).
    pub non_interactive: bool,
}

fn usage_err(message: impl Into<String>) -> anyhow::Error {
    CliError::Usage(message.into()).into()
}

/// Find the device to talk to.
pub fn select_device(options: &SelectOptions, scan: &ScanConfig) -> Result<DeviceDescriptor> {
    if let Some(port_name) = &options.port {
        debug!("Probing {port_name}");
        let port = NativePort::open(&scan.serial.for_port(port_name))
            .with_context(|| format!("Failed to open {port_name}"))?;
        return discovery::probe(port, &scan.link)
            .with_context(|| format!("No OSS device answered on {port_name}"));
    }

    // Interactive runs keep polling until a port shows up; Ctrl-C stops them
    let config = if options.non_interactive {
        scan.clone().no_wait()
    } else {
        scan.clone()
    };
    let devices = discovery::scan(&config).context("Device scan failed")?;
    choose_device(devices, options.non_interactive)
}

/// Pick one device from a scan result.
fn choose_device(devices: Vec<DeviceDescriptor>, non_interactive: bool) -> Result<DeviceDescriptor> {
    let mut devices = devices.into_iter();
    match devices
        .len()
        .cmp(&1)
    {
        Ordering::Less => Err(usage_err(
            "No OSS device answered on any serial port; use --port to name one",
        )),
        Ordering::Equal => {
            let device = devices
                .next()
                .ok_or_else(|| anyhow::anyhow!("scan result vanished"))?;
            info!("Auto-selected {device}");
            Ok(device)
        },
        Ordering::Greater if non_interactive => Err(usage_err(
            "Found multiple OSS devices; use --port to choose one",
        )),
        Ordering::Greater => {
            ensure_interactive_terminal()?;
            select_device_interactive(devices.collect())
        },
    }
}

fn ensure_interactive_terminal() -> Result<()> {
    if std::io::stdin().is_terminal() && std::io::stderr().is_terminal() {
        Ok(())
    } else {
        Err(usage_err(
            "Several devices found but no terminal to ask; use --port or --non-interactive",
        ))
    }
}

fn map_prompt_error(err: DialoguerError) -> anyhow::Error {
    match err {
        DialoguerError::IO(io_err) => {
            if io_err.kind() == std::io::ErrorKind::Interrupted {
                CliError::Cancelled("Device selection cancelled".to_string()).into()
            } else {
                usage_err(format!("Device prompt failed: {io_err}"))
            }
        },
    }
}

/// Menu label for one device.
fn device_label(device: &DeviceDescriptor) -> String {
    format!(
        "{} {} [{}] {} datapoints",
        style(&device.port).cyan(),
        style(&device.name).bold(),
        device.status,
        device.data_counter
    )
}

fn select_device_interactive(devices: Vec<DeviceDescriptor>) -> Result<DeviceDescriptor> {
    eprintln!(
        "{} Found {} devices",
        style("ℹ").blue(),
        devices.len()
    );

    let term_width = console::Term::stderr()
        .size()
        .1 as usize;
    let max_item_width = term_width.saturating_sub(4);
    let labels: Vec<String> = devices
        .iter()
        .map(|d| console::truncate_str(&device_label(d), max_item_width, "\u{2026}").into_owned())
        .collect();

    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("Select a device")
        .items(&labels)
        .default(0)
        .interact_opt()
        .map_err(map_prompt_error)?;

    match selection {
        Some(index) => devices
            .into_iter()
            .nth(index)
            .ok_or_else(|| anyhow::anyhow!("Invalid device index: {index}")),
        None => Err(CliError::Cancelled("Device selection cancelled".to_string()).into()),
    }
}
