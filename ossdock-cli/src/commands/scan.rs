//! Device scan command implementation.

use {
    crate::{Cli, config::Config},
    anyhow::{Context, Result},
    console::style,
    ossdock::{DeviceDescriptor, discovery},
};

/// Scan command implementation.
///
/// Never waits for ports to appear; an empty result is not an error.
pub(crate) fn cmd_scan(cli: &Cli, config: &Config, json: bool) -> Result<()> {
    let scan = cli
        .scan_config(config)
        .no_wait();
    let devices = discovery::scan(&scan).context("Device scan failed")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&scan_json(&devices))?);
        return Ok(());
    }

    if devices.is_empty() {
        eprintln!("  {}", style("No OSS devices found").dim());
        return Ok(());
    }

    if !cli.quiet {
        eprintln!(
            "{}",
            style("OSS devices")
                .bold()
                .underlined()
        );
    }
    for device in &devices {
        println!(
            "{}\t{}\t{}\t{} ms\t{}",
            device.port,
            device.name,
            device.status,
            device.logging_interval_ms,
            device.data_counter
        );
    }
    Ok(())
}

fn scan_json(devices: &[DeviceDescriptor]) -> serde_json::Value {
    serde_json::json!({
        "ok": true,
        "data": {
            "devices": devices,
        }
    })
}
