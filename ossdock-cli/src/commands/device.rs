//! Status, command and configuration subcommands.

use {
    super::with_session,
    crate::{Cli, CliError, RecordAction, config::Config},
    anyhow::{Context, Result, bail},
    console::style,
    dialoguer::{Confirm, theme::ColorfulTheme},
    log::warn,
    ossdock::{ClockSync, Command, Datapoint, DeviceSession, NspSettings, Opcode, Port},
    std::{fs, io::IsTerminal, path::PathBuf},
};

fn success(cli: &Cli, message: &str) {
    if !cli.quiet {
        eprintln!("{} {message}", style("✓").green());
    }
}

/// Re-read the status after a state change and print it.
fn refresh_and_report<P: Port>(cli: &Cli, session: &mut DeviceSession<P>) {
    if !session.is_stale() {
        return;
    }
    match session.refresh_status() {
        Ok(descriptor) => {
            if !cli.quiet {
                eprintln!("{} {descriptor}", style("ℹ").blue());
            }
        },
        Err(e) => warn!("Could not read the new device status: {e}"),
    }
}

/// Status command implementation.
pub(crate) fn cmd_status(cli: &Cli, config: &Config, json: bool) -> Result<()> {
    with_session(cli, config, |session| {
        let descriptor = session.descriptor();
        if json {
            let output = serde_json::json!({
                "ok": true,
                "data": {
                    "device": descriptor,
                    "clock_synced": session.clock_sync().is_synced(),
                }
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
            return Ok(());
        }

        println!("Name:      {}", descriptor.name);
        println!("Port:      {}", descriptor.port);
        println!("Status:    {}", descriptor.status);
        println!("Interval:  {} ms", descriptor.logging_interval_ms);
        println!("Stored:    {} datapoints", descriptor.data_counter);
        match session.clock_sync() {
            ClockSync::Synced(at) => println!("Clock:     set to {at}"),
            ClockSync::Failed { reason } => println!("Clock:     not set ({reason})"),
        }
        Ok(())
    })
}

/// Invoke command implementation.
pub(crate) fn cmd_invoke(
    cli: &Cli,
    config: &Config,
    opcode: Opcode,
    param: Option<&str>,
) -> Result<()> {
    // Checked before any port is opened
    let command = Command::new(opcode, param)?;

    with_session(cli, config, |session| {
        let response = session
            .invoke_command(&command)
            .with_context(|| format!("{opcode} failed"))?;
        for line in response.lines() {
            println!("{line}");
        }
        if response.is_err() {
            bail!("Device rejected {opcode}");
        }
        refresh_and_report(cli, session);
        Ok(())
    })
}

/// Capture command implementation.
pub(crate) fn cmd_capture(cli: &Cli, config: &Config, output: Option<&PathBuf>) -> Result<()> {
    with_session(cli, config, |session| {
        let capture = session
            .manual_capture()
            .context("Manual capture failed")?;
        refresh_and_report(cli, session);

        if !cli.quiet {
            eprintln!("{} {}", style("✓").green(), capture_summary(&capture.datapoint));
        }
        match output {
            Some(path) => {
                let content = format!("{}{}\n", Datapoint::csv_header(), capture.row);
                fs::write(path, content)
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                success(cli, &format!("Saved to {}", path.display()));
            },
            None => println!("{}", capture.row),
        }
        Ok(())
    })
}

fn capture_summary(datapoint: &Datapoint) -> String {
    let mut summary = format!(
        "Captured {}: X={} Y={} Z={}",
        datapoint.timestamp(),
        datapoint.x,
        datapoint.y,
        datapoint.z
    );
    if datapoint.saturated {
        summary.push_str(" (saturated)");
    }
    if datapoint.dark {
        summary.push_str(" (dark)");
    }
    summary
}

/// Set-name command implementation.
pub(crate) fn cmd_set_name(cli: &Cli, config: &Config, name: &str) -> Result<()> {
    with_session(cli, config, |session| {
        session
            .set_device_name(name)
            .context("Failed to rename the device")?;
        success(cli, &format!("Device name set to {name}"));
        refresh_and_report(cli, session);
        Ok(())
    })
}

/// Set-interval command implementation.
pub(crate) fn cmd_set_interval(cli: &Cli, config: &Config, interval_ms: u32) -> Result<()> {
    with_session(cli, config, |session| {
        session
            .set_logging_interval(interval_ms)
            .context("Failed to set the logging interval")?;
        success(cli, &format!("Logging interval set to {interval_ms} ms"));
        refresh_and_report(cli, session);
        Ok(())
    })
}

/// Set-calibration command implementation.
pub(crate) fn cmd_set_calibration(cli: &Cli, config: &Config, factor: f64) -> Result<()> {
    with_session(cli, config, |session| {
        session
            .set_calibration_factor(factor)
            .context("Failed to set the calibration factor")?;
        success(cli, &format!("Calibration factor set to {factor}"));
        Ok(())
    })
}

/// Configure command implementation.
pub(crate) fn cmd_configure(cli: &Cli, config: &Config, settings: NspSettings) -> Result<()> {
    settings.validate()?;
    with_session(cli, config, |session| {
        session
            .configure_sensor(&settings)
            .context("Failed to configure the sensor")?;
        let exposure = if settings.auto_exposure {
            "auto-exposure".to_string()
        } else {
            format!("{} ms integration", settings.integration_time_ms)
        };
        success(
            cli,
            &format!(
                "Sensor set to {exposure}, averaging {} frame(s)",
                settings.frame_avg
            ),
        );
        Ok(())
    })
}

/// Record command implementation.
pub(crate) fn cmd_record(cli: &Cli, config: &Config, action: RecordAction) -> Result<()> {
    with_session(cli, config, |session| {
        let result = match action {
            RecordAction::Start => session.start_recording(),
            RecordAction::Stop => session.stop_recording(),
            RecordAction::Toggle => session.toggle_recording(),
        };
        result.context("Failed to change the recording state")?;
        refresh_and_report(cli, session);
        success(
            cli,
            &format!("Device is {}", session.descriptor().status),
        );
        Ok(())
    })
}

fn confirm_erase(cli: &Cli, name: &str, stored: u64) -> Result<()> {
    if cli.non_interactive {
        return Err(CliError::Usage(
            "Refusing to erase without --yes in non-interactive mode".to_string(),
        )
        .into());
    }
    if !(std::io::stdin().is_terminal() && std::io::stderr().is_terminal()) {
        return Err(CliError::Usage("Erasing needs a terminal to confirm, or --yes".to_string()).into());
    }

    let confirmed = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(format!("Erase all {stored} datapoints stored on {name}?"))
        .default(false)
        .interact_opt()
        .map_err(|e| CliError::Cancelled(format!("Confirmation failed: {e}")))?
        .unwrap_or(false);

    if confirmed {
        Ok(())
    } else {
        Err(CliError::Cancelled("Erase cancelled".to_string()).into())
    }
}

/// Erase command implementation.
pub(crate) fn cmd_erase(cli: &Cli, config: &Config, yes: bool) -> Result<()> {
    with_session(cli, config, |session| {
        if !yes {
            let descriptor = session.descriptor();
            confirm_erase(cli, &descriptor.name, descriptor.data_counter)?;
        }
        session
            .erase_storage()
            .context("Failed to erase device storage")?;
        success(cli, "Device storage erased");
        refresh_and_report(cli, session);
        Ok(())
    })
}

/// Reset command implementation.
pub(crate) fn cmd_reset(cli: &Cli, config: &Config) -> Result<()> {
    with_session(cli, config, |session| {
        session
            .reset_device()
            .context("Failed to reset the device")?;
        success(cli, "Device reset");
        refresh_and_report(cli, session);
        Ok(())
    })
}

/// Info command implementation.
pub(crate) fn cmd_info(cli: &Cli, config: &Config) -> Result<()> {
    with_session(cli, config, |session| {
        let response = session
            .get_info()
            .context("Failed to read device information")?;
        for line in response.body() {
            println!("{line}");
        }
        Ok(())
    })
}
