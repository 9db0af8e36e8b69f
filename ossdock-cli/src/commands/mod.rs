//! Command implementations.
//!
//! Each group of subcommands is implemented in its own module.

pub(crate) mod completions;
pub(crate) mod device;
pub(crate) mod scan;
pub(crate) mod transfer;

use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use log::debug;
use ossdock::{DeviceSession, NativePort};

use crate::config::Config;
use crate::{Cli, open_session, use_fancy_output};

/// Connect, run `f` on the session, then disconnect.
///
/// The port is closed even when `f` fails.
pub(crate) fn with_session<T, F>(cli: &Cli, config: &Config, f: F) -> Result<T>
where
    F: FnOnce(&mut DeviceSession<NativePort>) -> Result<T>,
{
    let mut session = open_session(cli, config)?;
    let outcome = f(&mut session);
    if let Err(e) = session.disconnect() {
        debug!("Closing the port failed: {e}");
    }
    outcome
}

/// A percentage bar on stderr, hidden when quiet or not on a terminal.
pub(crate) fn progress_bar(cli: &Cli) -> ProgressBar {
    if cli.quiet || !use_fancy_output() {
        ProgressBar::hidden()
    } else {
        let pb = ProgressBar::new(100);
        #[allow(clippy::unwrap_used)] // Static template string
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}% {msg}")
                .unwrap()
                .progress_chars("#>-"),
        );
        pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
        pb
    }
}
