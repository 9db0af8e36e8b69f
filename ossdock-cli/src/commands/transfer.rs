//! Export and sync command implementations.

use {
    super::{progress_bar, with_session},
    crate::{Cli, config::Config, transfer_config},
    anyhow::{Context, Result},
    console::style,
    log::{debug, warn},
    ossdock::{Error, protocol::MAX_TRANSFER_DATAPOINTS, transfer},
    std::{
        ffi::OsString,
        fs::{self, File, OpenOptions},
        io::BufWriter,
        path::{Path, PathBuf},
    },
};

/// Extension of exported logs.
const EXPORT_EXTENSION: &str = "CSV";

/// An export target that only gets its final name on completion.
///
/// Dropping it without [`PartFile::commit`] removes the partial file.
struct PartFile {
    part_path: PathBuf,
    final_path: PathBuf,
    committed: bool,
}

impl PartFile {
    fn create(final_path: &Path) -> Result<(Self, File)> {
        if let Some(parent) = final_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
        {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let part_path = part_path_for(final_path);
        let file = File::create(&part_path)
            .with_context(|| format!("Failed to create {}", part_path.display()))?;
        Ok((
            Self {
                part_path,
                final_path: final_path.to_path_buf(),
                committed: false,
            },
            file,
        ))
    }

    /// Move the finished file to its final name.
    fn commit(mut self) -> Result<PathBuf> {
        fs::rename(&self.part_path, &self.final_path).with_context(|| {
            format!(
                "Failed to move {} to {}",
                self.part_path.display(),
                self.final_path.display()
            )
        })?;
        self.committed = true;
        Ok(self.final_path.clone())
    }
}

impl Drop for PartFile {
    fn drop(&mut self) {
        if !self.committed {
            debug!("Removing {}", self.part_path.display());
            let _ = fs::remove_file(&self.part_path);
        }
    }
}

fn part_path_for(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".part");
    PathBuf::from(name)
}

/// `<dir>/<stem>.CSV`, or `<stem>0.CSV`, `<stem>1.CSV`, ... if taken.
fn next_free_path(dir: &Path, stem: &str) -> PathBuf {
    let stem = if stem.is_empty() { "EXPORT" } else { stem };
    let candidate = |suffix: Option<u32>| {
        let suffix = suffix.map(|n| n.to_string()).unwrap_or_default();
        dir.join(format!("{stem}{suffix}.{EXPORT_EXTENSION}"))
    };

    let first = candidate(None);
    if !first.exists() {
        return first;
    }
    (0..)
        .map(|n| candidate(Some(n)))
        .find(|p| !p.exists())
        .unwrap_or(first)
}

/// Export command implementation.
pub(crate) fn cmd_export(
    cli: &Cli,
    config: &Config,
    output: Option<&PathBuf>,
    erase: bool,
) -> Result<()> {
    with_session(cli, config, |session| {
        let device = session
            .descriptor()
            .clone();
        if device.data_counter > MAX_TRANSFER_DATAPOINTS {
            warn!(
                "{} holds {} datapoints; serial export will be slow, reading the SD card directly is faster",
                device.name, device.data_counter
            );
        }

        let path = output
            .cloned()
            .unwrap_or_else(|| next_free_path(&config.data_dir(), &device.name));
        let (part, file) = PartFile::create(&path)?;
        let mut writer = BufWriter::new(file);

        let pb = progress_bar(cli);
        pb.set_message(format!("Exporting {}", device.name));
        let result = transfer::start_export(session, &mut writer, transfer_config(config))
            .and_then(|t| t.run(|_, _, percent| pb.set_position(u64::from(percent))));
        drop(writer);

        match result {
            Ok(bytes) => {
                pb.finish_with_message("Complete");
                let path = part.commit()?;
                if !cli.quiet {
                    eprintln!(
                        "{} Exported {bytes} bytes to {}",
                        style("✓").green(),
                        path.display()
                    );
                }
            },
            Err(Error::EmptyTransfer) => {
                pb.finish_and_clear();
                if !cli.quiet {
                    eprintln!("{} Nothing stored on {}", style("ℹ").blue(), device.name);
                }
                return Ok(());
            },
            Err(e) => {
                pb.abandon();
                return Err(e).context("Export failed");
            },
        }

        if erase {
            session
                .erase_storage()
                .context("Export completed but erasing device storage failed")?;
            if !cli.quiet {
                eprintln!("{} Device storage erased", style("✓").green());
            }
            session.refresh_status()?;
        }
        Ok(())
    })
}

fn print_sync_mismatch_hint(sync_path: &Path) {
    eprintln!(
        "{} The sync file no longer matches the device log.",
        style("hint:").yellow().bold()
    );
    eprintln!(
        "      Run `ossdock export` for a full copy, then `ossdock erase` and remove {} to start over.",
        sync_path.display()
    );
}

/// Sync command implementation.
///
/// The size of the sync file is the number of bytes already copied; the
/// device sends what follows and it is appended.
pub(crate) fn cmd_sync(cli: &Cli, config: &Config) -> Result<()> {
    let sync_path = config.sync_path();
    if let Some(parent) = sync_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let created = !sync_path.exists();
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&sync_path)
        .with_context(|| format!("Failed to open {}", sync_path.display()))?;
    let local_bytes = file
        .metadata()?
        .len();
    debug!("{} holds {local_bytes} bytes", sync_path.display());

    let outcome = with_session(cli, config, |session| {
        let pb = progress_bar(cli);
        pb.set_message("Syncing");
        let mut writer = BufWriter::new(&mut file);
        let result = transfer::start_sync(session, local_bytes, &mut writer, transfer_config(config))
            .and_then(|t| t.run(|_, _, percent| pb.set_position(u64::from(percent))));
        drop(writer);

        match result {
            Ok(bytes) => {
                pb.finish_with_message("Complete");
                if !cli.quiet {
                    eprintln!(
                        "{} Appended {bytes} bytes to {}",
                        style("✓").green(),
                        sync_path.display()
                    );
                }
                Ok(())
            },
            Err(Error::EmptyTransfer) => {
                pb.finish_and_clear();
                if !cli.quiet {
                    eprintln!("{} Already up to date", style("✓").green());
                }
                Ok(())
            },
            Err(Error::SyncMismatch) => {
                pb.abandon();
                print_sync_mismatch_hint(&sync_path);
                Err(Error::SyncMismatch).context("Sync failed")
            },
            Err(e) => {
                pb.abandon();
                // Keep the file a clean prefix of the device log
                file.set_len(local_bytes)
                    .with_context(|| format!("Failed to restore {}", sync_path.display()))?;
                Err(e).context("Sync failed")
            },
        }
    });
    drop(file);

    if outcome.is_err() && created {
        remove_if_empty(&sync_path);
    }
    outcome
}

/// Remove a sync file this run created but never wrote to.
fn remove_if_empty(path: &Path) {
    if fs::metadata(path).is_ok_and(|m| m.len() == 0) {
        debug!("Removing empty {}", path.display());
        let _ = fs::remove_file(path);
    }
}

#[cfg(test)]
mod tests {
    use {super::*, std::io::Write as _};

    #[test]
    fn test_part_path_appends_suffix() {
        assert_eq!(
            part_path_for(Path::new("data/LAB1.CSV")),
            PathBuf::from("data/LAB1.CSV.part")
        );
    }

    #[test]
    fn test_next_free_path_numbers_existing_files() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(next_free_path(dir.path(), "Lab1"), dir.path().join("Lab1.CSV"));

        fs::write(dir.path().join("Lab1.CSV"), "").unwrap();
        assert_eq!(next_free_path(dir.path(), "Lab1"), dir.path().join("Lab10.CSV"));

        fs::write(dir.path().join("Lab10.CSV"), "").unwrap();
        assert_eq!(next_free_path(dir.path(), "Lab1"), dir.path().join("Lab11.CSV"));
    }

    #[test]
    fn test_next_free_path_unnamed_device() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(next_free_path(dir.path(), ""), dir.path().join("EXPORT.CSV"));
    }

    #[test]
    fn test_part_file_commit_renames() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out").join("LAB1.CSV");

        let (part, mut file) = PartFile::create(&target).unwrap();
        file.write_all(b"DATE,TIME\n").unwrap();
        drop(file);
        assert!(dir.path().join("out/LAB1.CSV.part").exists());

        let path = part.commit().unwrap();
        assert_eq!(path, target);
        assert_eq!(fs::read_to_string(&target).unwrap(), "DATE,TIME\n");
        assert!(!dir.path().join("out/LAB1.CSV.part").exists());
    }

    #[test]
    fn test_remove_if_empty_keeps_synced_data() {
        let dir = tempfile::tempdir().unwrap();
        let empty = dir.path().join("SYNC.CSV");
        let synced = dir.path().join("OLD.CSV");
        fs::write(&empty, "").unwrap();
        fs::write(&synced, "DATE,TIME\n").unwrap();

        remove_if_empty(&empty);
        remove_if_empty(&synced);
        remove_if_empty(&dir.path().join("missing.CSV"));

        assert!(!empty.exists());
        assert!(synced.exists());
    }

    #[test]
    fn test_part_file_dropped_is_removed() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("LAB1.CSV");

        let (part, file) = PartFile::create(&target).unwrap();
        drop(file);
        drop(part);

        assert!(!target.exists());
        assert!(!dir.path().join("LAB1.CSV.part").exists());
    }
}
