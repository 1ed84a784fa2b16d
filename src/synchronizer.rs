//! Rewrites the managed region of the hosts file from an [`EntryTable`].

use crate::cancel::Cancellation;
use crate::commit::{Promote, default_strategies, write_atomic};
use crate::config::SyncConfig;
use crate::error::{HostsError, Result};
use crate::region::{self, MarkerAnomaly, Markers};
use crate::table::EntryTable;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

/// Permission bits used when the hosts file does not exist yet.
pub const DEFAULT_MODE: u32 = 0o644;

/// Outcome of one successful synchronization pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncReport {
    /// Object keys rendered into the managed region.
    pub keys: usize,
    /// Entry lines rendered into the managed region.
    pub entries: usize,
    /// Bytes written to the hosts file; 0 if nothing was written.
    pub bytes: usize,
    /// Name of the commit strategy that promoted the new content, or `None`
    /// if the file was left alone.
    pub strategy: Option<&'static str>,
}

/// Performs read-parse-rewrite-commit passes against one hosts file.
///
/// Holds no entry state of its own; callers serialize passes (see
/// [`HostsManager`](crate::HostsManager)).
#[derive(Debug)]
pub struct FileSynchronizer {
    config: SyncConfig,
    markers: Markers,
    strategies: Vec<Box<dyn Promote>>,
}

impl FileSynchronizer {
    /// Creates a synchronizer committing with rename, then copy.
    ///
    /// # Errors
    ///
    /// Returns [`HostsError::InvalidConfig`] if `config` fails validation.
    pub fn new(config: SyncConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            markers: Markers::new(&config),
            config,
            strategies: default_strategies(),
        })
    }

    /// Replaces the commit strategies, tried in order.
    #[must_use]
    pub fn with_strategies(mut self, strategies: Vec<Box<dyn Promote>>) -> Self {
        self.strategies = strategies;
        self
    }

    /// The configuration this synchronizer writes with.
    #[must_use]
    pub const fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// The hosts file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.config.hosts_file
    }

    /// Renders `table` into the hosts file, preserving unrelated lines.
    ///
    /// With an empty `table` and no managed region on disk there is nothing
    /// to remove: the file is left byte-for-byte as it is (or absent).
    ///
    /// `cancel` is checked once more before the commit starts; the commit
    /// itself always runs to completion.
    ///
    /// # Errors
    ///
    /// Returns [`HostsError::FileRead`], [`HostsError::FileParse`],
    /// [`HostsError::FileWrite`] or [`HostsError::Cancelled`]. The previous
    /// file content is intact in every case.
    pub fn sync(&self, table: &EntryTable, cancel: &Cancellation) -> Result<SyncReport> {
        let path = self.path();
        let (raw, mode) = read_existing(path)?;

        let content = std::str::from_utf8(&raw).map_err(|e| HostsError::FileParse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let parsed = region::parse(content, &self.markers);
        for anomaly in &parsed.anomalies {
            log_anomaly(path, *anomaly);
        }

        if table.is_empty() && !parsed.had_region {
            tracing::debug!(path = %path.display(), "No managed region, leaving hosts file untouched");
            return Ok(SyncReport {
                keys: 0,
                entries: 0,
                bytes: 0,
                strategy: None,
            });
        }

        let rendered = region::render(&parsed.outside, table, &self.markers);

        cancel.check()?;

        let strategy = write_atomic(path, rendered.as_bytes(), mode, &self.strategies).map_err(
            |source| HostsError::FileWrite {
                path: path.to_path_buf(),
                source,
            },
        )?;

        let report = SyncReport {
            keys: table.len(),
            entries: table.entry_count(),
            bytes: rendered.len(),
            strategy: Some(strategy),
        };
        tracing::debug!(
            path = %path.display(),
            keys = report.keys,
            entries = report.entries,
            bytes = report.bytes,
            strategy,
            replaced_region = parsed.had_region,
            "Synchronized hosts file"
        );
        Ok(report)
    }
}

/// Reads the file and its permission bits. A missing file reads as empty
/// with [`DEFAULT_MODE`].
fn read_existing(path: &Path) -> Result<(Vec<u8>, u32)> {
    let read_err = |source| HostsError::FileRead {
        path: path.to_path_buf(),
        source,
    };

    let mode = match std::fs::metadata(path) {
        Ok(meta) => meta.permissions().mode() & 0o7777,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "Hosts file does not exist, starting empty");
            return Ok((Vec::new(), DEFAULT_MODE));
        }
        Err(e) => return Err(read_err(e)),
    };

    match std::fs::read(path) {
        Ok(raw) => Ok((raw, mode)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok((Vec::new(), mode)),
        Err(e) => Err(read_err(e)),
    }
}

fn log_anomaly(path: &Path, anomaly: MarkerAnomaly) {
    match anomaly {
        MarkerAnomaly::NestedBegin { line } => tracing::warn!(
            path = %path.display(),
            line,
            "Ignoring begin marker inside managed region"
        ),
        MarkerAnomaly::StrayEnd { line } => tracing::warn!(
            path = %path.display(),
            line,
            "Dropping end marker without matching begin marker"
        ),
        MarkerAnomaly::Unterminated { begin_line } => tracing::warn!(
            path = %path.display(),
            line = begin_line,
            "Managed region is not terminated, discarding the rest of the file"
        ),
    }
}
