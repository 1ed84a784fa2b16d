//! Durable replacement of a file's content.
//!
//! New content is staged in a temporary file next to the destination,
//! flushed, given the destination's mode, and then promoted by the first
//! [`Promote`] strategy that succeeds. [`Rename`] is atomic; [`CopyInto`]
//! covers destinations that cannot be renamed over (bind-mounted files,
//! cross-device paths) at the cost of a short window where readers may see
//! a truncated file.
//!
//! The staged file is removed on every failure path.

use std::fmt;
use std::fs::{self, File, OpenOptions, Permissions};
use std::io::{self, Write};
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::Path;

/// Prefix of staged files created next to the destination.
const STAGING_PREFIX: &str = ".hosts-sync-";

/// One way of moving a fully written staged file onto its destination.
pub trait Promote: fmt::Debug + Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Makes `dest` hold the content of `staged`.
    ///
    /// May consume `staged` (as a rename does); the caller removes it
    /// afterwards if it still exists.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error; `dest` must then be untouched or
    /// already fully rewritten.
    fn promote(&self, staged: &Path, dest: &Path, mode: u32) -> io::Result<()>;
}

/// Atomic `rename(2)` over the destination.
#[derive(Debug, Clone, Copy, Default)]
pub struct Rename;

impl Promote for Rename {
    fn name(&self) -> &'static str {
        "rename"
    }

    fn promote(&self, staged: &Path, dest: &Path, _mode: u32) -> io::Result<()> {
        fs::rename(staged, dest)
    }
}

/// Non-atomic copy into the existing destination inode, then `fsync`.
#[derive(Debug, Clone, Copy, Default)]
pub struct CopyInto;

impl Promote for CopyInto {
    fn name(&self) -> &'static str {
        "copy"
    }

    fn promote(&self, staged: &Path, dest: &Path, mode: u32) -> io::Result<()> {
        let mut src = File::open(staged)?;
        let mut dst = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(mode)
            .open(dest)?;
        io::copy(&mut src, &mut dst)?;
        dst.sync_all()
    }
}

/// The default strategy order: rename, falling back to copy.
#[must_use]
pub fn default_strategies() -> Vec<Box<dyn Promote>> {
    vec![Box::new(Rename), Box::new(CopyInto)]
}

/// Replaces the content of `dest` with `data`, leaving it with permission
/// bits `mode`.
///
/// Strategies are tried in order; a later one runs only after an earlier one
/// failed. Returns the name of the strategy that succeeded.
///
/// # Errors
///
/// Returns the staging error, or the error of the last strategy if all of
/// them failed. In both cases the staged file has been removed.
pub fn write_atomic(
    dest: &Path,
    data: &[u8],
    mode: u32,
    strategies: &[Box<dyn Promote>],
) -> io::Result<&'static str> {
    let dir = match dest.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };

    let mut staged = tempfile::Builder::new()
        .prefix(STAGING_PREFIX)
        .suffix(".tmp")
        .tempfile_in(dir)?;
    staged.write_all(data)?;
    staged.as_file().sync_all()?;
    fs::set_permissions(staged.path(), Permissions::from_mode(mode))?;

    let staged = staged.into_temp_path();
    let mut last_err = io::Error::other("no commit strategy configured");

    for (idx, strategy) in strategies.iter().enumerate() {
        match strategy.promote(&staged, dest, mode) {
            Ok(()) => {
                if staged.exists() {
                    if let Err(e) = staged.close() {
                        tracing::warn!(
                            path = %dest.display(),
                            error = %e,
                            "Failed to remove staged file after commit"
                        );
                    }
                } else {
                    // Consumed by the strategy; nothing left to delete.
                    let _ = staged.keep();
                }
                return Ok(strategy.name());
            }
            Err(e) => {
                if idx + 1 < strategies.len() {
                    tracing::warn!(
                        path = %dest.display(),
                        strategy = strategy.name(),
                        cross_device = e.raw_os_error() == Some(libc::EXDEV),
                        error = %e,
                        "Commit strategy failed, falling back"
                    );
                }
                last_err = e;
            }
        }
    }

    Err(last_err)
}
