//! Error types.

use std::path::PathBuf;
use thiserror::Error;

/// Result alias for hosts-sync operations.
pub type Result<T> = std::result::Result<T, HostsError>;

/// Errors returned by store and synchronizer operations.
///
/// Validation and cancellation errors guarantee that no state was mutated;
/// a cancellation noticed after the table changed rolls the change back.
/// File errors are reported after the entry table has already been updated,
/// so the table and the file may disagree until the next successful pass.
#[derive(Debug, Error)]
pub enum HostsError {
    /// The supplied address does not parse as IPv4 or IPv6.
    #[error("invalid IP address: {ip:?}")]
    InvalidIp {
        /// The rejected input.
        ip: String,
    },

    /// The supplied hostname is not a valid RFC 1123 name.
    #[error("invalid hostname: {hostname:?}")]
    InvalidHostname {
        /// The rejected input.
        hostname: String,
    },

    /// The caller's cancellation token fired or its deadline passed.
    #[error("operation cancelled: {reason}")]
    Cancelled {
        /// What triggered the cancellation.
        reason: &'static str,
    },

    /// Reading or stat-ing the hosts file failed.
    #[error("failed to read {}: {source}", path.display())]
    FileRead {
        /// The hosts file path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The hosts file content could not be parsed.
    #[error("failed to parse {}: {reason}", path.display())]
    FileParse {
        /// The hosts file path.
        path: PathBuf,
        /// Why parsing failed.
        reason: String,
    },

    /// Staging or committing the new hosts file content failed.
    #[error("failed to write {}: {source}", path.display())]
    FileWrite {
        /// The hosts file path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Invalid configuration values.
    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

impl HostsError {
    /// Returns `true` for input validation failures (`InvalidIp`, `InvalidHostname`).
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::InvalidIp { .. } | Self::InvalidHostname { .. })
    }

    /// Returns `true` if the operation was abandoned because of cancellation.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// Returns `true` if the underlying I/O error is `PermissionDenied`.
    #[must_use]
    pub fn is_permission_denied(&self) -> bool {
        matches!(
            self,
            Self::FileRead { source, .. } | Self::FileWrite { source, .. }
                if source.kind() == std::io::ErrorKind::PermissionDenied
        )
    }
}
