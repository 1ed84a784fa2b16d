//! Synchronizer configuration.

use crate::error::{HostsError, Result};
use std::path::PathBuf;

/// Default hosts file path.
pub const DEFAULT_HOSTS_FILE: &str = "/etc/hosts";

/// Default marker embedded in the begin/end lines of the managed region.
pub const DEFAULT_MARKER: &str = "HOSTS-SYNC";

/// Where the managed region lives and how it is delimited.
///
/// # Example
///
/// ```
/// use hosts_sync::SyncConfig;
///
/// let config = SyncConfig::new("/tmp/hosts").with_marker("DEV-CLUSTER");
///
/// assert_eq!(config.begin_marker(), "#### BEGIN DEV-CLUSTER ####");
/// assert_eq!(config.end_marker(), "#### END DEV-CLUSTER ####");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Path of the hosts file whose managed region is rewritten.
    pub hosts_file: PathBuf,

    /// Marker text. Must not collide with unrelated lines in the file.
    pub marker: String,
}

impl SyncConfig {
    /// Creates a config for `hosts_file` with the default marker.
    #[must_use]
    pub fn new(hosts_file: impl Into<PathBuf>) -> Self {
        Self {
            hosts_file: hosts_file.into(),
            marker: DEFAULT_MARKER.to_string(),
        }
    }

    /// Overrides the marker.
    #[must_use]
    pub fn with_marker(mut self, marker: impl Into<String>) -> Self {
        self.marker = marker.into();
        self
    }

    /// The line opening the managed region.
    #[must_use]
    pub fn begin_marker(&self) -> String {
        format!("#### BEGIN {} ####", self.marker)
    }

    /// The line closing the managed region.
    #[must_use]
    pub fn end_marker(&self) -> String {
        format!("#### END {} ####", self.marker)
    }

    /// Checks that the marker renders to unambiguous single-line markers and
    /// that the path names a file.
    ///
    /// # Errors
    ///
    /// Returns [`HostsError::InvalidConfig`] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        let marker = self.marker.trim();
        if marker.is_empty() {
            return Err(HostsError::InvalidConfig("marker must not be empty".into()));
        }
        if self.marker.contains(['\n', '\r']) {
            return Err(HostsError::InvalidConfig(
                "marker must be a single line".into(),
            ));
        }
        if self.marker.contains("####") {
            return Err(HostsError::InvalidConfig(
                "marker must not contain \"####\"".into(),
            ));
        }
        if self.hosts_file.file_name().is_none() {
            return Err(HostsError::InvalidConfig(format!(
                "hosts file path does not name a file: {}",
                self.hosts_file.display()
            )));
        }
        Ok(())
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new(DEFAULT_HOSTS_FILE)
    }
}
