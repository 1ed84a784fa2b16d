//! Host entries and input validation.

use crate::error::{HostsError, Result};
use std::fmt;
use std::net::IpAddr;

/// Maximum length of a full hostname (RFC 1123).
const MAX_HOSTNAME_LEN: usize = 253;

/// Maximum length of a single label.
const MAX_LABEL_LEN: usize = 63;

/// One IP-to-hostname mapping.
///
/// Only constructed through [`Entry::new`], so every `Entry` holds a parsed
/// address and a validated hostname.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Entry {
    ip: IpAddr,
    hostname: String,
}

impl Entry {
    /// Builds an entry from a parsed address and a hostname.
    ///
    /// # Errors
    ///
    /// Returns [`HostsError::InvalidHostname`] if `hostname` fails validation.
    pub fn new(ip: IpAddr, hostname: impl Into<String>) -> Result<Self> {
        let hostname = hostname.into();
        validate_hostname(&hostname)?;
        Ok(Self { ip, hostname })
    }

    /// The entry's address.
    #[must_use]
    pub const fn ip(&self) -> IpAddr {
        self.ip
    }

    /// The entry's hostname.
    #[must_use]
    pub fn hostname(&self) -> &str {
        &self.hostname
    }
}

/// Renders the hosts-file line, `<ip>\t<hostname>`.
impl fmt::Display for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\t{}", self.ip, self.hostname)
    }
}

/// Parses an IPv4 or IPv6 address.
///
/// # Errors
///
/// Returns [`HostsError::InvalidIp`] if `ip` is not an address.
pub fn parse_ip(ip: &str) -> Result<IpAddr> {
    ip.parse().map_err(|_| HostsError::InvalidIp { ip: ip.to_string() })
}

/// Validates a hostname as a dot-separated sequence of RFC 1123 labels.
///
/// Each label is 1-63 ASCII letters, digits or hyphens and neither starts
/// nor ends with a hyphen. The whole name is at most 253 bytes. A trailing
/// root dot is rejected.
///
/// # Errors
///
/// Returns [`HostsError::InvalidHostname`] on the first violation.
pub fn validate_hostname(hostname: &str) -> Result<()> {
    let invalid = || HostsError::InvalidHostname {
        hostname: hostname.to_string(),
    };

    if hostname.is_empty() || hostname.len() > MAX_HOSTNAME_LEN {
        return Err(invalid());
    }

    for label in hostname.split('.') {
        if label.is_empty() || label.len() > MAX_LABEL_LEN {
            return Err(invalid());
        }
        if label.starts_with('-') || label.ends_with('-') {
            return Err(invalid());
        }
        if !label.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-') {
            return Err(invalid());
        }
    }
    Ok(())
}

/// Validates `ip` and every hostname, then builds one entry per distinct
/// hostname in input order.
///
/// Nothing is built unless every input is valid.
///
/// # Errors
///
/// Returns [`HostsError::InvalidIp`] or [`HostsError::InvalidHostname`].
pub fn build_entries<S: AsRef<str>>(ip: &str, hostnames: &[S]) -> Result<Vec<Entry>> {
    let ip = parse_ip(ip)?;
    for hostname in hostnames {
        validate_hostname(hostname.as_ref())?;
    }

    let mut entries: Vec<Entry> = Vec::with_capacity(hostnames.len());
    for hostname in hostnames {
        let hostname = hostname.as_ref();
        if entries.iter().any(|e| e.hostname == hostname) {
            continue;
        }
        entries.push(Entry {
            ip,
            hostname: hostname.to_string(),
        });
    }
    Ok(entries)
}
