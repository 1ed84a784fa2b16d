//! # hosts-sync
//!
//! Keep a marker-delimited region of a hosts file in sync with the hostnames
//! and entry IPs of a changing set of routing objects.
//!
//! Each object (identified by an opaque key such as `namespace/name`)
//! contributes one `<ip>\t<hostname>` line per hostname. All of them are
//! rendered into a single managed region; every other line of the file is
//! left alone:
//!
//! ```text
//! 127.0.0.1	localhost
//!
//! #### BEGIN HOSTS-SYNC ####
//! # default/web
//! 10.0.0.5	web.test
//! #### END HOSTS-SYNC ####
//! ```
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use hosts_sync::{Cancellation, HostsManager, SyncConfig};
//!
//! let manager = HostsManager::new(SyncConfig::new("/etc/hosts"))?;
//! let cancel = Cancellation::none();
//!
//! manager.update("default/web", "10.0.0.5", &["web.test"], &cancel)?;
//! manager.remove("default/web", &cancel)?;
//!
//! // On shutdown.
//! manager.cleanup(&cancel)?;
//! # Ok::<(), hosts_sync::HostsError>(())
//! ```
//!
//! ## Consistency
//!
//! Every call updates the in-memory table and rewrites the whole file under
//! one lock. New content is staged next to the file, flushed, and renamed
//! into place, so readers see either the old or the new file. When rename is
//! impossible (a bind-mounted `/etc/hosts` in a container, for instance) the
//! content is copied into the existing file instead.
//!
//! The table is not persisted. After a restart, feed the current state of
//! every object back in; the first pass replaces whatever region a previous
//! run left behind.
//!
//! ## Permissions
//!
//! Writing `/etc/hosts` usually requires root. The caller is responsible for
//! privilege elevation.

#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod cancel;
pub mod commit;
pub mod config;
pub mod entry;
pub mod error;
pub mod manager;
pub mod reconcile;
pub mod region;
pub mod synchronizer;
pub mod table;

pub use cancel::Cancellation;
pub use commit::{CopyInto, Promote, Rename};
pub use config::SyncConfig;
pub use entry::Entry;
pub use error::{HostsError, Result};
pub use manager::HostsManager;
pub use reconcile::{Action, ObjectEvent, ObjectState, Reconciler, hosts_relevant_change};
pub use synchronizer::{FileSynchronizer, SyncReport};
pub use table::EntryTable;
