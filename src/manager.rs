//! The locked entry store driving hosts file synchronization.

use crate::cancel::Cancellation;
use crate::config::SyncConfig;
use crate::entry::{Entry, build_entries};
use crate::error::Result;
use crate::synchronizer::{FileSynchronizer, SyncReport};
use crate::table::EntryTable;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Owns the entry table and keeps the hosts file in step with it.
///
/// Every mutation takes one exclusive lock and holds it through the file
/// write that reflects it, so passes never interleave and the file is at
/// most one pass behind the table. Share it between threads with an `Arc`.
///
/// # Failure semantics
///
/// Validation and cancellation errors leave the table untouched: a
/// cancellation noticed just before the commit rolls the table back. File
/// errors are returned after the table was updated; retry the call (or call
/// [`resync`](Self::resync)) to converge.
///
/// # Example
///
/// ```rust,no_run
/// use hosts_sync::{Cancellation, HostsManager, SyncConfig};
///
/// let manager = HostsManager::new(SyncConfig::new("/etc/hosts"))?;
/// let cancel = Cancellation::none();
///
/// manager.update("default/web", "10.0.0.5", &["web.test"], &cancel)?;
/// manager.remove("default/web", &cancel)?;
/// manager.cleanup(&cancel)?;
/// # Ok::<(), hosts_sync::HostsError>(())
/// ```
#[derive(Debug)]
pub struct HostsManager {
    table: Mutex<EntryTable>,
    synchronizer: FileSynchronizer,
}

impl HostsManager {
    /// Creates a manager with an empty table.
    ///
    /// # Errors
    ///
    /// Returns [`HostsError::InvalidConfig`](crate::HostsError::InvalidConfig)
    /// if `config` fails validation.
    pub fn new(config: SyncConfig) -> Result<Self> {
        Ok(Self::with_synchronizer(FileSynchronizer::new(config)?))
    }

    /// Creates a manager around a preconfigured synchronizer.
    #[must_use]
    pub fn with_synchronizer(synchronizer: FileSynchronizer) -> Self {
        Self {
            table: Mutex::new(EntryTable::new()),
            synchronizer,
        }
    }

    /// The configuration the hosts file is written with.
    #[must_use]
    pub const fn config(&self) -> &SyncConfig {
        self.synchronizer.config()
    }

    /// Replaces the entries of `key` with one entry per distinct hostname,
    /// all pointing at `ip`, then rewrites the file.
    ///
    /// An empty `hostnames` behaves like [`remove`](Self::remove). The file
    /// is rewritten even if the entries did not change, so repeating a
    /// failed call repairs the file.
    ///
    /// # Errors
    ///
    /// [`InvalidIp`](crate::HostsError::InvalidIp),
    /// [`InvalidHostname`](crate::HostsError::InvalidHostname) and
    /// [`Cancelled`](crate::HostsError::Cancelled) leave the table untouched;
    /// file errors are returned after the table was updated.
    pub fn update<S: AsRef<str>>(
        &self,
        key: &str,
        ip: &str,
        hostnames: &[S],
        cancel: &Cancellation,
    ) -> Result<Option<SyncReport>> {
        let entries = build_entries(ip, hostnames)?;
        if entries.is_empty() {
            tracing::debug!(key = %key, "Update without hostnames, removing");
            return self.remove(key, cancel);
        }

        let mut table = self.lock(cancel)?;
        let count = entries.len();
        let previous = table.get(key);
        let changed = table.replace(key, entries);
        let report =
            self.sync_or_restore(&mut table, cancel, |t| restore_key(t, key, previous))?;

        tracing::info!(
            key = %key,
            ip = %ip,
            hostnames = count,
            changed,
            "Updated hosts entries"
        );
        Ok(Some(report))
    }

    /// Drops all entries of `key` and rewrites the file.
    ///
    /// Returns `Ok(None)` without touching the file if `key` is unknown.
    ///
    /// # Errors
    ///
    /// [`Cancelled`](crate::HostsError::Cancelled) leaves the table untouched;
    /// file errors are returned after the key was removed.
    pub fn remove(&self, key: &str, cancel: &Cancellation) -> Result<Option<SyncReport>> {
        let mut table = self.lock(cancel)?;
        let Some(previous) = table.get(key) else {
            tracing::debug!(key = %key, "No hosts entries to remove");
            return Ok(None);
        };
        table.remove(key);
        let report =
            self.sync_or_restore(&mut table, cancel, |t| restore_key(t, key, Some(previous)))?;

        tracing::info!(key = %key, "Removed hosts entries");
        Ok(Some(report))
    }

    /// Clears the table and removes the managed region from the file.
    ///
    /// A file without a managed region is left untouched, and a missing file
    /// is not created.
    ///
    /// # Errors
    ///
    /// [`Cancelled`](crate::HostsError::Cancelled) leaves the table untouched;
    /// file errors are returned after the table was cleared.
    pub fn cleanup(&self, cancel: &Cancellation) -> Result<SyncReport> {
        let mut table = self.lock(cancel)?;
        let keys = table.len();
        let previous = std::mem::take(&mut *table);
        let report = self.sync_or_restore(&mut table, cancel, |t| *t = previous)?;

        tracing::info!(
            path = %self.synchronizer.path().display(),
            removed_keys = keys,
            "Cleaned up managed hosts entries"
        );
        Ok(report)
    }

    /// Rewrites the file from the current table without mutating it.
    ///
    /// # Errors
    ///
    /// Returns cancellation or file errors.
    pub fn resync(&self, cancel: &Cancellation) -> Result<SyncReport> {
        let table = self.lock(cancel)?;
        self.synchronizer.sync(&table, cancel)
    }

    /// Returns a copy of the entries stored for `key`.
    #[must_use]
    pub fn entries(&self, key: &str) -> Option<Vec<Entry>> {
        self.lock_unchecked().get(key)
    }

    /// Returns a copy of the whole table.
    #[must_use]
    pub fn snapshot(&self) -> EntryTable {
        self.lock_unchecked().clone()
    }

    /// Number of object keys with entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock_unchecked().len()
    }

    /// Returns `true` if no object has entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock_unchecked().is_empty()
    }

    /// Runs a pass over the already mutated `table`. If the pass stops on
    /// cancellation (always before its commit), `restore` undoes the
    /// mutation.
    fn sync_or_restore(
        &self,
        table: &mut EntryTable,
        cancel: &Cancellation,
        restore: impl FnOnce(&mut EntryTable),
    ) -> Result<SyncReport> {
        match self.synchronizer.sync(table, cancel) {
            Err(e) if e.is_cancelled() => {
                restore(table);
                tracing::debug!("Pass cancelled before commit, table restored");
                Err(e)
            }
            other => other,
        }
    }

    /// Checks `cancel`, takes the lock, and checks `cancel` again.
    fn lock(&self, cancel: &Cancellation) -> Result<MutexGuard<'_, EntryTable>> {
        cancel.check()?;
        let guard = self.lock_unchecked();
        cancel.check()?;
        Ok(guard)
    }

    // Every table mutation is a single call, so a panic while holding the
    // lock cannot leave it half-updated.
    fn lock_unchecked(&self) -> MutexGuard<'_, EntryTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn restore_key(table: &mut EntryTable, key: &str, previous: Option<Vec<Entry>>) {
    match previous {
        Some(entries) => table.replace(key, entries),
        None => table.remove(key),
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HostsError;
    use std::fs;
    use tokio_util::sync::CancellationToken;

    fn manager(dir: &tempfile::TempDir) -> HostsManager {
        HostsManager::new(SyncConfig::new(dir.path().join("hosts")).with_marker("TEST")).unwrap()
    }

    fn read(dir: &tempfile::TempDir) -> String {
        fs::read_to_string(dir.path().join("hosts")).unwrap()
    }

    #[test]
    fn update_writes_and_stores() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(&dir);

        let report = m
            .update("ns/app", "10.0.0.5", &["a.test", "b.test"], &Cancellation::none())
            .unwrap()
            .unwrap();
        assert_eq!(report.entries, 2);
        assert_eq!(m.len(), 1);
        assert_eq!(m.entries("ns/app").unwrap().len(), 2);
        assert!(read(&dir).contains("# ns/app\n10.0.0.5\ta.test\n10.0.0.5\tb.test\n"));
    }

    #[test]
    fn update_with_no_hostnames_removes() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(&dir);
        let cancel = Cancellation::none();

        m.update("ns/app", "10.0.0.5", &["a.test"], &cancel).unwrap();
        let empty: [&str; 0] = [];
        assert!(m.update("ns/app", "10.0.0.5", &empty, &cancel).unwrap().is_some());
        assert!(m.is_empty());
        assert!(!read(&dir).contains("BEGIN"));
    }

    #[test]
    fn invalid_input_does_not_mutate() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(&dir);
        let cancel = Cancellation::none();

        m.update("ns/app", "10.0.0.5", &["a.test"], &cancel).unwrap();
        let before = read(&dir);

        let err = m.update("ns/app", "10.0.0.6", &["ok.test", "not valid"], &cancel);
        assert!(matches!(err, Err(HostsError::InvalidHostname { .. })));
        let err = m.update("ns/app", "bogus", &["ok.test"], &cancel);
        assert!(matches!(err, Err(HostsError::InvalidIp { .. })));

        assert_eq!(m.entries("ns/app").unwrap()[0].ip().to_string(), "10.0.0.5");
        assert_eq!(read(&dir), before);
    }

    #[test]
    fn remove_unknown_key_skips_write() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(&dir);
        assert!(m.remove("ns/none", &Cancellation::none()).unwrap().is_none());
        assert!(!dir.path().join("hosts").exists());
    }

    #[test]
    fn cancelled_operations_do_not_mutate() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(&dir);
        m.update("ns/app", "10.0.0.5", &["a.test"], &Cancellation::none())
            .unwrap();

        let token = CancellationToken::new();
        token.cancel();
        let cancel = Cancellation::with_token(token);

        assert!(m.update("ns/other", "10.0.0.6", &["b.test"], &cancel).unwrap_err().is_cancelled());
        assert!(m.remove("ns/app", &cancel).unwrap_err().is_cancelled());
        assert!(m.cleanup(&cancel).unwrap_err().is_cancelled());
        assert!(m.resync(&cancel).unwrap_err().is_cancelled());

        assert_eq!(m.snapshot().keys().collect::<Vec<_>>(), ["ns/app"]);
    }

    // The lock boundary checks twice; the third check is the one right
    // before the commit, after the table was already mutated.
    fn cancel_before_commit() -> Cancellation {
        Cancellation::after_checks(2)
    }

    #[test]
    fn cancellation_before_commit_restores_table() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(&dir);
        let cancel = Cancellation::none();
        m.update("ns/app", "10.0.0.5", &["a.test"], &cancel).unwrap();
        m.update("ns/db", "10.0.0.7", &["db.test"], &cancel).unwrap();
        let table = m.snapshot();
        let file = read(&dir);

        let err = m
            .update("ns/app", "10.0.0.6", &["b.test"], &cancel_before_commit())
            .unwrap_err();
        assert!(err.is_cancelled());
        let err = m
            .update("ns/new", "10.0.0.8", &["new.test"], &cancel_before_commit())
            .unwrap_err();
        assert!(err.is_cancelled());
        let err = m.remove("ns/db", &cancel_before_commit()).unwrap_err();
        assert!(err.is_cancelled());
        let err = m.cleanup(&cancel_before_commit()).unwrap_err();
        assert!(err.is_cancelled());

        assert_eq!(m.snapshot(), table);
        assert_eq!(read(&dir), file);
    }

    #[test]
    fn cleanup_empties_table_and_region() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("hosts"), "127.0.0.1\tlocalhost\n").unwrap();
        let m = manager(&dir);
        let cancel = Cancellation::none();

        m.update("a", "10.0.0.1", &["a.test"], &cancel).unwrap();
        m.update("b", "10.0.0.2", &["b.test"], &cancel).unwrap();
        let report = m.cleanup(&cancel).unwrap();

        assert_eq!(report.keys, 0);
        assert!(m.is_empty());
        assert_eq!(read(&dir), "127.0.0.1\tlocalhost\n");
    }

    #[test]
    fn file_error_keeps_table_update() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hosts");
        fs::create_dir(&path).unwrap();
        let m = manager(&dir);

        let err = m
            .update("ns/app", "10.0.0.5", &["a.test"], &Cancellation::none())
            .unwrap_err();
        assert!(matches!(err, HostsError::FileRead { .. }));
        assert!(m.entries("ns/app").is_some());

        fs::remove_dir(&path).unwrap();
        m.resync(&Cancellation::none()).unwrap();
        assert!(read(&dir).contains("10.0.0.5\ta.test"));
    }
}
