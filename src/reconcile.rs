//! Translation of routing-object observations into store calls.
//!
//! The watch/list machinery that produces observations is not part of this
//! crate; anything that can describe an object as an [`ObjectEvent`] can
//! drive a [`Reconciler`].

use crate::cancel::Cancellation;
use crate::error::Result;
use crate::manager::HostsManager;
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// Delay before re-delivering an object that has no assigned IP yet.
pub const DEFAULT_REQUEUE_DELAY: Duration = Duration::from_secs(30);

/// Grace period for the shutdown cleanup.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// The hosts-relevant view of one routing object.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ObjectState {
    /// Unique object key, e.g. `namespace/name`.
    pub key: String,
    /// Declared hostnames. May contain empties and repeats.
    #[serde(default)]
    pub hostnames: Vec<String>,
    /// Assigned entry IP; absent or empty while unprovisioned.
    #[serde(default)]
    pub ip: Option<String>,
}

impl ObjectState {
    /// Hostnames with empties and repeats removed, first occurrence wins.
    #[must_use]
    pub fn normalized_hostnames(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.hostnames
            .iter()
            .map(String::as_str)
            .filter(|h| !h.is_empty() && seen.insert(*h))
            .collect()
    }

    /// The assigned IP, treating an empty string as unassigned.
    #[must_use]
    pub fn assigned_ip(&self) -> Option<&str> {
        self.ip.as_deref().filter(|ip| !ip.is_empty())
    }
}

/// A change to one routing object.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ObjectEvent {
    /// The object was created or modified.
    Applied(ObjectState),
    /// The object no longer exists.
    Deleted {
        /// Key of the deleted object.
        key: String,
    },
}

impl ObjectEvent {
    /// The key of the affected object.
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Self::Applied(state) => &state.key,
            Self::Deleted { key } => key,
        }
    }
}

/// Returns `true` if moving from `old` to `new` can change the hosts file:
/// the assigned IP differs, or the hostname sets differ. Hostname order and
/// repeats are ignored.
#[must_use]
pub fn hosts_relevant_change(old: &ObjectState, new: &ObjectState) -> bool {
    if old.assigned_ip() != new.assigned_ip() {
        return true;
    }
    let old_hosts: HashSet<&str> = old.normalized_hostnames().into_iter().collect();
    let new_hosts: HashSet<&str> = new.normalized_hostnames().into_iter().collect();
    old_hosts != new_hosts
}

/// What the reconciler did with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Entries were written for the object.
    Synced {
        /// Number of entries now stored for the object.
        entries: usize,
    },
    /// The object has no entries (any previous ones were removed).
    Removed,
    /// The object is not provisioned yet; deliver it again after the delay.
    RequeueAfter(Duration),
}

/// Applies [`ObjectEvent`]s to a shared [`HostsManager`].
///
/// Performs one store call per event and never retries; the caller owns
/// the retry policy.
#[derive(Debug, Clone)]
pub struct Reconciler {
    manager: Arc<HostsManager>,
    requeue_delay: Duration,
}

impl Reconciler {
    /// Creates a reconciler with [`DEFAULT_REQUEUE_DELAY`].
    #[must_use]
    pub const fn new(manager: Arc<HostsManager>) -> Self {
        Self {
            manager,
            requeue_delay: DEFAULT_REQUEUE_DELAY,
        }
    }

    /// Overrides the delay reported for unprovisioned objects.
    #[must_use]
    pub const fn with_requeue_delay(mut self, delay: Duration) -> Self {
        self.requeue_delay = delay;
        self
    }

    /// The delay reported for unprovisioned objects.
    #[must_use]
    pub const fn requeue_delay(&self) -> Duration {
        self.requeue_delay
    }

    /// The managed store.
    #[must_use]
    pub const fn manager(&self) -> &Arc<HostsManager> {
        &self.manager
    }

    /// Applies one event.
    ///
    /// # Errors
    ///
    /// Propagates store errors unchanged.
    pub fn reconcile(&self, event: &ObjectEvent, cancel: &Cancellation) -> Result<Action> {
        let state = match event {
            ObjectEvent::Deleted { key } => {
                tracing::info!(key = %key, "Object deleted, removing hosts entries");
                self.manager.remove(key, cancel)?;
                return Ok(Action::Removed);
            }
            ObjectEvent::Applied(state) => state,
        };

        let hostnames = state.normalized_hostnames();
        if hostnames.is_empty() {
            tracing::info!(key = %state.key, "Object has no hostnames, removing hosts entries");
            self.manager.remove(&state.key, cancel)?;
            return Ok(Action::Removed);
        }

        let Some(ip) = state.assigned_ip() else {
            tracing::info!(
                key = %state.key,
                requeue_after = ?self.requeue_delay,
                "Object has no assigned IP yet, will requeue"
            );
            return Ok(Action::RequeueAfter(self.requeue_delay));
        };

        // Normalized hostnames are distinct, so each becomes one entry.
        self.manager.update(&state.key, ip, &hostnames, cancel)?;
        Ok(Action::Synced {
            entries: hostnames.len(),
        })
    }

    /// Removes every managed entry within `grace`. Failures are logged and
    /// swallowed so shutdown can proceed.
    pub fn shutdown(&self, grace: Duration) {
        tracing::info!("Shutting down, cleaning up hosts entries");
        if let Err(e) = self.manager.cleanup(&Cancellation::with_timeout(grace)) {
            tracing::error!(error = %e, "Failed to clean up hosts file on shutdown");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;

    fn state(key: &str, hosts: &[&str], ip: Option<&str>) -> ObjectState {
        ObjectState {
            key: key.to_string(),
            hostnames: hosts.iter().map(ToString::to_string).collect(),
            ip: ip.map(ToString::to_string),
        }
    }

    fn reconciler(dir: &tempfile::TempDir) -> Reconciler {
        let manager =
            HostsManager::new(SyncConfig::new(dir.path().join("hosts")).with_marker("TEST"))
                .unwrap();
        Reconciler::new(Arc::new(manager)).with_requeue_delay(Duration::from_secs(7))
    }

    #[test]
    fn normalized_hostnames_drop_empty_and_repeats() {
        let s = state("k", &["b.test", "", "a.test", "b.test"], None);
        assert_eq!(s.normalized_hostnames(), ["b.test", "a.test"]);
    }

    #[test]
    fn empty_ip_is_unassigned() {
        assert_eq!(state("k", &[], Some("")).assigned_ip(), None);
        assert_eq!(state("k", &[], Some("10.0.0.1")).assigned_ip(), Some("10.0.0.1"));
    }

    #[test]
    fn relevance_filter() {
        let base = state("k", &["a.test", "b.test"], Some("10.0.0.1"));

        assert!(!hosts_relevant_change(&base, &state("k", &["b.test", "a.test"], Some("10.0.0.1"))));
        assert!(!hosts_relevant_change(&base, &state("k", &["a.test", "b.test", "a.test"], Some("10.0.0.1"))));
        assert!(hosts_relevant_change(&base, &state("k", &["a.test"], Some("10.0.0.1"))));
        assert!(hosts_relevant_change(&base, &state("k", &["a.test", "c.test"], Some("10.0.0.1"))));
        assert!(hosts_relevant_change(&base, &state("k", &["a.test", "b.test"], Some("10.0.0.2"))));
        assert!(hosts_relevant_change(&base, &state("k", &["a.test", "b.test"], None)));
        assert!(!hosts_relevant_change(
            &state("k", &[], None),
            &state("k", &[], Some(""))
        ));
    }

    #[test]
    fn deserializes_json_events() {
        let applied: ObjectEvent = serde_json::from_str(
            r#"{"event":"applied","key":"ns/web","hostnames":["web.test"],"ip":"10.0.0.5"}"#,
        )
        .unwrap();
        assert_eq!(
            applied,
            ObjectEvent::Applied(state("ns/web", &["web.test"], Some("10.0.0.5")))
        );

        let pending: ObjectEvent =
            serde_json::from_str(r#"{"event":"applied","key":"ns/web"}"#).unwrap();
        assert_eq!(pending, ObjectEvent::Applied(state("ns/web", &[], None)));

        let deleted: ObjectEvent =
            serde_json::from_str(r#"{"event":"deleted","key":"ns/web"}"#).unwrap();
        assert_eq!(deleted.key(), "ns/web");
    }

    #[test]
    fn applied_with_ip_syncs() {
        let dir = tempfile::tempdir().unwrap();
        let r = reconciler(&dir);
        let ev = ObjectEvent::Applied(state("ns/web", &["web.test", "web.test", "www.test"], Some("10.0.0.5")));

        assert_eq!(
            r.reconcile(&ev, &Cancellation::none()).unwrap(),
            Action::Synced { entries: 2 }
        );
        assert_eq!(r.manager().len(), 1);
    }

    #[test]
    fn applied_without_ip_requeues_without_touching_store() {
        let dir = tempfile::tempdir().unwrap();
        let r = reconciler(&dir);
        let ev = ObjectEvent::Applied(state("ns/web", &["web.test"], Some("")));

        assert_eq!(
            r.reconcile(&ev, &Cancellation::none()).unwrap(),
            Action::RequeueAfter(Duration::from_secs(7))
        );
        assert!(r.manager().is_empty());
        assert!(!dir.path().join("hosts").exists());
    }

    #[test]
    fn applied_without_hostnames_or_deleted_removes() {
        let dir = tempfile::tempdir().unwrap();
        let r = reconciler(&dir);
        let cancel = Cancellation::none();

        r.reconcile(&ObjectEvent::Applied(state("a", &["a.test"], Some("10.0.0.1"))), &cancel)
            .unwrap();
        r.reconcile(&ObjectEvent::Applied(state("b", &["b.test"], Some("10.0.0.2"))), &cancel)
            .unwrap();

        let action = r
            .reconcile(&ObjectEvent::Applied(state("a", &[""], Some("10.0.0.1"))), &cancel)
            .unwrap();
        assert_eq!(action, Action::Removed);

        let action = r
            .reconcile(&ObjectEvent::Deleted { key: "b".into() }, &cancel)
            .unwrap();
        assert_eq!(action, Action::Removed);
        assert!(r.manager().is_empty());
    }

    #[test]
    fn invalid_ip_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let r = reconciler(&dir);
        let ev = ObjectEvent::Applied(state("k", &["a.test"], Some("lb.example.com")));
        assert!(r.reconcile(&ev, &Cancellation::none()).unwrap_err().is_validation());
    }

    #[test]
    fn shutdown_clears_region() {
        let dir = tempfile::tempdir().unwrap();
        let r = reconciler(&dir);
        r.reconcile(
            &ObjectEvent::Applied(state("k", &["a.test"], Some("10.0.0.1"))),
            &Cancellation::none(),
        )
        .unwrap();

        r.shutdown(DEFAULT_SHUTDOWN_GRACE);
        assert!(r.manager().is_empty());
        let content = std::fs::read_to_string(dir.path().join("hosts")).unwrap();
        assert!(!content.contains("BEGIN"));
    }
}
