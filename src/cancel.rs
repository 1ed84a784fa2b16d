//! Cooperative cancellation for store operations.

use crate::error::{HostsError, Result};
#[cfg(test)]
use std::sync::Arc;
#[cfg(test)]
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// A cancellation signal checked at lock and commit boundaries.
///
/// Combines an optional [`CancellationToken`] with an optional deadline.
/// Either firing makes [`check`](Self::check) fail. Checks are cooperative:
/// a commit that has already started is never interrupted.
#[derive(Debug, Clone, Default)]
pub struct Cancellation {
    token: Option<CancellationToken>,
    deadline: Option<Instant>,
    #[cfg(test)]
    checks_left: Option<Arc<AtomicUsize>>,
}

impl Cancellation {
    /// A signal that never fires.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// A signal that fires `timeout` from now.
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::none().deadline(Instant::now() + timeout)
    }

    /// A signal that fires when `token` is cancelled.
    #[must_use]
    pub fn with_token(token: CancellationToken) -> Self {
        Self::none().token(token)
    }

    /// Adds (or replaces) the token.
    #[must_use]
    pub fn token(mut self, token: CancellationToken) -> Self {
        self.token = Some(token);
        self
    }

    /// Adds (or replaces) the deadline.
    #[must_use]
    pub const fn deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// A signal that passes the first `checks` checks and fires on the next,
    /// shared across clones.
    #[cfg(test)]
    pub(crate) fn after_checks(checks: usize) -> Self {
        Self {
            checks_left: Some(Arc::new(AtomicUsize::new(checks))),
            ..Self::default()
        }
    }

    /// Returns `true` if the token fired or the deadline passed.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.check().is_err()
    }

    /// Fails with [`HostsError::Cancelled`] once the signal has fired.
    ///
    /// # Errors
    ///
    /// Returns [`HostsError::Cancelled`] naming the trigger.
    pub fn check(&self) -> Result<()> {
        if self.token.as_ref().is_some_and(CancellationToken::is_cancelled) {
            return Err(HostsError::Cancelled {
                reason: "cancellation requested",
            });
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(HostsError::Cancelled {
                reason: "deadline exceeded",
            });
        }
        #[cfg(test)]
        self.spend_check()?;
        Ok(())
    }

    #[cfg(test)]
    fn spend_check(&self) -> Result<()> {
        let Some(left) = &self.checks_left else {
            return Ok(());
        };
        left.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .map(drop)
            .map_err(|_| HostsError::Cancelled {
                reason: "cancellation requested",
            })
    }
}

impl From<CancellationToken> for Cancellation {
    fn from(token: CancellationToken) -> Self {
        Self::with_token(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_never_fires() {
        assert!(Cancellation::none().check().is_ok());
    }

    #[test]
    fn token_fires() {
        let token = CancellationToken::new();
        let cancel = Cancellation::from(token.clone());
        assert!(!cancel.is_cancelled());

        token.cancel();
        let err = cancel.check().unwrap_err();
        assert!(matches!(err, HostsError::Cancelled { reason } if reason == "cancellation requested"));
    }

    #[test]
    fn elapsed_deadline_fires() {
        let cancel = Cancellation::with_timeout(Duration::ZERO);
        let err = cancel.check().unwrap_err();
        assert!(matches!(err, HostsError::Cancelled { reason } if reason == "deadline exceeded"));
    }

    #[test]
    fn future_deadline_does_not_fire() {
        assert!(!Cancellation::with_timeout(Duration::from_secs(60)).is_cancelled());
    }

    #[test]
    fn check_budget_is_shared_by_clones() {
        let cancel = Cancellation::after_checks(2);
        let clone = cancel.clone();
        assert!(cancel.check().is_ok());
        assert!(clone.check().is_ok());
        assert!(cancel.check().unwrap_err().is_cancelled());
        assert!(clone.check().unwrap_err().is_cancelled());
    }
}
