// # hosts-sync
//
// Keeps the managed region of a hosts file in sync with routing objects.
//
// Two modes:
//
// - `--cleanup`: remove the managed region and exit.
// - default: read object events as JSON lines on stdin and apply them until
//   SIGINT/SIGTERM, then remove the managed region.
//
// Event format, one per line:
//
// ```text
// {"event":"applied","key":"default/web","hostnames":["web.test"],"ip":"10.0.0.5"}
// {"event":"applied","key":"default/api","hostnames":["api.test"]}
// {"event":"deleted","key":"default/web"}
// ```
//
// An `applied` event without an IP is re-delivered after
// `--requeue-delay-secs`. Failed events are retried on the same delay, at
// most `MAX_ATTEMPTS` times in total, unless a newer event for the same key
// arrived meanwhile.

use anyhow::{Context, Result};
use clap::Parser;
use hosts_sync::config::{DEFAULT_HOSTS_FILE, DEFAULT_MARKER};
use hosts_sync::{
    Action, Cancellation, HostsManager, ObjectEvent, ObjectState, Reconciler, SyncConfig,
    hosts_relevant_change,
};
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

/// Deliveries of one event, including the first.
const MAX_ATTEMPTS: u32 = 5;

/// Process exit codes.
#[derive(Debug, Clone, Copy)]
enum HostsExitCode {
    /// Clean shutdown.
    Clean = 0,
    /// Invalid configuration.
    ConfigError = 1,
    /// Failure while running.
    RuntimeError = 2,
}

impl From<HostsExitCode> for ExitCode {
    fn from(code: HostsExitCode) -> Self {
        Self::from(code as u8)
    }
}

#[derive(Parser, Debug)]
#[command(name = "hosts-sync", version, about = "Sync routing object hostnames into a hosts file")]
struct Args {
    /// Path to the hosts file.
    #[arg(long, default_value = DEFAULT_HOSTS_FILE)]
    hosts_file: PathBuf,

    /// Marker delimiting the managed region.
    #[arg(long, default_value = DEFAULT_MARKER)]
    marker: String,

    /// Remove all managed entries and exit.
    #[arg(long)]
    cleanup: bool,

    /// Enable debug logging (overridden by RUST_LOG).
    #[arg(short, long)]
    verbose: bool,

    /// Seconds before re-delivering an unprovisioned or failed event.
    #[arg(long, default_value_t = 30)]
    requeue_delay_secs: u64,

    /// Seconds allowed for the cleanup on shutdown.
    #[arg(long, default_value_t = 5)]
    shutdown_grace_secs: u64,
}

/// One (re)delivery of an event.
#[derive(Debug)]
struct Delivery {
    event: ObjectEvent,
    generation: u64,
    attempt: u32,
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.verbose);

    let config = SyncConfig::new(&args.hosts_file).with_marker(&args.marker);
    let manager = match HostsManager::new(config) {
        Ok(m) => Arc::new(m),
        Err(e) => {
            error!(error = %e, "Invalid configuration");
            return HostsExitCode::ConfigError.into();
        }
    };

    if args.cleanup {
        return match manager.cleanup(&Cancellation::none()) {
            Ok(report) => {
                if report.strategy.is_some() {
                    info!(path = %args.hosts_file.display(), "Cleaned up hosts file");
                } else {
                    info!(path = %args.hosts_file.display(), "No managed region, nothing to clean up");
                }
                HostsExitCode::Clean.into()
            }
            Err(e) => {
                error!(error = %e, "Failed to clean up hosts file");
                HostsExitCode::RuntimeError.into()
            }
        };
    }

    let rt = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "Failed to start runtime");
            return HostsExitCode::RuntimeError.into();
        }
    };

    let reconciler = Reconciler::new(manager)
        .with_requeue_delay(Duration::from_secs(args.requeue_delay_secs));
    let grace = Duration::from_secs(args.shutdown_grace_secs);

    rt.block_on(async {
        if let Err(e) = run(reconciler, grace).await {
            error!(error = %format!("{e:#}"), "Controller failed");
            HostsExitCode::RuntimeError
        } else {
            HostsExitCode::Clean
        }
    })
    .into()
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Applies stdin events until a shutdown signal, then cleans up.
async fn run(reconciler: Reconciler, grace: Duration) -> Result<()> {
    let token = CancellationToken::new();
    let (tx, mut rx) = mpsc::unbounded_channel::<Delivery>();
    let mut driver = Driver::new(reconciler.clone(), tx.clone(), token.clone());

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    let reader = tokio::spawn(read_events(tx));

    info!(
        path = %reconciler.manager().config().hosts_file.display(),
        marker = %reconciler.manager().config().marker,
        "Starting controller"
    );

    let result = loop {
        tokio::select! {
            signal = &mut shutdown => {
                match signal {
                    Ok(name) => info!(signal = name, "Received shutdown signal"),
                    Err(ref e) => error!(error = %e, "Signal handling failed"),
                }
                break signal.map(|_| ());
            }
            Some(delivery) = rx.recv() => driver.handle(delivery).await,
        }
    };

    token.cancel();
    reader.abort();

    tokio::task::spawn_blocking(move || reconciler.shutdown(grace))
        .await
        .context("shutdown cleanup task panicked")?;

    result
}

/// Sends every parseable stdin line as a first delivery.
async fn read_events(tx: mpsc::UnboundedSender<Delivery>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut line_no = 0u64;
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                line_no += 1;
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<ObjectEvent>(&line) {
                    Ok(event) => {
                        let delivery = Delivery {
                            event,
                            generation: 0,
                            attempt: 1,
                        };
                        if tx.send(delivery).is_err() {
                            return;
                        }
                    }
                    Err(e) => warn!(line = line_no, error = %e, "Skipping malformed event"),
                }
            }
            Ok(None) => {
                info!("Event input closed, waiting for shutdown signal");
                return;
            }
            Err(e) => {
                error!(error = %e, "Failed to read events");
                return;
            }
        }
    }
}

/// Per-key bookkeeping around the reconciler.
struct Driver {
    reconciler: Reconciler,
    requeue: mpsc::UnboundedSender<Delivery>,
    token: CancellationToken,
    /// Latest generation seen per key; older re-deliveries are dropped.
    generations: HashMap<String, u64>,
    /// Last successfully applied state per key.
    applied: HashMap<String, ObjectState>,
    next_generation: u64,
}

impl Driver {
    fn new(
        reconciler: Reconciler,
        requeue: mpsc::UnboundedSender<Delivery>,
        token: CancellationToken,
    ) -> Self {
        Self {
            reconciler,
            requeue,
            token,
            generations: HashMap::new(),
            applied: HashMap::new(),
            next_generation: 1,
        }
    }

    async fn handle(&mut self, mut delivery: Delivery) {
        let key = delivery.event.key().to_string();

        if delivery.generation == 0 {
            if let ObjectEvent::Applied(state) = &delivery.event
                && let Some(previous) = self.applied.get(&key)
                && !hosts_relevant_change(previous, state)
            {
                debug!(key = %key, "Skipping event without hosts-relevant changes");
                return;
            }
            delivery.generation = self.next_generation;
            self.next_generation += 1;
            self.generations.insert(key.clone(), delivery.generation);
        } else if self.generations.get(&key) != Some(&delivery.generation) {
            debug!(key = %key, "Dropping superseded re-delivery");
            return;
        }

        let reconciler = self.reconciler.clone();
        let cancel = Cancellation::with_token(self.token.child_token());
        let event = delivery.event.clone();
        let outcome =
            tokio::task::spawn_blocking(move || reconciler.reconcile(&event, &cancel)).await;

        match outcome {
            Ok(Ok(Action::Synced { entries })) => {
                debug!(key = %key, entries, "Reconciled");
                if let ObjectEvent::Applied(state) = delivery.event {
                    self.applied.insert(key, state);
                }
            }
            Ok(Ok(Action::Removed)) => {
                self.applied.remove(&key);
            }
            Ok(Ok(Action::RequeueAfter(delay))) => self.retry(delivery, delay),
            Ok(Err(e)) if e.is_validation() => {
                error!(key = %key, error = %e, "Rejected object, not retrying");
            }
            Ok(Err(e)) if e.is_cancelled() => debug!(key = %key, "Reconcile cancelled"),
            Ok(Err(e)) => {
                // The table may already hold this state while the file does not.
                self.applied.remove(&key);
                error!(key = %key, attempt = delivery.attempt, error = %e, "Reconcile failed");
                let delay = self.reconciler.requeue_delay();
                self.retry(delivery, delay);
            }
            Err(e) => error!(key = %key, error = %e, "Reconcile task panicked"),
        }
    }

    fn retry(&self, delivery: Delivery, delay: Duration) {
        if delivery.attempt >= MAX_ATTEMPTS {
            warn!(
                key = %delivery.event.key(),
                attempts = delivery.attempt,
                "Giving up on event"
            );
            return;
        }
        let requeue = self.requeue.clone();
        let token = self.token.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = token.cancelled() => {}
                () = tokio::time::sleep(delay) => {
                    let _ = requeue.send(Delivery {
                        attempt: delivery.attempt + 1,
                        ..delivery
                    });
                }
            }
        });
    }
}

/// Waits for SIGTERM or SIGINT and returns its name.
#[cfg(unix)]
async fn shutdown_signal() -> Result<&'static str> {
    let mut sigterm = signal(SignalKind::terminate()).context("failed to set up SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("failed to set up SIGINT handler")?;

    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    })
}

/// Waits for CTRL-C.
#[cfg(not(unix))]
async fn shutdown_signal() -> Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .context("failed to wait for CTRL-C")?;
    Ok("SIGINT")
}
