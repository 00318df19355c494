//! Per-session health monitoring.
//!
//! Every established session gets one monitor task. The monitor sleeps a
//! fixed interval, probes the instance's health-check URL, and tears the
//! session down on the first failed probe: no retries, first failure is
//! terminal. Teardown releases the registry slot, clears the label, stops
//! the instance and deregisters the monitor, in that order, exactly once.
//!
//! Monitors also honor a cancellation token so the shutdown coordinator
//! can ask them to stand down; a cancelled monitor exits without touching
//! its instance, because during shutdown the coordinator owns instance
//! teardown.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use log::{debug, info, warn};
use reqwest::StatusCode;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::engine::ContainerEngine;
use crate::label::Labeler;

use super::{InstanceSet, InstanceStatus, RunningInstance, SessionKey, SessionRegistry};

/// Handle to a running monitor task.
pub struct MonitorHandle {
    /// Join handle for the monitor task.
    pub join: JoinHandle<()>,
    /// Token requesting cooperative cancellation.
    pub cancel: CancellationToken,
}

/// Process-wide collection of monitor handles.
///
/// Monitors deregister themselves on teardown; the shutdown coordinator
/// drains whatever is left.
#[derive(Default)]
pub struct MonitorSet {
    inner: DashMap<SessionKey, MonitorHandle>,
}

impl MonitorSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a monitor under its session key.
    pub fn register(&self, key: SessionKey, handle: MonitorHandle) {
        self.inner.insert(key, handle);
    }

    /// Remove the monitor for `key`, returning its handle if present.
    pub fn deregister(&self, key: &SessionKey) -> Option<MonitorHandle> {
        self.inner.remove(key).map(|(_, handle)| handle)
    }

    /// Remove and return every tracked monitor.
    pub fn drain(&self) -> Vec<(SessionKey, MonitorHandle)> {
        let keys: Vec<SessionKey> = self.inner.iter().map(|e| e.key().clone()).collect();
        keys.into_iter()
            .filter_map(|key| self.inner.remove(&key))
            .collect()
    }

    /// Number of live monitors.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Whether no monitors are tracked.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

/// Everything a monitor needs to probe and tear down its session.
#[derive(Clone)]
pub struct MonitorContext {
    pub registry: Arc<SessionRegistry>,
    pub instances: Arc<InstanceSet>,
    pub monitors: Arc<MonitorSet>,
    pub engine: Arc<dyn ContainerEngine>,
    pub labeler: Arc<dyn Labeler>,
    pub http: reqwest::Client,
    /// Time between liveness probes.
    pub interval: Duration,
}

/// Probe verdict for one health check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProbeOutcome {
    /// Session still live.
    Alive,
    /// The service reports the user is gone.
    LoggedOut,
    /// The instance could not be reached.
    Unreachable,
}

/// Classify a completed health-check response.
///
/// The hosted services answer 200 while the user is in session and a
/// non-2xx "Unsuccessful" once the user logs out; a 2xx body carrying
/// "Unsuccessful" is treated the same way.
fn classify_probe(status: StatusCode, body: &str) -> ProbeOutcome {
    if !status.is_success() {
        return ProbeOutcome::LoggedOut;
    }
    if body.trim().trim_matches('"') == "Unsuccessful" {
        return ProbeOutcome::LoggedOut;
    }
    ProbeOutcome::Alive
}

async fn probe(http: &reqwest::Client, url: &str) -> ProbeOutcome {
    match http.get(url).send().await {
        Ok(response) => {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            classify_probe(status, &body)
        }
        Err(err) => {
            debug!("Health probe against {} failed: {}", url, err);
            ProbeOutcome::Unreachable
        }
    }
}

/// Spawn the monitor for an established session and register its handle.
pub fn spawn_monitor(
    ctx: MonitorContext,
    key: SessionKey,
    instance: RunningInstance,
    health_url: String,
) {
    let cancel = CancellationToken::new();
    let child = cancel.clone();
    let monitors = ctx.monitors.clone();
    let task_key = key.clone();

    let join = tokio::spawn(async move {
        run_monitor(ctx, task_key, instance, health_url, child).await;
    });

    monitors.register(key, MonitorHandle { join, cancel });
}

async fn run_monitor(
    ctx: MonitorContext,
    key: SessionKey,
    instance: RunningInstance,
    health_url: String,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Monitor for {} cancelled; leaving instance to the coordinator", key);
                return;
            }
            _ = tokio::time::sleep(ctx.interval) => {}
        }

        match probe(&ctx.http, &health_url).await {
            ProbeOutcome::Alive => continue,
            ProbeOutcome::LoggedOut => {
                info!("User has disconnected from {}", key);
                break;
            }
            ProbeOutcome::Unreachable => {
                warn!("Instance for {} is unreachable", key);
                break;
            }
        }
    }

    tear_down(&ctx, &key, &instance).await;
}

/// Release the session and reclaim its instance. Runs exactly once per
/// monitor, as the only exit from the probe loop besides cancellation.
async fn tear_down(ctx: &MonitorContext, key: &SessionKey, instance: &RunningInstance) {
    info!("Tearing down session {}", key);

    ctx.registry.release(key);

    if let Err(err) = ctx.labeler.clear(&instance.address).await {
        warn!("Failed to clear label on {}: {}", instance.address, err);
    }

    if let Err(err) = ctx.engine.stop(&instance.id).await {
        warn!("Failed to stop instance {}: {}", instance.name, err);
    }
    ctx.instances.set_status(&instance.id, InstanceStatus::Stopped);

    ctx.monitors.deregister(key);
}
