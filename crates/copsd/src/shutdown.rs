//! Graceful process shutdown.
//!
//! The coordinator drains health monitors, reclaims every instance this
//! process launched, and leaves the engine clean. The sequence is
//! best-effort, not atomic: a monitor still finishing its own teardown can
//! race the instance sweep, which tolerates already-stopped instances.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};

use crate::engine::ContainerEngine;
use crate::label::Labeler;
use crate::session::{InstanceSet, InstanceStatus, MonitorSet};

/// Orchestrates ordered, bounded teardown on process termination.
pub struct ShutdownCoordinator {
    monitors: Arc<MonitorSet>,
    instances: Arc<InstanceSet>,
    engine: Arc<dyn ContainerEngine>,
    labeler: Arc<dyn Labeler>,
    /// How long to wait on each monitor before abandoning it.
    join_timeout: Duration,
}

impl ShutdownCoordinator {
    /// Create a coordinator over the process-wide session state.
    pub fn new(
        monitors: Arc<MonitorSet>,
        instances: Arc<InstanceSet>,
        engine: Arc<dyn ContainerEngine>,
        labeler: Arc<dyn Labeler>,
        join_timeout: Duration,
    ) -> Self {
        Self {
            monitors,
            instances,
            engine,
            labeler,
            join_timeout,
        }
    }

    /// Run the shutdown sequence to completion.
    pub async fn run(&self) {
        info!("Shutting down; draining monitors and reclaiming instances");

        self.drain_monitors().await;
        self.reclaim_instances().await;
        self.sweep_engine().await;

        if let Err(err) = self.engine.prune().await {
            warn!("Failed to prune stopped instances: {}", err);
        }

        info!("Shutdown complete");
    }

    /// Cancel every monitor, then wait on each with a bounded join.
    /// Monitors that do not finish in time are abandoned, not aborted.
    async fn drain_monitors(&self) {
        let drained = self.monitors.drain();
        if drained.is_empty() {
            return;
        }
        info!("Waiting on {} monitor(s)", drained.len());

        for (_, handle) in &drained {
            handle.cancel.cancel();
        }

        for (key, handle) in drained {
            match tokio::time::timeout(self.join_timeout, handle.join).await {
                Ok(Ok(())) => debug!("Monitor for {} finished", key),
                Ok(Err(err)) => warn!("Monitor for {} failed: {}", key, err),
                Err(_) => warn!(
                    "Monitor for {} did not finish within {:?}; abandoning it",
                    key, self.join_timeout
                ),
            }
        }
    }

    /// Unlabel and stop every tracked instance not already stopped.
    async fn reclaim_instances(&self) {
        let active = self.instances.snapshot_active();
        if active.is_empty() {
            info!("No active instances to stop");
            return;
        }
        info!("Stopping {} instance(s)", active.len());

        for instance in active {
            if !instance.address.is_empty()
                && let Err(err) = self.labeler.clear(&instance.address).await
            {
                warn!("Failed to clear label on {}: {}", instance.address, err);
            }

            match self.engine.stop(&instance.id).await {
                Ok(()) => info!("Stopped instance {}", instance.name),
                Err(err) => warn!("Failed to stop instance {}: {}", instance.name, err),
            }
            self.instances.set_status(&instance.id, InstanceStatus::Stopped);
        }
    }

    /// Stop anything the engine still reports running that the tracked set
    /// missed; the runtime assumes it owns this engine.
    async fn sweep_engine(&self) {
        let summaries = match self.engine.list().await {
            Ok(summaries) => summaries,
            Err(err) => {
                warn!("Could not list instances for the final sweep: {}", err);
                return;
            }
        };

        for summary in summaries.iter().filter(|s| s.is_running()) {
            if self.instances.get(&summary.id).is_some() {
                continue;
            }
            warn!("Stopping unmanaged instance {}", summary.id);
            if let Err(err) = self.engine.stop(&summary.id).await {
                warn!("Failed to stop unmanaged instance {}: {}", summary.id, err);
            }
        }
    }
}
