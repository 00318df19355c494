//! Session lifecycle: models, registries and health monitoring.
//!
//! A session ties one authenticated user to one running instance of one
//! service. All session state is in-memory and process-lifetime; an
//! instance orphaned by a crash is reclaimed by the next engine prune.

mod monitor;
mod registry;

pub use monitor::{MonitorContext, MonitorHandle, MonitorSet, spawn_monitor};
pub use registry::{InstanceSet, SessionRegistry};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identity of a session: one user on one service.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub service_id: String,
    pub username: String,
}

impl SessionKey {
    /// Create a key for `username` on `service_id`.
    pub fn new(service_id: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            service_id: service_id.into(),
            username: username.into(),
        }
    }
}

impl std::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.service_id, self.username)
    }
}

/// Lifecycle state of a launched instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    /// Launched, readiness not yet observed.
    Starting,
    /// Readiness observed; serving.
    Running,
    /// Stopped by monitor teardown or shutdown.
    Stopped,
}

impl std::fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InstanceStatus::Starting => write!(f, "starting"),
            InstanceStatus::Running => write!(f, "running"),
            InstanceStatus::Stopped => write!(f, "stopped"),
        }
    }
}

/// A launched instance as tracked by this process.
///
/// The record is owned by one actor at a time: the launcher while starting,
/// the session's monitor while serving, the shutdown coordinator during
/// shutdown. The authoritative status lives in the [`InstanceSet`].
#[derive(Debug, Clone)]
pub struct RunningInstance {
    /// Engine-assigned instance ID.
    pub id: String,
    /// Instance name (`<service>-<host_port>`).
    pub name: String,
    /// Host port the instance is published on.
    pub host_port: u16,
    /// Internal network address, labeled when enforcement is on.
    pub address: String,
    /// Current lifecycle state.
    pub status: InstanceStatus,
}

/// An established session.
#[derive(Debug, Clone)]
pub struct Session {
    /// Owning user.
    pub username: String,
    /// Service in use.
    pub service_id: String,
    /// The instance serving this session.
    pub instance: RunningInstance,
    /// Credential forwarded to the client at login.
    pub token: String,
    /// When the login completed.
    pub started_at: DateTime<Utc>,
}

impl Session {
    /// Key identifying this session.
    pub fn key(&self) -> SessionKey {
        SessionKey::new(&self.service_id, &self.username)
    }
}
