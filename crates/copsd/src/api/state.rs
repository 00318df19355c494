//! Application state shared across handlers.

use std::sync::Arc;

use crate::auth::Authorizer;
use crate::catalog::ServiceCatalog;
use crate::engine::ContainerEngine;
use crate::label::Labeler;
use crate::launch::InstanceLauncher;
use crate::login::LoginForwarder;
use crate::ports::PortAllocator;
use crate::session::{InstanceSet, MonitorContext, MonitorSet, SessionRegistry};

/// Everything the request path needs, wired once at startup.
///
/// There is no hidden process-wide state: every component receives its
/// collaborators here, and tests assemble the same struct from fakes.
#[derive(Clone)]
pub struct AppState {
    pub catalog: Arc<ServiceCatalog>,
    pub allocator: Arc<PortAllocator>,
    pub registry: Arc<SessionRegistry>,
    pub instances: Arc<InstanceSet>,
    pub monitors: Arc<MonitorSet>,
    pub engine: Arc<dyn ContainerEngine>,
    pub labeler: Arc<dyn Labeler>,
    pub authorizer: Arc<dyn Authorizer>,
    pub launcher: Arc<InstanceLauncher>,
    pub forwarder: Arc<LoginForwarder>,
    /// Context cloned into each spawned health monitor.
    pub monitor_ctx: MonitorContext,
    /// Allowed CORS origins; empty allows any origin.
    pub cors_origins: Vec<String>,
}
