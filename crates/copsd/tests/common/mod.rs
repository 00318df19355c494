//! Test utilities: fakes for the engine/labeler/authorizer seams and a
//! stub hosted service the orchestrator can log into and probe.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::http::header::SET_COOKIE;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Form, Json, Router, extract::State};
use serde::Deserialize;

use copsd::api::{AppState, create_router};
use copsd::auth::{AuthResult, Authorizer, Role};
use copsd::catalog::ServiceCatalog;
use copsd::config::ServiceEntry;
use copsd::engine::{ContainerEngine, EngineError, EngineResult, InstanceConfig, InstanceSummary};
use copsd::label::{LabelError, LabelResult, Labeler};
use copsd::launch::{InstanceLauncher, LauncherSettings};
use copsd::login::LoginForwarder;
use copsd::ports::PortAllocator;
use copsd::session::{InstanceSet, MonitorContext, MonitorSet, SessionRegistry};

/// One instance tracked by the fake engine.
#[derive(Debug, Clone)]
pub struct FakeInstance {
    pub name: String,
    pub ip: String,
    pub running: bool,
}

/// In-memory engine; every launched instance is immediately ready.
#[derive(Default)]
pub struct FakeEngine {
    next_id: AtomicU32,
    pub instances: Mutex<HashMap<String, FakeInstance>>,
    pub stopped: Mutex<Vec<String>>,
    pub pruned: AtomicBool,
}

#[async_trait]
impl ContainerEngine for FakeEngine {
    async fn run(&self, config: &InstanceConfig) -> EngineResult<String> {
        config.validate()?;
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        let id = format!("inst-{}", n);
        self.instances.lock().unwrap().insert(
            id.clone(),
            FakeInstance {
                name: config.name.clone().unwrap_or_default(),
                ip: format!("172.17.0.{}", n + 2),
                running: true,
            },
        );
        Ok(id)
    }

    async fn stop(&self, id: &str) -> EngineResult<()> {
        self.stopped.lock().unwrap().push(id.to_string());
        if let Some(instance) = self.instances.lock().unwrap().get_mut(id) {
            instance.running = false;
        }
        Ok(())
    }

    async fn logs(&self, _id: &str, _tail: Option<u32>) -> EngineResult<String> {
        Ok("* Running on http://0.0.0.0:5000".to_string())
    }

    async fn ip_address(&self, id: &str) -> EngineResult<String> {
        self.instances
            .lock()
            .unwrap()
            .get(id)
            .map(|instance| instance.ip.clone())
            .ok_or_else(|| EngineError::InstanceNotFound(id.to_string()))
    }

    async fn state_status(&self, id: &str) -> EngineResult<Option<String>> {
        Ok(self.instances.lock().unwrap().get(id).map(|instance| {
            if instance.running {
                "running".to_string()
            } else {
                "exited".to_string()
            }
        }))
    }

    async fn list(&self) -> EngineResult<Vec<InstanceSummary>> {
        Ok(self
            .instances
            .lock()
            .unwrap()
            .iter()
            .map(|(id, instance)| InstanceSummary {
                id: id.clone(),
                names: vec![instance.name.clone()],
                image: "course_manager_test".to_string(),
                state: if instance.running {
                    "running".to_string()
                } else {
                    "exited".to_string()
                },
            })
            .collect())
    }

    async fn prune(&self) -> EngineResult<()> {
        self.pruned.store(true, Ordering::SeqCst);
        self.instances
            .lock()
            .unwrap()
            .retain(|_, instance| instance.running);
        Ok(())
    }

    async fn version(&self) -> EngineResult<String> {
        Ok("{}".to_string())
    }
}

/// Labeler recording every apply and clear.
#[derive(Default)]
pub struct RecordingLabeler {
    pub applied: Mutex<Vec<(String, Role)>>,
    pub cleared: Mutex<Vec<String>>,
    pub fail_apply: AtomicBool,
}

#[async_trait]
impl Labeler for RecordingLabeler {
    async fn apply(&self, address: &str, role: Role) -> LabelResult<()> {
        if self.fail_apply.load(Ordering::SeqCst) {
            return Err(LabelError::Failed {
                command: "iplabel".to_string(),
                status: "exit status: 1".to_string(),
                stderr: "denied".to_string(),
            });
        }
        self.applied
            .lock()
            .unwrap()
            .push((address.to_string(), role));
        Ok(())
    }

    async fn clear(&self, address: &str) -> LabelResult<()> {
        self.cleared.lock().unwrap().push(address.to_string());
        Ok(())
    }
}

/// Authorizer backed by a fixed user table.
pub struct FakeAuthorizer {
    users: HashMap<String, Role>,
}

impl FakeAuthorizer {
    pub fn with_defaults() -> Self {
        Self {
            users: HashMap::from([
                ("student".to_string(), Role::Student),
                ("instructor".to_string(), Role::Instructor),
            ]),
        }
    }
}

#[async_trait]
impl Authorizer for FakeAuthorizer {
    async fn resolve_authorization(&self, username: &str) -> AuthResult<Option<Role>> {
        Ok(self.users.get(username).copied())
    }
}

#[derive(Debug, Deserialize)]
struct StubLoginForm {
    username: String,
}

async fn stub_login(Form(form): Form<StubLoginForm>) -> impl IntoResponse {
    (
        [(SET_COOKIE, format!("session=tok-{}", form.username))],
        Json("Logged in"),
    )
}

async fn stub_health(State(healthy): State<Arc<AtomicBool>>) -> impl IntoResponse {
    if healthy.load(Ordering::SeqCst) {
        (StatusCode::OK, Json("Success"))
    } else {
        (StatusCode::BAD_REQUEST, Json("Unsuccessful"))
    }
}

/// Start a stub hosted service on an ephemeral port.
///
/// Returns the bound port and the switch controlling its health answer.
pub async fn spawn_stub_service() -> (u16, Arc<AtomicBool>) {
    let healthy = Arc::new(AtomicBool::new(true));
    let router = Router::new()
        .route("/api/login", post(stub_login))
        .route("/api/health_check", get(stub_health))
        .with_state(healthy.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    (port, healthy)
}

/// A fully wired application over fakes plus handles for assertions.
pub struct TestHarness {
    pub app: Router,
    pub registry: Arc<SessionRegistry>,
    pub instances: Arc<InstanceSet>,
    pub monitors: Arc<MonitorSet>,
    pub engine: Arc<FakeEngine>,
    pub labeler: Arc<RecordingLabeler>,
    pub healthy: Arc<AtomicBool>,
    pub service_port: u16,
}

/// Health-probe interval used by test monitors.
pub const TEST_MONITOR_INTERVAL: Duration = Duration::from_millis(25);

/// Build the application exactly as `serve` does, with the seams faked
/// and the course_manager port counter seeded to the stub service's port
/// so the first allocation lands on a live listener.
pub async fn test_harness() -> TestHarness {
    let (service_port, healthy) = spawn_stub_service().await;

    let entries = HashMap::from([(
        "course_manager".to_string(),
        ServiceEntry {
            image: "course_manager_test".to_string(),
            first_host_port: service_port,
            ..Default::default()
        },
    )]);

    let catalog = Arc::new(ServiceCatalog::from_entries(&entries));
    let allocator = Arc::new(PortAllocator::from_catalog(&catalog));
    let registry = Arc::new(SessionRegistry::new());
    let instances = Arc::new(InstanceSet::new());
    let monitors = Arc::new(MonitorSet::new());
    let engine = Arc::new(FakeEngine::default());
    let labeler = Arc::new(RecordingLabeler::default());
    let authorizer = Arc::new(FakeAuthorizer::with_defaults());

    let launcher = Arc::new(InstanceLauncher::new(
        engine.clone(),
        instances.clone(),
        LauncherSettings {
            readiness_marker: "Running".to_string(),
            readiness_timeout: Duration::from_secs(2),
            poll_interval: Duration::from_millis(10),
            instance_env: HashMap::from([("POSTGRES_DB".to_string(), "cops".to_string())]),
        },
    ));

    let forwarder = Arc::new(LoginForwarder::new(Duration::from_secs(2)).unwrap());

    let monitor_ctx = MonitorContext {
        registry: registry.clone(),
        instances: instances.clone(),
        monitors: monitors.clone(),
        engine: engine.clone(),
        labeler: labeler.clone(),
        http: reqwest::Client::new(),
        interval: TEST_MONITOR_INTERVAL,
    };

    let state = AppState {
        catalog,
        allocator,
        registry: registry.clone(),
        instances: instances.clone(),
        monitors: monitors.clone(),
        engine: engine.clone(),
        labeler: labeler.clone(),
        authorizer,
        launcher,
        forwarder,
        monitor_ctx,
        cors_origins: Vec::new(),
    };

    TestHarness {
        app: create_router(state),
        registry,
        instances,
        monitors,
        engine,
        labeler,
        healthy,
        service_port,
    }
}
