//! Instance launching and readiness detection.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use thiserror::Error;
use tokio::time::Instant;

use crate::auth::Role;
use crate::catalog::ServiceDescriptor;
use crate::engine::{ContainerEngine, EngineError, InstanceConfig};
use crate::session::{InstanceSet, InstanceStatus, RunningInstance};

/// Errors from launching an instance.
#[derive(Debug, Error)]
pub enum LaunchError {
    /// The engine refused or failed the operation.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// The readiness marker never appeared within the deadline.
    #[error("instance {name} did not report readiness within {waited:?}")]
    ReadinessTimeout { name: String, waited: Duration },
}

/// Launch behavior knobs.
#[derive(Debug, Clone)]
pub struct LauncherSettings {
    /// Log line marker signalling the instance is ready.
    pub readiness_marker: String,
    /// Overall readiness deadline.
    pub readiness_timeout: Duration,
    /// Log poll interval.
    pub poll_interval: Duration,
    /// Environment handed to every instance (data-store connection).
    pub instance_env: HashMap<String, String>,
}

/// Starts instances and blocks the calling task until they are ready.
pub struct InstanceLauncher {
    engine: Arc<dyn ContainerEngine>,
    instances: Arc<InstanceSet>,
    settings: LauncherSettings,
}

impl InstanceLauncher {
    /// Create a launcher over the given engine and instance set.
    pub fn new(
        engine: Arc<dyn ContainerEngine>,
        instances: Arc<InstanceSet>,
        settings: LauncherSettings,
    ) -> Self {
        Self {
            engine,
            instances,
            settings,
        }
    }

    /// Launch an instance of `descriptor` on `host_port` for `role`.
    ///
    /// Blocks until the instance's log output carries the readiness marker,
    /// bounded by the configured deadline. On expiry the half-started
    /// instance is stopped before the error is returned, and the request
    /// fails with a launch failure instead of hanging.
    pub async fn start(
        &self,
        descriptor: &ServiceDescriptor,
        role: Role,
        host_port: u16,
    ) -> Result<RunningInstance, LaunchError> {
        let name = format!("{}-{}", descriptor.service_id, host_port);

        let config = InstanceConfig::new(descriptor.image.clone())
            .name(name.clone())
            .port(host_port, descriptor.internal_port)
            .env("ROLE", role.as_str())
            .envs(self.settings.instance_env.clone());

        info!("Launching {} on host port {}", name, host_port);
        let id = self.engine.run(&config).await?;

        self.instances.register(RunningInstance {
            id: id.clone(),
            name: name.clone(),
            host_port,
            address: String::new(),
            status: InstanceStatus::Starting,
        });

        if let Err(err) = self.wait_ready(&id, &name).await {
            self.abort(&id, &name).await;
            return Err(err);
        }

        let address = match self.engine.ip_address(&id).await {
            Ok(address) => address,
            Err(err) => {
                self.abort(&id, &name).await;
                return Err(err.into());
            }
        };

        self.instances.set_address(&id, &address);
        self.instances.set_status(&id, InstanceStatus::Running);
        info!("Instance {} ready at {}", name, address);

        Ok(RunningInstance {
            id,
            name,
            host_port,
            address,
            status: InstanceStatus::Running,
        })
    }

    /// Poll the instance's logs until the readiness marker appears or the
    /// deadline passes.
    async fn wait_ready(&self, id: &str, name: &str) -> Result<(), LaunchError> {
        let started = Instant::now();
        let deadline = started + self.settings.readiness_timeout;

        loop {
            let logs = self.engine.logs(id, None).await?;
            if logs.contains(&self.settings.readiness_marker) {
                debug!(
                    "Instance {} reported readiness after {:?}",
                    name,
                    started.elapsed()
                );
                return Ok(());
            }

            if Instant::now() >= deadline {
                return Err(LaunchError::ReadinessTimeout {
                    name: name.to_string(),
                    waited: started.elapsed(),
                });
            }

            tokio::time::sleep(self.settings.poll_interval).await;
        }
    }

    /// Stop a half-started instance after a failed launch.
    async fn abort(&self, id: &str, name: &str) {
        warn!("Aborting launch of {}", name);
        if let Err(err) = self.engine.stop(id).await {
            warn!("Failed to stop aborted instance {}: {}", name, err);
        }
        self.instances.set_status(id, InstanceStatus::Stopped);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EngineResult, InstanceSummary};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Engine whose logs become ready after a fixed number of polls.
    struct ScriptedEngine {
        ready_after_polls: Option<u32>,
        polls: AtomicU32,
        stopped: Mutex<Vec<String>>,
    }

    impl ScriptedEngine {
        fn new(ready_after_polls: Option<u32>) -> Self {
            Self {
                ready_after_polls,
                polls: AtomicU32::new(0),
                stopped: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ContainerEngine for ScriptedEngine {
        async fn run(&self, config: &InstanceConfig) -> EngineResult<String> {
            config.validate()?;
            Ok("inst-1".to_string())
        }

        async fn stop(&self, id: &str) -> EngineResult<()> {
            self.stopped.lock().unwrap().push(id.to_string());
            Ok(())
        }

        async fn logs(&self, _id: &str, _tail: Option<u32>) -> EngineResult<String> {
            let poll = self.polls.fetch_add(1, Ordering::SeqCst);
            match self.ready_after_polls {
                Some(n) if poll >= n => Ok("* Running on http://0.0.0.0:5000".to_string()),
                _ => Ok("starting up...".to_string()),
            }
        }

        async fn ip_address(&self, _id: &str) -> EngineResult<String> {
            Ok("172.17.0.2".to_string())
        }

        async fn state_status(&self, _id: &str) -> EngineResult<Option<String>> {
            Ok(Some("running".to_string()))
        }

        async fn list(&self) -> EngineResult<Vec<InstanceSummary>> {
            Ok(vec![])
        }

        async fn prune(&self) -> EngineResult<()> {
            Ok(())
        }

        async fn version(&self) -> EngineResult<String> {
            Ok("{}".to_string())
        }
    }

    fn test_descriptor() -> ServiceDescriptor {
        ServiceDescriptor {
            service_id: "course_manager".to_string(),
            internal_port: 5000,
            image: "course_manager_test".to_string(),
            host: "http://127.0.0.1".to_string(),
            login_path: "/api/login".to_string(),
            health_check_path: "/api/health_check".to_string(),
            first_host_port: 8000,
        }
    }

    fn test_settings() -> LauncherSettings {
        LauncherSettings {
            readiness_marker: "Running".to_string(),
            readiness_timeout: Duration::from_millis(100),
            poll_interval: Duration::from_millis(5),
            instance_env: HashMap::from([("POSTGRES_DB".to_string(), "cops".to_string())]),
        }
    }

    #[tokio::test]
    async fn test_start_waits_for_readiness() {
        let engine = Arc::new(ScriptedEngine::new(Some(2)));
        let instances = Arc::new(InstanceSet::new());
        let launcher = InstanceLauncher::new(engine.clone(), instances.clone(), test_settings());

        let instance = launcher
            .start(&test_descriptor(), Role::Student, 8000)
            .await
            .unwrap();

        assert_eq!(instance.name, "course_manager-8000");
        assert_eq!(instance.address, "172.17.0.2");
        assert_eq!(instance.status, InstanceStatus::Running);
        assert_eq!(
            instances.get(&instance.id).unwrap().status,
            InstanceStatus::Running
        );
        assert!(engine.stopped.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_start_times_out_and_stops_instance() {
        let engine = Arc::new(ScriptedEngine::new(None));
        let instances = Arc::new(InstanceSet::new());
        let launcher = InstanceLauncher::new(engine.clone(), instances.clone(), test_settings());

        let err = launcher
            .start(&test_descriptor(), Role::Student, 8000)
            .await
            .unwrap_err();

        assert!(matches!(err, LaunchError::ReadinessTimeout { .. }));
        // The half-started instance is reclaimed before the error surfaces.
        assert_eq!(*engine.stopped.lock().unwrap(), vec!["inst-1"]);
        assert_eq!(
            instances.get("inst-1").unwrap().status,
            InstanceStatus::Stopped
        );
    }
}
