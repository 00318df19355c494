//! Request handlers.

use axum::{
    Form, Json,
    extract::State,
    http::header::SET_COOKIE,
    response::{AppendHeaders, IntoResponse},
};
use chrono::Utc;
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::session::{RunningInstance, Session, SessionKey, SessionRegistry, spawn_monitor};

use super::error::{ApiError, ApiResult};
use super::state::AppState;

/// Body of a service request.
#[derive(Debug, Deserialize)]
pub struct ServiceRequestForm {
    /// Requested service ID.
    pub service: String,
    /// Requesting user.
    pub username: String,
}

/// Successful service-request response.
#[derive(Debug, Serialize)]
pub struct ServiceRequestResponse {
    pub message: String,
    /// URL the client should redirect to.
    pub url: String,
}

/// Runtime self health response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// `GET /health` — liveness of the orchestrator itself.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Releases a reserved session slot unless the session was established.
///
/// Every early return between reservation and monitor spawn goes through
/// this guard, so a failed request can never leave its user permanently
/// blocked from the service.
struct SlotGuard<'a> {
    registry: &'a SessionRegistry,
    key: SessionKey,
    armed: bool,
}

impl<'a> SlotGuard<'a> {
    fn new(registry: &'a SessionRegistry, key: SessionKey) -> Self {
        Self {
            registry,
            key,
            armed: true,
        }
    }

    /// The session is established; the monitor owns the slot from here.
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.registry.release(&self.key);
        }
    }
}

/// `POST /service_request` — provision an instance for one user session.
///
/// Flow: catalog lookup, authorization, atomic reservation, port
/// allocation, launch (bounded readiness wait), labeling, login forward,
/// then session registration and monitor spawn. Failures after launch
/// reclaim the instance before the error is surfaced.
pub async fn service_request(
    State(state): State<AppState>,
    Form(form): Form<ServiceRequestForm>,
) -> ApiResult<impl IntoResponse> {
    let descriptor = state
        .catalog
        .get(&form.service)
        .ok_or_else(|| ApiError::invalid_service("This is not a valid service"))?;

    let role = state
        .authorizer
        .resolve_authorization(&form.username)
        .await?
        .ok_or_else(|| ApiError::invalid_credentials("Given credentials are not valid"))?;

    let key = SessionKey::new(form.service.clone(), form.username.clone());
    if !state.registry.try_reserve(&key) {
        return Err(ApiError::session_conflict(
            "User already has an active session for this service",
        ));
    }
    let slot = SlotGuard::new(&state.registry, key.clone());

    let host_port = state
        .allocator
        .allocate(&descriptor.service_id)
        .ok_or_else(|| ApiError::internal("no port counter for service"))?;

    let instance = state.launcher.start(&descriptor, role, host_port).await?;

    if let Err(err) = state.labeler.apply(&instance.address, role).await {
        // Label was never applied, so only the instance needs reclaiming.
        abort_instance(&state, &instance, false).await;
        return Err(err.into());
    }

    let token = match state
        .forwarder
        .login(&descriptor, host_port, &form.username)
        .await
    {
        Ok(token) => token,
        Err(err) => {
            // Unlabel and stop before the error reaches the client.
            abort_instance(&state, &instance, true).await;
            return Err(err.into());
        }
    };

    state.registry.attach(Session {
        username: form.username.clone(),
        service_id: descriptor.service_id.clone(),
        instance: instance.clone(),
        token: token.clone(),
        started_at: Utc::now(),
    });

    spawn_monitor(
        state.monitor_ctx.clone(),
        key,
        instance,
        descriptor.health_check_url(host_port),
    );
    slot.disarm();

    info!(
        "Session established for {} on {} (port {})",
        form.username, descriptor.service_id, host_port
    );

    Ok((
        AppendHeaders([(SET_COOKIE, format!("session={}; Path=/", token))]),
        Json(ServiceRequestResponse {
            message: "Service request was successful".to_string(),
            url: descriptor.base_url(host_port),
        }),
    ))
}

/// Reclaim an instance after a failed provisioning step.
///
/// Runs before the triggering error is returned, so cleanup cannot be
/// skipped by the error short-circuiting the handler.
async fn abort_instance(state: &AppState, instance: &RunningInstance, labeled: bool) {
    if labeled
        && let Err(err) = state.labeler.clear(&instance.address).await
    {
        warn!("Failed to clear label on {}: {}", instance.address, err);
    }

    if let Err(err) = state.engine.stop(&instance.id).await {
        warn!("Failed to stop instance {}: {}", instance.name, err);
    }
    state
        .instances
        .set_status(&instance.id, crate::session::InstanceStatus::Stopped);
}
