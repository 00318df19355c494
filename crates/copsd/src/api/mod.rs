//! HTTP API: routes, handlers, state and error mapping.

mod error;
mod handlers;
mod routes;
mod state;

pub use error::{ApiError, ApiResult, ErrorResponse};
pub use handlers::{HealthResponse, ServiceRequestForm, ServiceRequestResponse};
pub use routes::create_router;
pub use state::AppState;
