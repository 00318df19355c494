//! Login forwarding.

use std::time::Duration;

use log::debug;
use thiserror::Error;

use crate::catalog::ServiceDescriptor;

/// Name of the session cookie the hosted services issue.
const SESSION_COOKIE: &str = "session";

/// Errors from the forwarded login handshake.
#[derive(Debug, Error)]
pub enum LoginError {
    /// The login request could not be delivered.
    #[error("login request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The service rejected the login.
    #[error("login rejected with status {0}")]
    Rejected(reqwest::StatusCode),

    /// The service accepted the login but issued no session cookie.
    #[error("login response carried no session cookie")]
    MissingToken,
}

/// Performs the login handshake against a freshly started instance and
/// extracts the session credential to forward to the client.
pub struct LoginForwarder {
    client: reqwest::Client,
}

impl LoginForwarder {
    /// Create a forwarder with the given request timeout.
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    /// Log `username` into the instance of `descriptor` on `host_port`.
    ///
    /// Returns the value of the service's session cookie. Callers own the
    /// cleanup contract: on error the instance must be unlabeled and
    /// stopped before this error reaches the client.
    pub async fn login(
        &self,
        descriptor: &ServiceDescriptor,
        host_port: u16,
        username: &str,
    ) -> Result<String, LoginError> {
        let url = descriptor.login_url(host_port);
        debug!("Forwarding login for {} to {}", username, url);

        let response = self
            .client
            .post(&url)
            .form(&[("username", username)])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(LoginError::Rejected(response.status()));
        }

        response
            .cookies()
            .find(|cookie| cookie.name() == SESSION_COOKIE)
            .map(|cookie| cookie.value().to_string())
            .ok_or(LoginError::MissingToken)
    }
}
