//! Mandatory-access-control labeling of instance addresses.
//!
//! When enforcement is enabled every instance's network address is labeled
//! with the session's authorized role by an external tool, and the label is
//! cleared again during teardown regardless of why the teardown happened.

use std::process::Stdio;

use async_trait::async_trait;
use log::{debug, info};
use thiserror::Error;
use tokio::process::Command;

use crate::auth::Role;

/// Result type for labeling operations.
pub type LabelResult<T> = Result<T, LabelError>;

/// Errors from the external labeling tool.
#[derive(Debug, Error)]
pub enum LabelError {
    /// The labeling command could not be spawned.
    #[error("labeling command {command} could not run: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The labeling command exited non-zero.
    #[error("labeling command {command} failed with {status}: {stderr}")]
    Failed {
        command: String,
        status: String,
        stderr: String,
    },
}

/// Seam for applying and clearing address labels.
#[async_trait]
pub trait Labeler: Send + Sync {
    /// Label `address` for `role`. A failure here is fatal for the
    /// in-flight request.
    async fn apply(&self, address: &str, role: Role) -> LabelResult<()>;

    /// Remove the label from `address`.
    async fn clear(&self, address: &str) -> LabelResult<()>;
}

/// Labeler shelling out to the platform's labeling executables.
#[derive(Debug, Clone)]
pub struct CommandLabeler {
    apply_command: String,
    clear_command: String,
}

impl CommandLabeler {
    /// Create a labeler with the configured apply/clear commands.
    pub fn new(apply_command: impl Into<String>, clear_command: impl Into<String>) -> Self {
        Self {
            apply_command: apply_command.into(),
            clear_command: clear_command.into(),
        }
    }

    async fn invoke(&self, command: &str, args: &[&str]) -> LabelResult<()> {
        let output = Command::new(command)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|source| LabelError::Spawn {
                command: command.to_string(),
                source,
            })?;

        if !output.status.success() {
            return Err(LabelError::Failed {
                command: command.to_string(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(())
    }
}

#[async_trait]
impl Labeler for CommandLabeler {
    async fn apply(&self, address: &str, role: Role) -> LabelResult<()> {
        info!("Labeling {} as {}", address, role);
        self.invoke(&self.apply_command, &[address, role.as_str()])
            .await
    }

    async fn clear(&self, address: &str) -> LabelResult<()> {
        info!("Clearing label on {}", address);
        self.invoke(&self.clear_command, &[address]).await
    }
}

/// Labeler used when enforcement is disabled; never touches anything.
#[derive(Debug, Clone, Default)]
pub struct NullLabeler;

#[async_trait]
impl Labeler for NullLabeler {
    async fn apply(&self, address: &str, role: Role) -> LabelResult<()> {
        debug!("Enforcement disabled; not labeling {} as {}", address, role);
        Ok(())
    }

    async fn clear(&self, _address: &str) -> LabelResult<()> {
        Ok(())
    }
}
