//! Instance configuration and engine-facing data types.

use std::collections::HashMap;

use serde::{Deserialize, Deserializer, Serialize};

use super::error::{EngineError, EngineResult};

/// Port mapping from the host to the instance.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PortMapping {
    /// Port on the host.
    pub host_port: u16,
    /// Port inside the instance.
    pub container_port: u16,
}

impl PortMapping {
    /// Create a new port mapping.
    pub fn new(host_port: u16, container_port: u16) -> Self {
        Self {
            host_port,
            container_port,
        }
    }
}

/// Configuration for launching a new instance.
#[derive(Debug, Clone, Default)]
pub struct InstanceConfig {
    /// Instance name (optional; the engine generates one otherwise).
    pub name: Option<String>,
    /// OCI image to run.
    pub image: String,
    /// Environment variables.
    pub env: HashMap<String, String>,
    /// Host-to-instance port mappings.
    pub ports: Vec<PortMapping>,
}

impl InstanceConfig {
    /// Create a new instance config for the given image.
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            ..Default::default()
        }
    }

    /// Set the instance name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Add an environment variable.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Add multiple environment variables.
    pub fn envs(mut self, envs: HashMap<String, String>) -> Self {
        self.env.extend(envs);
        self
    }

    /// Add a port mapping.
    pub fn port(mut self, host_port: u16, container_port: u16) -> Self {
        self.ports.push(PortMapping::new(host_port, container_port));
        self
    }

    /// Validate all fields before handing the config to the engine.
    ///
    /// Everything in here ends up on an engine command line, so reject
    /// anything that is not safe and well-formed.
    pub fn validate(&self) -> EngineResult<()> {
        validate_image_name(&self.image)?;

        if let Some(ref name) = self.name {
            validate_instance_name(name)?;
        }

        for key in self.env.keys() {
            validate_env_var_key(key)?;
        }

        for port in &self.ports {
            if port.host_port == 0 || port.container_port == 0 {
                return Err(EngineError::InvalidInput(
                    "port mapping cannot use port 0".to_string(),
                ));
            }
        }

        Ok(())
    }
}

/// Deserialize a field that the engine reports as either a single string or
/// a list of strings (docker prints `Names` as a string, podman as a list).
fn deserialize_string_or_seq<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::{self, SeqAccess, Visitor};
    use std::fmt;

    struct StringOrSeq;

    impl<'de> Visitor<'de> for StringOrSeq {
        type Value = Vec<String>;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a string or a sequence of strings")
        }

        fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(vec![value.to_string()])
        }

        fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
        where
            A: SeqAccess<'de>,
        {
            let mut names = Vec::new();
            while let Some(name) = seq.next_element::<String>()? {
                names.push(name);
            }
            Ok(names)
        }
    }

    deserializer.deserialize_any(StringOrSeq)
}

/// One row of `ps --format json` output.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct InstanceSummary {
    /// Instance ID.
    #[serde(alias = "ID")]
    pub id: String,

    /// Instance names.
    #[serde(default, deserialize_with = "deserialize_string_or_seq")]
    pub names: Vec<String>,

    /// Image used.
    #[serde(default)]
    pub image: String,

    /// State string (e.g. "running", "exited").
    #[serde(default)]
    pub state: String,
}

impl InstanceSummary {
    /// Whether the engine reports this instance as running.
    pub fn is_running(&self) -> bool {
        self.state.eq_ignore_ascii_case("running")
    }
}

// ============================================================================
// Input Validation Functions
// ============================================================================

/// Validate an OCI image name.
///
/// Image names follow `[registry/][namespace/]name[:tag][@digest]`.
/// Valid characters: alphanumeric, `.`, `-`, `_`, `/`, `:`, `@`.
pub fn validate_image_name(image: &str) -> EngineResult<()> {
    if image.is_empty() {
        return Err(EngineError::InvalidInput(
            "image name cannot be empty".to_string(),
        ));
    }

    if image.len() > 256 {
        return Err(EngineError::InvalidInput(
            "image name exceeds maximum length of 256 characters".to_string(),
        ));
    }

    let valid_chars = |c: char| {
        c.is_ascii_alphanumeric()
            || c == '.'
            || c == '-'
            || c == '_'
            || c == '/'
            || c == ':'
            || c == '@'
    };

    if !image.chars().all(valid_chars) {
        return Err(EngineError::InvalidInput(format!(
            "image name '{}' contains invalid characters",
            image
        )));
    }

    if image.contains("..") {
        return Err(EngineError::InvalidInput(
            "image name cannot contain '..'".to_string(),
        ));
    }

    Ok(())
}

/// Validate an instance name or ID.
///
/// Instance IDs are hex strings; names are alphanumeric with `-` and `_`
/// and must start with an alphanumeric character or underscore.
pub fn validate_instance_name(name: &str) -> EngineResult<()> {
    if name.is_empty() {
        return Err(EngineError::InvalidInput(
            "instance name cannot be empty".to_string(),
        ));
    }

    if name.len() > 128 {
        return Err(EngineError::InvalidInput(
            "instance name exceeds maximum length of 128 characters".to_string(),
        ));
    }

    let mut chars = name.chars();
    // Length checked above, so the first character exists.
    if let Some(first) = chars.next()
        && !first.is_ascii_alphanumeric()
        && first != '_'
    {
        return Err(EngineError::InvalidInput(
            "instance name must start with an alphanumeric character or underscore".to_string(),
        ));
    }

    let valid_chars = |c: char| c.is_ascii_alphanumeric() || c == '-' || c == '_';
    if !name.chars().all(valid_chars) {
        return Err(EngineError::InvalidInput(format!(
            "instance name '{}' contains invalid characters",
            name
        )));
    }

    Ok(())
}

/// Validate an environment variable key.
fn validate_env_var_key(key: &str) -> EngineResult<()> {
    if key.is_empty() {
        return Err(EngineError::InvalidInput(
            "environment variable key cannot be empty".to_string(),
        ));
    }

    let mut chars = key.chars();
    if let Some(first) = chars.next()
        && !first.is_ascii_alphabetic()
        && first != '_'
    {
        return Err(EngineError::InvalidInput(format!(
            "environment variable key '{}' must start with a letter or underscore",
            key
        )));
    }

    if !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(EngineError::InvalidInput(format!(
            "environment variable key '{}' contains invalid characters",
            key
        )));
    }

    Ok(())
}
