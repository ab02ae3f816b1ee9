use std::collections::HashMap;

use asinka_transport::TransportConfig;
use asinka_wire::ObjectSchema;

use crate::error::AsinkaError;

/// Client configuration.
///
/// Only `app_id` is required. Builder pattern:
///
/// ```rust
/// use asinka::AsinkaConfig;
///
/// let config = AsinkaConfig::new("com.example.tasks")
///     .app_name("tasks")
///     .server_port(8001);
/// ```
#[derive(Debug, Clone)]
pub struct AsinkaConfig {
    pub app_id: String,
    pub app_name: String,
    pub app_version: String,
    /// Stable per-installation id; defaults to a fresh UUID.
    pub device_id: String,
    /// Human part of the advertised service name.
    pub service_name: String,
    /// TCP listen port. 0 binds an ephemeral port, which is then
    /// advertised.
    pub server_port: u16,
    pub exposed_schemas: Vec<ObjectSchema>,
    pub capabilities: HashMap<String, String>,
    pub transport: TransportConfig,
}

impl AsinkaConfig {
    pub fn new(app_id: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            app_name: String::new(),
            app_version: String::new(),
            device_id: uuid::Uuid::new_v4().to_string(),
            service_name: "default-sync".to_string(),
            server_port: 8888,
            exposed_schemas: Vec::new(),
            capabilities: HashMap::new(),
            transport: TransportConfig::new(),
        }
    }

    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = name.into();
        self
    }

    pub fn app_version(mut self, version: impl Into<String>) -> Self {
        self.app_version = version.into();
        self
    }

    pub fn device_id(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = device_id.into();
        self
    }

    pub fn service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = name.into();
        self
    }

    pub fn server_port(mut self, port: u16) -> Self {
        self.server_port = port;
        self
    }

    pub fn schema(mut self, schema: ObjectSchema) -> Self {
        self.exposed_schemas.push(schema);
        self
    }

    pub fn capability(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.capabilities.insert(key.into(), value.into());
        self
    }

    pub fn transport(mut self, transport: TransportConfig) -> Self {
        self.transport = transport;
        self
    }

    pub(crate) fn validate(&self) -> Result<(), AsinkaError> {
        if self.app_id.is_empty() {
            return Err(AsinkaError::Config("app_id must not be empty".into()));
        }
        if self.device_id.is_empty() {
            return Err(AsinkaError::Config("device_id must not be empty".into()));
        }
        if self.service_name.is_empty() {
            return Err(AsinkaError::Config("service_name must not be empty".into()));
        }
        Ok(())
    }
}
