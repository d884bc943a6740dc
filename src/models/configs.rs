use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// Config status lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigStatus {
    Modified,
    Applied,
    Error,
}

impl ConfigStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Modified => "modified",
            Self::Applied => "applied",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for ConfigStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Config is the effective configuration of one device: applied templates
/// (order matters, later wins) plus local overrides
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub id: Uuid,
    pub device: Uuid,
    pub backend: String,
    pub templates: Vec<Uuid>,
    /// Local overrides merged after every template
    pub config: Value,
    /// Local variables, layered over template default values
    pub context: HashMap<String, String>,
    pub status: ConfigStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// CreateConfigRequest for attaching a config to a device
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateConfigRequest {
    pub device: Uuid,
    #[serde(default)]
    pub backend: Option<String>,
    #[serde(default)]
    pub config: Option<Value>,
    #[serde(default)]
    pub context: HashMap<String, String>,
}

/// UpdateConfigRequest replaces local overrides and/or variables
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateConfigRequest {
    #[serde(default)]
    pub config: Option<Value>,
    #[serde(default)]
    pub context: Option<HashMap<String, String>>,
}

/// RenderedConfigResponse wraps the rendered output
#[derive(Debug, Clone, Serialize)]
pub struct RenderedConfigResponse {
    pub config: Uuid,
    pub backend: String,
    pub output: String,
}

impl Config {
    pub fn new(device: Uuid, backend: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            device,
            backend: backend.to_string(),
            templates: Vec::new(),
            config: Value::Object(Default::default()),
            context: HashMap::new(),
            status: ConfigStatus::Modified,
            created_at: now,
            updated_at: now,
        }
    }
}
