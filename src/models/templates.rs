use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::backend::{self, Backend};
use crate::validation::ValidationError;

use super::Vpn;

pub const DEFAULT_VALUES_NOT_OBJECT: &str = "the supplied value is not a JSON object";
pub const EMPTY_CONFIG: &str = "The configuration field cannot be empty";
pub const VPN_REQUIRED: &str = "A VPN must be selected when template type is \"VPN\"";
pub const VPN_ORGANIZATION_MISMATCH: &str =
    "Please ensure that the organization of this template and the organization of the related VPN server match";

/// Template kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateType {
    #[default]
    Generic,
    Vpn,
}

/// Template represents a reusable configuration fragment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Template {
    pub id: Uuid,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub backend: String,
    pub config: Value,
    pub default_values: Value,
    #[serde(rename = "type")]
    pub template_type: TemplateType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vpn: Option<Uuid>,
    pub auto_cert: bool,
    pub default: bool,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// CreateTemplateRequest for creating or updating templates
#[derive(Debug, Clone, Deserialize)]
pub struct CreateTemplateRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default)]
    pub config: Value,
    #[serde(default)]
    pub default_values: Value,
    #[serde(default, rename = "type")]
    pub template_type: TemplateType,
    #[serde(default)]
    pub vpn: Option<Uuid>,
    #[serde(default)]
    pub auto_cert: bool,
    #[serde(default)]
    pub default: bool,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub organization: Option<Uuid>,
}

fn default_backend() -> String {
    backend::OPENWRT.to_string()
}

/// TemplatePreviewResponse wraps the rendered output
#[derive(Debug, Clone, Serialize)]
pub struct TemplatePreviewResponse {
    pub output: String,
}

/// CloneTemplateRequest names who asked for the copy
#[derive(Debug, Clone, Deserialize)]
pub struct CloneTemplateRequest {
    #[serde(default = "default_actor")]
    pub actor: String,
}

fn default_actor() -> String {
    "api".to_string()
}

impl Template {
    /// Unsaved generic template with empty default values
    pub fn new(name: &str, backend: &str, config: Value) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            description: None,
            backend: backend.to_string(),
            config,
            default_values: Value::Object(Default::default()),
            template_type: TemplateType::Generic,
            vpn: None,
            auto_cert: false,
            default: false,
            required: false,
            organization: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn from_request(req: CreateTemplateRequest) -> Self {
        let mut template = Self::new(&req.name, &req.backend, req.config);
        template.description = req.description;
        template.default_values = req.default_values;
        template.template_type = req.template_type;
        template.vpn = req.vpn;
        template.auto_cert = req.auto_cert;
        template.default = req.default;
        template.required = req.required;
        template.organization = req.organization;
        template
    }

    /// Apply an update request while keeping identity and creation time
    pub fn apply_request(&mut self, req: CreateTemplateRequest) {
        let id = self.id;
        let created_at = self.created_at;
        *self = Self::from_request(req);
        self.id = id;
        self.created_at = created_at;
    }

    pub fn is_vpn(&self) -> bool {
        self.template_type == TemplateType::Vpn
    }

    /// Normalize fields and check every template invariant. `vpn` is the
    /// VPN referenced by `self.vpn`, if it exists.
    pub fn full_validate(&mut self, vpn: Option<&Vpn>) -> Result<(), ValidationError> {
        let mut errors = ValidationError::default();

        match normalize_default_values(&self.default_values) {
            Some(values) => self.default_values = values,
            None => errors.add("default_values", DEFAULT_VALUES_NOT_OBJECT),
        }

        match self.template_type {
            TemplateType::Generic => {
                self.vpn = None;
                self.auto_cert = false;
            }
            TemplateType::Vpn => match (self.vpn, vpn) {
                (None, _) => errors.add("vpn", VPN_REQUIRED),
                (Some(id), None) => errors.add("vpn", format!("VPN server {} does not exist", id)),
                (Some(_), Some(vpn)) => {
                    if let (Some(org), Some(vpn_org)) = (self.organization, vpn.organization) {
                        if org != vpn_org {
                            errors.add("organization", VPN_ORGANIZATION_MISMATCH);
                        }
                    }
                    if backend::is_empty_config(&self.config) {
                        self.config = vpn.auto_client(self.auto_cert);
                    }
                }
            },
        }

        if self.required {
            self.default = true;
        }

        if self.name.trim().is_empty() {
            errors.add("name", "This field cannot be blank.");
        }

        match Backend::from_path(&self.backend) {
            Ok(backend) => {
                if backend::is_empty_config(&self.config) {
                    errors.add("config", EMPTY_CONFIG);
                } else if let Err(schema) = backend.validate(&self.config) {
                    errors.extend(schema);
                }
            }
            Err(e) => errors.extend(e),
        }

        errors.into_result()
    }

    /// Unsaved copy with a fresh identity, never applied by default
    pub fn clone_for(&self, actor: &str) -> Self {
        let now = Utc::now();
        tracing::info!("Template '{}' ({}) cloned by {}", self.name, self.id, actor);
        Self {
            id: Uuid::new_v4(),
            name: format!("{} (Clone)", self.name),
            default: false,
            required: false,
            created_at: now,
            updated_at: now,
            ..self.clone()
        }
    }

    /// Whether saving `self` over `previous` changes what configs render
    pub fn has_content_changed(&self, previous: &Template) -> bool {
        self.config != previous.config || self.default_values != previous.default_values
    }
}

/// Returns the normalized default values, or None if they cannot be an object.
/// Empty-ish values become `{}`; strings are parsed as JSON.
pub fn normalize_default_values(value: &Value) -> Option<Value> {
    match value {
        Value::Null | Value::Bool(false) => Some(Value::Object(Default::default())),
        Value::Object(_) => Some(value.clone()),
        Value::String(s) if s.trim().is_empty() => Some(Value::Object(Default::default())),
        Value::String(s) => match serde_json::from_str::<Value>(s) {
            Ok(parsed @ Value::Object(_)) => Some(parsed),
            _ => None,
        },
        _ => None,
    }
}
