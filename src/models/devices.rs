use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Organization scopes devices, templates and VPN servers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Organization {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    /// Organization-level variables, layered over the system context
    #[serde(default)]
    pub context: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateOrganizationRequest {
    pub name: String,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub context: HashMap<String, String>,
}

impl Organization {
    pub fn new(name: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            slug: crate::utils::slugify(name),
            context: HashMap::new(),
            created_at: Utc::now(),
        }
    }
}

/// Device represents a managed network device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub id: Uuid,
    pub name: String,
    pub mac_address: String,
    pub key: String,
    pub organization: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// CreateDeviceRequest for creating new devices, optionally with their config
#[derive(Debug, Clone, Deserialize)]
pub struct CreateDeviceRequest {
    pub name: String,
    pub mac_address: String,
    #[serde(default)]
    pub key: Option<String>,
    pub organization: Uuid,
    /// Backend of the config created alongside the device
    #[serde(default)]
    pub backend: Option<String>,
}

impl Device {
    pub fn new(name: &str, mac_address: &str, organization: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            mac_address: crate::utils::normalize_mac(mac_address),
            key: crate::utils::generate_device_key(),
            organization,
            created_at: now,
            updated_at: now,
        }
    }
}
