//! Context resolution for variable substitution.
//!
//! Resolution order (lowest → highest priority):
//! 1. System context (process-wide defaults from configuration)
//! 2. Organization variables
//! 3. Entity-local values (template default values, config variables,
//!    VPN client variables, device-derived values)
//!
//! The system layer is an immutable snapshot. Every resolution starts from
//! a fresh copy of it, so nothing a caller does with a resolved context can
//! leak back into the process-wide defaults.

use std::collections::HashMap;
use std::sync::Arc;

use crate::models::{Device, Organization, Template};

/// Immutable, cheaply clonable snapshot of the process-wide default context
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SystemContext(Arc<HashMap<String, String>>);

impl SystemContext {
    pub fn new(values: HashMap<String, String>) -> Self {
        Self(Arc::new(values))
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Owned copy of the snapshot, safe to mutate
    pub fn to_map(&self) -> HashMap<String, String> {
        (*self.0).clone()
    }
}

/// One named layer of variables
#[derive(Debug, Clone)]
pub struct ContextLayer {
    pub source: &'static str,
    pub variables: HashMap<String, String>,
}

impl ContextLayer {
    pub fn new(source: &'static str, variables: HashMap<String, String>) -> Self {
        Self { source, variables }
    }
}

/// Merges context layers on top of the system snapshot
#[derive(Debug, Clone, Default)]
pub struct ContextResolver {
    system: SystemContext,
}

impl ContextResolver {
    pub fn new(system: SystemContext) -> Self {
        Self { system }
    }

    pub fn system(&self) -> &SystemContext {
        &self.system
    }

    /// Merge layers left-to-right on top of a copy of the system context
    pub fn resolve(&self, layers: &[ContextLayer]) -> HashMap<String, String> {
        let mut merged = self.system.to_map();
        for layer in layers {
            for (key, value) in &layer.variables {
                merged.insert(key.clone(), value.clone());
            }
        }
        merged
    }

    /// System and organization layers only, never entity-local values
    pub fn system_context(&self, organization: Option<&Organization>) -> HashMap<String, String> {
        self.resolve(&organization_layer(organization))
    }

    pub fn template_context(
        &self,
        template: &Template,
        organization: Option<&Organization>,
    ) -> HashMap<String, String> {
        let mut layers = organization_layer(organization);
        layers.push(ContextLayer::new("template", template_values(template)));
        self.resolve(&layers)
    }

    /// Context used to render a device config: each applied template's
    /// default values in order, then the config's own variables, then VPN
    /// client variables, then device-derived values.
    pub fn config_context(
        &self,
        device: &Device,
        organization: Option<&Organization>,
        templates: &[&Template],
        config_variables: &HashMap<String, String>,
        vpn_variables: HashMap<String, String>,
    ) -> HashMap<String, String> {
        let mut layers = organization_layer(organization);
        for template in templates {
            layers.push(ContextLayer::new("template", template_values(template)));
        }
        layers.push(ContextLayer::new("config", config_variables.clone()));
        layers.push(ContextLayer::new("vpn", vpn_variables));
        layers.push(ContextLayer::new("device", device_values(device)));
        self.resolve(&layers)
    }
}

fn organization_layer(organization: Option<&Organization>) -> Vec<ContextLayer> {
    organization
        .map(|org| vec![ContextLayer::new("organization", org.context.clone())])
        .unwrap_or_default()
}

fn template_values(template: &Template) -> HashMap<String, String> {
    template
        .default_values
        .as_object()
        .map(flatten_object)
        .unwrap_or_default()
}

fn device_values(device: &Device) -> HashMap<String, String> {
    HashMap::from([
        ("id".to_string(), device.id.to_string()),
        ("name".to_string(), device.name.clone()),
        ("mac_address".to_string(), device.mac_address.clone()),
        ("key".to_string(), device.key.clone()),
    ])
}

/// Flatten a JSON object into string variables. Strings are taken as-is,
/// everything else keeps its JSON text form.
pub fn flatten_object(map: &serde_json::Map<String, serde_json::Value>) -> HashMap<String, String> {
    map.iter()
        .map(|(key, value)| {
            let text = match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (key.clone(), text)
        })
        .collect()
}
