//! Configuration backends.
//!
//! A backend validates a JSON configuration tree against its schema and
//! compiles it into the textual configuration a device consumes. Templates
//! and configs only ever talk to a backend through [`Backend`].

mod openwrt;

use anyhow::Result;
use regex_lite::Regex;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

use crate::validation::ValidationError;

pub const OPENWRT: &str = "netjsonconfig.OpenWrt";
pub const OPENWISP: &str = "netjsonconfig.OpenWisp";

/// Supported rendering backends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    OpenWrt,
    OpenWisp,
}

impl Backend {
    pub fn from_path(path: &str) -> Result<Self, ValidationError> {
        match path {
            OPENWRT => Ok(Self::OpenWrt),
            OPENWISP => Ok(Self::OpenWisp),
            other => Err(ValidationError::new(
                "backend",
                format!("'{}' is not a supported backend", other),
            )),
        }
    }

    pub fn path(&self) -> &'static str {
        match self {
            Self::OpenWrt => OPENWRT,
            Self::OpenWisp => OPENWISP,
        }
    }

    /// Check a configuration tree against the backend schema
    pub fn validate(&self, config: &Value) -> Result<(), ValidationError> {
        let root = config
            .as_object()
            .ok_or_else(|| schema_error("#", "the configuration must be a JSON object"))?;

        if let Some(general) = root.get("general") {
            if !general.is_object() {
                return Err(schema_error("#/general", "must be an object"));
            }
        }
        if let Some(interfaces) = root.get("interfaces") {
            validate_named_list(interfaces, "interfaces")?;
        }
        if let Some(openvpn) = root.get("openvpn") {
            validate_named_list(openvpn, "openvpn")?;
        }
        if let Some(files) = root.get("files") {
            validate_files(files)?;
        }
        for key in ["dns_servers", "dns_search"] {
            if let Some(list) = root.get(key) {
                let all_strings = list
                    .as_array()
                    .map(|items| items.iter().all(Value::is_string))
                    .unwrap_or(false);
                if !all_strings {
                    return Err(schema_error(&format!("#/{}", key), "must be a list of strings"));
                }
            }
        }
        Ok(())
    }

    /// Validate, substitute variables and compile to configuration text
    pub fn render(&self, config: &Value, context: &HashMap<String, String>) -> Result<String> {
        let resolved = substitute(config, context);
        self.validate(&resolved)?;
        let body = openwrt::render(&resolved)?;
        Ok(match self {
            Self::OpenWrt => body,
            Self::OpenWisp => format!("# openwisp\n{}", body),
        })
    }
}

fn schema_error(pointer: &str, reason: &str) -> ValidationError {
    ValidationError::new(
        "config",
        format!(
            "Invalid configuration triggered by \"{}\", validator says: {}",
            pointer, reason
        ),
    )
}

fn validate_named_list(value: &Value, key: &str) -> Result<(), ValidationError> {
    let items = value
        .as_array()
        .ok_or_else(|| schema_error(&format!("#/{}", key), "must be a list"))?;
    for (i, item) in items.iter().enumerate() {
        let name = item.get("name").and_then(Value::as_str).unwrap_or_default();
        if !item.is_object() || name.is_empty() {
            return Err(schema_error(
                &format!("#/{}/{}", key, i),
                "must be an object with a non-empty 'name'",
            ));
        }
    }
    Ok(())
}

fn validate_files(value: &Value) -> Result<(), ValidationError> {
    let items = value
        .as_array()
        .ok_or_else(|| schema_error("#/files", "must be a list"))?;
    let mut seen = HashSet::new();
    for (i, item) in items.iter().enumerate() {
        let complete = ["path", "mode", "contents"]
            .iter()
            .all(|field| item.get(field).map(Value::is_string).unwrap_or(false));
        if !complete {
            return Err(schema_error(
                &format!("#/files/{}", i),
                "'path', 'mode' and 'contents' are required strings",
            ));
        }
        let path = item["path"].as_str().unwrap_or_default();
        if !seen.insert(path.to_string()) {
            return Err(schema_error(
                "#/files",
                &format!("file path '{}' is used more than once", path),
            ));
        }
    }
    Ok(())
}

/// A config with nothing in it (null or `{}`)
pub fn is_empty_config(config: &Value) -> bool {
    match config {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

/// Deep merge `overlay` on top of `base`. Objects merge recursively, lists
/// concatenate except that list items sharing a `name` are merged together.
pub fn merge_config(base: &Value, overlay: &Value) -> Value {
    match (base, overlay) {
        (Value::Object(b), Value::Object(o)) => Value::Object(merge_objects(b, o)),
        (Value::Array(b), Value::Array(o)) => Value::Array(merge_lists(b, o)),
        (_, Value::Null) => base.clone(),
        _ => overlay.clone(),
    }
}

fn merge_objects(base: &Map<String, Value>, overlay: &Map<String, Value>) -> Map<String, Value> {
    let mut merged = base.clone();
    for (key, value) in overlay {
        let next = match merged.get(key) {
            Some(existing) => merge_config(existing, value),
            None => value.clone(),
        };
        merged.insert(key.clone(), next);
    }
    merged
}

fn merge_lists(base: &[Value], overlay: &[Value]) -> Vec<Value> {
    let mut merged = base.to_vec();
    for item in overlay {
        let name = item.get("name").and_then(Value::as_str);
        let existing = name.and_then(|name| {
            merged
                .iter()
                .position(|e| e.get("name").and_then(Value::as_str) == Some(name))
        });
        match existing {
            Some(pos) => merged[pos] = merge_config(&merged[pos], item),
            None => merged.push(item.clone()),
        }
    }
    merged
}

fn variable_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"\{\{\s*([A-Za-z0-9_\-\.]+)\s*\}\}").ok())
        .as_ref()
}

/// Replace `{{ var }}` in every string leaf. Unknown variables are kept as-is.
pub fn substitute(value: &Value, context: &HashMap<String, String>) -> Value {
    match value {
        Value::String(s) => Value::String(substitute_str(s, context)),
        Value::Array(items) => Value::Array(items.iter().map(|v| substitute(v, context)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), substitute(v, context)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn substitute_str(text: &str, context: &HashMap<String, String>) -> String {
    let Some(pattern) = variable_pattern().filter(|_| text.contains("{{")) else {
        return text.to_string();
    };
    pattern
        .replace_all(text, |caps: &regex_lite::Captures| {
            context
                .get(&caps[1])
                .cloned()
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_path() {
        assert_eq!(Backend::from_path(OPENWRT), Ok(Backend::OpenWrt));
        assert_eq!(Backend::from_path(OPENWISP).map(|b| b.path()), Ok(OPENWISP));
        assert!(Backend::from_path("netjsonconfig.Other").unwrap_err().has_field("backend"));
    }

    #[test]
    fn test_validate_interfaces() {
        let backend = Backend::OpenWrt;
        assert!(backend.validate(&json!({"interfaces": [{"name": "eth0", "type": "ethernet"}]})).is_ok());
        assert!(backend.validate(&json!({"interfaces": {"invalid": true}})).is_err());
        assert!(backend.validate(&json!({"interfaces": [{"type": "ethernet"}]})).is_err());
        assert!(backend.validate(&json!([1, 2])).is_err());
    }

    #[test]
    fn test_duplicate_files() {
        let file = json!({"path": "/etc/vpnserver1", "mode": "0644", "contents": "x"});
        let err = Backend::OpenWrt
            .validate(&json!({"files": [file.clone(), file]}))
            .unwrap_err();
        assert!(err.messages("config")[0].contains("Invalid configuration triggered by \"#/files\""));
    }

    #[test]
    fn test_merge_overrides_named_items_and_concatenates_files() {
        let base = json!({
            "general": {"timezone": "UTC"},
            "interfaces": [{"name": "eth0", "type": "ethernet", "mtu": 1500}],
            "files": [{"path": "/a", "mode": "0644", "contents": "a"}],
        });
        let overlay = json!({
            "general": {"hostname": "r1"},
            "interfaces": [{"name": "eth0", "mtu": 9000}, {"name": "eth1", "type": "ethernet"}],
            "files": [{"path": "/a", "mode": "0644", "contents": "b"}],
        });
        let merged = merge_config(&base, &overlay);
        assert_eq!(merged["general"], json!({"timezone": "UTC", "hostname": "r1"}));
        assert_eq!(merged["interfaces"][0]["mtu"], 9000);
        assert_eq!(merged["interfaces"][0]["type"], "ethernet");
        assert_eq!(merged["interfaces"].as_array().map(Vec::len), Some(2));
        assert_eq!(merged["files"].as_array().map(Vec::len), Some(2));
    }

    #[test]
    fn test_substitute_keeps_unknown_variables() {
        let ctx = HashMap::from([("dns".to_string(), "4.4.4.4".to_string())]);
        let out = substitute(&json!({"dns_servers": ["{{dns}}", "{{ missing }}"], "n": 1}), &ctx);
        assert_eq!(out, json!({"dns_servers": ["4.4.4.4", "{{ missing }}"], "n": 1}));
    }

    #[test]
    fn test_render_substitutes_file_contents() {
        let ctx = HashMap::from([
            ("name".to_string(), "router-1".to_string()),
            ("vpnserver1".to_string(), "vpn.testdomain.com".to_string()),
        ]);
        let config = json!({
            "general": {"hostname": "{{ name }}"},
            "files": [{"path": "/etc/vpnserver1", "mode": "0600", "contents": "{{ name }}\n{{ vpnserver1 }}\n"}],
        });
        let output = Backend::OpenWrt.render(&config, &ctx).unwrap();
        assert!(output.contains("option hostname 'router-1'"));
        assert!(output.contains("vpn.testdomain.com"));
        assert!(output.contains("# path: /etc/vpnserver1"));

        let openwisp = Backend::OpenWisp.render(&config, &ctx).unwrap();
        assert!(openwisp.starts_with("# openwisp"));
    }

    #[test]
    fn test_empty_config() {
        assert!(is_empty_config(&json!({})));
        assert!(is_empty_config(&Value::Null));
        assert!(!is_empty_config(&json!({"a": 1})));
    }
}
