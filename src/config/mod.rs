use std::collections::HashMap;
use std::env;
use std::time::Duration;

/// How shared (organization-less) default templates interact with
/// organization-scoped defaults when a new config is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefaultTemplatePolicy {
    /// Scoped and shared defaults for the config's backend are both attached
    Compose,
    /// Shared defaults for a backend are skipped when the organization has
    /// at least one scoped default for that same backend
    ScopedOverridesShared,
}

impl DefaultTemplatePolicy {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "compose" => Some(Self::Compose),
            "scoped_overrides_shared" => Some(Self::ScopedOverridesShared),
            _ => None,
        }
    }
}

/// Config holds all application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: String,
    pub default_context: HashMap<String, String>,
    pub task_soft_time_limit: Duration,
    pub default_template_policy: DefaultTemplatePolicy,
    pub x509_dir: String,
    pub default_backend: String,
}

impl Config {
    /// Load configuration from environment variables with defaults
    pub fn load() -> Self {
        Self {
            listen_addr: get_env("LISTEN_ADDR", "0.0.0.0:8080"),
            default_context: parse_context(&get_env("CONFIG_CONTEXT", "{}")),
            task_soft_time_limit: parse_soft_time_limit(&get_env("TASK_SOFT_TIME_LIMIT_SECS", "1200")),
            default_template_policy: {
                let raw = get_env("DEFAULT_TEMPLATE_POLICY", "compose");
                DefaultTemplatePolicy::parse(&raw).unwrap_or_else(|| {
                    tracing::warn!("Unknown DEFAULT_TEMPLATE_POLICY '{}', using compose", raw);
                    DefaultTemplatePolicy::Compose
                })
            },
            x509_dir: get_env("X509_DIR", "/etc/x509"),
            default_backend: get_env("DEFAULT_BACKEND", crate::backend::OPENWRT),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
            default_context: HashMap::new(),
            task_soft_time_limit: Duration::from_secs(1200),
            default_template_policy: DefaultTemplatePolicy::Compose,
            x509_dir: "/etc/x509".to_string(),
            default_backend: crate::backend::OPENWRT.to_string(),
        }
    }
}

fn get_env(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_soft_time_limit(raw: &str) -> Duration {
    match raw.trim().parse::<u64>() {
        Ok(secs) => Duration::from_secs(secs),
        Err(e) => {
            tracing::warn!("Invalid TASK_SOFT_TIME_LIMIT_SECS '{}' ({}), using 1200", raw, e);
            Duration::from_secs(1200)
        }
    }
}

/// Parse the CONFIG_CONTEXT JSON object. Non-string values are kept in
/// their JSON text form; anything that is not an object is ignored.
fn parse_context(raw: &str) -> HashMap<String, String> {
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(serde_json::Value::Object(map)) => crate::context::flatten_object(&map),
        Ok(_) => {
            tracing::warn!("CONFIG_CONTEXT is not a JSON object, ignoring");
            HashMap::new()
        }
        Err(e) => {
            tracing::warn!("Failed to parse CONFIG_CONTEXT: {}", e);
            HashMap::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_policy() {
        assert_eq!(DefaultTemplatePolicy::parse("compose"), Some(DefaultTemplatePolicy::Compose));
        assert_eq!(
            DefaultTemplatePolicy::parse(" Scoped_Overrides_Shared "),
            Some(DefaultTemplatePolicy::ScopedOverridesShared)
        );
        assert_eq!(DefaultTemplatePolicy::parse("other"), None);
    }

    #[test]
    fn test_parse_soft_time_limit() {
        let logs = crate::tasks::test_utils::LogCapture::default();
        let _guard = tracing::subscriber::set_default(logs.subscriber());

        assert_eq!(parse_soft_time_limit(" 30 "), Duration::from_secs(30));
        assert_eq!(logs.count("WARN"), 0);
        assert_eq!(parse_soft_time_limit("ten"), Duration::from_secs(1200));
        assert_eq!(logs.count("WARN"), 1);
    }

    #[test]
    fn test_parse_context() {
        let ctx = parse_context(r#"{"vpnserver1": "vpn.example.com", "port": 1194}"#);
        assert_eq!(ctx.get("vpnserver1").map(String::as_str), Some("vpn.example.com"));
        assert_eq!(ctx.get("port").map(String::as_str), Some("1194"));
        assert!(parse_context("[1, 2]").is_empty());
        assert!(parse_context("not json").is_empty());
    }
}
