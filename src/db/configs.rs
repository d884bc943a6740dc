use anyhow::Result;
use chrono::Utc;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use uuid::Uuid;

use crate::backend::{merge_config, substitute, Backend};
use crate::config::DefaultTemplatePolicy;
use crate::models::*;
use crate::signals::{ConfigEvent, ConfigModified, ConfigModifiedAction, ConfigStatusChanged};
use crate::validation::ValidationError;
use crate::vpn::VpnAutoClientDeriver;

use super::devices::remove_vpn_client;
use super::{not_found, Inner, Services};

pub const ORGANIZATION_MISMATCH: &str =
    "The following templates are owned by organizations which do not match the organization of this configuration";
pub const REQUIRED_TEMPLATE: &str = "Required templates cannot be removed from the configuration";

/// Merged config tree of a config and the context to render it with
struct Build {
    merged: Value,
    context: HashMap<String, String>,
    device: Device,
}

/// Config operations
pub struct ConfigRepo;

impl ConfigRepo {
    pub fn list(inner: &Inner) -> Vec<Config> {
        let mut configs: Vec<Config> = inner.configs.values().cloned().collect();
        configs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        configs
    }

    pub fn get(inner: &Inner, id: Uuid) -> Option<Config> {
        inner.configs.get(&id).cloned()
    }

    pub fn get_by_device(inner: &Inner, device_id: Uuid) -> Option<Config> {
        inner.configs.values().find(|c| c.device == device_id).cloned()
    }

    /// Create the config of a device with its default templates attached.
    /// A new config starts out modified, so nothing is notified.
    pub fn create(inner: &mut Inner, services: &Services, req: CreateConfigRequest) -> Result<Config> {
        let device = inner
            .devices
            .get(&req.device)
            .cloned()
            .ok_or_else(|| not_found("device", req.device))?;

        let mut errors = ValidationError::default();
        if inner.configs.values().any(|c| c.device == device.id) {
            errors.add("device", "Config with this Device already exists.");
        }
        let backend = req.backend.unwrap_or_else(|| services.default_backend.clone());
        if let Err(e) = Backend::from_path(&backend) {
            errors.extend(e);
        }
        errors.into_result()?;

        let mut config = Config::new(device.id, &backend);
        if let Some(overrides) = req.config {
            config.config = overrides;
        }
        config.context = req.context;
        config.templates = default_templates(inner, services.policy, &backend, device.organization);

        // Clients are attached first so their file paths take part in validation
        let mut attached = Vec::new();
        let mut result = Ok(());
        for template_id in &config.templates {
            let Some(template) = inner.templates.get(template_id).cloned() else {
                continue;
            };
            match attach_vpn_client(inner, services, &config, &device, &template) {
                Ok(client) => attached.extend(client),
                Err(e) => {
                    result = Err(e);
                    break;
                }
            }
        }
        if result.is_ok() {
            result = Self::validate_build(inner, services, &config);
        }
        if let Err(e) = result {
            for client in &attached {
                remove_vpn_client(inner, client);
            }
            return Err(e);
        }
        tracing::info!(
            "Created config {} for device '{}' with {} default template(s)",
            config.id,
            device.name,
            config.templates.len()
        );
        inner.configs.insert(config.id, config.clone());
        Ok(config)
    }

    pub fn add_template(
        inner: &mut Inner,
        services: &Services,
        config_id: Uuid,
        template_id: Uuid,
        events: &mut Vec<ConfigEvent>,
    ) -> Result<Config> {
        let config = Self::get(inner, config_id).ok_or_else(|| not_found("config", config_id))?;
        let template = inner
            .templates
            .get(&template_id)
            .cloned()
            .ok_or_else(|| not_found("template", template_id))?;
        if config.templates.contains(&template_id) {
            return Ok(config);
        }
        let device = device_of(inner, &config)?;

        let mut errors = ValidationError::default();
        if template.organization.is_some_and(|org| org != device.organization) {
            errors.add("templates", format!("{}: {}", ORGANIZATION_MISMATCH, template.name));
        }
        if template.backend != config.backend {
            errors.add(
                "templates",
                format!(
                    "Template '{}' uses backend {} but this configuration uses {}",
                    template.name, template.backend, config.backend
                ),
            );
        }
        errors.into_result()?;

        let mut candidate = config;
        candidate.templates.push(template_id);
        let attached = attach_vpn_client(inner, services, &candidate, &device, &template)?;
        if let Err(e) = Self::validate_build(inner, services, &candidate) {
            if let Some(client) = attached {
                remove_vpn_client(inner, &client);
            }
            return Err(e);
        }
        inner.configs.insert(config_id, candidate);
        inner.rendered.remove(&config_id);
        tracing::debug!("Added template '{}' to config {}", template.name, config_id);
        mark_modified(inner, config_id, ConfigModifiedAction::TemplatesChanged, events)
    }

    pub fn remove_template(
        inner: &mut Inner,
        config_id: Uuid,
        template_id: Uuid,
        events: &mut Vec<ConfigEvent>,
    ) -> Result<Config> {
        let config = Self::get(inner, config_id).ok_or_else(|| not_found("config", config_id))?;
        let template = inner
            .templates
            .get(&template_id)
            .cloned()
            .ok_or_else(|| not_found("template", template_id))?;
        if !config.templates.contains(&template_id) {
            return Ok(config);
        }
        if template.required {
            return Err(ValidationError::new(
                "templates",
                format!("{}: {}", REQUIRED_TEMPLATE, template.name),
            )
            .into());
        }

        let mut updated = config;
        updated.templates.retain(|t| *t != template_id);
        inner.configs.insert(config_id, updated);
        remove_vpn_clients(inner, config_id, template_id);
        inner.rendered.remove(&config_id);
        tracing::debug!("Removed template '{}' from config {}", template.name, config_id);
        mark_modified(inner, config_id, ConfigModifiedAction::TemplatesChanged, events)
    }

    /// Replace local overrides and/or variables
    pub fn update(
        inner: &mut Inner,
        services: &Services,
        config_id: Uuid,
        req: UpdateConfigRequest,
        events: &mut Vec<ConfigEvent>,
    ) -> Result<Config> {
        let current = Self::get(inner, config_id).ok_or_else(|| not_found("config", config_id))?;
        let mut candidate = current.clone();
        if let Some(overrides) = req.config {
            candidate.config = overrides;
        }
        if let Some(context) = req.context {
            candidate.context = context;
        }
        if candidate.config == current.config && candidate.context == current.context {
            return Ok(current);
        }
        Self::validate_build(inner, services, &candidate)?;

        inner.configs.insert(config_id, candidate);
        inner.rendered.remove(&config_id);
        mark_modified(inner, config_id, ConfigModifiedAction::ConfigChanged, events)
    }

    pub fn set_status(
        inner: &mut Inner,
        config_id: Uuid,
        status: ConfigStatus,
        events: &mut Vec<ConfigEvent>,
    ) -> Result<Config> {
        let config = inner
            .configs
            .get_mut(&config_id)
            .ok_or_else(|| not_found("config", config_id))?;
        if config.status != status {
            tracing::debug!("Config {} status {} -> {}", config_id, config.status, status);
            config.status = status;
            config.updated_at = Utc::now();
            events.push(ConfigEvent::StatusChanged(ConfigStatusChanged { config: config_id }));
        }
        Ok(config.clone())
    }

    /// A template used by this config changed: always notify, flip the
    /// status only if it was not modified already
    pub fn update_related_status(
        inner: &mut Inner,
        config_id: Uuid,
        events: &mut Vec<ConfigEvent>,
    ) -> Result<()> {
        let config = inner
            .configs
            .get_mut(&config_id)
            .ok_or_else(|| not_found("config", config_id))?;
        if config.status != ConfigStatus::Modified {
            config.status = ConfigStatus::Modified;
            config.updated_at = Utc::now();
            events.push(ConfigEvent::StatusChanged(ConfigStatusChanged { config: config_id }));
        }
        events.push(ConfigEvent::Modified(ConfigModified {
            config: config_id,
            device: config.device,
            action: ConfigModifiedAction::RelatedTemplateChanged,
        }));
        inner.rendered.remove(&config_id);
        Ok(())
    }

    /// Render the config and cache the result. A missing `general.hostname`
    /// defaults to the device name.
    pub fn render(inner: &mut Inner, services: &Services, config_id: Uuid) -> Result<String> {
        let config = Self::get(inner, config_id).ok_or_else(|| not_found("config", config_id))?;
        let Build { mut merged, context, device } = Self::build(inner, services, &config)?;

        if merged.pointer("/general/hostname").is_none() {
            if let Value::Object(root) = &mut merged {
                let general = root.entry("general").or_insert_with(|| json!({}));
                if let Value::Object(general) = general {
                    general.insert("hostname".to_string(), Value::String(device.name.clone()));
                }
            }
        }

        let output = Backend::from_path(&config.backend)?.render(&merged, &context)?;
        inner.rendered.insert(config_id, output.clone());
        Ok(output)
    }

    pub fn get_context(
        inner: &Inner,
        services: &Services,
        config_id: Uuid,
    ) -> Result<HashMap<String, String>> {
        let config = Self::get(inner, config_id).ok_or_else(|| not_found("config", config_id))?;
        Ok(Self::build(inner, services, &config)?.context)
    }

    /// Configs that use a template, oldest first
    pub fn list_for_template(inner: &Inner, template_id: Uuid) -> Vec<Uuid> {
        Self::list(inner)
            .into_iter()
            .filter(|c| c.templates.contains(&template_id))
            .map(|c| c.id)
            .collect()
    }

    /// Check that `config` (not necessarily stored) merges into a valid tree
    fn validate_build(inner: &Inner, services: &Services, config: &Config) -> Result<()> {
        let build = Self::build(inner, services, config)?;
        let backend = Backend::from_path(&config.backend)?;
        backend.validate(&substitute(&build.merged, &build.context))?;
        Ok(())
    }

    fn build(inner: &Inner, services: &Services, config: &Config) -> Result<Build> {
        let device = device_of(inner, config)?;
        let templates: Vec<&Template> = config
            .templates
            .iter()
            .filter_map(|id| inner.templates.get(id))
            .collect();

        let mut merged = Value::Object(Map::new());
        for template in &templates {
            merged = merge_config(&merged, &template.config);
        }
        merged = merge_config(&merged, &config.config);

        let organization = inner.organizations.get(&device.organization);
        let context = services.resolver.config_context(
            &device,
            organization,
            &templates,
            &config.context,
            vpn_variables(inner, services, config.id),
        );
        Ok(Build { merged, context, device })
    }
}

/// Flip a config to modified after a structural change. Notifies only when
/// the status actually changed.
fn mark_modified(
    inner: &mut Inner,
    config_id: Uuid,
    action: ConfigModifiedAction,
    events: &mut Vec<ConfigEvent>,
) -> Result<Config> {
    let config = inner
        .configs
        .get_mut(&config_id)
        .ok_or_else(|| not_found("config", config_id))?;
    config.updated_at = Utc::now();
    if config.status != ConfigStatus::Modified {
        config.status = ConfigStatus::Modified;
        events.push(ConfigEvent::StatusChanged(ConfigStatusChanged { config: config_id }));
        events.push(ConfigEvent::Modified(ConfigModified {
            config: config_id,
            device: config.device,
            action,
        }));
    }
    Ok(config.clone())
}

fn device_of(inner: &Inner, config: &Config) -> Result<Device> {
    inner
        .devices
        .get(&config.device)
        .cloned()
        .ok_or_else(|| not_found("device", config.device))
}

/// Default and required templates for a new config, organization scoped
/// ones first, then shared ones, each ordered by name
fn default_templates(
    inner: &Inner,
    policy: DefaultTemplatePolicy,
    backend: &str,
    organization: Uuid,
) -> Vec<Uuid> {
    let eligible = |t: &&Template| (t.default || t.required) && t.backend == backend;
    let mut scoped: Vec<&Template> = inner
        .templates
        .values()
        .filter(eligible)
        .filter(|t| t.organization == Some(organization))
        .collect();
    let mut shared: Vec<&Template> = inner
        .templates
        .values()
        .filter(eligible)
        .filter(|t| t.organization.is_none())
        .collect();
    scoped.sort_by(|a, b| a.name.cmp(&b.name));
    shared.sort_by(|a, b| a.name.cmp(&b.name));

    if policy == DefaultTemplatePolicy::ScopedOverridesShared && !scoped.is_empty() {
        shared.clear();
    }
    scoped.into_iter().chain(shared).map(|t| t.id).collect()
}

/// Persist the VPN client a VPN template gives a config. Returns the new
/// client, None for templates that are not VPN templates.
pub(super) fn attach_vpn_client(
    inner: &mut Inner,
    services: &Services,
    config: &Config,
    device: &Device,
    template: &Template,
) -> Result<Option<VpnClient>> {
    let Some(vpn_id) = template.vpn.filter(|_| template.is_vpn()) else {
        return Ok(None);
    };
    let vpn = inner
        .vpns
        .get(&vpn_id)
        .cloned()
        .ok_or_else(|| not_found("vpn", vpn_id))?;
    let ca = inner
        .certs
        .get(&vpn.ca)
        .cloned()
        .ok_or_else(|| not_found("certificate", vpn.ca))?;
    let existing = inner
        .vpn_clients
        .values()
        .filter(|c| c.config == config.id && c.vpn == vpn.id)
        .find_map(|c| c.cert.and_then(|id| inner.certs.get(&id)))
        .cloned();

    let deriver = VpnAutoClientDeriver::new(services.ca.as_ref());
    let (_, cert) = deriver.derive(template, &vpn, device, &ca, existing.as_ref());
    let client = VpnClient {
        id: Uuid::new_v4(),
        config: config.id,
        vpn: vpn.id,
        template: template.id,
        cert: cert.as_ref().map(|c| c.id),
        created_at: Utc::now(),
    };
    if let Some(cert) = cert {
        inner.certs.insert(cert.id, cert);
    }
    inner.vpn_clients.insert(client.id, client.clone());
    Ok(Some(client))
}

pub(super) fn remove_vpn_clients(inner: &mut Inner, config_id: Uuid, template_id: Uuid) {
    let clients: Vec<VpnClient> = inner
        .vpn_clients
        .values()
        .filter(|c| c.config == config_id && c.template == template_id)
        .cloned()
        .collect();
    for client in clients {
        remove_vpn_client(inner, &client);
    }
}

fn vpn_variables(inner: &Inner, services: &Services, config_id: Uuid) -> HashMap<String, String> {
    let mut clients: Vec<&VpnClient> = inner
        .vpn_clients
        .values()
        .filter(|c| c.config == config_id)
        .collect();
    clients.sort_by_key(|c| c.created_at);

    let mut variables = HashMap::new();
    for client in clients {
        let Some(vpn) = inner.vpns.get(&client.vpn) else {
            continue;
        };
        let Some(ca) = inner.certs.get(&vpn.ca) else {
            continue;
        };
        let cert = client.cert.and_then(|id| inner.certs.get(&id));
        variables.extend(vpn.client_variables(ca, cert, &services.x509_dir));
    }
    variables
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config as AppConfig;
    use crate::db::test_utils::*;
    use crate::db::Store;

    async fn applied_config(store: &Store, org: &Organization) -> Config {
        let (_, config) = create_device(store, org, "router-1", "00:11:22:33:44:55").await;
        store.set_status_applied(config.id).await.unwrap()
    }

    #[tokio::test]
    async fn test_add_template_flips_applied_once() {
        let store = test_store();
        let org = create_org(&store, "org1").await;
        let t1 = store.create_template(dns_template("t1")).await.unwrap();
        let t2 = store.create_template(template("t2", json!({"dns_search": ["lan"]}))).await.unwrap();
        let config = applied_config(&store, &org).await;
        assert_eq!(config.status, ConfigStatus::Applied);

        let catcher = EventCatcher::attach(&store);
        let config = store.add_template_to_config(config.id, t1.id).await.unwrap();
        assert_eq!(config.status, ConfigStatus::Modified);
        assert_eq!(catcher.status_changed(), 1);
        let modified = catcher.modified();
        assert_eq!(modified.len(), 1);
        assert_eq!(modified[0].action, ConfigModifiedAction::TemplatesChanged);
        assert_eq!(modified[0].device, config.device);

        catcher.clear();
        store.add_template_to_config(config.id, t2.id).await.unwrap();
        assert_eq!(catcher.status_changed(), 0);
        assert!(catcher.modified().is_empty());
    }

    #[tokio::test]
    async fn test_remove_template_flips_applied_once() {
        let store = test_store();
        let org = create_org(&store, "org1").await;
        let t1 = store.create_template(dns_template("t1")).await.unwrap();
        let config = applied_config(&store, &org).await;
        store.add_template_to_config(config.id, t1.id).await.unwrap();
        store.set_status_applied(config.id).await.unwrap();

        let catcher = EventCatcher::attach(&store);
        let config = store.remove_template_from_config(config.id, t1.id).await.unwrap();
        assert!(config.templates.is_empty());
        assert_eq!(config.status, ConfigStatus::Modified);
        assert_eq!(catcher.status_changed(), 1);
        assert_eq!(catcher.modified().len(), 1);
    }

    #[tokio::test]
    async fn test_adding_present_template_is_noop() {
        let store = test_store();
        let org = create_org(&store, "org1").await;
        let t1 = store.create_template(dns_template("t1")).await.unwrap();
        let config = applied_config(&store, &org).await;
        store.add_template_to_config(config.id, t1.id).await.unwrap();
        let config = store.set_status_applied(config.id).await.unwrap();

        let catcher = EventCatcher::attach(&store);
        let same = store.add_template_to_config(config.id, t1.id).await.unwrap();
        assert_eq!(same.templates, vec![t1.id]);
        assert_eq!(same.status, ConfigStatus::Applied);
        assert_eq!(catcher.status_changed(), 0);
    }

    #[tokio::test]
    async fn test_status_transitions_notify_on_change_only() {
        let store = test_store();
        let org = create_org(&store, "org1").await;
        let (_, config) = create_device(&store, &org, "router-1", "00:11:22:33:44:55").await;
        let catcher = EventCatcher::attach(&store);

        store.set_status_applied(config.id).await.unwrap();
        store.set_status_applied(config.id).await.unwrap();
        assert_eq!(catcher.status_changed(), 1);
        let config = store.set_status_error(config.id).await.unwrap();
        assert_eq!(config.status, ConfigStatus::Error);
        assert_eq!(catcher.status_changed(), 2);
        assert!(catcher.modified().is_empty());
    }

    #[tokio::test]
    async fn test_default_templates_follow_backend() {
        let store = test_store();
        let org = create_org(&store, "org1").await;
        let mut t1 = dns_template("t1");
        t1.default = true;
        t1.organization = Some(org.id);
        let t1 = store.create_template(t1).await.unwrap();
        let mut t2 = Template::new("t2", crate::backend::OPENWISP, json!({"dns_servers": ["4.4.4.4"]}));
        t2.default = true;
        t2.organization = Some(org.id);
        let t2 = store.create_template(t2).await.unwrap();

        let (_, c1) = create_device(&store, &org, "r1", "00:11:22:33:44:01").await;
        assert_eq!(c1.templates, vec![t1.id]);

        let d2 = store
            .create_device(CreateDeviceRequest {
                name: "r2".to_string(),
                mac_address: "00:11:22:33:44:02".to_string(),
                key: None,
                organization: org.id,
                backend: Some(crate::backend::OPENWISP.to_string()),
            })
            .await
            .unwrap();
        let c2 = store.get_config_by_device(d2.id).await.unwrap().unwrap();
        assert_eq!(c2.templates, vec![t2.id]);
    }

    async fn shared_and_scoped(store: &Store) -> (Organization, Template, Template) {
        let org = create_org(store, "org1").await;
        let mut t1 = dns_template("t1");
        t1.default = true;
        t1.organization = Some(org.id);
        let t1 = store.create_template(t1).await.unwrap();
        let mut t2 = template("t2", json!({"dns_search": ["lan"]}));
        t2.default = true;
        let t2 = store.create_template(t2).await.unwrap();
        (org, t1, t2)
    }

    #[tokio::test]
    async fn test_shared_and_scoped_defaults_compose() {
        let store = test_store();
        let (org, t1, t2) = shared_and_scoped(&store).await;
        let other = create_org(&store, "org2").await;

        let (_, config) = create_device(&store, &org, "r1", "00:11:22:33:44:01").await;
        assert_eq!(config.templates, vec![t1.id, t2.id]);
        let (_, config) = create_device(&store, &other, "r2", "00:11:22:33:44:02").await;
        assert_eq!(config.templates, vec![t2.id]);
    }

    #[tokio::test]
    async fn test_scoped_defaults_override_shared_when_configured() {
        let store = Store::new(&AppConfig {
            default_template_policy: DefaultTemplatePolicy::ScopedOverridesShared,
            ..test_config()
        });
        let (org, t1, t2) = shared_and_scoped(&store).await;
        let other = create_org(&store, "org2").await;

        let (_, config) = create_device(&store, &org, "r1", "00:11:22:33:44:01").await;
        assert_eq!(config.templates, vec![t1.id]);
        let (_, config) = create_device(&store, &other, "r2", "00:11:22:33:44:02").await;
        assert_eq!(config.templates, vec![t2.id]);
    }

    #[tokio::test]
    async fn test_required_template_is_attached_and_protected() {
        let store = test_store();
        let org = create_org(&store, "org1").await;
        let mut t = dns_template("required");
        t.required = true;
        let t = store.create_template(t).await.unwrap();
        assert!(t.default);

        let (_, config) = create_device(&store, &org, "r1", "00:11:22:33:44:01").await;
        assert_eq!(config.templates, vec![t.id]);
        let err = store.remove_template_from_config(config.id, t.id).await.unwrap_err();
        let validation = err.downcast_ref::<ValidationError>().unwrap();
        assert!(validation.messages("templates")[0].starts_with(REQUIRED_TEMPLATE));
        let config = store.get_config(config.id).await.unwrap().unwrap();
        assert_eq!(config.templates, vec![t.id]);
    }

    #[tokio::test]
    async fn test_template_of_other_organization_rejected() {
        let store = test_store();
        let org1 = create_org(&store, "org1").await;
        let org2 = create_org(&store, "org2").await;
        let mut t = dns_template("t1");
        t.organization = Some(org2.id);
        let t = store.create_template(t).await.unwrap();
        let (_, config) = create_device(&store, &org1, "r1", "00:11:22:33:44:01").await;

        let err = store.add_template_to_config(config.id, t.id).await.unwrap_err();
        let validation = err.downcast_ref::<ValidationError>().unwrap();
        assert!(validation.messages("templates")[0].contains("do not match the organization"));
        assert!(store.get_config(config.id).await.unwrap().unwrap().templates.is_empty());
    }

    fn file(path: &str) -> Value {
        json!({"path": path, "mode": "0644", "contents": "test"})
    }

    #[tokio::test]
    async fn test_vpn_template_with_distinct_files_builds() {
        let store = test_store();
        let org = create_org(&store, "org1").await;
        let vpn = create_vpn(&store, None).await;
        let t1 = store
            .create_template(template("t1", json!({"files": [file("/etc/test.txt")]})))
            .await
            .unwrap();
        let mut t2 = template("vpn-test", json!({}));
        t2.template_type = TemplateType::Vpn;
        t2.vpn = Some(vpn.id);
        t2.auto_cert = true;
        let mut t2 = store.create_template(t2).await.unwrap();
        if let Some(files) = t2.config["files"].as_array_mut() {
            files.push(file("/etc/vpn_test.txt"));
        }
        let t2 = store.save_template(t2).await.unwrap();

        let (_, config) = create_device(&store, &org, "r1", "00:11:22:33:44:01").await;
        store.add_template_to_config(config.id, t1.id).await.unwrap();
        store.add_template_to_config(config.id, t2.id).await.unwrap();
        let output = store.render_config(config.id).await.unwrap();
        assert!(output.contains("# path: /etc/vpn_test.txt"));
        assert!(output.contains(&format!("# path: /etc/x509/client-{}.pem", vpn.hex())));
    }

    #[tokio::test]
    async fn test_duplicate_file_paths_rejected() {
        let store = test_store();
        let org = create_org(&store, "org1").await;
        let t1 = store
            .create_template(template("t1", json!({"files": [file("/etc/test.txt")]})))
            .await
            .unwrap();
        let t2 = store
            .create_template(template("t2", json!({"files": [file("/etc/test.txt")]})))
            .await
            .unwrap();
        let (_, config) = create_device(&store, &org, "r1", "00:11:22:33:44:01").await;
        store.add_template_to_config(config.id, t1.id).await.unwrap();

        let err = store.add_template_to_config(config.id, t2.id).await.unwrap_err();
        assert!(err.to_string().contains("#/files"));
        let config = store.get_config(config.id).await.unwrap().unwrap();
        assert_eq!(config.templates, vec![t1.id]);
    }

    async fn vpn_template(store: &Store, name: &str, vpn: &Vpn) -> Template {
        let mut t = template(name, json!({}));
        t.template_type = TemplateType::Vpn;
        t.vpn = Some(vpn.id);
        t.auto_cert = true;
        store.create_template(t).await.unwrap()
    }

    #[tokio::test]
    async fn test_vpn_file_conflict_rejected_in_either_order() {
        let store = test_store();
        let org = create_org(&store, "org1").await;
        let vpn = create_vpn(&store, None).await;
        let ca_path = format!("/etc/x509/ca-{}.pem", vpn.hex());
        let t1 = store
            .create_template(template("t1", json!({"files": [file(&ca_path)]})))
            .await
            .unwrap();
        let tv = vpn_template(&store, "vpn-test", &vpn).await;

        let (_, first) = create_device(&store, &org, "r1", "00:11:22:33:44:01").await;
        store.add_template_to_config(first.id, t1.id).await.unwrap();
        let err = store.add_template_to_config(first.id, tv.id).await.unwrap_err();
        assert!(err.to_string().contains("#/files"));
        let first = store.get_config(first.id).await.unwrap().unwrap();
        assert_eq!(first.templates, vec![t1.id]);
        assert!(store.list_vpn_clients(first.id).await.unwrap().is_empty());
        assert!(store.render_config(first.id).await.is_ok());

        let (_, second) = create_device(&store, &org, "r2", "00:11:22:33:44:02").await;
        store.add_template_to_config(second.id, tv.id).await.unwrap();
        let err = store.add_template_to_config(second.id, t1.id).await.unwrap_err();
        assert!(err.to_string().contains("#/files"));

        // Only the CA and the client cert of the second config remain
        assert_eq!(store.inner.read().await.certs.len(), 2);
    }

    #[tokio::test]
    async fn test_conflicting_default_templates_reject_config() {
        let store = test_store();
        let org = create_org(&store, "org1").await;
        let vpn = create_vpn(&store, None).await;
        let mut t1 = template("t1", json!({"files": [file(&format!("/etc/x509/client-{}.pem", vpn.hex()))]}));
        t1.default = true;
        store.create_template(t1).await.unwrap();
        let mut tv = template("vpn-test", json!({}));
        tv.template_type = TemplateType::Vpn;
        tv.vpn = Some(vpn.id);
        tv.auto_cert = true;
        tv.default = true;
        store.create_template(tv).await.unwrap();

        let err = store
            .create_device(CreateDeviceRequest {
                name: "r1".to_string(),
                mac_address: "00:11:22:33:44:01".to_string(),
                key: None,
                organization: org.id,
                backend: None,
            })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("#/files"));
        assert!(store.list_devices().await.unwrap().is_empty());
        let inner = store.inner.read().await;
        assert!(inner.vpn_clients.is_empty());
        assert_eq!(inner.certs.len(), 1);
    }

    #[tokio::test]
    async fn test_vpns_with_same_name_stay_separate() {
        let store = test_store();
        let org = create_org(&store, "org1").await;
        let vpn1 = create_vpn(&store, None).await;
        let vpn2 = create_vpn(&store, None).await;
        assert_eq!(vpn1.name, vpn2.name);
        let t1 = vpn_template(&store, "vpn-a", &vpn1).await;
        let t2 = vpn_template(&store, "vpn-b", &vpn2).await;

        let (_, config) = create_device(&store, &org, "r1", "00:11:22:33:44:01").await;
        store.add_template_to_config(config.id, t1.id).await.unwrap();
        store.add_template_to_config(config.id, t2.id).await.unwrap();

        assert_eq!(store.list_vpn_clients(config.id).await.unwrap().len(), 2);
        let output = store.render_config(config.id).await.unwrap();
        assert_eq!(output.matches("config openvpn").count(), 2);
        for vpn in [&vpn1, &vpn2] {
            assert!(output.contains(&format!("option ca '/etc/x509/ca-{}.pem'", vpn.hex())));
            assert!(output.contains(&format!("option cert '/etc/x509/client-{}.pem'", vpn.hex())));
        }
    }

    #[tokio::test]
    async fn test_vpn_client_lifecycle() {
        let store = test_store();
        let org = create_org(&store, "org1").await;
        let vpn = create_vpn(&store, None).await;
        let mut t = template("vpn-test", json!({}));
        t.template_type = TemplateType::Vpn;
        t.vpn = Some(vpn.id);
        t.auto_cert = true;
        let t = store.create_template(t).await.unwrap();
        let (device, config) = create_device(&store, &org, "r1", "00:11:22:33:44:01").await;

        store.add_template_to_config(config.id, t.id).await.unwrap();
        let clients = store.list_vpn_clients(config.id).await.unwrap();
        assert_eq!(clients.len(), 1);
        let cert = store.get_cert(clients[0].cert.unwrap()).await.unwrap().unwrap();
        assert_eq!(cert.organization, Some(device.organization));

        let ctx = store.get_config_context(config.id).await.unwrap();
        assert_eq!(ctx[&format!("vpnserver_{}", vpn.hex())], "vpn1.test.com");
        assert_eq!(ctx[&format!("key_contents_{}", vpn.hex())], cert.private_key);

        store.remove_template_from_config(config.id, t.id).await.unwrap();
        assert!(store.list_vpn_clients(config.id).await.unwrap().is_empty());
        assert!(store.get_cert(cert.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_render_adds_hostname_and_caches() {
        let store = test_store();
        let org = create_org(&store, "org1").await;
        let t = store.create_template(dns_template("t1")).await.unwrap();
        let (_, config) = create_device(&store, &org, "router-1", "00:11:22:33:44:01").await;
        store.add_template_to_config(config.id, t.id).await.unwrap();

        let first = store.render_config(config.id).await.unwrap();
        assert!(first.contains("option hostname 'router-1'"));
        assert!(first.contains("list servers '4.4.4.4'"));
        assert_eq!(store.render_config(config.id).await.unwrap(), first);

        let config = store
            .update_config(
                config.id,
                UpdateConfigRequest {
                    config: Some(json!({"general": {"hostname": "custom"}})),
                    context: None,
                },
            )
            .await
            .unwrap();
        let second = store.render_config(config.id).await.unwrap();
        assert!(second.contains("option hostname 'custom'"));
    }

    #[tokio::test]
    async fn test_update_config_notifies_when_applied() {
        let store = test_store();
        let org = create_org(&store, "org1").await;
        let config = applied_config(&store, &org).await;
        let catcher = EventCatcher::attach(&store);

        let req = UpdateConfigRequest {
            config: None,
            context: Some(HashMap::from([("site".to_string(), "lab".to_string())])),
        };
        store.update_config(config.id, req.clone()).await.unwrap();
        assert_eq!(catcher.status_changed(), 1);
        assert_eq!(catcher.modified()[0].action, ConfigModifiedAction::ConfigChanged);

        catcher.clear();
        store.set_status_applied(config.id).await.unwrap();
        store.update_config(config.id, req).await.unwrap();
        assert_eq!(catcher.status_changed(), 1);
        assert!(catcher.modified().is_empty());
    }

    #[tokio::test]
    async fn test_context_uses_device_and_template_values() {
        let store = test_store();
        let org = create_org(&store, "org1").await;
        let mut t = dns_template("t1");
        t.default_values = json!({"dns": "4.4.4.4"});
        let t = store.create_template(t).await.unwrap();
        let (device, config) = create_device(&store, &org, "router-1", "00:11:22:33:44:01").await;
        store.add_template_to_config(config.id, t.id).await.unwrap();

        let ctx = store.get_device_context(device.id).await.unwrap();
        assert_eq!(ctx["dns"], "4.4.4.4");
        assert_eq!(ctx["name"], "router-1");
        assert_eq!(ctx["vpnserver1"], "vpn.testdomain.com");
    }
}
