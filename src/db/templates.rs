use anyhow::Result;
use chrono::Utc;
use std::collections::HashMap;
use uuid::Uuid;

use crate::backend::Backend;
use crate::models::*;
use crate::validation::ValidationError;

use super::configs::{attach_vpn_client, remove_vpn_clients, ConfigRepo};
use super::devices::remove_vpn_client;
use super::{not_found, Inner, Services};

pub const DUPLICATE_NAME: &str = "Template with this Name and Organization already exists.";

/// Template operations
pub struct TemplateRepo;

impl TemplateRepo {
    pub fn list(inner: &Inner) -> Vec<Template> {
        let mut templates: Vec<Template> = inner.templates.values().cloned().collect();
        templates.sort_by(|a, b| a.name.cmp(&b.name));
        templates
    }

    pub fn get(inner: &Inner, id: Uuid) -> Option<Template> {
        inner.templates.get(&id).cloned()
    }

    pub fn create(inner: &mut Inner, mut template: Template) -> Result<Template> {
        Self::validate(inner, &mut template)?;
        inner.templates.insert(template.id, template.clone());
        tracing::info!("Created template '{}' ({})", template.name, template.id);
        Ok(template)
    }

    /// Persist an edited template. Returns it along with whether its
    /// content changed.
    pub fn update(inner: &mut Inner, services: &Services, mut template: Template) -> Result<(Template, bool)> {
        let previous = Self::get(inner, template.id).ok_or_else(|| not_found("template", template.id))?;
        template.created_at = previous.created_at;
        template.updated_at = Utc::now();
        Self::validate(inner, &mut template)?;

        let changed = template.has_content_changed(&previous);
        let configs = ConfigRepo::list_for_template(inner, template.id);
        let vpn_changed = previous.vpn != template.vpn
            || previous.auto_cert != template.auto_cert
            || previous.template_type != template.template_type;
        if vpn_changed {
            Self::reissue_vpn_clients(inner, services, &template, &configs)?;
        }
        inner.templates.insert(template.id, template.clone());

        for config_id in &configs {
            inner.rendered.remove(config_id);
        }

        tracing::info!(
            "Updated template '{}' ({}), content changed: {}",
            template.name,
            template.id,
            changed
        );
        Ok((template, changed))
    }

    /// Replace the VPN clients the template gave `configs`. Nothing is
    /// changed unless every new client could be issued.
    fn reissue_vpn_clients(
        inner: &mut Inner,
        services: &Services,
        template: &Template,
        configs: &[Uuid],
    ) -> Result<()> {
        let stale: Vec<VpnClient> = inner
            .vpn_clients
            .values()
            .filter(|c| c.template == template.id && configs.contains(&c.config))
            .cloned()
            .collect();

        let mut attached = Vec::new();
        for config_id in configs {
            let Some(config) = ConfigRepo::get(inner, *config_id) else {
                continue;
            };
            let Some(device) = inner.devices.get(&config.device).cloned() else {
                continue;
            };
            match attach_vpn_client(inner, services, &config, &device, template) {
                Ok(client) => attached.extend(client),
                Err(e) => {
                    for client in &attached {
                        remove_vpn_client(inner, client);
                    }
                    return Err(e);
                }
            }
        }
        for client in &stale {
            remove_vpn_client(inner, client);
        }
        Ok(())
    }

    /// Delete a template, detaching it from every config
    pub fn delete(inner: &mut Inner, id: Uuid) -> Result<()> {
        let template = inner.templates.remove(&id).ok_or_else(|| not_found("template", id))?;
        for config in inner.configs.values_mut() {
            if config.templates.contains(&id) {
                config.templates.retain(|t| *t != id);
                inner.rendered.remove(&config.id);
            }
        }
        let clients: Vec<(Uuid, Uuid)> = inner
            .vpn_clients
            .values()
            .filter(|c| c.template == id)
            .map(|c| (c.config, c.template))
            .collect();
        for (config_id, template_id) in clients {
            remove_vpn_clients(inner, config_id, template_id);
        }
        tracing::info!("Deleted template '{}' ({})", template.name, id);
        Ok(())
    }

    /// System, organization and default values of a template
    pub fn get_context(inner: &Inner, services: &Services, id: Uuid) -> Result<HashMap<String, String>> {
        let template = inner.templates.get(&id).ok_or_else(|| not_found("template", id))?;
        let organization = template.organization.and_then(|o| inner.organizations.get(&o));
        Ok(services.resolver.template_context(template, organization))
    }

    /// System and organization values only
    pub fn get_system_context(inner: &Inner, services: &Services, id: Uuid) -> Result<HashMap<String, String>> {
        let template = inner.templates.get(&id).ok_or_else(|| not_found("template", id))?;
        let organization = template.organization.and_then(|o| inner.organizations.get(&o));
        Ok(services.resolver.system_context(organization))
    }

    /// Render the template alone with its own context
    pub fn preview(inner: &Inner, services: &Services, id: Uuid) -> Result<String> {
        let context = Self::get_context(inner, services, id)?;
        let template = inner.templates.get(&id).ok_or_else(|| not_found("template", id))?;
        Backend::from_path(&template.backend)?.render(&template.config, &context)
    }

    fn validate(inner: &Inner, template: &mut Template) -> Result<(), ValidationError> {
        let vpn = template.vpn.and_then(|id| inner.vpns.get(&id)).cloned();
        let mut errors = match template.full_validate(vpn.as_ref()) {
            Ok(()) => ValidationError::default(),
            Err(e) => e,
        };
        if let Some(org) = template.organization {
            if !inner.organizations.contains_key(&org) {
                errors.add("organization", format!("organization {} does not exist", org));
            }
        }
        let duplicate = inner.templates.values().any(|t| {
            t.id != template.id && t.name == template.name && t.organization == template.organization
        });
        if duplicate {
            errors.add("name", DUPLICATE_NAME);
        }
        errors.into_result()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_utils::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_name_unique_per_organization() {
        let store = test_store();
        let org = create_org(&store, "org1").await;
        store.create_template(dns_template("t1")).await.unwrap();
        let err = store.create_template(dns_template("t1")).await.unwrap_err();
        let validation = err.downcast_ref::<ValidationError>().unwrap();
        assert_eq!(validation.messages("name"), [DUPLICATE_NAME]);

        let mut scoped = dns_template("t1");
        scoped.organization = Some(org.id);
        assert!(store.create_template(scoped).await.is_ok());
    }

    #[tokio::test]
    async fn test_clone_is_persisted() {
        let store = test_store();
        let mut t = dns_template("t1");
        t.default = true;
        let t = store.create_template(t).await.unwrap();

        let clone = store.clone_template(t.id, "admin").await.unwrap();
        assert_eq!(clone.name, "t1 (Clone)");
        assert!(!clone.default);
        assert_ne!(clone.id, t.id);
        assert_eq!(clone.config, t.config);
        assert!(store.get_template(clone.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_template_context_is_system_context() {
        let store = test_store();
        let t = store.create_template(dns_template("t1")).await.unwrap();
        let before = store.resolver().system().clone();

        for _ in 0..3 {
            let mut ctx = store.get_template_context(t.id).await.unwrap();
            assert_eq!(ctx, before.to_map());
            ctx.insert("injected".to_string(), "value".to_string());
        }
        assert_eq!(store.resolver().system(), &before);
        assert_eq!(store.get_template_system_context(t.id).await.unwrap(), before.to_map());
    }

    #[tokio::test]
    async fn test_system_context_ignores_default_values() {
        let store = test_store();
        let mut t = dns_template("t1");
        t.default_values = json!({"test": "value"});
        let t = store.create_template(t).await.unwrap();

        assert_eq!(store.get_template_context(t.id).await.unwrap()["test"], "value");
        assert!(!store.get_template_system_context(t.id).await.unwrap().contains_key("test"));
    }

    #[tokio::test]
    async fn test_preview_substitutes_defaults() {
        let store = test_store();
        let mut t = template("t1", json!({"dns_servers": ["{{ dns }}"]}));
        t.default_values = json!({"dns": "9.9.9.9"});
        let t = store.create_template(t).await.unwrap();
        let output = store.preview_template(t.id).await.unwrap();
        assert!(output.contains("list servers '9.9.9.9'"));
    }

    #[tokio::test]
    async fn test_delete_detaches_from_configs() {
        let store = test_store();
        let org = create_org(&store, "org1").await;
        let t = store.create_template(dns_template("t1")).await.unwrap();
        let (_, config) = create_device(&store, &org, "r1", "00:11:22:33:44:01").await;
        store.add_template_to_config(config.id, t.id).await.unwrap();

        store.delete_template(t.id).await.unwrap();
        let config = store.get_config(config.id).await.unwrap().unwrap();
        assert!(config.templates.is_empty());
        assert!(store.delete_template(t.id).await.is_err());
    }

    #[tokio::test]
    async fn test_switching_vpn_reissues_clients() {
        let store = test_store();
        let org = create_org(&store, "org1").await;
        let vpn1 = create_vpn(&store, None).await;
        let vpn2 = create_vpn(&store, None).await;
        let mut t = template("vpn-test", json!({}));
        t.template_type = TemplateType::Vpn;
        t.vpn = Some(vpn1.id);
        let t = store.create_template(t).await.unwrap();
        let (_, config) = create_device(&store, &org, "r1", "00:11:22:33:44:01").await;
        store.add_template_to_config(config.id, t.id).await.unwrap();

        let mut edited = t.clone();
        edited.vpn = Some(vpn2.id);
        store.save_template(edited).await.unwrap();

        let clients = store.list_vpn_clients(config.id).await.unwrap();
        assert_eq!(clients.len(), 1);
        assert_eq!(clients[0].vpn, vpn2.id);
    }

    #[tokio::test]
    async fn test_failed_vpn_switch_keeps_template_and_clients() {
        let store = test_store();
        let org = create_org(&store, "org1").await;
        let vpn1 = create_vpn(&store, None).await;
        let vpn2 = create_vpn(&store, None).await;
        let mut t = template("vpn-test", json!({}));
        t.template_type = TemplateType::Vpn;
        t.vpn = Some(vpn1.id);
        t.auto_cert = true;
        let t = store.create_template(t).await.unwrap();
        let (_, config) = create_device(&store, &org, "r1", "00:11:22:33:44:01").await;
        store.add_template_to_config(config.id, t.id).await.unwrap();

        // The new VPN cannot issue certificates without its CA
        store.inner.write().await.certs.remove(&vpn2.ca);
        let mut edited = t.clone();
        edited.vpn = Some(vpn2.id);
        assert!(store.save_template(edited).await.is_err());

        let stored = store.get_template(t.id).await.unwrap().unwrap();
        assert_eq!(stored.vpn, Some(vpn1.id));
        let clients = store.list_vpn_clients(config.id).await.unwrap();
        assert_eq!(clients.len(), 1);
        assert_eq!(clients[0].vpn, vpn1.id);
        assert!(store.get_cert(clients[0].cert.unwrap()).await.unwrap().is_some());
    }
}
