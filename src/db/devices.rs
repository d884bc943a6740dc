use anyhow::Result;
use uuid::Uuid;

use crate::models::*;
use crate::utils::{is_valid_hostname, is_valid_mac};
use crate::validation::ValidationError;

use super::{not_found, Inner};

/// Device operations
pub struct DeviceRepo;

impl DeviceRepo {
    pub fn list(inner: &Inner) -> Vec<Device> {
        let mut devices: Vec<Device> = inner.devices.values().cloned().collect();
        devices.sort_by(|a, b| a.name.cmp(&b.name));
        devices
    }

    pub fn get(inner: &Inner, id: Uuid) -> Option<Device> {
        inner.devices.get(&id).cloned()
    }

    pub fn create(inner: &mut Inner, req: CreateDeviceRequest) -> Result<Device> {
        let mut errors = ValidationError::default();
        if !is_valid_hostname(&req.name) {
            errors.add("name", format!("'{}' is not a valid hostname", req.name));
        }
        if !is_valid_mac(&req.mac_address) {
            errors.add("mac_address", "Enter a valid MAC address.");
        }
        if !inner.organizations.contains_key(&req.organization) {
            errors.add("organization", format!("organization {} does not exist", req.organization));
        }
        let mut device = Device::new(&req.name, &req.mac_address, req.organization);
        if inner.devices.values().any(|d| d.mac_address == device.mac_address) {
            errors.add("mac_address", "Device with this Mac address already exists.");
        }
        errors.into_result()?;

        if let Some(key) = req.key.filter(|k| !k.is_empty()) {
            device.key = key;
        }
        inner.devices.insert(device.id, device.clone());
        tracing::info!("Created device '{}' ({})", device.name, device.mac_address);
        Ok(device)
    }

    /// Delete a device with its config, VPN clients and their certificates
    pub fn delete(inner: &mut Inner, id: Uuid) -> Result<()> {
        let device = inner.devices.remove(&id).ok_or_else(|| not_found("device", id))?;

        let config_ids: Vec<Uuid> = inner
            .configs
            .values()
            .filter(|c| c.device == id)
            .map(|c| c.id)
            .collect();
        for config_id in config_ids {
            inner.configs.remove(&config_id);
            inner.rendered.remove(&config_id);
            let clients: Vec<VpnClient> = inner
                .vpn_clients
                .values()
                .filter(|c| c.config == config_id)
                .cloned()
                .collect();
            for client in clients {
                remove_vpn_client(inner, &client);
            }
        }

        tracing::info!("Deleted device '{}' ({})", device.name, device.id);
        Ok(())
    }
}

/// Remove a VPN client and the certificate it was issued
pub(super) fn remove_vpn_client(inner: &mut Inner, client: &VpnClient) {
    inner.vpn_clients.remove(&client.id);
    if let Some(cert_id) = client.cert {
        // Another client of the same config and VPN may share the certificate
        if !inner.vpn_clients.values().any(|c| c.cert == Some(cert_id)) {
            inner.certs.remove(&cert_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::db::test_utils::*;
    use crate::models::*;
    use crate::validation::ValidationError;
    use serde_json::json;

    #[tokio::test]
    async fn test_invalid_device_fields() {
        let store = test_store();
        let org = create_org(&store, "org1").await;
        let err = store
            .create_device(CreateDeviceRequest {
                name: "bad name".to_string(),
                mac_address: "nope".to_string(),
                key: None,
                organization: org.id,
                backend: None,
            })
            .await
            .unwrap_err();
        let validation = err.downcast_ref::<ValidationError>().unwrap();
        assert!(validation.has_field("name"));
        assert!(validation.has_field("mac_address"));
        assert!(store.list_devices().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_device_gets_config() {
        let store = test_store();
        let org = create_org(&store, "org1").await;
        let (device, config) = create_device(&store, &org, "router-1", "00-11-22-33-44-55").await;
        assert_eq!(device.mac_address, "00:11:22:33:44:55");
        assert_eq!(config.device, device.id);
        assert_eq!(config.status, ConfigStatus::Modified);
        assert_eq!(config.backend, crate::backend::OPENWRT);
    }

    #[tokio::test]
    async fn test_delete_cascades() {
        let store = test_store();
        let org = create_org(&store, "org1").await;
        let vpn = create_vpn(&store, None).await;
        let mut t = template("vpn-test", json!({}));
        t.template_type = TemplateType::Vpn;
        t.vpn = Some(vpn.id);
        t.auto_cert = true;
        let t = store.create_template(t).await.unwrap();
        let (device, config) = create_device(&store, &org, "router-1", "00:11:22:33:44:55").await;
        store.add_template_to_config(config.id, t.id).await.unwrap();
        let clients = store.list_vpn_clients(config.id).await.unwrap();
        let cert = clients[0].cert.unwrap();
        store.render_config(config.id).await.unwrap();

        store.delete_device(device.id).await.unwrap();

        assert!(store.get_config(config.id).await.unwrap().is_none());
        assert!(store.list_vpn_clients(config.id).await.unwrap().is_empty());
        assert!(store.get_cert(cert).await.unwrap().is_none());
        assert!(store.get_cert(vpn.ca).await.unwrap().is_some());
        assert!(store.get_template(t.id).await.unwrap().is_some());
        assert!(store.delete_device(device.id).await.is_err());
    }
}
