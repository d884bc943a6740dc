use anyhow::Result;
use uuid::Uuid;

use crate::models::*;
use crate::validation::ValidationError;

use super::{Inner, Services};

/// VPN server, certificate and client operations
pub struct VpnRepo;

impl VpnRepo {
    pub fn list(inner: &Inner) -> Vec<Vpn> {
        let mut vpns: Vec<Vpn> = inner.vpns.values().cloned().collect();
        vpns.sort_by(|a, b| a.name.cmp(&b.name));
        vpns
    }

    pub fn get(inner: &Inner, id: Uuid) -> Option<Vpn> {
        inner.vpns.get(&id).cloned()
    }

    /// Create a VPN server and the CA that signs its clients
    pub fn create(inner: &mut Inner, services: &Services, req: CreateVpnRequest) -> Result<Vpn> {
        let mut errors = ValidationError::default();
        if req.name.trim().is_empty() {
            errors.add("name", "This field cannot be blank.");
        }
        if req.host.trim().is_empty() {
            errors.add("host", "This field cannot be blank.");
        }
        if let Some(org) = req.organization {
            if !inner.organizations.contains_key(&org) {
                errors.add("organization", format!("organization {} does not exist", org));
            }
        }
        errors.into_result()?;

        let ca = services.ca.issue_ca(&req.name, req.organization);
        let mut vpn = Vpn::new(&req.name, &req.host, req.organization, ca.id);
        vpn.port = req.port;
        vpn.proto = req.proto;
        inner.certs.insert(ca.id, ca);
        inner.vpns.insert(vpn.id, vpn.clone());
        tracing::info!("Created VPN server '{}' ({})", vpn.name, vpn.host);
        Ok(vpn)
    }

    pub fn get_cert(inner: &Inner, id: Uuid) -> Option<Cert> {
        inner.certs.get(&id).cloned()
    }

    /// Clients of a config, ordered like the templates that created them
    pub fn list_clients(inner: &Inner, config_id: Uuid) -> Vec<VpnClient> {
        let order: Vec<Uuid> = inner
            .configs
            .get(&config_id)
            .map(|c| c.templates.clone())
            .unwrap_or_default();
        let mut clients: Vec<VpnClient> = inner
            .vpn_clients
            .values()
            .filter(|c| c.config == config_id)
            .cloned()
            .collect();
        clients.sort_by_key(|c| order.iter().position(|t| *t == c.template).unwrap_or(usize::MAX));
        clients
    }
}

#[cfg(test)]
mod tests {
    use crate::db::test_utils::*;

    #[tokio::test]
    async fn test_create_vpn_issues_ca() {
        let store = test_store();
        let org = create_org(&store, "org1").await;
        let vpn = create_vpn(&store, Some(org.id)).await;
        let ca = store.get_cert(vpn.ca).await.unwrap().unwrap();
        assert_eq!(ca.organization, Some(org.id));
        assert!(ca.ca.is_none());
        assert_eq!(vpn.port, 1194);
        assert_eq!(store.list_vpns().await.unwrap().len(), 1);
    }
}
