//! Certificates and VPN client derivation.

use chrono::Utc;
use rand::Rng;
use serde_json::Value;
use uuid::Uuid;

use crate::models::{Cert, Device, Template, Vpn};

/// Issues CA and client certificates
pub trait CertificateAuthority: Send + Sync {
    /// Self-signed CA used by a VPN server
    fn issue_ca(&self, name: &str, organization: Option<Uuid>) -> Cert;

    /// Client certificate signed by `ca`
    fn issue(&self, ca: &Cert, common_name: &str, organization: Option<Uuid>) -> Cert;
}

/// In-process authority producing opaque PEM-shaped material
#[derive(Debug, Default)]
pub struct LocalCertificateAuthority;

impl LocalCertificateAuthority {
    fn build(name: &str, common_name: &str, organization: Option<Uuid>, ca: Option<Uuid>) -> Cert {
        let serial: u64 = rand::thread_rng().gen();
        let id = Uuid::new_v4();
        Cert {
            id,
            name: name.to_string(),
            common_name: common_name.to_string(),
            organization,
            ca,
            serial_number: serial.to_string(),
            certificate: pem("CERTIFICATE", &id),
            private_key: pem("PRIVATE KEY", &Uuid::new_v4()),
            created_at: Utc::now(),
        }
    }
}

impl CertificateAuthority for LocalCertificateAuthority {
    fn issue_ca(&self, name: &str, organization: Option<Uuid>) -> Cert {
        tracing::info!("Issuing CA '{}'", name);
        Self::build(name, name, organization, None)
    }

    fn issue(&self, ca: &Cert, common_name: &str, organization: Option<Uuid>) -> Cert {
        tracing::debug!("Issuing certificate '{}' signed by {}", common_name, ca.id);
        Self::build(common_name, common_name, organization, Some(ca.id))
    }
}

fn pem(label: &str, id: &Uuid) -> String {
    format!(
        "-----BEGIN {label}-----\n{}\n-----END {label}-----\n",
        id.simple(),
        label = label
    )
}

/// Derives the client fragment a device gets from a VPN template
pub struct VpnAutoClientDeriver<'a> {
    ca: &'a dyn CertificateAuthority,
}

impl<'a> VpnAutoClientDeriver<'a> {
    pub fn new(ca: &'a dyn CertificateAuthority) -> Self {
        Self { ca }
    }

    /// Returns the client fragment and, when the template asks for
    /// automatic certificates, the client certificate (`existing` when the
    /// config already has one for this VPN, otherwise a freshly issued one
    /// owned by the device's organization).
    pub fn derive(
        &self,
        template: &Template,
        vpn: &Vpn,
        device: &Device,
        ca_cert: &Cert,
        existing: Option<&Cert>,
    ) -> (Value, Option<Cert>) {
        let fragment = vpn.auto_client(template.auto_cert);
        if !template.auto_cert {
            return (fragment, None);
        }
        let cert = match existing {
            Some(cert) => cert.clone(),
            None => {
                let common_name = format!("{}-{}", device.mac_address, device.name);
                let mut cert = self.ca.issue(ca_cert, &common_name, Some(device.organization));
                cert.name = device.name.clone();
                cert
            }
        };
        (fragment, Some(cert))
    }
}
