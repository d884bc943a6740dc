use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use uuid::Uuid;

/// Vpn represents a VPN server devices can be attached to
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vpn {
    pub id: Uuid,
    pub name: String,
    pub host: String,
    pub port: u16,
    pub proto: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization: Option<Uuid>,
    /// CA certificate that signs client certificates
    pub ca: Uuid,
    pub created_at: DateTime<Utc>,
}

/// CreateVpnRequest for creating new VPN servers
#[derive(Debug, Clone, Deserialize)]
pub struct CreateVpnRequest {
    pub name: String,
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_proto")]
    pub proto: String,
    #[serde(default)]
    pub organization: Option<Uuid>,
}

fn default_port() -> u16 {
    1194
}

fn default_proto() -> String {
    "udp".to_string()
}

/// Certificate issued by a certificate authority. Key material is opaque.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cert {
    pub id: Uuid,
    pub name: String,
    pub common_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization: Option<Uuid>,
    /// Signing CA, None for a CA certificate itself
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ca: Option<Uuid>,
    pub serial_number: String,
    pub certificate: String,
    #[serde(skip_serializing)]
    pub private_key: String,
    pub created_at: DateTime<Utc>,
}

/// VpnClient links a config to a VPN server through a VPN template
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VpnClient {
    pub id: Uuid,
    pub config: Uuid,
    pub vpn: Uuid,
    pub template: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cert: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl Vpn {
    pub fn new(name: &str, host: &str, organization: Option<Uuid>, ca: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            host: host.to_string(),
            port: default_port(),
            proto: default_proto(),
            organization,
            ca,
            created_at: Utc::now(),
        }
    }

    /// Short identity used to namespace client variables
    pub fn hex(&self) -> String {
        self.id.simple().to_string()
    }

    /// Client-side configuration fragment for this VPN. Depends only on the
    /// VPN definition; certificate material is referenced through variables
    /// resolved per device at render time.
    pub fn auto_client(&self, auto_cert: bool) -> Value {
        let hex = self.hex();
        let ca_path = placeholder("ca_path", &hex);
        let mut files = vec![json!({
            "path": ca_path.clone(),
            "mode": "0600",
            "contents": placeholder("ca_contents", &hex),
        })];

        let (cert, key) = if auto_cert {
            let cert_path = placeholder("cert_path", &hex);
            let key_path = placeholder("key_path", &hex);
            files.push(json!({
                "path": cert_path.clone(),
                "mode": "0600",
                "contents": placeholder("cert_contents", &hex),
            }));
            files.push(json!({
                "path": key_path.clone(),
                "mode": "0600",
                "contents": placeholder("key_contents", &hex),
            }));
            (cert_path, key_path)
        } else {
            ("cert.pem".to_string(), "key.pem".to_string())
        };

        json!({
            "openvpn": [{
                "name": format!("{}_{}", crate::utils::slugify(&self.name), hex),
                "enabled": true,
                "client": true,
                "dev": format!("tun{}", &hex[..8]),
                "dev_type": "tun",
                "proto": self.proto,
                "remote": [{"host": self.host, "port": self.port}],
                "nobind": true,
                "pull": true,
                "resolv_retry": "infinite",
                "ca": ca_path,
                "cert": cert,
                "key": key,
            }],
            "files": files,
        })
    }

    /// Variables that fill the placeholders of `auto_client` for one client
    pub fn client_variables(
        &self,
        ca: &Cert,
        cert: Option<&Cert>,
        x509_dir: &str,
    ) -> HashMap<String, String> {
        let hex = self.hex();
        let dir = x509_dir.trim_end_matches('/');
        let mut vars = HashMap::from([
            (format!("ca_path_{}", hex), format!("{}/ca-{}.pem", dir, hex)),
            (format!("ca_contents_{}", hex), ca.certificate.clone()),
            (format!("vpnserver_{}", hex), self.host.clone()),
        ]);
        if let Some(cert) = cert {
            vars.insert(format!("cert_path_{}", hex), format!("{}/client-{}.pem", dir, hex));
            vars.insert(format!("cert_contents_{}", hex), cert.certificate.clone());
            vars.insert(format!("key_path_{}", hex), format!("{}/key-{}.pem", dir, hex));
            vars.insert(format!("key_contents_{}", hex), cert.private_key.clone());
        }
        vars
    }
}

fn placeholder(kind: &str, hex: &str) -> String {
    format!("{{{{ {}_{} }}}}", kind, hex)
}
