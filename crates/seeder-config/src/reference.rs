//! Reference configuration printed by `seeder --print-sample-config`

use crate::types::*;
use std::path::PathBuf;

impl SeederConfig {
    /// A fully populated example document
    pub fn reference() -> Self {
        Self {
            servers: Servers {
                insecure: Some(BindInfo::plain(["0.0.0.0:80", "[::]:80"])),
                secure: Some(BindInfo {
                    address: vec!["0.0.0.0:443".to_string(), "[::]:443".to_string()],
                    client_ca: Some(PathBuf::from("/etc/seeder/tls/client-ca.pem")),
                    server_key: Some(PathBuf::from("/etc/seeder/tls/server.key")),
                    server_cert: Some(PathBuf::from("/etc/seeder/tls/server.pem")),
                }),
            },
            embedded_config_generator: EmbeddedConfigGeneratorSettings {
                key_path: PathBuf::from("/etc/seeder/signing/config.key"),
                cert_path: PathBuf::from("/etc/seeder/signing/config.pem"),
            },
            installer_settings: InstallerSettings {
                server_ca_path: PathBuf::from("/etc/seeder/tls/server-ca.pem"),
                config_signature_ca_path: PathBuf::from("/etc/seeder/signing/ca.pem"),
                secure_server_name: "seeder.fabric.local".to_string(),
                dns_servers: vec!["10.0.0.53".to_string()],
                ntp_servers: vec!["10.0.0.123".to_string()],
                syslog_servers: vec!["10.0.0.5:514".to_string()],
                routes: vec![Route {
                    gateway: "192.168.42.1".to_string(),
                    destinations: vec!["10.0.0.0/24".to_string()],
                }],
            },
            registry_settings: RegistrySettings {
                cert_path: Some(PathBuf::from("/etc/seeder/registry/ca.pem")),
                key_path: Some(PathBuf::from("/etc/seeder/registry/ca.key")),
                requests_dir: Some(PathBuf::from("/var/lib/seeder/registrations")),
            },
            artifact_providers: ArtifactProviders {
                directories: vec![PathBuf::from("/var/lib/seeder/artifacts")],
                oci_temp_dir: Some(PathBuf::from("/var/tmp/seeder")),
                oci_registries: vec![
                    OciRegistry {
                        url: "oci://registry.fabric.local:5000/boot".to_string(),
                        username: Some("seeder".to_string()),
                        password: Some("changeme".to_string()),
                        server_ca_path: Some(PathBuf::from("/etc/seeder/registry/server-ca.pem")),
                        client_cert_path: Some(PathBuf::from("/etc/seeder/registry/client.pem")),
                        client_key_path: Some(PathBuf::from("/etc/seeder/registry/client.key")),
                        ..Default::default()
                    },
                    OciRegistry {
                        url: "oci://127.0.0.1:5001/boot-dev".to_string(),
                        access_token: Some("changeme-access-token".to_string()),
                        refresh_token: Some("changeme-refresh-token".to_string()),
                        plain_http: true,
                        ..Default::default()
                    },
                ],
            },
        }
    }
}
