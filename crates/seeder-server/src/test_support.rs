//! Certificate and config fixtures for unit tests

use rcgen::{BasicConstraints, CertificateParams, DnType, IsCa, KeyPair, KeyUsagePurpose};
use seeder_config::{BindInfo, EmbeddedConfigGeneratorSettings, InstallerSettings, Route, SeederConfig};
use std::path::{Path, PathBuf};

pub(crate) struct TestCa {
    pub cert: rcgen::Certificate,
    pub key: KeyPair,
    pub cert_pem: String,
    pub key_pem: String,
}

pub(crate) struct TestLeaf {
    pub cert_pem: String,
    pub key_pem: String,
}

impl TestCa {
    pub fn new(common_name: &str) -> Self {
        let mut params = CertificateParams::new(Vec::<String>::new()).unwrap();
        params.distinguished_name.push(DnType::CommonName, common_name);
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];

        let key = KeyPair::generate().unwrap();
        let cert = params.self_signed(&key).unwrap();
        Self {
            cert_pem: cert.pem(),
            key_pem: key.serialize_pem(),
            cert,
            key,
        }
    }

    pub fn leaf(&self, name: &str) -> TestLeaf {
        self.leaf_with_key(name, KeyPair::generate().unwrap())
    }

    pub fn leaf_with_key(&self, name: &str, key: KeyPair) -> TestLeaf {
        let mut params = CertificateParams::new(vec![name.to_string()]).unwrap();
        params.distinguished_name.push(DnType::CommonName, name);
        let cert = params.signed_by(&key, &self.cert, &self.key).unwrap();
        TestLeaf {
            cert_pem: cert.pem(),
            key_pem: key.serialize_pem(),
        }
    }
}

pub(crate) fn write_pem(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, contents).unwrap();
    path
}

/// A complete, valid config with a plain listener on an ephemeral port
///
/// All referenced key material is written under `dir`.
pub(crate) fn seeder_config(dir: &Path) -> SeederConfig {
    let signature_ca = TestCa::new("Seeder Signature CA");
    let signer = signature_ca.leaf("config-signer");
    let server_ca = TestCa::new("Seeder Server CA");

    let mut config = SeederConfig::default();
    config.servers.insecure = Some(BindInfo::plain(["127.0.0.1:0"]));
    config.embedded_config_generator = EmbeddedConfigGeneratorSettings {
        key_path: write_pem(dir, "signer.key", &signer.key_pem),
        cert_path: write_pem(dir, "signer.pem", &signer.cert_pem),
    };
    config.installer_settings = InstallerSettings {
        server_ca_path: write_pem(dir, "server-ca.pem", &server_ca.cert_pem),
        config_signature_ca_path: write_pem(dir, "signature-ca.pem", &signature_ca.cert_pem),
        secure_server_name: "seeder.test:8443".to_string(),
        dns_servers: vec!["10.0.0.53".to_string()],
        ntp_servers: vec!["10.0.0.123".to_string()],
        syslog_servers: vec![],
        routes: vec![Route {
            gateway: "192.168.42.1".to_string(),
            destinations: vec!["10.0.0.0/24".to_string()],
        }],
    };
    config
}
