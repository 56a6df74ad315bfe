#![allow(dead_code)]

use rcgen::{
    BasicConstraints, CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa, KeyPair, KeyUsagePurpose,
};
use seeder_artifacts::{ArtifactProvider, EmbeddedProvider, EmbeddedTable, ProviderChain};
use seeder_config::{BindInfo, EmbeddedConfigGeneratorSettings, InstallerSettings, SeederConfig};
use seeder_server::{ListenerKind, Seeder};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

pub static ARTIFACTS: EmbeddedTable = &[
    ("stage0-x86_64", b"stage0 x86_64 payload"),
    ("stage1-x86_64", b"stage1 x86_64 payload"),
    ("agent-x86_64", b"agent x86_64 payload"),
];

pub struct TestCa {
    pub cert: rcgen::Certificate,
    pub key: KeyPair,
    pub cert_pem: String,
}

pub struct TestLeaf {
    pub cert_pem: String,
    pub key_pem: String,
}

impl TestCa {
    pub fn new(common_name: &str) -> Self {
        let mut params = CertificateParams::new(Vec::<String>::new()).unwrap();
        params.distinguished_name.push(DnType::CommonName, common_name);
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];

        let key = KeyPair::generate().unwrap();
        let cert = params.self_signed(&key).unwrap();
        Self {
            cert_pem: cert.pem(),
            cert,
            key,
        }
    }

    pub fn leaf(&self, name: &str, usage: Option<ExtendedKeyUsagePurpose>) -> TestLeaf {
        let mut params = CertificateParams::new(vec![name.to_string()]).unwrap();
        params.distinguished_name.push(DnType::CommonName, name);
        params.extended_key_usages = usage.into_iter().collect();

        let key = KeyPair::generate().unwrap();
        let cert = params.signed_by(&key, &self.cert, &self.key).unwrap();
        TestLeaf {
            cert_pem: cert.pem(),
            key_pem: key.serialize_pem(),
        }
    }
}

pub fn write(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, contents).unwrap();
    path
}

/// Key material and a config with a plain listener on an ephemeral port
pub struct Fixture {
    pub dir: TempDir,
    pub config: SeederConfig,
    pub signature_ca: TestCa,
    pub server_ca: TestCa,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let signature_ca = TestCa::new("Seeder Signature CA");
        let server_ca = TestCa::new("Seeder Server CA");
        let signer = signature_ca.leaf("config-signer", None);

        let mut config = SeederConfig::default();
        config.servers.insecure = Some(BindInfo::plain(["127.0.0.1:0"]));
        config.embedded_config_generator = EmbeddedConfigGeneratorSettings {
            key_path: write(dir.path(), "signer.key", &signer.key_pem),
            cert_path: write(dir.path(), "signer.pem", &signer.cert_pem),
        };
        config.installer_settings = InstallerSettings {
            server_ca_path: write(dir.path(), "server-ca.pem", &server_ca.cert_pem),
            config_signature_ca_path: write(dir.path(), "signature-ca.pem", &signature_ca.cert_pem),
            secure_server_name: "seeder.test".to_string(),
            ..Default::default()
        };

        Self {
            dir,
            config,
            signature_ca,
            server_ca,
        }
    }

    /// Add a TLS listener with a server certificate for `seeder.test`
    pub fn with_secure_listener(mut self, client_ca: Option<&TestCa>) -> Self {
        let server = self
            .server_ca
            .leaf("seeder.test", Some(ExtendedKeyUsagePurpose::ServerAuth));
        let client_ca = client_ca.map(|ca| write(self.dir.path(), "client-ca.pem", &ca.cert_pem));

        self.config.servers.secure = Some(BindInfo {
            address: vec!["127.0.0.1:0".to_string()],
            client_ca,
            server_key: Some(write(self.dir.path(), "server.key", &server.key_pem)),
            server_cert: Some(write(self.dir.path(), "server.pem", &server.cert_pem)),
        });
        self
    }

    pub fn seeder(&self) -> Seeder {
        self.seeder_with(embedded_chain())
    }

    pub fn seeder_with(&self, chain: ProviderChain) -> Seeder {
        Seeder::new(&self.config, Arc::new(chain)).unwrap()
    }
}

pub fn embedded_chain() -> ProviderChain {
    ProviderChain::new(vec![Arc::new(EmbeddedProvider::new(ARTIFACTS)) as Arc<dyn ArtifactProvider>])
}

pub async fn addr_of(seeder: &Seeder, kind: ListenerKind) -> SocketAddr {
    seeder
        .local_addrs()
        .await
        .into_iter()
        .find(|local| local.kind == kind)
        .map(|local| local.addr)
        .unwrap()
}
