//! Stage configuration handed to installer stages

use crate::error::{Result, SeederError};
use crate::tls::{parse_certs, read_file};
use seeder_artifacts::{Arch, Stage};
use seeder_config::InstallerSettings;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Route entry as the installer consumes it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRoute {
    pub gateway: String,
    pub destinations: Vec<String>,
}

/// Payload signed into every stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageConfig {
    pub stage: String,
    pub arch: String,
    /// CA for the secure listener, PEM
    pub ca: String,
    /// CA for config signatures, PEM
    pub signature_ca: String,
    /// Where the next stage (or the agent) is fetched from
    pub next_url: String,
    pub register_url: String,
    pub dns_servers: Vec<String>,
    pub ntp_servers: Vec<String>,
    pub syslog_servers: Vec<String>,
    pub routes: Vec<StageRoute>,
}

/// Installer settings with the referenced CA files loaded
#[derive(Debug, Clone)]
pub struct Installer {
    server_ca: String,
    signature_ca: String,
    secure_server_name: String,
    dns_servers: Vec<String>,
    ntp_servers: Vec<String>,
    syslog_servers: Vec<String>,
    routes: Vec<StageRoute>,
}

impl Installer {
    pub fn from_settings(settings: &InstallerSettings) -> Result<Self> {
        let secure_server_name = settings.secure_server_name.trim().trim_end_matches('/');
        if secure_server_name.is_empty() {
            return Err(SeederError::Config(
                "installer_settings.secure_server_name must be set".to_string(),
            ));
        }

        Ok(Self {
            server_ca: load_ca(&settings.server_ca_path, "server_ca_path")?,
            signature_ca: load_ca(&settings.config_signature_ca_path, "config_signature_ca_path")?,
            secure_server_name: secure_server_name.to_string(),
            dns_servers: settings.dns_servers.clone(),
            ntp_servers: settings.ntp_servers.clone(),
            syslog_servers: settings.syslog_servers.clone(),
            routes: settings
                .routes
                .iter()
                .map(|r| StageRoute {
                    gateway: r.gateway.clone(),
                    destinations: r.destinations.clone(),
                })
                .collect(),
        })
    }

    pub fn signature_ca(&self) -> &str {
        &self.signature_ca
    }

    /// URL a device fetches after finishing `stage`
    pub fn next_url(&self, stage: Stage, arch: Arch) -> String {
        match stage.next() {
            Some(next) => format!("https://{}/{}/{}", self.secure_server_name, next, arch),
            None => format!("https://{}/agent/{}", self.secure_server_name, arch),
        }
    }

    pub fn register_url(&self) -> String {
        format!("https://{}/register", self.secure_server_name)
    }

    pub fn stage_config(&self, stage: Stage, arch: Arch) -> StageConfig {
        StageConfig {
            stage: stage.to_string(),
            arch: arch.to_string(),
            ca: self.server_ca.clone(),
            signature_ca: self.signature_ca.clone(),
            next_url: self.next_url(stage, arch),
            register_url: self.register_url(),
            dns_servers: self.dns_servers.clone(),
            ntp_servers: self.ntp_servers.clone(),
            syslog_servers: self.syslog_servers.clone(),
            routes: self.routes.clone(),
        }
    }
}

fn load_ca(path: &Path, field: &str) -> Result<String> {
    if path.as_os_str().is_empty() {
        return Err(SeederError::Config(format!("installer_settings.{field} must be set")));
    }
    let pem = read_file(path)?;
    parse_certs(&pem).map_err(|e| SeederError::Config(format!("{}: {e}", path.display())))?;
    String::from_utf8(pem).map_err(|_| SeederError::Config(format!("{} is not PEM text", path.display())))
}
