//! Device registration
//!
//! Devices submit a CSR once they reach the secure listener. With a
//! registry CA configured every CSR is signed on the spot; without one the
//! request is kept in memory as pending until approved out of band: the CSR
//! is written to `requests_dir` and the operator answers it by placing the
//! issued certificate next to it.
//!
//! A device id is bound to the first CSR it registers with. The book holds
//! at most [`MAX_REGISTRATIONS`] devices.

use crate::error::{Result, SeederError};
use crate::tls::{parse_certs, read_file};
use rcgen::{CertificateParams, CertificateSigningRequestParams, KeyPair};
use seeder_config::RegistrySettings;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Devices kept on record before new registrations are refused
pub const MAX_REGISTRATIONS: usize = 4096;

const MAX_DEVICE_ID_LEN: usize = 128;

/// Body of `POST /register`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationRequest {
    pub device_id: String,
    /// PKCS#10 certificate signing request, PEM
    pub csr: String,
}

/// Where a device's registration stands
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum RegistrationStatus {
    Pending,
    Approved {
        /// Issued device certificate, PEM
        certificate: String,
    },
}

#[derive(Debug, Clone)]
struct Registration {
    request_id: Uuid,
    csr: String,
    status: RegistrationStatus,
}

struct Authority {
    cert: rcgen::Certificate,
    key: KeyPair,
}

/// In-memory registration book
pub struct Registrar {
    authority: Option<Authority>,
    requests_dir: Option<PathBuf>,
    capacity: usize,
    registrations: RwLock<HashMap<String, Registration>>,
}

impl Registrar {
    pub fn from_settings(settings: &RegistrySettings) -> Result<Self> {
        let authority = match (&settings.cert_path, &settings.key_path) {
            (Some(cert), Some(key)) => Some(load_authority(cert, key)?),
            (None, None) => None,
            _ => {
                return Err(SeederError::Config(
                    "registry_settings.cert_path and key_path must be set together".to_string(),
                ))
            }
        };

        if authority.is_some() {
            warn!("=====================================================================");
            warn!("INSECURE: registry CA configured, every registration request is");
            warn!("automatically approved and signed. Do not run this in production.");
            warn!("=====================================================================");
        }

        if let Some(dir) = &settings.requests_dir {
            if authority.is_some() {
                warn!(dir = %dir.display(), "registry_settings.requests_dir is unused while a registry CA is configured");
            } else if !dir.is_dir() {
                return Err(SeederError::Config(format!(
                    "registry_settings.requests_dir {} is not a directory",
                    dir.display()
                )));
            } else {
                info!(dir = %dir.display(), "Pending registrations are written to the requests directory");
            }
        } else if authority.is_none() {
            warn!("No registry CA or requests_dir configured, registrations stay pending");
        }

        Ok(Self {
            authority,
            requests_dir: settings.requests_dir.clone(),
            capacity: MAX_REGISTRATIONS,
            registrations: RwLock::new(HashMap::new()),
        })
    }

    pub fn auto_approves(&self) -> bool {
        self.authority.is_some()
    }

    /// Cap the number of devices kept on record
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Record a registration request, signing it right away when possible
    ///
    /// Resubmitting the same CSR returns the status on record. A different
    /// CSR for a known device is a conflict and never replaces the entry.
    pub async fn submit(&self, request: RegistrationRequest) -> Result<RegistrationStatus> {
        let device_id = request.device_id.trim();
        validate_device_id(device_id)?;
        let csr_pem = request.csr.trim();
        if csr_pem.is_empty() {
            return Err(SeederError::Registration(format!("device {device_id}: csr is empty")));
        }
        let csr = CertificateSigningRequestParams::from_pem(csr_pem)
            .map_err(|e| SeederError::Registration(format!("device {device_id}: invalid CSR: {e}")))?;

        let mut registrations = self.registrations.write().await;
        if let Some(existing) = registrations.get(device_id) {
            if existing.csr != csr_pem {
                warn!(device_id = %device_id, request_id = %existing.request_id, "Registration with a different CSR refused");
                return Err(SeederError::RegistrationConflict {
                    device_id: device_id.to_string(),
                });
            }
            debug!(device_id = %device_id, request_id = %existing.request_id, "Registration resubmitted");
            return Ok(existing.status.clone());
        }
        if registrations.len() >= self.capacity {
            return Err(SeederError::RegistrationFull {
                capacity: self.capacity,
            });
        }

        let status = match &self.authority {
            Some(authority) => {
                let cert = csr
                    .signed_by(&authority.cert, &authority.key)
                    .map_err(|e| SeederError::Registration(format!("device {device_id}: signing failed: {e}")))?;
                RegistrationStatus::Approved {
                    certificate: cert.pem(),
                }
            }
            None => {
                if let Some(dir) = &self.requests_dir {
                    let path = dir.join(format!("{device_id}.csr"));
                    tokio::fs::write(&path, csr_pem)
                        .await
                        .map_err(|source| SeederError::io(&path, source))?;
                }
                RegistrationStatus::Pending
            }
        };

        let registration = Registration {
            request_id: Uuid::new_v4(),
            csr: csr_pem.to_string(),
            status: status.clone(),
        };
        info!(
            device_id = %device_id,
            request_id = %registration.request_id,
            approved = matches!(status, RegistrationStatus::Approved { .. }),
            "Registration received"
        );
        registrations.insert(device_id.to_string(), registration);

        Ok(status)
    }

    /// Status on record, picking up a certificate dropped into the
    /// requests directory for a pending device
    pub async fn status(&self, device_id: &str) -> Option<RegistrationStatus> {
        let status = self
            .registrations
            .read()
            .await
            .get(device_id)
            .map(|r| r.status.clone())?;
        if status != RegistrationStatus::Pending {
            return Some(status);
        }

        match self.approved_certificate(device_id).await {
            Some(certificate) => {
                self.approve(device_id, certificate).await;
                self.registrations
                    .read()
                    .await
                    .get(device_id)
                    .map(|r| r.status.clone())
            }
            None => Some(status),
        }
    }

    /// Approve a pending device with a certificate issued elsewhere
    ///
    /// Returns false if the device has no registration on record or is
    /// already approved.
    pub async fn approve(&self, device_id: &str, certificate: String) -> bool {
        let mut registrations = self.registrations.write().await;
        match registrations.get_mut(device_id) {
            Some(registration) if registration.status == RegistrationStatus::Pending => {
                registration.status = RegistrationStatus::Approved { certificate };
                info!(device_id = %device_id, request_id = %registration.request_id, "Registration approved");
                true
            }
            _ => false,
        }
    }

    async fn approved_certificate(&self, device_id: &str) -> Option<String> {
        let path = self.requests_dir.as_ref()?.join(format!("{device_id}.pem"));
        let pem = match tokio::fs::read(&path).await {
            Ok(pem) => pem,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read approved certificate");
                return None;
            }
        };
        if let Err(e) = parse_certs(&pem) {
            warn!(path = %path.display(), error = %e, "Ignoring unusable approved certificate");
            return None;
        }
        String::from_utf8(pem).ok()
    }
}

/// Device ids double as file names in the requests directory
fn validate_device_id(device_id: &str) -> Result<()> {
    if device_id.is_empty() {
        return Err(SeederError::Registration("device_id is empty".to_string()));
    }
    let valid = device_id.len() <= MAX_DEVICE_ID_LEN
        && !device_id.starts_with('.')
        && device_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':'));
    if !valid {
        return Err(SeederError::Registration(format!("invalid device_id {device_id:?}")));
    }
    Ok(())
}

fn load_authority(cert_path: &Path, key_path: &Path) -> Result<Authority> {
    let cert_pem = String::from_utf8(read_file(cert_path)?)
        .map_err(|_| SeederError::SigningMaterial(format!("{} is not PEM text", cert_path.display())))?;
    let key_pem = String::from_utf8(read_file(key_path)?)
        .map_err(|_| SeederError::SigningMaterial(format!("{} is not PEM text", key_path.display())))?;

    let key = KeyPair::from_pem(&key_pem)
        .map_err(|e| SeederError::SigningMaterial(format!("registry key {}: {e}", key_path.display())))?;
    let params = CertificateParams::from_ca_cert_pem(&cert_pem)
        .map_err(|e| SeederError::SigningMaterial(format!("registry CA {}: {e}", cert_path.display())))?;
    // Re-signing the parsed CA yields an issuer with the same name and key,
    // which is all that issuing certificates needs
    let cert = params
        .self_signed(&key)
        .map_err(|e| SeederError::SigningMaterial(format!("registry CA {}: {e}", cert_path.display())))?;

    Ok(Authority { cert, key })
}

impl std::fmt::Debug for Registrar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registrar")
            .field("auto_approves", &self.auto_approves())
            .finish_non_exhaustive()
    }
}
