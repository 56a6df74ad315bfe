//! Signed embedded configuration
//!
//! Installer stages carry their configuration appended to the executable
//! itself. The [`EmbeddedConfigGenerator`] signs a payload with the
//! configured key; the resulting [`EmbeddedConfig`] travels as a trailer:
//!
//! ```text
//! <stage binary> <envelope JSON> <envelope length: u64 LE> "SEEDCFG1"
//! ```
//!
//! The envelope holds the payload and signature (base64), the signature
//! algorithm and the signing certificate (PEM). A device verifies the
//! certificate against the signature CA it was given and the signature
//! against the exact payload bytes.

use crate::error::{Result, SeederError};
use crate::tls::{ensure_crypto_provider_installed, parse_certs, parse_private_key, read_file};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use ring::signature::{UnparsedPublicKey, VerificationAlgorithm};
use rustls::crypto::CryptoProvider;
use rustls::sign::SigningKey;
use rustls::SignatureScheme;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::info;
use x509_parser::pem::parse_x509_pem;
use x509_parser::x509::SubjectPublicKeyInfo;

/// Marks the end of a stage binary carrying an embedded config
pub const TRAILER_MAGIC: &[u8; 8] = b"SEEDCFG1";

const TRAILER_FOOTER_LEN: usize = 8 + TRAILER_MAGIC.len();

/// Signature algorithms accepted for config signing keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SignatureAlgorithm {
    EcdsaP256Sha256,
    EcdsaP384Sha384,
    Ed25519,
    RsaPssSha256,
}

impl SignatureAlgorithm {
    const OFFERED: [SignatureScheme; 4] = [
        SignatureScheme::ECDSA_NISTP256_SHA256,
        SignatureScheme::ECDSA_NISTP384_SHA384,
        SignatureScheme::ED25519,
        SignatureScheme::RSA_PSS_SHA256,
    ];

    fn from_scheme(scheme: SignatureScheme) -> Option<Self> {
        match scheme {
            SignatureScheme::ECDSA_NISTP256_SHA256 => Some(Self::EcdsaP256Sha256),
            SignatureScheme::ECDSA_NISTP384_SHA384 => Some(Self::EcdsaP384Sha384),
            SignatureScheme::ED25519 => Some(Self::Ed25519),
            SignatureScheme::RSA_PSS_SHA256 => Some(Self::RsaPssSha256),
            _ => None,
        }
    }

    fn scheme(self) -> SignatureScheme {
        match self {
            Self::EcdsaP256Sha256 => SignatureScheme::ECDSA_NISTP256_SHA256,
            Self::EcdsaP384Sha384 => SignatureScheme::ECDSA_NISTP384_SHA384,
            Self::Ed25519 => SignatureScheme::ED25519,
            Self::RsaPssSha256 => SignatureScheme::RSA_PSS_SHA256,
        }
    }

    fn verification(self) -> &'static dyn VerificationAlgorithm {
        match self {
            Self::EcdsaP256Sha256 => &ring::signature::ECDSA_P256_SHA256_ASN1,
            Self::EcdsaP384Sha384 => &ring::signature::ECDSA_P384_SHA384_ASN1,
            Self::Ed25519 => &ring::signature::ED25519,
            Self::RsaPssSha256 => &ring::signature::RSA_PSS_2048_8192_SHA256,
        }
    }
}

/// A payload with its detached signature and signing certificate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddedConfig {
    pub payload: Vec<u8>,
    pub signature: Vec<u8>,
    pub algorithm: SignatureAlgorithm,
    /// Signing certificate, PEM
    pub certificate: String,
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    payload: String,
    signature: String,
    algorithm: SignatureAlgorithm,
    certificate: String,
}

impl EmbeddedConfig {
    /// The envelope as JSON
    pub fn to_json(&self) -> Result<Vec<u8>> {
        let envelope = Envelope {
            payload: STANDARD.encode(&self.payload),
            signature: STANDARD.encode(&self.signature),
            algorithm: self.algorithm,
            certificate: self.certificate.clone(),
        };
        serde_json::to_vec(&envelope).map_err(|e| SeederError::Signing(e.to_string()))
    }

    pub fn from_json(data: &[u8]) -> Result<Self> {
        let envelope: Envelope = serde_json::from_slice(data)
            .map_err(|e| SeederError::Verification(format!("malformed envelope: {e}")))?;
        let decode = |field: &str, value: &str| {
            STANDARD
                .decode(value)
                .map_err(|e| SeederError::Verification(format!("malformed {field}: {e}")))
        };
        Ok(Self {
            payload: decode("payload", &envelope.payload)?,
            signature: decode("signature", &envelope.signature)?,
            algorithm: envelope.algorithm,
            certificate: envelope.certificate,
        })
    }

    /// Bytes to append to a stage executable
    pub fn embed_trailer(&self) -> Result<Vec<u8>> {
        let mut trailer = self.to_json()?;
        let len = trailer.len() as u64;
        trailer.extend_from_slice(&len.to_le_bytes());
        trailer.extend_from_slice(TRAILER_MAGIC);
        Ok(trailer)
    }

    /// Recover the config appended to `data` by [`embed_trailer`](Self::embed_trailer)
    pub fn extract(data: &[u8]) -> Result<Self> {
        let missing = || SeederError::Verification("no embedded config trailer".to_string());

        let footer_start = data.len().checked_sub(TRAILER_FOOTER_LEN).ok_or_else(missing)?;
        let (rest, footer) = data.split_at(footer_start);
        let (len, magic) = footer.split_at(8);
        if magic != TRAILER_MAGIC {
            return Err(missing());
        }

        let mut len_bytes = [0u8; 8];
        len_bytes.copy_from_slice(len);
        let len = usize::try_from(u64::from_le_bytes(len_bytes))
            .ok()
            .filter(|len| *len <= rest.len())
            .ok_or_else(|| SeederError::Verification("embedded config length out of range".to_string()))?;

        Self::from_json(&rest[rest.len() - len..])
    }

    /// Decode the payload as JSON
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.payload)
            .map_err(|e| SeederError::Verification(format!("malformed payload: {e}")))
    }

    /// Check the signing certificate was issued by `signature_ca_pem` and
    /// the signature covers the payload
    pub fn verify(&self, signature_ca_pem: &[u8]) -> Result<()> {
        let (_, ca_pem) = parse_x509_pem(signature_ca_pem)
            .map_err(|e| SeederError::Verification(format!("invalid signature CA PEM: {e}")))?;
        let ca = ca_pem
            .parse_x509()
            .map_err(|e| SeederError::Verification(format!("invalid signature CA: {e}")))?;

        let (_, leaf_pem) = parse_x509_pem(self.certificate.as_bytes())
            .map_err(|e| SeederError::Verification(format!("invalid signing certificate PEM: {e}")))?;
        let leaf = leaf_pem
            .parse_x509()
            .map_err(|e| SeederError::Verification(format!("invalid signing certificate: {e}")))?;

        if leaf.issuer() != ca.subject() {
            return Err(SeederError::Verification(
                "signing certificate was not issued by the signature CA".to_string(),
            ));
        }
        leaf.verify_signature(Some(ca.public_key()))
            .map_err(|e| SeederError::Verification(format!("signing certificate: {e}")))?;
        if !leaf.validity().is_valid() {
            return Err(SeederError::Verification(
                "signing certificate is outside its validity period".to_string(),
            ));
        }

        self.check_signature(leaf.public_key())
    }

    /// Check the signature against the embedded certificate only
    fn verify_signature(&self) -> Result<()> {
        let (_, pem) = parse_x509_pem(self.certificate.as_bytes())
            .map_err(|e| SeederError::Verification(format!("invalid signing certificate PEM: {e}")))?;
        let cert = pem
            .parse_x509()
            .map_err(|e| SeederError::Verification(format!("invalid signing certificate: {e}")))?;
        self.check_signature(cert.public_key())
    }

    fn check_signature(&self, key: &SubjectPublicKeyInfo<'_>) -> Result<()> {
        UnparsedPublicKey::new(self.algorithm.verification(), &*key.subject_public_key.data)
            .verify(&self.payload, &self.signature)
            .map_err(|_| SeederError::Verification("signature does not match payload".to_string()))
    }
}

/// Signs stage configuration with the configured key
pub struct EmbeddedConfigGenerator {
    key: Arc<dyn SigningKey>,
    algorithm: SignatureAlgorithm,
    certificate: String,
}

impl EmbeddedConfigGenerator {
    /// Load the signing key and certificate; failures are fatal
    pub fn from_files(key_path: &Path, cert_path: &Path) -> Result<Self> {
        let key_pem = read_file(key_path)?;
        let cert_pem = read_file(cert_path)?;
        let generator = Self::from_pem(&key_pem, &cert_pem)?;
        info!(
            cert = %cert_path.display(),
            algorithm = ?generator.algorithm,
            "Loaded config signing key"
        );
        Ok(generator)
    }

    pub fn from_pem(key_pem: &[u8], cert_pem: &[u8]) -> Result<Self> {
        ensure_crypto_provider_installed();

        let certificate = String::from_utf8(cert_pem.to_vec())
            .map_err(|_| SeederError::SigningMaterial("certificate is not valid PEM text".to_string()))?;
        parse_certs(cert_pem).map_err(|e| SeederError::SigningMaterial(format!("certificate: {e}")))?;
        let key_der = parse_private_key(key_pem).map_err(SeederError::SigningMaterial)?;

        let provider = CryptoProvider::get_default()
            .ok_or_else(|| SeederError::SigningMaterial("rustls crypto provider is not installed".to_string()))?;
        let key = provider
            .key_provider
            .load_private_key(key_der)
            .map_err(|e| SeederError::SigningMaterial(format!("unsupported private key: {e}")))?;

        let signer = key.choose_scheme(&SignatureAlgorithm::OFFERED).ok_or_else(|| {
            SeederError::SigningMaterial(format!("{:?} keys can't sign configs", key.algorithm()))
        })?;
        let algorithm = SignatureAlgorithm::from_scheme(signer.scheme()).ok_or_else(|| {
            SeederError::SigningMaterial(format!("unexpected signature scheme {:?}", signer.scheme()))
        })?;

        let generator = Self {
            key,
            algorithm,
            certificate,
        };

        // The key has to belong to the certificate or nothing will verify
        generator
            .sign(b"seeder signing key check")
            .and_then(|check| check.verify_signature())
            .map_err(|_| SeederError::SigningMaterial("private key does not match certificate".to_string()))?;

        Ok(generator)
    }

    pub fn algorithm(&self) -> SignatureAlgorithm {
        self.algorithm
    }

    /// Sign raw payload bytes
    pub fn sign(&self, payload: &[u8]) -> Result<EmbeddedConfig> {
        let signer = self
            .key
            .choose_scheme(&[self.algorithm.scheme()])
            .ok_or_else(|| SeederError::Signing(format!("key no longer offers {:?}", self.algorithm)))?;
        let signature = signer
            .sign(payload)
            .map_err(|e| SeederError::Signing(e.to_string()))?;

        Ok(EmbeddedConfig {
            payload: payload.to_vec(),
            signature,
            algorithm: self.algorithm,
            certificate: self.certificate.clone(),
        })
    }

    /// Serialize `value` as JSON and sign it
    pub fn generate<T: Serialize>(&self, value: &T) -> Result<EmbeddedConfig> {
        let payload = serde_json::to_vec(value).map_err(|e| SeederError::Signing(e.to_string()))?;
        self.sign(&payload)
    }
}

impl std::fmt::Debug for EmbeddedConfigGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddedConfigGenerator")
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}
