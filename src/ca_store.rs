//! CA Identity Store
//!
//! Holds the signing identities of the CA hierarchy, one per purpose:
//!
//! ```text
//! Root CA (self-signed, usually offline)
//!   ├── Server CA   (signs the server's TLS certificate, sent to machines as trust anchor)
//!   └── Machine CA  (signs machine certificates minted by pairing)
//! ```
//!
//! Identities are produced out-of-band by the bootstrap utility and read from
//! PEM files exactly once at startup. Every identity is checked for integrity
//! when it is loaded; after that the store is immutable and shared by reference
//! (`Arc<CaStore>`) between the issuer and the pairing coordinator.
//!
//! A store that fails to load is fatal: the process must never fall back to an
//! unsigned or self-issued certificate.

use crate::configs::CertificateAuthorityConfig;
use crate::subject::SubjectName;
use openssl::pkey::{PKey, PKeyRef, Private};
use openssl::x509::{X509Ref, X509VerifyResult, X509};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;

/// Role of a signing identity within the hierarchy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaPurpose {
    Root,
    Server,
    Machine,
}

impl fmt::Display for CaPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaPurpose::Root => write!(f, "root"),
            CaPurpose::Server => write!(f, "server"),
            CaPurpose::Machine => write!(f, "machine"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CaStoreError {
    #[error("{purpose} CA identity unavailable: {reason}")]
    IdentityUnavailable { purpose: CaPurpose, reason: String },
}

impl CaStoreError {
    fn unavailable(purpose: CaPurpose, reason: impl Into<String>) -> Self {
        CaStoreError::IdentityUnavailable {
            purpose,
            reason: reason.into(),
        }
    }
}

/// A CA private key together with its certificate
///
/// Construction enforces:
/// - the certificate's public key is the counterpart of the private key
/// - notAfter is strictly later than notBefore
/// - a ROOT certificate is self-signed and its signature verifies with its own key
pub struct CaIdentity {
    purpose: CaPurpose,
    private_key: PKey<Private>,
    certificate: X509,
    subject: SubjectName,
}

impl CaIdentity {
    pub fn new(
        purpose: CaPurpose,
        private_key: PKey<Private>,
        certificate: X509,
    ) -> Result<Self, CaStoreError> {
        let public_key = certificate
            .public_key()
            .map_err(|e| CaStoreError::unavailable(purpose, format!("certificate key: {}", e)))?;
        if !public_key.public_eq(&private_key) {
            return Err(CaStoreError::unavailable(
                purpose,
                "private key does not match certificate",
            ));
        }

        if certificate.not_after() <= certificate.not_before() {
            return Err(CaStoreError::unavailable(
                purpose,
                "certificate validity window is empty",
            ));
        }

        if purpose == CaPurpose::Root {
            let self_issued = certificate.issued(&certificate) == X509VerifyResult::OK;
            let self_signed = certificate.verify(&private_key).unwrap_or(false);
            if !self_issued || !self_signed {
                return Err(CaStoreError::unavailable(
                    purpose,
                    "root certificate is not self-signed",
                ));
            }
        }

        let subject = SubjectName::from_x509_name(certificate.subject_name())
            .map_err(|e| CaStoreError::unavailable(purpose, e.to_string()))?;

        Ok(Self {
            purpose,
            private_key,
            certificate,
            subject,
        })
    }

    /// Load an identity from a PEM certificate and a PEM private key
    pub fn from_pem_files(
        purpose: CaPurpose,
        cert_path: &Path,
        key_path: &Path,
    ) -> Result<Self, CaStoreError> {
        let cert_pem = std::fs::read(cert_path).map_err(|e| {
            CaStoreError::unavailable(purpose, format!("{}: {}", cert_path.display(), e))
        })?;
        let key_pem = std::fs::read(key_path).map_err(|e| {
            CaStoreError::unavailable(purpose, format!("{}: {}", key_path.display(), e))
        })?;

        let certificate = X509::from_pem(&cert_pem).map_err(|_| {
            CaStoreError::unavailable(
                purpose,
                format!("{}: invalid certificate", cert_path.display()),
            )
        })?;
        // Parse errors are dropped so key bytes never reach a log line
        let private_key = PKey::private_key_from_pem(&key_pem).map_err(|_| {
            CaStoreError::unavailable(
                purpose,
                format!("{}: invalid private key", key_path.display()),
            )
        })?;

        Self::new(purpose, private_key, certificate)
    }

    pub fn purpose(&self) -> CaPurpose {
        self.purpose
    }

    pub fn certificate(&self) -> &X509Ref {
        &self.certificate
    }

    pub fn private_key(&self) -> &PKeyRef<Private> {
        &self.private_key
    }

    pub fn subject(&self) -> &SubjectName {
        &self.subject
    }

    pub fn certificate_pem(&self) -> Result<String, openssl::error::ErrorStack> {
        let pem = self.certificate.to_pem()?;
        Ok(String::from_utf8_lossy(&pem).into_owned())
    }
}

impl fmt::Debug for CaIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaIdentity")
            .field("purpose", &self.purpose)
            .field("subject", &self.subject)
            .field("private_key", &"<redacted>")
            .finish()
    }
}

/// Read-only collection of CA identities, keyed by purpose
#[derive(Debug, Default)]
pub struct CaStore {
    identities: HashMap<CaPurpose, CaIdentity>,
}

impl CaStore {
    /// Load every configured identity, verifying each one
    ///
    /// The server and machine identities are mandatory; the root identity is
    /// only loaded when both of its paths are configured.
    pub fn load(config: &CertificateAuthorityConfig) -> Result<Self, CaStoreError> {
        let mut identities = vec![
            CaIdentity::from_pem_files(
                CaPurpose::Server,
                &config.server_cert_path,
                &config.server_key_path,
            )?,
            CaIdentity::from_pem_files(
                CaPurpose::Machine,
                &config.machine_cert_path,
                &config.machine_key_path,
            )?,
        ];

        if let (Some(cert_path), Some(key_path)) = (&config.root_cert_path, &config.root_key_path)
        {
            identities.push(CaIdentity::from_pem_files(CaPurpose::Root, cert_path, key_path)?);
        }

        let store = Self::from_identities(identities);
        for identity in store.identities.values() {
            tracing::info!(
                purpose = %identity.purpose(),
                subject = %identity.subject(),
                "CA identity loaded"
            );
        }
        Ok(store)
    }

    /// Build a store from identities already in memory
    ///
    /// A later identity replaces an earlier one with the same purpose.
    pub fn from_identities(identities: impl IntoIterator<Item = CaIdentity>) -> Self {
        Self {
            identities: identities
                .into_iter()
                .map(|identity| (identity.purpose(), identity))
                .collect(),
        }
    }

    pub fn identity(&self, purpose: CaPurpose) -> Result<&CaIdentity, CaStoreError> {
        self.identities
            .get(&purpose)
            .ok_or_else(|| CaStoreError::unavailable(purpose, "not loaded"))
    }

    /// Purposes present in the store, in hierarchy order
    pub fn purposes(&self) -> Vec<CaPurpose> {
        [CaPurpose::Root, CaPurpose::Server, CaPurpose::Machine]
            .into_iter()
            .filter(|purpose| self.identities.contains_key(purpose))
            .collect()
    }
}
