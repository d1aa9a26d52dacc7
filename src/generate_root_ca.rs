//! Root CA Certificate Generation Module
//!
//! Generates the self-signed root CA that anchors the pairing hierarchy.
//!
//! # PKI Hierarchy Position
//! ```text
//! Root CA (self-signed) ← This module
//!   ├── Server CA  (signed by Root)
//!   └── Machine CA (signed by Root)
//!       └── Machine certificates (minted by pairing)
//! ```
//!
//! # Certificate Properties
//! - **Self-signed**: Issuer and subject are the same
//! - **Extensions**: the legacy CA profile (see [`crate::extensions`])
//! - **Default Key Size**: RSA 4096-bit
//! - **Default Validity**: 7300 days (20 years)
//! - **Version**: X.509v3 with extensions
//!
//! # Security Considerations
//! - Root CA private keys should be kept offline once the intermediates exist
//! - In a bootstrapped hierarchy the root signs only the server and machine CAs;
//!   [`crate::issuer::issue`] does not enforce this and will accept any identity
//!
//! # Example
//! ```rust,no_run
//! # use anyhow::Result;
//! # use pki_pairing::generate_root_ca::RsaRootCABuilder;
//! # fn example() -> Result<()> {
//! let root = RsaRootCABuilder::new()
//!     .subject_common_name("lamassu.is".to_string())
//!     .organization("Lamassu".to_string())
//!     .locality("Road Town".to_string())
//!     .state("Tortola".to_string())
//!     .country("VG".to_string())
//!     .validity_days(7300)
//!     .build()?;
//! # Ok(())
//! # }
//! ```

use crate::ca_store::{CaIdentity, CaPurpose};
use crate::extensions::CertificateProfile;
use crate::serial_number::next_serial;
use crate::subject::{AttributeKind, SubjectName};
use anyhow::{anyhow, Result};
use openssl::asn1::Asn1Time;
use openssl::hash::MessageDigest;
use openssl::pkey::{PKey, Private};
use openssl::x509::X509;
use std::time::{SystemTime, UNIX_EPOCH};

const X509_VERSION_3: i32 = 2; // X509 version 3 is represented by 2
pub(crate) const RSA_KEY_SIZE_DEFAULT: u32 = 4096;
const ROOT_VALIDITY_DAYS_DEFAULT: u32 = 7300;

// ================= RSA Root CA Builder =================

/// Builder for generating an RSA key pair and a self-signed root CA certificate
///
/// Subject attributes are emitted in the order their setters are called. At
/// least a common name must be set before calling `build()`.
///
/// # Examples
/// ```rust,no_run
/// use pki_pairing::generate_root_ca::RsaRootCABuilder;
/// # use anyhow::Result;
/// # fn example() -> Result<()> {
/// let root = RsaRootCABuilder::new()
///     .subject_common_name("ACME Root CA".to_string())
///     .organization("ACME Corporation".to_string())
///     .country("US".to_string())
///     .build()?;
///
/// assert!(root.certificate().verify(root.private_key())?);
/// # Ok(())
/// # }
/// ```
pub struct RsaRootCABuilder {
    subject: SubjectName,
    validity_days: u32,
    key_bits: u32,
}

impl Default for RsaRootCABuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RsaRootCABuilder {
    /// Create a new builder with default key size and validity
    pub fn new() -> Self {
        Self {
            subject: SubjectName::new(),
            validity_days: ROOT_VALIDITY_DAYS_DEFAULT,
            key_bits: RSA_KEY_SIZE_DEFAULT,
        }
    }

    /// Set the common name (CN) for the certificate
    ///
    /// # Arguments
    /// * `cn` - Common name (e.g., "lamassu.is")
    ///
    /// # Returns
    /// Self for method chaining
    pub fn subject_common_name(self, cn: String) -> Self {
        self.attribute(AttributeKind::CommonName, cn)
    }

    /// Set the organization (O) for the certificate
    pub fn organization(self, org: String) -> Self {
        self.attribute(AttributeKind::OrganizationName, org)
    }

    /// Set the organizational unit (OU) for the certificate
    pub fn organizational_unit(self, ou: String) -> Self {
        self.attribute(AttributeKind::OrganizationalUnitName, ou)
    }

    /// Set the locality (L) for the certificate
    pub fn locality(self, locality: String) -> Self {
        self.attribute(AttributeKind::LocalityName, locality)
    }

    /// Set the state/province (ST) for the certificate
    pub fn state(self, state: String) -> Self {
        self.attribute(AttributeKind::StateOrProvinceName, state)
    }

    /// Set the country (C) for the certificate (2-letter ISO code)
    pub fn country(self, country: String) -> Self {
        self.attribute(AttributeKind::CountryName, country)
    }

    /// Replace the whole subject
    pub fn subject(mut self, subject: SubjectName) -> Self {
        self.subject = subject;
        self
    }

    /// Set validity period in days
    pub fn validity_days(mut self, days: u32) -> Self {
        self.validity_days = days;
        self
    }

    /// Set the RSA modulus size
    pub fn key_bits(mut self, bits: u32) -> Self {
        self.key_bits = bits;
        self
    }

    fn attribute(mut self, kind: AttributeKind, value: String) -> Self {
        self.subject.push(kind, value);
        self
    }

    /// Build the RSA key pair and self-signed root CA certificate
    ///
    /// # Returns
    /// * `Ok(CaIdentity)` - Root identity, already checked to be self-signed
    /// * `Err(anyhow::Error)` - If certificate generation fails
    ///
    /// # Errors
    /// Returns error if:
    /// - No common name was set
    /// - RSA key generation fails
    /// - X.509 extension creation fails
    /// - Certificate signing fails
    pub fn build(self) -> Result<CaIdentity> {
        if self.subject.common_name().is_none() {
            return Err(anyhow!("Root CA subject requires a common name"));
        }

        let rsa = openssl::rsa::Rsa::generate(self.key_bits)
            .map_err(|e| anyhow!("Failed to generate RSA keypair: {}", e))?;
        let private_key =
            PKey::from_rsa(rsa).map_err(|e| anyhow!("Failed to create private key: {}", e))?;

        let certificate = self_sign(&private_key, &self.subject, self.validity_days)?;

        tracing::info!(
            subject = %self.subject,
            validity_days = self.validity_days,
            "Root CA generated"
        );

        CaIdentity::new(CaPurpose::Root, private_key, certificate)
            .map_err(|e| anyhow!("Generated root CA failed verification: {}", e))
    }
}

fn self_sign(
    private_key: &PKey<Private>,
    subject: &SubjectName,
    validity_days: u32,
) -> Result<X509> {
    let mut builder =
        X509::builder().map_err(|e| anyhow!("Failed to create X509 builder: {}", e))?;

    builder
        .set_version(X509_VERSION_3)
        .map_err(|e| anyhow!("Failed to set version: {}", e))?;

    let serial = next_serial().map_err(|e| anyhow!("Failed to generate serial: {}", e))?;
    let serial = serial
        .to_asn1_integer()
        .map_err(|e| anyhow!("Failed to encode serial: {}", e))?;
    builder
        .set_serial_number(&serial)
        .map_err(|e| anyhow!("Failed to set serial number: {}", e))?;

    let name = subject
        .to_x509_name()
        .map_err(|e| anyhow!("Failed to build subject: {}", e))?;
    builder
        .set_subject_name(&name)
        .map_err(|e| anyhow!("Failed to set subject: {}", e))?;
    builder
        .set_issuer_name(&name)
        .map_err(|e| anyhow!("Failed to set issuer: {}", e))?;

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| anyhow!("System clock before epoch: {}", e))?
        .as_secs() as i64;
    let not_before =
        Asn1Time::from_unix(now).map_err(|e| anyhow!("Failed to create not_before: {}", e))?;
    let not_after = Asn1Time::from_unix(now + i64::from(validity_days) * 86_400)
        .map_err(|e| anyhow!("Failed to create not_after: {}", e))?;
    builder
        .set_not_before(&not_before)
        .map_err(|e| anyhow!("Failed to set not_before: {}", e))?;
    builder
        .set_not_after(&not_after)
        .map_err(|e| anyhow!("Failed to set not_after: {}", e))?;

    builder
        .set_pubkey(private_key)
        .map_err(|e| anyhow!("Failed to set public key: {}", e))?;

    CertificateProfile::CertificateAuthority
        .append_to(&mut builder)
        .map_err(|e| anyhow!("Failed to add CA extensions: {}", e))?;

    builder
        .sign(private_key, MessageDigest::sha256())
        .map_err(|e| anyhow!("Failed to sign certificate: {}", e))?;

    Ok(builder.build())
}

#[cfg(test)]
mod tests {
    use super::*;
    use openssl::x509::X509VerifyResult;

    fn small_root() -> RsaRootCABuilder {
        RsaRootCABuilder::new()
            .subject_common_name("lamassu.is".to_string())
            .organization("Lamassu".to_string())
            .locality("Road Town".to_string())
            .state("Tortola".to_string())
            .country("VG".to_string())
            .key_bits(2048)
    }

    #[test]
    fn test_root_is_self_signed() {
        let root = small_root().validity_days(100).build().unwrap();
        let certificate = root.certificate();

        assert_eq!(root.purpose(), CaPurpose::Root);
        assert_eq!(certificate.issued(certificate), X509VerifyResult::OK);
        assert!(certificate.verify(root.private_key()).unwrap());
    }

    #[test]
    fn test_subject_order_follows_setters() {
        let root = small_root().build().unwrap();
        let kinds: Vec<_> = root.subject().attributes().iter().map(|a| a.kind).collect();

        assert_eq!(
            kinds,
            vec![
                AttributeKind::CommonName,
                AttributeKind::OrganizationName,
                AttributeKind::LocalityName,
                AttributeKind::StateOrProvinceName,
                AttributeKind::CountryName,
            ]
        );
    }

    #[test]
    fn test_root_validity_and_profile() {
        let root = small_root().validity_days(7300).build().unwrap();
        let certificate = root.certificate();

        let diff = certificate.not_before().diff(certificate.not_after()).unwrap();
        assert_eq!(diff.days, 7300);

        let text = String::from_utf8(certificate.to_text().unwrap()).unwrap();
        assert!(text.contains("CA:TRUE"));
        assert!(text.contains("Certificate Sign"));
    }

    #[test]
    fn test_missing_common_name_rejected() {
        let result = RsaRootCABuilder::new()
            .organization("Lamassu".to_string())
            .key_bits(2048)
            .build();
        assert!(result.is_err());
    }
}
