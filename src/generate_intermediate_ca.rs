//! Intermediate CA Certificate Generation Module
//!
//! Generates the server and machine CAs signed by the root CA. The root can go
//! back offline once both exist; day-to-day issuance only needs the
//! intermediates.
//!
//! # PKI Hierarchy Position
//! ```text
//! Root CA (self-signed)
//!   ├── Server CA  (signed by Root) ← This module
//!   └── Machine CA (signed by Root) ← This module
//!       └── Machine certificates (minted by pairing)
//! ```
//!
//! The intermediate goes through the same path as any other request: a CSR is
//! built and self-signed with the freshly generated key, then handed to
//! [`crate::issuer::issue_ca`], which verifies it before signing with the root.
//!
//! # Certificate Properties
//! - **Signed by**: Root CA
//! - **Extensions**: the legacy CA profile (see [`crate::extensions`])
//! - **Default Key Size**: RSA 4096-bit
//! - **Default Validity**: 3650 days (10 years)

use crate::ca_store::{CaIdentity, CaPurpose};
use crate::csr::build_signing_request;
use crate::generate_root_ca::RSA_KEY_SIZE_DEFAULT;
use crate::issuer;
use crate::subject::{AttributeKind, SubjectName};
use anyhow::{anyhow, Result};
use openssl::pkey::PKey;

const INTERMEDIATE_VALIDITY_DAYS_DEFAULT: u32 = 3650;

// ================= RSA Intermediate CA Builder =================

/// Builder for generating an RSA key pair and an intermediate CA certificate
/// signed by a root CA
///
/// # Examples
/// ```rust,no_run
/// # use anyhow::Result;
/// # use pki_pairing::ca_store::{CaIdentity, CaPurpose};
/// # use pki_pairing::generate_intermediate_ca::RsaIntermediateCABuilder;
/// # fn example(root: &CaIdentity) -> Result<()> {
/// let machine_ca = RsaIntermediateCABuilder::new(root, CaPurpose::Machine)
///     .subject_common_name("lamassu.is machine CA".to_string())
///     .organization("Lamassu".to_string())
///     .country("VG".to_string())
///     .validity_days(3650)
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct RsaIntermediateCABuilder<'a> {
    signing_identity: &'a CaIdentity,
    purpose: CaPurpose,
    subject: SubjectName,
    validity_days: u32,
    key_bits: u32,
}

impl<'a> RsaIntermediateCABuilder<'a> {
    /// Create a new RSA intermediate CA builder
    ///
    /// # Arguments
    /// * `signing_identity` - Root CA identity that signs the new certificate
    /// * `purpose` - Role the new identity will have in the store
    pub fn new(signing_identity: &'a CaIdentity, purpose: CaPurpose) -> Self {
        Self {
            signing_identity,
            purpose,
            subject: SubjectName::new(),
            validity_days: INTERMEDIATE_VALIDITY_DAYS_DEFAULT,
            key_bits: RSA_KEY_SIZE_DEFAULT,
        }
    }

    /// Set the common name (CN) for the certificate
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
    ///
    /// # Arguments
    /// * `days` - Number of days the certificate will be valid (default: 3650 = 10 years)
    ///
    /// # Returns
    /// Self for method chaining
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

    /// Build the RSA key pair and intermediate CA certificate signed by the root
    ///
    /// # Returns
    /// * `Ok(CaIdentity)` - New identity with the requested purpose
    /// * `Err(anyhow::Error)` - If generation or signing fails
    ///
    /// # Errors
    /// Returns error if:
    /// - No common name was set
    /// - The requested purpose is `Root`
    /// - RSA key generation fails
    /// - The CSR is rejected by the issuer
    pub fn build(self) -> Result<CaIdentity> {
        if self.purpose == CaPurpose::Root {
            return Err(anyhow!("Intermediate CA cannot have the root purpose"));
        }
        if self.subject.common_name().is_none() {
            return Err(anyhow!("Intermediate CA subject requires a common name"));
        }

        let rsa = openssl::rsa::Rsa::generate(self.key_bits)
            .map_err(|e| anyhow!("Failed to generate RSA keypair: {}", e))?;
        let private_key =
            PKey::from_rsa(rsa).map_err(|e| anyhow!("Failed to create private key: {}", e))?;

        let csr_pem = build_signing_request(&private_key, &self.subject)
            .and_then(|csr| csr.to_pem())
            .map_err(|e| anyhow!("Failed to build CSR: {}", e))?;

        let chain = issuer::issue_ca(&csr_pem, self.signing_identity, self.validity_days)
            .map_err(|e| anyhow!("Failed to issue {} CA certificate: {}", self.purpose, e))?;

        tracing::info!(
            purpose = %self.purpose,
            subject = %self.subject,
            serial = chain.serial_number(),
            "Intermediate CA generated"
        );

        CaIdentity::new(self.purpose, private_key, chain.certificate().to_owned())
            .map_err(|e| anyhow!("Generated {} CA failed verification: {}", self.purpose, e))
    }
}
