//! Certificate Issuance
//!
//! Turns a verified CSR into a certificate signed by one of the CA identities.
//!
//! # Validation Order
//! 1. Parse the CSR and extract its public key (`MalformedCsr`)
//! 2. Verify the CSR self-signature (`InvalidSignature`)
//! 3. Convert the subject into typed attributes (`UnsupportedAttribute`)
//!
//! # Certificate Properties
//! - **Version**: X.509v3
//! - **Serial Number**: Random 128-bit number (see [`crate::serial_number`])
//! - **Subject**: The CSR's subject, byte-for-byte, once every attribute is recognized
//! - **Issuer**: The signing CA's subject, byte-for-byte
//! - **Validity**: notBefore = now, notAfter = now + validity days
//! - **Signature Algorithm**: SHA-256 with the CA key
//! - **Extensions**: [`CertificateProfile::EndEntity`] for leaves,
//!   [`CertificateProfile::CertificateAuthority`] for `issue_ca`
//!
//! The subject is trusted only as far as the caller has authorized the
//! requester to claim it; for machines that authorization is the pairing HMAC.
//! Issued certificates are not persisted.

use crate::ca_store::CaIdentity;
use crate::csr::{CsrError, SigningRequest};
use crate::extensions::CertificateProfile;
use crate::serial_number::next_serial;
use crate::subject::NameError;
use crate::AUDIT_TARGET;
use openssl::asn1::Asn1Time;
use openssl::error::ErrorStack;
use openssl::hash::MessageDigest;
use openssl::pkey::{Id, PKeyRef, Private};
use openssl::x509::{X509Ref, X509};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

const X509_VERSION_3: i32 = 2; // X509 version 3 is represented by 2
const SECONDS_PER_DAY: i64 = 86_400;

/// Errors that can occur while issuing a certificate
#[derive(Debug, thiserror::Error)]
pub enum IssueError {
    #[error("malformed certificate signing request: {0}")]
    MalformedCsr(String),

    #[error("certificate signing request signature is invalid")]
    InvalidSignature,

    #[error("unsupported subject attribute: {0}")]
    UnsupportedAttribute(String),

    #[error("failed to build certificate: {0}")]
    Signing(#[from] ErrorStack),
}

impl From<CsrError> for IssueError {
    fn from(err: CsrError) -> Self {
        match err {
            CsrError::Malformed(reason) => IssueError::MalformedCsr(reason),
            CsrError::InvalidSignature => IssueError::InvalidSignature,
            CsrError::Subject(NameError::UnsupportedAttribute(attr)) => {
                IssueError::UnsupportedAttribute(attr)
            }
            CsrError::Subject(other) => IssueError::MalformedCsr(other.to_string()),
        }
    }
}

/// A freshly signed certificate together with the certificate of its issuer
pub struct IssuedChain {
    certificate: X509,
    ca_certificate: X509,
    serial_number: String,
}

impl IssuedChain {
    pub fn certificate(&self) -> &X509Ref {
        &self.certificate
    }

    pub fn ca_certificate(&self) -> &X509Ref {
        &self.ca_certificate
    }

    /// Decimal serial number of the issued certificate
    pub fn serial_number(&self) -> &str {
        &self.serial_number
    }

    /// PEM form returned to the requester
    pub fn to_reply(&self) -> Result<ChainReply, ErrorStack> {
        Ok(ChainReply {
            certificate: pem_string(&self.certificate)?,
            ca: pem_string(&self.ca_certificate)?,
        })
    }
}

impl std::fmt::Debug for IssuedChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuedChain")
            .field("serial_number", &self.serial_number)
            .finish()
    }
}

/// Leaf certificate and CA certificate, both PEM-encoded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainReply {
    pub certificate: String,
    pub ca: String,
}

/// Issue an end-entity certificate for a PEM-encoded CSR
///
/// # Errors
/// - `IssueError::MalformedCsr` if the CSR cannot be parsed
/// - `IssueError::InvalidSignature` if the CSR self-signature does not verify
/// - `IssueError::UnsupportedAttribute` if the subject carries an unknown attribute
/// - `IssueError::Signing` if OpenSSL fails while building or signing
pub fn issue(
    csr_pem: &[u8],
    signing_identity: &CaIdentity,
    validity_days: u32,
) -> Result<IssuedChain, IssueError> {
    let request = accept_request(csr_pem)?;
    sign_request(
        &request,
        signing_identity,
        validity_days,
        CertificateProfile::EndEntity,
    )
}

/// Issue a CA certificate (basicConstraints CA:TRUE) for a PEM-encoded CSR
pub fn issue_ca(
    csr_pem: &[u8],
    signing_identity: &CaIdentity,
    validity_days: u32,
) -> Result<IssuedChain, IssueError> {
    let request = accept_request(csr_pem)?;
    sign_request(
        &request,
        signing_identity,
        validity_days,
        CertificateProfile::CertificateAuthority,
    )
}

fn accept_request(csr_pem: &[u8]) -> Result<SigningRequest, IssueError> {
    SigningRequest::from_pem(csr_pem).map_err(|e| {
        let err = IssueError::from(e);
        if matches!(err, IssueError::InvalidSignature) {
            tracing::warn!(target: AUDIT_TARGET, "CSR signature invalid, potential forgery");
        }
        err
    })
}

/// Sign an already verified request with the given profile
pub fn sign_request(
    request: &SigningRequest,
    signing_identity: &CaIdentity,
    validity_days: u32,
    profile: CertificateProfile,
) -> Result<IssuedChain, IssueError> {
    let ca_certificate = signing_identity.certificate();

    let mut builder = X509::builder()?;
    builder.set_version(X509_VERSION_3)?;

    let serial = next_serial()?;
    let serial_asn1 = serial.to_asn1_integer()?;
    builder.set_serial_number(&serial_asn1)?;

    // Typed check already passed; the encoded name goes in unchanged
    builder.set_subject_name(request.as_x509_req().subject_name())?;
    builder.set_issuer_name(ca_certificate.subject_name())?;

    let now = unix_now();
    let not_before = Asn1Time::from_unix(now)?;
    let not_after = Asn1Time::from_unix(now + i64::from(validity_days) * SECONDS_PER_DAY)?;
    builder.set_not_before(&not_before)?;
    builder.set_not_after(&not_after)?;

    builder.set_pubkey(request.public_key())?;
    profile.append_to(&mut builder)?;

    let signing_key = signing_identity.private_key();
    builder.sign(signing_key, signing_digest(signing_key))?;
    let certificate = builder.build();

    let serial_number = serial.to_decimal()?;
    tracing::debug!(
        serial = %serial_number,
        subject = %request.subject(),
        issuer = %signing_identity.subject(),
        ca = profile.is_ca(),
        validity_days,
        "Certificate issued"
    );

    Ok(IssuedChain {
        certificate,
        ca_certificate: ca_certificate.to_owned(),
        serial_number,
    })
}

/// Ed25519/Ed448 keys sign without a separate digest; everything else uses SHA-256
fn signing_digest(key: &PKeyRef<Private>) -> MessageDigest {
    match key.id() {
        Id::ED25519 | Id::ED448 => MessageDigest::null(),
        _ => MessageDigest::sha256(),
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn pem_string(certificate: &X509Ref) -> Result<String, ErrorStack> {
    let pem = certificate.to_pem()?;
    Ok(String::from_utf8_lossy(&pem).into_owned())
}
