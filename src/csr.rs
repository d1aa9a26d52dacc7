//! Certificate Signing Requests
//!
//! A [`SigningRequest`] only exists once a CSR has been parsed, its public key
//! extracted, its self-signature verified and its subject converted into a
//! typed [`SubjectName`]. The issuer never sees a raw, unchecked request.
//!
//! # Security
//!
//! - Input is limited to 16KB before any ASN.1 parsing happens
//! - The self-signature proves the requester holds the private key matching the
//!   embedded public key, so a forged key cannot be bound to a subject
//!
//! The requester side of the exchange is [`build_signing_request`], used by
//! machines during pairing and by the intermediate CA builder.

use crate::subject::{NameError, SubjectName};
use openssl::error::ErrorStack;
use openssl::hash::MessageDigest;
use openssl::pkey::{PKey, PKeyRef, Private, Public};
use openssl::x509::{X509Req, X509ReqRef};

/// Maximum accepted CSR size (16KB is generous for a single request)
pub const MAX_CSR_SIZE: usize = 16 * 1024;

/// Errors that can occur while accepting a CSR
#[derive(Debug, thiserror::Error)]
pub enum CsrError {
    #[error("malformed certificate signing request: {0}")]
    Malformed(String),

    #[error("certificate signing request signature is invalid")]
    InvalidSignature,

    #[error(transparent)]
    Subject(#[from] NameError),
}

/// A parsed CSR whose self-signature has been verified
pub struct SigningRequest {
    request: X509Req,
    public_key: PKey<Public>,
    subject: SubjectName,
}

impl SigningRequest {
    /// Parse and verify a PEM-encoded CSR
    ///
    /// # Errors
    ///
    /// Returns `CsrError::Malformed` for oversized or unparseable input and for
    /// requests whose public key cannot be extracted.
    /// Returns `CsrError::InvalidSignature` when the self-signature does not
    /// verify against the embedded public key.
    pub fn from_pem(pem: &[u8]) -> Result<Self, CsrError> {
        check_size(pem)?;
        let request =
            X509Req::from_pem(pem).map_err(|e| CsrError::Malformed(first_reason(&e)))?;
        Self::verify(request)
    }

    /// Parse and verify a DER-encoded CSR
    pub fn from_der(der: &[u8]) -> Result<Self, CsrError> {
        check_size(der)?;
        let request =
            X509Req::from_der(der).map_err(|e| CsrError::Malformed(first_reason(&e)))?;
        Self::verify(request)
    }

    fn verify(request: X509Req) -> Result<Self, CsrError> {
        let public_key = request
            .public_key()
            .map_err(|e| CsrError::Malformed(format!("public key: {}", first_reason(&e))))?;

        // An error from the verifier means the signature could not be checked,
        // which is treated the same as a signature that does not match.
        match request.verify(&public_key) {
            Ok(true) => {}
            Ok(false) | Err(_) => return Err(CsrError::InvalidSignature),
        }

        let subject = SubjectName::from_x509_name(request.subject_name())?;

        Ok(Self {
            request,
            public_key,
            subject,
        })
    }

    pub fn public_key(&self) -> &PKeyRef<Public> {
        &self.public_key
    }

    pub fn subject(&self) -> &SubjectName {
        &self.subject
    }

    pub fn as_x509_req(&self) -> &X509ReqRef {
        &self.request
    }
}

impl std::fmt::Debug for SigningRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningRequest")
            .field("subject", &self.subject)
            .finish()
    }
}

fn check_size(input: &[u8]) -> Result<(), CsrError> {
    if input.len() > MAX_CSR_SIZE {
        return Err(CsrError::Malformed(format!(
            "request too large: {} bytes (max {})",
            input.len(),
            MAX_CSR_SIZE
        )));
    }
    Ok(())
}

fn first_reason(stack: &ErrorStack) -> String {
    stack
        .errors()
        .first()
        .and_then(|e| e.reason().map(str::to_string))
        .unwrap_or_else(|| "unparseable input".to_string())
}

/// Build a CSR for `subject`, self-signed with `key` using SHA-256
pub fn build_signing_request(
    key: &PKeyRef<Private>,
    subject: &SubjectName,
) -> Result<X509Req, ErrorStack> {
    let name = subject.to_x509_name()?;
    let mut builder = X509Req::builder()?;
    builder.set_version(0)?;
    builder.set_subject_name(&name)?;
    builder.set_pubkey(key)?;
    builder.sign(key, MessageDigest::sha256())?;
    Ok(builder.build())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subject::AttributeKind;
    use openssl::ec::{EcGroup, EcKey};
    use openssl::nid::Nid;
    use openssl::rsa::Rsa;

    fn ec_key() -> PKey<Private> {
        let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).unwrap();
        PKey::from_ec_key(EcKey::generate(&group).unwrap()).unwrap()
    }

    fn device_subject() -> SubjectName {
        SubjectName::new().with(AttributeKind::CommonName, "device-42")
    }

    #[test]
    fn test_valid_request_accepted() {
        let key = ec_key();
        let csr = build_signing_request(&key, &device_subject()).unwrap();
        let pem = csr.to_pem().unwrap();

        let request = SigningRequest::from_pem(&pem).unwrap();
        assert_eq!(request.subject(), &device_subject());
        assert!(request.public_key().public_eq(&key));
    }

    #[test]
    fn test_garbage_is_malformed() {
        let result = SigningRequest::from_pem(b"not a certificate request");
        assert!(matches!(result, Err(CsrError::Malformed(_))));

        let result = SigningRequest::from_der(&[0x30, 0x03, 0x02, 0x01]);
        assert!(matches!(result, Err(CsrError::Malformed(_))));
    }

    #[test]
    fn test_oversized_input_rejected() {
        let large = vec![b'A'; MAX_CSR_SIZE + 1];
        let result = SigningRequest::from_pem(&large);
        assert!(matches!(result, Err(CsrError::Malformed(_))));
    }

    #[test]
    fn test_tampered_signature_rejected() {
        let key = PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap();
        let csr = build_signing_request(&key, &device_subject()).unwrap();
        let der = csr.to_der().unwrap();

        // The RSA signature occupies the trailing 256 bytes of the DER encoding
        for offset in [1, 17, 100, 255] {
            let mut tampered = der.clone();
            let index = tampered.len() - offset;
            tampered[index] ^= 0x01;

            let result = SigningRequest::from_der(&tampered);
            assert!(
                matches!(result, Err(CsrError::InvalidSignature)),
                "flip at -{} was not rejected",
                offset
            );
        }
    }

    #[test]
    fn test_signature_from_other_key_rejected() {
        let key = ec_key();
        let other = ec_key();
        let name = device_subject().to_x509_name().unwrap();

        // Embed one key but sign with another
        let mut builder = X509Req::builder().unwrap();
        builder.set_version(0).unwrap();
        builder.set_subject_name(&name).unwrap();
        builder.set_pubkey(&key).unwrap();
        builder.sign(&other, MessageDigest::sha256()).unwrap();
        let pem = builder.build().to_pem().unwrap();

        let result = SigningRequest::from_pem(&pem);
        assert!(matches!(result, Err(CsrError::InvalidSignature)));
    }

    #[test]
    fn test_unsupported_subject_attribute_rejected() {
        let key = ec_key();
        let mut name = openssl::x509::X509Name::builder().unwrap();
        name.append_entry_by_nid(Nid::COMMONNAME, "device-42").unwrap();
        name.append_entry_by_nid(Nid::PKCS9_EMAILADDRESS, "ops@example.com")
            .unwrap();
        let name = name.build();

        let mut builder = X509Req::builder().unwrap();
        builder.set_subject_name(&name).unwrap();
        builder.set_pubkey(&key).unwrap();
        builder.sign(&key, MessageDigest::sha256()).unwrap();
        let pem = builder.build().to_pem().unwrap();

        let result = SigningRequest::from_pem(&pem);
        assert!(matches!(
            result,
            Err(CsrError::Subject(NameError::UnsupportedAttribute(_)))
        ));
    }
}
