//! X.509v3 Extension Profiles
//!
//! Two profiles are issued by this CA:
//!
//! ```text
//! CertificateAuthority (root and intermediates)
//!   basicConstraints   CA:TRUE
//!   keyUsage           keyCertSign, digitalSignature, nonRepudiation,
//!                      keyEncipherment, dataEncipherment
//!   extendedKeyUsage   serverAuth, clientAuth, codeSigning,
//!                      emailProtection, timeStamping
//!   nsCertType         client, server, email, objsign, sslCA, emailCA, objCA
//!
//! EndEntity (machine and server leaves)
//!   basicConstraints   critical, CA:FALSE
//!   keyUsage           critical, digitalSignature, nonRepudiation,
//!                      keyEncipherment, dataEncipherment
//! ```
//!
//! The CA profile is consumed by legacy verifiers already deployed in the
//! fleet and must stay bit-for-bit stable, including the non-critical flags
//! and the Netscape certificate type extension.

use openssl::asn1::{Asn1Object, Asn1OctetString};
use openssl::error::ErrorStack;
use openssl::x509::extension::{BasicConstraints, ExtendedKeyUsage, KeyUsage};
use openssl::x509::{X509Builder, X509Extension};

/// OID of the Netscape certificate type extension
const NETSCAPE_CERT_TYPE_OID: &str = "2.16.840.1.113730.1.1";

// BIT STRING, 1 content byte, 0 unused bits.
// client(0) server(1) email(2) objsign(3) sslCA(5) emailCA(6) objCA(7) = 0b1111_0111
const NETSCAPE_CERT_TYPE_DER: [u8; 4] = [0x03, 0x02, 0x00, 0xF7];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertificateProfile {
    /// Signing certificate able to issue further certificates
    CertificateAuthority,
    /// Leaf certificate, never allowed to sign
    EndEntity,
}

impl CertificateProfile {
    /// Build the extensions of this profile in their canonical order
    pub fn extensions(self) -> Result<Vec<X509Extension>, ErrorStack> {
        match self {
            CertificateProfile::CertificateAuthority => ca_extensions(),
            CertificateProfile::EndEntity => end_entity_extensions(),
        }
    }

    pub fn append_to(self, builder: &mut X509Builder) -> Result<(), ErrorStack> {
        for extension in self.extensions()? {
            builder.append_extension(extension)?;
        }
        Ok(())
    }

    pub fn is_ca(self) -> bool {
        matches!(self, CertificateProfile::CertificateAuthority)
    }
}

fn ca_extensions() -> Result<Vec<X509Extension>, ErrorStack> {
    let basic_constraints = BasicConstraints::new().ca().build()?;

    let key_usage = KeyUsage::new()
        .key_cert_sign()
        .digital_signature()
        .non_repudiation()
        .key_encipherment()
        .data_encipherment()
        .build()?;

    let extended_key_usage = ExtendedKeyUsage::new()
        .server_auth()
        .client_auth()
        .code_signing()
        .email_protection()
        .time_stamping()
        .build()?;

    Ok(vec![
        basic_constraints,
        key_usage,
        extended_key_usage,
        netscape_cert_type()?,
    ])
}

fn end_entity_extensions() -> Result<Vec<X509Extension>, ErrorStack> {
    // No .ca() call: CA:FALSE
    let basic_constraints = BasicConstraints::new().critical().build()?;

    let key_usage = KeyUsage::new()
        .critical()
        .digital_signature()
        .non_repudiation()
        .key_encipherment()
        .data_encipherment()
        .build()?;

    Ok(vec![basic_constraints, key_usage])
}

fn netscape_cert_type() -> Result<X509Extension, ErrorStack> {
    let oid = Asn1Object::from_str(NETSCAPE_CERT_TYPE_OID)?;
    let contents = Asn1OctetString::new_from_bytes(&NETSCAPE_CERT_TYPE_DER)?;
    X509Extension::new_from_der(&oid, false, &contents)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ca_profile_has_four_extensions() {
        let extensions = CertificateProfile::CertificateAuthority.extensions().unwrap();
        assert_eq!(extensions.len(), 4);
        assert!(CertificateProfile::CertificateAuthority.is_ca());
    }

    #[test]
    fn test_end_entity_profile_is_not_ca() {
        let extensions = CertificateProfile::EndEntity.extensions().unwrap();
        assert_eq!(extensions.len(), 2);
        assert!(!CertificateProfile::EndEntity.is_ca());
    }

    #[test]
    fn test_netscape_cert_type_bits() {
        // sslCA, emailCA and objCA must be set; bit 4 is reserved and stays clear
        let bits = NETSCAPE_CERT_TYPE_DER[3];
        assert_eq!(bits & 0b0000_1000, 0);
        assert_eq!(bits.count_ones(), 7);
        assert!(netscape_cert_type().is_ok());
    }
}
