//! Typed Distinguished Names
//!
//! Certificate subjects are handled as an ordered list of `(AttributeKind, value)`
//! pairs drawn from a closed set of recognized attribute kinds. Anything outside
//! that set is rejected when a name is read from a CSR or a CA certificate, so
//! untyped attributes never pass through into an issued certificate.
//!
//! Ordering is significant: the subject of an issued certificate repeats the
//! CSR's attributes in exactly the order the requester supplied them. The
//! typed form is a gate; issuance copies the CSR's encoded name unchanged.

use openssl::error::ErrorStack;
use openssl::nid::Nid;
use openssl::x509::{X509Name, X509NameRef};
use std::fmt;

/// Attribute kinds accepted in a subject or issuer name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttributeKind {
    CommonName,
    OrganizationName,
    OrganizationalUnitName,
    CountryName,
    StateOrProvinceName,
    LocalityName,
}

impl AttributeKind {
    pub fn nid(self) -> Nid {
        match self {
            AttributeKind::CommonName => Nid::COMMONNAME,
            AttributeKind::OrganizationName => Nid::ORGANIZATIONNAME,
            AttributeKind::OrganizationalUnitName => Nid::ORGANIZATIONALUNITNAME,
            AttributeKind::CountryName => Nid::COUNTRYNAME,
            AttributeKind::StateOrProvinceName => Nid::STATEORPROVINCENAME,
            AttributeKind::LocalityName => Nid::LOCALITYNAME,
        }
    }

    pub fn from_nid(nid: Nid) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.nid() == nid)
    }

    pub const ALL: [AttributeKind; 6] = [
        AttributeKind::CommonName,
        AttributeKind::OrganizationName,
        AttributeKind::OrganizationalUnitName,
        AttributeKind::CountryName,
        AttributeKind::StateOrProvinceName,
        AttributeKind::LocalityName,
    ];

    /// Short name as used in textual DNs (CN, O, OU, C, ST, L)
    pub fn short_name(self) -> &'static str {
        match self {
            AttributeKind::CommonName => "CN",
            AttributeKind::OrganizationName => "O",
            AttributeKind::OrganizationalUnitName => "OU",
            AttributeKind::CountryName => "C",
            AttributeKind::StateOrProvinceName => "ST",
            AttributeKind::LocalityName => "L",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectAttribute {
    pub kind: AttributeKind,
    pub value: String,
}

/// Error produced when a name carries something outside the recognized set
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NameError {
    #[error("unsupported name attribute: {0}")]
    UnsupportedAttribute(String),

    #[error("name attribute {0} is not a valid UTF-8 string without NUL bytes")]
    InvalidValue(&'static str),
}

/// Ordered sequence of typed name attributes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubjectName {
    attributes: Vec<SubjectAttribute>,
}

impl SubjectName {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an attribute, keeping insertion order
    pub fn push(&mut self, kind: AttributeKind, value: impl Into<String>) {
        self.attributes.push(SubjectAttribute {
            kind,
            value: value.into(),
        });
    }

    /// Chaining form of [`SubjectName::push`]
    pub fn with(mut self, kind: AttributeKind, value: impl Into<String>) -> Self {
        self.push(kind, value);
        self
    }

    pub fn attributes(&self) -> &[SubjectAttribute] {
        &self.attributes
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    /// First value for the given kind
    pub fn get(&self, kind: AttributeKind) -> Option<&str> {
        self.attributes
            .iter()
            .find(|attr| attr.kind == kind)
            .map(|attr| attr.value.as_str())
    }

    pub fn common_name(&self) -> Option<&str> {
        self.get(AttributeKind::CommonName)
    }

    /// Read an OpenSSL name, rejecting attributes outside the closed set
    pub fn from_x509_name(name: &X509NameRef) -> Result<Self, NameError> {
        let mut subject = SubjectName::new();
        for entry in name.entries() {
            let nid = entry.object().nid();
            let kind = AttributeKind::from_nid(nid).ok_or_else(|| {
                let label = nid
                    .short_name()
                    .map(str::to_string)
                    .unwrap_or_else(|_| format!("{}", entry.object()));
                NameError::UnsupportedAttribute(label)
            })?;
            // Raw bytes, so an embedded NUL cannot silently shorten the value
            let value = std::str::from_utf8(entry.data().as_slice())
                .ok()
                .filter(|value| !value.contains('\0'))
                .ok_or(NameError::InvalidValue(kind.short_name()))?;
            subject.push(kind, value);
        }
        Ok(subject)
    }

    /// Build an OpenSSL name with the attributes in insertion order
    pub fn to_x509_name(&self) -> Result<X509Name, ErrorStack> {
        let mut builder = X509Name::builder()?;
        for attr in &self.attributes {
            builder.append_entry_by_nid(attr.kind.nid(), &attr.value)?;
        }
        Ok(builder.build())
    }
}

impl fmt::Display for SubjectName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .attributes
            .iter()
            .map(|attr| format!("{}={}", attr.kind.short_name(), attr.value))
            .collect();
        write!(f, "{}", parts.join(", "))
    }
}
