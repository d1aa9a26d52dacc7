//! Certificate Serial Number Generation
//!
//! Serial numbers are drawn from 128 bits of OpenSSL's CSPRNG. There is no
//! persisted counter: uniqueness is probabilistic, and with 128 bits of entropy
//! the birthday bound keeps collisions negligible even after 2^64 issued
//! certificates. Callers must not assume any ordering between serials.
//!
//! Serials are rendered as plain decimal (no sign, no padding), which is the
//! form the issuing endpoint reports back to operators.

use openssl::asn1::Asn1Integer;
use openssl::bn::{BigNum, BigNumRef, MsbOption};
use openssl::error::ErrorStack;
use std::fmt;

/// Number of random bits in every serial number
pub const SERIAL_NUMBER_BITS: i32 = 128;

/// A random, non-negative certificate serial number
pub struct SerialNumber {
    value: BigNum,
}

impl SerialNumber {
    /// Draw a fresh serial number from the CSPRNG
    ///
    /// `MsbOption::MAYBE_ZERO` keeps all 128 bits random instead of pinning the
    /// top bit, so the full entropy is preserved.
    pub fn generate() -> Result<Self, ErrorStack> {
        let mut value = BigNum::new()?;
        value.rand(SERIAL_NUMBER_BITS, MsbOption::MAYBE_ZERO, false)?;
        Ok(Self { value })
    }

    /// Decimal rendering without sign or leading zeros
    pub fn to_decimal(&self) -> Result<String, ErrorStack> {
        Ok(self.value.to_dec_str()?.to_string())
    }

    /// ASN.1 INTEGER form for embedding in a certificate
    pub fn to_asn1_integer(&self) -> Result<Asn1Integer, ErrorStack> {
        self.value.to_asn1_integer()
    }

    /// Number of significant bits
    pub fn bits(&self) -> i32 {
        self.value.num_bits()
    }

    pub fn as_bignum(&self) -> &BigNumRef {
        &self.value
    }
}

impl fmt::Display for SerialNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.value.to_dec_str() {
            Ok(decimal) => write!(f, "{}", &*decimal),
            Err(_) => Err(fmt::Error),
        }
    }
}

impl fmt::Debug for SerialNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SerialNumber").field(&self.to_string()).finish()
    }
}

/// Produce the next certificate serial number
pub fn next_serial() -> Result<SerialNumber, ErrorStack> {
    SerialNumber::generate()
}
