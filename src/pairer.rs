//! Pairing Coordinator
//!
//! Exchanges a single-use pairing token, a CSR and an HMAC proof for a machine
//! certificate.
//!
//! ```text
//! AwaitingToken ──► SecretResolved ──► HmacVerified ──► CertIssued
//!        │                 │                 │
//!        └─────────────────┴─────────────────┴──► Err(PairingError)
//! ```
//!
//! # Protocol
//! 1. The operator calls [`PairingCoordinator::initiate`] and hands the token
//!    and secret to the machine out-of-band.
//! 2. The machine builds a CSR and sends `(token, csr, base64(HMAC-SHA256(secret, csr)))`.
//! 3. [`PairingCoordinator::pair`] resolves the secret, checks the HMAC in
//!    constant time, verifies the CSR, consumes the token and issues the
//!    certificate against the MACHINE CA. The reply carries the SERVER CA
//!    certificate so the machine can authenticate the server afterwards.
//!
//! The token is consumed only after the HMAC and the CSR have been checked, so
//! a garbled upload can be retried; once consumed, a replay of the same triple
//! fails with `UnknownToken`. The request deadline covers everything before the
//! consume; after it, issuance always runs to completion and its result is
//! returned.
//!
//! # Logging
//! Security events go to the `pki_pairing::audit` target. Tokens appear only as
//! a SHA-256 fingerprint; secrets and keys never appear.

use crate::ca_store::{CaPurpose, CaStore, CaStoreError};
use crate::configs::AppConfig;
use crate::csr::SigningRequest;
use crate::extensions::CertificateProfile;
use crate::issuer::{self, ChainReply, IssueError};
use crate::pairing_store::{PairingRecord, PairingStore, PairingStoreError};
use crate::AUDIT_TARGET;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use hmac::digest::InvalidLength;
use hmac::{Hmac, Mac};
use openssl::error::ErrorStack;
use secrecy::{ExposeSecret, SecretVec};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

type HmacSha256 = Hmac<Sha256>;

const TOKEN_BYTES: usize = 32;
const SECRET_BYTES: usize = 32;

/// Reply sent to a machine that paired successfully
pub type PairingReply = ChainReply;

/// Progress of a single pairing attempt
///
/// A failure is the `Err` returned by [`PairingCoordinator::pair`]; the audit
/// log records the last state reached before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairingState {
    AwaitingToken,
    SecretResolved,
    HmacVerified,
    CertIssued,
}

impl fmt::Display for PairingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PairingState::AwaitingToken => "awaiting_token",
            PairingState::SecretResolved => "secret_resolved",
            PairingState::HmacVerified => "hmac_verified",
            PairingState::CertIssued => "cert_issued",
        };
        f.write_str(label)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PairingError {
    #[error("unknown or expired pairing token")]
    UnknownToken,

    #[error("pairing HMAC does not match")]
    HmacMismatch,

    #[error(transparent)]
    Issue(#[from] IssueError),

    #[error(transparent)]
    IdentityUnavailable(#[from] CaStoreError),

    #[error(transparent)]
    Store(#[from] PairingStoreError),

    #[error("pairing request deadline exceeded")]
    DeadlineExceeded,

    #[error("pairing worker failed: {0}")]
    TaskFailed(String),

    #[error("random generator failed: {0}")]
    Random(ErrorStack),
}

impl PairingError {
    /// Message safe to send back to the requester
    pub fn public_message(&self) -> &'static str {
        "pairing failed"
    }
}

/// Freshly created pairing, handed to the operator
pub struct PairingInvitation {
    pub token: String,
    pub secret: SecretVec<u8>,
    pub expires_at: SystemTime,
}

impl PairingInvitation {
    /// Secret as standard base64, the form typed into the machine
    pub fn secret_base64(&self) -> String {
        STANDARD.encode(self.secret.expose_secret())
    }
}

impl fmt::Debug for PairingInvitation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PairingInvitation")
            .field("token", &token_fingerprint(&self.token))
            .field("secret", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

pub struct PairingCoordinator {
    ca_store: Arc<CaStore>,
    store: Arc<dyn PairingStore>,
    machine_validity_days: u32,
    request_timeout: Duration,
}

impl PairingCoordinator {
    pub fn new(
        ca_store: Arc<CaStore>,
        store: Arc<dyn PairingStore>,
        machine_validity_days: u32,
        request_timeout: Duration,
    ) -> Self {
        Self {
            ca_store,
            store,
            machine_validity_days,
            request_timeout,
        }
    }

    pub fn from_config(
        ca_store: Arc<CaStore>,
        store: Arc<dyn PairingStore>,
        config: &AppConfig,
    ) -> Self {
        Self::new(
            ca_store,
            store,
            config.validity.machine_days,
            config.pairing.request_timeout(),
        )
    }

    pub fn ca_store(&self) -> &CaStore {
        &self.ca_store
    }

    /// Create a random token and secret and register them in the store
    pub async fn initiate(&self, ttl: Duration) -> Result<PairingInvitation, PairingError> {
        let token = URL_SAFE_NO_PAD.encode(random_bytes(TOKEN_BYTES)?);
        let secret = random_bytes(SECRET_BYTES)?;

        let record = PairingRecord::new(token.clone(), secret.clone(), ttl);
        let expires_at = record.expires_at();
        self.store.insert(record).await?;

        tracing::info!(
            target: AUDIT_TARGET,
            token = %token_fingerprint(&token),
            ttl_seconds = ttl.as_secs(),
            "Pairing initiated"
        );

        Ok(PairingInvitation {
            token,
            secret: SecretVec::new(secret),
            expires_at,
        })
    }

    /// Exchange a token, CSR and HMAC for a machine certificate
    ///
    /// # Arguments
    /// * `token` - Pairing token issued by [`PairingCoordinator::initiate`]
    /// * `csr` - PEM CSR bytes, exactly as covered by the HMAC
    /// * `hmac_base64` - Base64 HMAC-SHA256 of `csr` keyed with the pairing secret
    ///
    /// # Returns
    /// * `Ok(PairingReply)` - Machine certificate and SERVER CA certificate, PEM
    /// * `Err(PairingError)` - Terminal failure; the requester should only see
    ///   [`PairingError::public_message`]
    pub async fn pair(
        &self,
        token: &str,
        csr: &[u8],
        hmac_base64: &str,
    ) -> Result<PairingReply, PairingError> {
        let fingerprint = token_fingerprint(token);
        let mut state = PairingState::AwaitingToken;

        let verified = tokio::time::timeout(
            self.request_timeout,
            self.verify(token, csr, hmac_base64, &mut state),
        )
        .await
        .unwrap_or(Err(PairingError::DeadlineExceeded));

        // Past this point the token may be consumed, so no deadline applies
        let outcome = match verified {
            Ok(request) => self.complete(token, request, &mut state).await,
            Err(err) => Err(err),
        };

        if let Err(err) = &outcome {
            audit_failure(err, &fingerprint, state);
        }
        outcome
    }

    async fn verify(
        &self,
        token: &str,
        csr: &[u8],
        hmac_base64: &str,
        state: &mut PairingState,
    ) -> Result<SigningRequest, PairingError> {
        let secret = self
            .store
            .fetch_secret(token)
            .await?
            .ok_or(PairingError::UnknownToken)?;
        *state = PairingState::SecretResolved;

        verify_pairing_hmac(secret.expose_secret(), csr, hmac_base64)?;
        drop(secret);
        *state = PairingState::HmacVerified;

        let csr = csr.to_vec();
        let request = tokio::task::spawn_blocking(move || SigningRequest::from_pem(&csr))
            .await
            .map_err(|e| PairingError::TaskFailed(e.to_string()))?
            .map_err(IssueError::from)?;

        self.ca_store.identity(CaPurpose::Machine)?;
        self.ca_store.identity(CaPurpose::Server)?;
        Ok(request)
    }

    async fn complete(
        &self,
        token: &str,
        request: SigningRequest,
        state: &mut PairingState,
    ) -> Result<PairingReply, PairingError> {
        if !self.store.consume(token).await? {
            return Err(PairingError::UnknownToken);
        }

        let ca_store = Arc::clone(&self.ca_store);
        let validity_days = self.machine_validity_days;
        let (reply, serial) = tokio::task::spawn_blocking(move || {
            issue_machine_certificate(&ca_store, &request, validity_days)
        })
        .await
        .map_err(|e| PairingError::TaskFailed(e.to_string()))??;
        *state = PairingState::CertIssued;

        tracing::info!(
            target: AUDIT_TARGET,
            token = %token_fingerprint(token),
            serial = %serial,
            "Machine paired"
        );
        Ok(reply)
    }
}

impl fmt::Debug for PairingCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PairingCoordinator")
            .field("machine_validity_days", &self.machine_validity_days)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

fn issue_machine_certificate(
    ca_store: &CaStore,
    request: &SigningRequest,
    validity_days: u32,
) -> Result<(PairingReply, String), PairingError> {
    let machine_ca = ca_store.identity(CaPurpose::Machine)?;
    let server_ca = ca_store.identity(CaPurpose::Server)?;

    let chain = issuer::sign_request(
        request,
        machine_ca,
        validity_days,
        CertificateProfile::EndEntity,
    )?;

    let certificate = chain.to_reply().map_err(IssueError::from)?.certificate;
    let ca = server_ca.certificate_pem().map_err(IssueError::from)?;
    Ok((
        PairingReply { certificate, ca },
        chain.serial_number().to_string(),
    ))
}

fn audit_failure(err: &PairingError, fingerprint: &str, reached: PairingState) {
    match err {
        PairingError::UnknownToken => {
            tracing::warn!(
                target: AUDIT_TARGET,
                token = %fingerprint,
                %reached,
                "Pairing with unknown token"
            )
        }
        PairingError::HmacMismatch => {
            tracing::warn!(
                target: AUDIT_TARGET,
                token = %fingerprint,
                %reached,
                "Pairing HMAC mismatch, possible brute force"
            )
        }
        PairingError::Issue(IssueError::InvalidSignature) => {
            tracing::warn!(
                target: AUDIT_TARGET,
                token = %fingerprint,
                %reached,
                "CSR signature invalid, potential forgery"
            )
        }
        other => {
            tracing::error!(
                target: AUDIT_TARGET,
                token = %fingerprint,
                %reached,
                error = %other,
                "Pairing failed"
            )
        }
    }
}

/// Base64 HMAC-SHA256 of `csr` keyed with `secret`, as sent by the machine
pub fn compute_pairing_hmac(secret: &[u8], csr: &[u8]) -> Result<String, InvalidLength> {
    let mut mac = HmacSha256::new_from_slice(secret)?;
    mac.update(csr);
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

/// Check a base64 HMAC in constant time
///
/// Undecodable input is reported as `HmacMismatch`.
pub fn verify_pairing_hmac(
    secret: &[u8],
    csr: &[u8],
    hmac_base64: &str,
) -> Result<(), PairingError> {
    let provided = STANDARD
        .decode(hmac_base64.trim())
        .map_err(|_| PairingError::HmacMismatch)?;
    let mut mac = HmacSha256::new_from_slice(secret).map_err(|_| PairingError::HmacMismatch)?;
    mac.update(csr);
    mac.verify_slice(&provided)
        .map_err(|_| PairingError::HmacMismatch)
}

/// Short, non-reversible label for a token, safe for logs
pub fn token_fingerprint(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    digest[..8].iter().map(|b| format!("{:02x}", b)).collect()
}

fn random_bytes(len: usize) -> Result<Vec<u8>, PairingError> {
    let mut buf = vec![0u8; len];
    openssl::rand::rand_bytes(&mut buf).map_err(PairingError::Random)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hmac_roundtrip() {
        let csr = b"-----BEGIN CERTIFICATE REQUEST-----";
        let hmac = compute_pairing_hmac(b"s3cr3t", csr).unwrap();

        assert!(verify_pairing_hmac(b"s3cr3t", csr, &hmac).is_ok());
        assert!(matches!(
            verify_pairing_hmac(b"wrong", csr, &hmac),
            Err(PairingError::HmacMismatch)
        ));
    }

    #[test]
    fn test_hmac_covers_every_byte() {
        let csr = b"payload".to_vec();
        let hmac = compute_pairing_hmac(b"s3cr3t", &csr).unwrap();

        let mut tampered = csr.clone();
        tampered[3] ^= 0x20;
        assert!(matches!(
            verify_pairing_hmac(b"s3cr3t", &tampered, &hmac),
            Err(PairingError::HmacMismatch)
        ));
    }

    #[test]
    fn test_undecodable_hmac_is_mismatch() {
        assert!(matches!(
            verify_pairing_hmac(b"s3cr3t", b"csr", "%%% not base64 %%%"),
            Err(PairingError::HmacMismatch)
        ));
        assert!(matches!(
            verify_pairing_hmac(b"s3cr3t", b"csr", ""),
            Err(PairingError::HmacMismatch)
        ));
    }

    #[test]
    fn test_fingerprint_hides_token() {
        let fingerprint = token_fingerprint("tok-1");
        assert_eq!(fingerprint.len(), 16);
        assert!(!fingerprint.contains("tok-1"));
        assert_eq!(fingerprint, token_fingerprint("tok-1"));
    }

    #[test]
    fn test_public_message_is_generic() {
        assert_eq!(PairingError::UnknownToken.public_message(), "pairing failed");
        assert_eq!(PairingError::HmacMismatch.public_message(), "pairing failed");
    }

    #[test]
    fn test_random_failure_is_not_a_worker_failure() {
        let err = PairingError::Random(ErrorStack::get());
        assert!(err.to_string().starts_with("random generator failed"));
        assert!(!matches!(err, PairingError::TaskFailed(_)));
        assert_eq!(err.public_message(), "pairing failed");
    }
}
