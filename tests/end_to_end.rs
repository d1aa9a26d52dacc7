mod common;

use async_trait::async_trait;
use common::{device_csr_pem, device_key, root_identity, PairingFixture, HOUR};
use openssl::x509::{X509VerifyResult, X509};
use pki_pairing::ca_store::CaPurpose;
use pki_pairing::issuer::{self, IssueError};
use pki_pairing::pairer::{compute_pairing_hmac, PairingCoordinator, PairingError};
use pki_pairing::pairing_store::{PairingRecord, PairingStore, PairingStoreError};
use pki_pairing::subject::SubjectName;
use secrecy::{ExposeSecret, SecretVec};
use std::sync::Arc;
use std::time::Duration;

#[test]
fn test_leaf_signed_by_root() {
    let root = root_identity();
    let key = device_key();

    let chain = issuer::issue(&device_csr_pem(&key, "device-42"), &root, 365).unwrap();
    let leaf = chain.certificate();

    assert_eq!(
        leaf.issuer_name().to_der().unwrap(),
        root.certificate().subject_name().to_der().unwrap()
    );
    assert!(leaf.verify(root.private_key()).unwrap());
    assert!(leaf.public_key().unwrap().public_eq(&key));
}

#[test]
fn test_tampered_csr_signature_rejected_by_issuer() {
    let root = root_identity();
    let key = openssl::pkey::PKey::from_rsa(openssl::rsa::Rsa::generate(2048).unwrap()).unwrap();
    let csr = pki_pairing::csr::build_signing_request(&key, &common::device_subject("device-42"))
        .unwrap();

    let mut der = csr.to_der().unwrap();
    let last = der.len() - 1;
    der[last] ^= 0x01;
    let tampered = openssl::x509::X509Req::from_der(&der).unwrap().to_pem().unwrap();

    let result = issuer::issue(&tampered, &root, 365);
    assert!(matches!(result, Err(IssueError::InvalidSignature)));
}

#[tokio::test]
async fn test_pair_issues_machine_certificate() {
    let fixture = PairingFixture::new();
    fixture.register("tok-1", b"s3cr3t").await;

    let key = device_key();
    let csr = device_csr_pem(&key, "device-42");
    let hmac = compute_pairing_hmac(b"s3cr3t", &csr).unwrap();

    let reply = fixture.coordinator.pair("tok-1", &csr, &hmac).await.unwrap();

    let leaf = X509::from_pem(reply.certificate.as_bytes()).unwrap();
    let subject = SubjectName::from_x509_name(leaf.subject_name()).unwrap();
    assert_eq!(subject.common_name(), Some("device-42"));
    assert!(leaf.public_key().unwrap().public_eq(&key));

    let machine_ca = fixture.ca_store.identity(CaPurpose::Machine).unwrap();
    assert_eq!(machine_ca.certificate().issued(&leaf), X509VerifyResult::OK);
    assert!(leaf.verify(machine_ca.private_key()).unwrap());

    let server_ca = fixture.ca_store.identity(CaPurpose::Server).unwrap();
    assert_eq!(reply.ca, server_ca.certificate_pem().unwrap());
    assert_eq!(fixture.pairings.pending_count(), 0);
}

#[tokio::test]
async fn test_wrong_secret_is_hmac_mismatch() {
    let fixture = PairingFixture::new();
    fixture.register("tok-1", b"s3cr3t").await;

    let csr = device_csr_pem(&device_key(), "device-42");
    let hmac = compute_pairing_hmac(b"wrong", &csr).unwrap();

    let result = fixture.coordinator.pair("tok-1", &csr, &hmac).await;
    assert!(matches!(result, Err(PairingError::HmacMismatch)));

    // A failed proof does not burn the token
    assert_eq!(fixture.pairings.pending_count(), 1);
}

#[tokio::test]
async fn test_unknown_token() {
    let fixture = PairingFixture::new();
    let csr = device_csr_pem(&device_key(), "device-42");
    let hmac = compute_pairing_hmac(b"s3cr3t", &csr).unwrap();

    let result = fixture
        .coordinator
        .pair("nonexistent-token", &csr, &hmac)
        .await;
    assert!(matches!(result, Err(PairingError::UnknownToken)));
}

#[tokio::test]
async fn test_replay_fails() {
    let fixture = PairingFixture::new();
    fixture.register("tok-1", b"s3cr3t").await;

    let csr = device_csr_pem(&device_key(), "device-42");
    let hmac = compute_pairing_hmac(b"s3cr3t", &csr).unwrap();

    assert!(fixture.coordinator.pair("tok-1", &csr, &hmac).await.is_ok());
    let replay = fixture.coordinator.pair("tok-1", &csr, &hmac).await;
    assert!(matches!(replay, Err(PairingError::UnknownToken)));
}

#[tokio::test]
async fn test_tampered_csr_bytes_fail_hmac() {
    let fixture = PairingFixture::new();
    fixture.register("tok-1", b"s3cr3t").await;

    let csr = device_csr_pem(&device_key(), "device-42");
    let hmac = compute_pairing_hmac(b"s3cr3t", &csr).unwrap();

    let mut tampered = csr.clone();
    let middle = tampered.len() / 2;
    tampered[middle] = if tampered[middle] == b'A' { b'B' } else { b'A' };

    let result = fixture.coordinator.pair("tok-1", &tampered, &hmac).await;
    assert!(matches!(result, Err(PairingError::HmacMismatch)));
}

#[tokio::test]
async fn test_malformed_csr_keeps_token() {
    let fixture = PairingFixture::new();
    fixture.register("tok-1", b"s3cr3t").await;

    let garbage = b"-----BEGIN CERTIFICATE REQUEST-----\nnope\n".to_vec();
    let hmac = compute_pairing_hmac(b"s3cr3t", &garbage).unwrap();
    let result = fixture.coordinator.pair("tok-1", &garbage, &hmac).await;
    assert!(matches!(
        result,
        Err(PairingError::Issue(IssueError::MalformedCsr(_)))
    ));

    let csr = device_csr_pem(&device_key(), "device-42");
    let hmac = compute_pairing_hmac(b"s3cr3t", &csr).unwrap();
    assert!(fixture.coordinator.pair("tok-1", &csr, &hmac).await.is_ok());
}

#[tokio::test]
async fn test_expired_token_is_unknown() {
    let fixture = PairingFixture::new();
    fixture
        .pairings
        .insert(PairingRecord::new("tok-old", b"s3cr3t".to_vec(), Duration::ZERO))
        .await
        .unwrap();

    let csr = device_csr_pem(&device_key(), "device-42");
    let hmac = compute_pairing_hmac(b"s3cr3t", &csr).unwrap();
    let result = fixture.coordinator.pair("tok-old", &csr, &hmac).await;
    assert!(matches!(result, Err(PairingError::UnknownToken)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_pairs_single_winner() {
    let fixture = PairingFixture::new();
    fixture.register("tok-1", b"s3cr3t").await;

    let csr = device_csr_pem(&device_key(), "device-42");
    let hmac = compute_pairing_hmac(b"s3cr3t", &csr).unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let coordinator = Arc::clone(&fixture.coordinator);
        let csr = csr.clone();
        let hmac = hmac.clone();
        handles.push(tokio::spawn(async move {
            coordinator.pair("tok-1", &csr, &hmac).await
        }));
    }

    let mut successes = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => successes += 1,
            Err(PairingError::UnknownToken) => {}
            Err(other) => panic!("unexpected failure: {}", other),
        }
    }
    assert_eq!(successes, 1);
}

#[tokio::test]
async fn test_initiate_then_pair() {
    let fixture = PairingFixture::new();
    let invitation = fixture.coordinator.initiate(HOUR).await.unwrap();
    assert_eq!(fixture.pairings.pending_count(), 1);
    assert_eq!(invitation.secret.expose_secret().len(), 32);

    let csr = device_csr_pem(&device_key(), "device-7");
    let hmac = compute_pairing_hmac(invitation.secret.expose_secret(), &csr).unwrap();

    let reply = fixture
        .coordinator
        .pair(&invitation.token, &csr, &hmac)
        .await
        .unwrap();
    assert!(reply.certificate.starts_with("-----BEGIN CERTIFICATE-----"));
}

#[tokio::test]
async fn test_missing_machine_ca_keeps_token() {
    let root = root_identity();
    let ca_store = Arc::new(pki_pairing::ca_store::CaStore::from_identities(vec![root]));
    let pairings = Arc::new(pki_pairing::pairing_store::InMemoryPairingStore::new());
    let coordinator =
        PairingCoordinator::new(ca_store, pairings.clone(), 365, Duration::from_secs(30));
    pairings
        .insert(PairingRecord::new("tok-1", b"s3cr3t".to_vec(), HOUR))
        .await
        .unwrap();

    let csr = device_csr_pem(&device_key(), "device-42");
    let hmac = compute_pairing_hmac(b"s3cr3t", &csr).unwrap();
    let result = coordinator.pair("tok-1", &csr, &hmac).await;

    assert!(matches!(result, Err(PairingError::IdentityUnavailable(_))));
    assert_eq!(pairings.pending_count(), 1);
}

/// Store whose lookups never finish in time
struct StalledStore;

#[async_trait]
impl PairingStore for StalledStore {
    async fn insert(&self, _record: PairingRecord) -> Result<(), PairingStoreError> {
        Ok(())
    }

    async fn fetch_secret(&self, _token: &str) -> Result<Option<SecretVec<u8>>, PairingStoreError> {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok(None)
    }

    async fn consume(&self, _token: &str) -> Result<bool, PairingStoreError> {
        Ok(false)
    }
}

#[tokio::test]
async fn test_deadline_exceeded() {
    let coordinator = PairingCoordinator::new(
        common::hierarchy(),
        Arc::new(StalledStore),
        365,
        Duration::from_millis(50),
    );

    let csr = device_csr_pem(&device_key(), "device-42");
    let hmac = compute_pairing_hmac(b"s3cr3t", &csr).unwrap();
    let result = coordinator.pair("tok-1", &csr, &hmac).await;
    assert!(matches!(result, Err(PairingError::DeadlineExceeded)));
}

/// In-memory store whose consume acknowledges only after a delay
struct SlowConsumeStore {
    inner: pki_pairing::pairing_store::InMemoryPairingStore,
    delay: Duration,
}

#[async_trait]
impl PairingStore for SlowConsumeStore {
    async fn insert(&self, record: PairingRecord) -> Result<(), PairingStoreError> {
        self.inner.insert(record).await
    }

    async fn fetch_secret(&self, token: &str) -> Result<Option<SecretVec<u8>>, PairingStoreError> {
        self.inner.fetch_secret(token).await
    }

    async fn consume(&self, token: &str) -> Result<bool, PairingStoreError> {
        let consumed = self.inner.consume(token).await?;
        tokio::time::sleep(self.delay).await;
        Ok(consumed)
    }
}

#[tokio::test]
async fn test_consumed_token_always_yields_certificate() {
    let store = Arc::new(SlowConsumeStore {
        inner: pki_pairing::pairing_store::InMemoryPairingStore::new(),
        delay: Duration::from_millis(300),
    });
    let coordinator = PairingCoordinator::new(
        common::hierarchy(),
        store.clone(),
        365,
        Duration::from_millis(200),
    );
    store
        .insert(PairingRecord::new("tok-1", b"s3cr3t".to_vec(), HOUR))
        .await
        .unwrap();

    let csr = device_csr_pem(&device_key(), "device-42");
    let hmac = compute_pairing_hmac(b"s3cr3t", &csr).unwrap();

    let reply = coordinator.pair("tok-1", &csr, &hmac).await.unwrap();
    assert!(reply.certificate.starts_with("-----BEGIN CERTIFICATE-----"));
    assert_eq!(store.inner.pending_count(), 0);
}

#[tokio::test]
async fn test_forged_csr_signature_keeps_token() {
    let fixture = PairingFixture::new();
    fixture.register("tok-1", b"s3cr3t").await;

    let key = openssl::pkey::PKey::from_rsa(openssl::rsa::Rsa::generate(2048).unwrap()).unwrap();
    let csr = pki_pairing::csr::build_signing_request(&key, &common::device_subject("device-42"))
        .unwrap();
    let mut der = csr.to_der().unwrap();
    let last = der.len() - 1;
    der[last] ^= 0x01;
    let forged = openssl::x509::X509Req::from_der(&der).unwrap().to_pem().unwrap();

    // The HMAC is valid for the forged bytes, so only the CSR signature fails
    let hmac = compute_pairing_hmac(b"s3cr3t", &forged).unwrap();
    let result = fixture.coordinator.pair("tok-1", &forged, &hmac).await;

    assert!(matches!(
        result,
        Err(PairingError::Issue(IssueError::InvalidSignature))
    ));
    assert_eq!(fixture.pairings.pending_count(), 1);
}
