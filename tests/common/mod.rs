#![allow(dead_code)]

use openssl::ec::{EcGroup, EcKey};
use openssl::nid::Nid;
use openssl::pkey::{PKey, Private};
use pki_pairing::ca_store::{CaIdentity, CaPurpose, CaStore};
use pki_pairing::csr::build_signing_request;
use pki_pairing::generate_intermediate_ca::RsaIntermediateCABuilder;
use pki_pairing::generate_root_ca::RsaRootCABuilder;
use pki_pairing::pairer::PairingCoordinator;
use pki_pairing::pairing_store::{InMemoryPairingStore, PairingRecord, PairingStore};
use pki_pairing::subject::{AttributeKind, SubjectName};
use std::sync::Arc;
use std::time::Duration;

pub const HOUR: Duration = Duration::from_secs(3600);

pub fn root_identity() -> CaIdentity {
    RsaRootCABuilder::new()
        .subject_common_name("lamassu.is".to_string())
        .organization("Lamassu".to_string())
        .country("VG".to_string())
        .key_bits(2048)
        .validity_days(365)
        .build()
        .unwrap()
}

fn intermediate(root: &CaIdentity, purpose: CaPurpose, cn: &str) -> CaIdentity {
    RsaIntermediateCABuilder::new(root, purpose)
        .subject_common_name(cn.to_string())
        .organization("Lamassu".to_string())
        .key_bits(2048)
        .validity_days(365)
        .build()
        .unwrap()
}

/// Root, server and machine identities built in memory
pub fn hierarchy() -> Arc<CaStore> {
    let root = root_identity();
    let server = intermediate(&root, CaPurpose::Server, "lamassu.is Server CA");
    let machine = intermediate(&root, CaPurpose::Machine, "lamassu.is Machine CA");
    Arc::new(CaStore::from_identities(vec![root, server, machine]))
}

pub fn device_key() -> PKey<Private> {
    let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).unwrap();
    PKey::from_ec_key(EcKey::generate(&group).unwrap()).unwrap()
}

pub fn device_subject(cn: &str) -> SubjectName {
    SubjectName::new().with(AttributeKind::CommonName, cn)
}

pub fn device_csr_pem(key: &PKey<Private>, cn: &str) -> Vec<u8> {
    build_signing_request(key, &device_subject(cn))
        .unwrap()
        .to_pem()
        .unwrap()
}

pub struct PairingFixture {
    pub ca_store: Arc<CaStore>,
    pub pairings: Arc<InMemoryPairingStore>,
    pub coordinator: Arc<PairingCoordinator>,
}

impl PairingFixture {
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_secs(30))
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        let ca_store = hierarchy();
        let pairings = Arc::new(InMemoryPairingStore::new());
        let coordinator = Arc::new(PairingCoordinator::new(
            Arc::clone(&ca_store),
            pairings.clone(),
            365,
            timeout,
        ));
        Self {
            ca_store,
            pairings,
            coordinator,
        }
    }

    pub async fn register(&self, token: &str, secret: &[u8]) {
        self.pairings
            .insert(PairingRecord::new(token, secret.to_vec(), HOUR))
            .await
            .unwrap();
    }
}
