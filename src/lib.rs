//! PKI Pairing - Private Certificate Authority for Machine Identities
//!
//! A small private CA that issues identity certificates to remote machines,
//! plus the pairing protocol that lets a machine obtain its first certificate
//! using nothing but a one-time token and a pre-shared secret.
//!
//! # Overview
//!
//! ```text
//! Root CA (self-signed, offline after bootstrap)
//!   ├── Server CA   (trust anchor returned to paired machines)
//!   └── Machine CA  (signs machine certificates)
//!       └── Machine certificate (CA:FALSE, minted by pairing)
//! ```
//!
//! ```text
//! token + CSR + HMAC ──► PairingCoordinator ──► PairingStore (secret lookup)
//!                              │
//!                              ├─► HMAC-SHA256 check (constant time)
//!                              ├─► CSR parse + self-signature check
//!                              ├─► atomic token consume
//!                              └─► issuer (MACHINE CA) ──► { certificate, ca }
//! ```
//!
//! # Quick Start
//!
//! ```bash
//! # Generate the CA hierarchy into certs/ (first run only)
//! ./target/release/pki-pairing bootstrap
//!
//! # Serve pairing requests on the local Unix socket
//! ./target/release/pki-pairing serve --config config.toml
//! ```
//!
//! ## As a Library
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use pki_pairing::ca_store::CaStore;
//! use pki_pairing::configs::AppConfig;
//! use pki_pairing::pairer::PairingCoordinator;
//! use pki_pairing::pairing_store::InMemoryPairingStore;
//!
//! # async fn example(csr_pem: &[u8], hmac: &str) -> anyhow::Result<()> {
//! let config = AppConfig::load()?;
//! let ca_store = Arc::new(CaStore::load(&config.certificate_authority)?);
//! let coordinator = PairingCoordinator::from_config(
//!     ca_store,
//!     Arc::new(InMemoryPairingStore::new()),
//!     &config,
//! );
//!
//! let invitation = coordinator.initiate(Duration::from_secs(3600)).await?;
//! let reply = coordinator.pair(&invitation.token, csr_pem, hmac).await?;
//! println!("{}", reply.certificate);
//! # Ok(())
//! # }
//! ```
//!
//! # Module Overview
//!
//! - [`ca_store`]: CA identities loaded and checked once at startup
//! - [`issuer`]: CSR to certificate, leaf and CA profiles
//! - [`pairer`]: token/HMAC pairing flow
//! - [`pairing_store`]: token to secret store trait and in-memory backend
//! - [`csr`], [`subject`], [`extensions`], [`serial_number`]: certificate building blocks
//! - [`generate_root_ca`], [`generate_intermediate_ca`], [`bootstrap`]: hierarchy generation
//! - [`external_interface`], [`protocol`]: local Unix socket API
//! - [`configs`]: TOML configuration
//!
//! # Security Considerations
//!
//! - Private keys and pairing secrets never appear in logs, errors or `Debug` output
//! - Clients only ever see "pairing failed"; the reason goes to the
//!   `pki_pairing::audit` log target
//! - ⚠️ The Unix socket is the only access control for `CreatePairing`

pub mod bootstrap;
pub mod ca_store;
pub mod configs;
pub mod csr;
pub mod extensions;
pub mod external_interface;
pub mod generate_intermediate_ca;
pub mod generate_root_ca;
pub mod issuer;
pub mod pairer;
pub mod pairing_store;
pub mod protocol;
pub mod serial_number;
pub mod subject;

/// Log target for security events
pub(crate) const AUDIT_TARGET: &str = "pki_pairing::audit";

pub use ca_store::{CaIdentity, CaPurpose, CaStore, CaStoreError};
pub use csr::{build_signing_request, SigningRequest};
pub use issuer::{issue, issue_ca, ChainReply, IssueError, IssuedChain};
pub use pairer::{
    compute_pairing_hmac, PairingCoordinator, PairingError, PairingReply, PairingState,
};
pub use pairing_store::{InMemoryPairingStore, PairingRecord, PairingStore, PairingStoreError};
pub use subject::{AttributeKind, SubjectName};
