//! CA Hierarchy Bootstrap
//!
//! Generates the root, server and machine identities and writes them as PEM
//! files to the configured paths. Existing files are never overwritten; an
//! operator who wants a new hierarchy removes the old files first.
//!
//! Private keys are written PKCS#8 with mode 0600.

use crate::ca_store::{CaIdentity, CaPurpose};
use crate::configs::AppConfig;
use crate::generate_intermediate_ca::RsaIntermediateCABuilder;
use crate::generate_root_ca::RsaRootCABuilder;
use crate::subject::{AttributeKind, SubjectName};
use anyhow::{anyhow, Context, Result};
use std::fs::OpenOptions;
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

const DEFAULT_ROOT_CERT_PATH: &str = "certs/ca-root.pem";
const DEFAULT_ROOT_KEY_PATH: &str = "certs/ca-root.key";

/// Where each generated identity was written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapReport {
    pub written: Vec<(CaPurpose, PathBuf, PathBuf)>,
}

/// Generate the full hierarchy and write it to disk
pub fn bootstrap(config: &AppConfig) -> Result<BootstrapReport> {
    let targets = identity_paths(config);

    for (purpose, cert_path, key_path) in &targets {
        for path in [cert_path, key_path] {
            if path.exists() {
                return Err(anyhow!(
                    "Refusing to overwrite existing {} CA file {}",
                    purpose,
                    path.display()
                ));
            }
        }
    }

    let defaults = &config.bootstrap;
    let root = RsaRootCABuilder::new()
        .subject(root_subject(config))
        .key_bits(defaults.key_bits)
        .validity_days(config.validity.root_days)
        .build()
        .context("Failed to generate Root CA")?;

    let server = intermediate(&root, CaPurpose::Server, "Server CA", config)?;
    let machine = intermediate(&root, CaPurpose::Machine, "Machine CA", config)?;

    for (identity, (_, cert_path, key_path)) in [&root, &server, &machine].into_iter().zip(&targets)
    {
        write_identity(identity, cert_path, key_path)?;
        tracing::info!(
            purpose = %identity.purpose(),
            cert = %cert_path.display(),
            key = %key_path.display(),
            "CA identity written"
        );
    }

    Ok(BootstrapReport { written: targets })
}

fn identity_paths(config: &AppConfig) -> Vec<(CaPurpose, PathBuf, PathBuf)> {
    let ca = &config.certificate_authority;
    vec![
        (
            CaPurpose::Root,
            ca.root_cert_path
                .clone()
                .unwrap_or_else(|| PathBuf::from(DEFAULT_ROOT_CERT_PATH)),
            ca.root_key_path
                .clone()
                .unwrap_or_else(|| PathBuf::from(DEFAULT_ROOT_KEY_PATH)),
        ),
        (
            CaPurpose::Server,
            ca.server_cert_path.clone(),
            ca.server_key_path.clone(),
        ),
        (
            CaPurpose::Machine,
            ca.machine_cert_path.clone(),
            ca.machine_key_path.clone(),
        ),
    ]
}

// CN, C, ST, L, O: the attribute order deployed root certificates carry
fn root_subject(config: &AppConfig) -> SubjectName {
    let defaults = &config.bootstrap;
    let mut subject =
        SubjectName::new().with(AttributeKind::CommonName, defaults.common_name.as_str());
    if let Some(country) = &defaults.country {
        subject.push(AttributeKind::CountryName, country.as_str());
    }
    if let Some(state) = &defaults.state {
        subject.push(AttributeKind::StateOrProvinceName, state.as_str());
    }
    if let Some(locality) = &defaults.locality {
        subject.push(AttributeKind::LocalityName, locality.as_str());
    }
    subject.with(AttributeKind::OrganizationName, defaults.organization.as_str())
}

fn intermediate(
    root: &CaIdentity,
    purpose: CaPurpose,
    label: &str,
    config: &AppConfig,
) -> Result<CaIdentity> {
    let defaults = &config.bootstrap;
    RsaIntermediateCABuilder::new(root, purpose)
        .subject_common_name(format!("{} {}", defaults.common_name, label))
        .organization(defaults.organization.clone())
        .key_bits(defaults.key_bits)
        .validity_days(config.validity.ca_days)
        .build()
        .with_context(|| format!("Failed to generate {} CA", purpose))
}

fn write_identity(identity: &CaIdentity, cert_path: &Path, key_path: &Path) -> Result<()> {
    let cert_pem = identity
        .certificate()
        .to_pem()
        .context("Failed to encode certificate")?;
    let key_pem = identity
        .private_key()
        .private_key_to_pem_pkcs8()
        .context("Failed to encode private key")?;

    write_new_file(cert_path, &cert_pem, 0o644)?;
    write_new_file(key_path, &key_pem, 0o600)
}

fn write_new_file(path: &Path, contents: &[u8], mode: u32) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .context(format!("Failed to create directory {}", parent.display()))?;
    }

    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(mode)
        .open(path)
        .context(format!("Failed to create {}", path.display()))?;
    file.write_all(contents)
        .context(format!("Failed to write {}", path.display()))?;
    Ok(())
}
