use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub certificate_authority: CertificateAuthorityConfig,
    #[serde(default)]
    pub validity: ValidityConfig,
    #[serde(default)]
    pub pairing: PairingConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub bootstrap: BootstrapDefaults,
}

/// Locations of the PEM-encoded CA identities
#[derive(Debug, Deserialize, Clone)]
pub struct CertificateAuthorityConfig {
    #[serde(default = "default_server_cert_path")]
    pub server_cert_path: PathBuf,
    #[serde(default = "default_server_key_path")]
    pub server_key_path: PathBuf,
    #[serde(default = "default_machine_cert_path")]
    pub machine_cert_path: PathBuf,
    #[serde(default = "default_machine_key_path")]
    pub machine_key_path: PathBuf,
    #[serde(default)]
    pub root_cert_path: Option<PathBuf>,
    #[serde(default)]
    pub root_key_path: Option<PathBuf>,
}

impl Default for CertificateAuthorityConfig {
    fn default() -> Self {
        Self {
            server_cert_path: default_server_cert_path(),
            server_key_path: default_server_key_path(),
            machine_cert_path: default_machine_cert_path(),
            machine_key_path: default_machine_key_path(),
            root_cert_path: None,
            root_key_path: None,
        }
    }
}

fn default_server_cert_path() -> PathBuf {
    PathBuf::from("certs/ca-server.pem")
}

fn default_server_key_path() -> PathBuf {
    PathBuf::from("certs/ca-server.key")
}

fn default_machine_cert_path() -> PathBuf {
    PathBuf::from("certs/ca-machine.pem")
}

fn default_machine_key_path() -> PathBuf {
    PathBuf::from("certs/ca-machine.key")
}

/// Validity windows, in days, for each kind of issued certificate
#[derive(Debug, Deserialize, Clone)]
pub struct ValidityConfig {
    /// Machine certificates minted by pairing
    #[serde(default = "default_machine_days")]
    pub machine_days: u32,
    /// Other end-entity certificates
    #[serde(default = "default_leaf_days")]
    pub leaf_days: u32,
    /// Intermediate CA certificates
    #[serde(default = "default_ca_days")]
    pub ca_days: u32,
    #[serde(default = "default_root_days")]
    pub root_days: u32,
}

impl Default for ValidityConfig {
    fn default() -> Self {
        Self {
            machine_days: default_machine_days(),
            leaf_days: default_leaf_days(),
            ca_days: default_ca_days(),
            root_days: default_root_days(),
        }
    }
}

fn default_machine_days() -> u32 {
    365
}

fn default_leaf_days() -> u32 {
    365
}

fn default_ca_days() -> u32 {
    3650 // 10 years
}

fn default_root_days() -> u32 {
    7300 // 20 years
}

#[derive(Debug, Deserialize, Clone)]
pub struct PairingConfig {
    #[serde(default = "default_token_ttl_seconds")]
    pub token_ttl_seconds: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl PairingConfig {
    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_seconds)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for PairingConfig {
    fn default() -> Self {
        Self {
            token_ttl_seconds: default_token_ttl_seconds(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

fn default_token_ttl_seconds() -> u64 {
    3600
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_socket_path")]
    pub socket_path: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
        }
    }
}

fn default_socket_path() -> PathBuf {
    PathBuf::from("/tmp/pki_pairing.sock")
}

/// Subject used when the bootstrap command generates a new root CA
#[derive(Debug, Deserialize, Clone)]
pub struct BootstrapDefaults {
    #[serde(default = "default_root_ca_cn")]
    pub common_name: String,
    #[serde(default = "default_root_ca_org")]
    pub organization: String,
    #[serde(default = "default_root_ca_country")]
    pub country: Option<String>,
    #[serde(default = "default_root_ca_state")]
    pub state: Option<String>,
    #[serde(default = "default_root_ca_locality")]
    pub locality: Option<String>,
    #[serde(default = "default_key_bits")]
    pub key_bits: u32,
}

impl Default for BootstrapDefaults {
    fn default() -> Self {
        Self {
            common_name: default_root_ca_cn(),
            organization: default_root_ca_org(),
            country: default_root_ca_country(),
            state: default_root_ca_state(),
            locality: default_root_ca_locality(),
            key_bits: default_key_bits(),
        }
    }
}

fn default_root_ca_cn() -> String {
    "lamassu.is".to_string()
}

fn default_root_ca_org() -> String {
    "Lamassu".to_string()
}

fn default_root_ca_country() -> Option<String> {
    Some("VG".to_string())
}

fn default_root_ca_state() -> Option<String> {
    Some("Tortola".to_string())
}

fn default_root_ca_locality() -> Option<String> {
    Some("Road Town".to_string())
}

fn default_key_bits() -> u32 {
    4096
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &str) -> Result<Self> {
        let config_str =
            fs::read_to_string(path).context(format!("Failed to read config file: {}", path))?;

        Self::from_toml(&config_str)
    }

    pub fn from_toml(config_str: &str) -> Result<Self> {
        let config: AppConfig =
            toml::from_str(config_str).context("Failed to parse config file")?;

        Ok(config)
    }

    /// Load configuration with default path (config.toml)
    pub fn load() -> Result<Self> {
        Self::from_file("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = AppConfig::from_toml("").unwrap();

        assert_eq!(config.validity.machine_days, 365);
        assert_eq!(config.validity.ca_days, 3650);
        assert_eq!(config.pairing.token_ttl(), Duration::from_secs(3600));
        assert_eq!(
            config.certificate_authority.machine_key_path,
            PathBuf::from("certs/ca-machine.key")
        );
        assert!(config.certificate_authority.root_cert_path.is_none());
        assert_eq!(config.bootstrap.common_name, "lamassu.is");
    }

    #[test]
    fn test_partial_sections_override() {
        let config = AppConfig::from_toml(
            r#"
            [validity]
            machine_days = 90

            [pairing]
            request_timeout_ms = 2500

            [certificate_authority]
            root_cert_path = "/etc/pki/root.pem"
            root_key_path = "/etc/pki/root.key"
            "#,
        )
        .unwrap();

        assert_eq!(config.validity.machine_days, 90);
        assert_eq!(config.validity.leaf_days, 365);
        assert_eq!(config.pairing.request_timeout(), Duration::from_millis(2500));
        assert_eq!(
            config.certificate_authority.root_cert_path,
            Some(PathBuf::from("/etc/pki/root.pem"))
        );
    }

    #[test]
    fn test_invalid_toml_rejected() {
        assert!(AppConfig::from_toml("[validity\nmachine_days = ").is_err());
    }
}
