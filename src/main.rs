//! PKI Pairing - Private CA and machine pairing service
//!
//! ```text
//! pki-pairing serve     [--config <path>]   Serve pairing requests on the Unix socket
//! pki-pairing bootstrap [--config <path>]   Generate root, server and machine CAs
//! pki-pairing issue <csr.pem> [--config <path>]
//!                                           Sign a server TLS CSR with the server CA
//! ```
//!
//! Configuration defaults to `config.toml` in the working directory; when that
//! file is absent the built-in defaults are used. Log verbosity follows
//! `RUST_LOG` (default `info`).

use anyhow::{anyhow, Context, Result};
use pki_pairing::bootstrap::bootstrap;
use pki_pairing::ca_store::{CaPurpose, CaStore};
use pki_pairing::configs::AppConfig;
use pki_pairing::external_interface::{start_socket_server, ServerState};
use pki_pairing::issuer;
use pki_pairing::pairer::PairingCoordinator;
use pki_pairing::pairing_store::InMemoryPairingStore;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG_PATH: &str = "config.toml";
const PURGE_INTERVAL: Duration = Duration::from_secs(60);

enum Command {
    Serve,
    Bootstrap,
    Issue(PathBuf),
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so `issue` can print PEM on stdout
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let (command, config_path) = parse_args(&args)?;
    let config = load_config(config_path.as_deref())?;

    match command {
        Command::Serve => serve(config).await,
        Command::Bootstrap => {
            let report = bootstrap(&config).context("Bootstrap failed")?;
            for (purpose, cert_path, _) in &report.written {
                println!("✓ {} CA written to {}", purpose, cert_path.display());
            }
            Ok(())
        }
        Command::Issue(csr_path) => issue_server_certificate(&config, &csr_path),
    }
}

fn parse_args(args: &[String]) -> Result<(Command, Option<String>)> {
    let mut command = None;
    let mut config_path = None;
    let mut iter = args.iter();

    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "serve" => command = Some(Command::Serve),
            "bootstrap" => command = Some(Command::Bootstrap),
            "issue" => {
                let path = iter
                    .next()
                    .ok_or_else(|| anyhow!("issue requires a CSR path"))?;
                command = Some(Command::Issue(PathBuf::from(path)));
            }
            "--config" => {
                let path = iter
                    .next()
                    .ok_or_else(|| anyhow!("--config requires a path"))?;
                config_path = Some(path.clone());
            }
            other => return Err(anyhow!("Unknown argument: {}", other)),
        }
    }

    let command = command.ok_or_else(|| {
        anyhow!("Usage: pki-pairing <serve|bootstrap|issue <csr.pem>> [--config <path>]")
    })?;
    Ok((command, config_path))
}

fn load_config(path: Option<&str>) -> Result<AppConfig> {
    match path {
        Some(path) => AppConfig::from_file(path),
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => AppConfig::load(),
        None => {
            tracing::info!("No {} found, using built-in defaults", DEFAULT_CONFIG_PATH);
            Ok(AppConfig::default())
        }
    }
}

async fn serve(config: AppConfig) -> Result<()> {
    // Never serve without verified CA identities
    let ca_store = Arc::new(
        CaStore::load(&config.certificate_authority).context("Failed to load CA identities")?,
    );

    let pairings = Arc::new(InMemoryPairingStore::new());
    spawn_purge_task(Arc::clone(&pairings));
    let coordinator = PairingCoordinator::from_config(ca_store, pairings.clone(), &config);

    let state = Arc::new(ServerState {
        coordinator,
        pairings,
        token_ttl: config.pairing.token_ttl(),
    });

    start_socket_server(&config.server.socket_path, state).await
}

fn issue_server_certificate(config: &AppConfig, csr_path: &Path) -> Result<()> {
    let ca_store =
        CaStore::load(&config.certificate_authority).context("Failed to load CA identities")?;
    let server_ca = ca_store.identity(CaPurpose::Server)?;

    let csr_pem = std::fs::read(csr_path)
        .context(format!("Failed to read CSR {}", csr_path.display()))?;
    let chain = issuer::issue(&csr_pem, server_ca, config.validity.leaf_days)
        .context("Failed to issue server certificate")?;

    let reply = chain.to_reply()?;
    tracing::info!(serial = chain.serial_number(), "Server certificate issued");
    print!("{}", reply.certificate);
    Ok(())
}

fn spawn_purge_task(pairings: Arc<InMemoryPairingStore>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(PURGE_INTERVAL);
        loop {
            interval.tick().await;
            let purged = pairings.purge_expired();
            if purged > 0 {
                tracing::debug!(purged, "Expired pairings removed");
            }
        }
    });
}
