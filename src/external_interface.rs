//! External Interface Module
//!
//! Unix socket server through which local clients pair machines and operators
//! create pairing tokens. One task is spawned per connection; each connection
//! carries a single request frame and a single response frame (see
//! [`crate::protocol`]).
//!
//! Only [`PairingError::public_message`] ever reaches a client; the detailed
//! reason is logged by the coordinator on the audit target.
//!
//! [`PairingError::public_message`]: crate::pairer::PairingError::public_message

use crate::pairer::PairingCoordinator;
use crate::pairing_store::InMemoryPairingStore;
use crate::protocol::{
    deserialize_request, read_frame, serialize_response, write_frame, Request, Response,
};
use anyhow::{Context, Result};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};
use tokio::net::{UnixListener, UnixStream};

/// Everything a connection handler needs
pub struct ServerState {
    pub coordinator: PairingCoordinator,
    pub pairings: Arc<InMemoryPairingStore>,
    pub token_ttl: Duration,
}

/// Bind the Unix socket, replacing a stale socket file
///
/// The socket is restricted to its owner since `CreatePairing` hands out secrets.
pub fn bind_socket(socket_path: &Path) -> Result<UnixListener> {
    if socket_path.exists() {
        std::fs::remove_file(socket_path).context(format!(
            "Failed to remove existing socket at {}",
            socket_path.display()
        ))?;
    }

    let listener = UnixListener::bind(socket_path).context(format!(
        "Failed to bind Unix socket at {}",
        socket_path.display()
    ))?;
    std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600)).context(
        format!("Failed to restrict permissions on {}", socket_path.display()),
    )?;

    Ok(listener)
}

/// Start the Unix socket server and serve requests until the task is cancelled
///
/// # Example
/// ```no_run
/// # use std::sync::Arc;
/// # use pki_pairing::external_interface::{start_socket_server, ServerState};
/// # async fn example(state: Arc<ServerState>) -> anyhow::Result<()> {
/// start_socket_server(std::path::Path::new("/tmp/pki_pairing.sock"), state).await?;
/// # Ok(())
/// # }
/// ```
pub async fn start_socket_server(socket_path: &Path, state: Arc<ServerState>) -> Result<()> {
    let listener = bind_socket(socket_path)?;
    tracing::info!(socket = %socket_path.display(), "Unix socket server started");
    serve(listener, state).await
}

/// Accept loop over an already bound listener
pub async fn serve(listener: UnixListener, state: Arc<ServerState>) -> Result<()> {
    loop {
        match listener.accept().await {
            Ok((stream, _addr)) => {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    if let Err(e) = handle_client(stream, state).await {
                        tracing::warn!(error = %e, "Error handling client request");
                    }
                });
            }
            Err(e) => {
                tracing::error!(error = %e, "Error accepting connection");
            }
        }
    }
}

/// Handle an individual client connection
async fn handle_client(mut stream: UnixStream, state: Arc<ServerState>) -> Result<()> {
    let body = read_frame(&mut stream).await?;

    let response = match deserialize_request(&body) {
        Ok(request) => dispatch(request, &state).await,
        Err(e) => {
            tracing::debug!(error = %e, "Rejected malformed request");
            Response::Error {
                message: "Invalid request".to_string(),
            }
        }
    };

    let (_, bytes) = serialize_response(&response)?;
    write_frame(&mut stream, &bytes).await
}

async fn dispatch(request: Request, state: &ServerState) -> Response {
    match request {
        Request::Pair { token, csr, hmac } => handle_pair(&token, &csr, &hmac, state).await,
        Request::CreatePairing { ttl_seconds } => {
            let ttl = ttl_seconds
                .map(Duration::from_secs)
                .unwrap_or(state.token_ttl);
            handle_create_pairing(ttl, state).await
        }
        Request::Status => handle_status(state),
        Request::SocketTest => Response::SocketTestResponse {
            message: "Socket test successful".to_string(),
        },
    }
}

/// Handle Pair request
async fn handle_pair(token: &str, csr: &str, hmac: &str, state: &ServerState) -> Response {
    match state.coordinator.pair(token, csr.as_bytes(), hmac).await {
        Ok(reply) => Response::PairResponse {
            certificate: reply.certificate,
            ca: reply.ca,
        },
        Err(e) => Response::Error {
            message: e.public_message().to_string(),
        },
    }
}

/// Handle CreatePairing request
async fn handle_create_pairing(ttl: Duration, state: &ServerState) -> Response {
    match state.coordinator.initiate(ttl).await {
        Ok(invitation) => {
            let expires_at = invitation
                .expires_at
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0);
            Response::CreatePairingResponse {
                message: "Pairing created".to_string(),
                secret: invitation.secret_base64(),
                token: invitation.token,
                expires_at,
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to create pairing");
            Response::Error {
                message: "Failed to create pairing".to_string(),
            }
        }
    }
}

/// Handle Status request
fn handle_status(state: &ServerState) -> Response {
    let purposes = state.coordinator.ca_store().purposes();
    Response::StatusResponse {
        message: format!("{} CA identities loaded", purposes.len()),
        ca_purposes: purposes,
        pending_pairings: state.pairings.pending_count(),
    }
}
