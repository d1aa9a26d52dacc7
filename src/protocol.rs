//! Protocol Module
//!
//! Defines the local IPC protocol for the pairing server: request/response
//! types, their serialization, and the framing used on the socket.
//!
//! # Wire Format
//! ```text
//! ┌──────────────────────┬─────────────────────────────┐
//! │ length (u32, LE)     │ JSON body (length bytes)    │
//! └──────────────────────┴─────────────────────────────┘
//! ```
//! Bodies larger than [`MAX_FRAME_SIZE`] are rejected before they are read.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::ca_store::CaPurpose;

/// Largest accepted frame body (64 KiB)
pub const MAX_FRAME_SIZE: u32 = 64 * 1024;

/// Request types from local clients
#[derive(Debug, Deserialize, Serialize)]
#[serde(tag = "type")]
pub enum Request {
    /// Machine side of the handshake: CSR plus HMAC proof
    Pair {
        token: String,
        csr: String,
        hmac: String,
    },
    /// Operator side: create a token/secret pair
    CreatePairing {
        #[serde(default)]
        ttl_seconds: Option<u64>,
    },
    Status,
    SocketTest,
}

/// Response types sent back to clients
#[derive(Debug, Deserialize, Serialize)]
#[serde(tag = "type")]
pub enum Response {
    PairResponse {
        certificate: String,
        ca: String,
    },
    CreatePairingResponse {
        message: String,
        token: String,
        secret: String,
        expires_at: u64,
    },
    StatusResponse {
        message: String,
        ca_purposes: Vec<CaPurpose>,
        pending_pairings: usize,
    },
    SocketTestResponse {
        message: String,
    },
    Error {
        message: String,
    },
}

/// Serialize a Request to length-prefixed byte array
///
/// # Arguments
/// * `request` - The Request to serialize
///
/// # Returns
/// * `Result<(u32, Vec<u8>)>` - Tuple of (length, bytes) where bytes includes 4-byte length prefix
///
/// # Example
/// ```no_run
/// use pki_pairing::protocol::{Request, serialize_request};
///
/// let request = Request::SocketTest;
/// let (size, bytes) = serialize_request(&request)?;
/// // bytes = [4-byte length] + [JSON data]
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn serialize_request(request: &Request) -> Result<(u32, Vec<u8>)> {
    let json = serde_json::to_vec(request).context("Failed to serialize request to JSON")?;
    frame(json)
}

/// Deserialize a byte array to Request
///
/// # Arguments
/// * `bytes` - Byte array containing JSON-encoded Request (without length prefix)
pub fn deserialize_request(bytes: &[u8]) -> Result<Request> {
    let json_str = std::str::from_utf8(bytes).context("Failed to decode request bytes as UTF-8")?;

    let request: Request =
        serde_json::from_str(json_str).context("Failed to deserialize JSON to Request")?;

    Ok(request)
}

/// Serialize a Response to length-prefixed byte array
///
/// # Returns
/// * `Result<(u32, Vec<u8>)>` - Tuple of (length, bytes) where bytes includes 4-byte length prefix
pub fn serialize_response(response: &Response) -> Result<(u32, Vec<u8>)> {
    let json = serde_json::to_vec(response).context("Failed to serialize response to JSON")?;
    frame(json)
}

/// Deserialize a byte array to Response
///
/// # Example
/// ```no_run
/// use pki_pairing::protocol::deserialize_response;
///
/// let response_bytes = b"{\"type\":\"SocketTestResponse\",\"message\":\"test\"}";
/// let response = deserialize_response(response_bytes)?;
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn deserialize_response(bytes: &[u8]) -> Result<Response> {
    let json_str =
        std::str::from_utf8(bytes).context("Failed to decode response bytes as UTF-8")?;

    let response: Response =
        serde_json::from_str(json_str).context("Failed to deserialize JSON to Response")?;

    Ok(response)
}

fn frame(json: Vec<u8>) -> Result<(u32, Vec<u8>)> {
    let length = u32::try_from(json.len())
        .ok()
        .filter(|len| *len <= MAX_FRAME_SIZE)
        .ok_or_else(|| anyhow!("Message of {} bytes exceeds frame limit", json.len()))?;

    let mut buffer = Vec::with_capacity(4 + json.len());
    buffer.extend_from_slice(&length.to_le_bytes());
    buffer.extend_from_slice(&json);

    Ok((length, buffer))
}

/// Read one length-prefixed frame body
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    reader
        .read_exact(&mut len_buf)
        .await
        .context("Failed to read frame length")?;

    let length = u32::from_le_bytes(len_buf);
    if length > MAX_FRAME_SIZE {
        return Err(anyhow!(
            "Frame of {} bytes exceeds limit of {}",
            length,
            MAX_FRAME_SIZE
        ));
    }

    let mut body = vec![0u8; length as usize];
    reader
        .read_exact(&mut body)
        .await
        .context("Failed to read frame body")?;
    Ok(body)
}

/// Write an already length-prefixed buffer and flush
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, framed: &[u8]) -> Result<()> {
    writer
        .write_all(framed)
        .await
        .context("Failed to write frame")?;
    writer.flush().await.context("Failed to flush frame")?;
    Ok(())
}
