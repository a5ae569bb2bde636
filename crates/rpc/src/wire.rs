//! Wire format for RPC requests and responses.
//!
//! Shared by the listener (server) and [`RpcClient`](crate::RpcClient) so the
//! protocol cannot drift between the two sides.
//!
//! # Wire Format
//!
//! ```text
//! [4-byte big-endian length][version byte][LZ4-compressed JSON]
//! ```
//!
//! The length covers the version byte and the compressed body. The LZ4 block
//! carries its own uncompressed-size prefix so decompression can pre-allocate.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::{self, Read, Write};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Current wire version.
pub const WIRE_VERSION: u8 = 1;

/// Maximum frame size (compressed), shared across inbound and outbound paths.
pub const MAX_FRAME_SIZE: usize = 10 * 1024 * 1024; // 10 MB

/// Errors from wire encoding/decoding.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("frame I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("frame too large: {0} bytes")]
    TooLarge(usize),

    #[error("empty frame")]
    Empty,

    #[error("unsupported wire version {0}")]
    UnsupportedVersion(u8),

    #[error("decompression failed: {0}")]
    DecompressionFailed(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// One remote call: the method name selects the handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub method: String,
    pub body: Value,
}

impl Request {
    pub fn new(method: impl Into<String>, body: Value) -> Self {
        Self {
            method: method.into(),
            body,
        }
    }
}

/// Reply to a [`Request`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Response {
    Ok(Value),
    Err(String),
}

/// Compress data for transmission.
#[inline]
pub fn compress(data: &[u8]) -> Vec<u8> {
    lz4_flex::compress_prepend_size(data)
}

/// Decompress data produced by [`compress`].
#[inline]
pub fn decompress(data: &[u8]) -> Result<Vec<u8>, WireError> {
    lz4_flex::decompress_size_prepended(data)
        .map_err(|e| WireError::DecompressionFailed(e.to_string()))
}

/// Serialize `value` into a frame body (version byte + compressed JSON).
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, WireError> {
    let json = serde_json::to_vec(value)?;
    let compressed = compress(&json);
    let mut body = Vec::with_capacity(compressed.len() + 1);
    body.push(WIRE_VERSION);
    body.extend_from_slice(&compressed);
    Ok(body)
}

/// Deserialize a frame body produced by [`encode`].
pub fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<T, WireError> {
    let (&version, compressed) = body.split_first().ok_or(WireError::Empty)?;
    if version != WIRE_VERSION {
        return Err(WireError::UnsupportedVersion(version));
    }
    let json = decompress(compressed)?;
    Ok(serde_json::from_slice(&json)?)
}

fn check_len(len: usize, max_size: usize) -> Result<usize, WireError> {
    if len > max_size {
        return Err(WireError::TooLarge(len));
    }
    if len == 0 {
        return Err(WireError::Empty);
    }
    Ok(len)
}

/// Write a length-prefixed frame to a blocking stream and flush.
pub fn write_frame<W: Write>(stream: &mut W, body: &[u8]) -> Result<(), WireError> {
    let len = u32::try_from(body.len()).map_err(|_| WireError::TooLarge(body.len()))?;
    stream.write_all(&len.to_be_bytes())?;
    stream.write_all(body)?;
    stream.flush()?;
    Ok(())
}

/// Read one length-prefixed frame from a blocking stream.
pub fn read_frame<R: Read>(stream: &mut R, max_size: usize) -> Result<Vec<u8>, WireError> {
    let mut len_bytes = [0u8; 4];
    stream.read_exact(&mut len_bytes)?;
    let len = check_len(u32::from_be_bytes(len_bytes) as usize, max_size)?;

    let mut body = vec![0u8; len];
    stream.read_exact(&mut body)?;
    Ok(body)
}

/// Write a length-prefixed frame to an async stream and flush.
pub async fn write_frame_async<W: AsyncWrite + Unpin>(
    stream: &mut W,
    body: &[u8],
) -> Result<(), WireError> {
    let len = u32::try_from(body.len()).map_err(|_| WireError::TooLarge(body.len()))?;
    stream.write_all(&len.to_be_bytes()).await?;
    stream.write_all(body).await?;
    stream.flush().await?;
    Ok(())
}

/// Read one length-prefixed frame from an async stream.
///
/// Returns `Ok(None)` when the peer closed the connection between frames.
pub async fn read_frame_async<R: AsyncRead + Unpin>(
    stream: &mut R,
    max_size: usize,
) -> Result<Option<Vec<u8>>, WireError> {
    let mut len_bytes = [0u8; 4];
    match stream.read_exact(&mut len_bytes).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let len = check_len(u32::from_be_bytes(len_bytes) as usize, max_size)?;

    let mut body = vec![0u8; len];
    stream.read_exact(&mut body).await?;
    Ok(Some(body))
}
