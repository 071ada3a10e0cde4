//! Base64 transfer encoding, as used by the remote contents API.

use crate::error::{ErrorKind, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use exn::ResultExt;

/// Encode raw bytes for transfer.
pub fn encode_bytes(data: impl AsRef<[u8]>) -> String {
    STANDARD.encode(data)
}

/// Encode text content for transfer.
pub fn encode(content: &str) -> String {
    encode_bytes(content.as_bytes())
}

/// Decode transfer-encoded bytes.
///
/// The remote side wraps encoded payloads every 60 characters, so all ASCII
/// whitespace is stripped before decoding.
pub fn decode_bytes(encoded: &str) -> Result<Vec<u8>> {
    let compact: String = encoded.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    STANDARD.decode(compact.as_bytes()).or_raise(|| ErrorKind::InvalidEncoding)
}

/// Decode transfer-encoded text content.
pub fn decode(encoded: &str) -> Result<String> {
    let bytes = decode_bytes(encoded)?;
    String::from_utf8(bytes).or_raise(|| ErrorKind::InvalidText)
}
