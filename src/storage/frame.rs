//! Versioned, digest-protected framing of a serialised section.

use serde::Serialize;
use serde::de::DeserializeOwned;

use super::layout::{DIGEST_LEN, ERASED, FRAME_MAX, HEADER_LEN, LAYOUT_VERSION, PAYLOAD_MAX};
use crate::error::LayoutError;

fn digest(bytes: &[u8]) -> [u8; DIGEST_LEN] {
    let full = hmac_sha256::Hash::hash(bytes);
    let mut out = [0u8; DIGEST_LEN];
    out.copy_from_slice(&full[..DIGEST_LEN]);
    out
}

/// Serialise `value` into `buf` as a complete frame. Returns the frame length.
pub fn encode<T: Serialize>(value: &T, buf: &mut [u8]) -> Result<usize, LayoutError> {
    let cap = buf.len().min(FRAME_MAX);
    if cap < HEADER_LEN + DIGEST_LEN {
        return Err(LayoutError::Oversized);
    }
    let payload_cap = (cap - HEADER_LEN - DIGEST_LEN).min(PAYLOAD_MAX);

    let len = postcard::to_slice(value, &mut buf[HEADER_LEN..HEADER_LEN + payload_cap])
        .map_err(|e| match e {
            postcard::Error::SerializeBufferFull => LayoutError::Oversized,
            _ => LayoutError::Encode,
        })?
        .len();

    buf[0] = LAYOUT_VERSION;
    buf[1..HEADER_LEN].copy_from_slice(&(len as u16).to_le_bytes());

    let end = HEADER_LEN + len;
    let d = digest(&buf[..end]);
    buf[end..end + DIGEST_LEN].copy_from_slice(&d);
    Ok(end + DIGEST_LEN)
}

/// Parse the header and return the total frame length it declares.
pub fn frame_len(header: &[u8; HEADER_LEN]) -> Result<usize, LayoutError> {
    if header.iter().all(|b| *b == ERASED) {
        return Err(LayoutError::Erased);
    }
    if header[0] != LAYOUT_VERSION {
        return Err(LayoutError::VersionMismatch { found: header[0] });
    }
    let len = u16::from_le_bytes([header[1], header[2]]) as usize;
    if len > PAYLOAD_MAX {
        return Err(LayoutError::Oversized);
    }
    Ok(HEADER_LEN + len + DIGEST_LEN)
}

/// Validate and deserialise a frame. Trailing bytes after the frame are
/// ignored.
pub fn decode<T: DeserializeOwned>(frame: &[u8]) -> Result<T, LayoutError> {
    let header: &[u8; HEADER_LEN] = frame
        .get(..HEADER_LEN)
        .and_then(|h| h.try_into().ok())
        .ok_or(LayoutError::Decode)?;
    let total = frame_len(header)?;
    let frame = frame.get(..total).ok_or(LayoutError::Decode)?;

    let (body, stored) = frame.split_at(total - DIGEST_LEN);
    if digest(body).as_slice() != stored {
        return Err(LayoutError::DigestMismatch);
    }
    postcard::from_bytes(&body[HEADER_LEN..]).map_err(|_| LayoutError::Decode)
}
