use bytes::{BufMut, BytesMut};

use crate::error::{FrameError, Result};

/// Length prefix: 4 bytes, little-endian.
pub const HEADER_SIZE: usize = 4;

/// Default maximum payload size: 16 MiB.
pub const DEFAULT_MAX_PAYLOAD: usize = 16 * 1024 * 1024;

/// Append one frame to `dst`.
///
/// Wire format:
/// ```text
/// ┌──────────────┬──────────────────┐
/// │ Length (4B)  │ Payload          │
/// │ u32 LE       │ (Length bytes)   │
/// └──────────────┴──────────────────┘
/// ```
pub fn encode_frame(payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    let len = u32::try_from(payload.len()).map_err(|_| FrameError::PayloadTooLarge {
        size: payload.len(),
        max: u32::MAX as usize,
    })?;
    dst.reserve(HEADER_SIZE + payload.len());
    dst.put_u32_le(len);
    dst.put_slice(payload);
    Ok(())
}

/// Peek at the first frame in `src`.
///
/// On success returns the payload and the number of bytes the whole frame
/// occupies; the caller advances its buffer by that much. Nothing is consumed
/// on [`FrameError::Incomplete`], so bytes of a following frame are never
/// touched while the current one is still arriving.
pub fn decode_frame(src: &[u8], max_payload: usize) -> Result<(&[u8], usize)> {
    if src.len() < HEADER_SIZE {
        return Err(FrameError::Incomplete {
            needed: HEADER_SIZE - src.len(),
        });
    }

    let mut len_bytes = [0u8; HEADER_SIZE];
    len_bytes.copy_from_slice(&src[..HEADER_SIZE]);
    let payload_len = u32::from_le_bytes(len_bytes) as usize;

    if payload_len > max_payload {
        return Err(FrameError::PayloadTooLarge {
            size: payload_len,
            max: max_payload,
        });
    }

    let total = HEADER_SIZE + payload_len;
    if src.len() < total {
        return Err(FrameError::Incomplete {
            needed: total - src.len(),
        });
    }

    Ok((&src[HEADER_SIZE..total], total))
}

/// Configuration for blocking frame I/O.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum payload size in bytes. Default: 16 MiB.
    pub max_payload_size: usize,
    /// Read timeout for blocking operations.
    pub read_timeout: Option<std::time::Duration>,
    /// Write timeout for blocking operations.
    pub write_timeout: Option<std::time::Duration>,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
            read_timeout: None,
            write_timeout: None,
        }
    }
}
