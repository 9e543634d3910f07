//! Length-prefixed frame codec.
//!
//! Wire layout:
//!
//! ```text
//! +----------------------+------------------------+
//! | header (8B, ASCII)   | payload (header bytes) |
//! | "42      "           |                        |
//! +----------------------+------------------------+
//! ```
//!
//! The header is the payload length in decimal, left-aligned and padded on
//! the right with spaces. There is no magic number and no version byte.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{PairStreamError, Result};

/// Width of the length header in bytes.
pub const HEADER_LEN: usize = 8;

/// Largest payload whose length fits in eight decimal digits.
pub const MAX_PAYLOAD_LEN: usize = 99_999_999;

/// Encode `len` as an 8-byte, space-padded decimal header.
pub fn encode_header(len: usize) -> Result<[u8; HEADER_LEN]> {
    if len > MAX_PAYLOAD_LEN {
        return Err(PairStreamError::FrameTooLarge {
            size: len,
            max: MAX_PAYLOAD_LEN,
        });
    }
    let digits = len.to_string();
    let mut header = [b' '; HEADER_LEN];
    header[..digits.len()].copy_from_slice(digits.as_bytes());
    Ok(header)
}

/// Parse an 8-byte header back into a payload length.
///
/// Surrounding ASCII whitespace is trimmed; what remains must be a
/// non-empty run of decimal digits.
pub fn parse_header(header: &[u8; HEADER_LEN]) -> Result<usize> {
    let text = header.trim_ascii();
    if text.is_empty() || !text.iter().all(u8::is_ascii_digit) {
        return Err(PairStreamError::MalformedHeader(
            String::from_utf8_lossy(header).into_owned(),
        ));
    }
    // At most eight digits, so this cannot overflow.
    let len = text
        .iter()
        .fold(0usize, |acc, d| acc * 10 + usize::from(d - b'0'));
    Ok(len)
}

/// Encode a complete frame (header followed by payload).
pub fn encode_frame(payload: &[u8]) -> Result<Bytes> {
    let header = encode_header(payload.len())?;
    let mut buf = BytesMut::with_capacity(HEADER_LEN + payload.len());
    buf.put_slice(&header);
    buf.put_slice(payload);
    Ok(buf.freeze())
}

/// Encode a complete frame into a pre-allocated `BytesMut`.
pub fn encode_frame_into(payload: &[u8], buf: &mut BytesMut) -> Result<()> {
    let header = encode_header(payload.len())?;
    buf.reserve(HEADER_LEN + payload.len());
    buf.put_slice(&header);
    buf.put_slice(payload);
    Ok(())
}

/// Decode one frame from the front of `data`.
///
/// Returns the payload and the total number of bytes consumed.
pub fn decode_frame(data: &[u8]) -> Result<(Bytes, usize)> {
    if data.len() < HEADER_LEN {
        return Err(PairStreamError::Truncated {
            expected: HEADER_LEN,
            actual: data.len(),
        });
    }
    let mut header = [0u8; HEADER_LEN];
    header.copy_from_slice(&data[..HEADER_LEN]);
    let len = parse_header(&header)?;

    let body = &data[HEADER_LEN..];
    if body.len() < len {
        return Err(PairStreamError::Truncated {
            expected: len,
            actual: body.len(),
        });
    }
    Ok((Bytes::copy_from_slice(&body[..len]), HEADER_LEN + len))
}
