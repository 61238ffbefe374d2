//! CRC32 integrity checks (ISO-3309 / zlib variant).
//!
//! Reflected polynomial `0xEDB88320`, register initialized to `0xFFFFFFFF`
//! and XORed with `0xFFFFFFFF` at the end. The arithmetic is done by
//! `crc32fast`; this module adds the checksum text format brick indices use.

use crate::error::{DecodeError, DecodeResult};

/// Compute the CRC32 of a byte slice in one call.
#[must_use]
pub fn crc32(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

/// Parse a stored checksum string.
///
/// Accepts one to eight hex digits in either case, with an optional `0x`
/// prefix. Anything else is rejected rather than treated as "no checksum".
pub fn parse_crc32_hex(text: &str) -> DecodeResult<u32> {
    let digits = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .unwrap_or(text);

    if digits.is_empty() || digits.len() > 8 || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(DecodeError::InvalidChecksum {
            text: text.to_string(),
        });
    }

    u32::from_str_radix(digits, 16).map_err(|_| DecodeError::InvalidChecksum {
        text: text.to_string(),
    })
}

/// Format a checksum the way brick indices store it: eight lowercase hex digits.
#[must_use]
pub fn format_crc32_hex(value: u32) -> String {
    format!("{value:08x}")
}
