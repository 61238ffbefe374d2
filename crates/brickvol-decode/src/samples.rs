//! Raw payload to dense sample conversion.

use std::fmt;
use std::str::FromStr;

use crate::error::{DecodeError, DecodeResult};
use crate::half::{f16_bits_to_f32, f32_to_f16_bits};

/// Per-voxel sample encoding of a brick payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Dtype {
    /// IEEE-754 binary16, little-endian.
    F16,
    /// IEEE-754 binary32, little-endian.
    #[default]
    F32,
}

impl Dtype {
    /// Size of one sample in bytes.
    #[must_use]
    pub const fn size_bytes(self) -> usize {
        match self {
            Self::F16 => 2,
            Self::F32 => 4,
        }
    }

    /// The string used for this dtype in manifests and indices.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::F16 => "f16",
            Self::F32 => "f32",
        }
    }
}

impl fmt::Display for Dtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dtype {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "f16" => Ok(Self::F16),
            "f32" => Ok(Self::F32),
            other => Err(DecodeError::InvalidFormat {
                context: "dtype",
                detail: format!("expected \"f16\" or \"f32\", got {other:?}"),
            }),
        }
    }
}

/// Convert a raw payload into `count` samples.
///
/// Samples keep their payload order, so a brick written x-fastest decodes
/// x-fastest. The payload must hold exactly `count` samples.
///
/// # Errors
///
/// Returns an error if the payload is shorter or longer than
/// `count * dtype.size_bytes()`.
pub fn decode_samples(raw: &[u8], dtype: Dtype, count: usize) -> DecodeResult<Vec<f32>> {
    let expected = count * dtype.size_bytes();
    if raw.len() < expected {
        return Err(DecodeError::BufferTooSmall {
            expected,
            actual: raw.len(),
        });
    }
    if raw.len() != expected {
        return Err(DecodeError::InvalidFormat {
            context: "samples",
            detail: format!(
                "expected {expected} bytes for {count} {dtype} samples, got {}",
                raw.len()
            ),
        });
    }

    let values = match dtype {
        Dtype::F16 => raw
            .chunks_exact(2)
            .map(|pair| f16_bits_to_f32(u16::from_le_bytes([pair[0], pair[1]])))
            .collect(),
        Dtype::F32 => raw
            .chunks_exact(4)
            .map(|quad| f32::from_le_bytes([quad[0], quad[1], quad[2], quad[3]]))
            .collect(),
    };

    Ok(values)
}

/// Pack samples into a little-endian payload.
///
/// `f16` payloads round each value to the nearest binary16.
#[must_use]
pub fn encode_samples(values: &[f32], dtype: Dtype) -> Vec<u8> {
    let mut out = Vec::with_capacity(values.len() * dtype.size_bytes());
    match dtype {
        Dtype::F16 => {
            for &value in values {
                out.extend_from_slice(&f32_to_f16_bits(value).to_le_bytes());
            }
        }
        Dtype::F32 => {
            for &value in values {
                out.extend_from_slice(&value.to_le_bytes());
            }
        }
    }
    out
}
