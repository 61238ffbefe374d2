//! Decode raw signed-distance brick payloads.
//!
//! This crate provides pure synchronous decoding functions for turning the
//! byte ranges of a brick blob into dense `f32` samples. All functions are
//! designed to be called from any threading context - the library user
//! controls parallelism.
//!
//! # Design principles
//!
//! - **Synchronous**: No async, no threading primitives
//! - **No I/O**: Callers hand in byte slices they have already read
//! - **Bit-exact**: binary16 samples widen to binary32 without rounding

mod checksum;
mod error;
mod half;
mod samples;

pub use checksum::{crc32, format_crc32_hex, parse_crc32_hex};
pub use error::{DecodeError, DecodeResult};
pub use half::{f16_bits_to_f32, f32_to_f16_bits};
pub use samples::{Dtype, decode_samples, encode_samples};
