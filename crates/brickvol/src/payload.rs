//! Brick payload decoding.
//!
//! Each index entry is decoded independently: a problem with one entry is
//! recorded and only that entry is skipped.

use std::collections::HashMap;
use std::path::Path;

use brickvol_decode::{crc32, decode_samples, format_crc32_hex, parse_crc32_hex};
use glam::IVec3;

use crate::index::{
    BrickIndex, BrickIndexEntry, BrickLayout, check_encoding, check_payload_size, duplicate_error,
};
use crate::manifest::Manifest;
use crate::source::{BrickSource, FileSource};
use crate::validation::{ErrorCode, StageResult, ValidationError};

/// Dense voxel data for one brick.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedBrick {
    /// Brick-space coordinate.
    pub coord: IVec3,
    /// `B^3` samples in x-fastest order, see [`linear_index`].
    pub values: Vec<f32>,
}

/// Position of a local voxel within a brick's sample array.
///
/// `local` must lie in `[0, brick_size)` on every axis.
#[must_use]
#[allow(clippy::cast_sign_loss)]
pub fn linear_index(local: IVec3, brick_size: i32) -> usize {
    let b = brick_size as usize;
    local.x as usize + b * (local.y as usize + b * local.z as usize)
}

/// Decode every entry of `index` from an in-memory blob.
pub fn decode(blob: &[u8], index: &BrickIndex, manifest: &Manifest) -> StageResult<Vec<DecodedBrick>> {
    decode_from(blob, index, manifest)
}

/// Decode every entry of `index` from any byte source.
pub fn decode_from<S: BrickSource + ?Sized>(
    source: &S,
    index: &BrickIndex,
    manifest: &Manifest,
) -> StageResult<Vec<DecodedBrick>> {
    let layout = index.layout(manifest);
    let decoded = plan(source.len(), index, layout)
        .into_iter()
        .map(|job| job.and_then(|(position, entry)| decode_entry(source, position, entry, layout)))
        .collect();
    finish(decoded)
}

/// Decode entries in parallel on the rayon pool.
///
/// Output is in entry order and identical to [`decode_from`].
#[cfg(feature = "rayon")]
pub fn decode_par<S: BrickSource + ?Sized>(
    source: &S,
    index: &BrickIndex,
    manifest: &Manifest,
) -> StageResult<Vec<DecodedBrick>> {
    use rayon::prelude::*;

    let layout = index.layout(manifest);
    let decoded = plan(source.len(), index, layout)
        .into_par_iter()
        .map(|job| job.and_then(|(position, entry)| decode_entry(source, position, entry, layout)))
        .collect();
    finish(decoded)
}

/// Open a blob file and decode every entry of `index` from it.
///
/// Decodes on the rayon pool when the `rayon` feature is enabled.
pub fn load(
    path: impl AsRef<Path>,
    index: &BrickIndex,
    manifest: &Manifest,
) -> StageResult<Vec<DecodedBrick>> {
    let path = path.as_ref();
    match FileSource::open(path) {
        #[cfg(feature = "rayon")]
        Ok(source) => decode_par(&source, index, manifest),
        #[cfg(not(feature = "rayon"))]
        Ok(source) => decode_from(&source, index, manifest),
        Err(e) => StageResult::io_failure(ValidationError::new(
            ErrorCode::BlobRead,
            e.to_string(),
            path.display().to_string(),
        )),
    }
}

type Job<'a> = Result<(usize, &'a BrickIndexEntry), ValidationError>;

/// Run the checks that need no payload bytes, in entry order.
///
/// Only the first entry for each coordinate is decoded; later ones are
/// reported as duplicates.
fn plan(blob_len: u64, index: &BrickIndex, layout: BrickLayout) -> Vec<Job<'_>> {
    let mut seen: HashMap<IVec3, usize> = HashMap::with_capacity(index.bricks.len());
    index
        .bricks
        .iter()
        .enumerate()
        .map(|(position, entry)| {
            if let Some(&first) = seen.get(&entry.coord) {
                return Err(duplicate_error(position, entry.coord, first));
            }
            seen.insert(entry.coord, position);

            check_byte_range(position, entry, blob_len)?;
            if let Some(error) = check_encoding(position, entry) {
                return Err(error);
            }
            if let Some(error) = check_payload_size(position, entry, layout) {
                return Err(error);
            }
            Ok((position, entry))
        })
        .collect()
}

fn finish(decoded: Vec<Result<DecodedBrick, ValidationError>>) -> StageResult<Vec<DecodedBrick>> {
    let mut bricks = Vec::with_capacity(decoded.len());
    let mut errors = Vec::new();
    for result in decoded {
        match result {
            Ok(brick) => bricks.push(brick),
            Err(error) => errors.push(error),
        }
    }
    tracing::debug!(
        decoded = bricks.len(),
        skipped = errors.len(),
        "brick payloads decoded"
    );
    StageResult::from_parts(bricks, errors)
}

fn check_byte_range(
    position: usize,
    entry: &BrickIndexEntry,
    blob_len: u64,
) -> Result<(), ValidationError> {
    match entry.offset_bytes.checked_add(entry.payload_bytes) {
        Some(end) if end <= blob_len => Ok(()),
        _ => Err(ValidationError::new(
            ErrorCode::OffsetOutOfRange,
            format!(
                "bricks[{position}] offset_bytes({}) + payload_bytes({}) exceeds blob size({blob_len})",
                entry.offset_bytes, entry.payload_bytes
            ),
            format!("bricks[{position}]"),
        )),
    }
}

fn decode_entry<S: BrickSource + ?Sized>(
    source: &S,
    position: usize,
    entry: &BrickIndexEntry,
    layout: BrickLayout,
) -> Result<DecodedBrick, ValidationError> {
    let field = || format!("bricks[{position}]");

    let len = usize::try_from(entry.payload_bytes).map_err(|_| {
        ValidationError::new(
            ErrorCode::PayloadSize,
            format!("bricks[{position}] payload of {} bytes is not addressable", entry.payload_bytes),
            field(),
        )
    })?;
    let mut raw = vec![0u8; len];
    source.read_at(entry.offset_bytes, &mut raw).map_err(|e| {
        ValidationError::new(
            ErrorCode::BlobRead,
            format!("bricks[{position}] read failed at offset {}: {e}", entry.offset_bytes),
            field(),
        )
    })?;

    if let Some(expected) = &entry.crc32 {
        verify_checksum(position, expected, &raw)?;
    }

    // The size check in `plan` guarantees `len` is exactly B^3 samples.
    let count = len / layout.dtype.size_bytes();
    let values = decode_samples(&raw, layout.dtype, count).map_err(|e| {
        ValidationError::new(ErrorCode::PayloadSize, format!("bricks[{position}] {e}"), field())
    })?;

    Ok(DecodedBrick {
        coord: entry.coord,
        values,
    })
}

fn verify_checksum(position: usize, expected: &str, raw: &[u8]) -> Result<(), ValidationError> {
    let field = format!("bricks[{position}].crc32");
    let stored = parse_crc32_hex(expected).map_err(|e| {
        ValidationError::new(ErrorCode::ChecksumMismatch, format!("bricks[{position}] {e}"), field.clone())
    })?;
    let computed = crc32(raw);
    if computed == stored {
        Ok(())
    } else {
        Err(ValidationError::new(
            ErrorCode::ChecksumMismatch,
            format!(
                "bricks[{position}] CRC32 mismatch: computed={} expected={expected}",
                format_crc32_hex(computed)
            ),
            field,
        ))
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use brickvol_decode::{Dtype, encode_samples};

    use super::*;
    use crate::index::Encoding;
    use crate::validation::Outcome;

    const B: i32 = 2;

    fn manifest(dtype: Dtype) -> Manifest {
        Manifest {
            dims: [4, 4, 4],
            brick_size: B,
            dtype,
            ..Manifest::default()
        }
    }

    fn brick_values(seed: f32) -> Vec<f32> {
        (0..8).map(|i| seed + i as f32 * 0.25).collect()
    }

    /// Pack bricks back to back and catalogue them.
    fn pack(bricks: &[(IVec3, Vec<f32>)], dtype: Dtype) -> (Vec<u8>, BrickIndex) {
        let mut blob = Vec::new();
        let mut index = BrickIndex::default();
        for (coord, values) in bricks {
            let payload = encode_samples(values, dtype);
            index.bricks.push(BrickIndexEntry {
                coord: *coord,
                offset_bytes: blob.len() as u64,
                payload_bytes: payload.len() as u64,
                encoding: Encoding::Raw,
                crc32: Some(format_crc32_hex(crc32(&payload))),
            });
            blob.extend_from_slice(&payload);
        }
        (blob, index)
    }

    fn codes(result: &StageResult<Vec<DecodedBrick>>) -> Vec<ErrorCode> {
        result.errors.iter().map(|e| e.code).collect()
    }

    #[test]
    fn test_linear_index_is_x_fastest() {
        assert_eq!(linear_index(IVec3::new(0, 0, 0), 4), 0);
        assert_eq!(linear_index(IVec3::new(1, 0, 0), 4), 1);
        assert_eq!(linear_index(IVec3::new(0, 1, 0), 4), 4);
        assert_eq!(linear_index(IVec3::new(0, 0, 1), 4), 16);
        assert_eq!(linear_index(IVec3::new(3, 3, 3), 4), 63);
    }

    #[test]
    fn test_decode_f32() {
        let bricks = vec![
            (IVec3::new(0, 0, 0), brick_values(1.0)),
            (IVec3::new(1, 0, 1), brick_values(-3.0)),
        ];
        let (blob, index) = pack(&bricks, Dtype::F32);
        let result = decode(&blob, &index, &manifest(Dtype::F32));
        assert!(result.is_ok(), "{:?}", result.errors);
        assert_eq!(result.data.len(), 2);
        assert_eq!(result.data[1].coord, IVec3::new(1, 0, 1));
        assert_eq!(result.data[1].values, bricks[1].1);
    }

    #[test]
    fn test_decode_f16() {
        let bricks = vec![(IVec3::ZERO, vec![0.5, -1.0, 2.0, 4.0, 0.25, 8.0, -16.0, 0.0])];
        let (blob, index) = pack(&bricks, Dtype::F16);
        assert_eq!(blob.len(), 16);
        let result = decode(&blob, &index, &manifest(Dtype::F16));
        assert!(result.is_ok(), "{:?}", result.errors);
        assert_eq!(result.data[0].values, bricks[0].1);
    }

    #[test]
    fn test_out_of_range_entry_is_skipped() {
        let bricks = vec![
            (IVec3::new(0, 0, 0), brick_values(1.0)),
            (IVec3::new(1, 0, 0), brick_values(2.0)),
        ];
        let (mut blob, index) = pack(&bricks, Dtype::F32);
        blob.truncate(blob.len() - 1);

        let result = decode(&blob, &index, &manifest(Dtype::F32));
        assert_eq!(result.outcome, Outcome::ValidationFailure);
        assert_eq!(codes(&result), vec![ErrorCode::OffsetOutOfRange]);
        assert_eq!(result.errors[0].field, "bricks[1]");
        assert_eq!(result.data.len(), 1);
        assert_eq!(result.data[0].coord, IVec3::ZERO);
    }

    #[test]
    fn test_overflowing_range() {
        let (blob, mut index) = pack(&[(IVec3::ZERO, brick_values(0.0))], Dtype::F32);
        index.bricks[0].offset_bytes = u64::MAX;
        let result = decode(&blob, &index, &manifest(Dtype::F32));
        assert_eq!(codes(&result), vec![ErrorCode::OffsetOutOfRange]);
        assert!(result.data.is_empty());
    }

    #[test]
    fn test_checksum_mismatch_skips_only_that_brick() {
        let bricks = vec![
            (IVec3::new(0, 0, 0), brick_values(1.0)),
            (IVec3::new(0, 1, 0), brick_values(2.0)),
        ];
        let (blob, mut index) = pack(&bricks, Dtype::F32);
        index.bricks[0].crc32 = Some("00000000".to_string());
        // Case-insensitive comparison.
        index.bricks[1].crc32 = index.bricks[1].crc32.as_ref().map(|c| c.to_uppercase());

        let result = decode(&blob, &index, &manifest(Dtype::F32));
        assert_eq!(codes(&result), vec![ErrorCode::ChecksumMismatch]);
        assert_eq!(result.errors[0].field, "bricks[0].crc32");
        assert_eq!(result.data.len(), 1);
        assert_eq!(result.data[0].coord, IVec3::new(0, 1, 0));
    }

    #[test]
    fn test_unparsable_checksum() {
        let (blob, mut index) = pack(&[(IVec3::ZERO, brick_values(0.0))], Dtype::F32);
        index.bricks[0].crc32 = Some("not-hex".to_string());
        let result = decode(&blob, &index, &manifest(Dtype::F32));
        assert_eq!(codes(&result), vec![ErrorCode::ChecksumMismatch]);
        assert!(result.data.is_empty());
    }

    #[test]
    fn test_missing_checksum_is_not_checked() {
        let (mut blob, mut index) = pack(&[(IVec3::ZERO, brick_values(0.0))], Dtype::F32);
        index.bricks[0].crc32 = None;
        blob[0] ^= 0xFF;
        assert!(decode(&blob, &index, &manifest(Dtype::F32)).is_ok());
    }

    #[test]
    fn test_duplicate_keeps_first() {
        let bricks = vec![
            (IVec3::new(1, 1, 1), brick_values(1.0)),
            (IVec3::new(1, 1, 1), brick_values(9.0)),
        ];
        let (blob, index) = pack(&bricks, Dtype::F32);
        let result = decode(&blob, &index, &manifest(Dtype::F32));
        assert_eq!(codes(&result), vec![ErrorCode::DuplicateBrick]);
        assert_eq!(result.data.len(), 1);
        assert_eq!(result.data[0].values, bricks[0].1);
    }

    #[test]
    fn test_wrong_payload_size_and_encoding() {
        let bricks = vec![
            (IVec3::new(0, 0, 0), brick_values(1.0)),
            (IVec3::new(1, 0, 0), brick_values(2.0)),
            (IVec3::new(0, 1, 0), brick_values(3.0)),
        ];
        let (blob, mut index) = pack(&bricks, Dtype::F32);
        index.bricks[0].payload_bytes -= 4;
        index.bricks[1].encoding = Encoding::Unsupported("zstd".to_string());

        let result = decode(&blob, &index, &manifest(Dtype::F32));
        assert_eq!(
            codes(&result),
            vec![ErrorCode::PayloadSize, ErrorCode::IndexInconsistency]
        );
        assert_eq!(result.data.len(), 1);
        assert_eq!(result.data[0].coord, IVec3::new(0, 1, 0));
    }

    struct FailingSource;

    impl BrickSource for FailingSource {
        fn len(&self) -> u64 {
            1 << 20
        }

        fn read_at(&self, _offset: u64, _buf: &mut [u8]) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::UnexpectedEof, "truncated"))
        }
    }

    #[test]
    fn test_short_read_is_per_entry() {
        let (_, index) = pack(
            &[
                (IVec3::new(0, 0, 0), brick_values(0.0)),
                (IVec3::new(1, 0, 0), brick_values(0.0)),
            ],
            Dtype::F32,
        );
        let result = decode_from(&FailingSource, &index, &manifest(Dtype::F32));
        assert_eq!(result.outcome, Outcome::ValidationFailure);
        assert_eq!(codes(&result), vec![ErrorCode::BlobRead; 2]);
    }

    #[test]
    fn test_missing_blob_is_io_failure() {
        let index = BrickIndex::default();
        let result = load("/nonexistent/brickvol/bricks.bin", &index, &manifest(Dtype::F32));
        assert_eq!(result.outcome, Outcome::IoFailure);
        assert_eq!(codes(&result), vec![ErrorCode::BlobRead]);
    }

    #[test]
    fn test_header_layout_wins() {
        // Payloads encoded as f16 while the manifest says f32.
        let (blob, mut index) = pack(&[(IVec3::ZERO, brick_values(1.0))], Dtype::F16);
        index.header.dtype = Some(Dtype::F16);
        let result = decode(&blob, &index, &manifest(Dtype::F32));
        assert!(result.is_ok(), "{:?}", result.errors);
        assert_eq!(result.data[0].values, brick_values(1.0));
    }

    #[cfg(feature = "rayon")]
    #[test]
    fn test_parallel_matches_sequential() {
        let bricks: Vec<_> = (0..8)
            .map(|i| {
                let coord = IVec3::new(i & 1, (i >> 1) & 1, (i >> 2) & 1);
                (coord, brick_values(i as f32))
            })
            .collect();
        let (blob, mut index) = pack(&bricks, Dtype::F32);
        index.bricks[3].crc32 = Some("1".to_string());
        index.bricks[6].offset_bytes = blob.len() as u64;

        let manifest = manifest(Dtype::F32);
        let sequential = decode(&blob, &index, &manifest);
        let parallel = decode_par(blob.as_slice(), &index, &manifest);
        assert_eq!(parallel.data, sequential.data);
        assert_eq!(parallel.errors, sequential.errors);
        assert_eq!(parallel.data.len(), 6);
    }
}
