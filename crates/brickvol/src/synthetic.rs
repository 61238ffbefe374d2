//! Synthetic debug volumes.
//!
//! Generates an analytic signed-distance field on a cubic grid together with
//! a manifest describing it, so the pipeline can be exercised without any
//! external producer.

use std::fmt;
use std::str::FromStr;

use brickvol_decode::{Dtype, crc32, encode_samples, format_crc32_hex};
use glam::{DVec3, IVec3};

use crate::error::{Error, Result};
use crate::index::{BrickIndex, BrickIndexEntry, Encoding, IndexHeader, SUPPORTED_INDEX_VERSION};
use crate::manifest::{AxisOrder, Manifest, SUPPORTED_VERSION};
use crate::payload::{DecodedBrick, linear_index};

/// Brick edge length of generated volumes.
pub const BRICK_SIZE: i32 = 64;
/// Narrow-band half width of generated volumes, in voxels.
pub const HALF_WIDTH_VOXELS: i32 = 3;
/// Background distance of generated volumes, in millimetres.
pub const BACKGROUND_MM: f32 = 1000.0;

/// Analytic shape to sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Shape {
    /// Sphere of radius `0.4 * extent`.
    Sphere,
    /// Axis-aligned cube of half-extent `0.3 * extent`.
    Box,
}

impl Shape {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sphere => "sphere",
            Self::Box => "box",
        }
    }

    /// Signed distance from `point` to this shape centered in a cube of
    /// edge `extent`. Negative inside.
    #[must_use]
    pub fn signed_distance(self, point: DVec3, extent: f64) -> f64 {
        let p = point - DVec3::splat(extent * 0.5);
        match self {
            Self::Sphere => p.length() - extent * 0.4,
            Self::Box => {
                let d = p.abs() - DVec3::splat(extent * 0.3);
                let outside = d.max(DVec3::ZERO).length();
                let inside = d.max_element().min(0.0);
                outside + inside
            }
        }
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Shape {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "sphere" => Ok(Self::Sphere),
            "box" => Ok(Self::Box),
            other => Err(Error::Synthetic {
                detail: format!("unknown debug shape: {other:?} (expected \"sphere\" or \"box\")"),
            }),
        }
    }
}

/// A generated volume: its manifest plus every brick that is not entirely
/// background.
#[derive(Debug, Clone)]
pub struct SyntheticVolume {
    pub shape: Shape,
    pub manifest: Manifest,
    pub bricks: Vec<DecodedBrick>,
}

/// A synthetic volume packed the way an external producer would write it.
#[derive(Debug, Clone)]
pub struct EncodedVolume {
    pub manifest: Manifest,
    pub index: BrickIndex,
    pub blob: Vec<u8>,
}

/// Sample `shape` on a `dims^3` grid of `voxel_size` millimetre voxels.
///
/// # Errors
///
/// Returns [`Error::Synthetic`] if `dims` or `voxel_size` is not positive.
pub fn generate(shape: Shape, dims: i32, voxel_size: f64) -> Result<SyntheticVolume> {
    if dims <= 0 {
        return Err(Error::Synthetic {
            detail: format!("dims must be > 0, got: {dims}"),
        });
    }
    if !(voxel_size.is_finite() && voxel_size > 0.0) {
        return Err(Error::Synthetic {
            detail: format!("voxel_size must be > 0, got: {voxel_size}"),
        });
    }

    let extent = f64::from(dims) * voxel_size;
    let manifest = Manifest {
        version: SUPPORTED_VERSION,
        aabb_min: [0.0; 3],
        aabb_size: [extent; 3],
        voxel_size,
        dims: [dims; 3],
        iso: 0.0,
        adaptivity: 0.0,
        half_width_voxels: HALF_WIDTH_VOXELS,
        brick_size: BRICK_SIZE,
        dtype: Dtype::F32,
        background_value_mm: BACKGROUND_MM,
        ..Manifest::default()
    };

    let per_axis = manifest.bricks_per_axis()[0];
    tracing::info!(
        %shape,
        dims,
        voxel_size,
        bricks_per_axis = per_axis,
        "generating synthetic volume"
    );

    let origin = DVec3::from_array(manifest.aabb_min);
    let mut bricks = Vec::new();
    for bz in 0..per_axis {
        for by in 0..per_axis {
            for bx in 0..per_axis {
                let coord = IVec3::new(bx, by, bz);
                let brick = sample_brick(shape, coord, origin, voxel_size, extent);
                #[allow(clippy::float_cmp)]
                let all_background = brick.values.iter().all(|&v| v == BACKGROUND_MM);
                if !all_background {
                    bricks.push(brick);
                }
            }
        }
    }

    tracing::debug!(kept = bricks.len(), "synthetic bricks sampled");
    Ok(SyntheticVolume {
        shape,
        manifest,
        bricks,
    })
}

/// Sample one dense brick at voxel centers, clamped to the background.
fn sample_brick(shape: Shape, coord: IVec3, origin: DVec3, voxel_size: f64, extent: f64) -> DecodedBrick {
    let background = f64::from(BACKGROUND_MM);
    let mut values = vec![0.0; (BRICK_SIZE * BRICK_SIZE * BRICK_SIZE) as usize];
    let base = coord * BRICK_SIZE;
    for lz in 0..BRICK_SIZE {
        for ly in 0..BRICK_SIZE {
            for lx in 0..BRICK_SIZE {
                let local = IVec3::new(lx, ly, lz);
                let center = origin + ((base + local).as_dvec3() + 0.5) * voxel_size;
                let distance = shape
                    .signed_distance(center, extent)
                    .clamp(-background, background);
                #[allow(clippy::cast_possible_truncation)]
                let sample = distance as f32;
                values[linear_index(local, BRICK_SIZE)] = sample;
            }
        }
    }
    DecodedBrick { coord, values }
}

impl SyntheticVolume {
    /// Pack the bricks into a blob and a checksummed index.
    ///
    /// The returned manifest is this volume's, with its dtype set to `dtype`.
    #[must_use]
    pub fn encode(&self, dtype: Dtype) -> EncodedVolume {
        let manifest = Manifest {
            dtype,
            ..self.manifest.clone()
        };

        let mut blob = Vec::new();
        let mut entries = Vec::with_capacity(self.bricks.len());
        for brick in &self.bricks {
            let payload = encode_samples(&brick.values, dtype);
            entries.push(BrickIndexEntry {
                coord: brick.coord,
                offset_bytes: blob.len() as u64,
                payload_bytes: payload.len() as u64,
                encoding: Encoding::Raw,
                crc32: Some(format_crc32_hex(crc32(&payload))),
            });
            blob.extend_from_slice(&payload);
        }

        let index = BrickIndex {
            header: IndexHeader {
                version: Some(SUPPORTED_INDEX_VERSION),
                brick_size: Some(manifest.brick_size),
                dtype: Some(dtype),
                axis_order: Some(AxisOrder::XFastest),
                dims: Some(manifest.dims),
            },
            bricks: entries,
        };

        EncodedVolume {
            manifest,
            index,
            blob,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_parse() {
        assert_eq!("sphere".parse::<Shape>().unwrap(), Shape::Sphere);
        assert_eq!("box".parse::<Shape>().unwrap(), Shape::Box);
        assert!(matches!(
            "torus".parse::<Shape>(),
            Err(Error::Synthetic { .. })
        ));
        assert_eq!(Shape::Box.to_string(), "box");
    }

    #[test]
    fn test_signed_distance() {
        let extent = 10.0;
        let center = DVec3::splat(5.0);
        assert!((Shape::Sphere.signed_distance(center, extent) + 4.0).abs() < 1e-12);
        assert!((Shape::Box.signed_distance(center, extent) + 3.0).abs() < 1e-12);

        // On the surface along +X.
        let surface = center + DVec3::new(4.0, 0.0, 0.0);
        assert!(Shape::Sphere.signed_distance(surface, extent).abs() < 1e-12);
        let face = center + DVec3::new(3.0, 0.0, 0.0);
        assert!(Shape::Box.signed_distance(face, extent).abs() < 1e-12);

        // Outside a box corner the distance is Euclidean.
        let corner = center + DVec3::splat(4.0);
        let expected = (3.0f64).sqrt();
        assert!((Shape::Box.signed_distance(corner, extent) - expected).abs() < 1e-12);
    }

    #[test]
    fn test_generate_rejects_bad_geometry() {
        assert!(matches!(generate(Shape::Sphere, 0, 1.0), Err(Error::Synthetic { .. })));
        assert!(matches!(generate(Shape::Sphere, 32, 0.0), Err(Error::Synthetic { .. })));
        assert!(matches!(
            generate(Shape::Sphere, 32, f64::NAN),
            Err(Error::Synthetic { .. })
        ));
    }

    #[test]
    fn test_generated_manifest_is_valid() {
        let volume = generate(Shape::Sphere, 32, 0.5).unwrap();
        let result = crate::manifest::validate(&volume.manifest.to_document());
        assert!(result.is_ok(), "{:?}", result.errors);
        assert_eq!(volume.manifest.aabb_size, [16.0; 3]);
        assert_eq!(volume.manifest.bricks_per_axis(), [1, 1, 1]);
    }

    #[test]
    fn test_generated_sphere_samples() {
        let volume = generate(Shape::Sphere, 32, 1.0).unwrap();
        assert_eq!(volume.bricks.len(), 1);
        let brick = &volume.bricks[0];
        assert_eq!(brick.values.len(), 64 * 64 * 64);

        // Voxel (16,16,16) has its center at 16.5, 0.5*sqrt(3) from the
        // sphere center at 16, inside a radius of 12.8.
        let near_center = brick.values[linear_index(IVec3::splat(16), 64)];
        let expected = (0.75f64).sqrt() - 12.8;
        assert!((f64::from(near_center) - expected).abs() < 1e-4);

        // Far corner of the dense brick lies outside the grid, but is still
        // below the background clamp.
        let corner = brick.values[linear_index(IVec3::splat(63), 64)];
        assert!(corner > 0.0 && corner < BACKGROUND_MM);
    }

    #[test]
    fn test_all_background_bricks_are_dropped() {
        // With 40mm voxels every center of the far corner brick is more than
        // the 1000mm background away from the box.
        let volume = generate(Shape::Box, 130, 40.0).unwrap();
        assert_eq!(volume.manifest.bricks_per_axis(), [3, 3, 3]);
        assert!(volume.bricks.len() < 27);
        assert!(volume.bricks.iter().all(|b| b.coord != IVec3::splat(2)));
    }

    #[test]
    fn test_encode_produces_checksummed_index() {
        let volume = generate(Shape::Box, 64, 1.0).unwrap();
        let encoded = volume.encode(Dtype::F16);
        assert_eq!(encoded.manifest.dtype, Dtype::F16);
        assert_eq!(encoded.index.bricks.len(), volume.bricks.len());

        let entry = &encoded.index.bricks[0];
        assert_eq!(entry.payload_bytes, 64 * 64 * 64 * 2);
        let payload = &encoded.blob[..entry.payload_bytes as usize];
        assert_eq!(entry.crc32.as_deref(), Some(format_crc32_hex(crc32(payload)).as_str()));
    }
}
