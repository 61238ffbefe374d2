//! Sparse volume storage and assembly from decoded bricks.
//!
//! Voxels are stored in 8x8x8 leaves keyed by `ijk >> 3`. A leaf exists only
//! once one of its voxels has been set; every other coordinate reads back as
//! the background value.

use std::collections::HashMap;

use glam::{DAffine3, DVec3, IVec3};

use crate::manifest::Manifest;
use crate::payload::DecodedBrick;

const LEAF_LOG2: i32 = 3;
const LEAF_DIM: i32 = 1 << LEAF_LOG2;
const LEAF_VOXELS: usize = (LEAF_DIM * LEAF_DIM * LEAF_DIM) as usize;

/// Index-space to world-space mapping: uniform scale, then translate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoxelTransform {
    /// Edge length of one voxel, in millimetres.
    pub voxel_size: f64,
    /// World position of index `(0, 0, 0)`.
    pub origin: DVec3,
}

impl VoxelTransform {
    #[must_use]
    pub fn new(voxel_size: f64, origin: DVec3) -> Self {
        Self { voxel_size, origin }
    }

    /// The transform as an affine matrix.
    #[must_use]
    pub fn to_affine(&self) -> DAffine3 {
        DAffine3::from_translation(self.origin) * DAffine3::from_scale(DVec3::splat(self.voxel_size))
    }

    #[must_use]
    pub fn index_to_world(&self, ijk: IVec3) -> DVec3 {
        self.origin + ijk.as_dvec3() * self.voxel_size
    }

    /// The voxel containing a world position (floor).
    #[must_use]
    pub fn world_to_index(&self, position: DVec3) -> IVec3 {
        ((position - self.origin) / self.voxel_size).floor().as_ivec3()
    }
}

#[derive(Debug, Clone)]
struct Leaf {
    values: Box<[f32; LEAF_VOXELS]>,
    active: [u64; LEAF_VOXELS / 64],
}

impl Leaf {
    fn new(background: f32) -> Self {
        Self {
            values: Box::new([background; LEAF_VOXELS]),
            active: [0; LEAF_VOXELS / 64],
        }
    }

    fn is_active(&self, slot: usize) -> bool {
        self.active[slot / 64] & (1 << (slot % 64)) != 0
    }

    /// Store a value; returns true if the slot was inactive before.
    fn set(&mut self, slot: usize, value: f32) -> bool {
        let newly = !self.is_active(slot);
        self.active[slot / 64] |= 1 << (slot % 64);
        self.values[slot] = value;
        newly
    }

    fn active_slots(&self) -> impl Iterator<Item = usize> + '_ {
        (0..LEAF_VOXELS).filter(|&slot| self.is_active(slot))
    }
}

fn leaf_key(ijk: IVec3) -> IVec3 {
    ijk >> LEAF_LOG2
}

#[allow(clippy::cast_sign_loss)]
fn leaf_slot(ijk: IVec3) -> usize {
    let local = ijk & (LEAF_DIM - 1);
    (local.x + LEAF_DIM * (local.y + LEAF_DIM * local.z)) as usize
}

#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
fn slot_offset(slot: usize) -> IVec3 {
    let slot = slot as i32;
    IVec3::new(
        slot % LEAF_DIM,
        (slot / LEAF_DIM) % LEAF_DIM,
        slot / (LEAF_DIM * LEAF_DIM),
    )
}

/// A background-valued volume with explicitly stored voxels.
#[derive(Debug, Clone)]
pub struct SparseVolume {
    background: f32,
    transform: VoxelTransform,
    leaves: HashMap<IVec3, Leaf>,
    active_voxels: usize,
}

impl SparseVolume {
    /// An empty volume: every coordinate reads `background`.
    #[must_use]
    pub fn new(background: f32, transform: VoxelTransform) -> Self {
        Self {
            background,
            transform,
            leaves: HashMap::new(),
            active_voxels: 0,
        }
    }

    #[must_use]
    pub fn background(&self) -> f32 {
        self.background
    }

    #[must_use]
    pub fn transform(&self) -> &VoxelTransform {
        &self.transform
    }

    /// The stored value at `ijk`, or the background.
    #[must_use]
    pub fn get(&self, ijk: IVec3) -> f32 {
        self.leaves
            .get(&leaf_key(ijk))
            .map_or(self.background, |leaf| leaf.values[leaf_slot(ijk)])
    }

    /// Whether a value has been explicitly stored at `ijk`.
    #[must_use]
    pub fn is_active(&self, ijk: IVec3) -> bool {
        self.leaves
            .get(&leaf_key(ijk))
            .is_some_and(|leaf| leaf.is_active(leaf_slot(ijk)))
    }

    /// Store a value at `ijk`, materializing the voxel.
    pub fn set(&mut self, ijk: IVec3, value: f32) {
        let background = self.background;
        let leaf = self
            .leaves
            .entry(leaf_key(ijk))
            .or_insert_with(|| Leaf::new(background));
        if leaf.set(leaf_slot(ijk), value) {
            self.active_voxels += 1;
        }
    }

    #[must_use]
    pub fn active_voxel_count(&self) -> usize {
        self.active_voxels
    }

    /// Number of allocated 8x8x8 leaves.
    #[must_use]
    pub fn leaf_count(&self) -> usize {
        self.leaves.len()
    }

    /// Stored voxels and their values, in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = (IVec3, f32)> + '_ {
        self.leaves.iter().flat_map(|(key, leaf)| {
            let base = *key << LEAF_LOG2;
            leaf.active_slots()
                .map(move |slot| (base + slot_offset(slot), leaf.values[slot]))
        })
    }

    #[must_use]
    pub fn index_to_world(&self, ijk: IVec3) -> DVec3 {
        self.transform.index_to_world(ijk)
    }

    #[must_use]
    pub fn world_to_index(&self, position: DVec3) -> IVec3 {
        self.transform.world_to_index(position)
    }

    /// Inclusive index-space bounds of the stored voxels, if any.
    #[must_use]
    pub fn bounding_box(&self) -> Option<(IVec3, IVec3)> {
        self.iter().map(|(ijk, _)| ijk).fold(None, |bounds, ijk| {
            Some(match bounds {
                None => (ijk, ijk),
                Some((min, max)) => (min.min(ijk), max.max(ijk)),
            })
        })
    }
}

/// Counters reported by [`assemble`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AssemblyStats {
    /// Bricks inserted.
    pub bricks: usize,
    /// Voxels materialized.
    pub set_voxels: usize,
    /// Voxels elided because they held the background value exactly.
    pub skipped_background: usize,
}

/// Build a sparse volume from decoded bricks.
///
/// A voxel is stored only if its value differs from the manifest background
/// under exact float comparison. Coordinates of bricks not in `bricks` read
/// back as background.
#[must_use]
#[allow(clippy::float_cmp)]
pub fn assemble(manifest: &Manifest, bricks: &[DecodedBrick]) -> (SparseVolume, AssemblyStats) {
    let transform = VoxelTransform::new(manifest.voxel_size, DVec3::from_array(manifest.aabb_min));
    let background = manifest.background_value_mm;
    let mut volume = SparseVolume::new(background, transform);
    let mut stats = AssemblyStats::default();

    let b = manifest.brick_size;
    if b <= 0 {
        return (volume, stats);
    }

    for brick in bricks {
        let origin = brick.coord * b;
        for (i, &value) in (0..b * b * b).zip(&brick.values) {
            if value == background {
                stats.skipped_background += 1;
                continue;
            }
            let local = IVec3::new(i % b, (i / b) % b, i / (b * b));
            volume.set(origin + local, value);
            stats.set_voxels += 1;
        }
        stats.bricks += 1;
    }

    tracing::info!(
        bricks = stats.bricks,
        set_voxels = stats.set_voxels,
        skipped_background = stats.skipped_background,
        "sparse volume assembled"
    );
    (volume, stats)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::payload::linear_index;

    const B: i32 = 4;
    const BACKGROUND: f32 = 3.0;

    fn manifest() -> Manifest {
        Manifest {
            aabb_min: [-10.0, 0.0, 5.0],
            voxel_size: 0.5,
            dims: [8, 8, 8],
            brick_size: B,
            background_value_mm: BACKGROUND,
            ..Manifest::default()
        }
    }

    fn background_brick(coord: IVec3) -> DecodedBrick {
        DecodedBrick {
            coord,
            values: vec![BACKGROUND; (B * B * B) as usize],
        }
    }

    #[test]
    fn test_set_and_get() {
        let mut volume = SparseVolume::new(1.0, VoxelTransform::new(1.0, DVec3::ZERO));
        assert_eq!(volume.get(IVec3::new(5, 5, 5)), 1.0);
        assert!(!volume.is_active(IVec3::new(5, 5, 5)));

        volume.set(IVec3::new(5, 5, 5), -0.5);
        volume.set(IVec3::new(-1, -9, 0), 0.25);
        volume.set(IVec3::new(5, 5, 5), -0.75);

        assert_eq!(volume.get(IVec3::new(5, 5, 5)), -0.75);
        assert_eq!(volume.get(IVec3::new(-1, -9, 0)), 0.25);
        assert_eq!(volume.get(IVec3::new(4, 5, 5)), 1.0);
        assert!(!volume.is_active(IVec3::new(4, 5, 5)));
        assert_eq!(volume.active_voxel_count(), 2);
        assert_eq!(volume.leaf_count(), 2);

        let mut stored: Vec<_> = volume.iter().collect();
        stored.sort_by_key(|(ijk, _)| ijk.to_array());
        assert_eq!(
            stored,
            vec![(IVec3::new(-1, -9, 0), 0.25), (IVec3::new(5, 5, 5), -0.75)]
        );
        assert_eq!(
            volume.bounding_box(),
            Some((IVec3::new(-1, -9, 0), IVec3::new(5, 5, 5)))
        );
    }

    #[test]
    fn test_empty_volume() {
        let volume = SparseVolume::new(2.0, VoxelTransform::new(1.0, DVec3::ZERO));
        assert_eq!(volume.active_voxel_count(), 0);
        assert_eq!(volume.iter().count(), 0);
        assert_eq!(volume.bounding_box(), None);
    }

    #[test]
    fn test_transform() {
        let transform = VoxelTransform::new(0.5, DVec3::new(-10.0, 0.0, 5.0));
        assert_eq!(transform.index_to_world(IVec3::ZERO), DVec3::new(-10.0, 0.0, 5.0));
        assert_eq!(
            transform.index_to_world(IVec3::new(2, 4, -2)),
            DVec3::new(-9.0, 2.0, 4.0)
        );
        assert_eq!(
            transform.to_affine().transform_point3(DVec3::new(2.0, 4.0, -2.0)),
            DVec3::new(-9.0, 2.0, 4.0)
        );
        assert_eq!(
            transform.world_to_index(DVec3::new(-9.9, 0.74, 4.9)),
            IVec3::new(0, 1, -1)
        );
    }

    #[test]
    fn test_assemble_places_bricks_globally() {
        let mut brick = background_brick(IVec3::new(1, 0, 1));
        brick.values[linear_index(IVec3::new(1, 2, 3), B)] = -0.5;
        brick.values[linear_index(IVec3::new(0, 0, 0), B)] = 0.5;

        let (volume, stats) = assemble(&manifest(), &[brick]);
        assert_eq!(
            stats,
            AssemblyStats {
                bricks: 1,
                set_voxels: 2,
                skipped_background: 62,
            }
        );
        assert_eq!(volume.active_voxel_count(), 2);
        assert_eq!(volume.get(IVec3::new(5, 2, 7)), -0.5);
        assert_eq!(volume.get(IVec3::new(4, 0, 4)), 0.5);
        assert_eq!(volume.background(), BACKGROUND);
        assert_eq!(volume.index_to_world(IVec3::ZERO), DVec3::new(-10.0, 0.0, 5.0));
    }

    #[test]
    fn test_all_background_brick_stores_nothing() {
        let (volume, stats) = assemble(&manifest(), &[background_brick(IVec3::ZERO)]);
        assert_eq!(stats.set_voxels, 0);
        assert_eq!(stats.skipped_background, 64);
        assert_eq!(volume.active_voxel_count(), 0);
        assert_eq!(volume.leaf_count(), 0);
        for z in 0..B {
            for y in 0..B {
                for x in 0..B {
                    assert_eq!(volume.get(IVec3::new(x, y, z)), BACKGROUND);
                }
            }
        }
    }

    #[test]
    fn test_near_background_is_kept() {
        let mut brick = background_brick(IVec3::ZERO);
        brick.values[0] = f32::from_bits(BACKGROUND.to_bits() + 1);
        let (volume, stats) = assemble(&manifest(), &[brick]);
        assert_eq!(stats.set_voxels, 1);
        assert!(volume.is_active(IVec3::ZERO));
    }

    #[test]
    fn test_absent_bricks_read_background() {
        let mut brick = background_brick(IVec3::ZERO);
        brick.values.fill(-1.0);
        let (volume, _) = assemble(&manifest(), &[brick]);
        assert_eq!(volume.active_voxel_count(), 64);
        assert_eq!(volume.get(IVec3::new(4, 4, 4)), BACKGROUND);
        assert_eq!(volume.get(IVec3::new(7, 0, 0)), BACKGROUND);
        assert_eq!(
            volume.bounding_box(),
            Some((IVec3::ZERO, IVec3::splat(B - 1)))
        );
    }

    fn coord() -> impl Strategy<Value = IVec3> {
        (-200i32..200, -200i32..200, -200i32..200).prop_map(|(x, y, z)| IVec3::new(x, y, z))
    }

    proptest! {
        #[test]
        fn prop_set_then_get(points in proptest::collection::vec((coord(), -10.0f32..10.0), 1..64)) {
            let mut volume = SparseVolume::new(BACKGROUND, VoxelTransform::new(1.0, DVec3::ZERO));
            let mut expected = std::collections::HashMap::new();
            for &(ijk, value) in &points {
                volume.set(ijk, value);
                expected.insert(ijk.to_array(), value);
            }
            prop_assert_eq!(volume.active_voxel_count(), expected.len());
            for (ijk, value) in expected {
                prop_assert_eq!(volume.get(IVec3::from_array(ijk)), value);
            }
        }

        #[test]
        fn prop_world_to_index_inverts_voxel_centers(ijk in coord()) {
            let transform = VoxelTransform::new(0.25, DVec3::new(-3.0, 7.5, 0.125));
            let center = transform.index_to_world(ijk) + DVec3::splat(0.125);
            prop_assert_eq!(transform.world_to_index(center), ijk);
        }
    }
}
