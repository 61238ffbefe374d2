//! Manifest parsing and validation.
//!
//! The manifest is the single source of truth for volume geometry and brick
//! encoding. Validation checks every field independently and collects all
//! problems; only an unreadable or unparsable document aborts early.

use std::path::Path;

use brickvol_decode::Dtype;
use serde_json::{Value, json};

use crate::document::{Fields, parse_document, read_document};
use crate::index::BrickLayout;
use crate::validation::{ErrorCode, ErrorListExt, StageResult, ValidationError};

/// The only manifest schema version this crate understands.
pub const SUPPORTED_VERSION: u32 = 1;

/// Legal brick edge lengths, in voxels.
pub const BRICK_SIZES: [i32; 3] = [32, 64, 128];

/// Tolerance for `aabb_size == dims * voxel_size`, in millimetres.
pub const GEOMETRY_EPSILON: f64 = 1e-6;

/// A convention field with exactly one legal value in the current schema.
pub trait Convention: Copy + Default {
    /// JSON key within its parent object.
    const KEY: &'static str;
    /// The single accepted value.
    const VALUE: &'static str;
    /// Error code reported when the value differs.
    const CODE: ErrorCode;
}

macro_rules! fixed_convention {
    ($(#[$meta:meta])* $name:ident :: $variant:ident = $value:literal, key = $key:literal, code = $code:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
        pub enum $name {
            #[doc = concat!("`\"", $value, "\"`")]
            #[default]
            $variant,
        }

        impl Convention for $name {
            const KEY: &'static str = $key;
            const VALUE: &'static str = $value;
            const CODE: ErrorCode = ErrorCode::$code;
        }
    };
}

fixed_convention!(
    /// Coordinate system handedness.
    Handedness::Right = "right", key = "handedness", code = CoordinateSystem
);
fixed_convention!(
    /// World up axis.
    UpAxis::Y = "Y", key = "up_axis", code = CoordinateSystem
);
fixed_convention!(
    /// World front axis.
    FrontAxis::PositiveZ = "+Z", key = "front_axis", code = CoordinateSystem
);
fixed_convention!(
    /// Length unit of every world-space quantity.
    Units::Millimeters = "mm", key = "units", code = CoordinateSystem
);
fixed_convention!(
    /// Where within a voxel the distance is sampled.
    SampleAt::VoxelCenter = "voxel_center", key = "sample_at", code = CoordinateSystem
);
fixed_convention!(
    /// Linear voxel order inside a brick payload.
    AxisOrder::XFastest = "x-fastest", key = "axis_order", code = CoordinateSystem
);
fixed_convention!(
    /// Sign convention of stored distances.
    DistanceSign::NegativeInside = "negative_inside_positive_outside", key = "distance_sign", code = DistanceSign
);

/// The `coordinate_system` block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CoordinateSystem {
    pub handedness: Handedness,
    pub up_axis: UpAxis,
    pub front_axis: FrontAxis,
}

/// Optional integrity hashes for the manifest and its companion files.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Hashes {
    pub manifest_sha256: Option<String>,
    pub bricks_bin_sha256: Option<String>,
    pub bricks_index_sha256: Option<String>,
}

/// A parsed manifest.
///
/// Fields that failed validation keep their default value; check the
/// accompanying error list before trusting them.
#[derive(Debug, Clone, PartialEq)]
pub struct Manifest {
    pub version: u32,
    pub coordinate_system: CoordinateSystem,
    pub units: Units,
    /// World position of index-space origin, in millimetres.
    pub aabb_min: [f64; 3],
    pub aabb_size: [f64; 3],
    pub voxel_size: f64,
    /// Voxel counts per axis.
    pub dims: [i32; 3],
    pub sample_at: SampleAt,
    pub axis_order: AxisOrder,
    pub distance_sign: DistanceSign,
    pub iso: f64,
    pub adaptivity: f64,
    pub half_width_voxels: i32,
    pub brick_size: i32,
    pub dtype: Dtype,
    /// Distance written for every voxel outside the narrow band.
    pub background_value_mm: f32,
    pub hashes: Hashes,
}

impl Default for Manifest {
    fn default() -> Self {
        Self {
            version: 0,
            coordinate_system: CoordinateSystem::default(),
            units: Units::default(),
            aabb_min: [0.0; 3],
            aabb_size: [0.0; 3],
            voxel_size: 0.0,
            dims: [0; 3],
            sample_at: SampleAt::default(),
            axis_order: AxisOrder::default(),
            distance_sign: DistanceSign::default(),
            iso: 0.0,
            adaptivity: 0.0,
            half_width_voxels: 0,
            brick_size: 64,
            dtype: Dtype::default(),
            background_value_mm: 1000.0,
            hashes: Hashes::default(),
        }
    }
}

/// Level-set parameters handed to the mesher alongside the volume.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LevelSetParams {
    pub iso: f64,
    pub adaptivity: f64,
}

impl Manifest {
    /// Number of bricks needed to cover each axis.
    #[must_use]
    pub fn bricks_per_axis(&self) -> [i32; 3] {
        self.dims
            .map(|dim| bricks_for_dim(dim, self.brick_size))
    }

    /// The brick layout this manifest declares.
    #[must_use]
    pub fn layout(&self) -> BrickLayout {
        BrickLayout {
            brick_size: self.brick_size,
            dtype: self.dtype,
        }
    }

    /// Voxels in one dense brick, or `None` if the brick size is unusable.
    #[must_use]
    pub fn voxels_per_brick(&self) -> Option<usize> {
        self.layout().voxels()
    }

    /// Byte size of one raw brick payload, or `None` if it overflows.
    #[must_use]
    pub fn payload_bytes(&self) -> Option<u64> {
        self.layout().payload_bytes()
    }

    /// Resolve the effective level-set parameters.
    ///
    /// Overrides replace the manifest's values; an overridden adaptivity is
    /// range-checked like the manifest field.
    pub fn level_set(
        &self,
        iso: Option<f64>,
        adaptivity: Option<f64>,
    ) -> Result<LevelSetParams, ValidationError> {
        let params = LevelSetParams {
            iso: iso.unwrap_or(self.iso),
            adaptivity: adaptivity.unwrap_or(self.adaptivity),
        };
        match check_adaptivity(params.adaptivity) {
            Some(error) => Err(error),
            None => Ok(params),
        }
    }

    /// Render this manifest back into its JSON document form.
    #[must_use]
    pub fn to_document(&self) -> Value {
        let mut hashes = serde_json::Map::new();
        for (key, value) in [
            ("manifest_sha256", &self.hashes.manifest_sha256),
            ("bricks_bin_sha256", &self.hashes.bricks_bin_sha256),
            ("bricks_index_sha256", &self.hashes.bricks_index_sha256),
        ] {
            if let Some(value) = value {
                hashes.insert(key.to_string(), Value::String(value.clone()));
            }
        }

        json!({
            "version": self.version,
            "coordinate_system": {
                "handedness": Handedness::VALUE,
                "up_axis": UpAxis::VALUE,
                "front_axis": FrontAxis::VALUE,
            },
            "units": Units::VALUE,
            "aabb_min": self.aabb_min,
            "aabb_size": self.aabb_size,
            "voxel_size": self.voxel_size,
            "dims": self.dims,
            "sample_at": SampleAt::VALUE,
            "axis_order": AxisOrder::VALUE,
            "distance_sign": DistanceSign::VALUE,
            "iso": self.iso,
            "adaptivity": self.adaptivity,
            "narrow_band": { "half_width_voxels": self.half_width_voxels },
            "brick": { "size": self.brick_size },
            "dtype": self.dtype.as_str(),
            "background_value_mm": self.background_value_mm,
            "hashes": hashes,
        })
    }
}

/// `ceil(dim / brick_size)`, or zero when either is not positive.
pub(crate) fn bricks_for_dim(dim: i32, brick_size: i32) -> i32 {
    if dim > 0 && brick_size > 0 {
        dim / brick_size + i32::from(dim % brick_size != 0)
    } else {
        0
    }
}

/// Validate a parsed manifest document.
pub fn validate(document: &Value) -> StageResult<Manifest> {
    let Some(object) = document.as_object() else {
        return StageResult::io_failure(ValidationError::new(
            ErrorCode::ManifestRead,
            "manifest document must be a JSON object",
            "",
        ));
    };

    let root = Fields::new(object, "", ErrorCode::ManifestField);
    let mut errors = Vec::new();
    let mut manifest = Manifest::default();

    if let Some(version) = errors.keep(root.i64("version")) {
        match u32::try_from(version) {
            Ok(v) if v == SUPPORTED_VERSION => manifest.version = v,
            _ => errors.push(ValidationError::new(
                ErrorCode::ManifestField,
                format!("unsupported manifest version: {version}"),
                "version",
            )),
        }
    }

    if let Some(cs) = errors.keep(root.object("coordinate_system")) {
        errors.extend(check_convention::<Handedness>(&cs));
        errors.extend(check_convention::<UpAxis>(&cs));
        errors.extend(check_convention::<FrontAxis>(&cs));
    }
    errors.extend(check_convention::<Units>(&root));
    errors.extend(check_convention::<SampleAt>(&root));
    errors.extend(check_convention::<AxisOrder>(&root));
    errors.extend(check_convention::<DistanceSign>(&root));

    if let Some(aabb_min) = errors.keep(root.f64_array3("aabb_min")) {
        manifest.aabb_min = aabb_min;
    }

    let aabb_size = errors.keep(root.f64_array3("aabb_size"));
    if let Some(size) = aabb_size {
        manifest.aabb_size = size;
        for (axis, &extent) in size.iter().enumerate() {
            errors.extend(check_positive(
                &format!("aabb_size[{axis}]"),
                "aabb_size",
                extent,
                ErrorCode::ManifestConsistency,
            ));
        }
    }

    let voxel_size = errors.keep(root.f64("voxel_size"));
    if let Some(voxel_size) = voxel_size {
        manifest.voxel_size = voxel_size;
        errors.extend(check_positive(
            "voxel_size",
            "voxel_size",
            voxel_size,
            ErrorCode::ManifestConsistency,
        ));
    }

    let dims = errors.keep(root.i32_array3("dims"));
    if let Some(dims) = dims {
        manifest.dims = dims;
        for (axis, &dim) in dims.iter().enumerate() {
            if dim <= 0 {
                errors.push(ValidationError::new(
                    ErrorCode::ManifestConsistency,
                    format!("dims[{axis}] must be > 0, got: {dim}"),
                    "dims",
                ));
            }
        }
    }

    if let Some(iso) = errors.keep(root.f64("iso")) {
        manifest.iso = iso;
    }

    if let Some(adaptivity) = errors.keep(root.f64("adaptivity")) {
        manifest.adaptivity = adaptivity;
        errors.extend(check_adaptivity(adaptivity));
    }

    let half_width = errors
        .keep(root.object("narrow_band"))
        .and_then(|band| errors.keep(band.i32("half_width_voxels")));
    if let Some(half_width) = half_width {
        manifest.half_width_voxels = half_width;
        if half_width < 1 {
            errors.push(ValidationError::new(
                ErrorCode::ManifestConsistency,
                format!("narrow_band.half_width_voxels must be >= 1, got: {half_width}"),
                "narrow_band.half_width_voxels",
            ));
        }
    }

    let brick_size = errors
        .keep(root.object("brick"))
        .and_then(|brick| errors.keep(brick.i32("size")));
    if let Some(size) = brick_size {
        manifest.brick_size = size;
        if !BRICK_SIZES.contains(&size) {
            errors.push(ValidationError::new(
                ErrorCode::BrickSize,
                format!("brick.size must be 32, 64, or 128, got: {size}"),
                "brick.size",
            ));
        }
    }

    if let Some(dtype) = errors.keep(root.str("dtype")) {
        match dtype.parse::<Dtype>() {
            Ok(dtype) => manifest.dtype = dtype,
            Err(_) => errors.push(ValidationError::new(
                ErrorCode::ManifestConsistency,
                format!("dtype must be \"f16\" or \"f32\", got: {dtype:?}"),
                "dtype",
            )),
        }
    }

    let background = errors.keep(root.f64("background_value_mm"));
    if let Some(background) = background {
        #[allow(clippy::cast_possible_truncation)]
        let narrowed = background as f32;
        manifest.background_value_mm = narrowed;
        errors.extend(check_positive(
            "background_value_mm",
            "background_value_mm",
            background,
            ErrorCode::BackgroundValue,
        ));
    }

    if let Some(hashes) = errors.keep(root.optional_object("hashes")).flatten() {
        manifest.hashes = Hashes {
            manifest_sha256: read_hash(&hashes, "manifest_sha256", &mut errors),
            bricks_bin_sha256: read_hash(&hashes, "bricks_bin_sha256", &mut errors),
            bricks_index_sha256: read_hash(&hashes, "bricks_index_sha256", &mut errors),
        };
    }

    // Cross-field rules only run on inputs that parsed and passed their own
    // checks, so one bad field is reported once.
    let voxel_size = voxel_size.filter(|&v| v > 0.0);
    if let (Some(size), Some(dims), Some(voxel_size)) = (aabb_size, dims, voxel_size) {
        errors.extend(check_extent_matches_dims(size, dims, voxel_size));
    }
    if let (Some(background), Some(half_width), Some(voxel_size)) =
        (background, half_width, voxel_size)
    {
        errors.extend(check_background_covers_band(background, half_width, voxel_size));
    }

    tracing::debug!(errors = errors.len(), "manifest validated");
    StageResult::from_parts(manifest, errors)
}

/// Parse and validate manifest text.
pub fn parse_str(text: &str) -> StageResult<Manifest> {
    match parse_document(text, "manifest") {
        Ok(document) => validate(&document),
        Err(e) => StageResult::io_failure(ValidationError::new(
            ErrorCode::ManifestRead,
            e.to_string(),
            "",
        )),
    }
}

/// Read, parse and validate a manifest file.
pub fn load(path: impl AsRef<Path>) -> StageResult<Manifest> {
    let path = path.as_ref();
    match read_document(path, "manifest") {
        Ok(document) => validate(&document),
        Err(e) => StageResult::io_failure(ValidationError::new(
            ErrorCode::ManifestRead,
            e.to_string(),
            path.display().to_string(),
        )),
    }
}

fn check_convention<C: Convention>(fields: &Fields<'_>) -> Option<ValidationError> {
    let value = match fields.require(C::KEY) {
        Ok(value) => value,
        Err(missing) => return Some(missing),
    };
    if value.as_str() == Some(C::VALUE) {
        None
    } else {
        let field = fields.path(C::KEY);
        Some(ValidationError::new(
            C::CODE,
            format!("{field} must be \"{}\", got: {value}", C::VALUE),
            field,
        ))
    }
}

fn check_positive(
    label: &str,
    field: &str,
    value: f64,
    code: ErrorCode,
) -> Option<ValidationError> {
    (value <= 0.0).then(|| ValidationError::new(code, format!("{label} must be > 0, got: {value}"), field))
}

fn check_adaptivity(adaptivity: f64) -> Option<ValidationError> {
    (!(0.0..=1.0).contains(&adaptivity)).then(|| {
        ValidationError::new(
            ErrorCode::Adaptivity,
            format!("adaptivity must be in [0.0, 1.0], got: {adaptivity}"),
            "adaptivity",
        )
    })
}

fn check_extent_matches_dims(
    aabb_size: [f64; 3],
    dims: [i32; 3],
    voxel_size: f64,
) -> Vec<ValidationError> {
    (0..3)
        .filter(|&axis| dims[axis] > 0 && aabb_size[axis] > 0.0)
        .filter_map(|axis| {
            let expected = f64::from(dims[axis]) * voxel_size;
            ((aabb_size[axis] - expected).abs() > GEOMETRY_EPSILON).then(|| {
                ValidationError::new(
                    ErrorCode::ManifestConsistency,
                    format!(
                        "aabb_size[{axis}]={} != dims[{axis}]*voxel_size={expected}",
                        aabb_size[axis]
                    ),
                    "aabb_size",
                )
            })
        })
        .collect()
}

fn check_background_covers_band(
    background: f64,
    half_width_voxels: i32,
    voxel_size: f64,
) -> Option<ValidationError> {
    if background <= 0.0 || half_width_voxels < 1 {
        return None;
    }
    let band = f64::from(half_width_voxels) * voxel_size;
    (background < band).then(|| {
        ValidationError::new(
            ErrorCode::BackgroundValue,
            format!(
                "background_value_mm ({background}) must be >= narrow_band.half_width_voxels * voxel_size ({band})"
            ),
            "background_value_mm",
        )
    })
}

fn read_hash(
    hashes: &Fields<'_>,
    key: &str,
    errors: &mut Vec<ValidationError>,
) -> Option<String> {
    errors
        .keep(hashes.optional_str(key))
        .flatten()
        .map(str::to_string)
}
