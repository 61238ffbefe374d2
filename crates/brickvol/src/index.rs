//! Brick index parsing and validation.
//!
//! The index catalogs which bricks exist and where their payloads live in the
//! blob. It is validated against an already-parsed [`Manifest`].

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use brickvol_decode::Dtype;
use glam::IVec3;
use serde_json::{Value, json};

use crate::document::{Fields, parse_document, read_document};
use crate::manifest::{AxisOrder, BRICK_SIZES, Convention, Manifest, bricks_for_dim};
use crate::validation::{ErrorCode, ErrorListExt, StageResult, ValidationError};

/// The only index schema version this crate understands.
pub const SUPPORTED_INDEX_VERSION: u32 = 1;

/// Catalog header. Fields that failed to parse are `None`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IndexHeader {
    pub version: Option<u32>,
    pub brick_size: Option<i32>,
    pub dtype: Option<Dtype>,
    pub axis_order: Option<AxisOrder>,
    pub dims: Option<[i32; 3]>,
}

/// How a brick payload is stored in the blob.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum Encoding {
    /// Dense samples, no compression.
    #[default]
    Raw,
    /// Anything else. Kept so the decoder can report it per entry.
    Unsupported(String),
}

impl Encoding {
    /// Parse an encoding name.
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        match name {
            "raw" => Self::Raw,
            other => Self::Unsupported(other.to_string()),
        }
    }

    /// The name used in index documents.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Raw => "raw",
            Self::Unsupported(name) => name,
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the brick catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrickIndexEntry {
    /// Brick-space coordinate `(bx, by, bz)`.
    pub coord: IVec3,
    /// Start of the payload within the blob.
    pub offset_bytes: u64,
    /// Payload length in bytes.
    pub payload_bytes: u64,
    pub encoding: Encoding,
    /// Stored CRC32 as hex text, if the producer wrote one.
    pub crc32: Option<String>,
}

/// A parsed brick index.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BrickIndex {
    pub header: IndexHeader,
    /// Every entry whose fields could be read, in document order,
    /// including entries that failed their encoding, size, range or
    /// duplicate checks.
    pub bricks: Vec<BrickIndexEntry>,
}

/// The brick size and sample type payloads are actually encoded with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BrickLayout {
    pub brick_size: i32,
    pub dtype: Dtype,
}

impl BrickLayout {
    /// Voxels in one dense brick, or `None` if the brick size is negative
    /// or the count does not fit in `usize`.
    #[must_use]
    pub fn voxels(&self) -> Option<usize> {
        let edge = usize::try_from(self.brick_size).ok()?;
        edge.checked_mul(edge)?.checked_mul(edge)
    }

    /// Expected byte size of a raw payload, or `None` if it overflows.
    #[must_use]
    pub fn payload_bytes(&self) -> Option<u64> {
        let bytes = self.voxels()?.checked_mul(self.dtype.size_bytes())?;
        u64::try_from(bytes).ok()
    }

    /// Global voxel coordinate of a brick's first voxel.
    #[must_use]
    pub fn brick_origin(&self, coord: IVec3) -> IVec3 {
        coord * self.brick_size
    }

    /// Highest legal brick coordinate on each axis, `ceil(dim / B) - 1`.
    #[must_use]
    pub fn max_brick_coord(&self, dims: [i32; 3]) -> IVec3 {
        IVec3::from_array(dims.map(|dim| bricks_for_dim(dim, self.brick_size) - 1))
    }
}

impl BrickIndex {
    /// The effective layout: header values where present, else the manifest's.
    ///
    /// A header brick size outside [`BRICK_SIZES`] is ignored.
    #[must_use]
    pub fn layout(&self, manifest: &Manifest) -> BrickLayout {
        BrickLayout {
            brick_size: self
                .header
                .brick_size
                .filter(|size| BRICK_SIZES.contains(size))
                .unwrap_or(manifest.brick_size),
            dtype: self.header.dtype.unwrap_or(manifest.dtype),
        }
    }

    /// Render this index back into its JSON document form.
    ///
    /// Header fields that are `None` are omitted.
    #[must_use]
    pub fn to_document(&self) -> Value {
        let mut document = serde_json::Map::new();
        if let Some(version) = self.header.version {
            document.insert("version".into(), json!(version));
        }
        if let Some(size) = self.header.brick_size {
            document.insert("brick_size".into(), json!(size));
        }
        if let Some(dtype) = self.header.dtype {
            document.insert("dtype".into(), json!(dtype.as_str()));
        }
        if self.header.axis_order.is_some() {
            document.insert("axis_order".into(), json!(AxisOrder::VALUE));
        }
        if let Some(dims) = self.header.dims {
            document.insert("dims".into(), json!(dims));
        }

        let bricks: Vec<Value> = self
            .bricks
            .iter()
            .map(|entry| {
                let mut row = json!({
                    "bx": entry.coord.x,
                    "by": entry.coord.y,
                    "bz": entry.coord.z,
                    "offset_bytes": entry.offset_bytes,
                    "payload_bytes": entry.payload_bytes,
                    "encoding": entry.encoding.as_str(),
                });
                if let Some(crc) = &entry.crc32 {
                    row["crc32"] = json!(crc);
                }
                row
            })
            .collect();
        document.insert("bricks".into(), Value::Array(bricks));

        Value::Object(document)
    }
}

/// Validate a parsed index document against a manifest.
pub fn validate(document: &Value, manifest: &Manifest) -> StageResult<BrickIndex> {
    let Some(object) = document.as_object() else {
        return StageResult::io_failure(ValidationError::new(
            ErrorCode::IndexRead,
            "bricks index document must be a JSON object",
            "",
        ));
    };

    let root = Fields::new(object, "", ErrorCode::IndexInconsistency);
    let mut errors = Vec::new();
    let mut index = BrickIndex::default();

    index.header = read_header(&root, &mut errors);
    errors.extend(check_header_against_manifest(&index.header, manifest));

    let layout = index.layout(manifest);
    let max_coord = layout.max_brick_coord(manifest.dims);

    match root.require("bricks").map(Value::as_array) {
        Ok(Some(rows)) => {
            let mut seen: HashMap<IVec3, usize> = HashMap::with_capacity(rows.len());
            for (position, row) in rows.iter().enumerate() {
                let Some(entry) = errors.keep(read_entry(position, row)) else {
                    continue;
                };
                errors.extend(check_encoding(position, &entry));
                errors.extend(check_payload_size(position, &entry, layout));
                errors.extend(check_coord_range(position, &entry, max_coord));
                if let Some(&first) = seen.get(&entry.coord) {
                    errors.push(duplicate_error(position, entry.coord, first));
                } else {
                    seen.insert(entry.coord, position);
                }
                index.bricks.push(entry);
            }
        }
        Ok(None) => errors.push(ValidationError::new(
            ErrorCode::IndexInconsistency,
            "bricks must be an array",
            "bricks",
        )),
        Err(missing) => errors.push(missing),
    }

    tracing::debug!(
        bricks = index.bricks.len(),
        errors = errors.len(),
        "bricks index validated"
    );
    StageResult::from_parts(index, errors)
}

/// Parse and validate index text.
pub fn parse_str(text: &str, manifest: &Manifest) -> StageResult<BrickIndex> {
    match parse_document(text, "bricks index") {
        Ok(document) => validate(&document, manifest),
        Err(e) => StageResult::io_failure(ValidationError::new(
            ErrorCode::IndexRead,
            e.to_string(),
            "",
        )),
    }
}

/// Read, parse and validate an index file.
pub fn load(path: impl AsRef<Path>, manifest: &Manifest) -> StageResult<BrickIndex> {
    let path = path.as_ref();
    match read_document(path, "bricks index") {
        Ok(document) => validate(&document, manifest),
        Err(e) => StageResult::io_failure(ValidationError::new(
            ErrorCode::IndexRead,
            e.to_string(),
            path.display().to_string(),
        )),
    }
}

fn read_header(root: &Fields<'_>, errors: &mut Vec<ValidationError>) -> IndexHeader {
    let mut header = IndexHeader::default();

    if let Some(version) = errors.keep(root.i64("version")) {
        match u32::try_from(version) {
            Ok(v) if v == SUPPORTED_INDEX_VERSION => header.version = Some(v),
            _ => errors.push(ValidationError::new(
                ErrorCode::IndexInconsistency,
                format!("unsupported bricks index version: {version}"),
                "version",
            )),
        }
    }

    header.brick_size = errors.keep(root.i32("brick_size"));

    if let Some(dtype) = errors.keep(root.str("dtype")) {
        match dtype.parse::<Dtype>() {
            Ok(dtype) => header.dtype = Some(dtype),
            Err(_) => errors.push(ValidationError::new(
                ErrorCode::IndexInconsistency,
                format!("dtype must be \"f16\" or \"f32\", got: {dtype:?}"),
                "dtype",
            )),
        }
    }

    if let Some(order) = errors.keep(root.str("axis_order")) {
        if order == AxisOrder::VALUE {
            header.axis_order = Some(AxisOrder::XFastest);
        } else {
            errors.push(ValidationError::new(
                ErrorCode::IndexInconsistency,
                format!("axis_order must be \"{}\", got: {order:?}", AxisOrder::VALUE),
                "axis_order",
            ));
        }
    }

    header.dims = errors.keep(root.i32_array3("dims"));
    header
}

fn check_header_against_manifest(header: &IndexHeader, manifest: &Manifest) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if let Some(size) = header.brick_size
        && size != manifest.brick_size
    {
        errors.push(ValidationError::new(
            ErrorCode::IndexInconsistency,
            format!("brick_size mismatch: index={size} manifest={}", manifest.brick_size),
            "brick_size",
        ));
    }

    if let Some(dtype) = header.dtype
        && dtype != manifest.dtype
    {
        errors.push(ValidationError::new(
            ErrorCode::IndexInconsistency,
            format!("dtype mismatch: index=\"{dtype}\" manifest=\"{}\"", manifest.dtype),
            "dtype",
        ));
    }

    if let Some(dims) = header.dims {
        for axis in 0..3 {
            if dims[axis] != manifest.dims[axis] {
                errors.push(ValidationError::new(
                    ErrorCode::IndexInconsistency,
                    format!(
                        "dims[{axis}] mismatch: index={} manifest={}",
                        dims[axis], manifest.dims[axis]
                    ),
                    "dims",
                ));
            }
        }
    }

    errors
}

fn read_entry(position: usize, row: &Value) -> Result<BrickIndexEntry, ValidationError> {
    let prefix = format!("bricks[{position}].");
    let Some(object) = row.as_object() else {
        return Err(ValidationError::new(
            ErrorCode::IndexInconsistency,
            format!("bricks[{position}] must be an object, got: {row}"),
            format!("bricks[{position}]"),
        ));
    };
    let fields = Fields::new(object, prefix, ErrorCode::IndexInconsistency);

    // Read every field before bailing so that one entry reports all of its
    // problems; only the first is returned to the caller.
    let mut problems = Vec::new();
    let bx = problems.keep(fields.i32("bx"));
    let by = problems.keep(fields.i32("by"));
    let bz = problems.keep(fields.i32("bz"));
    let offset = problems.keep(read_byte_count(&fields, "offset_bytes"));
    let payload = problems.keep(read_byte_count(&fields, "payload_bytes"));
    let encoding = problems.keep(fields.str("encoding"));
    let crc32 = problems.keep(fields.optional_str("crc32"));

    match (bx, by, bz, offset, payload, encoding, crc32) {
        (Some(bx), Some(by), Some(bz), Some(offset), Some(payload), Some(encoding), Some(crc32)) => {
            Ok(BrickIndexEntry {
                coord: IVec3::new(bx, by, bz),
                offset_bytes: offset,
                payload_bytes: payload,
                encoding: Encoding::from_name(encoding),
                crc32: crc32.map(str::to_string),
            })
        }
        _ => Err(merge_problems(problems)),
    }
}

/// Fold several field problems of one entry into a single error.
fn merge_problems(mut problems: Vec<ValidationError>) -> ValidationError {
    if problems.len() == 1 {
        return problems.remove(0);
    }
    let message = problems
        .iter()
        .map(|p| p.message.as_str())
        .collect::<Vec<_>>()
        .join("; ");
    let field = problems
        .iter()
        .map(|p| p.field.as_str())
        .collect::<Vec<_>>()
        .join(",");
    ValidationError::new(ErrorCode::IndexInconsistency, message, field)
}

fn read_byte_count(fields: &Fields<'_>, key: &str) -> Result<u64, ValidationError> {
    let value = fields.i64(key)?;
    u64::try_from(value).map_err(|_| {
        ValidationError::new(
            ErrorCode::IndexInconsistency,
            format!("{} must be >= 0, got: {value}", fields.path(key)),
            fields.path(key),
        )
    })
}

pub(crate) fn check_encoding(position: usize, entry: &BrickIndexEntry) -> Option<ValidationError> {
    match &entry.encoding {
        Encoding::Raw => None,
        Encoding::Unsupported(name) => Some(ValidationError::new(
            ErrorCode::IndexInconsistency,
            format!("bricks[{position}].encoding must be \"raw\", got: {name:?}"),
            format!("bricks[{position}].encoding"),
        )),
    }
}

pub(crate) fn check_payload_size(
    position: usize,
    entry: &BrickIndexEntry,
    layout: BrickLayout,
) -> Option<ValidationError> {
    let expected = layout.payload_bytes();
    if entry.encoding != Encoding::Raw || expected == Some(entry.payload_bytes) {
        return None;
    }
    let expected = expected.map_or_else(|| "overflow".to_string(), |bytes| bytes.to_string());
    Some(ValidationError::new(
        ErrorCode::PayloadSize,
        format!(
            "bricks[{position}].payload_bytes={} != B^3*sizeof(dtype)={expected}",
            entry.payload_bytes
        ),
        format!("bricks[{position}].payload_bytes"),
    ))
}

fn check_coord_range(
    position: usize,
    entry: &BrickIndexEntry,
    max_coord: IVec3,
) -> Option<ValidationError> {
    let coord = entry.coord;
    let in_range = coord.cmpge(IVec3::ZERO).all() && coord.cmple(max_coord).all();
    (!in_range).then(|| {
        ValidationError::new(
            ErrorCode::BrickOutOfRange,
            format!(
                "bricks[{position}] brick ({},{},{}) out of range [0,{}]x[0,{}]x[0,{}]",
                coord.x, coord.y, coord.z, max_coord.x, max_coord.y, max_coord.z
            ),
            format!("bricks[{position}]"),
        )
    })
}

pub(crate) fn duplicate_error(position: usize, coord: IVec3, first: usize) -> ValidationError {
    ValidationError::new(
        ErrorCode::DuplicateBrick,
        format!(
            "bricks[{position}] duplicate brick ({},{},{}), first listed at bricks[{first}]",
            coord.x, coord.y, coord.z
        ),
        format!("bricks[{position}]"),
    )
}
