//! Structured validation errors and stage outcomes.
//!
//! Every pipeline stage reports problems as data: a list of
//! [`ValidationError`]s alongside whatever it managed to build. Callers decide
//! how to log them and whether partial results are worth keeping.

use std::fmt;

/// Stable identifier for a family of failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Manifest required field missing or invalid, or unsupported version.
    ManifestField,
    /// Manifest geometry is not self-consistent.
    ManifestConsistency,
    /// A fixed coordinate-system convention has the wrong value.
    CoordinateSystem,
    /// The distance-sign convention has the wrong value.
    DistanceSign,
    /// Adaptivity lies outside `[0, 1]`.
    Adaptivity,
    /// Brick size is not one of the supported cube sizes.
    BrickSize,
    /// Background value is not positive or is narrower than the band.
    BackgroundValue,
    /// Brick index is malformed or disagrees with the manifest.
    IndexInconsistency,
    /// The same brick coordinate appears twice.
    DuplicateBrick,
    /// A brick coordinate lies outside the grid.
    BrickOutOfRange,
    /// A raw payload has the wrong byte size.
    PayloadSize,
    /// A payload byte range extends past the end of the blob.
    OffsetOutOfRange,
    /// A payload does not match its stored checksum.
    ChecksumMismatch,
    /// The brick blob could not be opened or read.
    BlobRead,
    /// The manifest could not be opened or parsed.
    ManifestRead,
    /// The brick index could not be opened or parsed.
    IndexRead,
}

impl ErrorCode {
    /// The stable string form, for programmatic dispatch and log output.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ManifestField => "E1001",
            Self::ManifestConsistency => "E1002",
            Self::CoordinateSystem => "E1003",
            Self::DistanceSign => "E1004",
            Self::Adaptivity => "E1005",
            Self::BrickSize => "E1006",
            Self::BackgroundValue => "E1007",
            Self::IndexInconsistency => "E1101",
            Self::DuplicateBrick => "E1102",
            Self::BrickOutOfRange => "E1103",
            Self::PayloadSize => "E1104",
            Self::OffsetOutOfRange => "E1105",
            Self::ChecksumMismatch => "E1106",
            Self::BlobRead => "E2001",
            Self::ManifestRead => "E2002",
            Self::IndexRead => "E2003",
        }
    }

    /// Whether this code belongs to the I/O family.
    #[must_use]
    pub const fn is_io(self) -> bool {
        matches!(self, Self::BlobRead | Self::ManifestRead | Self::IndexRead)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single problem found while validating or decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Failure family.
    pub code: ErrorCode,
    /// Human-readable description.
    pub message: String,
    /// The field or brick the problem pertains to (may be empty).
    pub field: String,
}

impl ValidationError {
    /// Create a new validation error.
    pub fn new(code: ErrorCode, message: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            field: field.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)?;
        if !self.field.is_empty() {
            write!(f, " | field={}", self.field)?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

/// Coarse classification of a stage result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    /// No errors.
    Success,
    /// One or more field or entry problems.
    ValidationFailure,
    /// An input could not be opened or parsed at all.
    IoFailure,
}

impl Outcome {
    /// Returns true for [`Outcome::Success`].
    #[must_use]
    pub fn is_success(self) -> bool {
        self == Self::Success
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Success => "success",
            Self::ValidationFailure => "validation_failure",
            Self::IoFailure => "io_failure",
        })
    }
}

/// What a pipeline stage produced: best-effort data plus every problem found.
#[derive(Debug, Clone)]
pub struct StageResult<T> {
    /// The data the stage managed to build. Partial when errors are present.
    pub data: T,
    /// All problems found, in discovery order.
    pub errors: Vec<ValidationError>,
    /// Overall classification.
    pub outcome: Outcome,
}

impl<T> StageResult<T> {
    /// Classify a completed stage: success iff there are no errors.
    pub fn from_parts(data: T, errors: Vec<ValidationError>) -> Self {
        let outcome = if errors.is_empty() {
            Outcome::Success
        } else {
            Outcome::ValidationFailure
        };
        Self {
            data,
            errors,
            outcome,
        }
    }

    /// Whether the stage finished without errors.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.outcome.is_success()
    }

    /// Discard partial data on failure.
    pub fn into_result(self) -> std::result::Result<T, Vec<ValidationError>> {
        if self.is_ok() {
            Ok(self.data)
        } else {
            Err(self.errors)
        }
    }
}

impl<T: Default> StageResult<T> {
    /// A stage that could not read its input: one error, no data.
    pub fn io_failure(error: ValidationError) -> Self {
        Self {
            data: T::default(),
            errors: vec![error],
            outcome: Outcome::IoFailure,
        }
    }
}

/// Folding helper for checks that either produce a value or an error.
pub(crate) trait ErrorListExt {
    /// Keep the value, or record the error and yield `None`.
    fn keep<T>(&mut self, result: std::result::Result<T, ValidationError>) -> Option<T>;
}

impl ErrorListExt for Vec<ValidationError> {
    fn keep<T>(&mut self, result: std::result::Result<T, ValidationError>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(error) => {
                self.push(error);
                None
            }
        }
    }
}
