//! One-call driver for the whole ingestion pipeline.
//!
//! Runs manifest validation, level-set resolution, index validation, payload
//! decoding and volume assembly in order. A failed manifest or level set
//! stops the run. An index with validation errors is still decoded so that
//! payload problems surface in the same pass; only assembly is skipped.

use std::fmt;
use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::index::{self, BrickIndex};
use crate::manifest::{self, LevelSetParams, Manifest};
use crate::payload::{self, DecodedBrick};
use crate::validation::{Outcome, StageResult, ValidationError};
use crate::volume::{self, AssemblyStats, SparseVolume};

/// File name of the brick index inside an input directory.
pub const INDEX_FILE_NAME: &str = "bricks.index.json";
/// File name of the brick blob inside an input directory.
pub const BLOB_FILE_NAME: &str = "bricks.bin";

/// Caller overrides for the manifest's level-set parameters.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LevelSetOverrides {
    pub iso: Option<f64>,
    pub adaptivity: Option<f64>,
}

/// Where the pipeline reads its three inputs from.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineInputs {
    pub manifest: PathBuf,
    pub index: PathBuf,
    pub blob: PathBuf,
    pub level_set: LevelSetOverrides,
}

impl PipelineInputs {
    /// Inputs for a manifest plus a directory holding the standard index and
    /// blob file names.
    #[must_use]
    pub fn from_dir(manifest: impl Into<PathBuf>, dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            manifest: manifest.into(),
            index: dir.join(INDEX_FILE_NAME),
            blob: dir.join(BLOB_FILE_NAME),
            level_set: LevelSetOverrides::default(),
        }
    }

    #[must_use]
    pub fn with_level_set(mut self, level_set: LevelSetOverrides) -> Self {
        self.level_set = level_set;
        self
    }
}

/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Manifest,
    LevelSet,
    Index,
    Payload,
    Volume,
}

impl Stage {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Manifest => "manifest",
            Self::LevelSet => "level_set",
            Self::Index => "index",
            Self::Payload => "payload",
            Self::Volume => "volume",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one stage that ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageReport {
    pub stage: Stage,
    pub outcome: Outcome,
    pub errors: usize,
}

/// Everything a pipeline run produced.
#[derive(Debug, Clone, Default)]
pub struct PipelineReport {
    /// Stages that ran, in order. Stages that were skipped are absent.
    pub stages: Vec<StageReport>,
    /// Errors from every stage that ran, in order.
    pub errors: Vec<ValidationError>,
    pub manifest: Option<Manifest>,
    pub level_set: Option<LevelSetParams>,
    /// Entries in the validated index.
    pub index_bricks: usize,
    /// Bricks that decoded cleanly.
    pub decoded_bricks: usize,
    /// Present only when every stage succeeded.
    pub volume: Option<SparseVolume>,
    pub stats: Option<AssemblyStats>,
}

impl PipelineReport {
    /// The first non-success stage outcome, or success.
    #[must_use]
    pub fn outcome(&self) -> Outcome {
        self.stages
            .iter()
            .map(|report| report.outcome)
            .find(|outcome| !outcome.is_success())
            .unwrap_or(Outcome::Success)
    }

    /// Record a finished stage; returns its outcome and data.
    fn record<T>(&mut self, stage: Stage, result: StageResult<T>) -> (Outcome, T) {
        tracing::debug!(
            %stage,
            outcome = %result.outcome,
            errors = result.errors.len(),
            "pipeline stage finished"
        );
        self.stages.push(StageReport {
            stage,
            outcome: result.outcome,
            errors: result.errors.len(),
        });
        self.errors.extend(result.errors);
        (result.outcome, result.data)
    }
}

/// Run the pipeline over files on disk.
#[must_use]
pub fn run(inputs: &PipelineInputs) -> PipelineReport {
    drive(
        || manifest::load(&inputs.manifest),
        |manifest| index::load(&inputs.index, manifest),
        |index, manifest| payload::load(&inputs.blob, index, manifest),
        inputs.level_set,
    )
}

/// Run the pipeline over already-parsed documents and an in-memory blob.
#[must_use]
pub fn run_in_memory(
    manifest_document: &Value,
    index_document: &Value,
    blob: &[u8],
    level_set: LevelSetOverrides,
) -> PipelineReport {
    drive(
        || manifest::validate(manifest_document),
        |manifest| index::validate(index_document, manifest),
        |index, manifest| payload::decode(blob, index, manifest),
        level_set,
    )
}

fn drive(
    load_manifest: impl FnOnce() -> StageResult<Manifest>,
    load_index: impl FnOnce(&Manifest) -> StageResult<BrickIndex>,
    decode: impl FnOnce(&BrickIndex, &Manifest) -> StageResult<Vec<DecodedBrick>>,
    overrides: LevelSetOverrides,
) -> PipelineReport {
    let mut report = PipelineReport::default();

    let (outcome, manifest) = report.record(Stage::Manifest, load_manifest());
    if !outcome.is_success() {
        return report;
    }
    report.manifest = Some(manifest.clone());

    let level_set = match manifest.level_set(overrides.iso, overrides.adaptivity) {
        Ok(params) => StageResult::from_parts(Some(params), Vec::new()),
        Err(error) => StageResult::from_parts(None, vec![error]),
    };
    let (outcome, level_set) = report.record(Stage::LevelSet, level_set);
    if !outcome.is_success() {
        return report;
    }
    report.level_set = level_set;

    // A failed index still carries every entry that parsed, so the decoder
    // runs over it and reports its own problems. Only an unreadable index
    // stops the run here.
    let index = load_index(&manifest);
    report.index_bricks = index.data.bricks.len();
    let (index_outcome, index) = report.record(Stage::Index, index);
    if index_outcome == Outcome::IoFailure {
        return report;
    }

    let decoded = decode(&index, &manifest);
    report.decoded_bricks = decoded.data.len();
    let (payload_outcome, bricks) = report.record(Stage::Payload, decoded);
    if !(index_outcome.is_success() && payload_outcome.is_success()) {
        return report;
    }

    let (volume, stats) = volume::assemble(&manifest, &bricks);
    report.stages.push(StageReport {
        stage: Stage::Volume,
        outcome: Outcome::Success,
        errors: 0,
    });
    report.volume = Some(volume);
    report.stats = Some(stats);
    report
}
