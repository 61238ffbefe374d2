//! Validate, decode and assemble bricked signed-distance volumes.
//!
//! A volume arrives as three inputs: a manifest describing geometry and
//! encoding, a brick index cataloguing which bricks exist, and a blob holding
//! their raw payloads. This crate checks the first two exhaustively, decodes
//! the payloads, and builds a [`SparseVolume`] for a downstream mesher.
//!
//! # Design principles
//!
//! - **Errors are data**: every stage returns a [`StageResult`] with all the
//!   problems it found, never just the first
//! - **Partial results survive**: one bad brick does not discard its siblings
//! - **Caller owns logging**: the library emits diagnostics via `tracing` but
//!   never logs validation errors on the caller's behalf
//!
//! # Example
//!
//! ```ignore
//! use brickvol::{PipelineInputs, pipeline};
//!
//! let inputs = PipelineInputs::from_dir("project.json", "bricks/");
//! let report = pipeline::run(&inputs);
//! for error in &report.errors {
//!     eprintln!("{error}");
//! }
//! let volume = report.volume.expect("pipeline failed");
//! ```

mod document;
mod error;
pub mod index;
pub mod manifest;
pub mod payload;
pub mod pipeline;
pub mod source;
pub mod synthetic;
mod validation;
pub mod volume;

pub use error::{Error, Result};
pub use index::{BrickIndex, BrickIndexEntry, BrickLayout, Encoding, IndexHeader};
pub use manifest::{LevelSetParams, Manifest};
pub use payload::DecodedBrick;
pub use pipeline::{LevelSetOverrides, PipelineInputs, PipelineReport, Stage};
pub use source::{BrickSource, FileSource};
pub use synthetic::{EncodedVolume, Shape, SyntheticVolume};
pub use validation::{ErrorCode, Outcome, StageResult, ValidationError};
pub use volume::{AssemblyStats, SparseVolume, VoxelTransform};

// Re-export decode types for convenience.
pub use brickvol_decode::Dtype;
