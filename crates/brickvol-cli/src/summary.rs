//! JSON summary of a pipeline run, printed to stdout.

use brickvol::{Outcome, PipelineReport};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct StageSummary {
    pub stage: &'static str,
    pub outcome: String,
    pub errors: usize,
}

#[derive(Debug, Serialize)]
pub struct ErrorSummary {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub field: String,
}

#[derive(Debug, Serialize)]
pub struct LevelSetSummary {
    pub iso: f64,
    pub adaptivity: f64,
}

#[derive(Debug, Serialize)]
pub struct BoundingBox {
    pub min: [i32; 3],
    pub max: [i32; 3],
}

#[derive(Debug, Serialize)]
pub struct VolumeSummary {
    pub active_voxels: usize,
    pub leaves: usize,
    pub background: f32,
    pub skipped_background: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bounding_box: Option<BoundingBox>,
}

#[derive(Debug, Serialize)]
pub struct RunSummary {
    pub outcome: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dims: Option<[i32; 3]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bricks_per_axis: Option<[i32; 3]>,
    pub index_bricks: usize,
    pub decoded_bricks: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level_set: Option<LevelSetSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<VolumeSummary>,
    pub stages: Vec<StageSummary>,
    pub errors: Vec<ErrorSummary>,
}

impl RunSummary {
    pub fn from_report(report: &PipelineReport) -> Self {
        let volume = report.volume.as_ref().map(|volume| VolumeSummary {
            active_voxels: volume.active_voxel_count(),
            leaves: volume.leaf_count(),
            background: volume.background(),
            skipped_background: report.stats.map_or(0, |stats| stats.skipped_background),
            bounding_box: volume.bounding_box().map(|(min, max)| BoundingBox {
                min: min.to_array(),
                max: max.to_array(),
            }),
        });

        Self {
            outcome: report.outcome().to_string(),
            dims: report.manifest.as_ref().map(|m| m.dims),
            bricks_per_axis: report.manifest.as_ref().map(brickvol::Manifest::bricks_per_axis),
            index_bricks: report.index_bricks,
            decoded_bricks: report.decoded_bricks,
            level_set: report.level_set.map(|params| LevelSetSummary {
                iso: params.iso,
                adaptivity: params.adaptivity,
            }),
            volume,
            stages: report
                .stages
                .iter()
                .map(|stage| StageSummary {
                    stage: stage.stage.as_str(),
                    outcome: stage.outcome.to_string(),
                    errors: stage.errors,
                })
                .collect(),
            errors: report
                .errors
                .iter()
                .map(|error| ErrorSummary {
                    code: error.code.as_str(),
                    message: error.message.clone(),
                    field: error.field.clone(),
                })
                .collect(),
        }
    }
}

/// Process exit code for a pipeline outcome.
pub fn exit_code(outcome: Outcome) -> u8 {
    match outcome {
        Outcome::Success => 0,
        Outcome::ValidationFailure => 2,
        Outcome::IoFailure => 3,
    }
}
