//! Command-line argument parsing.

use std::path::PathBuf;

use brickvol::{LevelSetOverrides, PipelineInputs, Shape, pipeline};
use clap::{Parser, ValueEnum};

/// Exit code for usage errors and failures outside the pipeline.
pub const EXIT_GENERAL: u8 = 1;

/// Default edge length of a generated debug volume, in voxels.
const DEFAULT_DEBUG_DIMS: i32 = 128;
/// Default voxel size of a generated debug volume, in millimetres.
const DEFAULT_DEBUG_VOXEL_SIZE: f64 = 0.5;

/// Maximum level of log output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "brickvol",
    about = "Validate, decode and assemble a bricked signed-distance volume"
)]
pub struct CliArgs {
    /// Manifest describing the volume (project.json).
    #[arg(long, required_unless_present = "debug_generate")]
    pub manifest: Option<PathBuf>,

    /// Directory holding bricks.index.json and bricks.bin.
    #[arg(long = "in", value_name = "DIR")]
    pub input_dir: Option<PathBuf>,

    /// Brick index path, overriding <DIR>/bricks.index.json.
    #[arg(long)]
    pub index: Option<PathBuf>,

    /// Brick blob path, overriding <DIR>/bricks.bin.
    #[arg(long)]
    pub bin: Option<PathBuf>,

    /// Iso value override.
    #[arg(long, allow_negative_numbers = true)]
    pub iso: Option<f64>,

    /// Adaptivity override, in [0, 1].
    #[arg(long, allow_negative_numbers = true)]
    pub adaptivity: Option<f64>,

    /// Maximum log level. `RUST_LOG` takes precedence when set.
    #[arg(long, value_enum, default_value_t = LogLevel::default())]
    pub log_level: LogLevel,

    /// Generate a synthetic volume instead of reading inputs (sphere or box).
    #[arg(long, value_name = "SHAPE", conflicts_with_all = ["manifest", "input_dir", "index", "bin"])]
    pub debug_generate: Option<Shape>,

    /// Edge length of the generated grid, in voxels.
    #[arg(long, default_value_t = DEFAULT_DEBUG_DIMS)]
    pub debug_dims: i32,

    /// Voxel size of the generated grid, in millimetres.
    #[arg(long, default_value_t = DEFAULT_DEBUG_VOXEL_SIZE)]
    pub debug_voxel_size: f64,
}

/// What the binary has been asked to do.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Ingest a volume from disk.
    Ingest(PipelineInputs),
    /// Generate a synthetic volume and push it through the pipeline.
    Generate {
        shape: Shape,
        dims: i32,
        voxel_size: f64,
        level_set: LevelSetOverrides,
    },
}

impl CliArgs {
    pub fn level_set(&self) -> LevelSetOverrides {
        LevelSetOverrides {
            iso: self.iso,
            adaptivity: self.adaptivity,
        }
    }

    /// Resolve the arguments into a command.
    ///
    /// Without `--in`, both `--index` and `--bin` must be given.
    pub fn command(&self) -> Result<Command, String> {
        if let Some(shape) = self.debug_generate {
            return Ok(Command::Generate {
                shape,
                dims: self.debug_dims,
                voxel_size: self.debug_voxel_size,
                level_set: self.level_set(),
            });
        }

        let manifest = self
            .manifest
            .clone()
            .ok_or_else(|| "--manifest is required".to_string())?;

        let from_dir = |name: &str| self.input_dir.as_ref().map(|dir| dir.join(name));
        let index = self
            .index
            .clone()
            .or_else(|| from_dir(pipeline::INDEX_FILE_NAME))
            .ok_or_else(|| "either --in or --index is required".to_string())?;
        let blob = self
            .bin
            .clone()
            .or_else(|| from_dir(pipeline::BLOB_FILE_NAME))
            .ok_or_else(|| "either --in or --bin is required".to_string())?;

        Ok(Command::Ingest(PipelineInputs {
            manifest,
            index,
            blob,
            level_set: self.level_set(),
        }))
    }
}

/// Exit code for an argument error: 0 for `--help`, which clap reports as
/// an error, and [`EXIT_GENERAL`] for real usage errors.
pub fn usage_exit_code(error: &clap::Error) -> u8 {
    if error.use_stderr() { EXIT_GENERAL } else { 0 }
}
