//! `brickvol`: validate, decode and assemble a bricked SDF volume.

mod args;
mod summary;

use std::process::ExitCode;

use brickvol::{Dtype, PipelineReport, pipeline, synthetic};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::args::{CliArgs, Command, EXIT_GENERAL, LogLevel, usage_exit_code};
use crate::summary::{RunSummary, exit_code};

fn main() -> ExitCode {
    let args = match CliArgs::try_parse() {
        Ok(args) => args,
        Err(e) => {
            // Logging is not set up yet.
            if let Err(io) = e.print() {
                eprintln!("brickvol: failed to print usage: {io}");
            }
            return ExitCode::from(usage_exit_code(&e));
        }
    };

    init_tracing(args.log_level);

    let command = match args.command() {
        Ok(command) => command,
        Err(message) => {
            tracing::error!("{message}");
            return ExitCode::from(EXIT_GENERAL);
        }
    };

    let report = match execute(command) {
        Ok(report) => report,
        Err(e) => {
            tracing::error!("{e}");
            return ExitCode::from(EXIT_GENERAL);
        }
    };

    for error in &report.errors {
        tracing::error!(code = %error.code, field = %error.field, "{}", error.message);
    }

    let outcome = report.outcome();
    match serde_json::to_string_pretty(&RunSummary::from_report(&report)) {
        Ok(json) => println!("{json}"),
        Err(e) => {
            tracing::error!("failed to serialize summary: {e}");
            return ExitCode::from(EXIT_GENERAL);
        }
    }

    if outcome.is_success() {
        tracing::info!(
            active_voxels = report
                .volume
                .as_ref()
                .map_or(0, brickvol::SparseVolume::active_voxel_count),
            "volume ready for meshing"
        );
    } else {
        tracing::warn!(%outcome, errors = report.errors.len(), "pipeline did not complete");
    }
    ExitCode::from(exit_code(outcome))
}

/// Install the fmt subscriber on stderr. `RUST_LOG` wins over `--log-level`.
fn init_tracing(level: LogLevel) {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level.as_str())),
        )
        .init();
}

fn execute(command: Command) -> brickvol::Result<PipelineReport> {
    match command {
        Command::Ingest(inputs) => {
            tracing::info!(
                manifest = %inputs.manifest.display(),
                index = %inputs.index.display(),
                blob = %inputs.blob.display(),
                "ingesting volume"
            );
            Ok(pipeline::run(&inputs))
        }
        Command::Generate {
            shape,
            dims,
            voxel_size,
            level_set,
        } => {
            let encoded = synthetic::generate(shape, dims, voxel_size)?.encode(Dtype::F32);
            Ok(pipeline::run_in_memory(
                &encoded.manifest.to_document(),
                &encoded.index.to_document(),
                &encoded.blob,
                level_set,
            ))
        }
    }
}
