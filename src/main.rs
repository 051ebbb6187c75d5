//
// main.rs
// dicom-bodycomp
//
// Installs the log subscriber and hands off to the CLI layer.
//
// Thales Matheus Mendonça Santos - November 2025

use dicom_bodycomp::cli;
use tracing_subscriber::{fmt, EnvFilter};

fn main() -> anyhow::Result<()> {
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();
    cli::run()
}
