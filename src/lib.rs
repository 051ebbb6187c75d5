//
// lib.rs
// dicom-bodycomp
//
// Exposes the pipeline modules and re-exports the CLI entry point for both binary and library consumers.
//
// Thales Matheus Mendonça Santos - November 2025

pub mod batch;
pub mod cli;
pub mod confidence;
pub mod config;
pub mod dicom_access;
pub mod dicom_writer;
pub mod error;
pub mod metadata;
pub mod models;
pub mod normal_range;
pub mod observation;
pub mod overlay;
pub mod postprocess;
pub mod preprocess;
pub mod resample;
pub mod restore;
pub mod series;
pub mod stats;

pub use cli::{run as run_cli, Cli, Commands};
pub use error::{BodyCompError, Result};
