//
// config.rs
// dicom-bodycomp
//
// Per-job JSON configuration: inputs, restoration settings, colours and reference tables.
//
// Thales Matheus Mendonça Santos - November 2025

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::confidence::ProbabilityLayout;
use crate::error::BodyCompError;
use crate::models::{RestorationMode, SliceInterval, TissueModality};
use crate::overlay::OverlayColors;

/// Female and male normal-range sheets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceTablePaths {
    pub female: PathBuf,
    pub male: PathBuf,
}

/// Everything needed to post-process one prediction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobConfig {
    pub sample_id: String,
    pub modality: TissueModality,
    #[serde(default)]
    pub restoration_mode: RestorationMode,
    pub slice_interval: SliceInterval,
    /// Model input shape for resize mode; half size per axis when absent.
    #[serde(default)]
    pub resize_shape: Option<[usize; 3]>,
    /// Directory with the source DICOM series.
    pub dicom_dir: PathBuf,
    /// NIfTI export of the same acquisition to take intensities from.
    #[serde(default)]
    pub nifti_volume: Option<PathBuf>,
    /// `.npy` probability tensor written by the segmenter.
    pub predictions: PathBuf,
    #[serde(default)]
    pub probability_layout: ProbabilityLayout,
    #[serde(default)]
    pub colors: OverlayColors,
    pub reference_tables: ReferenceTablePaths,
    pub output_dir: PathBuf,
    /// Name the observation files derive from; `<sample_id>.json` by default.
    #[serde(default)]
    pub output_filename: Option<String>,
}

impl JobConfig {
    /// Read a job file. Relative paths inside it are taken from the file's directory.
    pub fn from_file(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Failed to open job config {:?}", path))?;
        let mut config: JobConfig = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("Failed to parse job config {:?}", path))?;
        if let Some(base) = path.parent() {
            config.resolve_paths(base);
        }
        config.validate()?;
        Ok(config)
    }

    fn resolve_paths(&mut self, base: &Path) {
        for path in [
            &mut self.dicom_dir,
            &mut self.predictions,
            &mut self.output_dir,
            &mut self.reference_tables.female,
            &mut self.reference_tables.male,
        ] {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
        if let Some(path) = self.nifti_volume.as_mut().filter(|p| p.is_relative()) {
            *path = base.join(&*path);
        }
    }

    pub fn validate(&self) -> Result<(), BodyCompError> {
        if self.sample_id.trim().is_empty() {
            return Err(BodyCompError::InvalidConfiguration(
                "sample_id must not be empty".to_string(),
            ));
        }
        if let Some(shape) = self.resize_shape {
            if self.restoration_mode != RestorationMode::Resize {
                return Err(BodyCompError::InvalidConfiguration(
                    "resize_shape is only used by the resize restoration mode".to_string(),
                ));
            }
            if shape.contains(&0) {
                return Err(BodyCompError::InvalidConfiguration(format!(
                    "resize_shape {shape:?} has an empty axis"
                )));
            }
        }
        Ok(())
    }

    pub fn output_filename(&self) -> String {
        self.output_filename
            .clone()
            .unwrap_or_else(|| format!("{}.json", self.sample_id))
    }
}
