//
// models.rs
// dicom-bodycomp
//
// Shared data structures: volumes, slice intervals, job enums, per-series metadata and computed statistics.
//
// Thales Matheus Mendonça Santos - November 2025

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use ndarray::Array3;
use serde::{Deserialize, Serialize};

use crate::error::{BodyCompError, Result};

/// Per-voxel class labels in `(depth, height, width)` order.
pub type LabelVolume = Array3<u8>;

/// Normalised or raw intensities in `(depth, height, width)` order.
pub type IntensityVolume = Array3<f32>;

pub const BACKGROUND_LABEL: u8 = 0;
pub const MUSCLE_LABEL: u8 = 1;
pub const VAT_LABEL: u8 = 1;
pub const ASAT_LABEL: u8 = 2;

/// Half-open range `[start, end)` of depth indices into the original volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "[usize; 2]", into = "[usize; 2]")]
pub struct SliceInterval {
    start: usize,
    end: usize,
}

impl SliceInterval {
    pub fn new(start: usize, end: usize) -> Result<Self> {
        if start >= end {
            return Err(BodyCompError::InvalidConfiguration(format!(
                "slice interval [{start}, {end}) is empty"
            )));
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> usize {
        self.start
    }

    pub fn end(&self) -> usize {
        self.end
    }

    /// Number of depth slices covered by the interval.
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    /// True when the interval leaves slices uncovered on either side.
    pub fn is_strict_subset_of(&self, depth: usize) -> bool {
        self.start > 0 || self.end < depth
    }

    /// Fails when the interval reaches past the last slice of a volume of `depth` slices.
    pub fn check_within(&self, depth: usize) -> Result<()> {
        if self.end > depth {
            return Err(BodyCompError::InvalidConfiguration(format!(
                "slice interval [{}, {}) exceeds volume depth {}",
                self.start, self.end, depth
            )));
        }
        Ok(())
    }
}

impl TryFrom<[usize; 2]> for SliceInterval {
    type Error = BodyCompError;

    fn try_from(value: [usize; 2]) -> Result<Self> {
        SliceInterval::new(value[0], value[1])
    }
}

impl From<SliceInterval> for [usize; 2] {
    fn from(value: SliceInterval) -> Self {
        [value.start, value.end]
    }
}

impl fmt::Display for SliceInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// How the model input was reduced, and therefore how predictions are restored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RestorationMode {
    #[default]
    Slice,
    Resize,
}

impl FromStr for RestorationMode {
    type Err = BodyCompError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "slice" => Ok(RestorationMode::Slice),
            "resize" => Ok(RestorationMode::Resize),
            other => Err(BodyCompError::InvalidConfiguration(format!(
                "restoration mode can only be 'slice' or 'resize', got '{other}'"
            ))),
        }
    }
}

impl fmt::Display for RestorationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RestorationMode::Slice => f.write_str("slice"),
            RestorationMode::Resize => f.write_str("resize"),
        }
    }
}

/// Tissue family the segmenter was trained for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TissueModality {
    Muscle,
    Fat,
}

impl TissueModality {
    /// Foreground labels meaningful for this modality, paired with their names.
    pub fn labels(&self) -> &'static [(u8, &'static str)] {
        match self {
            TissueModality::Muscle => &[(MUSCLE_LABEL, "muscle")],
            TissueModality::Fat => &[(VAT_LABEL, "vat"), (ASAT_LABEL, "asat")],
        }
    }
}

impl FromStr for TissueModality {
    type Err = BodyCompError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "MUSCLE" => Ok(TissueModality::Muscle),
            "FAT" => Ok(TissueModality::Fat),
            _ => Err(BodyCompError::InvalidConfiguration(format!(
                "invalid modality '{s}', valid entries are MUSCLE or FAT"
            ))),
        }
    }
}

impl fmt::Display for TissueModality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TissueModality::Muscle => f.write_str("MUSCLE"),
            TissueModality::Fat => f.write_str("FAT"),
        }
    }
}

/// Attributes of the first slice of a series that the statistics and
/// normal-range stages depend on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DicomMetadata {
    /// Row and column spacing in mm.
    pub pixel_spacing: [f64; 2],
    pub slice_thickness: f64,
    pub manufacturer: String,
    /// Kilograms.
    pub patient_weight: f64,
    /// Metres, as stored in Patient's Size.
    pub patient_size: Option<f64>,
    /// Free text; one vendor stores `HEIGHT <inches> INCHES` here.
    pub additional_patient_history: Option<String>,
    pub patient_age: String,
    pub patient_sex: String,
    pub acquisition_date: String,
    pub patient_name: String,
    pub patient_id: String,
    pub accession_number: String,
}

/// Metric names used as keys in [`Stats`].
pub mod metric {
    pub const PATIENT_WEIGHT: &str = "patient_weight";
    pub const MUSCLE_VOLUME: &str = "muscle_volume";
    pub const MUSCLE_RATIO: &str = "muscle_ratio";
    pub const SAT_VOLUME: &str = "sat_volume";
    pub const VAT_VOLUME: &str = "vat_volume";
    pub const VAT_INDEX: &str = "vat_index";
    pub const VAT_RATIO: &str = "vat_ratio";
    pub const HEIGHT_METERS: &str = "height_meters";
}

/// Display-ready clinical metrics for one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    pub manufacturer: String,
    /// Coronal row used for the report snapshot.
    pub display_slice: usize,
    pub values: BTreeMap<String, String>,
}

impl Stats {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }
}
