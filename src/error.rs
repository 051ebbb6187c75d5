//
// error.rs
// dicom-bodycomp
//
// Error type shared by the restoration, statistics and normal-range stages.
//
// Thales Matheus Mendonça Santos - November 2025

use dicom::core::Tag;
use thiserror::Error;

/// Errors raised by the post-prediction core.
///
/// All of them are fatal for the job that produced them: the computations are
/// deterministic, so retrying with the same input reproduces the same fault.
#[derive(Error, Debug)]
pub enum BodyCompError {
    /// Unsupported restoration mode, modality or other job setting.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A DICOM attribute is present but does not follow the expected layout,
    /// e.g. a vendor height tag that is not `HEIGHT <value> INCHES`.
    #[error("Malformed metadata: {0}")]
    MalformedMetadata(String),

    /// A volume does not have the shape the caller declared.
    #[error("Shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    /// Input that breaks a caller guarantee (empty class axis, batch != 1, ...).
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A required DICOM attribute is absent from the reference slice.
    #[error("Missing DICOM attribute {name} {tag}")]
    MissingTag { name: &'static str, tag: Tag },

    #[error("Index {index} out of range for axis of length {len}")]
    IndexOutOfRange { index: usize, len: usize },

    /// The external segmenter failed to produce probabilities.
    #[error("Segmenter failure: {0}")]
    Segmenter(String),

    #[error("Reference table error: {0}")]
    ReferenceTable(#[from] csv::Error),

    #[error("Image encoding error: {0}")]
    Image(#[from] image::ImageError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, BodyCompError>;

impl BodyCompError {
    pub(crate) fn shape_mismatch(expected: &[usize], actual: &[usize]) -> Self {
        BodyCompError::ShapeMismatch {
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        }
    }
}
