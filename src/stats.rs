//
// stats.rs
// dicom-bodycomp
//
// Derives tissue volumes, ratios and indices from a restored label volume and the series' geometric metadata.
//
// Thales Matheus Mendonça Santos - November 2025

use std::collections::BTreeMap;

use ndarray::ArrayView3;
use tracing::{debug, info};

use crate::error::{BodyCompError, Result};
use crate::models::{metric, DicomMetadata, Stats, TissueModality, ASAT_LABEL, MUSCLE_LABEL, VAT_LABEL};

/// Coronal row used for the report snapshot.
pub const DEFAULT_DISPLAY_SLICE: usize = 130;

const MM3_TO_LITERS: f64 = 1e-6;
const INCH_TO_METERS: f64 = 0.0254;

/// How a manufacturer records patient height.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeightEncoding {
    /// Patient's Size (0010,1020), already in metres.
    Meters,
    /// Additional Patient History (0010,21B0) holding `HEIGHT <inches> INCHES`.
    InchesText,
}

/// Vendors that deviate from [`HeightEncoding::Meters`].
const HEIGHT_ENCODINGS: &[(&str, HeightEncoding)] =
    &[("GE MEDICAL SYSTEMS", HeightEncoding::InchesText)];

pub fn height_encoding_for(manufacturer: &str) -> HeightEncoding {
    HEIGHT_ENCODINGS
        .iter()
        .find(|(name, _)| *name == manufacturer)
        .map(|(_, encoding)| *encoding)
        .unwrap_or(HeightEncoding::Meters)
}

impl HeightEncoding {
    /// Patient height in metres.
    pub fn resolve(&self, meta: &DicomMetadata) -> Result<f64> {
        match self {
            HeightEncoding::Meters => meta.patient_size.ok_or_else(|| {
                BodyCompError::MalformedMetadata(format!(
                    "Patient's Size is required for manufacturer '{}'",
                    meta.manufacturer
                ))
            }),
            HeightEncoding::InchesText => {
                let text = meta.additional_patient_history.as_deref().unwrap_or("");
                parse_height_inches(text).map(|inches| inches as f64 * INCH_TO_METERS)
            }
        }
    }
}

/// Parse `HEIGHT <inches> INCHES`.
pub fn parse_height_inches(text: &str) -> Result<i64> {
    let malformed = || {
        BodyCompError::MalformedMetadata(format!(
            "invalid height tag '{text}', should be: HEIGHT (value) INCHES"
        ))
    };

    let tokens: Vec<&str> = text.split_whitespace().collect();
    if tokens.len() != 3 || tokens[0] != "HEIGHT" || tokens[2] != "INCHES" {
        return Err(malformed());
    }
    tokens[1].parse::<i64>().map_err(|_| malformed())
}

/// Physical volume of one voxel in litres.
pub fn voxel_volume_liters(meta: &DicomMetadata) -> f64 {
    meta.pixel_spacing[0] * meta.pixel_spacing[1] * meta.slice_thickness * MM3_TO_LITERS
}

pub fn count_label(labels: ArrayView3<u8>, label: u8) -> usize {
    labels.iter().filter(|v| **v == label).count()
}

/// Fixed-point rendering; non-finite values print as `inf`, `-inf` and `nan`.
pub fn format_fixed(value: f64, places: usize) -> String {
    if value.is_nan() {
        "nan".to_string()
    } else if value.is_infinite() {
        let sign = if value > 0.0 { "" } else { "-" };
        format!("{sign}inf")
    } else {
        format!("{value:.places$}")
    }
}

/// Compute the report metrics for `labels`.
///
/// Ratios are not guarded against empty tissue: a volume with no muscle voxels
/// yields an `inf` muscle ratio.
pub fn calculate_stats(
    labels: ArrayView3<u8>,
    meta: &DicomMetadata,
    modality: TissueModality,
) -> Result<Stats> {
    let voxel_volume = voxel_volume_liters(meta);
    debug!(voxel_volume, shape = ?labels.shape(), "calculating stats");

    let mut values = BTreeMap::new();
    values.insert(
        metric::PATIENT_WEIGHT.to_string(),
        format_fixed(meta.patient_weight, 0),
    );

    match modality {
        TissueModality::Muscle => {
            let muscle_volume = count_label(labels, MUSCLE_LABEL) as f64 * voxel_volume;
            let muscle_ratio = meta.patient_weight / muscle_volume;
            info!(muscle_volume, muscle_ratio, "muscle stats");

            values.insert(metric::MUSCLE_VOLUME.to_string(), format_fixed(muscle_volume, 2));
            values.insert(metric::MUSCLE_RATIO.to_string(), format_fixed(muscle_ratio, 2));
        }
        TissueModality::Fat => {
            let sat_volume = count_label(labels, ASAT_LABEL) as f64 * voxel_volume;
            let vat_volume = count_label(labels, VAT_LABEL) as f64 * voxel_volume;

            let height_meters = height_encoding_for(&meta.manufacturer).resolve(meta)?;
            let vat_index = vat_volume / (height_meters * height_meters);
            let vat_ratio = vat_volume / (vat_volume + sat_volume) * 100.0;
            info!(sat_volume, vat_volume, vat_index, vat_ratio, height_meters, "fat stats");

            values.insert(metric::SAT_VOLUME.to_string(), format_fixed(sat_volume, 2));
            values.insert(metric::VAT_VOLUME.to_string(), format_fixed(vat_volume, 2));
            values.insert(metric::VAT_INDEX.to_string(), format_fixed(vat_index, 2));
            values.insert(metric::VAT_RATIO.to_string(), format_fixed(vat_ratio, 2));
            values.insert(metric::HEIGHT_METERS.to_string(), format_fixed(height_meters, 2));
        }
    }

    Ok(Stats {
        manufacturer: meta.manufacturer.clone(),
        display_slice: DEFAULT_DISPLAY_SLICE,
        values,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    fn metadata(manufacturer: &str, weight: f64) -> DicomMetadata {
        DicomMetadata {
            pixel_spacing: [1.0, 1.0],
            slice_thickness: 1.0,
            manufacturer: manufacturer.to_string(),
            patient_weight: weight,
            patient_size: Some(1.68),
            additional_patient_history: None,
            patient_age: "045Y".to_string(),
            patient_sex: "F".to_string(),
            acquisition_date: "20240101".to_string(),
            patient_name: "Doe^Jane".to_string(),
            patient_id: "PAT1".to_string(),
            accession_number: "ACC1".to_string(),
        }
    }

    fn fat_labels() -> Array3<u8> {
        let mut labels = Array3::zeros((3, 3, 3));
        for z in 0..3 {
            labels[[z, 1, 1]] = VAT_LABEL;
            labels[[z, 2, 2]] = ASAT_LABEL;
        }
        labels
    }

    #[test]
    fn fat_stats_for_single_voxel_columns() {
        let stats = calculate_stats(
            fat_labels().view(),
            &metadata("Siemens", 71.0),
            TissueModality::Fat,
        )
        .unwrap();

        assert_eq!(stats.manufacturer, "Siemens");
        assert_eq!(stats.display_slice, DEFAULT_DISPLAY_SLICE);
        assert_eq!(stats.get(metric::SAT_VOLUME), Some("0.00"));
        assert_eq!(stats.get(metric::VAT_VOLUME), Some("0.00"));
        assert_eq!(stats.get(metric::PATIENT_WEIGHT), Some("71"));
        assert_eq!(stats.get(metric::VAT_INDEX), Some("0.00"));
        assert_eq!(stats.get(metric::VAT_RATIO), Some("50.00"));
        assert_eq!(stats.get(metric::HEIGHT_METERS), Some("1.68"));
        assert_eq!(stats.get(metric::MUSCLE_VOLUME), None);
    }

    #[test]
    fn muscle_ratio_is_not_guarded_against_tiny_volumes() {
        let mut labels = Array3::zeros((2, 2, 2));
        labels[[0, 1, 1]] = MUSCLE_LABEL;
        labels[[1, 1, 1]] = MUSCLE_LABEL;

        let stats = calculate_stats(
            labels.view(),
            &metadata("Siemens", 58.0),
            TissueModality::Muscle,
        )
        .unwrap();
        assert_eq!(stats.get(metric::PATIENT_WEIGHT), Some("58"));
        assert_eq!(stats.get(metric::MUSCLE_VOLUME), Some("0.00"));
        // 58 kg over 2 mm^3
        assert_eq!(stats.get(metric::MUSCLE_RATIO), Some("29000000.00"));
    }

    #[test]
    fn empty_muscle_volume_propagates_infinity() {
        let labels = Array3::<u8>::zeros((2, 2, 2));
        let stats = calculate_stats(
            labels.view(),
            &metadata("Siemens", 58.0),
            TissueModality::Muscle,
        )
        .unwrap();
        assert_eq!(stats.get(metric::MUSCLE_RATIO), Some("inf"));
    }

    #[test]
    fn empty_fat_volume_gives_nan_ratio() {
        let labels = Array3::<u8>::zeros((2, 2, 2));
        let stats =
            calculate_stats(labels.view(), &metadata("Siemens", 70.0), TissueModality::Fat).unwrap();
        assert_eq!(stats.get(metric::VAT_RATIO), Some("nan"));
    }

    #[test]
    fn stats_are_deterministic() {
        let meta = metadata("Siemens", 71.0);
        let a = calculate_stats(fat_labels().view(), &meta, TissueModality::Fat).unwrap();
        let b = calculate_stats(fat_labels().view(), &meta, TissueModality::Fat).unwrap();
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
    }

    #[test]
    fn ge_height_is_read_from_inches_text() {
        let mut meta = metadata("GE MEDICAL SYSTEMS", 80.0);
        meta.patient_size = None;
        meta.additional_patient_history = Some("HEIGHT 66 INCHES".to_string());

        let stats = calculate_stats(fat_labels().view(), &meta, TissueModality::Fat).unwrap();
        // 66 in = 1.6764 m
        assert_eq!(stats.get(metric::HEIGHT_METERS), Some("1.68"));
    }

    #[test]
    fn malformed_ge_height_is_rejected() {
        let mut meta = metadata("GE MEDICAL SYSTEMS", 80.0);
        meta.additional_patient_history = Some("HEIGHT 170 CM".to_string());
        assert!(matches!(
            calculate_stats(fat_labels().view(), &meta, TissueModality::Fat),
            Err(BodyCompError::MalformedMetadata(_))
        ));

        assert!(parse_height_inches("WEIGHT 66 INCHES").is_err());
        assert!(parse_height_inches("HEIGHT INCHES").is_err());
        assert!(parse_height_inches("HEIGHT sixty INCHES").is_err());
        assert_eq!(parse_height_inches("HEIGHT 70 INCHES").unwrap(), 70);
    }

    #[test]
    fn muscle_stats_do_not_need_height() {
        let mut meta = metadata("Philips", 58.0);
        meta.patient_size = None;
        assert!(calculate_stats(fat_labels().view(), &meta, TissueModality::Muscle).is_ok());
        assert!(calculate_stats(fat_labels().view(), &meta, TissueModality::Fat).is_err());
    }

    #[test]
    fn voxel_volume_uses_spacing_and_thickness() {
        let mut meta = metadata("Siemens", 70.0);
        meta.pixel_spacing = [0.5, 2.0];
        meta.slice_thickness = 3.0;
        approx::assert_relative_eq!(voxel_volume_liters(&meta), 3e-6);
    }
}
