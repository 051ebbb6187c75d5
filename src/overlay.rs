//
// overlay.rs
// dicom-bodycomp
//
// Blends tissue colour masks over grayscale slices and renders the coronal report snapshot and its caption.
//
// Thales Matheus Mendonça Santos - November 2025

use std::fmt;
use std::path::Path;

use image::imageops::{self, FilterType};
use image::{ImageFormat, Rgb, RgbImage};
use ndarray::{s, Array4, ArrayView2, ArrayView3, ArrayView4, Axis};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{BodyCompError, Result};
use crate::models::{metric, DicomMetadata, Stats, TissueModality, ASAT_LABEL, MUSCLE_LABEL, VAT_LABEL};
use crate::normal_range::{NormalRangeBand, NormalRangeRow};

/// Weight of the colour mask in the blend.
pub const OVERLAY_ALPHA: f32 = 0.3;
/// Gaussian sigma applied to the mask before blending.
pub const MASK_SIGMA: f32 = 0.9;

/// An 8-bit colour written as `"r,g,b"` in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Color(pub [u8; 3]);

impl TryFrom<String> for Color {
    type Error = BodyCompError;

    fn try_from(value: String) -> Result<Self> {
        let parts: Vec<&str> = value.split(',').map(str::trim).collect();
        let invalid =
            || BodyCompError::InvalidConfiguration(format!("colour '{value}' is not 'r,g,b'"));
        if parts.len() != 3 {
            return Err(invalid());
        }
        let mut rgb = [0u8; 3];
        for (slot, part) in rgb.iter_mut().zip(&parts) {
            *slot = part.parse().map_err(|_| invalid())?;
        }
        Ok(Color(rgb))
    }
}

impl From<Color> for String {
    fn from(value: Color) -> Self {
        value.to_string()
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{}", self.0[0], self.0[1], self.0[2])
    }
}

/// Colours for each tissue class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverlayColors {
    pub muscle_color: Color,
    pub vat_color: Color,
    pub asat_color: Color,
}

impl Default for OverlayColors {
    fn default() -> Self {
        Self {
            muscle_color: Color([119, 252, 226]),
            vat_color: Color([252, 111, 130]),
            asat_color: Color([115, 220, 255]),
        }
    }
}

/// Composites label masks onto the source intensities.
#[derive(Debug, Clone)]
pub struct OverlayCompositor {
    palette: Vec<(u8, Rgb<u8>)>,
    alpha: f32,
    sigma: f32,
}

impl OverlayCompositor {
    pub fn new(modality: TissueModality, colors: &OverlayColors) -> Self {
        let palette = match modality {
            TissueModality::Muscle => vec![(MUSCLE_LABEL, Rgb(colors.muscle_color.0))],
            TissueModality::Fat => vec![
                (VAT_LABEL, Rgb(colors.vat_color.0)),
                (ASAT_LABEL, Rgb(colors.asat_color.0)),
            ],
        };
        Self {
            palette,
            alpha: OVERLAY_ALPHA,
            sigma: MASK_SIGMA,
        }
    }

    fn color_for(&self, label: u8) -> Option<Rgb<u8>> {
        self.palette
            .iter()
            .find(|(l, _)| *l == label)
            .map(|(_, color)| *color)
    }

    /// Blend one axial slice.
    ///
    /// The slice is scaled to 8 bits by its own maximum, the mask is blurred and
    /// the two are mixed as `alpha * mask + (1 - alpha) * gray` everywhere.
    pub fn compose_slice(&self, intensity: ArrayView2<f32>, labels: ArrayView2<u8>) -> Result<RgbImage> {
        if intensity.shape() != labels.shape() {
            return Err(BodyCompError::shape_mismatch(intensity.shape(), labels.shape()));
        }
        let (rows, cols) = labels.dim();
        let max = intensity.iter().copied().fold(0.0f32, f32::max);

        let mut mask = RgbImage::new(cols as u32, rows as u32);
        for ((y, x), label) in labels.indexed_iter() {
            if let Some(color) = self.color_for(*label) {
                mask.put_pixel(x as u32, y as u32, color);
            }
        }
        let mask = imageops::blur(&mask, self.sigma);

        let mut output = RgbImage::new(cols as u32, rows as u32);
        for ((y, x), value) in intensity.indexed_iter() {
            let gray = if max > 0.0 {
                (value / max * 255.0).floor().clamp(0.0, 255.0)
            } else {
                0.0
            };
            let m = mask.get_pixel(x as u32, y as u32);
            let mut px = [0u8; 3];
            for c in 0..3 {
                let blended = self.alpha * m[c] as f32 + (1.0 - self.alpha) * gray;
                px[c] = blended.round().clamp(0.0, 255.0) as u8;
            }
            output.put_pixel(x as u32, y as u32, Rgb(px));
        }
        Ok(output)
    }

    /// Blend every axial slice; the result is `(depth, height, width, 3)`.
    pub fn compose_volume(
        &self,
        intensity: ArrayView3<f32>,
        labels: ArrayView3<u8>,
    ) -> Result<Array4<u8>> {
        if intensity.shape() != labels.shape() {
            return Err(BodyCompError::shape_mismatch(intensity.shape(), labels.shape()));
        }
        let (depth, rows, cols) = labels.dim();
        info!(depth, rows, cols, "creating overlays");

        let mut overlay = Array4::<u8>::zeros((depth, rows, cols, 3));
        for (z, mut out) in overlay.axis_iter_mut(Axis(0)).enumerate() {
            let image = self.compose_slice(
                intensity.index_axis(Axis(0), z),
                labels.index_axis(Axis(0), z),
            )?;
            for (x, y, px) in image.enumerate_pixels() {
                for c in 0..3 {
                    out[[y as usize, x as usize, c]] = px[c];
                }
            }
        }
        Ok(overlay)
    }
}

/// Image of the rows `[.., display_slice, ..]` across all slices, with the
/// width rescaled so through-plane and in-plane spacing look alike.
pub fn coronal_snapshot(
    overlay: ArrayView4<u8>,
    display_slice: usize,
    meta: &DicomMetadata,
) -> Result<RgbImage> {
    let (depth, rows, cols, _) = overlay.dim();
    if display_slice >= rows {
        return Err(BodyCompError::IndexOutOfRange {
            index: display_slice,
            len: rows,
        });
    }
    let coronal = overlay.slice(s![.., display_slice, .., ..]);
    let mut image = RgbImage::new(cols as u32, depth as u32);
    for ((z, x, c), value) in coronal.indexed_iter() {
        image.get_pixel_mut(x as u32, z as u32)[c] = *value;
    }

    // Through-plane over in-plane spacing; columns shrink by this factor.
    let factor = meta.slice_thickness / meta.pixel_spacing[1];
    let width = ((cols as f64 / factor) as u32).max(1);
    debug!(factor, width, "rescaling coronal snapshot");
    Ok(imageops::resize(&image, width, depth as u32, FilterType::Triangle))
}

pub fn save_png(image: &RgbImage, path: &Path) -> Result<()> {
    image.save_with_format(path, ImageFormat::Png)?;
    info!(?path, "snapshot saved");
    Ok(())
}

/// Text lines annotating the first axial overlay with each metric and its
/// normal range.
pub fn caption_lines(modality: TissueModality, stats: &Stats, ranges: &NormalRangeRow) -> Vec<String> {
    let value = |key: &str| stats.get(key).unwrap_or("").to_string();
    match modality {
        TissueModality::Muscle => vec![
            format!(
                "Muscle Ratio: {} Kg/L ({})",
                value(metric::MUSCLE_RATIO),
                ranges.band(NormalRangeBand::MuscleRatio)
            ),
            format!(
                "Thigh Muscle Volume: {} L ({})",
                value(metric::MUSCLE_VOLUME),
                ranges.band(NormalRangeBand::MuscleVolume)
            ),
        ],
        TissueModality::Fat => vec![
            format!(
                "VAT Index: {} L/m2 ({})",
                value(metric::VAT_INDEX),
                ranges.band(NormalRangeBand::VatIndex)
            ),
            format!(
                "VAT Ratio: {}% ({})",
                value(metric::VAT_RATIO),
                ranges.band(NormalRangeBand::VatRatio)
            ),
            format!(
                "VAT Volume: {} L ({})",
                value(metric::VAT_VOLUME),
                ranges.band(NormalRangeBand::VatVolume)
            ),
            format!(
                "ASAT Volume: {} L ({})",
                value(metric::SAT_VOLUME),
                ranges.band(NormalRangeBand::SatVolume)
            ),
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normal_range::{resolve_normal_range, ReferenceTable};
    use ndarray::{Array2, Array3};

    #[test]
    fn colors_parse_from_config_strings() {
        let color = Color::try_from("119,252,226".to_string()).unwrap();
        assert_eq!(color, Color([119, 252, 226]));
        assert_eq!(color.to_string(), "119,252,226");
        assert!(Color::try_from("1,2".to_string()).is_err());
        assert!(Color::try_from("1,2,300".to_string()).is_err());
    }

    #[test]
    fn background_is_darkened_gray_and_labels_are_tinted() {
        let compositor = OverlayCompositor::new(TissueModality::Muscle, &OverlayColors::default());
        let intensity = Array2::from_elem((9, 9), 100.0f32);
        let labels = Array2::<u8>::zeros((9, 9));

        let plain = compositor.compose_slice(intensity.view(), labels.view()).unwrap();
        // 0.7 * 255
        let px = plain.get_pixel(4, 4);
        assert!((178..=179).contains(&px[0]));
        assert_eq!(px[0], px[1]);
        assert_eq!(px[1], px[2]);

        let mut tinted_labels = Array2::<u8>::zeros((9, 9));
        tinted_labels.fill(MUSCLE_LABEL);
        let tinted = compositor
            .compose_slice(intensity.view(), tinted_labels.view())
            .unwrap();
        let px = tinted.get_pixel(4, 4);
        // 0.3 * 119 + 0.7 * 255 = 214.2
        assert!((213..=215).contains(&px[0]));
        assert!(px[1] > px[0]);
    }

    #[test]
    fn volume_overlay_keeps_geometry() {
        let compositor = OverlayCompositor::new(TissueModality::Fat, &OverlayColors::default());
        let intensity = Array3::from_shape_fn((3, 5, 4), |(z, y, x)| (z + y + x) as f32);
        let labels = Array3::from_shape_fn((3, 5, 4), |(_, y, _)| (y % 3) as u8);
        let overlay = compositor
            .compose_volume(intensity.view(), labels.view())
            .unwrap();
        assert_eq!(overlay.dim(), (3, 5, 4, 3));

        let mismatched = Array3::<u8>::zeros((3, 5, 5));
        assert!(compositor
            .compose_volume(intensity.view(), mismatched.view())
            .is_err());
    }

    #[test]
    fn caption_pairs_each_metric_with_its_band() {
        let csv = "age,sex,vat_volume,vat_ratio,vat_index,sat_volume,muscle_ratio,muscle_volume\n\
                   45,F,0.5-2.0,10-30,0.2-0.8,2-6,2.5-3.5,8-12\n";
        let table = ReferenceTable::from_csv_readers(csv.as_bytes(), csv.as_bytes()).unwrap();
        let meta = DicomMetadata {
            pixel_spacing: [1.0, 1.0],
            slice_thickness: 1.0,
            manufacturer: "Siemens".to_string(),
            patient_weight: 70.0,
            patient_size: None,
            additional_patient_history: None,
            patient_age: "045Y".to_string(),
            patient_sex: "F".to_string(),
            acquisition_date: String::new(),
            patient_name: String::new(),
            patient_id: String::new(),
            accession_number: String::new(),
        };
        let ranges = resolve_normal_range(&table, &meta).unwrap();
        let stats = Stats {
            manufacturer: "Siemens".to_string(),
            display_slice: 130,
            values: [(metric::MUSCLE_RATIO, "2.90"), (metric::MUSCLE_VOLUME, "9.75")]
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        };

        let lines = caption_lines(TissueModality::Muscle, &stats, &ranges);
        assert_eq!(
            lines,
            vec![
                "Muscle Ratio: 2.90 Kg/L (2.5-3.5)".to_string(),
                "Thigh Muscle Volume: 9.75 L (8-12)".to_string(),
            ]
        );
        assert_eq!(caption_lines(TissueModality::Fat, &stats, &ranges).len(), 4);
    }

    #[test]
    fn coronal_snapshot_rescales_width_and_checks_row() {
        let overlay = Array4::<u8>::from_elem((6, 4, 10, 3), 50);
        let meta = DicomMetadata {
            pixel_spacing: [1.0, 1.0],
            slice_thickness: 2.0,
            manufacturer: "Siemens".to_string(),
            patient_weight: 70.0,
            patient_size: None,
            additional_patient_history: None,
            patient_age: String::new(),
            patient_sex: String::new(),
            acquisition_date: String::new(),
            patient_name: String::new(),
            patient_id: String::new(),
            accession_number: String::new(),
        };
        let image = coronal_snapshot(overlay.view(), 2, &meta).unwrap();
        // 2 mm slices over 1 mm columns halve the width
        assert_eq!(image.dimensions(), (5, 6));

        let fine = DicomMetadata {
            pixel_spacing: [0.5, 0.5],
            slice_thickness: 0.25,
            ..meta.clone()
        };
        let image = coronal_snapshot(overlay.view(), 2, &fine).unwrap();
        assert_eq!(image.dimensions(), (20, 6));

        assert!(matches!(
            coronal_snapshot(overlay.view(), 4, &meta),
            Err(BodyCompError::IndexOutOfRange { index: 4, len: 4 })
        ));
    }
}
