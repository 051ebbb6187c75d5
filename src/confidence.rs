//
// confidence.rs
// dicom-bodycomp
//
// Collapses per-class probabilities into a label volume and defines the adapter boundary for external segmenters.
//
// Thales Matheus Mendonça Santos - November 2025

use ndarray::{Array3, Array5, ArrayView3, ArrayView5, Axis};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{BodyCompError, Result};
use crate::models::LabelVolume;

/// Axis order of a segmenter's output tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbabilityLayout {
    /// `(batch, classes, depth, height, width)`.
    #[default]
    ClassesFirst,
    /// `(batch, depth, height, width, classes)`.
    ClassesLast,
}

/// Bring a probability tensor into the `(batch, classes, depth, height, width)`
/// order expected by [`select_most_confident`].
pub fn normalize_layout(probabilities: Array5<f32>, layout: ProbabilityLayout) -> Array5<f32> {
    match layout {
        ProbabilityLayout::ClassesFirst => probabilities,
        ProbabilityLayout::ClassesLast => probabilities.permuted_axes([0, 4, 1, 2, 3]),
    }
}

/// Arg-max over the class axis of a `(1, classes, depth, height, width)` tensor.
///
/// Ties resolve to the lowest class index. A NaN probability counts as the
/// maximum, so the first NaN class wins.
pub fn select_most_confident(probabilities: ArrayView5<f32>) -> Result<LabelVolume> {
    let shape = probabilities.shape();
    if shape[0] != 1 {
        return Err(BodyCompError::InvalidInput(format!(
            "expected a batch of one prediction, got {}",
            shape[0]
        )));
    }
    let classes = shape[1];
    if classes == 0 {
        return Err(BodyCompError::InvalidInput(
            "probability tensor has an empty class axis".to_string(),
        ));
    }
    if classes > usize::from(u8::MAX) + 1 {
        return Err(BodyCompError::InvalidInput(format!(
            "{classes} classes do not fit in an 8-bit label volume"
        )));
    }

    let per_class = probabilities.index_axis(Axis(0), 0);
    let (depth, height, width) = (shape[2], shape[3], shape[4]);
    debug!(classes, depth, height, width, "selecting most confident class");

    // A NaN outranks every number; the first one wins.
    let labels = Array3::from_shape_fn((depth, height, width), |(z, y, x)| {
        let mut best = 0usize;
        let mut best_p = per_class[[0, z, y, x]];
        for c in 1..classes {
            if best_p.is_nan() {
                break;
            }
            let p = per_class[[c, z, y, x]];
            if p.is_nan() || p > best_p {
                best = c;
                best_p = p;
            }
        }
        best as u8
    });
    Ok(labels)
}

/// A volumetric segmentation model treated as a black box.
///
/// Implementations declare the layout of what they return; callers go through
/// [`segment`] so the layout never leaks past this module.
pub trait Segmenter {
    fn layout(&self) -> ProbabilityLayout;

    /// Per-class probabilities for a normalised, reduced volume.
    fn predict(&self, volume: ArrayView3<f32>) -> Result<Array5<f32>>;
}

/// Run `segmenter` and return its probabilities as `(1, classes, depth, height, width)`.
///
/// The spatial axes must match `volume`.
pub fn predict_probabilities<S: Segmenter + ?Sized>(
    segmenter: &S,
    volume: ArrayView3<f32>,
) -> Result<Array5<f32>> {
    info!(shape = ?volume.shape(), "running segmenter");
    let raw = segmenter.predict(volume)?;
    let probabilities = normalize_layout(raw, segmenter.layout());
    if &probabilities.shape()[2..] != volume.shape() {
        return Err(BodyCompError::shape_mismatch(
            volume.shape(),
            &probabilities.shape()[2..],
        ));
    }
    Ok(probabilities)
}

/// Run `segmenter` and reduce its output to labels.
pub fn segment<S: Segmenter + ?Sized>(segmenter: &S, volume: ArrayView3<f32>) -> Result<LabelVolume> {
    let probabilities = predict_probabilities(segmenter, volume)?;
    select_most_confident(probabilities.view())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array3, Array5};

    #[test]
    fn selector_output_drops_batch_and_class_axes() {
        let probabilities = Array5::from_shape_fn((1, 3, 240, 256, 320), |(_, c, z, y, x)| {
            ((c * 31 + z * 7 + y * 3 + x) % 11) as f32
        });
        let labels = select_most_confident(probabilities.view()).unwrap();
        assert_eq!(labels.dim(), (240, 256, 320));
    }

    #[test]
    fn selector_picks_highest_probability() {
        let mut probabilities = Array5::<f32>::zeros((1, 3, 1, 1, 3));
        probabilities[[0, 0, 0, 0, 0]] = 0.7;
        probabilities[[0, 2, 0, 0, 1]] = 0.9;
        probabilities[[0, 1, 0, 0, 2]] = 0.4;
        probabilities[[0, 2, 0, 0, 2]] = 0.4;

        let labels = select_most_confident(probabilities.view()).unwrap();
        assert_eq!(labels.as_slice().unwrap(), &[0, 2, 1]);
    }

    #[test]
    fn selector_lets_the_first_nan_win() {
        let mut probabilities = Array5::<f32>::zeros((1, 3, 1, 1, 3));
        probabilities[[0, 0, 0, 0, 0]] = 0.9;
        probabilities[[0, 1, 0, 0, 0]] = f32::NAN;
        probabilities[[0, 2, 0, 0, 0]] = f32::NAN;
        probabilities[[0, 0, 0, 0, 1]] = f32::NAN;
        probabilities[[0, 2, 0, 0, 1]] = 0.9;
        probabilities[[0, 2, 0, 0, 2]] = f32::NAN;

        let labels = select_most_confident(probabilities.view()).unwrap();
        assert_eq!(labels.as_slice().unwrap(), &[1, 0, 2]);
    }

    #[test]
    fn selector_rejects_batches_and_empty_classes() {
        let batch = Array5::<f32>::zeros((2, 3, 1, 1, 1));
        assert!(matches!(
            select_most_confident(batch.view()),
            Err(BodyCompError::InvalidInput(_))
        ));
        let empty = Array5::<f32>::zeros((1, 0, 1, 1, 1));
        assert!(matches!(
            select_most_confident(empty.view()),
            Err(BodyCompError::InvalidInput(_))
        ));
    }

    struct ChannelsLastStub;

    impl Segmenter for ChannelsLastStub {
        fn layout(&self) -> ProbabilityLayout {
            ProbabilityLayout::ClassesLast
        }

        fn predict(&self, volume: ArrayView3<f32>) -> Result<Array5<f32>> {
            let (d, h, w) = volume.dim();
            // class 1 wins wherever intensity exceeds one half
            Ok(Array5::from_shape_fn((1, d, h, w, 2), |(_, z, y, x, c)| {
                let v = volume[[z, y, x]];
                if c == 1 {
                    v
                } else {
                    0.5
                }
            }))
        }
    }

    #[test]
    fn segment_normalizes_channels_last_output() {
        let volume = Array3::from_shape_fn((2, 3, 4), |(z, _, x)| if z == 1 && x > 1 { 0.9 } else { 0.1 });
        let labels = segment(&ChannelsLastStub, volume.view()).unwrap();
        assert_eq!(labels.dim(), (2, 3, 4));
        assert_eq!(labels[[1, 0, 3]], 1);
        assert_eq!(labels[[1, 0, 0]], 0);
        assert_eq!(labels[[0, 2, 3]], 0);
    }

    #[test]
    fn prediction_must_cover_the_input_grid() {
        let volume = Array3::<f32>::zeros((2, 3, 5));
        assert!(matches!(
            predict_probabilities(&ChannelsLastStub, volume.view()),
            Ok(p) if p.dim() == (1, 2, 2, 3, 5)
        ));

        struct WrongGrid;
        impl Segmenter for WrongGrid {
            fn layout(&self) -> ProbabilityLayout {
                ProbabilityLayout::ClassesFirst
            }
            fn predict(&self, _volume: ArrayView3<f32>) -> Result<Array5<f32>> {
                Ok(Array5::zeros((1, 2, 1, 1, 1)))
            }
        }
        assert!(matches!(
            segment(&WrongGrid, volume.view()),
            Err(BodyCompError::ShapeMismatch { .. })
        ));
    }
}
