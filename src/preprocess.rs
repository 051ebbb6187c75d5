//
// preprocess.rs
// dicom-bodycomp
//
// Prepares an intensity volume for the segmenter: bit-depth normalisation and the slice/resize reduction undone later by `restore`.
//
// Thales Matheus Mendonça Santos - November 2025

use ndarray::{s, Array3, ArrayView3};
use tracing::{debug, info};

use crate::error::{BodyCompError, Result};
use crate::models::{IntensityVolume, RestorationMode, SliceInterval};
use crate::resample::{scale_factors, zoom_nearest, zoomed_len};
use crate::restore::CROP_MARGIN;

const FULL_RANGE_15_BIT: f32 = 65535.0;
const FULL_RANGE_11_BIT: f32 = 4095.0;

/// Default per-axis factor when resize mode has no explicit target shape.
pub const DEFAULT_RESIZE_FACTOR: f64 = 0.5;

/// Scale intensities to `[0, 1]` given the series' High Bit.
///
/// 15 and 11 use the full detector range as the upper bound; any other value
/// falls back to the volume's own maximum.
pub fn normalize_0_1(volume: ArrayView3<f32>, high_bit: u16) -> IntensityVolume {
    let min = volume.iter().copied().fold(f32::INFINITY, f32::min);
    let upper = match high_bit {
        15 => FULL_RANGE_15_BIT,
        11 => FULL_RANGE_11_BIT,
        _ => volume.iter().copied().fold(f32::NEG_INFINITY, f32::max),
    };
    debug!(high_bit, min, upper, "normalizing intensities");
    let span = upper - min;
    volume.mapv(|v| (v - min) / span)
}

/// Shape the model sees for a volume of `original_shape`.
pub fn reduced_shape(
    original_shape: [usize; 3],
    mode: RestorationMode,
    interval: SliceInterval,
    resize_shape: Option<[usize; 3]>,
) -> [usize; 3] {
    match mode {
        RestorationMode::Slice => [
            interval.len(),
            original_shape[1].saturating_sub(2 * CROP_MARGIN),
            original_shape[2],
        ],
        RestorationMode::Resize => resize_shape.unwrap_or([
            zoomed_len(interval.len(), DEFAULT_RESIZE_FACTOR),
            zoomed_len(original_shape[1], DEFAULT_RESIZE_FACTOR),
            zoomed_len(original_shape[2], DEFAULT_RESIZE_FACTOR),
        ]),
    }
}

/// Cut (and for resize mode, resample) a normalised volume to the model input.
pub fn reduce(
    volume: ArrayView3<f32>,
    mode: RestorationMode,
    interval: SliceInterval,
    resize_shape: Option<[usize; 3]>,
) -> Result<Array3<f32>> {
    let (depth, height, width) = volume.dim();
    interval.check_within(depth)?;
    info!(%mode, %interval, "reducing volume for prediction");

    let reduced = match mode {
        RestorationMode::Slice => {
            if height < 2 * CROP_MARGIN {
                return Err(BodyCompError::InvalidInput(format!(
                    "volume height {height} is smaller than the crop margins"
                )));
            }
            volume
                .slice(s![
                    interval.start()..interval.end(),
                    CROP_MARGIN..height - CROP_MARGIN,
                    ..
                ])
                .to_owned()
        }
        RestorationMode::Resize => {
            let block = volume.slice(s![interval.start()..interval.end(), .., ..]);
            let target = reduced_shape([depth, height, width], mode, interval, resize_shape);
            let factors = scale_factors([interval.len(), height, width], target);
            debug!(?target, ?factors, "resizing sliced block");
            zoom_nearest(block, target)
        }
    };

    info!(shape = ?reduced.shape(), "reduction complete");
    Ok(reduced)
}
