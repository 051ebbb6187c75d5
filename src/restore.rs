//
// restore.rs
// dicom-bodycomp
//
// Puts a reduced-size label prediction back onto the original acquisition grid, by padding (slice mode) or by nearest-neighbour resampling (resize mode).
//
// Thales Matheus Mendonça Santos - November 2025

use ndarray::{s, Array3, ArrayView3};
use tracing::{debug, info};

use crate::error::{BodyCompError, Result};
use crate::models::{LabelVolume, RestorationMode, SliceInterval, BACKGROUND_LABEL};
use crate::resample::{scale_factors, zoom_nearest};

/// Voxels trimmed from each side of the height axis by slice-mode reduction.
pub const CROP_MARGIN: usize = 2;

/// Undo a slice-mode reduction.
///
/// `reduced` must be `(interval.len(), height - 2 * CROP_MARGIN, width)`. The
/// crop margin and every slice outside `interval` come back as background:
/// the model never saw them.
pub fn restore_slice(
    reduced: ArrayView3<u8>,
    interval: SliceInterval,
    original_shape: [usize; 3],
) -> Result<LabelVolume> {
    let [depth, height, width] = original_shape;
    interval.check_within(depth)?;

    if height < 2 * CROP_MARGIN {
        return Err(BodyCompError::InvalidConfiguration(format!(
            "original height {height} is smaller than the crop margins"
        )));
    }
    let expected = [interval.len(), height - 2 * CROP_MARGIN, width];
    if reduced.shape() != expected {
        return Err(BodyCompError::shape_mismatch(&expected, reduced.shape()));
    }

    let mut restored = Array3::from_elem((depth, height, width), BACKGROUND_LABEL);
    restored
        .slice_mut(s![
            interval.start()..interval.end(),
            CROP_MARGIN..height - CROP_MARGIN,
            ..
        ])
        .assign(&reduced);

    debug!(
        head = interval.start(),
        block = interval.len(),
        foot = depth - interval.end(),
        "slice restoration padded prediction"
    );
    Ok(restored)
}

/// Undo a resize-mode reduction.
///
/// The prediction is resampled (order 0) to `(interval.len(), height, width)`
/// and placed at `interval`; uncovered slices stay background.
pub fn restore_resize(
    reduced: ArrayView3<u8>,
    interval: SliceInterval,
    original_shape: [usize; 3],
) -> Result<LabelVolume> {
    let [depth, height, width] = original_shape;
    interval.check_within(depth)?;

    let (rd, rh, rw) = reduced.dim();
    if rd == 0 || rh == 0 || rw == 0 {
        return Err(BodyCompError::InvalidInput(format!(
            "cannot resize an empty prediction of shape {:?}",
            reduced.shape()
        )));
    }

    let target = [interval.len(), height, width];
    let factors = scale_factors([rd, rh, rw], target);
    info!(?target, ?factors, "resizing prediction to original geometry");

    let resized = zoom_nearest(reduced, target);
    if !interval.is_strict_subset_of(depth) {
        debug!("prediction covers the whole depth, no padding");
        return Ok(resized);
    }

    debug!(%interval, depth, "prediction was sliced, padding uncovered slices");
    let mut restored = Array3::from_elem((depth, height, width), BACKGROUND_LABEL);
    restored
        .slice_mut(s![interval.start()..interval.end(), .., ..])
        .assign(&resized);
    Ok(restored)
}

/// Restore `reduced` with the strategy selected for the job and verify the
/// result matches `original_shape`.
pub fn restore_to_original_dims(
    reduced: ArrayView3<u8>,
    mode: RestorationMode,
    interval: SliceInterval,
    original_shape: [usize; 3],
) -> Result<LabelVolume> {
    info!(
        %mode,
        reduced = ?reduced.shape(),
        original = ?original_shape,
        "restoring prediction to original dimensions"
    );
    let restored = match mode {
        RestorationMode::Slice => restore_slice(reduced, interval, original_shape)?,
        RestorationMode::Resize => restore_resize(reduced, interval, original_shape)?,
    };

    if restored.shape() != original_shape {
        return Err(BodyCompError::shape_mismatch(&original_shape, restored.shape()));
    }
    Ok(restored)
}
