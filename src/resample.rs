//
// resample.rs
// dicom-bodycomp
//
// Order-0 (nearest-neighbour) resampling of 3D arrays, used in both directions of the reduce/restore pair.
//
// Thales Matheus Mendonça Santos - November 2025

use ndarray::{Array3, ArrayView3};

/// Per-axis ratio `target / source`, reported in logs.
pub fn scale_factors(source: [usize; 3], target: [usize; 3]) -> [f64; 3] {
    let mut factors = [0.0; 3];
    for axis in 0..3 {
        factors[axis] = target[axis] as f64 / source[axis] as f64;
    }
    factors
}

/// Source index sampled for each output index along one axis.
///
/// End points are aligned: output `0` maps to input `0` and output `n_out - 1`
/// maps to input `n_in - 1`, with rounding half up in between.
fn axis_lookup(n_in: usize, n_out: usize) -> Vec<usize> {
    if n_in == 0 {
        return Vec::new();
    }
    if n_out <= 1 {
        return vec![0; n_out];
    }
    let step = (n_in - 1) as f64 / (n_out - 1) as f64;
    (0..n_out)
        .map(|o| {
            let idx = (o as f64 * step + 0.5).floor() as usize;
            idx.min(n_in - 1)
        })
        .collect()
}

/// Resample `input` to `target` by copying the nearest source voxel.
///
/// Never blends values, so label arrays only ever contain labels that were
/// present in the input.
pub fn zoom_nearest<T: Copy + Default>(input: ArrayView3<T>, target: [usize; 3]) -> Array3<T> {
    let (d, h, w) = input.dim();
    if d == 0 || h == 0 || w == 0 {
        return Array3::default((target[0], target[1], target[2]));
    }
    let zs = axis_lookup(d, target[0]);
    let ys = axis_lookup(h, target[1]);
    let xs = axis_lookup(w, target[2]);

    Array3::from_shape_fn((target[0], target[1], target[2]), |(z, y, x)| {
        input[[zs[z], ys[y], xs[x]]]
    })
}

/// Output length produced by zooming an axis of `len` voxels by `factor`.
///
/// Halves round to even, so a 5-voxel axis halved gives 2 voxels.
pub fn zoomed_len(len: usize, factor: f64) -> usize {
    (len as f64 * factor).round_ties_even() as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    #[test]
    fn identity_when_shapes_match() {
        let input = Array3::from_shape_fn((3, 4, 5), |(z, y, x)| (z * 100 + y * 10 + x) as u16);
        let out = zoom_nearest(input.view(), [3, 4, 5]);
        assert_eq!(out, input);
    }

    #[test]
    fn upsampling_repeats_voxels_and_keeps_endpoints() {
        let input = Array3::from_shape_vec((1, 1, 2), vec![1u8, 2]).unwrap();
        let out = zoom_nearest(input.view(), [1, 1, 4]);
        // 0 -> 0, 1 -> 0.33, 2 -> 0.67, 3 -> 1
        assert_eq!(out.as_slice().unwrap(), &[1, 1, 2, 2]);
    }

    #[test]
    fn downsampling_picks_existing_values_only() {
        let input = Array3::from_shape_fn((8, 6, 6), |(z, y, x)| ((z + y + x) % 3) as u8);
        let out = zoom_nearest(input.view(), [3, 4, 2]);
        assert_eq!(out.dim(), (3, 4, 2));
        assert!(out.iter().all(|v| *v < 3));
    }

    #[test]
    fn factors_follow_target_over_source() {
        let f = scale_factors([240, 256, 320], [240, 260, 320]);
        assert_eq!(f[0], 1.0);
        assert!((f[1] - 260.0 / 256.0).abs() < 1e-12);
        assert_eq!(zoomed_len(556, 0.5), 278);
        assert_eq!(zoomed_len(5, 0.5), 2);
        assert_eq!(zoomed_len(7, 0.5), 4);
    }
}
