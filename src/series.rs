//
// series.rs
// dicom-bodycomp
//
// Loads a directory of DICOM slices into an intensity volume ordered by slice location, plus the metadata of its first slice.
// NIfTI volumes are reoriented into the same slice order.
//
// Thales Matheus Mendonça Santos - November 2025

use std::cmp::Ordering;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use dicom::object::{open_file, DefaultDicomObject};
use dicom::pixeldata::PixelDecoder;
use dicom_pixeldata::{ConvertOptions, ModalityLutOption};
use ndarray::{s, stack, Array2, ArrayView3, Axis, Ix3};
use nifti::{IntoNdArray, NiftiObject, ReaderOptions};
use rayon::prelude::*;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::dicom_access::ElementAccess;
use crate::error::BodyCompError;
use crate::metadata::{extract_dicom_metadata, HIGH_BIT, SLICE_LOCATION};
use crate::models::{DicomMetadata, IntensityVolume};

/// High Bit assumed for NIfTI intensities, which carry no such attribute.
pub const NIFTI_HIGH_BIT: u16 = 11;

/// A loaded series: stacked pixels and the attributes of its first slice.
pub struct DicomSeries {
    pub volume: IntensityVolume,
    pub metadata: DicomMetadata,
    pub high_bit: u16,
    /// Files in volume order.
    pub files: Vec<PathBuf>,
    /// First slice after sorting, used as the tag template for derived series.
    pub reference: DefaultDicomObject,
}

impl DicomSeries {
    pub fn shape(&self) -> [usize; 3] {
        let (d, h, w) = self.volume.dim();
        [d, h, w]
    }

    /// Take intensities from a NIfTI export of the same acquisition.
    ///
    /// The DICOM slices still supply metadata and the tag template; the
    /// reoriented NIfTI volume must match their grid.
    pub fn with_nifti_volume(mut self, path: &Path) -> Result<Self> {
        let volume = load_nifti_volume(path)?;
        if volume.dim() != self.volume.dim() {
            return Err(BodyCompError::shape_mismatch(self.volume.shape(), volume.shape()))
                .with_context(|| format!("NIfTI {:?} does not match the DICOM series", path));
        }
        self.volume = volume;
        self.high_bit = NIFTI_HIGH_BIT;
        Ok(self)
    }
}

/// All `*.dcm` files under `dir`.
pub fn find_slices(dir: &Path) -> Vec<PathBuf> {
    WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().map_or(false, |ext| ext == "dcm"))
        .map(|e| e.into_path())
        .collect()
}

fn decode_slice(obj: &DefaultDicomObject) -> Result<Array2<f32>> {
    // Stored values; rescale slope/intercept are not applied.
    let options = ConvertOptions::new().with_modality_lut(ModalityLutOption::None);
    let decoded = obj
        .decode_pixel_data()
        .context("Failed to decode pixel data")?;
    let frames = decoded
        .to_ndarray_with_options::<f32>(&options)
        .context("Failed to convert to f32 ndarray")?;
    // (frames, rows, columns, samples): keep the first frame and sample.
    Ok(frames.slice(s![0, .., .., 0]).to_owned())
}

/// Load every slice under `dir`, sorted by Slice Location in descending order.
pub fn load_series(dir: &Path) -> Result<DicomSeries> {
    let files = find_slices(dir);
    if files.is_empty() {
        bail!("No DICOM files found in {:?}", dir);
    }
    info!(count = files.len(), ?dir, "loading DICOM series");

    let mut slices: Vec<(PathBuf, DefaultDicomObject)> = files
        .par_iter()
        .map(|path| {
            let obj = open_file(path).with_context(|| format!("Failed to open {:?}", path))?;
            Ok((path.clone(), obj))
        })
        .collect::<Result<Vec<_>>>()?;

    slices.sort_by(|a, b| {
        let la = a.1.element_f64(SLICE_LOCATION).unwrap_or(0.0);
        let lb = b.1.element_f64(SLICE_LOCATION).unwrap_or(0.0);
        lb.partial_cmp(&la).unwrap_or(Ordering::Equal)
    });

    let pixels = slices
        .par_iter()
        .map(|(path, obj)| decode_slice(obj).with_context(|| format!("In {:?}", path)))
        .collect::<Result<Vec<_>>>()?;

    let first_shape = pixels[0].dim();
    if let Some((idx, _)) = pixels.iter().enumerate().find(|(_, p)| p.dim() != first_shape) {
        bail!(
            "Slice {:?} has shape {:?}, expected {:?}",
            slices[idx].0,
            pixels[idx].dim(),
            first_shape
        );
    }
    let views: Vec<_> = pixels.iter().map(|p| p.view()).collect();
    let volume = stack(Axis(0), &views).context("Failed to stack slices")?;

    let (files, mut objects): (Vec<PathBuf>, Vec<DefaultDicomObject>) = slices.into_iter().unzip();
    let reference = objects.swap_remove(0);
    let metadata = extract_dicom_metadata(&reference)
        .with_context(|| format!("Incomplete metadata in {:?}", files[0]))?;
    let high_bit = reference
        .element_f64(HIGH_BIT)
        .map(|v| v as u16)
        .unwrap_or(15);

    debug!(shape = ?volume.shape(), high_bit, "series loaded");
    Ok(DicomSeries {
        volume,
        metadata,
        high_bit,
        files,
        reference,
    })
}

/// Reorder a NIfTI `(x, y, z)` array into series order `(slice, row, column)`.
///
/// Rows follow the NIfTI `y` axis and columns its `x` axis; slices run from
/// the last NIfTI slice to the first, matching the descending slice location
/// of a loaded DICOM series.
pub fn nifti_to_series_order(data: ArrayView3<f32>) -> IntensityVolume {
    data.permuted_axes([2, 1, 0])
        .slice(s![..;-1, .., ..])
        .to_owned()
}

/// Read a `.nii`/`.nii.gz` volume in series order.
pub fn load_nifti_volume(path: &Path) -> Result<IntensityVolume> {
    let obj = ReaderOptions::new()
        .read_file(path)
        .with_context(|| format!("Failed to read NIfTI {:?}", path))?;
    let data = obj
        .into_volume()
        .into_ndarray::<f32>()
        .with_context(|| format!("Failed to convert NIfTI {:?} to f32 ndarray", path))?
        .into_dimensionality::<Ix3>()
        .with_context(|| format!("NIfTI {:?} is not a 3D volume", path))?;
    info!(shape = ?data.shape(), ?path, "loaded NIfTI volume");
    Ok(nifti_to_series_order(data.view()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;
    use nifti::writer::WriterOptions;

    fn nifti_fixture() -> Array3<f32> {
        // (x, y, z) = (4, 3, 2)
        Array3::from_shape_fn((4, 3, 2), |(x, y, z)| (x + 10 * y + 100 * z) as f32)
    }

    #[test]
    fn nifti_axes_become_slice_row_column() {
        let volume = nifti_to_series_order(nifti_fixture().view());
        assert_eq!(volume.dim(), (2, 3, 4));
        // top slice is the last NIfTI slice
        assert_eq!(volume[[0, 0, 0]], 100.0);
        assert_eq!(volume[[1, 0, 0]], 0.0);
        assert_eq!(volume[[0, 1, 2]], 112.0);
        assert_eq!(volume[[1, 2, 3]], 23.0);
    }

    #[test]
    fn nifti_file_loads_in_series_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.nii");
        WriterOptions::new(&path).write_nifti(&nifti_fixture()).unwrap();

        let volume = load_nifti_volume(&path).unwrap();
        assert_eq!(volume, nifti_to_series_order(nifti_fixture().view()));

        assert!(load_nifti_volume(&dir.path().join("missing.nii")).is_err());
    }
}
