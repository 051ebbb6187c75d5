//
// postprocess.rs
// dicom-bodycomp
//
// Runs one job end to end: selection, restoration, statistics and normal ranges, then the overlay, observation and DICOM outputs.
//
// Thales Matheus Mendonça Santos - November 2025

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use ndarray::{Array5, ArrayView3, ArrayView5};
use ndarray_npy::read_npy;
use tracing::{debug, info, info_span, Span};

use crate::confidence::{predict_probabilities, select_most_confident, ProbabilityLayout, Segmenter};
use crate::config::JobConfig;
use crate::dicom_writer::{SeriesStamp, SeriesWriter};
use crate::error::BodyCompError;
use crate::models::{DicomMetadata, LabelVolume, RestorationMode, SliceInterval, Stats, TissueModality};
use crate::normal_range::{resolve_normal_range, NormalRangeRow, ReferenceTable};
use crate::observation::write_observations;
use crate::overlay::{caption_lines, coronal_snapshot, save_png, OverlayColors, OverlayCompositor};
use crate::preprocess::{normalize_0_1, reduce};
use crate::restore::restore_to_original_dims;
use crate::series::{load_series, DicomSeries};
use crate::stats::{calculate_stats, count_label};

/// Probabilities a segmenter already wrote to a `.npy` file.
pub struct PrecomputedPredictions {
    path: PathBuf,
    layout: ProbabilityLayout,
}

impl PrecomputedPredictions {
    pub fn new(path: impl Into<PathBuf>, layout: ProbabilityLayout) -> Self {
        Self {
            path: path.into(),
            layout,
        }
    }
}

impl Segmenter for PrecomputedPredictions {
    fn layout(&self) -> ProbabilityLayout {
        self.layout
    }

    fn predict(&self, _volume: ArrayView3<f32>) -> crate::error::Result<Array5<f32>> {
        read_npy(&self.path).map_err(|e| {
            BodyCompError::Segmenter(format!("cannot read {}: {e}", self.path.display()))
        })
    }
}

/// In-memory results of the computational stages.
#[derive(Debug, Clone)]
pub struct Analysis {
    pub labels: LabelVolume,
    pub stats: Stats,
    pub ranges: NormalRangeRow,
}

/// What a job produced on disk, plus the figures it reported.
#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub stats: Stats,
    pub ranges: NormalRangeRow,
    pub caption: Vec<String>,
    pub snapshot: PathBuf,
    pub observations: Vec<PathBuf>,
    pub series_files: Vec<PathBuf>,
}

/// Post-prediction stages for one modality.
///
/// Log records are emitted inside the span handed in by the caller.
pub struct PostPredictionProcessor {
    modality: TissueModality,
    mode: RestorationMode,
    compositor: OverlayCompositor,
    reference_table: ReferenceTable,
    output_dir: PathBuf,
    span: Span,
}

impl PostPredictionProcessor {
    pub fn new(
        modality: TissueModality,
        mode: RestorationMode,
        colors: &OverlayColors,
        reference_table: ReferenceTable,
        output_dir: impl Into<PathBuf>,
        span: Span,
    ) -> Self {
        Self {
            modality,
            mode,
            compositor: OverlayCompositor::new(modality, colors),
            reference_table,
            output_dir: output_dir.into(),
            span,
        }
    }

    pub fn modality(&self) -> TissueModality {
        self.modality
    }

    /// Select, restore, measure and look up the normal range.
    pub fn analyze(
        &self,
        probabilities: ArrayView5<f32>,
        interval: SliceInterval,
        original_shape: [usize; 3],
        metadata: &DicomMetadata,
    ) -> crate::error::Result<Analysis> {
        let _guard = self.span.enter();
        info!("post-prediction processing started, selecting highest probability indexes");
        let reduced = select_most_confident(probabilities)?;

        info!("resizing predictions to original dicom dimensions");
        let labels = restore_to_original_dims(reduced.view(), self.mode, interval, original_shape)?;
        for (label, name) in self.modality.labels() {
            debug!(tissue = *name, voxels = count_label(labels.view(), *label), "label count");
        }

        info!("calculating volumes");
        let stats = calculate_stats(labels.view(), metadata, self.modality)?;

        info!("returning patient normal ranges");
        let ranges = resolve_normal_range(&self.reference_table, metadata)?;
        debug!(ranges = ?ranges.values(), "patient normal ranges");

        Ok(Analysis {
            labels,
            stats,
            ranges,
        })
    }

    /// Run every stage and write the overlay series, observations and report snapshot.
    pub fn execute(
        &self,
        probabilities: ArrayView5<f32>,
        series: &DicomSeries,
        interval: SliceInterval,
        sample_id: &str,
        output_filename: &str,
    ) -> Result<JobOutcome> {
        let analysis = self.analyze(probabilities, interval, series.shape(), &series.metadata)?;
        let _guard = self.span.enter();

        fs::create_dir_all(&self.output_dir)
            .with_context(|| format!("Failed to create {:?}", self.output_dir))?;

        info!("creating overlays");
        let overlay = self
            .compositor
            .compose_volume(series.volume.view(), analysis.labels.view())?;
        let caption = caption_lines(self.modality, &analysis.stats, &analysis.ranges);
        for line in &caption {
            info!(caption = %line, "report caption");
        }

        info!("writing overlay series");
        let writer = SeriesWriter::new(
            self.modality,
            &series.reference,
            &series.metadata,
            SeriesStamp::now(),
        );
        let series_files = writer.write_all(overlay.view(), &self.output_dir)?;

        info!("writing observations");
        let observations = write_observations(
            &self.output_dir,
            output_filename,
            self.modality,
            &analysis.stats,
            &analysis.ranges,
            sample_id,
        )?;

        info!(display_slice = analysis.stats.display_slice, "saving coronal report image");
        let snapshot_image =
            coronal_snapshot(overlay.view(), analysis.stats.display_slice, &series.metadata)?;
        let snapshot = snapshot_path(&self.output_dir, self.modality);
        save_png(&snapshot_image, &snapshot)?;

        Ok(JobOutcome {
            stats: analysis.stats,
            ranges: analysis.ranges,
            caption,
            snapshot,
            observations,
            series_files,
        })
    }
}

pub fn snapshot_path(output_dir: &Path, modality: TissueModality) -> PathBuf {
    output_dir.join(format!("{modality}_4_report.png"))
}

/// Load the inputs named by `config` and run the processor over them.
pub fn run_job(config: &JobConfig) -> Result<JobOutcome> {
    let span = info_span!("job", sample_id = %config.sample_id, modality = %config.modality);
    {
        let _guard = span.enter();
        info!(dicom_dir = ?config.dicom_dir, "starting job");
    }

    let reference_table = ReferenceTable::from_csv_paths(
        &config.reference_tables.female,
        &config.reference_tables.male,
    )
    .context("Failed to load normal range tables")?;
    let mut series = load_series(&config.dicom_dir)?;
    if let Some(nifti) = &config.nifti_volume {
        series = series.with_nifti_volume(nifti)?;
    }

    let normalized = normalize_0_1(series.volume.view(), series.high_bit);
    let reduced = reduce(
        normalized.view(),
        config.restoration_mode,
        config.slice_interval,
        config.resize_shape,
    )?;
    let segmenter = PrecomputedPredictions::new(&config.predictions, config.probability_layout);
    let probabilities = predict_probabilities(&segmenter, reduced.view())?;

    let processor = PostPredictionProcessor::new(
        config.modality,
        config.restoration_mode,
        &config.colors,
        reference_table,
        &config.output_dir,
        span,
    );
    processor.execute(
        probabilities.view(),
        &series,
        config.slice_interval,
        &config.sample_id,
        &config.output_filename(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{metric, ASAT_LABEL, VAT_LABEL};
    use ndarray::Array5;
    use ndarray_npy::write_npy;

    const TABLE: &str = "\
age,sex,vat_volume,vat_ratio,vat_index,sat_volume,muscle_ratio,muscle_volume
45,F,1.20-3.00L,16.0%-26.0%,0.45-1.05L/m2,5.10-8.10L,7.10-9.10kg/L,6.60-8.10L
";

    fn metadata() -> DicomMetadata {
        DicomMetadata {
            pixel_spacing: [100.0, 100.0],
            slice_thickness: 100.0,
            manufacturer: "Siemens".to_string(),
            patient_weight: 71.0,
            patient_size: Some(2.0),
            additional_patient_history: None,
            patient_age: "045Y".to_string(),
            patient_sex: "F".to_string(),
            acquisition_date: "20240101".to_string(),
            patient_name: "Doe^Jane".to_string(),
            patient_id: "PAT1".to_string(),
            accession_number: "ACC1".to_string(),
        }
    }

    fn processor(mode: RestorationMode) -> PostPredictionProcessor {
        let table = ReferenceTable::from_csv_readers(TABLE.as_bytes(), TABLE.as_bytes()).unwrap();
        PostPredictionProcessor::new(
            TissueModality::Fat,
            mode,
            &OverlayColors::default(),
            table,
            "unused",
            Span::none(),
        )
    }

    #[test]
    fn analysis_restores_then_measures() {
        // reduced grid (2, 2, 3) of a (4, 6, 3) volume, slices 1..3
        let mut probabilities = Array5::<f32>::zeros((1, 3, 2, 2, 3));
        probabilities.fill(0.1);
        probabilities[[0, VAT_LABEL as usize, 0, 0, 0]] = 0.9;
        probabilities[[0, ASAT_LABEL as usize, 1, 1, 2]] = 0.9;
        probabilities[[0, ASAT_LABEL as usize, 1, 0, 2]] = 0.9;

        let interval = SliceInterval::new(1, 3).unwrap();
        let analysis = processor(RestorationMode::Slice)
            .analyze(probabilities.view(), interval, [4, 6, 3], &metadata())
            .unwrap();

        assert_eq!(analysis.labels.dim(), (4, 6, 3));
        assert_eq!(analysis.labels[[1, 2, 0]], VAT_LABEL);
        assert_eq!(count_label(analysis.labels.view(), ASAT_LABEL), 2);
        // one litre per voxel
        assert_eq!(analysis.stats.get(metric::VAT_VOLUME), Some("1.00"));
        assert_eq!(analysis.stats.get(metric::SAT_VOLUME), Some("2.00"));
        assert_eq!(analysis.stats.get(metric::VAT_INDEX), Some("0.25"));
        assert!(analysis.ranges.is_established());
    }

    #[test]
    fn analysis_rejects_prediction_on_wrong_grid() {
        let probabilities = Array5::<f32>::zeros((1, 3, 2, 3, 3));
        let interval = SliceInterval::new(1, 3).unwrap();
        assert!(processor(RestorationMode::Slice)
            .analyze(probabilities.view(), interval, [4, 6, 3], &metadata())
            .is_err());
    }

    #[test]
    fn precomputed_predictions_read_npy() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pred.npy");
        let tensor = Array5::<f32>::from_elem((1, 2, 3, 4, 2), 0.5);
        write_npy(&path, &tensor).unwrap();

        let segmenter = PrecomputedPredictions::new(&path, ProbabilityLayout::ClassesLast);
        let volume = ndarray::Array3::<f32>::zeros((2, 3, 4));
        let probabilities = predict_probabilities(&segmenter, volume.view()).unwrap();
        assert_eq!(probabilities.dim(), (1, 2, 2, 3, 4));

        let missing = PrecomputedPredictions::new(dir.path().join("none.npy"), ProbabilityLayout::ClassesFirst);
        assert!(matches!(
            missing.predict(volume.view()),
            Err(BodyCompError::Segmenter(_))
        ));
    }

    #[test]
    fn snapshot_is_named_after_modality() {
        assert_eq!(
            snapshot_path(Path::new("/out"), TissueModality::Muscle),
            PathBuf::from("/out/MUSCLE_4_report.png")
        );
    }
}
