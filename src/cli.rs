//
// cli.rs
// dicom-bodycomp
//
// Defines the CLI surface with Clap and dispatches the selected command to the pipeline modules.
//
// Thales Matheus Mendonça Santos - November 2025

use std::path::PathBuf;

use anyhow::{anyhow, bail, Context};
use clap::{Parser, Subcommand};
use ndarray::Array3;
use ndarray_npy::{read_npy, write_npy};

use crate::models::{RestorationMode, SliceInterval, TissueModality};
use crate::normal_range::{resolve_normal_range, ReferenceTable};
use crate::{batch, config, metadata, postprocess, preprocess, series, stats};

#[derive(Parser)]
#[command(name = "dicom-bodycomp")]
#[command(about = "Body composition post-processing for segmented MR series", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Post-process one job described by a JSON config
    Run {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Run every job config under a directory
    Batch {
        #[arg(short, long)]
        directory: PathBuf,
    },
    /// Compute statistics for a label volume in original geometry
    Stats {
        /// Any slice of the source series
        #[arg(long)]
        dicom: PathBuf,
        /// `.npy` u8 label volume
        #[arg(long)]
        labels: PathBuf,
        #[arg(long)]
        modality: TissueModality,
    },
    /// Look up the normal-range row for the patient of a DICOM file
    NormalRange {
        #[arg(long)]
        dicom: PathBuf,
        #[arg(long)]
        female: PathBuf,
        #[arg(long)]
        male: PathBuf,
    },
    /// Normalise and reduce a series into the segmenter input
    Reduce {
        #[arg(long)]
        dicom_dir: PathBuf,
        /// Take intensities from a NIfTI export of the series
        #[arg(long)]
        nifti: Option<PathBuf>,
        #[arg(long, default_value_t = RestorationMode::Slice)]
        mode: RestorationMode,
        #[arg(long, num_args = 2, value_names = ["START", "END"])]
        interval: Vec<usize>,
        #[arg(long, num_args = 3, value_names = ["DEPTH", "HEIGHT", "WIDTH"])]
        resize_shape: Option<Vec<usize>>,
        #[arg(short, long)]
        output: PathBuf,
    },
}

pub fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config } => {
            let job = config::JobConfig::from_file(&config)?;
            let outcome = postprocess::run_job(&job)?;
            println!("{}", serde_json::to_string_pretty(&outcome.stats)?);
            for line in &outcome.caption {
                println!("{}", line);
            }
            println!("Report image saved to {:?}", outcome.snapshot);
        }
        Commands::Batch { directory } => {
            let report = batch::process_directory(&directory)?;
            if !report.failed.is_empty() {
                for (path, err) in &report.failed {
                    eprintln!("Failed {:?}: {}", path, err);
                }
                bail!(
                    "{} of {} jobs failed",
                    report.failed.len(),
                    report.failed.len() + report.succeeded.len()
                );
            }
        }
        Commands::Stats {
            dicom,
            labels,
            modality,
        } => {
            let meta = metadata::read_dicom_metadata(&dicom)?;
            let labels: Array3<u8> =
                read_npy(&labels).with_context(|| format!("Failed to read labels {:?}", labels))?;
            let stats = stats::calculate_stats(labels.view(), &meta, modality)?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Commands::NormalRange {
            dicom,
            female,
            male,
        } => {
            let meta = metadata::read_dicom_metadata(&dicom)?;
            let table = ReferenceTable::from_csv_paths(&female, &male)
                .context("Failed to load normal range tables")?;
            let row = resolve_normal_range(&table, &meta)?;
            println!("{}", serde_json::to_string_pretty(&row)?);
        }
        Commands::Reduce {
            dicom_dir,
            nifti,
            mode,
            interval,
            resize_shape,
            output,
        } => {
            let interval = parse_interval(&interval)?;
            let resize_shape = resize_shape.map(|s| [s[0], s[1], s[2]]);
            let mut series = series::load_series(&dicom_dir)?;
            if let Some(nifti) = nifti {
                series = series.with_nifti_volume(&nifti)?;
            }
            let normalized = preprocess::normalize_0_1(series.volume.view(), series.high_bit);
            let reduced = preprocess::reduce(normalized.view(), mode, interval, resize_shape)?;
            write_npy(&output, &reduced)
                .with_context(|| format!("Failed to write {:?}", output))?;
            println!("Reduced volume {:?} saved to {:?}", reduced.shape(), output);
        }
    }

    Ok(())
}

fn parse_interval(values: &[usize]) -> anyhow::Result<SliceInterval> {
    match values {
        [start, end] => Ok(SliceInterval::new(*start, *end)?),
        _ => Err(anyhow!("Provide --interval as START END")),
    }
}
