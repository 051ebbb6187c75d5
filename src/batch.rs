//
// batch.rs
// dicom-bodycomp
//
// Runs every job configuration found under a directory, in parallel and independently of each other.
//
// Thales Matheus Mendonça Santos - November 2025

use anyhow::Result;
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{error, info};
use walkdir::WalkDir;

use crate::config::JobConfig;
use crate::postprocess::run_job;

/// Result of one job in a batch.
#[derive(Debug)]
pub struct BatchReport {
    pub succeeded: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, String)>,
}

/// All `*.json` job files under `dir`.
pub fn find_jobs(dir: &Path) -> Vec<PathBuf> {
    let mut jobs: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().map_or(false, |ext| ext == "json"))
        .map(|e| e.into_path())
        .collect();
    jobs.sort();
    jobs
}

fn run_job_file(path: &Path) -> Result<()> {
    let config = JobConfig::from_file(path)?;
    let outcome = run_job(&config)?;
    info!(
        job = ?path,
        observations = outcome.observations.len(),
        series_files = outcome.series_files.len(),
        "job finished"
    );
    Ok(())
}

pub fn process_directory(dir: &Path) -> Result<BatchReport> {
    let jobs = find_jobs(dir);
    info!(?dir, count = jobs.len(), "processing job directory");

    let results: Vec<(PathBuf, Result<()>)> = jobs
        .into_par_iter()
        .map(|path| {
            let res = run_job_file(&path);
            (path, res)
        })
        .collect();

    let mut report = BatchReport {
        succeeded: Vec::new(),
        failed: Vec::new(),
    };
    for (path, res) in results {
        match res {
            Ok(()) => report.succeeded.push(path),
            Err(e) => {
                error!(job = ?path, "job failed: {:#}", e);
                report.failed.push((path, format!("{:#}", e)));
            }
        }
    }
    info!(
        succeeded = report.succeeded.len(),
        failed = report.failed.len(),
        "batch complete"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broken_jobs_do_not_stop_the_batch() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.json"), "{ not json").unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("nested/b.json"), "{}").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        assert_eq!(find_jobs(dir.path()).len(), 2);
        let report = process_directory(dir.path()).unwrap();
        assert!(report.succeeded.is_empty());
        assert_eq!(report.failed.len(), 2);
    }
}
