//! Batch export of completed results
//!
//! Export is a batch-level operation: it refuses to run while any job is
//! still in flight, then writes every completed result as
//! `{originalBaseName}_nukki.png`. Each file is written to a temporary path
//! and atomically moved into place, so a crash mid-export never leaves a
//! truncated output.

use crate::error::{ExportError, PipelineError, Result};
use crate::job::{Job, JobId, JobStatus};
use crate::scheduler::BatchSession;
use image::RgbaImage;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Suffix appended to every exported file's base name
const EXPORT_SUFFIX: &str = "_nukki";

/// Per-file outcome of one export call
#[derive(Debug, Default)]
pub struct ExportReport {
    /// Paths written successfully
    pub succeeded: Vec<PathBuf>,
    /// Jobs that produced no file, with the reason
    pub failed: Vec<(JobId, String)>,
}

impl ExportReport {
    /// Whether every job in the batch produced an output file
    #[must_use]
    pub fn is_fully_successful(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Writes a finished batch's results to a destination directory
pub struct ExportManager;

impl ExportManager {
    /// Export every completed job of `session` into `destination`.
    ///
    /// Fails fast with [`ExportError::NotFinished`] (writing zero files) if
    /// any job is non-terminal. Failed jobs are skipped and reported; a
    /// single file's write failure is recorded and does not abort the rest.
    pub fn export(session: &BatchSession, destination: &Path) -> Result<ExportReport> {
        session.with_jobs(|jobs| Self::export_jobs(jobs, destination))
    }

    fn export_jobs(jobs: &[Job], destination: &Path) -> Result<ExportReport> {
        if jobs.iter().any(|job| !job.status().is_terminal()) {
            return Err(ExportError::NotFinished.into());
        }

        std::fs::create_dir_all(destination).map_err(|e| {
            PipelineError::file_io_error("create export directory", destination, &e)
        })?;

        let mut report = ExportReport::default();
        for job in jobs {
            match job.status() {
                JobStatus::Completed => {
                    let target = destination.join(Self::output_name(job.source_path()));
                    let outcome = job.result().map_or_else(
                        || {
                            Err(ExportError::WriteFailure {
                                path: target.clone(),
                                reason: "completed job holds no result image".to_string(),
                            })
                        },
                        |image| Self::write_atomic(image, &target),
                    );
                    match outcome {
                        Ok(()) => report.succeeded.push(target),
                        Err(e) => {
                            warn!("export failed for {}: {e}", job.source_path().display());
                            report.failed.push((job.id(), e.to_string()));
                        },
                    }
                },
                JobStatus::Failed => {
                    report.failed.push((job.id(), "source job failed".to_string()));
                },
                // Unreachable: terminality was checked above
                _ => {},
            }
        }

        info!(
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            "export finished"
        );
        Ok(report)
    }

    /// Output file name for a source image: `{baseName}_nukki.png`
    fn output_name(source: &Path) -> String {
        let stem = source
            .file_stem()
            .and_then(std::ffi::OsStr::to_str)
            .unwrap_or("image");
        format!("{stem}{EXPORT_SUFFIX}.png")
    }

    /// Write the PNG to a temporary file in the destination directory, then
    /// atomically move it into place.
    fn write_atomic(
        image: &RgbaImage,
        target: &Path,
    ) -> std::result::Result<(), ExportError> {
        let write_failure = |reason: String| ExportError::WriteFailure {
            path: target.to_path_buf(),
            reason,
        };

        let dir = target.parent().unwrap_or_else(|| Path::new("."));
        let tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| write_failure(e.to_string()))?;
        {
            let mut writer = std::io::BufWriter::new(tmp.as_file());
            image
                .write_to(&mut writer, image::ImageFormat::Png)
                .map_err(|e| write_failure(e.to_string()))?;
            writer.flush().map_err(|e| write_failure(e.to_string()))?;
        }
        tmp.persist(target)
            .map_err(|e| write_failure(e.to_string()))?;
        Ok(())
    }
}
