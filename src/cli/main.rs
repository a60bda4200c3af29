//! Batch background-removal CLI
//!
//! Command-line front end over the batch pipeline: collects input images,
//! starts a session, feeds a progress bar from the status tracker, and
//! exports the finished results.

use crate::{
    ApiCredential, BatchOptions, BatchScheduler, ExportManager, JobStatus, RateLimit,
};
use anyhow::{bail, Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;
use walkdir::WalkDir;

/// Image formats the pipeline accepts as input
const SUPPORTED_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp", "bmp"];

/// Batch background removal CLI tool
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(name = "nukki-batch")]
pub struct Cli {
    /// Input image files or directories
    #[arg(value_name = "INPUT", required = true)]
    pub input: Vec<PathBuf>,

    /// Output directory for exported results
    #[arg(short, long, value_name = "DIR", default_value = "./nukki_output")]
    pub output: PathBuf,

    /// Run AI edge refinement after background removal
    #[arg(long)]
    pub refine: bool,

    /// Credential for the refinement service [default: $GEMINI_API_KEY]
    #[arg(long, value_name = "KEY")]
    pub api_key: Option<String>,

    /// Maximum number of images processed at once
    #[arg(short, long, default_value_t = crate::DEFAULT_CONCURRENCY_LIMIT)]
    pub concurrency: usize,

    /// Refinement requests allowed per minute (never above the remote quota)
    #[arg(long, default_value_t = crate::REMOTE_QUOTA_PER_MINUTE)]
    pub rate_limit: u32,

    /// Process directories recursively
    #[arg(short, long)]
    pub recursive: bool,

    /// Enable verbose logging (-v: INFO, -vv: DEBUG, -vvv: TRACE)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// CLI entry point
pub async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let files = collect_inputs(&cli.input, cli.recursive)?;
    if files.is_empty() {
        bail!(
            "no supported images found (supported: {})",
            SUPPORTED_EXTENSIONS.join(", ")
        );
    }

    let options = build_options(&cli)?;
    let session = BatchScheduler::new().run(files, options);

    let progress = ProgressBar::new(session.len() as u64);
    progress.set_style(
        ProgressStyle::with_template("[{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█░ "),
    );

    loop {
        tokio::select! {
            () = session.wait_finished() => break,
            result = tokio::signal::ctrl_c() => {
                result.context("failed to listen for ctrl-c")?;
                progress.set_message("cancelling...");
                session.cancel();
            },
            () = tokio::time::sleep(Duration::from_millis(100)) => {},
        }
        let snapshot = session.snapshot();
        let terminal = snapshot.iter().filter(|s| s.status.is_terminal()).count();
        progress.set_position(terminal as u64);
    }
    progress.finish_and_clear();

    let snapshot = session.snapshot();
    let completed = snapshot
        .iter()
        .filter(|s| s.status == JobStatus::Completed)
        .count();
    println!("Processed {} of {} images", completed, snapshot.len());
    for failed in snapshot.iter().filter(|s| s.status == JobStatus::Failed) {
        println!(
            "  ✗ {}: {}",
            failed.source_path.display(),
            failed.error.as_deref().unwrap_or("unknown failure")
        );
    }

    if completed > 0 {
        let report = ExportManager::export(&session, &cli.output)
            .context("failed to export batch results")?;
        println!(
            "Exported {} files to {}",
            report.succeeded.len(),
            cli.output.display()
        );
        for (id, reason) in report
            .failed
            .iter()
            .filter(|(_, reason)| reason != "source job failed")
        {
            warn!("export failed for job {id}: {reason}");
        }
    }

    Ok(())
}

fn build_options(cli: &Cli) -> Result<BatchOptions> {
    let mut builder = BatchOptions::builder()
        .use_ai_refinement(cli.refine)
        .concurrency_limit(cli.concurrency)
        .rate_limit(RateLimit {
            max_requests: cli.rate_limit,
            window: Duration::from_secs(60),
        });

    if cli.refine {
        let key = cli
            .api_key
            .clone()
            .or_else(|| std::env::var("GEMINI_API_KEY").ok())
            .context("--refine requires --api-key or the GEMINI_API_KEY environment variable")?;
        builder = builder.credential(ApiCredential::new(key));
    }

    Ok(builder.build()?)
}

/// Expand the input arguments into a deterministic, sorted file list
fn collect_inputs(inputs: &[PathBuf], recursive: bool) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for input in inputs {
        if input.is_dir() {
            let max_depth = if recursive { usize::MAX } else { 1 };
            let mut found: Vec<PathBuf> = WalkDir::new(input)
                .max_depth(max_depth)
                .into_iter()
                .filter_map(std::result::Result::ok)
                .filter(|entry| entry.file_type().is_file())
                .map(walkdir::DirEntry::into_path)
                .filter(|path| is_supported(path))
                .collect();
            // Alphabetical order keeps batch numbering stable across runs
            found.sort();
            files.extend(found);
        } else if input.is_file() {
            files.push(input.clone());
        } else {
            bail!("input '{}' does not exist", input.display());
        }
    }
    Ok(files)
}

fn is_supported(path: &std::path::Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            SUPPORTED_EXTENSIONS
                .iter()
                .any(|supported| ext.eq_ignore_ascii_case(supported))
        })
}

fn init_tracing(verbosity: u8) {
    let default_level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_parses() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_is_supported_extensions() {
        assert!(is_supported(std::path::Path::new("a.PNG")));
        assert!(is_supported(std::path::Path::new("b.jpeg")));
        assert!(!is_supported(std::path::Path::new("c.gif")));
        assert!(!is_supported(std::path::Path::new("no_extension")));
    }

    #[test]
    fn test_collect_inputs_sorts_directory_entries() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["z_last.jpg", "a_first.png", "m_middle.webp", "skip.txt"] {
            std::fs::write(dir.path().join(name), b"stub").unwrap();
        }

        let files = collect_inputs(&[dir.path().to_path_buf()], false).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap())
            .collect();
        assert_eq!(names, vec!["a_first.png", "m_middle.webp", "z_last.jpg"]);
    }

    #[test]
    fn test_collect_inputs_rejects_missing_path() {
        let err = collect_inputs(&[PathBuf::from("/definitely/not/here.png")], false);
        assert!(err.is_err());
    }

    #[test]
    fn test_build_options_requires_key_for_refinement() {
        let cli = Cli::parse_from(["nukki-batch", "--refine", "input.png"]);
        // Only fails when the env var is absent as well
        if std::env::var("GEMINI_API_KEY").is_err() {
            assert!(build_options(&cli).is_err());
        }

        let cli = Cli::parse_from([
            "nukki-batch",
            "--refine",
            "--api-key",
            "test-key",
            "input.png",
        ]);
        let options = build_options(&cli).unwrap();
        assert!(options.use_ai_refinement);
    }
}
