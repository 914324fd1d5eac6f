use anyhow::Context;
use serde::Serialize;
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use walkdir::WalkDir;

use crate::config::Config;
use crate::error::{EmbedError, ErrorKind, Result};
use crate::jfif;
use crate::library::{Face, ImageDescriptor, Photo};
use crate::orientation::region_from_face;
use crate::regions::{Dimensions, Region, RegionDocument, merge};
use crate::xmp;

/// Extensions of files the rewriter accepts.
const JPEG_EXTENSIONS: &[&str] = &["jpg", "jpeg"];

/// Per-file settings shared by every job in a batch.
#[derive(Debug, Clone)]
pub struct EmbedOptions {
    /// Run every step except creating the output file.
    pub dry_run: bool,
    /// `stDim:unit` for documents created from scratch.
    pub dimensions_unit: String,
}

impl EmbedOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            dry_run: config.output.dry_run,
            dimensions_unit: config.regions.dimensions_unit.clone(),
        }
    }
}

/// What [`embed_file`] did (or would do, in a dry run).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmbedOutcome {
    /// Regions added by this run.
    pub regions_written: usize,
    /// Regions in the output document, existing ones included.
    pub total_regions: usize,
    /// Whether an existing XMP segment was replaced rather than a new one inserted.
    pub replaced_existing: bool,
    /// Size of the output file; zero in a dry run.
    pub bytes_written: u64,
}

/// Read the region document already embedded in a JPEG, if any.
pub fn read_regions(path: &Path) -> Result<Option<RegionDocument>> {
    let mut src = BufReader::new(File::open(path)?);
    let layout = jfif::scan(&mut src)?;
    let meta = xmp::locate(&layout, &mut src)?;
    Ok(meta.packet.and_then(|packet| packet.regions))
}

/// Embed `regions` (already in display space) into a copy of `source`.
///
/// Scans the source, merges with whatever regions it already carries, encodes
/// and writes `output`. Nothing is created until encoding has succeeded, and
/// a partially written output is removed if the copy fails.
pub fn embed_file(
    source: &Path,
    output: &Path,
    descriptor: &ImageDescriptor,
    regions: Vec<Region>,
    options: &EmbedOptions,
) -> Result<EmbedOutcome> {
    if same_file(source, output) {
        return Err(EmbedError::Io(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("output {} would overwrite the source", output.display()),
        )));
    }

    let mut src = BufReader::new(File::open(source)?);
    let layout = jfif::scan(&mut src)?;
    let meta = xmp::locate(&layout, &mut src)?;

    let existing = meta.packet.as_ref().and_then(|packet| packet.regions.clone());
    let regions_written = regions.len();
    let dimensions = Dimensions::new(descriptor.width, descriptor.height, options.dimensions_unit.clone());
    let doc = merge(existing, dimensions, regions);
    let payload = xmp::encode(&doc, meta.packet.as_ref())?;
    let plan = meta.rewrite_plan();

    let mut outcome = EmbedOutcome {
        regions_written,
        total_regions: doc.regions.len(),
        replaced_existing: plan.replacement.is_some(),
        bytes_written: 0,
    };
    if options.dry_run {
        log::debug!("dry run: would write {} region(s) to {}", outcome.total_regions, output.display());
        return Ok(outcome);
    }

    let mut out = BufWriter::new(File::create(output)?);
    match jfif::rewrite(&mut src, &mut out, &plan, &payload) {
        Ok(written) => outcome.bytes_written = written,
        Err(e) => {
            drop(out);
            if let Err(rm) = fs::remove_file(output) {
                log::warn!("Failed to remove partial output {}: {rm}", output.display());
            }
            return Err(e.into());
        }
    }
    Ok(outcome)
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// The outcome of one photo in a batch, serialized for `--json` output.
#[derive(Debug, Clone, Serialize)]
pub struct EmbedReport {
    pub path: PathBuf,
    pub output: Option<PathBuf>,
    pub regions_written: usize,
    pub total_regions: usize,
    pub dry_run: bool,
    pub warnings: Vec<String>,
    /// Why the photo was not processed. Skips are not failures.
    pub skipped: Option<String>,
    pub error: Option<String>,
    pub error_kind: Option<ErrorKind>,
}

impl EmbedReport {
    fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            output: None,
            regions_written: 0,
            total_regions: 0,
            dry_run: false,
            warnings: Vec::new(),
            skipped: None,
            error: None,
            error_kind: None,
        }
    }

    pub fn failed(path: &Path, err: &EmbedError) -> Self {
        Self {
            error: Some(err.to_string()),
            error_kind: Some(err.kind()),
            ..Self::new(path)
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.skipped.is_none()
    }

    pub fn is_skipped(&self) -> bool {
        self.skipped.is_some()
    }
}

/// One file to rewrite: where it comes from, where it goes, and the new
/// regions in display space.
#[derive(Debug, Clone)]
pub struct EmbedJob {
    pub source: PathBuf,
    pub output: PathBuf,
    pub descriptor: ImageDescriptor,
    pub regions: Vec<Region>,
    pub warnings: Vec<String>,
}

impl EmbedJob {
    /// Build a job for a library photo, normalizing each face to a region.
    pub fn for_photo(source: PathBuf, photo: &Photo, faces: &[Face], out_dir: &Path) -> Self {
        let descriptor = photo.descriptor();
        let mut warnings = Vec::new();
        if !descriptor.orientation.is_recognized() && !faces.is_empty() {
            warnings.push(format!(
                "unrecognized orientation {}, face coordinates left unchanged",
                descriptor.orientation.code()
            ));
        }
        let regions = faces
            .iter()
            .map(|face| region_from_face(face, descriptor.orientation))
            .collect();

        Self {
            output: output_path(&source, out_dir),
            source,
            descriptor,
            regions,
            warnings,
        }
    }

    /// Why the job will not write anything, if it will not.
    pub fn skip_reason(&self) -> Option<&'static str> {
        if !is_jpeg(&self.source) {
            Some("unsupported file type")
        } else if self.regions.is_empty() {
            Some("no faces")
        } else {
            None
        }
    }

    /// Run the job to completion, turning every outcome into a report.
    pub fn run(self, options: &EmbedOptions) -> EmbedReport {
        let skipped = self.skip_reason().map(str::to_string);
        let mut report = EmbedReport {
            warnings: self.warnings,
            skipped,
            ..EmbedReport::new(&self.source)
        };
        if report.is_skipped() {
            return report;
        }

        match embed_file(&self.source, &self.output, &self.descriptor, self.regions, options) {
            Ok(outcome) => {
                log::info!(
                    "{} -> {} ({} new, {} total region(s))",
                    self.source.display(),
                    self.output.display(),
                    outcome.regions_written,
                    outcome.total_regions
                );
                report.output = Some(self.output);
                report.regions_written = outcome.regions_written;
                report.total_regions = outcome.total_regions;
                report.dry_run = options.dry_run;
                report
            }
            Err(e) => EmbedReport {
                warnings: report.warnings,
                ..EmbedReport::failed(&self.source, &e)
            },
        }
    }
}

/// Embed a library photo's faces into a copy under `out_dir`.
pub fn embed_photo(
    source: &Path,
    photo: &Photo,
    faces: &[Face],
    out_dir: &Path,
    options: &EmbedOptions,
) -> EmbedReport {
    EmbedJob::for_photo(source.to_path_buf(), photo, faces, out_dir).run(options)
}

/// Output location for a source file: same file name, inside `out_dir`.
pub fn output_path(source: &Path, out_dir: &Path) -> PathBuf {
    match source.file_name() {
        Some(name) => out_dir.join(name),
        None => out_dir.join("unnamed.jpg"),
    }
}

/// Run a batch of jobs with bounded concurrency.
///
/// The output directory is created first; if that fails the batch does not
/// start. At most `config.concurrency.limit()` files are open at once. Each
/// job's failure lands in its own report, a panicking job included, and
/// reports come back in job order. Only jobs that will write an output claim
/// its path, so a skipped photo never blocks another with the same file name.
pub async fn embed_batch(jobs: Vec<EmbedJob>, config: &Config) -> anyhow::Result<Vec<EmbedReport>> {
    if !config.output.dry_run {
        fs::create_dir_all(&config.output.dir).with_context(|| {
            format!("Failed to create output directory {}", config.output.dir.display())
        })?;
    }

    let limit = config.concurrency.limit();
    log::debug!("embedding {} file(s), at most {limit} at a time", jobs.len());

    let semaphore = Arc::new(Semaphore::new(limit));
    let options = Arc::new(EmbedOptions::from_config(config));
    let mut reports: Vec<Option<EmbedReport>> = vec![None; jobs.len()];
    let sources: Vec<PathBuf> = jobs.iter().map(|job| job.source.clone()).collect();
    let mut outputs = HashSet::new();
    let mut tasks = JoinSet::new();

    for (index, job) in jobs.into_iter().enumerate() {
        if job.skip_reason().is_none() && !outputs.insert(job.output.clone()) {
            let err = EmbedError::Io(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{} is already the output of another photo", job.output.display()),
            ));
            reports[index] = Some(EmbedReport::failed(&job.source, &err));
            continue;
        }

        let permit = Arc::clone(&semaphore)
            .acquire_owned()
            .await
            .context("Concurrency limiter closed")?;
        let options = Arc::clone(&options);
        tasks.spawn_blocking(move || {
            let report = job.run(&options);
            drop(permit);
            (index, report)
        });
    }

    Ok(gather(tasks, reports, &sources).await)
}

/// Wait for every task. A task that panicked leaves its slot empty, and the
/// slot is filled with a failed report for that job's source.
async fn gather(
    mut tasks: JoinSet<(usize, EmbedReport)>,
    mut reports: Vec<Option<EmbedReport>>,
    sources: &[PathBuf],
) -> Vec<EmbedReport> {
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((index, report)) => reports[index] = Some(report),
            Err(e) => log::error!("Embed task failed: {e}"),
        }
    }

    reports
        .into_iter()
        .zip(sources)
        .map(|(report, source)| {
            report.unwrap_or_else(|| {
                let err = EmbedError::Io(io::Error::other("embedding task did not complete"));
                EmbedReport::failed(source, &err)
            })
        })
        .collect()
}

/// Collect JPEG files from the given paths.
///
/// Directories are walked recursively (following symlinks). The result is
/// sorted so batches are reproducible.
pub fn collect_images(paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut images = Vec::new();

    for path in paths {
        if path.is_file() {
            if is_jpeg(path) {
                images.push(path.clone());
            } else {
                log::warn!("Skipping unsupported file: {}", path.display());
            }
        } else if path.is_dir() {
            for entry in WalkDir::new(path)
                .follow_links(true)
                .into_iter()
                .filter_map(|e| e.ok())
            {
                let p = entry.path();
                if p.is_file() && is_jpeg(p) {
                    images.push(p.to_path_buf());
                }
            }
        } else {
            log::warn!("Path does not exist: {}", path.display());
        }
    }

    images.sort();
    images
}

/// Check if a file has a JPEG extension.
pub fn is_jpeg(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| JPEG_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}
