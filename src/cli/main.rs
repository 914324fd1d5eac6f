use anyhow::Result;
use clap::Parser;
use std::path::{Path, PathBuf};

use phace::library::{ImageDescriptor, Manifest};
use phace::pipeline::{self, EmbedJob, EmbedReport};
use phace::regions::{Area, Region, RegionDocument, RegionType};
use phace::{config, EmbedError};

#[derive(Parser, Debug)]
#[command(
    name = "phace",
    version,
    about = "Embed face regions into JPEG files as MWG region XMP metadata"
)]
struct Cli {
    /// Image files or directories to tag with --region, or to inspect with --show-regions
    #[arg(value_name = "PATH")]
    paths: Vec<PathBuf>,

    /// Library manifest (JSON) listing photos and their faces
    #[arg(short, long, value_name = "FILE", conflicts_with = "show_regions")]
    manifest: Option<PathBuf>,

    /// Region to add to every PATH, in display coordinates: TYPE:X,Y,D[:NAME]
    #[arg(short, long = "region", value_name = "SPEC", value_parser = parse_region)]
    regions: Vec<Region>,

    /// Print the region metadata already embedded in PATH(s) and exit
    #[arg(long = "show-regions")]
    show_regions: bool,

    /// Output directory (overrides config)
    #[arg(short, long, value_name = "DIR")]
    out: Option<PathBuf>,

    /// Maximum number of files processed at once (overrides config)
    #[arg(short, long, value_name = "N")]
    jobs: Option<usize>,

    /// Path to config file (default: config.json next to binary)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Initialize a default config.json and exit
    #[arg(long)]
    init: bool,

    /// Preview changes without writing any files
    #[arg(long)]
    dry_run: bool,

    /// Output results as JSON
    #[arg(long)]
    json: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

/// Parse `TYPE:X,Y,D[:NAME]`, e.g. `Face:0.4,0.3,0.12:Ada`.
fn parse_region(arg: &str) -> std::result::Result<Region, String> {
    let mut parts = arg.splitn(3, ':');
    let kind: RegionType = parts.next().unwrap_or_default().parse()?;
    let coords = parts
        .next()
        .ok_or_else(|| format!("missing coordinates in '{arg}', expected TYPE:X,Y,D[:NAME]"))?;

    let values = coords
        .split(',')
        .map(|v| v.trim().parse::<f64>().map_err(|_| format!("invalid coordinate '{v}'")))
        .collect::<std::result::Result<Vec<_>, _>>()?;
    let [x, y, d] = values[..] else {
        return Err(format!("expected three coordinates X,Y,D, got '{coords}'"));
    };

    let region = Region::new(kind, Area::circle(x, y, d));
    Ok(match parts.next() {
        Some(name) if !name.is_empty() => region.with_name(name),
        _ => region,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    // Handle --init
    if cli.init {
        let config = config::Config::default();
        let path = cli.config.as_deref();
        config.save(path)?;
        let save_path = match path {
            Some(p) => p.to_path_buf(),
            None => config::Config::config_path()?,
        };
        println!("Default config written to {}", save_path.display());
        return Ok(());
    }

    // Handle --show-regions
    if cli.show_regions {
        let images = pipeline::collect_images(&cli.paths);
        if images.is_empty() {
            anyhow::bail!("No JPEG files found in the specified paths.");
        }
        return show_regions(&images, cli.json);
    }

    // Load config and apply overrides
    let mut config = config::Config::load(cli.config.as_deref())?;
    if cli.dry_run {
        config.output.dry_run = true;
    }
    if let Some(out) = cli.out {
        config.output.dir = out;
    }
    if let Some(jobs) = cli.jobs {
        config.concurrency.max_tasks = Some(jobs);
    }

    // Build the batch
    let mut reports = Vec::new();
    let jobs = if let Some(ref manifest_path) = cli.manifest {
        let manifest = Manifest::load(manifest_path)?;
        log::info!("Manifest lists {} photo(s)", manifest.photos.len());
        manifest
            .photos
            .iter()
            .map(|entry| {
                let source = manifest.source_path(&entry.photo);
                EmbedJob::for_photo(source, &entry.photo, &entry.faces, &config.output.dir)
            })
            .collect()
    } else {
        if cli.paths.is_empty() {
            anyhow::bail!("No manifest or input files specified. Use --help for usage.");
        }
        if cli.regions.is_empty() {
            anyhow::bail!("No --region given for the input files. Use --help for usage.");
        }
        let images = pipeline::collect_images(&cli.paths);
        if images.is_empty() {
            anyhow::bail!("No JPEG files found in the specified paths.");
        }
        tag_jobs(&images, &cli.regions, &config.output.dir, &mut reports)
    };

    let total = jobs.len() + reports.len();
    log::info!("Found {total} photo(s) to process");
    if config.output.dry_run {
        log::info!("DRY RUN: no files will be written");
    }

    reports.extend(pipeline::embed_batch(jobs, &config).await?);

    for report in &reports {
        print_report(report);
    }

    // JSON output
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    }

    // Summary
    let success = reports.iter().filter(|r| r.is_success()).count();
    let skipped = reports.iter().filter(|r| r.is_skipped()).count();
    let failed = reports.iter().filter(|r| r.error.is_some()).count();
    log::info!("Done: {success} succeeded, {failed} failed, {skipped} skipped out of {total} photos");

    Ok(())
}

/// Jobs for tagging plain image files with the same regions. Files that
/// cannot be probed get a failed report instead of a job.
fn tag_jobs(
    images: &[PathBuf],
    regions: &[Region],
    out_dir: &Path,
    reports: &mut Vec<EmbedReport>,
) -> Vec<EmbedJob> {
    let mut jobs = Vec::new();
    for path in images {
        match ImageDescriptor::probe(path) {
            Ok(descriptor) => jobs.push(EmbedJob {
                source: path.clone(),
                output: pipeline::output_path(path, out_dir),
                descriptor,
                regions: regions.to_vec(),
                warnings: Vec::new(),
            }),
            Err(e) => reports.push(EmbedReport::failed(path, &e)),
        }
    }
    jobs
}

fn print_report(report: &EmbedReport) {
    if let Some(ref err) = report.error {
        log::error!("{}: {err}", report.path.display());
    } else if let Some(ref reason) = report.skipped {
        log::info!("{}: skipped ({reason})", report.path.display());
    } else if report.dry_run {
        log::info!(
            "{}: would write {} new region(s), {} in total",
            report.path.display(),
            report.regions_written,
            report.total_regions
        );
    }
    for warning in &report.warnings {
        log::warn!("{}: {warning}", report.path.display());
    }
}

fn show_regions(images: &[PathBuf], json: bool) -> Result<()> {
    let mut found: Vec<serde_json::Value> = Vec::new();

    for path in images {
        let result: std::result::Result<Option<RegionDocument>, EmbedError> = pipeline::read_regions(path);
        match result {
            Ok(doc) if json => found.push(serde_json::json!({
                "path": path.display().to_string(),
                "regions": doc,
            })),
            Ok(doc) => print_document(path, doc.as_ref()),
            Err(e) if json => found.push(serde_json::json!({
                "path": path.display().to_string(),
                "error": e.to_string(),
                "error_kind": e.kind(),
            })),
            Err(e) => log::error!("{}: {e}", path.display()),
        }
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&found)?);
    }
    Ok(())
}

// ANSI color codes
const DIM: &str = "\x1b[2m";
const RESET: &str = "\x1b[0m";
const BOLD: &str = "\x1b[1m";

fn print_document(path: &Path, doc: Option<&RegionDocument>) {
    println!();
    println!("{BOLD}File:{RESET} {}", path.display());
    println!("{DIM}{}{RESET}", "═".repeat(72));

    let Some(doc) = doc else {
        println!("  {DIM}(no region metadata found){RESET}");
        return;
    };

    let dims = &doc.applied_to_dimensions;
    println!("  {:<22} : {} x {} {}", "AppliedToDimensions", dims.w, dims.h, dims.unit);
    println!("  {DIM}{}{RESET}", "─".repeat(70));

    for (i, region) in doc.regions.iter().enumerate() {
        let area = &region.area;
        let shape = match (area.d, area.w, area.h) {
            (Some(d), _, _) => format!("d={d}"),
            (None, Some(w), Some(h)) => format!("w={w} h={h}"),
            _ => "point".to_string(),
        };
        let label = format!("#{} {}", i + 1, region.kind);
        println!("  {label:<22} : x={} y={} {shape} ({})", area.x, area.y, area.unit);
        if let Some(ref name) = region.name {
            println!("  {:<22} : {name}", "  Name");
        }
        if let Some(ref desc) = region.description {
            println!("  {:<22} : {desc}", "  Description");
        }
        if let Some(usage) = region.focus_usage {
            println!("  {:<22} : {}", "  FocusUsage", usage.as_str());
        }
        if let Some(ref value) = region.barcode_value {
            println!("  {:<22} : {value}", "  BarCodeValue");
        }
    }
    if doc.regions.is_empty() {
        println!("  {DIM}(empty region list){RESET}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── parse_region ─────────────────────────────────────────────────

    #[test]
    fn parse_region_with_name() {
        let region = parse_region("Face:0.4,0.3,0.12:Ada Lovelace").unwrap();
        assert_eq!(region.kind, RegionType::Face);
        assert_eq!(region.area, Area::circle(0.4, 0.3, 0.12));
        assert_eq!(region.name.as_deref(), Some("Ada Lovelace"));
    }

    #[test]
    fn parse_region_without_name() {
        let region = parse_region("Pet:0.5, 0.5, 0.2").unwrap();
        assert_eq!(region.kind, RegionType::Pet);
        assert!(region.name.is_none());
    }

    #[test]
    fn parse_region_name_may_contain_colons() {
        let region = parse_region("Face:0.1,0.1,0.1:Dr: Who").unwrap();
        assert_eq!(region.name.as_deref(), Some("Dr: Who"));
    }

    #[test]
    fn parse_region_rejects_bad_specs() {
        assert!(parse_region("Car:0.1,0.1,0.1").is_err());
        assert!(parse_region("Face").is_err());
        assert!(parse_region("Face:0.1,0.1").is_err());
        assert!(parse_region("Face:0.1,x,0.1").is_err());
    }
}
