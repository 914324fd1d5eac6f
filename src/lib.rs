//! # phace
//!
//! Embed face regions from a photo library into JPEG files as MWG region XMP
//! (`mwg-rs:Regions`), without touching the compressed image data.
//!
//! ## Quick Start
//!
//! The pipeline module handles the full scan → merge → encode → rewrite flow
//! for a batch of library photos:
//!
//! ```rust,no_run
//! use phace::config::Config;
//! use phace::library::Manifest;
//! use phace::pipeline::{EmbedJob, embed_batch};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load(Some("config.json".as_ref()))?;
//!     let manifest = Manifest::load("library.json".as_ref())?;
//!
//!     let jobs = manifest
//!         .photos
//!         .iter()
//!         .map(|entry| {
//!             let source = manifest.source_path(&entry.photo);
//!             EmbedJob::for_photo(source, &entry.photo, &entry.faces, &config.output.dir)
//!         })
//!         .collect();
//!
//!     for report in embed_batch(jobs, &config).await? {
//!         if let Some(ref err) = report.error {
//!             eprintln!("{}: {err}", report.path.display());
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Lower-Level Usage
//!
//! Each stage can be driven on its own:
//!
//! ```rust,no_run
//! use phace::regions::{Area, Dimensions, Region, RegionType, merge};
//! use phace::{jfif, xmp};
//! use std::fs::File;
//! use std::io::BufReader;
//!
//! fn main() -> anyhow::Result<()> {
//!     let mut src = BufReader::new(File::open("photo.jpg")?);
//!     let layout = jfif::scan(&mut src)?;
//!     let meta = xmp::locate(&layout, &mut src)?;
//!
//!     let existing = meta.packet.as_ref().and_then(|p| p.regions.clone());
//!     let face = Region::new(RegionType::Face, Area::circle(0.5, 0.4, 0.2));
//!     let doc = merge(existing, Dimensions::new(4032, 3024, "pixel"), vec![face]);
//!
//!     let payload = xmp::encode(&doc, meta.packet.as_ref())?;
//!     let mut out = File::create("tagged.jpg")?;
//!     jfif::rewrite(&mut src, &mut out, &meta.rewrite_plan(), &payload)?;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`jfif`]: segment scanning and stream rewriting
//! - [`xmp`]: locating, decoding and encoding the XMP packet
//! - [`regions`]: the MWG region model and merge
//! - [`orientation`]: mapping library face coordinates to display space
//! - [`library`]: photo/face records and the JSON manifest
//! - [`pipeline`]: single-file and batch embedding, file collection
//! - [`config`]: configuration loading and saving
//! - [`error`]: per-file error taxonomy

pub mod config;
pub mod error;
pub mod jfif;
pub mod library;
pub mod orientation;
pub mod pipeline;
pub mod regions;
pub mod xmp;

pub use error::{EmbedError, ErrorKind};
