//! Records handed over by the photo-library layer.
//!
//! The library database itself is not read here. Photos and their faces arrive
//! as a JSON [`Manifest`] whose field names follow the library's column names.

use anyhow::{Context, Result};
use nom_exif::{EntryValue, Exif, ExifIter, ExifTag, MediaParser, MediaSource};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::EmbedError;
use crate::orientation::Orientation;

/// A photo record, referencing an image file on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Photo {
    /// Path to the image, absolute or relative to the library's masters folder.
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
    #[serde(default = "default_orientation")]
    pub orientation: i32,
    #[serde(default)]
    pub has_adjustments: bool,
    #[serde(rename = "type", default)]
    pub kind: i32,
}

fn default_orientation() -> i32 {
    1
}

impl Photo {
    pub fn descriptor(&self) -> ImageDescriptor {
        ImageDescriptor {
            width: self.width,
            height: self.height,
            orientation: Orientation::from_code(self.orientation),
        }
    }
}

/// A recognized face in a single photo.
///
/// Every coordinate is a fraction of the stored image size, in the library's
/// own axes (before any orientation is applied). `size` is radius-like.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Face {
    pub center_x: f64,
    pub center_y: f64,
    pub size: f64,
    pub left_eye_x: f64,
    pub left_eye_y: f64,
    pub right_eye_x: f64,
    pub right_eye_y: f64,
    pub mouth_x: f64,
    pub mouth_y: f64,
    pub has_smile: bool,
    pub is_blurred: bool,
    pub is_left_eye_closed: bool,
    pub is_right_eye_closed: bool,
    pub group_id: Option<String>,
    /// Person name for the face group, written as the region name.
    pub name: Option<String>,
}

/// Size and orientation of the image a set of regions applies to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImageDescriptor {
    pub width: u32,
    pub height: u32,
    pub orientation: Orientation,
}

impl ImageDescriptor {
    /// Read dimensions and EXIF orientation straight from an image file.
    ///
    /// Used when no library record describes the image. A missing or unreadable
    /// orientation tag counts as orientation 1.
    pub fn probe(path: &Path) -> crate::error::Result<Self> {
        let (width, height) = image::ImageReader::open(path)?
            .with_guessed_format()?
            .into_dimensions()
            .map_err(|e| match e {
                image::ImageError::IoError(io) => EmbedError::Io(io),
                other => EmbedError::MalformedStream(format!("cannot read image size: {other}")),
            })?;

        let code = read_orientation(path).unwrap_or(1);
        Ok(Self {
            width,
            height,
            orientation: Orientation::from_code(code),
        })
    }
}

fn read_orientation(path: &Path) -> Option<i32> {
    let mut parser = MediaParser::new();
    let ms = MediaSource::file_path(path).ok()?;
    let iter: ExifIter = match parser.parse(ms) {
        Ok(iter) => iter,
        Err(_) => {
            log::debug!("No EXIF data found in {}", path.display());
            return None;
        }
    };
    let exif: Exif = iter.into();
    match exif.get(ExifTag::Orientation)? {
        EntryValue::U8(v) => Some(*v as i32),
        EntryValue::U16(v) => Some(*v as i32),
        EntryValue::U32(v) => Some(*v as i32),
        other => {
            log::debug!("Unexpected orientation value {other} in {}", path.display());
            None
        }
    }
}

/// One photo and the faces found in it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhotoEntry {
    #[serde(flatten)]
    pub photo: Photo,
    #[serde(default)]
    pub faces: Vec<Face>,
}

/// A batch of photos exported from the library.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Manifest {
    /// Folder that relative photo paths are resolved against.
    #[serde(default)]
    pub masters: Option<PathBuf>,
    pub photos: Vec<PhotoEntry>,
}

impl Manifest {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).context("Failed to read manifest file")?;
        let mut manifest: Manifest =
            serde_json::from_str(&contents).context("Failed to parse manifest file")?;

        // A relative masters folder is relative to the manifest itself.
        if let Some(masters) = manifest.masters.take() {
            let base = path.parent().unwrap_or_else(|| Path::new(""));
            manifest.masters = Some(if masters.is_relative() { base.join(masters) } else { masters });
        }
        Ok(manifest)
    }

    /// On-disk location of a photo's image file.
    pub fn source_path(&self, photo: &Photo) -> PathBuf {
        match &self.masters {
            Some(masters) if photo.path.is_relative() => masters.join(&photo.path),
            _ => photo.path.clone(),
        }
    }
}
