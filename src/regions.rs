//! In-memory model of the MWG region schema.
//!
//! A [`RegionDocument`] mirrors `mwg-rs:Regions`: the dimensions the regions
//! were computed against plus an ordered list of [`Region`]s. Documents are
//! decoded from existing XMP by [`crate::xmp::decode_packet`], extended with
//! [`merge`], and serialized by [`crate::xmp::encode`].

use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Area unit for coordinates expressed as fractions of the image size.
pub const NORMALIZED: &str = "normalized";

/// The kind of thing a region marks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RegionType {
    Face,
    Pet,
    Focus,
    BarCode,
}

impl RegionType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Face => "Face",
            Self::Pet => "Pet",
            Self::Focus => "Focus",
            Self::BarCode => "BarCode",
        }
    }
}

impl FromStr for RegionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Face" => Ok(Self::Face),
            "Pet" => Ok(Self::Pet),
            "Focus" => Ok(Self::Focus),
            "BarCode" => Ok(Self::BarCode),
            other => Err(format!("unknown region type '{other}'")),
        }
    }
}

impl fmt::Display for RegionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a focus region took part in focusing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FocusUsage {
    EvaluatedUsed,
    EvaluatedNotUsed,
    NotEvaluatedNotUsed,
}

impl FocusUsage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::EvaluatedUsed => "EvaluatedUsed",
            Self::EvaluatedNotUsed => "EvaluatedNotUsed",
            Self::NotEvaluatedNotUsed => "NotEvaluatedNotUsed",
        }
    }
}

impl FromStr for FocusUsage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "EvaluatedUsed" => Ok(Self::EvaluatedUsed),
            "EvaluatedNotUsed" => Ok(Self::EvaluatedNotUsed),
            "NotEvaluatedNotUsed" => Ok(Self::NotEvaluatedNotUsed),
            other => Err(format!("unknown focus usage '{other}'")),
        }
    }
}

/// `stArea` structure: a center point plus either a diameter or a width/height.
///
/// Regions created here always carry `d`; rectangles written by other tools keep
/// their `w`/`h` through a decode and re-encode.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Area {
    pub x: f64,
    pub y: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub w: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub h: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub d: Option<f64>,
    pub unit: String,
}

impl Area {
    /// A circular area in normalized coordinates.
    pub fn circle(x: f64, y: f64, diameter: f64) -> Self {
        Self {
            x,
            y,
            w: None,
            h: None,
            d: Some(diameter),
            unit: NORMALIZED.to_string(),
        }
    }
}

/// One `mwg-rs:RegionStruct`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Region {
    #[serde(rename = "type")]
    pub kind: RegionType,
    pub area: Area,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub focus_usage: Option<FocusUsage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub barcode_value: Option<String>,
}

impl Region {
    pub fn new(kind: RegionType, area: Area) -> Self {
        Self {
            kind,
            area,
            name: None,
            description: None,
            focus_usage: None,
            barcode_value: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// `stDim` structure for `mwg-rs:AppliedToDimensions`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Dimensions {
    pub w: f64,
    pub h: f64,
    pub unit: String,
}

impl Dimensions {
    pub fn new(width: u32, height: u32, unit: impl Into<String>) -> Self {
        Self {
            w: width as f64,
            h: height as f64,
            unit: unit.into(),
        }
    }
}

/// The decoded or freshly built `mwg-rs:Regions` value for one file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegionDocument {
    pub applied_to_dimensions: Dimensions,
    pub regions: Vec<Region>,
}

/// Combine an existing document with newly computed regions.
///
/// Without an existing document a fresh one is built against `dimensions`.
/// Otherwise `new_regions` are appended after the existing ones, in order. The
/// existing regions are neither deduplicated nor checked against `dimensions`,
/// so embedding the same faces twice leaves two copies of each.
pub fn merge(
    existing: Option<RegionDocument>,
    dimensions: Dimensions,
    new_regions: Vec<Region>,
) -> RegionDocument {
    match existing {
        None => RegionDocument {
            applied_to_dimensions: dimensions,
            regions: new_regions,
        },
        Some(mut doc) => {
            if doc.applied_to_dimensions != dimensions {
                log::debug!(
                    "keeping existing applied dimensions {}x{} (image is {}x{})",
                    doc.applied_to_dimensions.w,
                    doc.applied_to_dimensions.h,
                    dimensions.w,
                    dimensions.h
                );
            }
            doc.regions.extend(new_regions);
            doc
        }
    }
}
