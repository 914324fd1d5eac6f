//! Mapping library face geometry into the image's displayed orientation.
//!
//! The library stores face positions in its own normalized axes. The mapping to
//! the displayed frame is a per-code table that was worked out from sample
//! photos, not a general rotation model, so codes 2, 4, 5 and 7 (never seen
//! with faces) fall through unchanged.

use crate::library::Face;
use crate::regions::{Area, Region, RegionType};

/// EXIF orientation code as recorded by the library.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    /// 1
    TopLeft,
    /// 3
    BottomRight,
    /// 6
    RightTop,
    /// 8
    LeftBottom,
    Unrecognized(i32),
}

impl Orientation {
    pub fn from_code(code: i32) -> Self {
        match code {
            1 => Self::TopLeft,
            3 => Self::BottomRight,
            6 => Self::RightTop,
            8 => Self::LeftBottom,
            other => Self::Unrecognized(other),
        }
    }

    pub fn code(self) -> i32 {
        match self {
            Self::TopLeft => 1,
            Self::BottomRight => 3,
            Self::RightTop => 6,
            Self::LeftBottom => 8,
            Self::Unrecognized(code) => code,
        }
    }

    pub fn is_recognized(self) -> bool {
        !matches!(self, Self::Unrecognized(_))
    }
}

/// A point in normalized [0, 1] image coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Map one point from library space into display space.
///
/// Unrecognized orientations return the point unchanged and log a warning.
pub fn normalize(point: Point, orientation: Orientation) -> Point {
    if let Orientation::Unrecognized(code) = orientation {
        log::warn!("unrecognized orientation code {code}, leaving coordinates unchanged");
    }
    transform(point, orientation)
}

fn transform(Point { x, y }: Point, orientation: Orientation) -> Point {
    match orientation {
        Orientation::TopLeft => Point::new(x, 1.0 - y),
        Orientation::BottomRight => Point::new(1.0 - x, y),
        Orientation::RightTop => Point::new(1.0 - y, 1.0 - x),
        Orientation::LeftBottom => Point::new(y, x),
        Orientation::Unrecognized(_) => Point::new(x, y),
    }
}

/// A face with every point of interest in display space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalizedFace {
    pub center: Point,
    /// Twice the library's radius-like `size`.
    pub diameter: f64,
    pub left_eye: Point,
    pub right_eye: Point,
    pub mouth: Point,
}

pub fn normalize_face(face: &Face, orientation: Orientation) -> NormalizedFace {
    if let Orientation::Unrecognized(code) = orientation {
        log::warn!("unrecognized orientation code {code}, leaving face coordinates unchanged");
    }
    NormalizedFace {
        center: transform(Point::new(face.center_x, face.center_y), orientation),
        diameter: face.size * 2.0,
        left_eye: transform(Point::new(face.left_eye_x, face.left_eye_y), orientation),
        right_eye: transform(Point::new(face.right_eye_x, face.right_eye_y), orientation),
        mouth: transform(Point::new(face.mouth_x, face.mouth_y), orientation),
    }
}

/// Build the `Face` region written to XMP for a library face.
pub fn region_from_face(face: &Face, orientation: Orientation) -> Region {
    let normalized = normalize_face(face, orientation);
    let mut region = Region::new(
        RegionType::Face,
        Area::circle(normalized.center.x, normalized.center.y, normalized.diameter),
    );
    region.name = face.name.clone();
    region
}
