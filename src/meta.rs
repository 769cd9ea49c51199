//! The per-frame metadata record persisted in sidecar files.

use std::collections::BTreeMap;

use nalgebra::Matrix3;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::star::{Point, Star};

/// Schema version embedded in every sidecar record.
pub const META_VERSION: &str = "1.0";

/// Star registration state of a frame.
///
/// `Undetected` serializes as JSON `null`, so sidecars distinguish
/// "detection never ran" from "detection ran and found nothing" (an empty
/// list). Detection results are always written wholesale; there is no
/// merging across runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Detection {
    /// Detection has not run for this frame.
    #[default]
    Undetected,
    /// Detection ran and produced this star list (possibly empty).
    Detected(Vec<Star>),
}

impl Detection {
    /// The registered stars, if detection has run.
    pub fn stars(&self) -> Option<&[Star]> {
        match self {
            Detection::Undetected => None,
            Detection::Detected(stars) => Some(stars),
        }
    }

    /// Whether detection has run for this frame.
    pub fn is_detected(&self) -> bool {
        matches!(self, Detection::Detected(_))
    }

    /// Star positions as an `(n, 2)` matrix of `(x, y)` rows for the matcher.
    ///
    /// Returns `None` while undetected; radius and fwhm are not part of the
    /// matcher input.
    pub fn positions(&self) -> Option<Array2<f64>> {
        let stars = self.stars()?;
        let flat: Vec<f64> = stars.iter().flat_map(|s| [s.x(), s.y()]).collect();
        Some(Array2::from_shape_vec((stars.len(), 2), flat).expect("(n, 2) position matrix"))
    }
}

/// A 2D affine transform stored row-major as a 3×3 matrix.
///
/// Transforms produced by the matcher are similarity transforms (rotation,
/// uniform scale, translation); the decomposition accessors assume that
/// form. Applied to a point `(x, y, 1)ᵀ`, the first two rows give the mapped
/// coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Transform {
    matrix: [[f64; 3]; 3],
}

impl Transform {
    /// Wrap a 3×3 transform matrix.
    pub fn from_matrix(matrix: &Matrix3<f64>) -> Self {
        let mut rows = [[0.0; 3]; 3];
        for (i, row) in rows.iter_mut().enumerate() {
            for (j, value) in row.iter_mut().enumerate() {
                *value = matrix[(i, j)];
            }
        }
        Self { matrix: rows }
    }

    /// The transform as a nalgebra matrix.
    pub fn matrix(&self) -> Matrix3<f64> {
        Matrix3::from_fn(|i, j| self.matrix[i][j])
    }

    /// Map a point from the frame this transform belongs to onto the
    /// reference frame it was computed against.
    pub fn apply(&self, point: Point) -> Point {
        let m = &self.matrix;
        Point::new(
            m[0][0] * point.x + m[0][1] * point.y + m[0][2],
            m[1][0] * point.x + m[1][1] * point.y + m[1][2],
        )
    }

    /// Rotation component in radians.
    pub fn rotation(&self) -> f64 {
        self.matrix[1][0].atan2(self.matrix[0][0])
    }

    /// Uniform scale component.
    pub fn scale(&self) -> f64 {
        self.matrix[0][0].hypot(self.matrix[1][0])
    }

    /// Translation component `(x, y)`.
    pub fn translation(&self) -> (f64, f64) {
        (self.matrix[0][2], self.matrix[1][2])
    }
}

/// One metadata record per source image file.
///
/// The record is valid only while `checksum` matches the current bytes of
/// the source file; see [`Frame::load`](crate::frame::Frame::load) for the
/// revalidation policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileMetadata {
    /// SHA-256 hex digest of the source file bytes at last save.
    pub checksum: String,
    /// Opaque unique id, assigned once at record creation and never reassigned.
    pub id: String,
    /// Star registration state.
    #[serde(default)]
    pub stars: Detection,
    /// Transforms onto other frames, keyed by the reference frame's id.
    /// Aligning against a new reference adds an entry; entries are never
    /// removed.
    #[serde(default)]
    pub transforms: BTreeMap<String, Transform>,
    /// Schema version, for forward-compatible evolution.
    pub version: String,
}

impl FileMetadata {
    /// A fresh record for a file with the given content checksum.
    pub fn new(checksum: String) -> Self {
        Self {
            checksum,
            id: Uuid::new_v4().to_string(),
            stars: Detection::Undetected,
            transforms: BTreeMap::new(),
            version: META_VERSION.to_owned(),
        }
    }
}
