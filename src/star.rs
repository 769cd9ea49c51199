//! Value types for detected point sources.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A position in image pixel space, `x` along columns and `y` along rows.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// Column coordinate.
    pub x: f64,
    /// Row coordinate.
    pub y: f64,
}

impl Point {
    /// Create a point from its coordinates.
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// A detected point source.
///
/// `radius` derives from the blob scale the source was detected at and is
/// always non-negative. `fwhm` is only present once sub-pixel refinement has
/// fitted a Gaussian profile to the source; coarse candidates carry `None`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Star {
    /// Sub-pixel position of the source.
    pub position: Point,
    /// Diameter-like size estimate from the detection scale.
    pub radius: f64,
    /// Refined spread estimate, present only after refinement.
    #[serde(default)]
    pub fwhm: Option<f64>,
}

impl Star {
    /// Create an unrefined star from position and radius.
    pub fn new(position: Point, radius: f64) -> Self {
        Self {
            position,
            radius,
            fwhm: None,
        }
    }

    /// Column coordinate of the source.
    pub fn x(&self) -> f64 {
        self.position.x
    }

    /// Row coordinate of the source.
    pub fn y(&self) -> f64 {
        self.position.y
    }
}

impl fmt::Display for Star {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.fwhm {
            Some(fwhm) => write!(
                f,
                "Star(x={:.2} y={:.2} fwhm={:.2})",
                self.x(),
                self.y(),
                fwhm
            ),
            None => write!(f, "Star(x={:.2} y={:.2} r={:.2})", self.x(), self.y(), self.radius),
        }
    }
}
