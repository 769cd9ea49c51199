//! Two-stage star detection.
//!
//! Stage A localizes candidates coarsely: the frame is downscaled and run
//! through multi-scale blob detection, which bounds the cost of the search
//! and suppresses pixel noise. Stage B refines every candidate on an
//! upscaled crop around it, re-detecting the blob for a sub-pixel position
//! and fitting a 2D Gaussian profile for the spread estimate. Candidates
//! whose refinement fails are dropped from the result, with a log entry as
//! the only trace.

use log::debug;
use ndarray::{s, ArrayView2};

use crate::blob::{blob_log, BlobConfig};
use crate::imageops::rescale;
use crate::psf;
use crate::star::{Point, Star};

/// Two-stage star detector.
///
/// The default parameters mirror the classic deep-sky configuration: a 5×
/// downscale for the coarse pass and a 5× upscale for refinement, searching
/// blob scales between 3 and 10 pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StarDetector {
    /// Downscale factor applied before the coarse pass.
    pub scale: f64,
    /// Upscale factor applied to each refinement window.
    pub refine_scale: f64,
    /// Blob search parameters in original-image sigma units.
    pub blob: BlobConfig<f64>,
}

impl Default for StarDetector {
    fn default() -> Self {
        Self {
            scale: 0.2,
            refine_scale: 5.0,
            blob: BlobConfig::default(),
        }
    }
}

impl StarDetector {
    /// Detect stars in a grayscale frame.
    ///
    /// Returns the successfully refined stars, every one carrying a
    /// position, radius, and fwhm. A frame without detectable sources yields
    /// an empty vector, not an error.
    pub fn detect(&self, image: ArrayView2<f64>) -> Vec<Star> {
        let candidates = self.locate(image);
        debug!("{} coarse candidates", candidates.len());
        candidates
            .into_iter()
            .filter_map(|candidate| self.refine(image, &candidate))
            .collect()
    }

    /// Stage A: coarse candidates from blob detection on a downscaled copy.
    ///
    /// Positions and radii are mapped back to original-image coordinates;
    /// the radius is twice the blob sigma, a diameter-like measure.
    fn locate(&self, image: ArrayView2<f64>) -> Vec<Star> {
        let small = rescale(image, self.scale);
        blob_log(small.view(), &self.blob.scaled(self.scale))
            .into_iter()
            .map(|blob| {
                Star::new(
                    Point::new(blob.col / self.scale, blob.row / self.scale),
                    blob.sigma * 2.0 / self.scale,
                )
            })
            .collect()
    }

    /// Stage B: sub-pixel refinement of one candidate.
    ///
    /// Crops a window of half-width `2 × radius` around the candidate
    /// (clipped to the image bounds), upscales it, re-runs the blob search
    /// inside, and fits a Gaussian profile. The strongest blob in the window
    /// wins. Returns `None` when the window degenerates, no blob is found,
    /// or the profile fit fails.
    fn refine(&self, image: ArrayView2<f64>, candidate: &Star) -> Option<Star> {
        debug!("refining {candidate}");
        let (height, width) = image.dim();
        let reach = candidate.radius * 2.0;
        let size = (2.0 * reach).ceil() as usize;

        let row0 = (candidate.y() - reach).floor().max(0.0) as usize;
        let col0 = (candidate.x() - reach).floor().max(0.0) as usize;
        let row1 = (row0 + size).min(height);
        let col1 = (col0 + size).min(width);
        if row1 <= row0 + 1 || col1 <= col0 + 1 {
            debug!("refining {candidate} failed: window degenerated at the frame edge");
            return None;
        }

        let window = image.slice(s![row0..row1, col0..col1]);
        let zoomed = rescale(window, self.refine_scale);
        let blobs = blob_log(zoomed.view(), &self.blob.scaled(self.refine_scale));
        let Some(blob) = blobs.first() else {
            debug!("refining {candidate} failed: no blob in window");
            return None;
        };
        let Some(profile) = psf::fit(zoomed.view()) else {
            debug!("refining {candidate} failed: profile fit did not converge");
            return None;
        };

        Some(Star {
            position: Point::new(
                col0 as f64 + blob.col / self.refine_scale,
                row0 as f64 + blob.row / self.refine_scale,
            ),
            radius: blob.sigma * 2.0 / self.refine_scale,
            fwhm: Some(profile.width / self.refine_scale),
        })
    }
}
