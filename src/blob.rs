//! Multi-scale Laplacian-of-Gaussian blob detection.

use log::debug;
use ndarray::{Array2, ArrayView2};

use crate::imageops::{gaussian_blur, laplacian};
use crate::Float;

/// A bright, approximately circular region detected at some scale.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Blob<F> {
    /// Row coordinate of the blob center.
    pub row: F,
    /// Column coordinate of the blob center.
    pub col: F,
    /// Gaussian scale the blob was strongest at.
    pub sigma: F,
    /// Scale-normalized filter response at the center.
    pub response: F,
}

/// Parameters of the multi-scale blob search.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlobConfig<F> {
    /// Smallest Gaussian scale searched.
    pub min_sigma: F,
    /// Largest Gaussian scale searched.
    pub max_sigma: F,
    /// Number of scales, linearly spaced between the bounds.
    pub num_sigma: usize,
    /// Minimum scale-normalized response for a maximum to count as a blob.
    pub threshold: F,
}

impl<F: Float> Default for BlobConfig<F> {
    fn default() -> Self {
        Self {
            min_sigma: F::from_f64(3.0).unwrap(),
            max_sigma: F::from_f64(10.0).unwrap(),
            num_sigma: 10,
            threshold: F::from_f64(0.2).unwrap(),
        }
    }
}

impl<F: Float> BlobConfig<F> {
    /// The same search with both sigma bounds multiplied by `factor`, for
    /// running on a resampled image.
    pub fn scaled(&self, factor: F) -> Self {
        Self {
            min_sigma: self.min_sigma * factor,
            max_sigma: self.max_sigma * factor,
            num_sigma: self.num_sigma,
            threshold: self.threshold,
        }
    }

    fn sigmas(&self) -> Vec<F> {
        if self.num_sigma <= 1 {
            return vec![self.min_sigma];
        }
        let step =
            (self.max_sigma - self.min_sigma) / F::from_usize(self.num_sigma - 1).unwrap();
        (0..self.num_sigma)
            .map(|i| self.min_sigma + step * F::from_usize(i).unwrap())
            .collect()
    }
}

/// Detect bright blobs in a grayscale image.
///
/// The image is filtered with a scale-normalized Laplacian of Gaussian at
/// each scale of `config`; local maxima of the response over the
/// position-scale volume that exceed the threshold become blobs. Overlapping
/// detections are pruned keeping the stronger response, and the result is
/// sorted by descending response, so the first blob is the most prominent
/// one. An image without any response above the threshold yields an empty
/// vector.
pub fn blob_log<F: Float>(image: ArrayView2<F>, config: &BlobConfig<F>) -> Vec<Blob<F>> {
    let sigmas = config.sigmas();
    let responses: Vec<Array2<F>> = sigmas
        .iter()
        .map(|&sigma| {
            let smoothed = gaussian_blur(image, sigma);
            let mut response = laplacian(smoothed.view());
            let norm = -sigma * sigma;
            response.mapv_inplace(|x| x * norm);
            response
        })
        .collect();

    let (height, width) = image.dim();
    let mut maxima = Vec::new();
    for (k, response) in responses.iter().enumerate() {
        for r in 0..height {
            for c in 0..width {
                let value = response[[r, c]];
                if value < config.threshold {
                    continue;
                }
                if is_scale_space_maximum(&responses, value, k, r, c) {
                    maxima.push(Blob {
                        row: F::from_usize(r).unwrap(),
                        col: F::from_usize(c).unwrap(),
                        sigma: sigmas[k],
                        response: value,
                    });
                }
            }
        }
    }

    maxima.sort_by(|a, b| {
        b.response
            .partial_cmp(&a.response)
            .expect("finite blob responses")
    });
    let blobs = prune_overlapping(maxima);
    debug!("{} blobs above threshold", blobs.len());
    blobs
}

/// Whether the response at `(k, r, c)` dominates its 26-neighborhood over
/// position and scale.
fn is_scale_space_maximum<F: Float>(
    responses: &[Array2<F>],
    value: F,
    k: usize,
    r: usize,
    c: usize,
) -> bool {
    let (height, width) = responses[0].dim();
    for dk in -1i64..=1 {
        for dr in -1i64..=1 {
            for dc in -1i64..=1 {
                if dk == 0 && dr == 0 && dc == 0 {
                    continue;
                }
                let nk = k as i64 + dk;
                let nr = r as i64 + dr;
                let nc = c as i64 + dc;
                if nk < 0
                    || nk >= responses.len() as i64
                    || nr < 0
                    || nr >= height as i64
                    || nc < 0
                    || nc >= width as i64
                {
                    continue;
                }
                if responses[nk as usize][[nr as usize, nc as usize]] > value {
                    return false;
                }
            }
        }
    }
    true
}

/// Drop every blob whose center falls within `√2·σ` of a stronger blob.
///
/// Input must be sorted by descending response.
fn prune_overlapping<F: Float>(blobs: Vec<Blob<F>>) -> Vec<Blob<F>> {
    let sqrt2 = F::from_f64(std::f64::consts::SQRT_2).unwrap();
    let mut kept: Vec<Blob<F>> = Vec::new();
    'candidates: for blob in blobs {
        for stronger in &kept {
            let dr = blob.row - stronger.row;
            let dc = blob.col - stronger.col;
            let reach = sqrt2 * stronger.sigma.max(blob.sigma);
            if dr * dr + dc * dc < reach * reach {
                continue 'candidates;
            }
        }
        kept.push(blob);
    }
    kept
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use ndarray::Array2;

    use super::*;

    /// Synthetic isotropic Gaussian spot.
    fn spot(shape: (usize, usize), row: f64, col: f64, sigma: f64, height: f64) -> Array2<f64> {
        Array2::from_shape_fn(shape, |(r, c)| {
            let dr = r as f64 - row;
            let dc = c as f64 - col;
            height * (-(dr * dr + dc * dc) / (2.0 * sigma * sigma)).exp()
        })
    }

    #[test]
    fn flat_image_has_no_blobs() {
        let image = Array2::from_elem((40, 40), 0.1);
        let config = BlobConfig {
            min_sigma: 1.0,
            max_sigma: 4.0,
            num_sigma: 6,
            threshold: 0.05,
        };
        assert!(blob_log(image.view(), &config).is_empty());
    }

    #[test]
    fn single_spot_found_at_matching_scale() {
        let image = spot((50, 50), 24.0, 30.0, 2.0, 1.0);
        let config = BlobConfig {
            min_sigma: 1.0,
            max_sigma: 4.0,
            num_sigma: 7,
            threshold: 0.1,
        };
        let blobs = blob_log(image.view(), &config);
        assert_eq!(blobs.len(), 1);
        assert_abs_diff_eq!(blobs[0].row, 24.0, epsilon = 1.0);
        assert_abs_diff_eq!(blobs[0].col, 30.0, epsilon = 1.0);
        assert_abs_diff_eq!(blobs[0].sigma, 2.0, epsilon = 1.0);
    }

    #[test]
    fn brightest_spot_comes_first() {
        let image = spot((80, 80), 20.0, 20.0, 2.0, 0.5) + spot((80, 80), 55.0, 60.0, 2.0, 1.0);
        let config = BlobConfig {
            min_sigma: 1.0,
            max_sigma: 4.0,
            num_sigma: 7,
            threshold: 0.1,
        };
        let blobs = blob_log(image.view(), &config);
        assert_eq!(blobs.len(), 2);
        assert_abs_diff_eq!(blobs[0].row, 55.0, epsilon = 1.0);
        assert_abs_diff_eq!(blobs[0].col, 60.0, epsilon = 1.0);
        assert!(blobs[0].response > blobs[1].response);
    }

    #[test]
    fn scaled_config_multiplies_sigma_bounds() {
        let config: BlobConfig<f64> = BlobConfig::default();
        let scaled = config.scaled(0.2);
        assert_abs_diff_eq!(scaled.min_sigma, 0.6);
        assert_abs_diff_eq!(scaled.max_sigma, 2.0);
        assert_eq!(scaled.num_sigma, config.num_sigma);
    }
}
