//! Grayscale raster operations backing the star detector.

use ndarray::{Array2, ArrayView2, ArrayView3};

use crate::Float;

/// Normalized 1D Gaussian kernel, truncated at four standard deviations.
fn gaussian_kernel<F: Float>(sigma: F) -> Vec<F> {
    let radius = (sigma * F::from_f64(4.0).unwrap())
        .ceil()
        .to_isize()
        .unwrap_or(1)
        .max(1);
    let denom = F::from_f64(2.0).unwrap() * sigma * sigma;
    let mut kernel: Vec<F> = (-radius..=radius)
        .map(|i| {
            let x = F::from_isize(i).unwrap();
            (-(x * x) / denom).exp()
        })
        .collect();
    let sum = kernel
        .iter()
        .fold(F::from_f64(0.0).unwrap(), |acc, w| acc + *w);
    for w in &mut kernel {
        *w /= sum;
    }
    kernel
}

/// Separable Gaussian smoothing with clamp-to-edge boundary handling.
///
/// A non-positive `sigma` returns the input unchanged.
pub fn gaussian_blur<F: Float>(image: ArrayView2<F>, sigma: F) -> Array2<F> {
    if sigma <= F::from_f64(0.0).unwrap() {
        return image.to_owned();
    }
    let kernel = gaussian_kernel(sigma);
    let radius = (kernel.len() / 2) as isize;
    let (height, width) = image.dim();
    let zero = F::from_f64(0.0).unwrap();

    let mut rows = Array2::from_elem((height, width), zero);
    for r in 0..height {
        for c in 0..width {
            let mut acc = zero;
            for (k, weight) in kernel.iter().enumerate() {
                let cc = (c as isize + k as isize - radius).clamp(0, width as isize - 1) as usize;
                acc += image[[r, cc]] * *weight;
            }
            rows[[r, c]] = acc;
        }
    }

    let mut out = Array2::from_elem((height, width), zero);
    for r in 0..height {
        for c in 0..width {
            let mut acc = zero;
            for (k, weight) in kernel.iter().enumerate() {
                let rr = (r as isize + k as isize - radius).clamp(0, height as isize - 1) as usize;
                acc += rows[[rr, c]] * *weight;
            }
            out[[r, c]] = acc;
        }
    }
    out
}

/// Discrete Laplacian (5-point stencil) with clamp-to-edge boundary handling.
pub fn laplacian<F: Float>(image: ArrayView2<F>) -> Array2<F> {
    let (height, width) = image.dim();
    let four = F::from_f64(4.0).unwrap();
    let mut out = Array2::from_elem((height, width), F::from_f64(0.0).unwrap());
    for r in 0..height {
        for c in 0..width {
            let up = image[[r.saturating_sub(1), c]];
            let down = image[[(r + 1).min(height - 1), c]];
            let left = image[[r, c.saturating_sub(1)]];
            let right = image[[r, (c + 1).min(width - 1)]];
            out[[r, c]] = up + down + left + right - four * image[[r, c]];
        }
    }
    out
}

/// Resample `image` by `scale` with bilinear interpolation.
///
/// Downscaling smooths the input first (`sigma = (1/scale - 1) / 2`) so high
/// frequencies do not alias into the result.
pub fn rescale<F: Float>(image: ArrayView2<F>, scale: F) -> Array2<F> {
    let one = F::from_f64(1.0).unwrap();

    if scale < one {
        let anti_alias = (one / scale - one) / F::from_f64(2.0).unwrap();
        let smoothed = gaussian_blur(image, anti_alias);
        resample(smoothed.view(), scale)
    } else {
        resample(image, scale)
    }
}

fn resample<F: Float>(source: ArrayView2<F>, scale: F) -> Array2<F> {
    let zero = F::from_f64(0.0).unwrap();
    let half = F::from_f64(0.5).unwrap();

    let (height, width) = source.dim();
    let out_height = (F::from_usize(height).unwrap() * scale)
        .round()
        .to_usize()
        .unwrap_or(1)
        .max(1);
    let out_width = (F::from_usize(width).unwrap() * scale)
        .round()
        .to_usize()
        .unwrap_or(1)
        .max(1);

    let max_row = F::from_usize(height - 1).unwrap();
    let max_col = F::from_usize(width - 1).unwrap();
    let mut out = Array2::from_elem((out_height, out_width), zero);
    for r in 0..out_height {
        let src_r = ((F::from_usize(r).unwrap() + half) / scale - half)
            .max(zero)
            .min(max_row);
        for c in 0..out_width {
            let src_c = ((F::from_usize(c).unwrap() + half) / scale - half)
                .max(zero)
                .min(max_col);
            out[[r, c]] = bilinear(source, src_r, src_c);
        }
    }
    out
}

fn bilinear<F: Float>(image: ArrayView2<F>, row: F, col: F) -> F {
    let (height, width) = image.dim();
    let r0 = row.floor().to_usize().unwrap_or(0);
    let c0 = col.floor().to_usize().unwrap_or(0);
    let r1 = (r0 + 1).min(height - 1);
    let c1 = (c0 + 1).min(width - 1);
    let fr = row - F::from_usize(r0).unwrap();
    let fc = col - F::from_usize(c0).unwrap();
    let one = F::from_f64(1.0).unwrap();
    (one - fr) * ((one - fc) * image[[r0, c0]] + fc * image[[r0, c1]])
        + fr * ((one - fc) * image[[r1, c0]] + fc * image[[r1, c1]])
}

/// Fixed luminance transform collapsing an `(h, w, 3)` RGB raster to
/// grayscale, with ITU-R 601 weights.
pub fn luminance<F: Float>(rgb: ArrayView3<F>) -> Array2<F> {
    let wr = F::from_f64(0.2125).unwrap();
    let wg = F::from_f64(0.7154).unwrap();
    let wb = F::from_f64(0.0721).unwrap();
    let (height, width, _) = rgb.dim();
    Array2::from_shape_fn((height, width), |(r, c)| {
        wr * rgb[[r, c, 0]] + wg * rgb[[r, c, 1]] + wb * rgb[[r, c, 2]]
    })
}
