//! Isotropic 2D Gaussian profile fitting for sub-pixel spread estimates.

use nalgebra::{Matrix4, Vector4};
use ndarray::ArrayView2;

use crate::Float;

/// Parameters of an isotropic 2D Gaussian in raster coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Gaussian2d<F> {
    /// Peak height.
    pub height: F,
    /// Center row.
    pub row: F,
    /// Center column.
    pub col: F,
    /// Isotropic width.
    pub width: F,
}

impl<F: Float> Gaussian2d<F> {
    /// Model intensity at `(row, col)`.
    pub fn eval(&self, row: F, col: F) -> F {
        let dr = (self.row - row) / self.width;
        let dc = (self.col - col) / self.width;
        self.height * (-(dr * dr + dc * dc) / F::from_f64(2.0).unwrap()).exp()
    }
}

/// Initial parameter estimate from the intensity moments of `data`.
///
/// The center comes from the first moments, the width from the second moment
/// of the column through the centroid, and the height from the maximum
/// intensity. Returns `None` when the total intensity is not positive.
pub fn moments<F: Float>(data: ArrayView2<F>) -> Option<Gaussian2d<F>> {
    let zero = F::from_f64(0.0).unwrap();
    let total = data.sum();
    if total <= zero {
        return None;
    }

    let (height, width) = data.dim();
    let mut row = zero;
    let mut col = zero;
    let mut peak = zero;
    for ((r, c), &value) in data.indexed_iter() {
        row += F::from_usize(r).unwrap() * value;
        col += F::from_usize(c).unwrap() * value;
        peak = peak.max(value);
    }
    row /= total;
    col /= total;

    let center_col = col.round().to_usize().unwrap_or(0).min(width - 1);
    let profile = data.column(center_col);
    let profile_sum = profile.sum();
    let spread = if profile_sum > zero {
        let mut second = zero;
        for (r, &value) in profile.iter().enumerate() {
            let offset = F::from_usize(r).unwrap() - row;
            second += offset * offset * value;
        }
        (second / profile_sum).abs().sqrt()
    } else {
        F::from_f64(1.0).unwrap()
    };

    Some(Gaussian2d {
        height: peak,
        row,
        col,
        width: spread.max(F::from_f64(0.5).unwrap()),
    })
}

/// Fit an isotropic 2D Gaussian to `data` by nonlinear least squares.
///
/// Starts from the moment estimate and minimizes the sum of squared
/// residuals between model and observed intensities with Levenberg-Marquardt
/// iterations on the damped normal equations. Returns `None` for degenerate
/// input (no positive intensity, too few pixels) or when the iteration
/// collapses the width to zero. The returned width is always positive.
pub fn fit<F: Float>(data: ArrayView2<F>) -> Option<Gaussian2d<F>> {
    if data.len() < 8 {
        return None;
    }
    let mut params = moments(data)?;

    let two = F::from_f64(2.0).unwrap();
    let width_floor = F::from_f64(1e-6).unwrap();
    let mut lambda = F::from_f64(1e-3).unwrap();
    let lambda_ceiling = F::from_f64(1e12).unwrap();
    let mut cost = residual_cost(data, &params);

    for _ in 0..60 {
        // Accumulate JᵀJ and Jᵀr over all pixels.
        let mut jtj = Matrix4::zeros();
        let mut jtr = Vector4::zeros();
        for ((r, c), &observed) in data.indexed_iter() {
            let row = F::from_usize(r).unwrap();
            let col = F::from_usize(c).unwrap();
            let dr = params.row - row;
            let dc = params.col - col;
            let w2 = params.width * params.width;
            let envelope = (-(dr * dr + dc * dc) / (two * w2)).exp();

            let residual = params.height * envelope - observed;
            let jacobian = Vector4::new(
                envelope,
                -params.height * envelope * dr / w2,
                -params.height * envelope * dc / w2,
                params.height * envelope * (dr * dr + dc * dc) / (w2 * params.width),
            );
            jtj += jacobian * jacobian.transpose();
            jtr += jacobian * residual;
        }

        // Damped step, retried with a stiffer damping until the cost drops.
        let mut stepped = false;
        while lambda < lambda_ceiling {
            let mut damped = jtj;
            for i in 0..4 {
                damped[(i, i)] += lambda * jtj[(i, i)];
            }
            if let Some(delta) = damped.lu().solve(&(-jtr)) {
                let candidate = Gaussian2d {
                    height: params.height + delta[0],
                    row: params.row + delta[1],
                    col: params.col + delta[2],
                    width: params.width + delta[3],
                };
                if candidate.width.abs() > width_floor {
                    let candidate_cost = residual_cost(data, &candidate);
                    if candidate_cost < cost {
                        let step = delta.norm();
                        params = candidate;
                        cost = candidate_cost;
                        lambda /= F::from_f64(10.0).unwrap();
                        stepped = true;
                        if step < F::from_f64(1e-10).unwrap() {
                            return Some(finished(params));
                        }
                        break;
                    }
                }
            }
            lambda *= F::from_f64(10.0).unwrap();
        }
        if !stepped {
            break;
        }
    }

    if params.width.abs() <= width_floor {
        return None;
    }
    Some(finished(params))
}

fn finished<F: Float>(mut params: Gaussian2d<F>) -> Gaussian2d<F> {
    params.width = params.width.abs();
    params
}

fn residual_cost<F: Float>(data: ArrayView2<F>, params: &Gaussian2d<F>) -> F {
    let mut cost = F::from_f64(0.0).unwrap();
    for ((r, c), &observed) in data.indexed_iter() {
        let residual =
            params.eval(F::from_usize(r).unwrap(), F::from_usize(c).unwrap()) - observed;
        cost += residual * residual;
    }
    cost
}
