//! Shared geometry helpers for transform estimation.

use nalgebra::allocator::Reallocator;
use nalgebra::{DefaultAllocator, Dim, DimAdd, DimSum, OMatrix, U1};
use ndarray::{s, Array1, Array2};

use crate::Float;

/// Append a column of ones, turning an `(n, 2)` point matrix into its
/// homogeneous `(n, 3)` form.
pub(crate) fn pad<F: Float, R: Dim, C: Dim>(x: OMatrix<F, R, C>) -> OMatrix<F, R, DimSum<C, U1>>
where
    C: DimAdd<U1>,
    DefaultAllocator: Reallocator<F, R, C, R, DimSum<C, U1>>,
{
    let cols = x.shape().1;
    x.insert_column(cols, F::from_f64(1.).unwrap())
}

/// Apply a 3×3 homogeneous transform to an `(n, 2)` point matrix.
pub(crate) fn transform_points<F: Float>(
    mut points: Array2<F>,
    transformation_matrix: Array2<F>,
) -> Array2<F> {
    let n_points = points.shape()[0];
    points
        .push_column(Array1::from_elem(n_points, F::from_f64(1.).unwrap()).view())
        .unwrap();
    let mul = transformation_matrix.dot(&points.t());
    let slice = mul.slice(s![0..2, ..]);
    slice.t().to_owned()
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use nalgebra::matrix;
    use ndarray::array;

    #[test]
    fn pad() {
        let mat = matrix![
            4., 3., 2.;
            7., 6., 5.;
            -3., -2., -1.
        ];
        let padded = matrix![
            4., 3., 2., 1.;
            7., 6., 5., 1.;
            -3., -2., -1., 1.
        ];

        assert_eq!(super::pad(mat), padded);
    }

    #[test]
    fn transform_points_applies_rotation_and_offset() {
        let angle = std::f64::consts::FRAC_PI_2;
        let (sin, cos) = angle.sin_cos();
        let trafo = array![[cos, -sin, 1.], [sin, cos, 2.], [0., 0., 1.]];
        let points = array![[1., 0.], [0., 1.]];

        let mapped = super::transform_points(points, trafo);
        assert_abs_diff_eq!(mapped, array![[1., 3.], [0., 2.]], epsilon = 1e-12);
    }
}
