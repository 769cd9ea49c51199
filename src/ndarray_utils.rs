//! `ndarray` to `nalgebra` conversions, inspired by
//! [`nshare`](https://github.com/rust-cv/nshare), and common operations on
//! arrays.

use nalgebra::allocator::Allocator;
use nalgebra::{DefaultAllocator, Dim, Matrix, Scalar, Storage};
use ndarray::{Array, Array2, ArrayView, ArrayView1, Axis, Dimension, RemoveAxis, ShapeBuilder};

use crate::Float;

pub(crate) trait IntoNdarray2 {
    type Out;

    fn into_ndarray2(self) -> Self::Out;
}

impl<N: Scalar> IntoNdarray2 for Array2<N> {
    type Out = Array2<N>;

    fn into_ndarray2(self) -> Self::Out {
        self
    }
}

impl<N: Scalar, C: Dim, R: Dim, S: Storage<N, R, C>> IntoNdarray2 for Matrix<N, R, C, S>
where
    DefaultAllocator: Allocator<R, C, Buffer<N> = S>,
{
    type Out = Array2<N>;

    fn into_ndarray2(self) -> Self::Out {
        Array2::from_shape_vec(
            self.shape().strides(self.strides()),
            self.into_iter().cloned().collect(),
        )
        .unwrap()
    }
}

pub(crate) fn norm_axis<F, D, Di>(arr: ArrayView<F, Di>, axis: Axis) -> Array<F, D>
where
    F: Float,
    D: Dimension,
    Di: RemoveAxis<Smaller = D>,
{
    let norm_sq = arr.map(|x| (*x * *x)).sum_axis(axis);
    norm_sq.map(|x| x.sqrt())
}

pub(crate) fn min_axis<F, D, Di>(arr: ArrayView<'_, F, Di>, axis: Axis) -> Array<F, D>
where
    F: Float,
    D: Dimension,
    Di: RemoveAxis<Smaller = D>,
{
    arr.map_axis(axis, |a| {
        *a.into_iter()
            .min_by(|f1, f2| f1.partial_cmp(f2).unwrap())
            .unwrap()
    })
}

pub(crate) fn argmin<F: Float>(arr: ArrayView1<F>) -> usize {
    arr.iter()
        .enumerate()
        .min_by(|(_, value0), (_, value1)| value0.partial_cmp(value1).expect("found nan"))
        .expect("empty iterator")
        .0
}
