//! Star pattern matching between two frames.
//!
//! The correspondence search is asterism based: every three-star subset of
//! both fields is hashed by its interior angles, hash collisions propose
//! candidate correspondences, each candidate yields a transform via least
//! squares, and the transform that brings the most stars into agreement
//! wins. The winner is then re-fitted on all matched star pairs.

use std::fmt::Debug;

use itertools::Itertools;
use log::{debug, info, warn};
use nalgebra::{Matrix3, MatrixXx2, RowVector2, SVD};
use ndarray::{s, Array2, ArrayView2, Axis};

use crate::geometry::{pad, transform_points};
use crate::ndarray_utils::{argmin, min_axis, norm_axis, IntoNdarray2};
use crate::triangles::TriangleAsterism;
use crate::Float;

/// Count the number of cross matches between two sets of 2D points.
///
/// # Arguments:
/// - `(coords1, coords2)`: Two sets of points. The number of points can differ.
/// - `tolerance`: Tolerance of the match in point units.
///
/// # Example:
/// ```
/// # use ndarray::array;
/// # use starstack::matching::count_cross_match;
/// let coords1 = array![[1.,2.], [3.,4.], [5.,6.]];
/// let coords2 = array![[1.,2.], [3.,4.], [6.,7.], [8., 9.]];
/// assert_eq!(count_cross_match(coords1.view(), coords2.view(), 0.), 2)
/// ```
pub fn count_cross_match<F: Float>(
    coords1: ArrayView2<F>,
    coords2: ArrayView2<F>,
    tolerance: F,
) -> usize {
    let coords1 = coords1.insert_axis(Axis(1));
    let coords2 = coords2.insert_axis(Axis(0));
    let diff = &coords1 - &coords2;
    let norm = norm_axis(diff.view(), Axis(2));
    let min = min_axis(norm.view(), Axis(0));
    min.fold(
        0,
        |acc, elem| if *elem <= tolerance { acc + 1 } else { acc },
    )
}

/// Finds the closest matches between two sets of 2D points.
///
/// Every point of `coords1` is paired with its nearest neighbor in `coords2`
/// when that neighbor lies within `tolerance`.
///
/// # Example:
/// ```
/// # use ndarray::array;
/// # use starstack::matching::cross_match;
/// let coords1 = array![[3.,4.], [1.,2.], [5.,6.]];
/// let coords2 = array![[1.,2.], [3.,4.], [6.,7.]];
/// assert_eq!(cross_match(coords1.view(), coords2.view(), 10.), vec![[0,1],[1,0],[2,2]])
/// ```
pub fn cross_match<F: Float>(
    coords1: ArrayView2<F>,
    coords2: ArrayView2<F>,
    tolerance: F,
) -> Vec<[usize; 2]> {
    let len2 = coords2.shape()[0];
    let mut matches = Vec::new();

    for (i, point1) in coords1.axis_iter(Axis(0)).enumerate() {
        let diff: Vec<F> = coords2
            .axis_iter(Axis(0))
            .flat_map(|point2| &point1 - &point2)
            .collect_vec();
        let diff = Array2::from_shape_vec((len2, 2), diff).unwrap();
        let distances = norm_axis(diff.view(), Axis(1));
        let closest = argmin(distances.view());
        if distances[closest] < tolerance {
            matches.push([i, closest])
        }
    }

    matches
}

/// Generalizes over geometric hashing schemes for point subsets.
///
/// The matcher treats the scheme as an opaque primitive: it hands over the
/// raw point sets and gets back hash collisions plus per-collision transform
/// estimates.
pub trait Asterism<F: Float>: Clone + Default {
    /// Type of the hashes.
    type Hashes: Clone + Debug;
    /// Type of the underlying asterism, e.g. a triangle.
    type Polygons: Clone + Debug + Into<Self::Matrix> + Send + Sync;
    /// Type of the point matrices used in order to calculate the transformations.
    type Matrix: Clone + Debug + Default;

    /// Calculate the hashes of all possible asterisms.
    fn hashes(&self, points: ArrayView2<F>) -> (Self::Hashes, Vec<Self::Polygons>);

    /// Find the matches between the asterism hashes.
    fn find_matches(
        hashes_reference: Self::Hashes,
        hashes_target: Self::Hashes,
        tolerance: F,
    ) -> Vec<[usize; 2]>;

    /// Least-squares transform mapping the points of `xy1` onto `xy2`.
    fn transform_matrix(xy1: Self::Matrix, xy2: Self::Matrix)
        -> Result<Matrix3<F>, &'static str>;
}

/// Matches the star field of a target frame against a reference frame.
///
/// The computed transform maps target coordinates onto reference
/// coordinates. When the underlying hash search ties, the resulting point
/// correspondences are reproducible but the chosen asterism pair is not
/// guaranteed to be; callers should compare transforms by where they map
/// points, not bit by bit.
#[derive(Clone, Debug)]
pub struct StarMatcher<F: Float, A: Asterism<F>> {
    /// Reference star positions. Shape `(n_reference, 2)`.
    reference: Array2<F>,
    /// Target star positions. Shape `(n_target, 2)`.
    target: Array2<F>,
    /// Choice of hashing scheme.
    asterism: A,
    /// Hash matching tolerance.
    hash_tolerance: F,
    /// Match counting tolerance in pixels.
    tolerance: F,
    /// Minimum number of matches required, as a fraction of the reference stars.
    min_match: Option<F>,
}

impl<F: Float + num_traits::float::FloatCore> StarMatcher<F, TriangleAsterism<F>> {
    /// Match with triangle asterisms.
    /// Use `with_` functions to set parameters.
    ///
    /// # Arguments
    /// -`reference`: Star positions of the reference frame. Shape `(n_reference, 2)`.\
    /// -`target`: Star positions of the target frame. Shape `(n_target, 2)`.
    pub fn triangles<N>(reference: N, target: N) -> Self
    where
        N: IntoNdarray2<Out = Array2<F>>,
    {
        Self {
            reference: reference.into_ndarray2(),
            target: target.into_ndarray2(),
            asterism: TriangleAsterism::default(),
            tolerance: F::from_f64(5.).unwrap(),
            hash_tolerance: F::from_f64(0.1).unwrap(),
            min_match: None,
        }
    }

    /// Set the minimum interior angle of the triangles.
    pub fn with_min_angle(mut self, min_angle: F) -> Self {
        self.asterism.min_angle = min_angle;
        self
    }
}

impl<F, A> StarMatcher<F, A>
where
    F: Float,
    A: Asterism<F>,
{
    /// Create a new instance using default options and a generic [`Asterism`].
    pub fn new<N>(reference: N, target: N) -> Self
    where
        N: IntoNdarray2<Out = Array2<F>>,
    {
        Self {
            reference: reference.into_ndarray2(),
            target: target.into_ndarray2(),
            asterism: A::default(),
            tolerance: F::from_f64(5.).unwrap(),
            hash_tolerance: F::from_f64(0.1).unwrap(),
            min_match: None,
        }
    }

    /// Set the hash matching tolerance.
    pub fn with_hash_tolerance(mut self, tolerance: F) -> Self {
        self.hash_tolerance = tolerance;
        self
    }

    /// Set the match counting tolerance.
    pub fn with_tolerance(mut self, tolerance: F) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Set the minimum fraction of reference stars to match.
    pub fn with_min_match(mut self, min_match: F) -> Self {
        self.min_match = Some(min_match);
        self
    }

    /// Find the transform mapping target star coordinates onto reference
    /// star coordinates.
    ///
    /// # Returns
    /// `None` if either field has fewer than three stars or no candidate
    /// transform brings any stars into agreement within the tolerance.
    /// Otherwise, the best candidate 3×3 matrix \(T\) satisfying
    /// \[ T \cdot S^T \approx R^T \]
    /// over the matched subsets, where \(S\) are 1-padded target and \(R\)
    /// reference coordinates.
    pub fn find_transform(self) -> Option<Matrix3<F>> {
        if self.reference.shape()[0] < 3 || self.target.shape()[0] < 3 {
            warn!("at least 3 stars per frame required to build asterisms");
            return None;
        }

        info!("Computing hashes.");
        let (hashes_reference, mut asterism_reference) =
            self.asterism.hashes(self.reference.view());
        let (hashes_target, mut asterism_target) = self.asterism.hashes(self.target.view());

        let mut matches = Vec::new();
        let n_reference = self.reference.shape()[0];

        info!("Computing hash matches.");
        let pairs = A::find_matches(hashes_reference, hashes_target, self.hash_tolerance);
        info!("Computing transformations for {} pairs.", pairs.len());
        for [i, j] in &pairs {
            // degenerate pairs score zero; `matches` stays index-aligned with `pairs`
            let match_count = match A::transform_matrix(
                asterism_target[*j].clone().into(),
                asterism_reference[*i].clone().into(),
            ) {
                Ok(trafo) => {
                    let test = transform_points(self.target.clone(), trafo.into_ndarray2());
                    count_cross_match(self.reference.view(), test.view(), self.tolerance)
                }
                Err(_) => 0,
            };
            matches.push(match_count);

            if let Some(min_match) = self.min_match {
                if F::from_usize(match_count).unwrap()
                    >= min_match * F::from_usize(n_reference).unwrap()
                {
                    break;
                }
            }
        }

        let (argmax, best) = matches
            .iter()
            .copied()
            .enumerate()
            .max_by_key(|(_, count)| *count)?;
        if best == 0 {
            warn!("No transformation brings any stars into agreement.");
            return None;
        }
        debug!(
            "Best transformation matches {} of {} sources.",
            best, n_reference
        );
        if let Some(min_match) = self.min_match {
            if F::from_usize(best).unwrap() < min_match * F::from_usize(n_reference).unwrap() {
                warn!("Matched less than the minimum number of sources!")
            }
        }

        let [i, j] = pairs[argmax];
        A::transform_matrix(
            asterism_target.remove(j).into(),
            asterism_reference.remove(i).into(),
        )
        .ok()
    }

    /// Find the alignment transform and refine it on all matched stars.
    ///
    /// This calls [`find_transform`](StarMatcher::find_transform()), then
    /// re-fits the winning transform by least squares over every target star
    /// whose projection lands within the tolerance of a reference star. The
    /// refit averages out the noise of the three stars the winning candidate
    /// was built from.
    pub fn find_alignment(self) -> Option<Matrix3<F>> {
        let reference = self.reference.clone();
        let target = self.target.clone();
        let tolerance = self.tolerance;

        let trafo = self.find_transform()?;
        refine_transform(trafo, reference, target, tolerance)
    }
}

/// Re-fit `trafo` on all point pairs it brings into agreement.
///
/// Falls back to the unrefined transform when fewer than three pairs match.
fn refine_transform<F: Float>(
    trafo: Matrix3<F>,
    reference: Array2<F>,
    target: Array2<F>,
    tolerance: F,
) -> Option<Matrix3<F>> {
    let projected = transform_points(target.clone(), trafo.into_ndarray2());
    let matched = cross_match(reference.view(), projected.view(), tolerance);
    if matched.len() < 3 {
        return Some(trafo);
    }

    let (reference_rows, target_rows): (Vec<RowVector2<F>>, Vec<RowVector2<F>>) = matched
        .into_iter()
        .map(|[i, j]| (reference.slice(s![i, ..]), target.slice(s![j, ..])))
        .map(|(r, t)| {
            (
                RowVector2::new(r[0], r[1]),
                RowVector2::new(t[0], t[1]),
            )
        })
        .unzip();

    let reference_mat = MatrixXx2::from_rows(&reference_rows);
    let target_mat = MatrixXx2::from_rows(&target_rows);
    let reference_pad = pad(reference_mat);
    let target_pad = pad(target_mat);
    let svd = SVD::new(target_pad, true, true);
    let solution = svd.solve(&reference_pad, F::from_f64(0.).unwrap()).ok()?;
    Some(solution.transpose())
}

#[cfg(feature = "parallel")]
pub use parallel::*;

#[cfg(feature = "parallel")]
mod parallel {
    use super::*;
    use rayon::prelude::*;

    impl<F, A> StarMatcher<F, A>
    where
        F: Float,
        A: Asterism<F>,
    {
        /// Find the transform mapping target coordinates onto reference
        /// coordinates, scoring candidates in parallel.
        ///
        /// Also see [`find_transform`](StarMatcher::find_transform()) for more details.
        ///
        /// **Warning: This function ignores the `min_match` option.**
        pub fn find_transform_par(self) -> Option<Matrix3<F>> {
            if self.reference.shape()[0] < 3 || self.target.shape()[0] < 3 {
                warn!("at least 3 stars per frame required to build asterisms");
                return None;
            }

            info!("Computing hashes.");
            let (hashes_reference, mut asterism_reference) =
                self.asterism.hashes(self.reference.view());
            let (hashes_target, mut asterism_target) = self.asterism.hashes(self.target.view());

            info!("Computing hash matches.");
            let pairs = A::find_matches(hashes_reference, hashes_target, self.hash_tolerance);
            info!("Computing transformations for {} pairs.", pairs.len());
            let matches = pairs.par_iter().map(|[i, j]| {
                let trafo = match A::transform_matrix(
                    asterism_target[*j].clone().into(),
                    asterism_reference[*i].clone().into(),
                ) {
                    Ok(trafo) => trafo,
                    Err(_) => return 0,
                };

                let test = transform_points(self.target.clone(), trafo.into_ndarray2());
                count_cross_match(self.reference.view(), test.view(), self.tolerance)
            });

            let max = matches.enumerate().max_by_key(|(_, count)| *count)?;
            if max.1 == 0 {
                warn!("No transformation brings any stars into agreement.");
                return None;
            }
            debug!(
                "Best transformation matches {} of {} sources.",
                max.1,
                self.reference.shape()[0]
            );

            let [i, j] = pairs[max.0];
            A::transform_matrix(
                asterism_target.remove(j).into(),
                asterism_reference.remove(i).into(),
            )
            .ok()
        }

        /// Find the alignment transform in parallel and refine it on all
        /// matched stars.
        ///
        /// Also see [`find_alignment`](StarMatcher::find_alignment()) for more details.
        pub fn find_alignment_par(self) -> Option<Matrix3<F>> {
            let reference = self.reference.clone();
            let target = self.target.clone();
            let tolerance = self.tolerance;

            let trafo = self.find_transform_par()?;
            refine_transform(trafo, reference, target, tolerance)
        }
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use itertools::Itertools;
    use ndarray::{array, Array1, Array2};
    use ndarray_rand::rand_distr::{Normal, Uniform};
    use ndarray_rand::RandomExt;

    use super::*;

    /// A random field plus its image under a fixed similarity transform,
    /// with optional positional jitter.
    fn star_field(n: usize, angle: f64, offset: (f64, f64), jitter: f64) -> (Array2<f64>, Array2<f64>) {
        let shape = (n, 2);
        let rot = array![[angle.cos(), -angle.sin()], [angle.sin(), angle.cos()]];
        let offset = Array1::from(vec![offset.0, offset.1]);

        let target = Array2::random(shape, Uniform::new(0., 100.));
        let reference_vec = target
            .rows()
            .into_iter()
            .flat_map(|r| rot.dot(&r) + offset.view())
            .collect_vec();
        let mut reference = Array2::from_shape_vec(shape, reference_vec).unwrap();
        if jitter > 0. {
            reference = reference + Array2::<f64>::random(shape, Normal::new(0., jitter).unwrap());
        }
        (reference, target)
    }

    #[test]
    fn count_cross_match_counts_within_tolerance() {
        let points1 = array![[0., 0.], [10., 10.], [20., 20.]];
        let points2 = array![[0.5, 0.], [10., 10.4], [50., 50.]];
        assert_eq!(count_cross_match(points1.view(), points2.view(), 1.), 2);
        assert_eq!(count_cross_match(points1.view(), points2.view(), 0.1), 0);
    }

    #[test]
    fn cross_match_pairs_nearest_neighbors() {
        let points1 = array![[3., 4.], [1., 2.], [40., 40.]];
        let points2 = array![[1., 2.], [3., 4.]];
        assert_eq!(
            cross_match(points1.view(), points2.view(), 5.),
            vec![[0, 1], [1, 0]]
        );
    }

    #[test]
    fn too_few_stars_is_not_a_panic() {
        let reference = array![[0., 0.], [1., 1.]];
        let target = array![[0., 0.], [1., 1.]];
        let matcher = StarMatcher::triangles(reference, target);
        assert!(matcher.find_transform().is_none());
    }

    #[test]
    fn find_transform_recovers_a_similarity() {
        let (reference, target) = star_field(12, 0.4, (13., -6.), 0.0);

        let matcher = StarMatcher::triangles(reference.clone(), target.clone())
            .with_hash_tolerance(0.02)
            .with_tolerance(2.);
        let trafo = matcher.find_transform().unwrap();

        let projected = transform_points(target, trafo.into_ndarray2());
        let matched = count_cross_match(reference.view(), projected.view(), 0.5);
        assert_eq!(matched, 12);
    }

    #[test]
    fn find_alignment_refines_under_jitter() {
        let angle = 0.3;
        let (reference, target) = star_field(15, angle, (5., 3.), 0.05);

        let matcher = StarMatcher::triangles(reference.clone(), target.clone())
            .with_hash_tolerance(0.02)
            .with_tolerance(3.);
        let trafo = matcher.find_alignment().unwrap();

        assert_abs_diff_eq!(trafo[(1, 0)].atan2(trafo[(0, 0)]), angle, epsilon = 0.01);
        assert_abs_diff_eq!(trafo[(0, 2)], 5., epsilon = 0.5);
        assert_abs_diff_eq!(trafo[(1, 2)], 3., epsilon = 0.5);

        let projected = transform_points(target, trafo.into_ndarray2());
        let matched = count_cross_match(reference.view(), projected.view(), 0.5);
        assert!(matched >= 13, "only {matched} of 15 stars matched");
    }

    #[cfg(feature = "parallel")]
    #[test]
    fn parallel_matches_the_same_stars() {
        let (reference, target) = star_field(12, 0.2, (-4., 9.), 0.0);

        let matcher = StarMatcher::triangles(reference.clone(), target.clone())
            .with_hash_tolerance(0.02)
            .with_tolerance(2.);
        let trafo = matcher.clone().find_alignment().unwrap();
        let trafo_par = matcher.find_alignment_par().unwrap();

        let projected = transform_points(target.clone(), trafo.into_ndarray2());
        let projected_par = transform_points(target, trafo_par.into_ndarray2());
        assert_eq!(
            count_cross_match(reference.view(), projected.view(), 0.5),
            count_cross_match(reference.view(), projected_par.view(), 0.5)
        );
    }
}
