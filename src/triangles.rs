//! Triangle asterisms: rotation- and scale-invariant hashes of three-star
//! patterns, in the spirit of [Lang et al. 2010](<https://iopscience.iop.org/article/10.1088/0004-6256/139/5/1782>).

use std::cmp::Ordering;

use itertools::Itertools;
use kiddo::float::{distance::SquaredEuclidean, kdtree::KdTree};
use nalgebra::{matrix, vector, Matrix3, Matrix3x2, Vector2, SVD};
use ndarray::{Array2, ArrayView2};

use crate::geometry::pad;
use crate::matching::Asterism;
use crate::Float;

/// Three stars in canonical vertex order.
#[derive(Debug, Clone, PartialEq)]
pub struct Triangle<F: Float> {
    vertices: [Vector2<F>; 3],
}

impl<F: Float> Triangle<F> {
    pub(crate) fn new(vertex1: Vector2<F>, vertex2: Vector2<F>, vertex3: Vector2<F>) -> Self {
        Self {
            vertices: [vertex1, vertex2, vertex3],
        }
    }

    fn centroid(&self) -> Vector2<F> {
        let three = F::from_f64(3.).unwrap();
        let x = (self.vertices[0][0] + self.vertices[1][0] + self.vertices[2][0]) / three;
        let y = (self.vertices[0][1] + self.vertices[1][1] + self.vertices[2][1]) / three;
        vector![x, y]
    }

    /// Order the vertices by their distance from the centroid, so congruent
    /// triangles built from differently ordered point sets hash alike.
    fn ordered(mut self) -> Self {
        let centroid = self.centroid();
        self.vertices.sort_by(|a, b| {
            let da = (a - centroid).norm();
            let db = (b - centroid).norm();
            da.partial_cmp(&db).unwrap_or(Ordering::Equal)
        });
        self
    }

    /// The two smallest interior angles in ascending order: the hash of the
    /// triangle.
    fn hash_angles(&self) -> [F; 2] {
        let two = F::from_f64(2.).unwrap();
        let side1 = (self.vertices[1] - self.vertices[0]).norm();
        let side2 = (self.vertices[2] - self.vertices[1]).norm();
        let side3 = (self.vertices[0] - self.vertices[2]).norm();

        let angle1 = ((side2 * side2 + side3 * side3 - side1 * side1) / (two * side2 * side3)).acos();
        let angle2 = ((side3 * side3 + side1 * side1 - side2 * side2) / (two * side3 * side1)).acos();
        let angle3 = ((side1 * side1 + side2 * side2 - side3 * side3) / (two * side1 * side2)).acos();

        let mut angles = [angle1, angle2, angle3];
        angles.sort_unstable_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));

        [angles[0], angles[1]]
    }
}

impl<F: Float> From<Triangle<F>> for Matrix3x2<F> {
    fn from(value: Triangle<F>) -> Self {
        matrix![
            value.vertices[0][0], value.vertices[0][1];
            value.vertices[1][0], value.vertices[1][1];
            value.vertices[2][0], value.vertices[2][1];
        ]
    }
}

/// Hashing scheme over all three-star subsets of a star field.
///
/// Triangles with an interior angle below `min_angle` are discarded: nearly
/// degenerate triangles hash into a crowded corner of the angle space and
/// produce spurious correspondences.
#[derive(Clone, Debug)]
pub struct TriangleAsterism<F: Float> {
    /// Minimum interior angle for a triangle to take part in matching.
    pub min_angle: F,
}

impl<F: Float> Default for TriangleAsterism<F> {
    fn default() -> Self {
        Self {
            min_angle: F::from_f64(30f64.to_radians()).unwrap(),
        }
    }
}

impl<F: Float> TriangleAsterism<F> {
    /// Create an instance from a minimum interior angle in radians.
    pub fn new(min_angle: F) -> Self {
        Self { min_angle }
    }
}

impl<F: Default + Float + num_traits::float::FloatCore> Asterism<F> for TriangleAsterism<F> {
    type Hashes = Array2<F>;
    type Polygons = Triangle<F>;
    type Matrix = Matrix3x2<F>;

    /// Hashes of all triangles formed by `points`, alongside the triangles
    /// themselves in matching order.
    fn hashes(&self, points: ArrayView2<F>) -> (Array2<F>, Vec<Triangle<F>>) {
        let n_points = points.shape()[0];
        let triangles = (0..n_points).combinations(3).map(|idx| {
            Triangle::new(
                matrix![points[[idx[0], 0]]; points[[idx[0], 1]]],
                matrix![points[[idx[1], 0]]; points[[idx[1], 1]]],
                matrix![points[[idx[2], 0]]; points[[idx[2], 1]]],
            )
            .ordered()
        });
        let (angles, triangles): (Vec<[F; 2]>, Vec<Triangle<F>>) = triangles
            .map(|t| (t.hash_angles(), t))
            .filter(|(angles, _)| angles.iter().all(|&a| a > self.min_angle))
            .unzip();

        let angles_flat = angles.into_iter().flatten().collect_vec();
        let hashes = Array2::from_shape_vec((angles_flat.len() / 2, 2), angles_flat).unwrap();

        (hashes, triangles)
    }

    fn find_matches(
        hashes_reference: Array2<F>,
        hashes_target: Array2<F>,
        tolerance: F,
    ) -> Vec<[usize; 2]> {
        let mut pairs = Vec::new();

        let reference_tree: KdTree<F, usize, 2, 32, u32> = hashes_reference
            .rows()
            .into_iter()
            .enumerate()
            .map(|(i, r)| ([r[0], r[1]], i))
            .collect();

        for (j, row) in hashes_target.rows().into_iter().enumerate() {
            let matches = reference_tree.within_unsorted::<SquaredEuclidean>(
                &[row[0], row[1]],
                num_traits::float::FloatCore::powi(tolerance, 2),
            );
            for m in matches {
                pairs.push([m.item, j]);
            }
        }

        pairs
    }

    fn transform_matrix(
        xy1: Matrix3x2<F>,
        xy2: Matrix3x2<F>,
    ) -> Result<Matrix3<F>, &'static str> {
        let xy1 = pad(xy1);
        let xy2 = pad(xy2);

        let svd = SVD::new(xy1, true, true);
        Ok(svd.solve(&xy2, F::from_f64(0.).unwrap())?.transpose())
    }
}
