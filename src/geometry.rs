use crate::interpolator::Interpolator;

use nalgebra::{Matrix3, Vector3};

/// Placement of a voxel grid in patient (LPS) space.
///
/// `size`, `spacing` and the direction columns are in (x, y, z) order, i.e.
/// (column, row, slice). Arrays laid on this grid have shape
/// `(size[2], size[1], size[0])`.
#[derive(Debug, Clone, PartialEq)]
pub struct Grid {
    pub size: [usize; 3],
    pub spacing: [f64; 3],
    pub origin: [f64; 3],
    pub direction: Matrix3<f64>,
}

impl Grid {
    pub fn new(size: [usize; 3], spacing: [f64; 3], origin: [f64; 3], direction: Matrix3<f64>) -> Self {
        Self {
            size,
            spacing,
            origin,
            direction,
        }
    }

    /// Axis-aligned grid with unit spacing at the origin.
    pub fn identity(size: [usize; 3]) -> Self {
        Self::new(size, [1.0; 3], [0.0; 3], Matrix3::identity())
    }

    /// Array shape (depth, height, width) of data on this grid.
    pub fn shape(&self) -> (usize, usize, usize) {
        (self.size[2], self.size[1], self.size[0])
    }

    /// Physical position of a continuous (x, y, z) index.
    pub fn index_to_physical(&self, index: Vector3<f64>) -> Vector3<f64> {
        Vector3::from(self.origin) + self.direction * self.scaled(index)
    }

    /// Continuous (x, y, z) index of a physical position, or `None` when the
    /// direction matrix is singular.
    pub fn physical_to_index(&self, point: Vector3<f64>) -> Option<Vector3<f64>> {
        let inverse = self.direction.try_inverse()?;
        let local = inverse * (point - Vector3::from(self.origin));
        Some(Vector3::new(
            local.x / self.spacing[0],
            local.y / self.spacing[1],
            local.z / self.spacing[2],
        ))
    }

    /// Affine map from continuous indices of `self` to continuous indices of
    /// `source`: `source_index = matrix * index + offset`.
    pub fn index_map_to(&self, source: &Grid) -> Option<(Matrix3<f64>, Vector3<f64>)> {
        let inverse = source.direction.try_inverse()?;
        let unscale = Matrix3::from_diagonal(&Vector3::from(source.spacing).map(|s| 1.0 / s));
        let scale = Matrix3::from_diagonal(&Vector3::from(self.spacing));
        let matrix = unscale * inverse * self.direction * scale;
        let offset = unscale * inverse * (Vector3::from(self.origin) - Vector3::from(source.origin));
        Some((matrix, offset))
    }

    /// Grid covering the same physical extent with `spacing` on every axis.
    /// Origin and direction are kept.
    pub fn isotropic(&self, spacing: f64) -> Grid {
        Grid {
            size: Interpolator::get_isotropic_dimensions(self.spacing, self.size, spacing),
            spacing: [spacing; 3],
            origin: self.origin,
            direction: self.direction,
        }
    }

    fn scaled(&self, index: Vector3<f64>) -> Vector3<f64> {
        Vector3::new(
            index.x * self.spacing[0],
            index.y * self.spacing[1],
            index.z * self.spacing[2],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn oblique() -> Grid {
        let direction = Matrix3::new(
            0.0, 0.0, 1.0, //
            1.0, 0.0, 0.0, //
            0.0, -1.0, 0.0,
        );
        Grid::new([4, 5, 6], [0.5, 2.0, 3.0], [10.0, -4.0, 7.5], direction)
    }

    #[test]
    fn physical_round_trip() {
        let grid = oblique();
        let index = Vector3::new(1.5, 3.0, 2.25);
        let point = grid.index_to_physical(index);
        let back = grid.physical_to_index(point).unwrap();
        assert!((back - index).norm() < 1e-12);
    }

    #[test]
    fn index_map_to_self_is_identity() {
        let grid = oblique();
        let (matrix, offset) = grid.index_map_to(&grid).unwrap();
        assert!((matrix - Matrix3::identity()).norm() < 1e-12);
        assert!(offset.norm() < 1e-12);
    }

    #[test]
    fn isotropic_grid_keeps_extent() {
        let grid = oblique().isotropic(1.0);
        assert_eq!(grid.size, [2, 10, 18]);
        assert_eq!(grid.spacing, [1.0; 3]);
        assert_eq!(grid.origin, [10.0, -4.0, 7.5]);
        assert_eq!(grid.shape(), (18, 10, 2));
    }

    #[test]
    fn singular_direction_has_no_inverse() {
        let grid = Grid::new([2, 2, 2], [1.0; 3], [0.0; 3], Matrix3::zeros());
        assert!(grid.physical_to_index(Vector3::zeros()).is_none());
    }
}
