use crate::geometry::Grid;
use crate::interpolator::Interpolator;
use crate::volume::Volume;

use nalgebra::Vector3;
use ndarray::{Array3, Zip};
use tracing::warn;

/// Value written where a target voxel falls outside the source volume.
pub const DEFAULT_PIXEL_VALUE: f32 = 0.0;

/// Resample `source` onto `target` with linear interpolation.
///
/// A target voxel is inside the source when its continuous source index lies
/// in `[-0.5, n - 0.5)` on every axis; everything else gets
/// [`DEFAULT_PIXEL_VALUE`]. The result keeps the source pixel type.
pub fn resample(source: &Volume, target: &Grid) -> Volume {
    resample_with_default(source, target, DEFAULT_PIXEL_VALUE)
}

pub fn resample_with_default(source: &Volume, target: &Grid, default_value: f32) -> Volume {
    let mut data = Array3::from_elem(target.shape(), default_value);

    let Some((matrix, offset)) = target.index_map_to(&source.grid) else {
        warn!("Source direction matrix is singular; resampled volume left at default value");
        return Volume::new(data, target.clone()).with_pixel_type(source.pixel_type);
    };

    let (depth, height, width) = source.dim();
    let upper = Vector3::new(width as f64, height as f64, depth as f64).add_scalar(-0.5);
    let view = source.data.view();

    Zip::indexed(&mut data).par_for_each(|(k, j, i), value| {
        let index = matrix * Vector3::new(i as f64, j as f64, k as f64) + offset;
        let inside = (0..3).all(|axis| index[axis] >= -0.5 && index[axis] < upper[axis]);
        if inside {
            *value = Interpolator::trilinear_interpolate(&view, index.z, index.y, index.x);
        }
    });

    Volume::new(data, target.clone()).with_pixel_type(source.pixel_type)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Matrix3;

    fn source() -> Volume {
        let direction = Matrix3::new(
            0.0, 1.0, 0.0, //
            -1.0, 0.0, 0.0, //
            0.0, 0.0, 1.0,
        );
        let grid = Grid::new([5, 4, 3], [0.7, 1.3, 2.0], [3.0, -1.0, 12.0], direction);
        let data = Array3::from_shape_fn(grid.shape(), |(z, y, x)| {
            (z as f32) * 7.5 - (y as f32) * 1.25 + (x as f32) * 3.0 + 0.1
        });
        Volume::new(data, grid)
    }

    #[test]
    fn identity_grid_returns_original_values() {
        let source = source();
        let resampled = resample(&source, &source.grid);
        assert_eq!(resampled.grid, source.grid);
        for (a, b) in resampled.data.iter().zip(source.data.iter()) {
            assert!((a - b).abs() < 1e-4, "{a} != {b}");
        }
    }

    #[test]
    fn half_voxel_shift_interpolates_linearly() {
        let grid = Grid::identity([4, 1, 1]);
        let data = Array3::from_shape_vec((1, 1, 4), vec![0.0, 10.0, 20.0, 30.0]).unwrap();
        let source = Volume::new(data, grid.clone());

        let mut shifted = grid;
        shifted.origin = [0.5, 0.0, 0.0];
        let resampled = resample(&source, &shifted);
        let values: Vec<f32> = resampled.data.iter().copied().collect();
        // last sample sits at index 3.5, outside [-0.5, 3.5)
        assert_eq!(values, vec![5.0, 15.0, 25.0, 0.0]);
    }

    #[test]
    fn outside_samples_take_default_value() {
        let source = source();
        let mut far = Grid::identity([2, 2, 2]);
        far.origin = [1000.0, 1000.0, 1000.0];
        let resampled = resample(&source, &far);
        assert!(resampled.data.iter().all(|&v| v == DEFAULT_PIXEL_VALUE));
        let resampled = resample_with_default(&source, &far, -1.0);
        assert!(resampled.data.iter().all(|&v| v == -1.0));
    }

    #[test]
    fn singular_source_yields_default_volume() {
        let mut source = source();
        source.grid.direction = Matrix3::zeros();
        let target = Grid::identity([2, 2, 2]);
        let resampled = resample(&source, &target);
        assert_eq!(resampled.dim(), (2, 2, 2));
        assert!(resampled.data.iter().all(|&v| v == 0.0));
    }
}
