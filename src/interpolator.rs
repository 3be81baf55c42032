use ndarray::ArrayView3;

pub(crate) struct Interpolator;

impl Interpolator {
    /// Size of a grid covering the same extent at `new_spacing`.
    ///
    /// `spacing` and `original_size` are in (x, y, z) order. Half-way extents
    /// round to even. Every axis keeps at least one voxel.
    pub(crate) fn get_isotropic_dimensions(
        spacing: [f64; 3],
        original_size: [usize; 3],
        new_spacing: f64,
    ) -> [usize; 3] {
        let inv_new_spacing = 1.0 / new_spacing; // Multiply instead of divide

        std::array::from_fn(|axis| {
            let extent = original_size[axis] as f64 * spacing[axis];
            ((extent * inv_new_spacing).round_ties_even() as usize).max(1)
        })
    }

    /// Linear interpolation of `volume` at a continuous (depth, height, width)
    /// index. Neighbours beyond the edge are clamped to it, so callers decide
    /// what counts as inside.
    #[inline]
    pub(crate) fn trilinear_interpolate(volume: &ArrayView3<f32>, z: f64, y: f64, x: f64) -> f32 {
        let (depth, height, width) = volume.dim();

        let (z0, z1, dz) = Self::neighbours(z, depth);
        let (y0, y1, dy) = Self::neighbours(y, height);
        let (x0, x1, dx) = Self::neighbours(x, width);
        let one_minus_dx = 1.0 - dx;
        let one_minus_dy = 1.0 - dy;
        let one_minus_dz = 1.0 - dz;

        let lerp_x = |z: usize, y: usize| {
            volume[[z, y, x0]].mul_add(one_minus_dx, volume[[z, y, x1]] * dx)
        };

        let v0 = lerp_x(z0, y0).mul_add(one_minus_dy, lerp_x(z0, y1) * dy);
        let v1 = lerp_x(z1, y0).mul_add(one_minus_dy, lerp_x(z1, y1) * dy);

        v0.mul_add(one_minus_dz, v1 * dz)
    }

    #[inline]
    fn neighbours(position: f64, len: usize) -> (usize, usize, f32) {
        let floor = position.floor();
        let fraction = (position - floor) as f32;
        let last = len as f64 - 1.0;
        let lower = floor.clamp(0.0, last) as usize;
        let upper = (floor + 1.0).clamp(0.0, last) as usize;
        (lower, upper, fraction)
    }
}
