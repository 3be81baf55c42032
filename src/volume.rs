use crate::enums::Orientation;
use crate::geometry::Grid;

use nalgebra::{Matrix3, Vector3};
use ndarray::{Array3, Axis};

/// Storage type of the source pixels. Intensities are always held as `f32`;
/// the pixel type only bounds values that must round-trip to the source type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PixelType {
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    #[default]
    F32,
}

impl PixelType {
    /// Pixel type from Bits Allocated and Pixel Representation, if known.
    pub fn from_header(bits_allocated: Option<u16>, pixel_representation: Option<u16>) -> Self {
        let signed = pixel_representation == Some(1);
        match (bits_allocated, signed) {
            (Some(8), false) => PixelType::U8,
            (Some(8), true) => PixelType::I8,
            (Some(16), false) => PixelType::U16,
            (Some(16), true) => PixelType::I16,
            (Some(32), false) => PixelType::U32,
            (Some(32), true) => PixelType::I32,
            _ => PixelType::F32,
        }
    }

    /// Clamp to the representable range and truncate toward zero for integer
    /// types. `F32` values pass through.
    pub fn cast(self, value: f32) -> f32 {
        let (min, max) = match self {
            PixelType::U8 => (u8::MIN as f32, u8::MAX as f32),
            PixelType::I8 => (i8::MIN as f32, i8::MAX as f32),
            PixelType::U16 => (u16::MIN as f32, u16::MAX as f32),
            PixelType::I16 => (i16::MIN as f32, i16::MAX as f32),
            PixelType::U32 => (u32::MIN as f32, u32::MAX as f32),
            PixelType::I32 => (i32::MIN as f32, i32::MAX as f32),
            PixelType::F32 => return value,
        };
        value.clamp(min, max).trunc()
    }
}

/// A 3D intensity array placed in patient space.
#[derive(Debug, Clone, PartialEq)]
pub struct Volume {
    pub data: Array3<f32>,
    pub grid: Grid,
    pub pixel_type: PixelType,
}

impl Volume {
    /// Callers guarantee that `data` has the shape of `grid`; use
    /// [`Volume::try_new`] for data of unknown shape.
    pub fn new(data: Array3<f32>, grid: Grid) -> Self {
        debug_assert_eq!(data.dim(), grid.shape(), "volume data does not fit its grid");
        Self {
            data,
            grid,
            pixel_type: PixelType::default(),
        }
    }

    /// `None` if the shape of `data` does not match `grid`.
    pub fn try_new(data: Array3<f32>, grid: Grid) -> Option<Self> {
        (data.dim() == grid.shape()).then(|| Self::new(data, grid))
    }

    pub fn with_pixel_type(mut self, pixel_type: PixelType) -> Self {
        self.pixel_type = pixel_type;
        self
    }

    /// Round every intensity to what the pixel type can store.
    pub fn quantized(mut self) -> Self {
        let pixel_type = self.pixel_type;
        self.data.mapv_inplace(|value| pixel_type.cast(value));
        self
    }

    /// Zero-filled volume on `grid`.
    pub fn zeros(grid: Grid) -> Self {
        Self::new(Array3::zeros(grid.shape()), grid)
    }

    /// Get the dimensions of the volume (depth, height, width)
    pub fn dim(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    pub fn slice_count(&self) -> usize {
        self.data.dim().0
    }

    pub fn axis_len(&self, orientation: Orientation) -> usize {
        self.data.len_of(Axis(orientation.axis()))
    }

    /// Permute and flip the axes so that index axes x, y, z run along the
    /// patient axes L, P, S respectively (LPS+), as closely as the direction
    /// cosines allow. Physical placement of every voxel is unchanged.
    pub fn to_canonical(self) -> Volume {
        let grid = &self.grid;
        let assignment = closest_patient_axes(&grid.direction);

        // old index axis and flip for every new (patient) axis
        let mut source_axis = [0usize; 3];
        let mut flipped = [false; 3];
        for (old_axis, &(patient_axis, negative)) in assignment.iter().enumerate() {
            source_axis[patient_axis] = old_axis;
            flipped[patient_axis] = negative;
        }

        let mut corner = Vector3::zeros();
        for patient_axis in 0..3 {
            let old_axis = source_axis[patient_axis];
            if flipped[patient_axis] {
                corner[old_axis] = (grid.size[old_axis] - 1) as f64;
            }
        }
        let origin = grid.index_to_physical(corner);

        let mut direction = Matrix3::zeros();
        for patient_axis in 0..3 {
            let old_axis = source_axis[patient_axis];
            let sign = if flipped[patient_axis] { -1.0 } else { 1.0 };
            direction.set_column(patient_axis, &(grid.direction.column(old_axis) * sign));
        }

        let canonical_grid = Grid::new(
            source_axis.map(|axis| grid.size[axis]),
            source_axis.map(|axis| grid.spacing[axis]),
            [origin.x, origin.y, origin.z],
            direction,
        );

        // data axes are (z, y, x): data axis of index axis a is 2 - a
        let permutation = [2 - source_axis[2], 2 - source_axis[1], 2 - source_axis[0]];
        let mut data = self.data.permuted_axes(permutation);
        for patient_axis in 0..3 {
            if flipped[patient_axis] {
                data.invert_axis(Axis(2 - patient_axis));
            }
        }

        Volume {
            data: data.as_standard_layout().into_owned(),
            grid: canonical_grid,
            pixel_type: self.pixel_type,
        }
    }
}

/// For each index axis, the patient axis its direction column is closest to
/// and whether it points the negative way. Axes with the strongest alignment
/// choose first so every patient axis is used once.
fn closest_patient_axes(direction: &Matrix3<f64>) -> [(usize, bool); 3] {
    let mut candidates: Vec<(f64, usize, usize)> = (0..3)
        .flat_map(|axis| (0..3).map(move |patient| (axis, patient)))
        .map(|(axis, patient)| (direction[(patient, axis)].abs(), axis, patient))
        .collect();
    candidates.sort_by(|a, b| b.0.total_cmp(&a.0));

    let mut assignment = [(usize::MAX, false); 3];
    let mut used = [false; 3];
    for (_, axis, patient) in candidates {
        if assignment[axis].0 == usize::MAX && !used[patient] {
            assignment[axis] = (patient, direction[(patient, axis)] < 0.0);
            used[patient] = true;
        }
    }
    assignment
}

/// A materialized series together with its acquisition-type label.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifiedVolume {
    pub label: String,
    pub series_uid: String,
    pub volume: Volume,
}

impl ClassifiedVolume {
    pub fn slice_count(&self) -> usize {
        self.volume.slice_count()
    }
}
