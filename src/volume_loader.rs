use crate::geometry::Grid;
use crate::header::RawSlice;
use crate::ordering::slice_normal;
use crate::volume::{PixelType, Volume};

use dicom::{
    object::{FileDicomObject, InMemDicomObject, open_file},
    pixeldata::{ConvertOptions, PixelDecoder, VoiLutOption},
};
use nalgebra::{Matrix3, Vector3};
use ndarray::{Array2, Array3, s};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VolumeLoaderError {
    #[error("No valid DICOM images found")]
    NoValidImages,

    #[error("Inconsistent image dimensions: expected {expected:?}, {path} has {found:?}")]
    InconsistentDimensions {
        path: PathBuf,
        expected: (usize, usize),
        found: (usize, usize),
    },

    #[error("Failed to decode pixel data of {path}: {reason}")]
    Decode { path: PathBuf, reason: String },

    #[error("DICOM error: {0}")]
    Dicom(#[from] dicom::object::ReadError),
}

/// Decodes an ordered series into a [`Volume`] with patient-space geometry.
pub struct VolumeLoader;

impl VolumeLoader {
    /// Load a volume from slices already in their final order.
    ///
    /// The first slice places the volume; the spread of positions along the
    /// slice normal gives the slice spacing.
    ///
    /// # Errors
    ///
    /// Returns an error if no slice is given, a file cannot be read or
    /// decoded, or the slices disagree on image dimensions.
    pub fn load_series(slices: &[RawSlice]) -> Result<Volume, VolumeLoaderError> {
        let first = slices.first().ok_or(VolumeLoaderError::NoValidImages)?;

        let images = slices
            .iter()
            .map(|slice| Self::load_image(&slice.path))
            .collect::<Result<Vec<_>, _>>()?;

        Self::validate_dimensions(slices, &images)?;

        let data = Self::build_volume_array(&images);
        let (depth, height, width) = data.dim();
        let grid = Self::build_grid(slices, [width, height, depth]);
        let pixel_type = PixelType::from_header(first.bits_allocated, first.pixel_representation);

        Ok(Volume::new(data, grid).with_pixel_type(pixel_type))
    }

    fn load_image(path: &Path) -> Result<Array2<f32>, VolumeLoaderError> {
        let dicom_object = open_file(path)?;
        Self::decode_image(&dicom_object).map_err(|reason| VolumeLoaderError::Decode {
            path: path.to_path_buf(),
            reason,
        })
    }

    // Modality LUT (rescale) is applied, VOI LUT is not: intensities stay in
    // scanner units.
    fn decode_image(dicom_object: &FileDicomObject<InMemDicomObject>) -> Result<Array2<f32>, String> {
        let pixel_data = dicom_object
            .decode_pixel_data()
            .map_err(|err| err.to_string())?;
        let options = ConvertOptions::new().with_voi_lut(VoiLutOption::Identity);
        pixel_data
            .to_ndarray_with_options::<f32>(&options)
            .map(|arr| arr.slice_move(s![0, .., .., 0]))
            .map_err(|err| err.to_string())
    }

    fn validate_dimensions(
        slices: &[RawSlice],
        images: &[Array2<f32>],
    ) -> Result<(), VolumeLoaderError> {
        let expected = images[0].dim();
        match slices.iter().zip(images).find(|(_, img)| img.dim() != expected) {
            Some((slice, img)) => Err(VolumeLoaderError::InconsistentDimensions {
                path: slice.path.clone(),
                expected,
                found: img.dim(),
            }),
            None => Ok(()),
        }
    }

    fn build_volume_array(images: &[Array2<f32>]) -> Array3<f32> {
        let (height, width) = images[0].dim();
        let depth = images.len();
        let mut volume = Array3::<f32>::zeros((depth, height, width));

        for (i, image) in images.iter().enumerate() {
            volume.slice_mut(s![i, .., ..]).assign(image);
        }

        volume
    }

    /// Geometry of the ordered series. `size` is (x, y, z).
    fn build_grid(slices: &[RawSlice], size: [usize; 3]) -> Grid {
        let first = &slices[0];

        let (row, column) = match first.orientation {
            Some(o) if slice_normal(&o).is_some() => (
                Vector3::new(o[0], o[1], o[2]).normalize(),
                Vector3::new(o[3], o[4], o[5]).normalize(),
            ),
            _ => (Vector3::x(), Vector3::y()),
        };
        let mut normal = row.cross(&column).normalize();

        let [row_spacing, column_spacing] = first
            .pixel_spacing
            .filter(|ps| ps.iter().all(|&v| v > 0.0))
            .unwrap_or([1.0, 1.0]);

        let span = match (first.position, slices.last().and_then(|s| s.position)) {
            (Some(start), Some(end)) if slices.len() > 1 => {
                Some((Vector3::from(end) - Vector3::from(start)).dot(&normal))
            }
            _ => None,
        };
        if span.is_some_and(|span| span < 0.0) {
            normal = -normal;
        }
        let slice_spacing = span
            .map(|span| span.abs() / (slices.len() - 1) as f64)
            .filter(|&spacing| spacing > 0.0)
            .or(first.slice_thickness.filter(|&t| t > 0.0))
            .unwrap_or(1.0);

        Grid::new(
            size,
            [column_spacing, row_spacing, slice_spacing],
            first.position.unwrap_or([0.0; 3]),
            Matrix3::from_columns(&[row, column, normal]),
        )
    }
}
