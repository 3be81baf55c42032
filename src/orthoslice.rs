//! Plane extraction and display compositing for canonical (LPS+) volumes.

use crate::enums::Orientation;

use image::imageops::{self, FilterType};
use image::{GrayImage, ImageBuffer, Rgb, RgbImage, Rgba, RgbaImage};
use ndarray::{Array2, ArrayView2, ArrayView3, Axis, s};
use thiserror::Error;

/// Fixed overlay colour per label value.
pub const LABEL_COLOURS: [(u8, [u8; 3]); 3] = [(1, [255, 0, 0]), (2, [0, 255, 0]), (3, [0, 0, 255])];

#[derive(Debug, Error, PartialEq)]
pub enum SliceError {
    #[error("{orientation} index {index} is out of bounds for length {len}")]
    IndexOutOfBounds {
        orientation: Orientation,
        index: usize,
        len: usize,
    },

    #[error("Volume has no {0} planes")]
    EmptyVolume(Orientation),

    #[error("Label plane {found:?} does not match image plane {expected:?}")]
    ShapeMismatch {
        expected: (usize, usize),
        found: (usize, usize),
    },

    #[error("Invalid scale factor {0}")]
    InvalidScale(f32),

    #[error("Invalid overlay alpha {0}")]
    InvalidAlpha(f32),

    #[error("Plane of {width}x{height} pixels does not fit an image buffer")]
    ImageBuffer { width: usize, height: usize },
}

/// Display window given by centre and width.
///
/// Read-only; build a new window to change it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Window {
    center: f32,
    width: f32,
}

impl Window {
    /// `None` unless both values are finite and `width` is positive.
    pub fn new(center: f32, width: f32) -> Option<Window> {
        (center.is_finite() && width.is_finite() && width > 0.0).then_some(Self { center, width })
    }

    #[inline]
    pub fn lower_bound(&self) -> f32 {
        self.center - self.width / 2.0
    }

    #[inline]
    pub fn upper_bound(&self) -> f32 {
        self.center + self.width / 2.0
    }

    #[inline]
    pub fn center(&self) -> f32 {
        self.center
    }

    #[inline]
    pub fn width(&self) -> f32 {
        self.width
    }

    /// Grey level of `value`: 0 at or below the window, 255 at or above it.
    /// Non-finite values map to 0.
    pub fn eval(&self, value: f32) -> u8 {
        if !value.is_finite() {
            return u8::MIN;
        }
        let lower = self.lower_bound();
        if value <= lower {
            u8::MIN
        } else if value >= self.upper_bound() {
            u8::MAX
        } else {
            // 255, not 256.
            ((value - lower) / self.width * 255.0) as u8
        }
    }
}

/// Rows and columns added before the data when padding to a square.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PadOffsets {
    pub top: usize,
    pub left: usize,
}

/// Display settings shared by every plane of one view.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderOptions {
    pub window: Option<Window>,
    pub alpha: f32,
    pub scale: Option<f32>,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            window: None,
            alpha: 0.5,
            scale: None,
        }
    }
}

/// Index to render along `orientation`. An absent index means the centre;
/// an explicit one must lie inside the axis.
pub fn resolve_index(
    requested: Option<usize>,
    len: usize,
    orientation: Orientation,
) -> Result<usize, SliceError> {
    if len == 0 {
        return Err(SliceError::EmptyVolume(orientation));
    }
    match requested {
        None => Ok(len / 2),
        Some(index) if index < len => Ok(index),
        Some(index) => Err(SliceError::IndexOutOfBounds {
            orientation,
            index,
            len,
        }),
    }
}

/// Plane `index` of a (z, y, x) array, in display orientation.
///
/// Coronal and sagittal planes are flipped vertically so that superior is up.
pub fn extract_plane<'a, T>(
    data: ArrayView3<'a, T>,
    orientation: Orientation,
    index: usize,
) -> Result<ArrayView2<'a, T>, SliceError> {
    let axis = Axis(orientation.axis());
    let len = data.len_of(axis);
    if index >= len {
        return Err(SliceError::IndexOutOfBounds {
            orientation,
            index,
            len,
        });
    }
    let mut plane = data.index_axis_move(axis, index);
    if orientation != Orientation::Axial {
        plane.invert_axis(Axis(0));
    }
    Ok(plane)
}

/// Pad `plane` to a square of side `max(height, width)` with `fill`.
///
/// Padding is split evenly; an odd remainder goes to the bottom or right.
pub fn pad_to_square<T: Clone>(plane: ArrayView2<'_, T>, fill: T) -> (Array2<T>, PadOffsets) {
    let (height, width) = plane.dim();
    let side = height.max(width);
    let offsets = PadOffsets {
        top: (side - height) / 2,
        left: (side - width) / 2,
    };
    let mut square = Array2::from_elem((side, side), fill);
    square
        .slice_mut(s![
            offsets.top..offsets.top + height,
            offsets.left..offsets.left + width
        ])
        .assign(&plane);
    (square, offsets)
}

/// Grey levels of `plane`, windowed when a window is given and min-max
/// scaled over the plane otherwise. A flat plane maps to 0.
pub fn normalize_plane(plane: ArrayView2<'_, f32>, window: Option<Window>) -> Array2<u8> {
    if let Some(window) = window {
        return plane.mapv(|value| window.eval(value));
    }

    let (min, max) = plane
        .iter()
        .filter(|value| value.is_finite())
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(min, max), &value| {
            (min.min(value), max.max(value))
        });
    if max <= min {
        return Array2::zeros(plane.dim());
    }
    let range = max - min;
    plane.mapv(|value| {
        if value.is_finite() {
            ((value - min) / range * 255.0) as u8
        } else {
            0
        }
    })
}

/// Label values of a plane held as floats, rounded and clamped to `u8`.
pub fn label_plane(plane: ArrayView2<'_, f32>) -> Array2<u8> {
    plane.mapv(|value| {
        if value.is_finite() {
            value.round().clamp(0.0, u8::MAX as f32) as u8
        } else {
            0
        }
    })
}

pub fn to_gray_image(plane: &Array2<u8>) -> Result<GrayImage, SliceError> {
    let (height, width) = plane.dim();
    let pixel_data: Vec<u8> = plane.iter().copied().collect();
    ImageBuffer::from_raw(width as u32, height as u32, pixel_data)
        .ok_or(SliceError::ImageBuffer { width, height })
}

/// Blend the label colours into `base` with `out = alpha * colour + (1 - alpha) * base`.
/// Pixels whose label has no colour keep their grey value.
pub fn composite_overlay(
    base: &GrayImage,
    labels: ArrayView2<'_, u8>,
    alpha: f32,
) -> Result<RgbImage, SliceError> {
    if !(0.0..=1.0).contains(&alpha) {
        return Err(SliceError::InvalidAlpha(alpha));
    }
    let expected = (base.height() as usize, base.width() as usize);
    if labels.dim() != expected {
        return Err(SliceError::ShapeMismatch {
            expected,
            found: labels.dim(),
        });
    }

    Ok(RgbImage::from_fn(base.width(), base.height(), |x, y| {
        let grey = base.get_pixel(x, y).0[0];
        let label = labels[[y as usize, x as usize]];
        match LABEL_COLOURS.iter().find(|(value, _)| *value == label) {
            Some((_, colour)) => Rgb(colour.map(|channel| blend(channel, grey, alpha))),
            None => Rgb([grey; 3]),
        }
    }))
}

#[inline]
fn blend(colour: u8, base: u8, alpha: f32) -> u8 {
    (alpha * colour as f32 + (1.0 - alpha) * base as f32).round() as u8
}

/// Label colours on a transparent background.
pub fn label_image(labels: ArrayView2<'_, u8>) -> RgbaImage {
    let (height, width) = labels.dim();
    RgbaImage::from_fn(width as u32, height as u32, |x, y| {
        let label = labels[[y as usize, x as usize]];
        match LABEL_COLOURS.iter().find(|(value, _)| *value == label) {
            Some((_, [r, g, b])) => Rgba([*r, *g, *b, u8::MAX]),
            None => Rgba([0; 4]),
        }
    })
}

/// Uniformly rescale `image` with a bilinear filter.
pub fn scale_image(image: &RgbImage, scale: f32) -> Result<RgbImage, SliceError> {
    let (width, height) = scaled_dimensions(image.dimensions(), scale)?;
    Ok(imageops::resize(image, width, height, FilterType::Triangle))
}

/// Label images are scaled with nearest neighbour so colours never mix.
pub fn scale_label_image(image: &RgbaImage, scale: f32) -> Result<RgbaImage, SliceError> {
    let (width, height) = scaled_dimensions(image.dimensions(), scale)?;
    Ok(imageops::resize(image, width, height, FilterType::Nearest))
}

fn scaled_dimensions((width, height): (u32, u32), scale: f32) -> Result<(u32, u32), SliceError> {
    if !scale.is_finite() || scale <= 0.0 {
        return Err(SliceError::InvalidScale(scale));
    }
    let resize = |len: u32| ((len as f32 * scale).round() as u32).max(1);
    Ok((resize(width), resize(height)))
}

/// Render one plane of `data`, optionally with `labels` blended on top.
///
/// The plane is normalized, padded to a square, composited, then scaled.
pub fn render_plane(
    data: ArrayView3<'_, f32>,
    labels: Option<ArrayView3<'_, f32>>,
    orientation: Orientation,
    index: usize,
    options: &RenderOptions,
) -> Result<RgbImage, SliceError> {
    let plane = extract_plane(data, orientation, index)?;
    let grey = normalize_plane(plane, options.window);
    let (grey, _) = pad_to_square(grey.view(), 0u8);
    let base = to_gray_image(&grey)?;

    let image = match labels {
        Some(labels) => {
            let overlay = label_plane(extract_plane(labels, orientation, index)?);
            if overlay.dim() != plane.dim() {
                return Err(SliceError::ShapeMismatch {
                    expected: plane.dim(),
                    found: overlay.dim(),
                });
            }
            let (overlay, _) = pad_to_square(overlay.view(), 0u8);
            composite_overlay(&base, overlay.view(), options.alpha)?
        }
        None => image::DynamicImage::ImageLuma8(base).to_rgb8(),
    };

    match options.scale {
        Some(scale) => scale_image(&image, scale),
        None => Ok(image),
    }
}

/// Render one plane of a label volume as label colours on a transparent
/// background, padded to a square and optionally scaled.
pub fn render_label_plane(
    labels: ArrayView3<'_, f32>,
    orientation: Orientation,
    index: usize,
    scale: Option<f32>,
) -> Result<RgbaImage, SliceError> {
    let plane = label_plane(extract_plane(labels, orientation, index)?);
    let (plane, _) = pad_to_square(plane.view(), 0u8);
    let image = label_image(plane.view());

    match scale {
        Some(scale) => scale_label_image(&image, scale),
        None => Ok(image),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array3, array};

    #[test]
    fn window_rejects_invalid_width() {
        assert!(Window::new(40.0, 0.0).is_none());
        assert!(Window::new(40.0, -1.0).is_none());
        assert!(Window::new(f32::NAN, 10.0).is_none());
    }

    #[test]
    fn window_clips_and_scales() {
        let window = Window::new(80.0, 40.0).unwrap();
        assert_eq!(window.lower_bound(), 60.0);
        assert_eq!(window.eval(50.0), 0);
        assert_eq!(window.eval(80.0), 127);
        assert_eq!(window.eval(100.0), 255);
        assert_eq!(window.eval(f32::NAN), 0);
    }

    #[test]
    fn padding_is_square_and_recoverable() {
        let plane = Array2::from_shape_fn((3, 6), |(y, x)| (y * 6 + x) as i32 + 1);
        let (square, offsets) = pad_to_square(plane.view(), 0);
        assert_eq!(square.dim(), (6, 6));
        assert_eq!(offsets, PadOffsets { top: 1, left: 0 });
        let cropped = square.slice(s![offsets.top..offsets.top + 3, offsets.left..offsets.left + 6]);
        assert_eq!(cropped, plane);
        // odd remainder goes to the trailing side
        assert!(square.row(0).iter().all(|&v| v == 0));
        assert!(square.row(4).iter().all(|&v| v == 0));
        assert!(square.row(5).iter().all(|&v| v == 0));
    }

    #[test]
    fn padding_tall_plane_adds_columns() {
        let plane = Array2::<u8>::ones((5, 2));
        let (square, offsets) = pad_to_square(plane.view(), 9);
        assert_eq!(square.dim(), (5, 5));
        assert_eq!(offsets, PadOffsets { top: 0, left: 1 });
        assert_eq!(square.column(0).sum(), 45);
        assert_eq!(square.column(1).sum(), 5);
    }

    #[test]
    fn explicit_index_out_of_range_is_rejected() {
        assert_eq!(resolve_index(None, 9, Orientation::Axial), Ok(4));
        assert_eq!(resolve_index(Some(8), 9, Orientation::Axial), Ok(8));
        assert_eq!(
            resolve_index(Some(9), 9, Orientation::Coronal),
            Err(SliceError::IndexOutOfBounds {
                orientation: Orientation::Coronal,
                index: 9,
                len: 9
            })
        );
        assert_eq!(
            resolve_index(None, 0, Orientation::Sagittal),
            Err(SliceError::EmptyVolume(Orientation::Sagittal))
        );
    }

    #[test]
    fn coronal_plane_has_superior_up() {
        let data = Array3::from_shape_fn((3, 2, 2), |(z, y, x)| (z * 100 + y * 10 + x) as f32);
        let plane = extract_plane(data.view(), Orientation::Coronal, 1).unwrap();
        assert_eq!(plane, array![[210.0, 211.0], [110.0, 111.0], [10.0, 11.0]]);
        let axial = extract_plane(data.view(), Orientation::Axial, 2).unwrap();
        assert_eq!(axial, array![[200.0, 201.0], [210.0, 211.0]]);
        assert!(extract_plane(data.view(), Orientation::Sagittal, 2).is_err());
    }

    #[test]
    fn min_max_normalization_spans_full_range() {
        let plane = array![[10.0f32, 20.0], [30.0, 50.0]];
        let grey = normalize_plane(plane.view(), None);
        assert_eq!(grey, array![[0u8, 63], [127, 255]]);
        let flat = normalize_plane(Array2::from_elem((2, 2), 7.0).view(), None);
        assert!(flat.iter().all(|&v| v == 0));
    }

    #[test]
    fn overlay_blends_known_labels_only() {
        let base = GrayImage::from_pixel(2, 2, image::Luma([100]));
        let labels = array![[0u8, 1], [2, 7]];
        let image = composite_overlay(&base, labels.view(), 0.5).unwrap();
        assert_eq!(image.get_pixel(0, 0).0, [100, 100, 100]);
        assert_eq!(image.get_pixel(1, 0).0, [178, 50, 50]);
        assert_eq!(image.get_pixel(0, 1).0, [50, 178, 50]);
        assert_eq!(image.get_pixel(1, 1).0, [100, 100, 100]);

        let wrong = Array2::<u8>::zeros((3, 2));
        assert!(matches!(
            composite_overlay(&base, wrong.view(), 0.5),
            Err(SliceError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn label_image_is_transparent_outside_labels() {
        let image = label_image(array![[0u8, 3]].view());
        assert_eq!(image.get_pixel(0, 0).0, [0, 0, 0, 0]);
        assert_eq!(image.get_pixel(1, 0).0, [0, 0, 255, 255]);
    }

    #[test]
    fn label_plane_renders_colours_not_grey() {
        let labels = Array3::from_shape_vec((1, 1, 3), vec![0.0f32, 1.0, 3.0]).unwrap();
        let image = render_label_plane(labels.view(), Orientation::Axial, 0, None).unwrap();
        assert_eq!(image.dimensions(), (3, 3));
        assert_eq!(image.get_pixel(0, 1).0, [0, 0, 0, 0]);
        assert_eq!(image.get_pixel(1, 1).0, [255, 0, 0, 255]);
        assert_eq!(image.get_pixel(2, 1).0, [0, 0, 255, 255]);
        assert_eq!(image.get_pixel(1, 0).0, [0, 0, 0, 0]);

        let scaled = render_label_plane(labels.view(), Orientation::Axial, 0, Some(2.0)).unwrap();
        assert_eq!(scaled.dimensions(), (6, 6));
        assert!(scaled.pixels().all(|pixel| [0, 255].contains(&pixel.0[3])));
    }

    #[test]
    fn rendered_plane_is_square_and_scaled() {
        let data = Array3::from_shape_fn((4, 6, 8), |(z, y, x)| (z + y + x) as f32);
        let labels = Array3::from_elem((4, 6, 8), 1.0f32);
        let options = RenderOptions {
            scale: Some(2.0),
            ..RenderOptions::default()
        };
        let image = render_plane(data.view(), Some(labels.view()), Orientation::Coronal, 3, &options).unwrap();
        assert_eq!(image.dimensions(), (16, 16));
        assert!(matches!(
            scale_image(&image, 0.0),
            Err(SliceError::InvalidScale(_))
        ));
    }
}
