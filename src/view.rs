//! Three-plane view requests against persisted patient volumes.

use crate::enums::{Orientation, VolumeKind};
use crate::orthoslice::{
    RenderOptions, SliceError, Window, render_label_plane, render_plane, resolve_index,
};
use crate::store::{StoreError, VolumeSource};
use crate::volume::Volume;

use futures::channel::oneshot;
use image::DynamicImage;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ViewError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Slice(#[from] SliceError),

    #[error("Rendering task ended before producing a view")]
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewRequest {
    pub axial: Option<usize>,
    pub coronal: Option<usize>,
    pub sagittal: Option<usize>,
    pub window: Option<Window>,
    pub overlay: bool,
    pub alpha: f32,
    pub scale: Option<f32>,
}

impl Default for ViewRequest {
    fn default() -> Self {
        Self {
            axial: None,
            coronal: None,
            sagittal: None,
            window: None,
            overlay: false,
            alpha: 0.5,
            scale: None,
        }
    }
}

impl ViewRequest {
    pub fn index(&self, orientation: Orientation) -> Option<usize> {
        match orientation {
            Orientation::Axial => self.axial,
            Orientation::Coronal => self.coronal,
            Orientation::Sagittal => self.sagittal,
        }
    }

    fn options(&self) -> RenderOptions {
        RenderOptions {
            window: self.window,
            alpha: self.alpha,
            scale: self.scale,
        }
    }
}

/// Indices actually rendered, after defaults were applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SliceIndices {
    pub axial: usize,
    pub coronal: usize,
    pub sagittal: usize,
}

/// Intensity volumes render as RGB, label volumes as RGBA with transparent
/// background.
#[derive(Debug, Clone)]
pub struct ViewResponse {
    pub axial: DynamicImage,
    pub coronal: DynamicImage,
    pub sagittal: DynamicImage,
    pub indices: SliceIndices,
    /// Source volume shape as (depth, height, width).
    pub shape: (usize, usize, usize),
}

/// Render the three planes of `volume`, blending `labels` when given.
pub fn render_view(
    volume: &Volume,
    labels: Option<&Volume>,
    request: &ViewRequest,
) -> Result<ViewResponse, SliceError> {
    let shape = volume.dim();
    if let Some(found) = labels.map(Volume::dim).filter(|&dim| dim != shape) {
        return Err(SliceError::ShapeMismatch {
            expected: (shape.1, shape.2),
            found: (found.1, found.2),
        });
    }

    let options = request.options();
    render_planes(volume, request, |orientation, index| {
        let image = render_plane(
            volume.data.view(),
            labels.map(|labels| labels.data.view()),
            orientation,
            index,
            &options,
        )?;
        Ok(DynamicImage::ImageRgb8(image))
    })
}

/// Render the three planes of a label volume in the label colours.
/// Window, overlay and alpha do not apply.
pub fn render_label_view(
    labels: &Volume,
    request: &ViewRequest,
) -> Result<ViewResponse, SliceError> {
    render_planes(labels, request, |orientation, index| {
        let image = render_label_plane(labels.data.view(), orientation, index, request.scale)?;
        Ok(DynamicImage::ImageRgba8(image))
    })
}

fn render_planes<F>(
    volume: &Volume,
    request: &ViewRequest,
    render: F,
) -> Result<ViewResponse, SliceError>
where
    F: Fn(Orientation, usize) -> Result<DynamicImage, SliceError>,
{
    let render = |orientation: Orientation| -> Result<(DynamicImage, usize), SliceError> {
        let index = resolve_index(
            request.index(orientation),
            volume.axis_len(orientation),
            orientation,
        )?;
        Ok((render(orientation, index)?, index))
    };

    let (axial, axial_index) = render(Orientation::Axial)?;
    let (coronal, coronal_index) = render(Orientation::Coronal)?;
    let (sagittal, sagittal_index) = render(Orientation::Sagittal)?;

    Ok(ViewResponse {
        axial,
        coronal,
        sagittal,
        indices: SliceIndices {
            axial: axial_index,
            coronal: coronal_index,
            sagittal: sagittal_index,
        },
        shape: volume.dim(),
    })
}

/// Serves view requests from a volume source without blocking the caller's
/// executor: loading and rendering run on the rayon pool.
pub struct ViewService<S> {
    source: Arc<S>,
}

impl<S> Clone for ViewService<S> {
    fn clone(&self) -> Self {
        Self {
            source: Arc::clone(&self.source),
        }
    }
}

impl<S: VolumeSource + 'static> ViewService<S> {
    pub fn new(source: S) -> Self {
        Self {
            source: Arc::new(source),
        }
    }

    pub async fn render(
        &self,
        patient_id: &str,
        kind: VolumeKind,
        request: ViewRequest,
    ) -> Result<ViewResponse, ViewError> {
        let source = Arc::clone(&self.source);
        let patient_id = patient_id.to_string();
        let (sender, receiver) = oneshot::channel();

        rayon::spawn(move || {
            let result = Self::load_and_render(source.as_ref(), &patient_id, kind, &request);
            let _ = sender.send(result);
        });

        receiver.await.map_err(|_| ViewError::Cancelled)?
    }

    fn load_and_render(
        source: &S,
        patient_id: &str,
        kind: VolumeKind,
        request: &ViewRequest,
    ) -> Result<ViewResponse, ViewError> {
        let volume = source.load(patient_id, kind)?;
        debug!(
            "Rendering {} of '{}' with shape {:?}",
            kind,
            patient_id,
            volume.dim()
        );
        if kind.is_label() {
            return Ok(render_label_view(&volume, request)?);
        }

        let labels = if request.overlay {
            Some(source.load(patient_id, VolumeKind::Segmentation)?)
        } else {
            None
        };
        Ok(render_view(&volume, labels.as_ref(), request)?)
    }
}
