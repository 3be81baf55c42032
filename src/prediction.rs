use ndarray::{Array3, Array4, ArrayView4, Axis, Zip};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PredictionError {
    #[error("Prediction failed: {0}")]
    Failed(String),

    #[error("Score volume {found:?} does not match input grid {expected:?}")]
    ShapeMismatch {
        expected: (usize, usize, usize),
        found: (usize, usize, usize),
    },

    #[error("Score volume has no classes")]
    NoClasses,

    #[error("{0} classes do not fit in an 8-bit label volume")]
    TooManyClasses(usize),
}

/// External model turning a channel stack into per-class scores.
///
/// Input has shape (channels, depth, height, width); output must have shape
/// (classes, depth, height, width) on the same grid.
pub trait Predictor: Send + Sync {
    fn predict(&self, input: ArrayView4<'_, f32>) -> Result<Array4<f32>, PredictionError>;
}

impl<P: Predictor + ?Sized> Predictor for Box<P> {
    fn predict(&self, input: ArrayView4<'_, f32>) -> Result<Array4<f32>, PredictionError> {
        (**self).predict(input)
    }
}

/// Discrete label volume from per-class scores.
///
/// Each voxel gets `argmax + 1` over the class axis, or 0 when the winning
/// score is below `threshold`. Equal scores go to the lower class.
pub fn labels_from_scores(
    scores: ArrayView4<'_, f32>,
    threshold: f32,
) -> Result<Array3<u8>, PredictionError> {
    let (classes, depth, height, width) = scores.dim();
    if classes == 0 {
        return Err(PredictionError::NoClasses);
    }
    if classes > u8::MAX as usize {
        return Err(PredictionError::TooManyClasses(classes));
    }

    let mut labels = Array3::zeros((depth, height, width));
    Zip::from(&mut labels)
        .and(scores.lanes(Axis(0)))
        .par_for_each(|label, lane| {
            let (best, score) = lane
                .iter()
                .enumerate()
                .fold((0, f32::NEG_INFINITY), |(best, top), (class, &score)| {
                    if score > top { (class, score) } else { (best, top) }
                });
            *label = if score < threshold { 0 } else { best as u8 + 1 };
        });
    Ok(labels)
}

/// Check that a score volume lies on the same grid as its input.
pub fn check_scores(
    input: ArrayView4<'_, f32>,
    scores: ArrayView4<'_, f32>,
) -> Result<(), PredictionError> {
    let (_, depth, height, width) = input.dim();
    let (_, found_depth, found_height, found_width) = scores.dim();
    let expected = (depth, height, width);
    let found = (found_depth, found_height, found_width);
    if expected != found {
        return Err(PredictionError::ShapeMismatch { expected, found });
    }
    Ok(())
}

pub fn has_findings(labels: &Array3<u8>) -> bool {
    labels.iter().any(|&label| label != 0)
}
