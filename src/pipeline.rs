use crate::assembler::{AssemblyError, Assembler};
use crate::normalize::normalize_channels;
use crate::prediction::{PredictionError, Predictor, check_scores, has_findings, labels_from_scores};
use crate::store::{StoreError, VolumeStore};

use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;
use web_time::Instant;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Assembly(#[from] AssemblyError),

    #[error(transparent)]
    Prediction(#[from] PredictionError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Summary of one processed patient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatientResult {
    pub patient_id: String,
    pub output_dir: PathBuf,
    pub has_findings: bool,
    pub total_slices: usize,
}

/// Assemble, normalize, predict, label and persist one patient directory.
pub struct InferencePipeline<P, S> {
    assembler: Assembler,
    predictor: P,
    store: S,
}

impl<P: Predictor, S: VolumeStore> InferencePipeline<P, S> {
    pub fn new(assembler: Assembler, predictor: P, store: S) -> Self {
        Self {
            assembler,
            predictor,
            store,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn run(&self, root: impl AsRef<Path>, patient_id: &str) -> Result<PatientResult, PipelineError> {
        let config = self.assembler.config();
        let assembled = self.assembler.assemble(root)?;

        let started = Instant::now();
        let mut input = assembled.data.clone();
        normalize_channels(&mut input, config.histogram_bins);
        let scores = self.predictor.predict(input.view())?;
        check_scores(input.view(), scores.view())?;
        let labels = labels_from_scores(scores.view(), config.score_threshold)?;
        info!(
            "Prediction for '{}' took {:.2} s",
            patient_id,
            started.elapsed().as_secs_f64()
        );

        let output_dir = self.store.save(patient_id, &assembled, Some(&labels))?;
        Ok(PatientResult {
            patient_id: patient_id.to_string(),
            output_dir,
            has_findings: has_findings(&labels),
            total_slices: assembled.grid().size[2],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembler::AssembledVolume;
    use crate::config::AssemblyConfig;
    use ndarray::{Array3, Array4, ArrayView4};
    use std::sync::Mutex;

    struct Failing;

    impl Predictor for Failing {
        fn predict(&self, _input: ArrayView4<'_, f32>) -> Result<Array4<f32>, PredictionError> {
            Err(PredictionError::Failed("model unavailable".into()))
        }
    }

    #[derive(Default)]
    struct Recording(Mutex<Vec<String>>);

    impl VolumeStore for Recording {
        fn save(
            &self,
            patient_id: &str,
            _assembled: &AssembledVolume,
            _labels: Option<&Array3<u8>>,
        ) -> Result<PathBuf, StoreError> {
            self.0.lock().unwrap().push(patient_id.to_string());
            Ok(PathBuf::from(patient_id))
        }
    }

    #[test]
    fn assembly_failure_saves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = InferencePipeline::new(
            Assembler::new(AssemblyConfig::default()),
            Failing,
            Recording::default(),
        );
        let result = pipeline.run(dir.path(), "p1");
        assert!(matches!(
            result,
            Err(PipelineError::Assembly(AssemblyError::NoRecognizableData))
        ));
        assert!(pipeline.store().0.lock().unwrap().is_empty());
    }
}
