//! Persistence of assembled volumes as NIfTI files.
//!
//! Each patient result is one directory holding the channel stack, the
//! isotropic reference volume and, when prediction ran, the label volume.
//! Geometry is kept in the sform affine, converted between the LPS patient
//! space used in memory and the RAS space NIfTI expects.

use crate::assembler::AssembledVolume;
use crate::enums::VolumeKind;
use crate::geometry::Grid;
use crate::volume::Volume;

use nalgebra::{Matrix3, Vector3};
use ndarray::{Array3, Axis, Ix3, Ix4};
use nifti::writer::WriterOptions;
use nifti::{IntoNdArray, NiftiHeader, NiftiObject, ReaderOptions};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, error, info};

pub const CHANNELS_FILE: &str = "source_4channel.nii.gz";
pub const REFERENCE_FILE: &str = "source_reference.nii.gz";
pub const SEGMENTATION_FILE: &str = "segmentation.nii.gz";

/// sform code for scanner-anatomical coordinates.
const SFORM_SCANNER: i16 = 1;
/// xyzt_units value for millimetres.
const UNITS_MM: u8 = 2;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("NIfTI error: {0}")]
    Nifti(#[from] nifti::error::NiftiError),

    #[error("Unexpected volume layout in {path}: {reason}")]
    Shape { path: PathBuf, reason: String },

    #[error("{path} has no channel {index}")]
    MissingChannel { path: PathBuf, index: usize },

    #[error("No {kind} volume stored for patient '{patient_id}'")]
    NotFound { patient_id: String, kind: VolumeKind },

    #[error("Invalid patient id '{0}'")]
    InvalidPatientId(String),
}

/// Sink for assembly results.
pub trait VolumeStore {
    /// Persist one patient result and return its directory. Nothing is left
    /// behind when saving fails.
    fn save(
        &self,
        patient_id: &str,
        assembled: &AssembledVolume,
        labels: Option<&Array3<u8>>,
    ) -> Result<PathBuf, StoreError>;
}

/// Source of persisted volumes, reoriented to canonical axes.
pub trait VolumeSource: Send + Sync {
    fn load(&self, patient_id: &str, kind: VolumeKind) -> Result<Volume, StoreError>;
}

/// NIfTI files under one results root, one directory per patient.
#[derive(Debug, Clone)]
pub struct NiftiStore {
    root: PathBuf,
}

impl NiftiStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn patient_dir(&self, patient_id: &str) -> PathBuf {
        self.root.join(patient_id)
    }

    fn staging_dir(&self, patient_id: &str) -> PathBuf {
        self.root.join(format!(".{patient_id}.partial"))
    }

    fn write_all(
        dir: &Path,
        assembled: &AssembledVolume,
        labels: Option<&Array3<u8>>,
    ) -> Result<(), StoreError> {
        let header = header_for(assembled.grid());

        // in-memory axes are (c,) z, y, x; NIfTI wants x, y, z(, c)
        WriterOptions::new(dir.join(CHANNELS_FILE))
            .reference_header(&header)
            .write_nifti(&assembled.data.view().reversed_axes())?;
        WriterOptions::new(dir.join(REFERENCE_FILE))
            .reference_header(&header)
            .write_nifti(&assembled.reference.volume.data.view().reversed_axes())?;
        if let Some(labels) = labels {
            WriterOptions::new(dir.join(SEGMENTATION_FILE))
                .reference_header(&header)
                .write_nifti(&labels.view().reversed_axes())?;
        }
        Ok(())
    }

    fn path_of(&self, patient_id: &str, kind: VolumeKind) -> PathBuf {
        let file = match kind {
            VolumeKind::Reference => REFERENCE_FILE,
            VolumeKind::Segmentation => SEGMENTATION_FILE,
            VolumeKind::Channel(_) => CHANNELS_FILE,
        };
        self.patient_dir(patient_id).join(file)
    }
}

impl VolumeStore for NiftiStore {
    fn save(
        &self,
        patient_id: &str,
        assembled: &AssembledVolume,
        labels: Option<&Array3<u8>>,
    ) -> Result<PathBuf, StoreError> {
        if !is_valid_patient_id(patient_id) {
            return Err(StoreError::InvalidPatientId(patient_id.to_string()));
        }

        let staging = self.staging_dir(patient_id);
        if staging.exists() {
            fs::remove_dir_all(&staging)?;
        }
        fs::create_dir_all(&staging)?;

        let written = Self::write_all(&staging, assembled, labels).and_then(|()| {
            let target = self.patient_dir(patient_id);
            if target.exists() {
                fs::remove_dir_all(&target)?;
            }
            fs::rename(&staging, &target)?;
            Ok(target)
        });

        match written {
            Ok(target) => {
                info!("Saved results for '{}' to {}", patient_id, target.display());
                Ok(target)
            }
            Err(err) => {
                error!("Failed to save results for '{}': {}", patient_id, err);
                if let Err(cleanup) = fs::remove_dir_all(&staging) {
                    debug!("Could not remove {}: {}", staging.display(), cleanup);
                }
                Err(err)
            }
        }
    }
}

impl VolumeSource for NiftiStore {
    fn load(&self, patient_id: &str, kind: VolumeKind) -> Result<Volume, StoreError> {
        if !is_valid_patient_id(patient_id) {
            return Err(StoreError::InvalidPatientId(patient_id.to_string()));
        }
        let path = self.path_of(patient_id, kind);
        if !path.is_file() {
            return Err(StoreError::NotFound {
                patient_id: patient_id.to_string(),
                kind,
            });
        }

        let object = ReaderOptions::new().read_file(&path)?;
        let grid_header = object.header().clone();
        let data = object.into_volume().into_ndarray::<f32>()?;
        let shape_error = |reason: String| StoreError::Shape {
            path: path.clone(),
            reason,
        };

        // [x, y, z(, c)] -> [z, y, x]
        let data = match kind {
            VolumeKind::Channel(index) => {
                let stack = data
                    .into_dimensionality::<Ix4>()
                    .map_err(|err| shape_error(err.to_string()))?;
                if index >= stack.len_of(Axis(3)) {
                    return Err(StoreError::MissingChannel { path: path.clone(), index });
                }
                stack.index_axis_move(Axis(3), index)
            }
            _ => data
                .into_dimensionality::<Ix3>()
                .map_err(|err| shape_error(err.to_string()))?,
        };
        let data = data.reversed_axes().as_standard_layout().into_owned();

        let (depth, height, width) = data.dim();
        let grid = grid_from_header(&grid_header, [width, height, depth]);
        debug!("Loaded {} of '{}' with grid {:?}", kind, patient_id, grid.size);
        let volume = Volume::try_new(data, grid)
            .ok_or_else(|| shape_error("header does not match the data".into()))?;
        Ok(volume.to_canonical())
    }
}

fn is_valid_patient_id(patient_id: &str) -> bool {
    !patient_id.is_empty()
        && !patient_id.starts_with('.')
        && patient_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

/// LPS grid to a RAS sform header.
fn header_for(grid: &Grid) -> NiftiHeader {
    let mut affine = [[0f32; 4]; 3];
    for row in 0..3 {
        let sign = if row < 2 { -1.0 } else { 1.0 };
        for axis in 0..3 {
            affine[row][axis] = (sign * grid.direction[(row, axis)] * grid.spacing[axis]) as f32;
        }
        affine[row][3] = (sign * grid.origin[row]) as f32;
    }

    let mut pixdim = [1f32; 8];
    for axis in 0..3 {
        pixdim[axis + 1] = grid.spacing[axis] as f32;
    }

    NiftiHeader {
        pixdim,
        sform_code: SFORM_SCANNER,
        srow_x: affine[0],
        srow_y: affine[1],
        srow_z: affine[2],
        xyzt_units: UNITS_MM,
        ..NiftiHeader::default()
    }
}

/// RAS sform header to an LPS grid. Falls back to pixdim on an axis-aligned
/// grid when no sform is present.
fn grid_from_header(header: &NiftiHeader, size: [usize; 3]) -> Grid {
    if header.sform_code <= 0 {
        let spacing = std::array::from_fn(|axis| {
            let spacing = header.pixdim[axis + 1].abs() as f64;
            if spacing > 0.0 { spacing } else { 1.0 }
        });
        return Grid::new(size, spacing, [0.0; 3], Matrix3::identity());
    }

    let rows = [header.srow_x, header.srow_y, header.srow_z];
    let mut columns = [Vector3::zeros(); 3];
    let mut origin = [0.0; 3];
    for (row, values) in rows.iter().enumerate() {
        let sign = if row < 2 { -1.0 } else { 1.0 };
        for axis in 0..3 {
            columns[axis][row] = sign * values[axis] as f64;
        }
        origin[row] = sign * values[3] as f64;
    }

    let spacing = columns.map(|column| {
        let norm = column.norm();
        if norm > 0.0 { norm } else { 1.0 }
    });
    let direction = Matrix3::from_columns(&[
        columns[0] / spacing[0],
        columns[1] / spacing[1],
        columns[2] / spacing[2],
    ]);
    Grid::new(size, spacing, origin, direction)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembler::ChannelSource;
    use crate::reference::ReferenceGrid;
    use ndarray::Array4;

    fn grid() -> Grid {
        let direction = Matrix3::new(
            1.0, 0.0, 0.0, //
            0.0, 0.0, 1.0, //
            0.0, -1.0, 0.0,
        );
        Grid::new([4, 3, 2], [1.0; 3], [-10.0, 20.0, 5.0], direction)
    }

    fn assembled() -> AssembledVolume {
        let grid = grid();
        let (depth, height, width) = grid.shape();
        let data = Array4::from_shape_fn((2, depth, height, width), |(c, z, y, x)| {
            (c * 1000 + z * 100 + y * 10 + x) as f32
        });
        let volume = Volume::new(data.index_axis(Axis(0), 0).to_owned(), grid.clone());
        AssembledVolume {
            data,
            sources: vec![
                ChannelSource::Direct("t1".into()),
                ChannelSource::Empty("t2".into()),
            ],
            reference: ReferenceGrid {
                label: "t1".into(),
                series_uid: "1.2.3".into(),
                grid,
                volume,
            },
        }
    }

    #[test]
    fn header_round_trips_geometry() {
        let grid = Grid::new([4, 3, 2], [0.5, 2.0, 3.0], [-10.0, 20.0, 5.0], grid().direction);
        let header = header_for(&grid);
        assert_eq!(header.srow_x[3], 10.0);
        assert_eq!(header.srow_y[3], -20.0);
        let back = grid_from_header(&header, grid.size);
        assert_eq!(back.size, grid.size);
        assert!((back.direction - grid.direction).norm() < 1e-6);
        for axis in 0..3 {
            assert!((back.spacing[axis] - grid.spacing[axis]).abs() < 1e-6);
            assert!((back.origin[axis] - grid.origin[axis]).abs() < 1e-6);
        }
    }

    #[test]
    fn saved_volumes_load_in_canonical_orientation() {
        let dir = tempfile::tempdir().unwrap();
        let store = NiftiStore::new(dir.path());
        let assembled = assembled();
        let labels = Array3::from_shape_fn(assembled.grid().shape(), |(z, _, _)| z as u8);

        let saved = store.save("patient-1", &assembled, Some(&labels)).unwrap();
        assert_eq!(saved, dir.path().join("patient-1"));
        assert!(saved.join(CHANNELS_FILE).is_file());
        assert!(!dir.path().join(".patient-1.partial").exists());

        let expected = Volume::new(
            assembled.data.index_axis(Axis(0), 1).to_owned(),
            assembled.grid().clone(),
        )
        .to_canonical();
        let loaded = store.load("patient-1", VolumeKind::Channel(1)).unwrap();
        assert_eq!(loaded.data, expected.data);
        assert!((loaded.grid.direction - Matrix3::identity()).norm() < 1e-6);

        let reference = store.load("patient-1", VolumeKind::Reference).unwrap();
        assert_eq!(reference.dim(), expected.dim());
        let segmentation = store.load("patient-1", VolumeKind::Segmentation).unwrap();
        assert!(segmentation.data.iter().all(|&v| v == 0.0 || v == 1.0));
    }

    #[test]
    fn missing_volumes_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let store = NiftiStore::new(dir.path());
        store.save("p", &assembled(), None).unwrap();
        assert!(matches!(
            store.load("p", VolumeKind::Segmentation),
            Err(StoreError::NotFound { .. })
        ));
        assert!(matches!(
            store.load("p", VolumeKind::Channel(5)),
            Err(StoreError::MissingChannel { index: 5, .. })
        ));
        assert!(matches!(
            store.load("../p", VolumeKind::Reference),
            Err(StoreError::InvalidPatientId(_))
        ));
    }

    #[test]
    fn saving_again_replaces_previous_result() {
        let dir = tempfile::tempdir().unwrap();
        let store = NiftiStore::new(dir.path());
        let labels = Array3::zeros(assembled().grid().shape());
        store.save("p", &assembled(), Some(&labels)).unwrap();
        store.save("p", &assembled(), None).unwrap();
        assert!(!dir.path().join("p").join(SEGMENTATION_FILE).exists());
    }
}
