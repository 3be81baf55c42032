use crate::assembler::AssemblyError;
use crate::geometry::Grid;
use crate::processor::FoundModalities;
use crate::resampler::resample;
use crate::volume::Volume;

use tracing::{error, info};

/// Spacing of the shared grid on every axis, in millimetres.
pub const ISOTROPIC_SPACING: f64 = 1.0;

/// The isotropic grid every channel is resampled onto, plus the reference
/// volume resampled onto it.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceGrid {
    pub label: String,
    pub series_uid: String,
    pub grid: Grid,
    pub volume: Volume,
}

/// Pick the reference volume and derive the isotropic grid from it.
///
/// The first label in `preference` with any volume wins; under that label the
/// volume with the most slices is used. The resampled reference is cast to
/// the source pixel type.
pub fn build_reference(
    found: &FoundModalities,
    preference: &[String],
) -> Result<ReferenceGrid, AssemblyError> {
    let Some(chosen) = preference.iter().find_map(|label| found.largest(label)) else {
        error!("None of the preferred labels {:?} has a volume", preference);
        return Err(AssemblyError::NoUsableReference(preference.to_vec()));
    };

    let grid = chosen.volume.grid.isotropic(ISOTROPIC_SPACING);
    info!(
        "Reference '{}' from series {}: {:?} -> {:?} voxels",
        chosen.label, chosen.series_uid, chosen.volume.grid.size, grid.size
    );

    let volume = resample(&chosen.volume, &grid).quantized();

    Ok(ReferenceGrid {
        label: chosen.label.clone(),
        series_uid: chosen.series_uid.clone(),
        grid,
        volume,
    })
}
