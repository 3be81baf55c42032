//! Channel assembly: scan, classify, materialize, and stack every configured
//! channel on one shared isotropic grid.

use crate::config::AssemblyConfig;
use crate::geometry::Grid;
use crate::processor::{FoundModalities, ProcessError, SeriesProcessor};
use crate::reference::{ReferenceGrid, build_reference};
use crate::resampler::resample;
use crate::series::scan_directory;

use ndarray::{Array3, Array4, ArrayView3, Axis};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};
use web_time::Instant;

#[derive(Debug, Error)]
pub enum AssemblyError {
    #[error("Cannot read input directory {path}: {source}")]
    RootUnreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("No recognizable data: no series could be classified and loaded")]
    NoRecognizableData,

    #[error("No usable reference volume for preference order {0:?}")]
    NoUsableReference(Vec<String>),

    #[error("Assembly did not finish within {0:?}")]
    Timeout(Duration),

    #[error("Failed to start series worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}

impl From<ProcessError> for AssemblyError {
    fn from(err: ProcessError) -> Self {
        match err {
            ProcessError::Pool(err) => AssemblyError::Pool(err),
            ProcessError::Timeout(limit) => AssemblyError::Timeout(limit),
        }
    }
}

/// Where the data of one output channel came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelSource {
    Direct(String),
    Imputed { label: String, from: String },
    Empty(String),
}

impl ChannelSource {
    pub fn label(&self) -> &str {
        match self {
            ChannelSource::Direct(label)
            | ChannelSource::Imputed { label, .. }
            | ChannelSource::Empty(label) => label,
        }
    }
}

/// Multi-channel stack on the reference grid.
///
/// `data` has shape (channels, depth, height, width) with channels in the
/// configured order.
#[derive(Debug, Clone)]
pub struct AssembledVolume {
    pub data: Array4<f32>,
    pub sources: Vec<ChannelSource>,
    pub reference: ReferenceGrid,
}

impl AssembledVolume {
    pub fn grid(&self) -> &Grid {
        &self.reference.grid
    }

    pub fn channel_count(&self) -> usize {
        self.data.len_of(Axis(0))
    }

    pub fn channel(&self, index: usize) -> Option<ArrayView3<'_, f32>> {
        (index < self.channel_count()).then(|| self.data.index_axis(Axis(0), index))
    }

    pub fn channel_by_label(&self, label: &str) -> Option<ArrayView3<'_, f32>> {
        let index = self.sources.iter().position(|source| source.label() == label)?;
        self.channel(index)
    }
}

pub struct Assembler {
    config: Arc<AssemblyConfig>,
}

impl Assembler {
    pub fn new(config: AssemblyConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &AssemblyConfig {
        &self.config
    }

    /// Build the channel stack for every series under `root`.
    ///
    /// Blocks until every series task has finished.
    ///
    /// # Errors
    ///
    /// Fails when `root` cannot be read, when no series could be classified
    /// and loaded, when no preferred label has a volume, or when the optional
    /// deadline passes first.
    pub fn assemble(&self, root: impl AsRef<Path>) -> Result<AssembledVolume, AssemblyError> {
        let root = root.as_ref();
        let started = Instant::now();

        let groups = scan_directory(root).map_err(|source| {
            error!("Cannot read input directory {}: {}", root.display(), source);
            AssemblyError::RootUnreadable {
                path: root.to_path_buf(),
                source,
            }
        })?;
        info!(
            "Found {} series under {} in {:.2} s",
            groups.len(),
            root.display(),
            started.elapsed().as_secs_f64()
        );

        let found = SeriesProcessor::new(Arc::clone(&self.config)).process_all(groups)?;
        if found.is_empty() {
            error!("No series under {} could be classified and loaded", root.display());
            return Err(AssemblyError::NoRecognizableData);
        }

        let reference = build_reference(&found, &self.config.reference_preference)?;
        let assembled = assemble_channels(&found, reference, &self.config);

        info!(
            "Assembled {} channels on {:?} in {:.2} s",
            assembled.channel_count(),
            assembled.grid().size,
            started.elapsed().as_secs_f64()
        );
        Ok(assembled)
    }
}

/// Resample one volume per configured channel onto the reference grid and
/// stack them in channel order.
///
/// Resampled channels keep their source pixel type. A missing label falls
/// back to its imputation substitute, then to zeros.
pub fn assemble_channels(
    found: &FoundModalities,
    reference: ReferenceGrid,
    config: &AssemblyConfig,
) -> AssembledVolume {
    let grid = &reference.grid;
    let mut sources = Vec::with_capacity(config.channel_count());
    let mut channels = Vec::with_capacity(config.channel_count());

    for label in &config.channel_order {
        let direct = found.largest(label).map(|volume| (volume, None));
        let imputed = || {
            let substitute = config.substitute_for(label)?;
            found
                .largest(substitute)
                .map(|volume| (volume, Some(substitute)))
        };

        match direct.or_else(imputed) {
            Some((volume, substitute)) => {
                let source = match substitute {
                    Some(from) => {
                        warn!("Channel '{}' missing; using '{}' in its place", label, from);
                        ChannelSource::Imputed {
                            label: label.clone(),
                            from: from.to_string(),
                        }
                    }
                    None => ChannelSource::Direct(label.clone()),
                };
                channels.push(resample(&volume.volume, grid).quantized().data);
                sources.push(source);
            }
            None => {
                warn!("Channel '{}' missing with no substitute; filling with zeros", label);
                channels.push(Array3::zeros(grid.shape()));
                sources.push(ChannelSource::Empty(label.clone()));
            }
        }
    }

    let (depth, height, width) = grid.shape();
    let mut data = Array4::zeros((channels.len(), depth, height, width));
    for (mut slot, channel) in data.axis_iter_mut(Axis(0)).zip(&channels) {
        slot.assign(channel);
    }

    AssembledVolume {
        data,
        sources,
        reference,
    }
}
