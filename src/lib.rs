//! # DICOM-assembly library
//!
//! This crate turns an unsorted directory of DICOM files from one study into
//! a fixed, ordered multi-channel volume on a shared isotropic grid, ready to
//! be handed to a segmentation model.
//!
//! The directory is scanned recursively and every file with a readable header
//! is grouped by its Series Instance UID. Each series is then, in parallel
//! using rayon:
//!  - classified into an acquisition type (e.g. t1, t1c, t2, flair) by
//!    keyword matching on Series Description, Protocol Name and Image Type
//!  - ordered by Instance Number, then by position along the slice normal,
//!    then by arrival
//!  - decoded into a 3D volume placed in patient (LPS) space
//!
//! The largest series of the first preferred acquisition type defines the
//! reference grid (1 mm isotropic, same extent). Every configured channel is
//! resampled onto that grid; missing channels are imputed from a configured
//! substitute or left at zero, so the output always has the same channels
//! in the same order.
//!
//! Assembled volumes can be persisted as NIfTI files and viewed again as
//! axial, coronal and sagittal planes with an optional label overlay.
//!
//! DICOM files are assumed to have the following attributes:
//!  - No multiframe (always the first frame is used)
//!  - One volume per series
//!
//! # Examples
//!
//! ## Assembling a study directory
//!
//! ```no_run
//! # use dicom_assembly::{Assembler, AssemblyConfig};
//! let assembler = Assembler::new(AssemblyConfig::default());
//! let assembled = assembler
//!     .assemble("study")
//!     .expect("should have assembled the study directory");
//! for (source, channel) in assembled.sources.iter().zip(assembled.data.outer_iter()) {
//!     println!("{:?}: {:?}", source, channel.dim());
//! }
//! ```
//!
//! ## Rendering a stored result
//!
//! ```no_run
//! # use dicom_assembly::{NiftiStore, ViewRequest, ViewService, VolumeKind};
//! # async fn run() {
//! let service = ViewService::new(NiftiStore::new("results"));
//! let view = service
//!     .render("patient-1", VolumeKind::Reference, ViewRequest::default())
//!     .await
//!     .expect("should have rendered the centre planes");
//! view.axial.save("axial.png").expect("should have written the image");
//! # }
//! ```

pub mod assembler;
pub mod classifier;
pub mod config;
pub mod enums;
pub mod geometry;
pub mod header;
mod interpolator;
pub mod normalize;
pub mod ordering;
pub mod orthoslice;
pub mod pipeline;
pub mod prediction;
pub mod processor;
pub mod reference;
pub mod resampler;
pub mod series;
pub mod store;
pub mod view;
pub mod volume;
pub mod volume_loader;

pub use assembler::{AssembledVolume, Assembler, AssemblyError, ChannelSource};
pub use config::{AssemblyConfig, ConfigError, KeywordTable};
pub use enums::{Orientation, SortTier, VolumeKind};
pub use geometry::Grid;
pub use orthoslice::{SliceError, Window};
pub use pipeline::{InferencePipeline, PatientResult, PipelineError};
pub use prediction::{PredictionError, Predictor};
pub use store::{NiftiStore, StoreError, VolumeSource, VolumeStore};
pub use view::{ViewRequest, ViewResponse, ViewService};
pub use volume::{ClassifiedVolume, PixelType, Volume};
pub use volume_loader::{VolumeLoader, VolumeLoaderError};
