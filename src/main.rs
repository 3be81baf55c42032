use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dicom_assembly::{
    Assembler, AssemblyConfig, NiftiStore, Orientation, ViewRequest, ViewService, VolumeKind,
    VolumeStore, Window,
};
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "dicom-assembly")]
#[command(about = "Assemble DICOM studies into multi-channel volumes and view the results")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Assemble a study directory and save the channel stack and reference volume
    Assemble {
        /// Directory containing the DICOM files (searched recursively)
        #[arg(short, long)]
        input: PathBuf,

        /// Results root; the patient directory is created inside it
        #[arg(short, long)]
        output: PathBuf,

        /// JSON configuration file (defaults to the four-channel brain MRI setup)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Patient directory name (defaults to the input directory name)
        #[arg(short, long)]
        patient: Option<String>,
    },

    /// Render one plane of a stored volume to a PNG file
    Slice {
        /// Results root used by `assemble`
        #[arg(short, long)]
        results: PathBuf,

        #[arg(short, long)]
        patient: String,

        /// reference, segmentation or channelN
        #[arg(long, default_value = "reference")]
        volume: VolumeKind,

        #[arg(long, default_value = "axial")]
        plane: Orientation,

        /// Plane index (defaults to the centre)
        #[arg(long)]
        index: Option<usize>,

        /// Display window as CENTER,WIDTH (defaults to min-max)
        #[arg(long, value_parser = parse_window)]
        window: Option<Window>,

        /// Blend the segmentation on top
        #[arg(long)]
        overlay: bool,

        #[arg(long, default_value_t = 0.5)]
        alpha: f32,

        #[arg(long)]
        scale: Option<f32>,

        #[arg(long)]
        out: PathBuf,
    },
}

fn parse_window(value: &str) -> Result<Window, String> {
    let (center, width) = value
        .split_once(',')
        .ok_or_else(|| format!("expected CENTER,WIDTH, got '{value}'"))?;
    let center: f32 = center.trim().parse().map_err(|_| format!("invalid center '{center}'"))?;
    let width: f32 = width.trim().parse().map_err(|_| format!("invalid width '{width}'"))?;
    Window::new(center, width).ok_or_else(|| format!("invalid window {center},{width}"))
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("dicom_assembly=info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match Args::parse().command {
        Command::Assemble {
            input,
            output,
            config,
            patient,
        } => {
            let config = match config {
                Some(path) => AssemblyConfig::from_file(&path)
                    .with_context(|| format!("loading config {}", path.display()))?,
                None => AssemblyConfig::default(),
            };
            let patient = match patient {
                Some(patient) => patient,
                None => input
                    .file_name()
                    .and_then(|name| name.to_str())
                    .map(str::to_string)
                    .context("input path has no usable directory name; pass --patient")?,
            };

            let assembled = Assembler::new(config).assemble(&input)?;
            let saved = NiftiStore::new(output).save(&patient, &assembled, None)?;
            info!("Results written to {}", saved.display());
        }
        Command::Slice {
            results,
            patient,
            volume,
            plane,
            index,
            window,
            overlay,
            alpha,
            scale,
            out,
        } => {
            let mut request = ViewRequest {
                window,
                overlay,
                alpha,
                scale,
                ..ViewRequest::default()
            };
            match plane {
                Orientation::Axial => request.axial = index,
                Orientation::Coronal => request.coronal = index,
                Orientation::Sagittal => request.sagittal = index,
            }

            let view = ViewService::new(NiftiStore::new(results))
                .render(&patient, volume, request)
                .await?;
            let image = match plane {
                Orientation::Axial => &view.axial,
                Orientation::Coronal => &view.coronal,
                Orientation::Sagittal => &view.sagittal,
            };
            image
                .save(&out)
                .with_context(|| format!("writing {}", out.display()))?;
            info!(
                "Saved {} plane {:?} of {:?} to {}",
                plane,
                view.indices,
                view.shape,
                out.display()
            );
        }
    }
    Ok(())
}
