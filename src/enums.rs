use std::fmt;
use std::str::FromStr;

/// Canonical anatomical planes a volume can be cut along.
///
/// With the volume data stored as (depth, height, width):
///  - Axial fixes the depth index
///  - Coronal fixes the height index
///  - Sagittal fixes the width index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Orientation {
    Axial,
    Coronal,
    Sagittal,
}

impl Orientation {
    pub const ALL: [Orientation; 3] = [
        Orientation::Axial,
        Orientation::Coronal,
        Orientation::Sagittal,
    ];

    /// Array axis (in depth, height, width order) held fixed by this plane.
    pub fn axis(self) -> usize {
        match self {
            Orientation::Axial => 0,
            Orientation::Coronal => 1,
            Orientation::Sagittal => 2,
        }
    }
}

impl fmt::Display for Orientation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Orientation::Axial => "axial",
            Orientation::Coronal => "coronal",
            Orientation::Sagittal => "sagittal",
        };
        f.write_str(name)
    }
}

impl FromStr for Orientation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "axial" => Ok(Orientation::Axial),
            "coronal" => Ok(Orientation::Coronal),
            "sagittal" => Ok(Orientation::Sagittal),
            other => Err(format!("unknown plane '{other}'")),
        }
    }
}

/// Priority tier of a slice sort key. Variants are declared in priority order,
/// so comparing tiers compares trust in the ordering source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SortTier {
    /// Explicit in-series index (Instance Number).
    InstanceNumber,
    /// Position projected onto the slice normal.
    ImagePositionPatient,
    /// Order in which the file was encountered.
    Arrival,
}

/// Persisted volumes of one patient result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VolumeKind {
    /// The isotropic reference volume.
    Reference,
    /// The discrete label volume derived from prediction scores.
    Segmentation,
    /// One channel of the assembled multi-channel stack.
    Channel(usize),
}

impl VolumeKind {
    /// Whether values of this volume are categorical labels.
    pub fn is_label(self) -> bool {
        matches!(self, VolumeKind::Segmentation)
    }
}

impl fmt::Display for VolumeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VolumeKind::Reference => f.write_str("reference"),
            VolumeKind::Segmentation => f.write_str("segmentation"),
            VolumeKind::Channel(index) => write!(f, "channel{index}"),
        }
    }
}

impl FromStr for VolumeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        match s.as_str() {
            "reference" | "original" => Ok(VolumeKind::Reference),
            "segmentation" | "mask" => Ok(VolumeKind::Segmentation),
            _ => s
                .strip_prefix("channel")
                .and_then(|index| index.parse().ok())
                .map(VolumeKind::Channel)
                .ok_or_else(|| format!("unknown volume '{s}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sort_tiers_compare_by_trust() {
        assert!(SortTier::InstanceNumber < SortTier::ImagePositionPatient);
        assert!(SortTier::ImagePositionPatient < SortTier::Arrival);
    }

    #[test]
    fn volume_kind_parses_aliases() {
        assert_eq!("original".parse(), Ok(VolumeKind::Reference));
        assert_eq!("Mask".parse(), Ok(VolumeKind::Segmentation));
        assert_eq!("channel3".parse(), Ok(VolumeKind::Channel(3)));
        assert!("channel".parse::<VolumeKind>().is_err());
        assert!("flair".parse::<VolumeKind>().is_err());
    }

    #[test]
    fn orientation_round_trips_through_display() {
        for orientation in Orientation::ALL {
            assert_eq!(orientation.to_string().parse(), Ok(orientation));
        }
    }
}
