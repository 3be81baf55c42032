//! Header-only view of a DICOM file: the metadata subset needed to group,
//! classify and order slices without decoding pixel data.

use dicom::core::Tag;
use dicom::object::{FileDicomObject, InMemDicomObject, OpenFileOptions};
use dicom_dictionary_std::tags;
use std::path::{Path, PathBuf};

/// Free-text metadata fields examined during classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetaField {
    SeriesDescription,
    ProtocolName,
    ImageType,
}

impl MetaField {
    /// Fields in the order the classifier consults them.
    pub const PRIORITY: [MetaField; 3] = [
        MetaField::SeriesDescription,
        MetaField::ProtocolName,
        MetaField::ImageType,
    ];

    pub fn tag(self) -> Tag {
        match self {
            MetaField::SeriesDescription => tags::SERIES_DESCRIPTION,
            MetaField::ProtocolName => tags::PROTOCOL_NAME,
            MetaField::ImageType => tags::IMAGE_TYPE,
        }
    }
}

/// One source file plus the parsed metadata subset. Never holds pixel data.
#[derive(Debug, Clone, PartialEq)]
pub struct RawSlice {
    pub path: PathBuf,
    pub series_uid: String,
    pub series_description: Vec<String>,
    pub protocol_name: Vec<String>,
    pub image_type: Vec<String>,
    pub instance_number: Option<i32>,
    pub position: Option<[f64; 3]>,
    /// Row direction cosines followed by column direction cosines.
    pub orientation: Option<[f64; 6]>,
    /// (row spacing, column spacing).
    pub pixel_spacing: Option<[f64; 2]>,
    pub slice_thickness: Option<f64>,
    pub rows: Option<u32>,
    pub columns: Option<u32>,
    pub bits_allocated: Option<u16>,
    pub pixel_representation: Option<u16>,
}

impl RawSlice {
    /// Parse the header of `path`, stopping before the pixel data.
    ///
    /// Returns `None` for anything that is not a readable DICOM file with a
    /// series identifier; directories routinely contain such sidecar files.
    pub fn read(path: impl AsRef<Path>) -> Option<Self> {
        let path = path.as_ref();
        let object = OpenFileOptions::new()
            .read_until(tags::PIXEL_DATA)
            .open_file(path)
            .ok()?;
        Self::from_object(path, &object)
    }

    pub fn from_object(
        path: impl Into<PathBuf>,
        object: &FileDicomObject<InMemDicomObject>,
    ) -> Option<Self> {
        let series_uid = string(object, tags::SERIES_INSTANCE_UID)?;
        Some(Self {
            path: path.into(),
            series_uid,
            series_description: strings(object, MetaField::SeriesDescription.tag()),
            protocol_name: strings(object, MetaField::ProtocolName.tag()),
            image_type: strings(object, MetaField::ImageType.tag()),
            instance_number: object
                .element(tags::INSTANCE_NUMBER)
                .ok()
                .and_then(|element| element.to_int::<i32>().ok()),
            position: floats::<3>(object, tags::IMAGE_POSITION_PATIENT),
            orientation: floats::<6>(object, tags::IMAGE_ORIENTATION_PATIENT),
            pixel_spacing: floats::<2>(object, tags::PIXEL_SPACING),
            slice_thickness: object
                .element(tags::SLICE_THICKNESS)
                .ok()
                .and_then(|element| element.to_float64().ok()),
            rows: object
                .element(tags::ROWS)
                .ok()
                .and_then(|element| element.to_int::<u32>().ok()),
            columns: object
                .element(tags::COLUMNS)
                .ok()
                .and_then(|element| element.to_int::<u32>().ok()),
            bits_allocated: object
                .element(tags::BITS_ALLOCATED)
                .ok()
                .and_then(|element| element.to_int::<u16>().ok()),
            pixel_representation: object
                .element(tags::PIXEL_REPRESENTATION)
                .ok()
                .and_then(|element| element.to_int::<u16>().ok()),
        })
    }

    pub fn values(&self, field: MetaField) -> &[String] {
        match field {
            MetaField::SeriesDescription => &self.series_description,
            MetaField::ProtocolName => &self.protocol_name,
            MetaField::ImageType => &self.image_type,
        }
    }

    /// Classification text of `field`: values joined with single spaces,
    /// lower-cased and trimmed. `None` when the field is absent or blank.
    pub fn field_text(&self, field: MetaField) -> Option<String> {
        let text = self.values(field).join(" ").to_lowercase();
        let text = text.trim();
        (!text.is_empty()).then(|| text.to_string())
    }
}

#[cfg(test)]
impl RawSlice {
    /// Slice with a path and series identifier and nothing else.
    pub(crate) fn bare(path: &str, series_uid: &str) -> Self {
        Self {
            path: PathBuf::from(path),
            series_uid: series_uid.to_string(),
            series_description: Vec::new(),
            protocol_name: Vec::new(),
            image_type: Vec::new(),
            instance_number: None,
            position: None,
            orientation: None,
            pixel_spacing: None,
            slice_thickness: None,
            rows: None,
            columns: None,
            bits_allocated: None,
            pixel_representation: None,
        }
    }
}

fn string(object: &FileDicomObject<InMemDicomObject>, tag: Tag) -> Option<String> {
    let value = object.element(tag).ok()?.to_str().ok()?;
    let value = value.trim_matches(|c: char| c.is_whitespace() || c == '\0');
    (!value.is_empty()).then(|| value.to_string())
}

// Multi-valued strings come back backslash-separated from `to_str`.
fn strings(object: &FileDicomObject<InMemDicomObject>, tag: Tag) -> Vec<String> {
    string(object, tag)
        .map(|value| {
            value
                .split('\\')
                .map(|part| part.trim_matches(|c: char| c.is_whitespace() || c == '\0'))
                .filter(|part| !part.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn floats<const N: usize>(
    object: &FileDicomObject<InMemDicomObject>,
    tag: Tag,
) -> Option<[f64; N]> {
    let values = object.element(tag).ok()?.to_multi_float64().ok()?;
    let values: [f64; N] = values.get(..N)?.try_into().ok()?;
    values.iter().all(|v| v.is_finite()).then_some(values)
}
