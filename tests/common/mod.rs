#![allow(dead_code)]

use dicom::core::{DataElement, PrimitiveValue, VR};
use dicom::object::{FileMetaTableBuilder, InMemDicomObject};
use dicom_dictionary_std::{tags, uids};
use std::path::Path;

/// A synthetic axial MR series.
pub struct Series<'a> {
    pub uid: &'a str,
    pub description: &'a str,
    /// (columns, rows, slices)
    pub size: [usize; 3],
    /// (row spacing, column spacing)
    pub pixel_spacing: [f64; 2],
    pub slice_gap: f64,
    pub base_value: u16,
}

impl Series<'_> {
    pub fn value(&self, x: usize, y: usize, z: usize) -> u16 {
        self.base_value + (z * 10 + y * 2 + x) as u16
    }
}

fn strs(values: &[String]) -> PrimitiveValue {
    PrimitiveValue::Strs(values.iter().cloned().collect())
}

/// Write every slice of `series` into `dir/<uid>/`. Files are named in
/// reverse slice order so that traversal order never matches anatomy.
pub fn write_series(dir: &Path, series: &Series) {
    let series_dir = dir.join(series.uid);
    std::fs::create_dir_all(&series_dir).unwrap();
    let [columns, rows, slices] = series.size;

    for z in 0..slices {
        let sop_instance_uid = format!("{}.{}", series.uid, z + 1);
        let pixels: Vec<u16> = (0..rows)
            .flat_map(|y| (0..columns).map(move |x| (x, y)))
            .map(|(x, y)| series.value(x, y, z))
            .collect();
        let position = [-40.0, -30.0, z as f64 * series.slice_gap].map(|v: f64| v.to_string());
        let orientation = ["1", "0", "0", "0", "1", "0"].map(String::from);
        let spacing = series.pixel_spacing.map(|v| v.to_string());

        let object = InMemDicomObject::from_element_iter([
            DataElement::new(tags::SOP_CLASS_UID, VR::UI, PrimitiveValue::from(uids::MR_IMAGE_STORAGE)),
            DataElement::new(tags::SOP_INSTANCE_UID, VR::UI, PrimitiveValue::from(sop_instance_uid.as_str())),
            DataElement::new(tags::MODALITY, VR::CS, PrimitiveValue::from("MR")),
            DataElement::new(tags::SERIES_DESCRIPTION, VR::LO, PrimitiveValue::from(series.description)),
            DataElement::new(tags::SERIES_INSTANCE_UID, VR::UI, PrimitiveValue::from(series.uid)),
            DataElement::new(tags::INSTANCE_NUMBER, VR::IS, PrimitiveValue::from((z + 1).to_string())),
            DataElement::new(tags::IMAGE_POSITION_PATIENT, VR::DS, strs(&position)),
            DataElement::new(tags::IMAGE_ORIENTATION_PATIENT, VR::DS, strs(&orientation)),
            DataElement::new(tags::SLICE_THICKNESS, VR::DS, PrimitiveValue::from(series.slice_gap.to_string())),
            DataElement::new(tags::SAMPLES_PER_PIXEL, VR::US, PrimitiveValue::from(1_u16)),
            DataElement::new(tags::PHOTOMETRIC_INTERPRETATION, VR::CS, PrimitiveValue::from("MONOCHROME2")),
            DataElement::new(tags::ROWS, VR::US, PrimitiveValue::from(rows as u16)),
            DataElement::new(tags::COLUMNS, VR::US, PrimitiveValue::from(columns as u16)),
            DataElement::new(tags::PIXEL_SPACING, VR::DS, strs(&spacing)),
            DataElement::new(tags::BITS_ALLOCATED, VR::US, PrimitiveValue::from(16_u16)),
            DataElement::new(tags::BITS_STORED, VR::US, PrimitiveValue::from(16_u16)),
            DataElement::new(tags::HIGH_BIT, VR::US, PrimitiveValue::from(15_u16)),
            DataElement::new(tags::PIXEL_REPRESENTATION, VR::US, PrimitiveValue::from(0_u16)),
            DataElement::new(tags::PIXEL_DATA, VR::OW, PrimitiveValue::U16(pixels.into_iter().collect())),
        ])
        .with_meta(
            FileMetaTableBuilder::new()
                .media_storage_sop_class_uid(uids::MR_IMAGE_STORAGE)
                .media_storage_sop_instance_uid(sop_instance_uid.as_str())
                .transfer_syntax(uids::EXPLICIT_VR_LITTLE_ENDIAN),
        )
        .unwrap();

        let name = format!("IM{:04}.dcm", slices - z);
        object.write_to_file(series_dir.join(name)).unwrap();
    }
}

pub fn series<'a>(uid: &'a str, description: &'a str, base_value: u16) -> Series<'a> {
    Series {
        uid,
        description,
        size: [8, 6, 5],
        pixel_spacing: [0.5, 0.5],
        slice_gap: 2.0,
        base_value,
    }
}
