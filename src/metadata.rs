use std::path::Path;

use anyhow::{Context, Result};
use dicom::core::Tag;
use dicom::object::{open_file, DefaultDicomObject};

use crate::dicom_access::ElementAccess;
use crate::error::BodyCompError;
use crate::models::DicomMetadata;

pub const PIXEL_SPACING: Tag = Tag(0x0028, 0x0030);
pub const SLICE_THICKNESS: Tag = Tag(0x0018, 0x0050);
pub const MANUFACTURER: Tag = Tag(0x0008, 0x0070);
pub const PATIENT_WEIGHT: Tag = Tag(0x0010, 0x1030);
pub const PATIENT_SIZE: Tag = Tag(0x0010, 0x1020);
pub const ADDITIONAL_PATIENT_HISTORY: Tag = Tag(0x0010, 0x21b0);
pub const PATIENT_AGE: Tag = Tag(0x0010, 0x1010);
pub const PATIENT_SEX: Tag = Tag(0x0010, 0x0040);
pub const ACQUISITION_DATE: Tag = Tag(0x0008, 0x0022);
pub const PATIENT_NAME: Tag = Tag(0x0010, 0x0010);
pub const PATIENT_ID: Tag = Tag(0x0010, 0x0020);
pub const ACCESSION_NUMBER: Tag = Tag(0x0008, 0x0050);
pub const SLICE_LOCATION: Tag = Tag(0x0020, 0x1041);
pub const HIGH_BIT: Tag = Tag(0x0028, 0x0102);

fn required<T>(value: Option<T>, name: &'static str, tag: Tag) -> Result<T, BodyCompError> {
    value.ok_or(BodyCompError::MissingTag { name, tag })
}

fn text_or_empty<T: ElementAccess>(obj: &T, tag: Tag) -> String {
    obj.element_str(tag).unwrap_or_default()
}

/// Pull the statistics/normal-range attributes out of a representative slice.
///
/// Geometry, manufacturer and weight are mandatory; demographic fields fall
/// back to empty strings and height is optional because only the fat report
/// needs it.
pub fn extract_dicom_metadata<T: ElementAccess>(obj: &T) -> Result<DicomMetadata, BodyCompError> {
    let spacing = required(obj.element_multi_f64(PIXEL_SPACING), "PixelSpacing", PIXEL_SPACING)?;
    if spacing.len() != 2 {
        return Err(BodyCompError::MalformedMetadata(format!(
            "PixelSpacing must hold two values, got {}",
            spacing.len()
        )));
    }

    Ok(DicomMetadata {
        pixel_spacing: [spacing[0], spacing[1]],
        slice_thickness: required(obj.element_f64(SLICE_THICKNESS), "SliceThickness", SLICE_THICKNESS)?,
        manufacturer: required(obj.element_str(MANUFACTURER), "Manufacturer", MANUFACTURER)?,
        patient_weight: required(obj.element_f64(PATIENT_WEIGHT), "PatientWeight", PATIENT_WEIGHT)?,
        patient_size: obj.element_f64(PATIENT_SIZE),
        additional_patient_history: obj.element_str(ADDITIONAL_PATIENT_HISTORY),
        patient_age: text_or_empty(obj, PATIENT_AGE),
        patient_sex: text_or_empty(obj, PATIENT_SEX),
        acquisition_date: text_or_empty(obj, ACQUISITION_DATE),
        patient_name: text_or_empty(obj, PATIENT_NAME),
        patient_id: text_or_empty(obj, PATIENT_ID),
        accession_number: text_or_empty(obj, ACCESSION_NUMBER),
    })
}

pub fn read_dicom_metadata(path: &Path) -> Result<DicomMetadata> {
    let obj: DefaultDicomObject = open_file(path).context("Failed to open DICOM file")?;
    extract_dicom_metadata(&obj).with_context(|| format!("Incomplete metadata in {:?}", path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use dicom::core::{dicom_value, DataElement, PrimitiveValue, VR};
    use dicom::dictionary_std::StandardDataDictionary;
    use dicom::object::InMemDicomObject;

    fn slice_object() -> InMemDicomObject<StandardDataDictionary> {
        let mut obj = InMemDicomObject::new_empty_with_dict(StandardDataDictionary);
        let put = |obj: &mut InMemDicomObject<StandardDataDictionary>, tag, vr, value: &str| {
            obj.put(DataElement::new(tag, vr, PrimitiveValue::from(value)));
        };
        obj.put(DataElement::new(
            PIXEL_SPACING,
            VR::DS,
            dicom_value!(Strs, ["0.9375", "1.25"]),
        ));
        put(&mut obj, SLICE_THICKNESS, VR::DS, "3");
        put(&mut obj, MANUFACTURER, VR::LO, "Siemens");
        put(&mut obj, PATIENT_WEIGHT, VR::DS, "71");
        put(&mut obj, PATIENT_SIZE, VR::DS, "1.68");
        put(&mut obj, PATIENT_AGE, VR::AS, "045Y");
        put(&mut obj, PATIENT_SEX, VR::CS, "F");
        put(&mut obj, PATIENT_NAME, VR::PN, "Test^Patient");
        obj
    }

    #[test]
    fn extracts_geometry_and_demographics() {
        let meta = extract_dicom_metadata(&slice_object()).unwrap();
        assert_eq!(meta.pixel_spacing, [0.9375, 1.25]);
        assert_eq!(meta.slice_thickness, 3.0);
        assert_eq!(meta.manufacturer, "Siemens");
        assert_eq!(meta.patient_weight, 71.0);
        assert_eq!(meta.patient_size, Some(1.68));
        assert_eq!(meta.patient_age, "045Y");
        assert_eq!(meta.patient_name, "Test^Patient");
        assert_eq!(meta.accession_number, "");
        assert!(meta.additional_patient_history.is_none());
    }

    #[test]
    fn missing_weight_is_reported_with_its_tag() {
        let mut obj = slice_object();
        obj.remove_element(PATIENT_WEIGHT);
        match extract_dicom_metadata(&obj) {
            Err(BodyCompError::MissingTag { name, tag }) => {
                assert_eq!(name, "PatientWeight");
                assert_eq!(tag, PATIENT_WEIGHT);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
