//
// dicom_writer.rs
// dicom-bodycomp
//
// Writes the composited RGB overlay volume back out as derived axial, sagittal and coronal DICOM series.
//
// Thales Matheus Mendonça Santos - November 2025

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Local;
use dicom::core::{DataElement, PrimitiveValue, Tag, VR};
use dicom::dictionary_std::StandardDataDictionary;
use dicom::object::{FileDicomObject, FileMetaTableBuilder, InMemDicomObject};
use dicom::transfer_syntax::entries::EXPLICIT_VR_LITTLE_ENDIAN;
use ndarray::{s, ArrayView3, ArrayView4};
use tracing::{debug, info};

use crate::models::{DicomMetadata, TissueModality};

const SECONDARY_CAPTURE_SOP_CLASS: &str = "1.2.840.10008.5.1.4.1.1.7";
const SERIES_UID_ROOT: &str = "1.2.826.0.1.3680043.2.1125";
const INSTANCE_UID_ROOT: &str = "1.3.6.1.4.1.9590.100.1.2";

const SOP_CLASS_UID: Tag = Tag(0x0008, 0x0016);
const SOP_INSTANCE_UID: Tag = Tag(0x0008, 0x0018);
const IMAGE_TYPE: Tag = Tag(0x0008, 0x0008);
const INSTANCE_CREATION_DATE: Tag = Tag(0x0008, 0x0012);
const INSTANCE_CREATION_TIME: Tag = Tag(0x0008, 0x0013);
const SERIES_DATE: Tag = Tag(0x0008, 0x0021);
const SERIES_TIME: Tag = Tag(0x0008, 0x0031);
const SERIES_DESCRIPTION: Tag = Tag(0x0008, 0x103e);
const SPACING_BETWEEN_SLICES: Tag = Tag(0x0018, 0x0088);
const SERIES_INSTANCE_UID: Tag = Tag(0x0020, 0x000e);
const SERIES_NUMBER: Tag = Tag(0x0020, 0x0011);
const INSTANCE_NUMBER: Tag = Tag(0x0020, 0x0013);
const IMAGE_POSITION_PATIENT: Tag = Tag(0x0020, 0x0032);
const IMAGE_ORIENTATION_PATIENT: Tag = Tag(0x0020, 0x0037);
const SAMPLES_PER_PIXEL: Tag = Tag(0x0028, 0x0002);
const PHOTOMETRIC_INTERPRETATION: Tag = Tag(0x0028, 0x0004);
const PLANAR_CONFIGURATION: Tag = Tag(0x0028, 0x0006);
const ROWS: Tag = Tag(0x0028, 0x0010);
const COLUMNS: Tag = Tag(0x0028, 0x0011);
const PIXEL_SPACING: Tag = Tag(0x0028, 0x0030);
const BITS_ALLOCATED: Tag = Tag(0x0028, 0x0100);
const BITS_STORED: Tag = Tag(0x0028, 0x0101);
const HIGH_BIT: Tag = Tag(0x0028, 0x0102);
const PIXEL_REPRESENTATION: Tag = Tag(0x0028, 0x0103);
const LARGEST_IMAGE_PIXEL_VALUE: Tag = Tag(0x0028, 0x0107);
const WINDOW_CENTER: Tag = Tag(0x0028, 0x1050);
const WINDOW_WIDTH: Tag = Tag(0x0028, 0x1051);
const PIXEL_DATA: Tag = Tag(0x7fe0, 0x0010);

/// Source attributes that no longer describe a reformatted slice.
const DROPPED_TAGS: [Tag; 10] = [
    Tag(0x0018, 0x0050),
    Tag(0x0020, 0x1041),
    Tag(0x0028, 0x1052),
    Tag(0x0028, 0x1053),
    Tag(0x0028, 0x0030),
    Tag(0x0028, 0x1050),
    Tag(0x0028, 0x1051),
    Tag(0x0028, 0x0103),
    Tag(0x0028, 0x0106),
    Tag(0x0028, 0x0107),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    Axial,
    Sagittal,
    Coronal,
}

impl Orientation {
    pub const ALL: [Orientation; 3] = [
        Orientation::Axial,
        Orientation::Sagittal,
        Orientation::Coronal,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Orientation::Axial => "axial",
            Orientation::Sagittal => "sagittal",
            Orientation::Coronal => "coronal",
        }
    }

    fn abbreviation(&self) -> &'static str {
        match self {
            Orientation::Axial => "Ax",
            Orientation::Sagittal => "Sag",
            Orientation::Coronal => "Cor",
        }
    }

    fn direction_cosines(&self) -> [&'static str; 6] {
        match self {
            Orientation::Axial => ["1", "0", "0", "0", "1", "0"],
            Orientation::Sagittal => ["0", "1", "0", "0", "0", "-1"],
            Orientation::Coronal => ["1", "0", "0", "0", "0", "-1"],
        }
    }

    /// Number of slices along this orientation in a `(depth, rows, cols, 3)` volume.
    pub fn slice_count(&self, overlay: ArrayView4<u8>) -> usize {
        let (depth, rows, cols, _) = overlay.dim();
        match self {
            Orientation::Axial => depth,
            Orientation::Coronal => rows,
            Orientation::Sagittal => cols,
        }
    }

    fn slice<'a>(&self, overlay: ArrayView4<'a, u8>, index: usize) -> ArrayView3<'a, u8> {
        match self {
            Orientation::Axial => overlay.slice_move(s![index, .., .., ..]),
            Orientation::Coronal => overlay.slice_move(s![.., index, .., ..]),
            Orientation::Sagittal => overlay.slice_move(s![.., .., index, ..]),
        }
    }

    /// Row and column spacing of a slice, in millimetres.
    fn pixel_spacing(&self, meta: &DicomMetadata) -> [f64; 2] {
        match self {
            Orientation::Axial => meta.pixel_spacing,
            Orientation::Coronal => [meta.slice_thickness, meta.pixel_spacing[1]],
            Orientation::Sagittal => [meta.slice_thickness, meta.pixel_spacing[0]],
        }
    }
}

/// Series number and description for an output series.
pub fn series_identity(modality: TissueModality, orientation: Orientation) -> (u32, String) {
    let base = match modality {
        TissueModality::Fat => 11053,
        TissueModality::Muscle => 11054,
    };
    let number = base
        + match orientation {
            Orientation::Coronal => 0,
            Orientation::Axial => 2,
            Orientation::Sagittal => 4,
        };
    let tissue = match modality {
        TissueModality::Fat => "Fat",
        TissueModality::Muscle => "Muscle",
    };
    (
        number,
        format!("{} HLI Quantitative {}", orientation.abbreviation(), tissue),
    )
}

/// Date and time shared by every file of one write.
#[derive(Debug, Clone)]
pub struct SeriesStamp {
    pub date: String,
    pub time: String,
}

impl SeriesStamp {
    pub fn now() -> Self {
        let now = Local::now();
        Self {
            date: now.format("%Y%m%d").to_string(),
            time: now.format("%H%M%S").to_string(),
        }
    }
}

fn put_str(obj: &mut InMemDicomObject<StandardDataDictionary>, tag: Tag, vr: VR, value: &str) {
    obj.put(DataElement::new(tag, vr, PrimitiveValue::from(value)));
}

fn put_u16(obj: &mut InMemDicomObject<StandardDataDictionary>, tag: Tag, value: u16) {
    obj.put(DataElement::new(tag, VR::US, PrimitiveValue::from(value)));
}

fn put_multi(obj: &mut InMemDicomObject<StandardDataDictionary>, tag: Tag, vr: VR, values: Vec<String>) {
    obj.put(DataElement::new(
        tag,
        vr,
        PrimitiveValue::Strs(values.into_iter().collect()),
    ));
}

/// Copies the patient, study and equipment attributes of the source slice.
fn inherited_attributes(
    reference: &InMemDicomObject<StandardDataDictionary>,
) -> InMemDicomObject<StandardDataDictionary> {
    let mut obj = InMemDicomObject::new_empty_with_dict(StandardDataDictionary);
    for elem in reference.iter() {
        let tag = elem.header().tag;
        if tag.group() == PIXEL_DATA.group() || tag.group() % 2 == 1 || DROPPED_TAGS.contains(&tag) {
            continue;
        }
        obj.put(elem.clone());
    }
    obj
}

/// Writes one orientation of the overlay volume as a derived RGB series.
pub struct SeriesWriter<'a> {
    modality: TissueModality,
    metadata: &'a DicomMetadata,
    template: InMemDicomObject<StandardDataDictionary>,
    stamp: SeriesStamp,
}

impl<'a> SeriesWriter<'a> {
    pub fn new(
        modality: TissueModality,
        reference: &InMemDicomObject<StandardDataDictionary>,
        metadata: &'a DicomMetadata,
        stamp: SeriesStamp,
    ) -> Self {
        Self {
            modality,
            metadata,
            template: inherited_attributes(reference),
            stamp,
        }
    }

    fn slice_object(
        &self,
        orientation: Orientation,
        index: usize,
        pixels: ArrayView3<u8>,
    ) -> InMemDicomObject<StandardDataDictionary> {
        let (number, description) = series_identity(self.modality, orientation);
        let (rows, cols, _) = pixels.dim();
        let stamp = &self.stamp;
        let mut obj = self.template.clone();

        put_str(&mut obj, SOP_CLASS_UID, VR::UI, SECONDARY_CAPTURE_SOP_CLASS);
        put_str(
            &mut obj,
            SOP_INSTANCE_UID,
            VR::UI,
            &format!("{INSTANCE_UID_ROOT}.{}{number}{}{index}", stamp.date, stamp.time),
        );
        put_str(
            &mut obj,
            SERIES_INSTANCE_UID,
            VR::UI,
            &format!("{SERIES_UID_ROOT}.{}.2{number}{}", stamp.date, stamp.time),
        );
        put_multi(
            &mut obj,
            IMAGE_TYPE,
            VR::CS,
            vec!["DERIVED".to_string(), "SECONDARY".to_string()],
        );
        put_str(&mut obj, SERIES_DATE, VR::DA, &stamp.date);
        put_str(&mut obj, SERIES_TIME, VR::TM, &stamp.time);
        put_str(&mut obj, INSTANCE_CREATION_DATE, VR::DA, &stamp.date);
        put_str(&mut obj, INSTANCE_CREATION_TIME, VR::TM, &stamp.time);
        put_str(&mut obj, SERIES_NUMBER, VR::IS, &number.to_string());
        put_str(&mut obj, SERIES_DESCRIPTION, VR::LO, &description);
        put_str(&mut obj, INSTANCE_NUMBER, VR::IS, &(index + 1).to_string());
        put_str(&mut obj, SPACING_BETWEEN_SLICES, VR::DS, "");
        put_multi(
            &mut obj,
            IMAGE_ORIENTATION_PATIENT,
            VR::DS,
            orientation
                .direction_cosines()
                .iter()
                .map(|v| v.to_string())
                .collect(),
        );
        put_multi(
            &mut obj,
            IMAGE_POSITION_PATIENT,
            VR::DS,
            vec!["1".to_string(); 3],
        );
        let spacing = orientation.pixel_spacing(self.metadata);
        put_multi(
            &mut obj,
            PIXEL_SPACING,
            VR::DS,
            spacing.iter().map(|v| v.to_string()).collect(),
        );
        put_str(&mut obj, WINDOW_CENTER, VR::DS, "127");
        put_str(&mut obj, WINDOW_WIDTH, VR::DS, "255");

        put_u16(&mut obj, SAMPLES_PER_PIXEL, 3);
        put_str(&mut obj, PHOTOMETRIC_INTERPRETATION, VR::CS, "RGB");
        put_u16(&mut obj, PLANAR_CONFIGURATION, 0);
        put_u16(&mut obj, ROWS, rows as u16);
        put_u16(&mut obj, COLUMNS, cols as u16);
        put_u16(&mut obj, BITS_ALLOCATED, 8);
        put_u16(&mut obj, BITS_STORED, 8);
        put_u16(&mut obj, HIGH_BIT, 7);
        put_u16(&mut obj, PIXEL_REPRESENTATION, 0);
        put_u16(&mut obj, LARGEST_IMAGE_PIXEL_VALUE, 255);

        // Interleaved RGB, padded to an even length.
        let mut bytes: Vec<u8> = pixels.iter().copied().collect();
        if bytes.len() % 2 == 1 {
            bytes.push(0);
        }
        obj.put(DataElement::new(PIXEL_DATA, VR::OB, PrimitiveValue::from(bytes)));
        obj
    }

    /// Write every slice of `orientation` to `images_dir/<orientation>-<i>.dcm`.
    pub fn write_orientation(
        &self,
        overlay: ArrayView4<u8>,
        orientation: Orientation,
        images_dir: &Path,
    ) -> Result<Vec<PathBuf>> {
        let count = orientation.slice_count(overlay);
        let mut written = Vec::with_capacity(count);
        for index in 0..count {
            let obj = self.slice_object(orientation, index, orientation.slice(overlay, index));
            let sop_instance_uid = obj
                .element(SOP_INSTANCE_UID)
                .ok()
                .and_then(|e| e.to_str().ok())
                .map(|uid| uid.to_string())
                .unwrap_or_default();

            let file_meta = FileMetaTableBuilder::new()
                .transfer_syntax(EXPLICIT_VR_LITTLE_ENDIAN.uid())
                .media_storage_sop_class_uid(SECONDARY_CAPTURE_SOP_CLASS)
                .media_storage_sop_instance_uid(sop_instance_uid.as_str())
                .build()?;
            let mut file_obj =
                FileDicomObject::new_empty_with_dict_and_meta(StandardDataDictionary, file_meta);
            for elem in obj {
                file_obj.put(elem);
            }

            let path = images_dir.join(format!("{}-{}.dcm", orientation.name(), index));
            file_obj
                .write_to_file(&path)
                .with_context(|| format!("Failed to write {:?}", path))?;
            written.push(path);
        }
        debug!(orientation = orientation.name(), count, "series written");
        Ok(written)
    }

    /// Write all three orientations under `output_dir/images`.
    pub fn write_all(&self, overlay: ArrayView4<u8>, output_dir: &Path) -> Result<Vec<PathBuf>> {
        let images_dir = output_dir.join("images");
        fs::create_dir_all(&images_dir)
            .with_context(|| format!("Failed to create {:?}", images_dir))?;

        let mut written = Vec::new();
        for orientation in Orientation::ALL {
            written.extend(self.write_orientation(overlay, orientation, &images_dir)?);
        }
        info!(files = written.len(), ?images_dir, "overlay series written");
        Ok(written)
    }
}
