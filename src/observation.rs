//
// observation.rs
// dicom-bodycomp
//
// Builds one HL7 FHIR Observation document per reported metric and writes them next to the job output.
//
// Thales Matheus Mendonça Santos - November 2025

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::models::{metric, Stats, TissueModality};
use crate::normal_range::{NormalRangeBand, NormalRangeRow};

const PERFORMER: &str = "Human Longevity, Inc.";
const HLI_SYSTEM: &str = "https://www.humanlongevity.com";
const LOINC_SYSTEM: &str = "http://loinc.org";
const UCUM_SYSTEM: &str = "http://unitsofmeasure.org";
const BODY_SITE_CODE: &str = "46358-8";
const BODY_SITE_TEXT: &str = "MR Whole body";

/// Coding and units of one reported metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricDefinition {
    pub key: &'static str,
    pub system: &'static str,
    pub system_acronym: &'static str,
    pub code: &'static str,
    pub display: &'static str,
    pub unit: &'static str,
    /// Reference band for tissue metrics; patient measurements have none.
    pub band: Option<NormalRangeBand>,
}

const MUSCLE_VOLUME: MetricDefinition = MetricDefinition {
    key: metric::MUSCLE_VOLUME,
    system: HLI_SYSTEM,
    system_acronym: "HLI",
    code: "123456-1",
    display: "Thigh muscle volume",
    unit: "L",
    band: Some(NormalRangeBand::MuscleVolume),
};

const MUSCLE_RATIO: MetricDefinition = MetricDefinition {
    key: metric::MUSCLE_RATIO,
    system: LOINC_SYSTEM,
    system_acronym: "HLI",
    code: "00000-1",
    display: "Thigh muscle ratio",
    unit: "kg/L",
    band: Some(NormalRangeBand::MuscleRatio),
};

const PATIENT_WEIGHT: MetricDefinition = MetricDefinition {
    key: metric::PATIENT_WEIGHT,
    system: LOINC_SYSTEM,
    system_acronym: "LOINC",
    code: "29463-7",
    display: "Body weight",
    unit: "kg",
    band: None,
};

const SAT_VOLUME: MetricDefinition = MetricDefinition {
    key: metric::SAT_VOLUME,
    system: HLI_SYSTEM,
    system_acronym: "HLI",
    code: "123456-2",
    display: "Abdominal subcutaneous adipose tissue volume",
    unit: "L",
    band: Some(NormalRangeBand::SatVolume),
};

const VAT_VOLUME: MetricDefinition = MetricDefinition {
    key: metric::VAT_VOLUME,
    system: HLI_SYSTEM,
    system_acronym: "HLI",
    code: "123456-3",
    display: "Visceral adipose tissue volume",
    unit: "L",
    band: Some(NormalRangeBand::VatVolume),
};

const VAT_INDEX: MetricDefinition = MetricDefinition {
    key: metric::VAT_INDEX,
    system: HLI_SYSTEM,
    system_acronym: "HLI",
    code: "123456-4",
    display: "Visceral adipose tissue index",
    unit: "L/m2",
    band: Some(NormalRangeBand::VatIndex),
};

const VAT_RATIO: MetricDefinition = MetricDefinition {
    key: metric::VAT_RATIO,
    system: HLI_SYSTEM,
    system_acronym: "HLI",
    code: "123456-5",
    display: "Visceral adipose tissue ratio",
    unit: "%",
    band: Some(NormalRangeBand::VatRatio),
};

const HEIGHT_METERS: MetricDefinition = MetricDefinition {
    key: metric::HEIGHT_METERS,
    system: LOINC_SYSTEM,
    system_acronym: "LOINC",
    code: "8302-2",
    display: "Body height",
    unit: "m",
    band: None,
};

/// Metrics reported for a modality, in output order.
pub fn reported_metrics(modality: TissueModality) -> &'static [MetricDefinition] {
    match modality {
        TissueModality::Muscle => &[MUSCLE_VOLUME, MUSCLE_RATIO, PATIENT_WEIGHT],
        TissueModality::Fat => &[
            SAT_VOLUME,
            VAT_VOLUME,
            PATIENT_WEIGHT,
            VAT_INDEX,
            VAT_RATIO,
            HEIGHT_METERS,
        ],
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Narrative {
    pub status: String,
    pub div: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Coding {
    pub system: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CodeableConcept {
    pub coding: Vec<Coding>,
    pub text: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Reference {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
}

/// Measured value plus the patient context it was reported against.
#[derive(Debug, Clone, Serialize)]
pub struct Quantity {
    pub value: Value,
    pub unit: String,
    pub system: String,
    pub code: String,
    pub normal_range: String,
    pub acquisition_date: String,
    pub patient_name: String,
    pub patient_age: String,
    pub patient_sex: String,
    pub patient_id: String,
    pub accession_number: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Observation {
    pub resource_type: String,
    pub id: String,
    pub text: Narrative,
    pub status: String,
    pub code: CodeableConcept,
    pub subject: Reference,
    pub performer: Vec<Reference>,
    pub device: Reference,
    pub value_quantity: Quantity,
    pub body_site: CodeableConcept,
}

/// Finite values are written as JSON numbers spelled exactly as formatted
/// (`1.10` stays `1.10`); `inf`/`nan` and other text stay strings.
fn quantity_value(formatted: &str) -> Value {
    formatted
        .parse::<serde_json::Number>()
        .map(Value::Number)
        .unwrap_or_else(|_| Value::String(formatted.to_string()))
}

fn narrative(definition: &MetricDefinition, sample_id: &str, value: &str) -> String {
    format!(
        "<div xmlns=\"http://www.w3.org/1999/xhtml\"><p><b>Generated Narrative with Details</b></p>\
         <p><b>id</b>: MR</p><p><b>status</b>: final</p>\
         <p><b>code</b>: {BODY_SITE_TEXT} <span>(Details : {{{acronym} code '{code}' = '{display}'}})</span></p>\
         <p><b>subject</b>: <a>Patient/{sample_id}</a></p><p><b>performer</b>: <a>{PERFORMER}</a></p>\
         <p><b>value</b>: {value}{unit}<span> (Details: UCUM code {unit} = '{unit}')</span></p>\
         <p><b>bodySite</b>: {BODY_SITE_TEXT} <span>(Details : {{LOINC MR code '{BODY_SITE_CODE}'}})</span></p></div>",
        acronym = definition.system_acronym,
        code = definition.code,
        display = definition.display,
        unit = definition.unit,
    )
}

/// Build the Observation for one metric.
///
/// Tissue metrics carry their normal-range band together with the
/// acquisition date and accession number; patient measurements leave those
/// three blank.
pub fn build_observation(
    definition: &MetricDefinition,
    stats: &Stats,
    ranges: &NormalRangeRow,
    sample_id: &str,
) -> Observation {
    let value = stats.get(definition.key).unwrap_or_default();
    if value.is_empty() {
        warn!(metric = definition.key, "metric missing from stats");
    }
    let (normal_range, acquisition_date, accession_number) = match definition.band {
        Some(band) => (
            ranges.band(band).to_string(),
            ranges.acquisition_date().to_string(),
            ranges.accession_number().to_string(),
        ),
        None => (String::new(), String::new(), String::new()),
    };

    Observation {
        resource_type: "Observation".to_string(),
        id: "MR".to_string(),
        text: Narrative {
            status: "generated".to_string(),
            div: narrative(definition, sample_id, value),
        },
        status: "final".to_string(),
        code: CodeableConcept {
            coding: vec![Coding {
                system: definition.system.to_string(),
                code: definition.code.to_string(),
                display: Some(definition.display.to_string()),
            }],
            text: format!("MR Whole Body - {}", definition.display),
        },
        subject: Reference {
            reference: Some(format!("Patient/{sample_id}")),
            display: None,
        },
        performer: vec![Reference {
            reference: Some(format!("Organization/{PERFORMER}")),
            display: Some(PERFORMER.to_string()),
        }],
        device: Reference {
            reference: None,
            display: Some(format!("MRI: {}", stats.manufacturer)),
        },
        value_quantity: Quantity {
            value: quantity_value(value),
            unit: definition.unit.to_string(),
            system: UCUM_SYSTEM.to_string(),
            code: definition.unit.to_string(),
            normal_range,
            acquisition_date,
            patient_name: ranges.patient_name().to_string(),
            patient_age: ranges.patient_age().to_string(),
            patient_sex: ranges.patient_sex().to_string(),
            patient_id: ranges.patient_id().to_string(),
            accession_number,
        },
        body_site: CodeableConcept {
            coding: vec![Coding {
                system: LOINC_SYSTEM.to_string(),
                code: BODY_SITE_CODE.to_string(),
                display: None,
            }],
            text: BODY_SITE_TEXT.to_string(),
        },
    }
}

/// `report.json` becomes `report.<metric>.json`.
pub fn observation_filename(output_filename: &str, metric: &str) -> String {
    match output_filename.strip_suffix(".json") {
        Some(stem) => format!("{stem}.{metric}.json"),
        None => format!("{output_filename}.{metric}.json"),
    }
}

/// Write every metric of `modality` to its own JSON file in `dir`.
pub fn write_observations(
    dir: &Path,
    output_filename: &str,
    modality: TissueModality,
    stats: &Stats,
    ranges: &NormalRangeRow,
    sample_id: &str,
) -> Result<Vec<PathBuf>> {
    let mut written = Vec::new();
    for definition in reported_metrics(modality) {
        let observation = build_observation(definition, stats, ranges, sample_id);
        let path = dir.join(observation_filename(output_filename, definition.key));
        let file = File::create(&path).with_context(|| format!("Failed to create {:?}", path))?;
        serde_json::to_writer_pretty(BufWriter::new(file), &observation)
            .with_context(|| format!("Failed to write observation {:?}", path))?;
        debug!(metric = definition.key, ?path, "observation written");
        written.push(path);
    }
    info!(count = written.len(), %modality, "observations written");
    Ok(written)
}
