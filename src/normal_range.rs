//
// normal_range.rs
// dicom-bodycomp
//
// Looks up the clinical normal-range row for a patient's age and sex and appends the acquisition/identity fields the report needs.
//
// Thales Matheus Mendonça Santos - November 2025

use std::io::Read;
use std::path::Path;

use serde::Serialize;
use tracing::{debug, info};

use crate::error::{BodyCompError, Result};
use crate::models::DicomMetadata;

/// Placeholder used for every band when the table has no row for the age.
pub const NO_NORMAL_RANGE: &str = "No Normal Range Established";

/// Number of reference bands carried by a row.
const BAND_COUNT: usize = 6;

/// Identity fields appended after the reference values, in order.
const IDENTITY_FIELDS: usize = 6;

/// Which reference band a report metric is compared against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NormalRangeBand {
    VatVolume,
    VatRatio,
    VatIndex,
    SatVolume,
    MuscleRatio,
    MuscleVolume,
}

impl NormalRangeBand {
    /// Column of the band in a reference row.
    pub fn position(&self) -> usize {
        match self {
            NormalRangeBand::VatVolume => 2,
            NormalRangeBand::VatRatio => 3,
            NormalRangeBand::VatIndex => 4,
            NormalRangeBand::SatVolume => 5,
            NormalRangeBand::MuscleRatio => 6,
            NormalRangeBand::MuscleVolume => 7,
        }
    }
}

/// Patient sex as used to pick a reference sheet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sex {
    Female,
    Male,
}

impl Sex {
    /// `F` selects the female sheet; every other value the male one.
    pub fn from_dicom(code: &str) -> Self {
        if code.trim() == "F" {
            Sex::Female
        } else {
            Sex::Male
        }
    }
}

/// Normal-range reference data, one sheet per sex, rows ordered by age.
///
/// The first column of each row holds the age in years.
#[derive(Debug, Clone, Default)]
pub struct ReferenceTable {
    female: Vec<Vec<String>>,
    male: Vec<Vec<String>>,
}

impl ReferenceTable {
    pub fn new(female: Vec<Vec<String>>, male: Vec<Vec<String>>) -> Self {
        Self { female, male }
    }

    /// Load both sheets from CSV files with a header row.
    pub fn from_csv_paths(female: &Path, male: &Path) -> Result<Self> {
        let female = read_sheet(csv::Reader::from_path(female)?)?;
        let male = read_sheet(csv::Reader::from_path(male)?)?;
        Ok(Self::new(female, male))
    }

    pub fn from_csv_readers<R: Read>(female: R, male: R) -> Result<Self> {
        let female = read_sheet(csv::Reader::from_reader(female))?;
        let male = read_sheet(csv::Reader::from_reader(male))?;
        Ok(Self::new(female, male))
    }

    pub fn sheet(&self, sex: Sex) -> &[Vec<String>] {
        match sex {
            Sex::Female => &self.female,
            Sex::Male => &self.male,
        }
    }
}

fn read_sheet<R: Read>(mut reader: csv::Reader<R>) -> Result<Vec<Vec<String>>> {
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        rows.push(record.iter().map(|field| field.trim().to_string()).collect());
    }
    Ok(rows)
}

/// Reference values followed by acquisition date, name, age, sex, id and
/// accession number.
///
/// Positions are part of the contract with existing consumers; the named
/// accessors read the same positions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct NormalRangeRow {
    values: Vec<String>,
}

impl NormalRangeRow {
    pub fn values(&self) -> &[String] {
        &self.values
    }

    pub fn get(&self, position: usize) -> Option<&str> {
        self.values.get(position).map(String::as_str)
    }

    pub fn band(&self, band: NormalRangeBand) -> &str {
        self.get(band.position()).unwrap_or(NO_NORMAL_RANGE)
    }

    fn identity(&self, offset: usize) -> &str {
        // identity fields are always the trailing six entries
        let index = self.values.len() - IDENTITY_FIELDS + offset;
        &self.values[index]
    }

    pub fn acquisition_date(&self) -> &str {
        self.identity(0)
    }

    pub fn patient_name(&self) -> &str {
        self.identity(1)
    }

    pub fn patient_age(&self) -> &str {
        self.identity(2)
    }

    pub fn patient_sex(&self) -> &str {
        self.identity(3)
    }

    pub fn patient_id(&self) -> &str {
        self.identity(4)
    }

    pub fn accession_number(&self) -> &str {
        self.identity(5)
    }

    pub fn is_established(&self) -> bool {
        self.band(NormalRangeBand::VatVolume) != NO_NORMAL_RANGE
    }
}

/// Integer years from a DICOM age string such as `045Y`.
pub fn parse_age_years(age: &str) -> Result<i64> {
    let trimmed = age.trim();
    let mut chars = trimmed.chars();
    chars.next_back();
    chars.as_str().parse::<i64>().map_err(|_| {
        BodyCompError::MalformedMetadata(format!("cannot read patient age from '{age}'"))
    })
}

fn age_matches(cell: &str, years: i64) -> bool {
    cell.parse::<f64>().map_or(false, |age| age == years as f64)
}

/// Select the reference row for the patient described by `meta`.
///
/// The first row whose age column equals the patient's age wins. Without a
/// match every band is [`NO_NORMAL_RANGE`].
pub fn resolve_normal_range(table: &ReferenceTable, meta: &DicomMetadata) -> Result<NormalRangeRow> {
    let sex = Sex::from_dicom(&meta.patient_sex);
    let years = parse_age_years(&meta.patient_age)?;
    let identity = [
        meta.acquisition_date.clone(),
        meta.patient_name.clone(),
        meta.patient_age.clone(),
        meta.patient_sex.clone(),
        meta.patient_id.clone(),
        meta.accession_number.clone(),
    ];

    let matched = table
        .sheet(sex)
        .iter()
        .find(|row| row.first().map_or(false, |cell| age_matches(cell, years)));

    let values = match matched {
        Some(row) => {
            info!(?sex, years, row = ?row, "normal range found");
            row.iter().cloned().chain(identity).collect()
        }
        None => {
            info!(?sex, years, "no normal range data for this age");
            let mut values = vec![meta.patient_age.clone(), meta.patient_sex.clone()];
            values.extend(std::iter::repeat(NO_NORMAL_RANGE.to_string()).take(BAND_COUNT));
            values.extend(identity);
            values
        }
    };
    debug!(?values, "complete normal range row");

    Ok(NormalRangeRow { values })
}
