use csv::ReaderBuilder;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{fmt, fs::File, io::Read, path::Path};
use tracing::{info, warn};

use crate::error::Result;
use crate::tract::census_key;

/// Value substituted for income cells that cannot be read as a number.
/// ACS top-codes medians as "250,000+", so this is also the real ceiling.
pub const INCOME_CEILING: f64 = 250_000.0;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HousingRecord {
    #[serde(rename = "Borough", default)]
    pub borough: String,
    #[serde(rename = "Census Tract", default)]
    pub census_tract: String,
    #[serde(rename = "Number", default)]
    pub number: Option<String>,
    #[serde(rename = "Street", default)]
    pub street: Option<String>,
    #[serde(rename = "Latitude", default)]
    pub latitude: Option<f64>,
    #[serde(rename = "Longitude", default)]
    pub longitude: Option<f64>,
    #[serde(rename = "Extremely Low Income Units", default)]
    pub extremely_low: Option<u32>,
    #[serde(rename = "Very Low Income Units", default)]
    pub very_low: Option<u32>,
    #[serde(rename = "Low Income Units", default)]
    pub low: Option<u32>,
    #[serde(rename = "Moderate Income Units", default)]
    pub moderate: Option<u32>,
    #[serde(rename = "Middle Income Units", default)]
    pub middle: Option<u32>,
}

impl HousingRecord {
    /// Blank counts are treated as zero units.
    pub fn unit_counts(&self) -> [u32; 5] {
        [
            self.extremely_low.unwrap_or(0),
            self.very_low.unwrap_or(0),
            self.low.unwrap_or(0),
            self.moderate.unwrap_or(0),
            self.middle.unwrap_or(0),
        ]
    }

    /// (longitude, latitude)
    pub fn coordinates(&self) -> Option<(f64, f64)> {
        match (self.longitude, self.latitude) {
            (Some(lon), Some(lat)) if lon.is_finite() && lat.is_finite() => Some((lon, lat)),
            _ => None,
        }
    }

    /// The geocoder knows Manhattan as "New York".
    pub fn one_line_address(&self) -> Option<String> {
        let number = self.number.as_deref().map(str::trim).filter(|s| !s.is_empty())?;
        let street = self.street.as_deref().map(str::trim).filter(|s| !s.is_empty())?;
        let mut boro = self.borough.trim();
        if boro.to_uppercase().contains("MANHATTAN") {
            boro = "New York";
        }
        Some(format!("{} {}, {}, NY", number, street, boro))
    }
}

/// ACS S1903 median income by family size.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncomeRecord {
    #[serde(rename = "GEO_ID")]
    pub geo_id: String,
    #[serde(rename = "NAME")]
    pub name: String,
    #[serde(rename = "S1903_C03_024E")]
    pub family_2: String,
    #[serde(rename = "S1903_C03_025E")]
    pub family_3: String,
    #[serde(rename = "S1903_C03_026E")]
    pub family_4: String,
    #[serde(rename = "S1903_C03_027E")]
    pub family_5: String,
    #[serde(rename = "S1903_C03_028E")]
    pub family_6: String,
    #[serde(rename = "S1903_C03_029E")]
    pub family_7: String,
    #[serde(rename = "S1903_C03_034E")]
    pub nonfamily: String,
}

/// ACS B11016 household type by household size.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FamilyRecord {
    #[serde(rename = "GEO_ID")]
    pub geo_id: String,
    #[serde(rename = "NAME")]
    pub name: String,
    #[serde(rename = "B11016_001E")]
    pub total: String,
    #[serde(rename = "B11016_003E")]
    pub two: String,
    #[serde(rename = "B11016_004E")]
    pub three: String,
    #[serde(rename = "B11016_005E")]
    pub four: String,
    #[serde(rename = "B11016_006E")]
    pub five: String,
    #[serde(rename = "B11016_007E")]
    pub six: String,
    #[serde(rename = "B11016_008E")]
    pub seven_plus: String,
    #[serde(rename = "B11016_009E")]
    pub nonfamily: String,
}

/// A median income cell, either as published or filled in from neighbours.
#[derive(Debug, Clone, PartialEq)]
pub enum IncomeCell {
    Reported(String),
    Imputed(f64),
}

impl IncomeCell {
    /// ACS writes suppressed estimates as "-" and bottom-coded ones as "2,500-".
    pub fn is_suppressed(&self) -> bool {
        matches!(self, IncomeCell::Reported(s) if s.contains('-'))
    }

    /// Strips thousands separators and the top-code plus sign before parsing.
    pub fn cleaned(&self) -> f64 {
        match self {
            IncomeCell::Reported(s) => s
                .replace(',', "")
                .replace('+', "")
                .trim()
                .parse::<f64>()
                .unwrap_or(INCOME_CEILING),
            IncomeCell::Imputed(v) => *v,
        }
    }

    /// Reads the cell as published, without cleaning.
    pub fn value(&self) -> f64 {
        match self {
            IncomeCell::Reported(s) => s.trim().parse::<f64>().unwrap_or(INCOME_CEILING),
            IncomeCell::Imputed(v) => *v,
        }
    }
}

impl fmt::Display for IncomeCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IncomeCell::Reported(s) => f.write_str(s),
            IncomeCell::Imputed(v) => write!(f, "{}", v),
        }
    }
}

/// Income cells in household size order: 2, 3, 4, 5, 6, 7+ person families, non-family.
#[derive(Debug, Clone, PartialEq)]
pub struct IncomeRow {
    pub key: String,
    pub cells: [IncomeCell; 7],
}

impl From<IncomeRecord> for IncomeRow {
    fn from(r: IncomeRecord) -> Self {
        Self {
            key: census_key(&r.geo_id, &r.name),
            cells: [
                r.family_2,
                r.family_3,
                r.family_4,
                r.family_5,
                r.family_6,
                r.family_7,
                r.nonfamily,
            ]
            .map(IncomeCell::Reported),
        }
    }
}

/// Household counts, same bucket order as [`IncomeRow`].
#[derive(Debug, Clone, PartialEq)]
pub struct HouseholdCounts {
    pub key: String,
    pub total: Option<u32>,
    pub buckets: [Option<u32>; 7],
}

fn parse_count(s: &str) -> Option<u32> {
    s.trim().parse::<u32>().ok()
}

impl From<FamilyRecord> for HouseholdCounts {
    fn from(r: FamilyRecord) -> Self {
        Self {
            key: census_key(&r.geo_id, &r.name),
            total: parse_count(&r.total),
            buckets: [
                &r.two,
                &r.three,
                &r.four,
                &r.five,
                &r.six,
                &r.seven_plus,
                &r.nonfamily,
            ]
            .map(|s| parse_count(s)),
        }
    }
}

/// Deserializes every row, logging and skipping the ones that do not fit `S`.
fn read_rows<R: Read, S: DeserializeOwned>(reader: R) -> Result<Vec<S>> {
    let mut rdr = ReaderBuilder::new().flexible(true).from_reader(reader);
    rdr.headers()?;

    let mut rows = Vec::new();
    let mut failed = 0;
    for result in rdr.deserialize::<S>() {
        match result {
            Ok(record) => rows.push(record),
            Err(e) => {
                warn!("Skipping row: {}", e);
                failed += 1;
            }
        }
    }
    if failed > 0 {
        warn!("{} rows could not be read", failed);
    }
    Ok(rows)
}

/// Census exports carry a second header row of descriptive labels.
fn is_label_row(name: &str) -> bool {
    name.contains("Geographic")
}

pub fn read_housing<R: Read>(reader: R) -> Result<Vec<HousingRecord>> {
    read_rows(reader)
}

pub fn read_income<R: Read>(reader: R) -> Result<Vec<IncomeRow>> {
    Ok(read_rows::<R, IncomeRecord>(reader)?
        .into_iter()
        .filter(|r| !is_label_row(&r.name))
        .map(IncomeRow::from)
        .collect())
}

pub fn read_households<R: Read>(reader: R) -> Result<Vec<HouseholdCounts>> {
    Ok(read_rows::<R, FamilyRecord>(reader)?
        .into_iter()
        .filter(|r| !is_label_row(&r.name))
        .map(HouseholdCounts::from)
        .collect())
}

pub fn load_housing<P: AsRef<Path>>(path: P) -> Result<Vec<HousingRecord>> {
    let rows = read_housing(File::open(path.as_ref())?)?;
    info!("Loaded {} housing rows from {}", rows.len(), path.as_ref().display());
    Ok(rows)
}

pub fn load_income<P: AsRef<Path>>(path: P) -> Result<Vec<IncomeRow>> {
    let rows = read_income(File::open(path.as_ref())?)?;
    info!("Loaded {} income tracts from {}", rows.len(), path.as_ref().display());
    Ok(rows)
}

pub fn load_households<P: AsRef<Path>>(path: P) -> Result<Vec<HouseholdCounts>> {
    let rows = read_households(File::open(path.as_ref())?)?;
    info!("Loaded {} household tracts from {}", rows.len(), path.as_ref().display());
    Ok(rows)
}

#[cfg(test)]
pub mod fixtures {
    pub const INCOME_HEADER: &str = "GEO_ID,NAME,S1903_C03_024E,S1903_C03_025E,S1903_C03_026E,S1903_C03_027E,S1903_C03_028E,S1903_C03_029E,S1903_C03_034E\n";
    pub const FAMILY_HEADER: &str = "GEO_ID,NAME,B11016_001E,B11016_003E,B11016_004E,B11016_005E,B11016_006E,B11016_007E,B11016_008E,B11016_009E\n";
    pub const HOUSING_HEADER: &str = "Project ID,Borough,Census Tract,Number,Street,Latitude,Longitude,Extremely Low Income Units,Very Low Income Units,Low Income Units,Moderate Income Units,Middle Income Units\n";
}
