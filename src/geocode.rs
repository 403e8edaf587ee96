use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::error::{Error, Result};

pub const CENSUS_GEOCODER_URL: &str = "https://geocoding.geo.census.gov/geocoder/geographies";
const BENCHMARK: &str = "Public_AR_Current";
const VINTAGE: &str = "Current_Current";

/// Resolves a location to the 6 digit census tract code it falls in.
pub trait Geocoder {
    fn tract_at(&self, longitude: f64, latitude: f64) -> Result<String>;

    fn tract_for_address(&self, address: &str) -> Result<String>;
}

#[derive(Deserialize)]
struct Envelope<T> {
    result: T,
}

#[derive(Deserialize)]
struct CoordinatesResult {
    geographies: Geographies,
}

#[derive(Deserialize)]
struct AddressResult {
    #[serde(rename = "addressMatches", default)]
    address_matches: Vec<AddressMatch>,
}

#[derive(Deserialize)]
struct AddressMatch {
    geographies: Geographies,
}

#[derive(Deserialize)]
struct Geographies {
    #[serde(rename = "Census Tracts", default)]
    census_tracts: Vec<TractGeography>,
}

#[derive(Deserialize)]
struct TractGeography {
    #[serde(rename = "TRACT")]
    tract: String,
}

impl Geographies {
    fn first_tract(self) -> Result<String> {
        self.census_tracts
            .into_iter()
            .next()
            .map(|t| t.tract)
            .ok_or_else(|| Error::Geocode("no census tract in response".to_owned()))
    }
}

pub fn parse_coordinates_response(body: &str) -> Result<String> {
    let envelope: Envelope<CoordinatesResult> = serde_json::from_str(body)?;
    envelope.result.geographies.first_tract()
}

pub fn parse_address_response(body: &str) -> Result<String> {
    let envelope: Envelope<AddressResult> = serde_json::from_str(body)?;
    envelope
        .result
        .address_matches
        .into_iter()
        .next()
        .ok_or_else(|| Error::Geocode("no address match".to_owned()))?
        .geographies
        .first_tract()
}

/// Client for the US Census Bureau geocoder.
pub struct CensusGeocoder {
    client: reqwest::blocking::Client,
    base_url: String,
}

impl CensusGeocoder {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_owned(),
        })
    }

    fn get(&self, endpoint: &str, query: &[(&str, String)]) -> Result<String> {
        let url = format!("{}/{}", self.base_url, endpoint);
        debug!(url = %url, "Querying census geocoder");

        let body = self
            .client
            .get(&url)
            .query(query)
            .query(&[
                ("benchmark", BENCHMARK),
                ("vintage", VINTAGE),
                ("format", "json"),
            ])
            .send()?
            .error_for_status()?
            .text()?;
        Ok(body)
    }
}

impl Geocoder for CensusGeocoder {
    fn tract_at(&self, longitude: f64, latitude: f64) -> Result<String> {
        let body = self.get(
            "coordinates",
            &[("x", longitude.to_string()), ("y", latitude.to_string())],
        )?;
        parse_coordinates_response(&body)
    }

    fn tract_for_address(&self, address: &str) -> Result<String> {
        let body = self.get("onelineaddress", &[("address", address.to_owned())])?;
        parse_address_response(&body)
    }
}

/// Used with `--offline`: every lookup fails, so callers keep their original values.
pub struct Offline;

impl Geocoder for Offline {
    fn tract_at(&self, _longitude: f64, _latitude: f64) -> Result<String> {
        Err(Error::Geocode("geocoder disabled".to_owned()))
    }

    fn tract_for_address(&self, _address: &str) -> Result<String> {
        Err(Error::Geocode("geocoder disabled".to_owned()))
    }
}

/// Answers every lookup with the same tract and counts the calls.
#[cfg(test)]
pub struct FixedGeocoder {
    pub tract: Option<String>,
    pub calls: std::cell::Cell<usize>,
}

#[cfg(test)]
impl FixedGeocoder {
    pub fn new(tract: Option<&str>) -> Self {
        Self {
            tract: tract.map(str::to_owned),
            calls: std::cell::Cell::new(0),
        }
    }

    fn answer(&self) -> Result<String> {
        self.calls.set(self.calls.get() + 1);
        self.tract
            .clone()
            .ok_or_else(|| Error::Geocode("no tract".to_owned()))
    }
}

#[cfg(test)]
impl Geocoder for FixedGeocoder {
    fn tract_at(&self, _longitude: f64, _latitude: f64) -> Result<String> {
        self.answer()
    }

    fn tract_for_address(&self, _address: &str) -> Result<String> {
        self.answer()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coordinates_response_yields_tract() {
        let body = r#"{"result": {"input": {}, "geographies": {
            "Census Tracts": [{"TRACT": "017702", "COUNTY": "005"}],
            "Counties": [{"NAME": "Bronx County"}]
        }}}"#;
        assert_eq!(parse_coordinates_response(body).unwrap(), "017702");
    }

    #[test]
    fn address_response_yields_first_match() {
        let body = r#"{"result": {"addressMatches": [
            {"matchedAddress": "1 MAIN ST", "geographies": {"Census Tracts": [{"TRACT": "000100"}]}},
            {"matchedAddress": "1 MAIN AVE", "geographies": {"Census Tracts": [{"TRACT": "000200"}]}}
        ]}}"#;
        assert_eq!(parse_address_response(body).unwrap(), "000100");
    }

    #[test]
    fn empty_responses_are_errors() {
        let body = r#"{"result": {"geographies": {}}}"#;
        assert!(matches!(parse_coordinates_response(body), Err(Error::Geocode(_))));

        let body = r#"{"result": {"addressMatches": []}}"#;
        assert!(matches!(parse_address_response(body), Err(Error::Geocode(_))));

        assert!(matches!(parse_coordinates_response("<html>"), Err(Error::Json(_))));
    }

    #[test]
    fn offline_never_resolves() {
        assert!(Offline.tract_at(-73.9, 40.8).is_err());
        assert!(Offline.tract_for_address("1 Main St, Bronx, NY").is_err());
    }
}
