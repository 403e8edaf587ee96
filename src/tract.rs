use std::{fmt, sync::OnceLock};

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::geocode::Geocoder;

/// Marker the housing dataset uses for tracts it could not place.
pub const NOT_FOUND: &str = "Not Found";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Borough {
    Manhattan,
    Bronx,
    Brooklyn,
    Queens,
    StatenIsland,
}

pub const BOROUGHS: [Borough; 5] = [
    Borough::Manhattan,
    Borough::Bronx,
    Borough::Brooklyn,
    Borough::Queens,
    Borough::StatenIsland,
];

impl Borough {
    pub fn prefix(&self) -> &'static str {
        match self {
            Borough::Manhattan => "M",
            Borough::Bronx => "BX",
            Borough::Brooklyn => "BK",
            Borough::Queens => "Q",
            Borough::StatenIsland => "SI",
        }
    }

    /// Borough digit used by the city's `boro_ct2010` tract identifiers.
    pub fn map_code(&self) -> char {
        match self {
            Borough::Manhattan => '1',
            Borough::Bronx => '2',
            Borough::Brooklyn => '3',
            Borough::Queens => '4',
            Borough::StatenIsland => '5',
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Borough::Manhattan => "Manhattan",
            Borough::Bronx => "Bronx",
            Borough::Brooklyn => "Brooklyn",
            Borough::Queens => "Queens",
            Borough::StatenIsland => "Staten Island",
        }
    }

    pub fn from_prefix(prefix: &str) -> Option<Borough> {
        BOROUGHS.into_iter().find(|b| b.prefix() == prefix)
    }

    /// Borough names as written in the housing dataset's `Borough` column.
    pub fn from_housing_name(name: &str) -> Option<Borough> {
        match name.trim().to_uppercase().as_str() {
            "MANHATTAN" => Some(Borough::Manhattan),
            "BRONX" => Some(Borough::Bronx),
            "BROOKLYN" => Some(Borough::Brooklyn),
            "QUEENS" => Some(Borough::Queens),
            "STATEN ISLAND" => Some(Borough::StatenIsland),
            _ => None,
        }
    }

    /// County names as written in census geography strings.
    pub fn from_county(county: &str) -> Option<Borough> {
        match county.trim().to_uppercase().as_str() {
            "NEW YORK COUNTY" => Some(Borough::Manhattan),
            "BRONX COUNTY" => Some(Borough::Bronx),
            "KINGS COUNTY" => Some(Borough::Brooklyn),
            "QUEENS COUNTY" => Some(Borough::Queens),
            "RICHMOND COUNTY" => Some(Borough::StatenIsland),
            _ => None,
        }
    }
}

impl fmt::Display for Borough {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

fn key_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^(M|BX|BK|Q|SI)(\d{4}\.\d{2})$").expect("tract key pattern"))
}

pub fn is_canonical(key: &str) -> bool {
    key_pattern().is_match(key)
}

pub fn borough_of(key: &str) -> Option<Borough> {
    key_pattern()
        .captures(key)
        .and_then(|c| Borough::from_prefix(&c[1]))
}

/// Numeric part of a key, e.g. `BX0177.02` is 177.02.
pub fn tract_number(key: &str) -> Option<f64> {
    key_pattern()
        .captures(key)
        .and_then(|c| c[2].parse::<f64>().ok())
}

/// Converts a key to the identifier used by the tract boundary GeoJSON,
/// e.g. `BX0177.02` becomes `2017702`. Non canonical keys only lose their dot.
pub fn map_id(key: &str) -> String {
    match key_pattern().captures(key) {
        Some(c) => {
            let code = Borough::from_prefix(&c[1]).map(|b| b.map_code()).unwrap_or('0');
            format!("{}{}", code, c[2].replace('.', ""))
        }
        None => key.replace('.', ""),
    }
}

/// Builds a key from a census row. `geo_id` looks like `1400000US36005017702`
/// and `name` like `Census Tract 177.02, Bronx County, New York`.
/// Returns `geo_id` unchanged when the county is not one of the five boroughs.
pub fn census_key(geo_id: &str, name: &str) -> String {
    let borough = name.split(',').nth(1).and_then(Borough::from_county);
    match (borough, geo_id.get(14..18), geo_id.get(18..)) {
        (Some(b), Some(tract), Some(suffix)) => format!("{}{}.{}", b.prefix(), tract, suffix),
        _ => geo_id.to_owned(),
    }
}

/// Fills a blank or "Not Found" housing tract code from the geocoder.
/// Coordinates are preferred; the one line address is only used without them.
/// Anything shorter than 5 characters is rejected and the raw value kept.
pub fn fill_missing_tract(
    raw: &str,
    coordinates: Option<(f64, f64)>,
    address: Option<String>,
    geocoder: &dyn Geocoder,
) -> String {
    let trimmed = raw.trim();
    if !(trimmed.is_empty() || trimmed == NOT_FOUND) {
        return raw.to_owned();
    }

    let lookup = match (coordinates, address) {
        (Some((lon, lat)), _) => geocoder.tract_at(lon, lat),
        (None, Some(address)) => geocoder.tract_for_address(&address),
        (None, None) => return raw.to_owned(),
    };

    match lookup {
        Ok(tract) if tract.len() >= 5 => tract,
        Ok(tract) => {
            debug!(tract = %tract, "Geocoded tract too short, keeping original");
            raw.to_owned()
        }
        Err(e) => {
            debug!(error = %e, "Could not geocode missing tract");
            raw.to_owned()
        }
    }
}

fn split_six(code: &str) -> String {
    format!("{}.{}", &code[..4], &code[4..])
}

/// Normalises a housing dataset tract code, which is usually written without
/// its decimal point (tract 177.02 appears as `17702`).
///
/// Three and four digit codes are ambiguous: `1702` may be tract 1702 or
/// tract 17.02. Tracts with a suffix only ever look like a zero followed by
/// a non zero digit, so only that shape is sent to the geocoder.
///
/// The original value comes back when the borough is unknown, the code is
/// not numeric or the geocoder cannot help.
pub fn housing_key(
    raw: &str,
    borough: &str,
    coordinates: Option<(f64, f64)>,
    geocoder: &dyn Geocoder,
) -> String {
    let tract = raw.trim();
    if is_canonical(tract) {
        return tract.to_owned();
    }

    let Some(borough) = Borough::from_housing_name(borough) else {
        return raw.to_owned();
    };

    let resolve = || -> Option<String> {
        let (lon, lat) = coordinates?;
        match geocoder.tract_at(lon, lat) {
            Ok(code) if code.len() == 6 && code.bytes().all(|b| b.is_ascii_digit()) => {
                Some(split_six(&code))
            }
            Ok(code) => {
                debug!(code = %code, "Unexpected tract code from geocoder");
                None
            }
            Err(e) => {
                debug!(error = %e, "Could not geocode sub-tract");
                None
            }
        }
    };

    let num = if tract.bytes().all(|b| b.is_ascii_digit()) {
        let d = tract.as_bytes();
        match d.len() {
            1 => Some(format!("000{}.00", tract)),
            2 => Some(format!("00{}.00", tract)),
            3 if d[1] != b'0' || d[2] == b'0' => Some(format!("0{}.00", tract)),
            4 if d[2] != b'0' || d[3] == b'0' => Some(format!("{}.00", tract)),
            3 | 4 => resolve(),
            5 => Some(split_six(&format!("0{}", tract))),
            6 => Some(split_six(tract)),
            _ => None,
        }
    } else {
        match tract.split_once('.') {
            Some((whole, part))
                if (1..=4).contains(&whole.len())
                    && (1..=2).contains(&part.len())
                    && whole.bytes().chain(part.bytes()).all(|b| b.is_ascii_digit()) =>
            {
                Some(format!("{:0>4}.{:0<2}", whole, part))
            }
            _ => None,
        }
    };

    match num {
        Some(num) => format!("{}{}", borough.prefix(), num),
        None => raw.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geocode::{FixedGeocoder, Offline};

    const COORDS: Option<(f64, f64)> = Some((-73.91, 40.82));

    #[test]
    fn census_keys() {
        assert_eq!(
            census_key("1400000US36005017702", "Census Tract 177.02, Bronx County, New York"),
            "BX0177.02"
        );
        assert_eq!(
            census_key("1400000US36061000100", "Census Tract 1, New York County, New York"),
            "M0001.00"
        );
        assert_eq!(
            census_key("1400000US36085020700", "Census Tract 207, Richmond County, New York"),
            "SI0207.00"
        );
        assert_eq!(
            census_key("1400000US36001000100", "Census Tract 1, Albany County, New York"),
            "1400000US36001000100"
        );
        assert_eq!(census_key("id", "Geographic Area Name"), "id");
    }

    #[test]
    fn housing_keys_by_length() {
        let g = Offline;
        assert_eq!(housing_key("7", "Bronx", None, &g), "BX0007.00");
        assert_eq!(housing_key("77", "Queens", None, &g), "Q0077.00");
        assert_eq!(housing_key("177", "Brooklyn", None, &g), "BK0177.00");
        assert_eq!(housing_key("100", "Manhattan", None, &g), "M0100.00");
        assert_eq!(housing_key("1770", "STATEN ISLAND", None, &g), "SI1770.00");
        assert_eq!(housing_key("1800", "bronx", None, &g), "BX1800.00");
        assert_eq!(housing_key("17702", "Bronx", None, &g), "BX0177.02");
        assert_eq!(housing_key("117702", "Bronx", None, &g), "BX1177.02");
    }

    #[test]
    fn sub_tract_shapes_use_the_geocoder() {
        let g = FixedGeocoder::new(Some("001702"));
        assert_eq!(housing_key("1702", "Bronx", COORDS, &g), "BX0017.02");
        assert_eq!(housing_key("702", "Bronx", COORDS, &g), "BX0017.02");
        assert_eq!(g.calls.get(), 2);

        // Not the sub-tract shape, so no lookup.
        assert_eq!(housing_key("1720", "Bronx", COORDS, &g), "BX1720.00");
        assert_eq!(g.calls.get(), 2);
    }

    #[test]
    fn failed_lookups_keep_the_raw_value() {
        let g = FixedGeocoder::new(None);
        assert_eq!(housing_key("1702", "Bronx", COORDS, &g), "1702");
        assert_eq!(housing_key("1702", "Bronx", None, &g), "1702");
        assert_eq!(g.calls.get(), 1);
    }

    #[test]
    fn unparsable_codes_and_boroughs_pass_through() {
        let g = Offline;
        assert_eq!(housing_key("Not Found", "Bronx", None, &g), "Not Found");
        assert_eq!(housing_key("17702", "Yonkers", None, &g), "17702");
        assert_eq!(housing_key("1234567", "Bronx", None, &g), "1234567");
        assert_eq!(housing_key("", "Bronx", None, &g), "");
    }

    #[test]
    fn decimal_codes_are_padded() {
        assert_eq!(housing_key("177.02", "Bronx", None, &Offline), "BX0177.02");
        assert_eq!(housing_key("9.5", "Queens", None, &Offline), "Q0009.50");
    }

    #[test]
    fn normalising_is_idempotent() {
        let g = Offline;
        for (raw, boro) in [("17702", "Bronx"), ("7", "Queens"), ("1800", "Manhattan")] {
            let once = housing_key(raw, boro, None, &g);
            assert!(is_canonical(&once), "{} is not canonical", once);
            assert_eq!(housing_key(&once, boro, None, &g), once);
        }
    }

    #[test]
    fn canonical_pattern() {
        assert!(is_canonical("BX0177.02"));
        assert!(is_canonical("SI0001.00"));
        assert!(!is_canonical("X0177.02"));
        assert!(!is_canonical("BX177.02"));
        assert!(!is_canonical("BX0177.2"));
        assert!(!is_canonical("BX"));
    }

    #[test]
    fn key_parts() {
        assert_eq!(borough_of("BK0012.00"), Some(Borough::Brooklyn));
        assert_eq!(borough_of("Q1234.56"), Some(Borough::Queens));
        assert_eq!(borough_of("17702"), None);
        assert_eq!(tract_number("BX0177.02"), Some(177.02));
        assert_eq!(tract_number("nope"), None);
    }

    #[test]
    fn map_ids() {
        assert_eq!(map_id("M0001.00"), "1000100");
        assert_eq!(map_id("BX0177.02"), "2017702");
        assert_eq!(map_id("BK1234.00"), "3123400");
        assert_eq!(map_id("Q0077.00"), "4007700");
        assert_eq!(map_id("SI0207.00"), "5020700");
        assert_eq!(map_id("177.02"), "17702");
    }

    #[test]
    fn missing_tracts_are_geocoded() {
        let g = FixedGeocoder::new(Some("017702"));
        assert_eq!(fill_missing_tract("", COORDS, None, &g), "017702");
        assert_eq!(fill_missing_tract("Not Found", None, Some("1 Main St, Bronx, NY".into()), &g), "017702");
        assert_eq!(fill_missing_tract("17702", COORDS, None, &g), "17702");
        assert_eq!(g.calls.get(), 2);

        assert_eq!(fill_missing_tract("", None, None, &g), "");

        let short = FixedGeocoder::new(Some("77"));
        assert_eq!(fill_missing_tract("Not Found", COORDS, None, &short), "Not Found");

        let failing = FixedGeocoder::new(None);
        assert_eq!(fill_missing_tract("", COORDS, None, &failing), "");
    }
}
