use csv::Writer;
use serde::Serialize;
use std::{
    collections::{HashMap, HashSet},
    path::Path,
};
use tracing::{debug, info};

use crate::aggregate::{aggregate_units, household_shares, modal_tier, HouseholdShares, ModalTier};
use crate::boundary::TractShape;
use crate::error::Result;
use crate::geocode::Geocoder;
use crate::impute::impute_income;
use crate::metrics::{is_positive, modal_gap, weighted_gap};
use crate::records::{HouseholdCounts, HousingRecord, IncomeCell, IncomeRow};
use crate::render::{draw_bar_chart, sign_counts, write_choropleth, BarChart, ChoroplethMap, MapValue};
use crate::tract::{borough_of, fill_missing_tract, housing_key, is_canonical, map_id, Borough};

/// One row of the derived table.
#[derive(Debug, Clone)]
pub struct TractGap {
    pub key: String,
    pub borough: Borough,
    pub units: [u32; 5],
    pub households: HouseholdShares,
    pub income: [IncomeCell; 7],
    pub modal_tier: ModalTier,
    pub modal_gap: Option<f64>,
    pub weighted_gap: Option<f64>,
    pub modal_gap_positive: bool,
    pub weighted_gap_positive: bool,
}

impl TractGap {
    pub fn map_id(&self) -> String {
        map_id(&self.key)
    }
}

/// Flat CSV form of [`TractGap`].
#[derive(Debug, Serialize)]
pub struct TractGapRecord {
    census_tract: String,
    boro: String,
    map_id: String,
    #[serde(rename = "Extremely Low Income Units")]
    extremely_low: u32,
    #[serde(rename = "Very Low Income Units")]
    very_low: u32,
    #[serde(rename = "Low Income Units")]
    low: u32,
    #[serde(rename = "Moderate Income Units")]
    moderate: u32,
    #[serde(rename = "Middle Income Units")]
    middle: u32,
    two_person_hh: f64,
    three_person_hh: f64,
    four_person_hh: f64,
    five_person_hh: f64,
    six_person_hh: f64,
    sev_person_hh: f64,
    nonfamily_hh: f64,
    hh_shares: bool,
    med_inc_family_2: String,
    med_inc_family_3: String,
    med_inc_family_4: String,
    med_inc_family_5: String,
    med_inc_family_6: String,
    med_inc_family_7: String,
    med_inc_nonfamily: String,
    mode_unit: String,
    mode_family: Option<String>,
    mode_diff: Option<f64>,
    weighted_avg: Option<f64>,
    mode_diff_zero: bool,
    avg_diff_zero: bool,
}

impl From<&TractGap> for TractGapRecord {
    fn from(t: &TractGap) -> Self {
        let hh = t.households.values;
        let inc: Vec<String> = t.income.iter().map(|c| c.to_string()).collect();
        Self {
            census_tract: t.key.clone(),
            boro: t.borough.prefix().to_owned(),
            map_id: t.map_id(),
            extremely_low: t.units[0],
            very_low: t.units[1],
            low: t.units[2],
            moderate: t.units[3],
            middle: t.units[4],
            two_person_hh: hh[0],
            three_person_hh: hh[1],
            four_person_hh: hh[2],
            five_person_hh: hh[3],
            six_person_hh: hh[4],
            sev_person_hh: hh[5],
            nonfamily_hh: hh[6],
            hh_shares: t.households.converted,
            med_inc_family_2: inc[0].clone(),
            med_inc_family_3: inc[1].clone(),
            med_inc_family_4: inc[2].clone(),
            med_inc_family_5: inc[3].clone(),
            med_inc_family_6: inc[4].clone(),
            med_inc_family_7: inc[5].clone(),
            med_inc_nonfamily: inc[6].clone(),
            mode_unit: t.modal_tier.to_string(),
            mode_family: t.households.modal.map(|m| m.to_string()),
            mode_diff: t.modal_gap,
            weighted_avg: t.weighted_gap,
            mode_diff_zero: t.modal_gap_positive,
            avg_diff_zero: t.weighted_gap_positive,
        }
    }
}

/// Resolves each housing row to a tract key, geocoding blank tracts first.
/// Rows whose key cannot be made canonical are dropped.
pub fn normalise_housing(records: &[HousingRecord], geocoder: &dyn Geocoder) -> Vec<(String, [u32; 5])> {
    let mut rows = Vec::with_capacity(records.len());
    let mut dropped = 0;

    for r in records {
        let coordinates = r.coordinates();
        let raw = fill_missing_tract(&r.census_tract, coordinates, r.one_line_address(), geocoder);
        if raw.trim().is_empty() {
            dropped += 1;
            continue;
        }
        let key = housing_key(&raw, &r.borough, coordinates, geocoder);
        if !is_canonical(&key) {
            debug!(tract = %raw, borough = %r.borough, "Dropping housing row");
            dropped += 1;
            continue;
        }
        rows.push((key, r.unit_counts()));
    }

    info!("Normalised {} housing rows, dropped {}", rows.len(), dropped);
    rows
}

/// Joins housing, income and household data per tract, in income order, and
/// derives both income gaps.
pub fn build_table(
    housing: &[HousingRecord],
    income: &[IncomeRow],
    households: &[HouseholdCounts],
    geocoder: &dyn Geocoder,
) -> Vec<TractGap> {
    let units = aggregate_units(normalise_housing(housing, geocoder));
    let housing_keys: HashSet<String> = units.keys().cloned().collect();

    let shares: HashMap<&str, HouseholdShares> = households
        .iter()
        .map(|h| (h.key.as_str(), household_shares(h)))
        .collect();

    let imputed: HashMap<String, IncomeRow> = impute_income(income, &housing_keys)
        .into_iter()
        .map(|r| (r.key.clone(), r))
        .collect();

    let mut seen = HashSet::new();
    let mut table = Vec::new();
    for row in income {
        if !seen.insert(row.key.as_str()) {
            debug!(tract = %row.key, "Duplicate income tract");
            continue;
        }
        let (Some(counts), Some(hh), Some(inc), Some(borough)) = (
            units.get(&row.key),
            shares.get(row.key.as_str()),
            imputed.get(&row.key),
            borough_of(&row.key),
        ) else {
            continue;
        };

        let tier = modal_tier(counts);
        let modal = modal_gap(tier, hh.modal, &inc.cells);
        let weighted = weighted_gap(tier, &inc.cells, &hh.values);

        table.push(TractGap {
            key: row.key.clone(),
            borough,
            units: *counts,
            households: hh.clone(),
            income: inc.cells.clone(),
            modal_tier: tier,
            modal_gap: modal,
            weighted_gap: weighted,
            modal_gap_positive: is_positive(modal),
            weighted_gap_positive: is_positive(weighted),
        });
    }

    info!("Built table with {} tracts", table.len());
    table
}

pub fn write_table<P: AsRef<Path>>(rows: &[TractGap], path: P) -> Result<()> {
    let mut wtr = Writer::from_path(path.as_ref())?;
    for row in rows {
        wtr.serialize(TractGapRecord::from(row))?;
    }
    wtr.flush()?;
    info!("Wrote {} rows to {}", rows.len(), path.as_ref().display());
    Ok(())
}

const CHART_TITLE: &str = "Minimum Income Requirement vs Median Income by Borough";
const MAP_TITLE: &str = "Difference in Median Income and Minimum Income Requirement";

pub fn render_charts<P: AsRef<Path>>(rows: &[TractGap], out_dir: P) -> Result<()> {
    let out_dir = out_dir.as_ref();
    std::fs::create_dir_all(out_dir)?;

    let charts: [(&str, fn(&TractGap) -> bool); 2] = [
        ("bar_modediff.png", |t: &TractGap| t.modal_gap_positive),
        ("bar_avgdiff.png", |t: &TractGap| t.weighted_gap_positive),
    ];
    for (file, flag) in charts {
        let chart = BarChart {
            title: CHART_TITLE,
            x_label: "Borough",
            y_label: "Number of Tracts",
            legend_title: "Requirement < Median Income",
            groups: sign_counts(rows.iter().map(|t| (t.borough, flag(t)))),
        };
        draw_bar_chart(&chart, out_dir.join(file))?;
    }
    Ok(())
}

pub fn render_maps<P: AsRef<Path>>(rows: &[TractGap], shapes: &[TractShape], out_dir: P) -> Result<()> {
    let out_dir = out_dir.as_ref();
    std::fs::create_dir_all(out_dir)?;

    let maps: [(&str, &str, fn(&TractGap) -> MapValue); 4] = [
        ("heatmap_modediff.html", "Modal Income Gap", |t: &TractGap| MapValue::Gap(t.modal_gap)),
        ("heatmap_avgdiff.html", "Weighted Income Gap", |t: &TractGap| MapValue::Gap(t.weighted_gap)),
        ("heatmap_modediff2.html", "Median Inc > Minimum Inc Requirement", |t: &TractGap| {
            MapValue::Flag(t.modal_gap_positive)
        }),
        ("heatmap_avgdiff2.html", "Median Inc > Minimum Inc Requirement", |t: &TractGap| {
            MapValue::Flag(t.weighted_gap_positive)
        }),
    ];
    for (file, legend, value) in maps {
        let map = ChoroplethMap {
            title: MAP_TITLE,
            legend,
            values: rows.iter().map(|t| (t.map_id(), value(t))).collect(),
        };
        write_choropleth(&map, shapes, out_dir.join(file))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boundary::{fixtures::TWO_TRACTS, tract_shapes};
    use crate::geocode::{FixedGeocoder, Offline};
    use crate::records::{
        fixtures::{FAMILY_HEADER, HOUSING_HEADER, INCOME_HEADER},
        read_households, read_housing, read_income,
    };

    fn fixture() -> (Vec<HousingRecord>, Vec<IncomeRow>, Vec<HouseholdCounts>) {
        let housing = format!(
            "{}{}{}",
            HOUSING_HEADER,
            "1,Bronx,17702,100,Grand Concourse,40.84,-73.91,0,0,0,4,1\n",
            "2,Manhattan,100,5,Broadway,40.70,-74.00,0,0,0,0,9\n",
        );
        let income = format!(
            "{}{}{}{}",
            INCOME_HEADER,
            "id,Geographic Area Name,a,b,c,d,e,f,g\n",
            "1400000US36005017702,\"Census Tract 177.02, Bronx County, New York\",90000,95000,-,100000,110000,120000,40000\n",
            "1400000US36061010000,\"Census Tract 100, New York County, New York\",30000,30000,30000,30000,30000,30000,30000\n",
        );
        let family = format!(
            "{}{}{}",
            FAMILY_HEADER,
            "1400000US36005017702,\"Census Tract 177.02, Bronx County, New York\",100,40,10,10,10,5,5,20\n",
            "1400000US36061010000,\"Census Tract 100, New York County, New York\",50,10,10,10,10,0,0,10\n",
        );
        (
            read_housing(housing.as_bytes()).unwrap(),
            read_income(income.as_bytes()).unwrap(),
            read_households(family.as_bytes()).unwrap(),
        )
    }

    #[test]
    fn end_to_end_table() {
        let (housing, income, households) = fixture();
        let table = build_table(&housing, &income, &households, &Offline);
        assert_eq!(table.len(), 2);

        let bronx = &table[0];
        assert_eq!(bronx.key, "BX0177.02");
        assert_eq!(bronx.map_id(), "2017702");
        assert_eq!(bronx.modal_tier.to_string(), "Moderate Income Units");
        assert!((bronx.modal_gap.unwrap() - 20826.0).abs() < 1e-6);
        assert!(bronx.weighted_gap.is_some());
        assert!(bronx.modal_gap_positive);
        // The suppressed 4 person cell has no neighbour and reads as the ceiling.
        assert!(bronx.income[2].is_suppressed());

        let manhattan = &table[1];
        assert_eq!(manhattan.key, "M0100.00");
        assert_eq!(manhattan.borough, Borough::Manhattan);
        assert!(manhattan.modal_gap.unwrap() < 0.0);
        assert!(manhattan.weighted_gap.unwrap() < 0.0);
        assert!(!manhattan.modal_gap_positive);
        assert!(!manhattan.weighted_gap_positive);
    }

    #[test]
    fn tracts_without_housing_are_left_out() {
        let (mut housing, income, households) = fixture();
        housing.truncate(1);
        let table = build_table(&housing, &income, &households, &Offline);
        assert_eq!(table.len(), 1);
        assert_eq!(table[0].key, "BX0177.02");
    }

    #[test]
    fn tracts_without_affordable_units_keep_null_gaps() {
        let (mut housing, income, households) = fixture();
        housing[1].middle = Some(0);
        let table = build_table(&housing, &income, &households, &Offline);
        assert_eq!(table.len(), 2);
        assert_eq!(table[1].modal_tier, ModalTier::NoAffordableUnits);
        assert_eq!(table[1].modal_gap, None);
        assert_eq!(table[1].weighted_gap, None);
        assert!(!table[1].modal_gap_positive);
    }

    #[test]
    fn blank_tracts_are_geocoded_or_dropped() {
        let mut blank = HousingRecord {
            borough: "Queens".into(),
            census_tract: "".into(),
            latitude: Some(40.7),
            longitude: Some(-73.8),
            middle: Some(3),
            ..Default::default()
        };
        let found = FixedGeocoder::new(Some("077100"));
        let rows = normalise_housing(std::slice::from_ref(&blank), &found);
        assert_eq!(rows, vec![("Q0771.00".to_owned(), [0, 0, 0, 0, 3])]);
        assert_eq!(found.calls.get(), 1);

        blank.census_tract = "Not Found".into();
        assert!(normalise_housing(&[blank], &Offline).is_empty());
    }

    #[test]
    fn table_and_outputs_are_written() {
        let (housing, income, households) = fixture();
        let table = build_table(&housing, &income, &households, &Offline);
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("graphs");

        write_table(&table, dir.path().join("tract_gaps.csv")).unwrap();
        let csv = std::fs::read_to_string(dir.path().join("tract_gaps.csv")).unwrap();
        let mut lines = csv.lines();
        assert!(lines.next().unwrap().starts_with("census_tract,boro,map_id,Extremely Low Income Units"));
        assert!(lines.next().unwrap().starts_with("BX0177.02,BX,2017702,0,0,0,4,1"));

        render_charts(&table, &out).unwrap();
        let fc: geojson::FeatureCollection = TWO_TRACTS.parse().unwrap();
        render_maps(&table, &tract_shapes(&fc), &out).unwrap();
        for file in [
            "bar_modediff.png",
            "bar_avgdiff.png",
            "heatmap_modediff.html",
            "heatmap_avgdiff.html",
            "heatmap_modediff2.html",
            "heatmap_avgdiff2.html",
        ] {
            assert!(out.join(file).exists(), "{}", file);
        }

        let map = std::fs::read_to_string(out.join("heatmap_modediff.html")).unwrap();
        assert!(map.contains("<title>Census Tract 2017702: 20826</title>"));
    }
}
