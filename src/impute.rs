use std::collections::{HashMap, HashSet};

use tracing::{debug, info};

use crate::records::{IncomeCell, IncomeRow};
use crate::tract::{borough_of, tract_number, Borough};

/// Neighbours this far apart in tract number are never used.
pub const MAX_NEIGHBOUR_DISTANCE: f64 = 999.99;

/// Income rows split by borough, each with its numeric tract code.
pub struct BoroughGroups<'a> {
    groups: HashMap<Borough, Vec<(f64, &'a IncomeRow)>>,
}

impl<'a> BoroughGroups<'a> {
    /// Rows without a canonical key belong to no group.
    pub fn new(rows: &'a [IncomeRow]) -> Self {
        let mut groups: HashMap<Borough, Vec<(f64, &'a IncomeRow)>> = HashMap::new();
        for row in rows {
            if let (Some(borough), Some(number)) = (borough_of(&row.key), tract_number(&row.key)) {
                groups.entry(borough).or_default().push((number, row));
            }
        }
        Self { groups }
    }

    pub fn get(&self, borough: Borough) -> &[(f64, &'a IncomeRow)] {
        self.groups.get(&borough).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Finds the nearest and second nearest tracts in `group` that report a
/// value for `bucket`. Ties keep the tract seen first.
pub fn nearest_pair<'a>(
    group: &[(f64, &'a IncomeRow)],
    key: &str,
    number: f64,
    bucket: usize,
) -> (Option<&'a IncomeRow>, Option<&'a IncomeRow>) {
    let mut nearest: Option<(f64, &'a IncomeRow)> = None;
    let mut second: Option<(f64, &'a IncomeRow)> = None;

    for &(candidate_number, candidate) in group {
        if candidate.key == key || candidate.cells[bucket].is_suppressed() {
            continue;
        }
        let diff = (candidate_number - number).abs();
        if diff >= MAX_NEIGHBOUR_DISTANCE {
            continue;
        }

        match nearest {
            Some((d, _)) if diff >= d => {
                if second.map_or(true, |(d2, _)| diff < d2) {
                    second = Some((diff, candidate));
                }
            }
            _ => {
                second = nearest;
                nearest = Some((diff, candidate));
            }
        }
    }

    (nearest.map(|n| n.1), second.map(|s| s.1))
}

/// Fills each suppressed cell of `row` from its nearest neighbours in the
/// same borough. Each bucket picks its own neighbours. A cell with no
/// usable neighbour stays suppressed.
pub fn impute_row(row: &IncomeRow, groups: &BoroughGroups) -> IncomeRow {
    let mut out = row.clone();

    let (Some(borough), Some(number)) = (borough_of(&row.key), tract_number(&row.key)) else {
        return out;
    };
    let group = groups.get(borough);

    for (bucket, cell) in out.cells.iter_mut().enumerate() {
        if !cell.is_suppressed() {
            continue;
        }
        match nearest_pair(group, &row.key, number, bucket) {
            (Some(a), Some(b)) => {
                *cell = IncomeCell::Imputed((a.cells[bucket].cleaned() + b.cells[bucket].cleaned()) / 2.0);
            }
            (Some(a), None) => {
                *cell = IncomeCell::Imputed(a.cells[bucket].cleaned());
            }
            _ => debug!(tract = %row.key, bucket, "No neighbour to impute from"),
        }
    }

    out
}

/// Imputes the income rows whose tract has housing data. Other rows are
/// left out, but still serve as neighbours.
pub fn impute_income(rows: &[IncomeRow], housing_keys: &HashSet<String>) -> Vec<IncomeRow> {
    let groups = BoroughGroups::new(rows);

    let imputed: Vec<IncomeRow> = rows
        .iter()
        .filter(|r| housing_keys.contains(&r.key))
        .map(|r| impute_row(r, &groups))
        .collect();

    let filled = imputed
        .iter()
        .flat_map(|r| r.cells.iter())
        .filter(|c| matches!(c, IncomeCell::Imputed(_)))
        .count();
    info!("Imputed {} income cells across {} tracts", filled, imputed.len());

    imputed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(key: &str, cells: [&str; 7]) -> IncomeRow {
        IncomeRow {
            key: key.to_owned(),
            cells: cells.map(|c| IncomeCell::Reported(c.to_owned())),
        }
    }

    const FULL: [&str; 7] = ["1", "1", "1", "1", "1", "1", "1"];

    fn with(bucket: usize, value: &str) -> [&str; 7] {
        let mut cells = FULL;
        cells[bucket] = value;
        cells
    }

    #[test]
    fn averages_two_nearest() {
        let rows = vec![
            row("BX0010.00", with(0, "-")),
            row("BX0012.00", with(0, "70000")),
            row("BX0011.00", with(0, "50000")),
        ];
        let groups = BoroughGroups::new(&rows);
        let out = impute_row(&rows[0], &groups);
        assert_eq!(out.cells[0], IncomeCell::Imputed(60000.0));
        assert_eq!(out.cells[1], IncomeCell::Reported("1".into()));
    }

    #[test]
    fn nearer_candidate_demotes_previous_nearest() {
        let rows = vec![
            row("Q0100.00", with(2, "-")),
            row("Q0150.00", with(2, "10000")),
            row("Q0120.00", with(2, "20000")),
            row("Q0101.00", with(2, "30000")),
        ];
        let groups = BoroughGroups::new(&rows);
        let (a, b) = nearest_pair(groups.get(Borough::Queens), "Q0100.00", 100.0, 2);
        assert_eq!(a.unwrap().key, "Q0101.00");
        assert_eq!(b.unwrap().key, "Q0120.00");
        assert_eq!(impute_row(&rows[0], &groups).cells[2], IncomeCell::Imputed(25000.0));
    }

    #[test]
    fn no_neighbour_leaves_cell_missing() {
        let rows = vec![
            row("SI0001.00", with(4, "-")),
            row("SI0002.00", with(4, "-")),
            row("BK0001.00", with(4, "90000")),
        ];
        let groups = BoroughGroups::new(&rows);
        let out = impute_row(&rows[0], &groups);
        assert_eq!(out.cells[4], IncomeCell::Reported("-".into()));
        assert!(out.cells[4].is_suppressed());
    }

    #[test]
    fn single_neighbour_is_used_directly() {
        let rows = vec![
            row("M0001.00", with(6, "-")),
            row("M0003.00", with(6, "250,000+")),
        ];
        let groups = BoroughGroups::new(&rows);
        assert_eq!(impute_row(&rows[0], &groups).cells[6], IncomeCell::Imputed(250000.0));
    }

    #[test]
    fn buckets_choose_neighbours_independently() {
        let mut target = FULL;
        target[0] = "-";
        target[1] = "-";
        let mut near = FULL;
        near[0] = "40000";
        near[1] = "-";
        let mut far = FULL;
        far[0] = "-";
        far[1] = "80000";
        let rows = vec![
            row("BK0100.00", target),
            row("BK0101.00", near),
            row("BK0105.00", far),
        ];
        let groups = BoroughGroups::new(&rows);
        let out = impute_row(&rows[0], &groups);
        assert_eq!(out.cells[0], IncomeCell::Imputed(40000.0));
        assert_eq!(out.cells[1], IncomeCell::Imputed(80000.0));
    }

    #[test]
    fn distant_tracts_are_ignored() {
        let rows = vec![
            row("Q0001.00", with(0, "-")),
            row("Q1500.00", with(0, "50000")),
        ];
        let groups = BoroughGroups::new(&rows);
        assert!(impute_row(&rows[0], &groups).cells[0].is_suppressed());
    }

    #[test]
    fn only_housing_tracts_are_imputed() {
        let rows = vec![
            row("BX0010.00", with(0, "-")),
            row("BX0011.00", with(0, "50000")),
            row("BX0099.00", with(0, "-")),
        ];
        let housing: HashSet<String> = ["BX0010.00".to_owned()].into_iter().collect();
        let out = impute_income(&rows, &housing);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].key, "BX0010.00");
        assert_eq!(out[0].cells[0], IncomeCell::Imputed(50000.0));
    }
}
