use serde::Serialize;
use std::{collections::HashMap, fmt};

use crate::records::HouseholdCounts;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum AffordabilityTier {
    ExtremelyLow,
    VeryLow,
    Low,
    Moderate,
    Middle,
}

/// Tiers in column order, lowest income first.
pub const TIERS: [AffordabilityTier; 5] = [
    AffordabilityTier::ExtremelyLow,
    AffordabilityTier::VeryLow,
    AffordabilityTier::Low,
    AffordabilityTier::Moderate,
    AffordabilityTier::Middle,
];

impl AffordabilityTier {
    pub fn column(&self) -> &'static str {
        match self {
            AffordabilityTier::ExtremelyLow => "Extremely Low Income Units",
            AffordabilityTier::VeryLow => "Very Low Income Units",
            AffordabilityTier::Low => "Low Income Units",
            AffordabilityTier::Moderate => "Moderate Income Units",
            AffordabilityTier::Middle => "Middle Income Units",
        }
    }

    /// Minimum income as a share of AMI. Extremely low income units have no minimum.
    pub fn ami_share(&self) -> f64 {
        match self {
            AffordabilityTier::ExtremelyLow => 0.0,
            AffordabilityTier::VeryLow => 0.31,
            AffordabilityTier::Low => 0.51,
            AffordabilityTier::Moderate => 0.81,
            AffordabilityTier::Middle => 1.20,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModalTier {
    Tier(AffordabilityTier),
    NoAffordableUnits,
}

impl ModalTier {
    pub fn tier(&self) -> Option<AffordabilityTier> {
        match self {
            ModalTier::Tier(t) => Some(*t),
            ModalTier::NoAffordableUnits => None,
        }
    }
}

impl fmt::Display for ModalTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModalTier::Tier(t) => f.write_str(t.column()),
            ModalTier::NoAffordableUnits => f.write_str("no affordable units"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum HouseholdSize {
    Two,
    Three,
    Four,
    Five,
    Six,
    SevenPlus,
    NonFamily,
}

/// Bucket order shared by household counts and income cells.
pub const HOUSEHOLD_SIZES: [HouseholdSize; 7] = [
    HouseholdSize::Two,
    HouseholdSize::Three,
    HouseholdSize::Four,
    HouseholdSize::Five,
    HouseholdSize::Six,
    HouseholdSize::SevenPlus,
    HouseholdSize::NonFamily,
];

impl HouseholdSize {
    pub fn column(&self) -> &'static str {
        match self {
            HouseholdSize::Two => "two_person_hh",
            HouseholdSize::Three => "three_person_hh",
            HouseholdSize::Four => "four_person_hh",
            HouseholdSize::Five => "five_person_hh",
            HouseholdSize::Six => "six_person_hh",
            HouseholdSize::SevenPlus => "sev_person_hh",
            HouseholdSize::NonFamily => "nonfamily_hh",
        }
    }

    /// Position in [`HOUSEHOLD_SIZES`].
    pub fn index(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for HouseholdSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column())
    }
}

/// Sums unit counts per tract key.
pub fn aggregate_units<I>(rows: I) -> HashMap<String, [u32; 5]>
where
    I: IntoIterator<Item = (String, [u32; 5])>,
{
    let mut totals: HashMap<String, [u32; 5]> = HashMap::new();
    for (key, counts) in rows {
        let entry = totals.entry(key).or_insert([0; 5]);
        for (total, c) in entry.iter_mut().zip(counts) {
            *total += c;
        }
    }
    totals
}

/// The tier with the most units. Scanning runs lowest to highest income and
/// the last tier equal to the maximum wins, so ties go to the higher tier.
pub fn modal_tier(counts: &[u32; 5]) -> ModalTier {
    let max = counts.iter().copied().max().unwrap_or(0);
    let mut mode = ModalTier::NoAffordableUnits;
    if max > 0 {
        for (tier, &count) in TIERS.iter().zip(counts) {
            if count == max {
                mode = ModalTier::Tier(*tier);
            }
        }
    }
    mode
}

/// The family size bucket with the most households, over raw counts of
/// 2 to 7+ person families. Non-family households are not candidates.
/// The last bucket equal to the maximum wins.
pub fn modal_household(buckets: &[Option<u32>; 7]) -> Option<HouseholdSize> {
    let family = &buckets[..6];
    let max = family.iter().flatten().copied().max()?;

    let mut mode = None;
    for (size, count) in HOUSEHOLD_SIZES.iter().zip(family) {
        if *count == Some(max) {
            mode = Some(*size);
        }
    }
    mode
}

#[derive(Debug, Clone, PartialEq)]
pub struct HouseholdShares {
    pub key: String,
    /// Shares of total households when `converted`, raw counts otherwise.
    pub values: [f64; 7],
    pub converted: bool,
    pub modal: Option<HouseholdSize>,
}

/// Divides each bucket by the tract total. When the total is missing or zero
/// the raw counts are kept as they are.
pub fn household_shares(counts: &HouseholdCounts) -> HouseholdShares {
    let raw = counts.buckets.map(|c| c.unwrap_or(0) as f64);
    let (values, converted) = match counts.total {
        Some(total) if total > 0 => (raw.map(|c| c / total as f64), true),
        _ => (raw, false),
    };

    HouseholdShares {
        key: counts.key.clone(),
        values,
        converted,
        modal: modal_household(&counts.buckets),
    }
}
