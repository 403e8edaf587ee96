//! Gap between tract median incomes and the minimum income an affordable
//! unit requires.
//!
//! 2019 HUD area median incomes for New York City by household size. The
//! 7+ person figure averages the 7 and 8 person levels.

use crate::aggregate::{HouseholdSize, ModalTier, HOUSEHOLD_SIZES};
use crate::records::IncomeCell;

pub const AMI_LEVELS: [f64; 7] = [
    74700.0,  // non-family
    85400.0,  // 2
    96100.0,  // 3
    106700.0, // 4
    115300.0, // 5
    123800.0, // 6
    136650.0, // 7+
];

pub fn ami(size: HouseholdSize) -> f64 {
    match size {
        HouseholdSize::NonFamily => AMI_LEVELS[0],
        HouseholdSize::Two => AMI_LEVELS[1],
        HouseholdSize::Three => AMI_LEVELS[2],
        HouseholdSize::Four => AMI_LEVELS[3],
        HouseholdSize::Five => AMI_LEVELS[4],
        HouseholdSize::Six => AMI_LEVELS[5],
        HouseholdSize::SevenPlus => AMI_LEVELS[6],
    }
}

/// Median income of the modal household size minus the minimum income of
/// the modal tier for that size. For extremely low income units there is no
/// minimum and the gap is the median income itself.
pub fn modal_gap(tier: ModalTier, size: Option<HouseholdSize>, income: &[IncomeCell; 7]) -> Option<f64> {
    let tier = tier.tier()?;
    let size = size?;
    let median = income[size.index()].value();
    Some(median - tier.ami_share() * ami(size))
}

/// Household share weighted sum of the gap for every household size, all at
/// the tract's modal tier. Non-family households come first, as in
/// [`AMI_LEVELS`].
pub fn weighted_gap(tier: ModalTier, income: &[IncomeCell; 7], shares: &[f64; 7]) -> Option<f64> {
    let share = tier.tier()?.ami_share();

    let mut order = vec![HouseholdSize::NonFamily];
    order.extend(HOUSEHOLD_SIZES.iter().take(6).copied());

    let mut total = 0.0;
    for size in order {
        let i = size.index();
        total += (income[i].value() - share * ami(size)) * shares[i];
    }
    Some(total)
}

/// Null gaps count as not positive.
pub fn is_positive(gap: Option<f64>) -> bool {
    gap.map_or(false, |g| g > 0.0)
}
