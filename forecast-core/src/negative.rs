//! Negative-capacity correction.
//!
//! Some parcels arrive with negative capacity (data artifacts). They are
//! zeroed out gradually over a fixed horizon independently of demand: each
//! year fixes `ceil(unflagged / years_left)` randomly chosen parcels plus
//! every parcel explicitly flagged for the year.

use std::collections::HashMap;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::feasibility::Allocation;
use crate::ledger::ParcelLedger;
use crate::policy::AllocationPolicy;
use crate::types::{ParcelKey, Units, Year};

/// A negative-capacity parcel pinned to a correction year.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NegativeFlag {
    pub key: ParcelKey,
    pub year: Year,
}

/// Years left in the correction horizon, counting `year` itself.
fn years_left(year: Year, horizon: Year) -> usize {
    if year > horizon {
        1
    } else {
        (horizon - year + 1) as usize
    }
}

/// Zero out this year's share of negative-capacity parcels.
///
/// Returned allocations carry the (negative) capacity as their units; the
/// ledger capacity of each chosen parcel is set to zero.
pub fn reduce_negative_capacity<R: Rng + ?Sized>(
    ledger: &mut ParcelLedger,
    flags: &[NegativeFlag],
    year: Year,
    policy: &AllocationPolicy,
    rng: &mut R,
) -> Vec<Allocation> {
    let flagged: HashMap<ParcelKey, Year> = flags.iter().map(|f| (f.key, f.year)).collect();

    let mut due: Vec<ParcelKey> = Vec::new();
    let mut unflagged: Vec<ParcelKey> = Vec::new();
    for parcel in ledger.iter().filter(|p| p.capacity < 0) {
        match flagged.get(&parcel.key()) {
            Some(&flag_year) if flag_year <= year => due.push(parcel.key()),
            Some(_) => {}
            None => unflagged.push(parcel.key()),
        }
    }
    if due.is_empty() && unflagged.is_empty() {
        return Vec::new();
    }

    let draw = unflagged
        .len()
        .div_ceil(years_left(year, policy.negative_capacity_horizon));
    let mut chosen = due;
    for idx in rand::seq::index::sample(rng, unflagged.len(), draw) {
        chosen.push(unflagged[idx]);
    }

    let mut allocations = Vec::with_capacity(chosen.len());
    for key in chosen {
        let Some(parcel) = ledger.get_mut(&key) else {
            continue;
        };
        let units: Units = parcel.capacity;
        parcel.capacity = 0;
        parcel.capacity_used = 0;
        allocations.push(Allocation {
            key,
            geo_id: parcel.geo_id,
            units,
        });
    }

    allocations
}
