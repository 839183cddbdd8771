//! Yearly state update: fold a year's builds back into the parcel ledger.

use std::collections::HashMap;

use crate::forecast::BuildRecord;
use crate::ledger::ParcelLedger;
use crate::policy::AllocationPolicy;
use crate::types::{ParcelKey, Source, Units};

#[derive(Debug, Clone, Copy, Default)]
struct YearDelta {
    built: Units,
    corrected: Units,
}

/// Apply one year's build records to the ledger.
///
/// - `capacity_used` and `residential_units` grow by the units built
/// - correction records only adjust `residential_units`; the reducer
///   already zeroed their capacity
/// - parcels built this year switch to the developed land-use code
/// - `partial_build` becomes this year's units built (zero when untouched)
pub fn apply_year<'a>(
    ledger: &mut ParcelLedger,
    records: impl IntoIterator<Item = &'a BuildRecord>,
    policy: &AllocationPolicy,
) {
    let mut deltas: HashMap<ParcelKey, YearDelta> = HashMap::new();
    for r in records {
        let delta = deltas.entry(r.key()).or_default();
        match r.source {
            Source::NegativeCorrection => delta.corrected += r.units_added,
            _ => delta.built += r.units_added,
        }
    }

    for parcel in ledger.iter_mut() {
        let delta = deltas.get(&parcel.key()).copied().unwrap_or_default();

        parcel.capacity_used += delta.built;
        parcel.residential_units += delta.built + delta.corrected;
        parcel.land_use_sim = if delta.built > 0 {
            Some(policy.developed_land_use)
        } else {
            parcel.land_use_sim.or(Some(parcel.land_use))
        };
        parcel.partial_build = delta.built.max(0);

        debug_assert!(
            parcel.capacity < 0 || parcel.capacity_used <= parcel.capacity,
            "parcel {:?} over-built: used {} of {}",
            parcel.key(),
            parcel.capacity_used,
            parcel.capacity
        );
    }
}
