// Parcel ledger: the in-memory table mutated once per simulated year

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::policy::DEFAULT_PHASE_YEAR;
use crate::types::{CapacityType, GeoId, ParcelId, ParcelKey, SiteId, Units, Year};

// === PARCEL ===

/// One row per parcel × capacity type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parcel {
    pub parcel_id: ParcelId,
    pub capacity_type: CapacityType,
    /// Maximum units buildable under this capacity type.
    pub capacity: Units,
    /// Units already realized. `0 <= capacity_used <= capacity` for non-negative capacity.
    pub capacity_used: Units,
    /// Built unit count: base year plus every build to date.
    pub residential_units: Units,
    /// Units added in the previous allocation round; next round's priority signal.
    pub partial_build: Units,
    /// Earliest year eligible for discretionary allocation.
    pub phase_yr: Year,
    /// Set only for scheduled-development parcels.
    pub site_id: Option<SiteId>,
    /// Jurisdiction or sub-area allocation key.
    pub geo_id: GeoId,
    /// Base-year land-use code.
    pub land_use: u32,
    /// Simulated land-use code, set once the updater has seen the parcel.
    pub land_use_sim: Option<u32>,
}

impl Parcel {
    /// Unbuilt parcel phased in from [`DEFAULT_PHASE_YEAR`]. Scenario loading
    /// replaces a missing phase year with the policy's `default_phase_year`.
    pub fn new(
        parcel_id: ParcelId,
        capacity_type: CapacityType,
        capacity: Units,
        geo_id: GeoId,
    ) -> Self {
        Self {
            parcel_id,
            capacity_type,
            capacity,
            capacity_used: 0,
            residential_units: 0,
            partial_build: 0,
            phase_yr: DEFAULT_PHASE_YEAR,
            site_id: None,
            geo_id,
            land_use: 0,
            land_use_sim: None,
        }
    }

    pub fn with_phase_year(mut self, phase_yr: Year) -> Self {
        self.phase_yr = phase_yr;
        self
    }

    pub fn with_site(mut self, site_id: SiteId) -> Self {
        self.site_id = Some(site_id);
        self
    }

    pub fn with_capacity_used(mut self, capacity_used: Units) -> Self {
        self.capacity_used = capacity_used;
        self
    }

    pub fn with_residential_units(mut self, residential_units: Units) -> Self {
        self.residential_units = residential_units;
        self
    }

    pub fn with_partial_build(mut self, partial_build: Units) -> Self {
        self.partial_build = partial_build;
        self
    }

    pub fn with_land_use(mut self, land_use: u32) -> Self {
        self.land_use = land_use;
        self
    }

    pub fn key(&self) -> ParcelKey {
        ParcelKey::new(self.parcel_id, self.capacity_type)
    }

    pub fn remaining_capacity(&self) -> Units {
        self.capacity - self.capacity_used
    }

    pub fn is_scheduled(&self) -> bool {
        self.site_id.is_some()
    }
}

// === LEDGER ===

/// All parcels, ordered by `(parcel_id, capacity_type)`.
///
/// Ordered storage keeps every derived pool in the same order across runs,
/// which the seeded shuffles rely on for reproducibility.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParcelLedger {
    parcels: BTreeMap<ParcelKey, Parcel>,
}

impl ParcelLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a parcel, returning the row it replaced if the key already existed.
    pub fn insert(&mut self, parcel: Parcel) -> Option<Parcel> {
        self.parcels.insert(parcel.key(), parcel)
    }

    pub fn get(&self, key: &ParcelKey) -> Option<&Parcel> {
        self.parcels.get(key)
    }

    pub fn get_mut(&mut self, key: &ParcelKey) -> Option<&mut Parcel> {
        self.parcels.get_mut(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Parcel> {
        self.parcels.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Parcel> {
        self.parcels.values_mut()
    }

    pub fn len(&self) -> usize {
        self.parcels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parcels.is_empty()
    }

    /// Parcels that belong to a scheduled-development site.
    pub fn scheduled(&self) -> impl Iterator<Item = &Parcel> {
        self.parcels.values().filter(|p| p.is_scheduled())
    }

    /// Remaining capacity summed over parcels with non-negative remaining capacity.
    pub fn total_remaining(&self) -> Units {
        self.parcels
            .values()
            .map(|p| p.remaining_capacity().max(0))
            .sum()
    }

    pub fn total_residential_units(&self) -> Units {
        self.parcels.values().map(|p| p.residential_units).sum()
    }

    /// Emit one `parcel_state` event per parcel.
    #[cfg(feature = "instrument")]
    pub fn record_snapshot(&self, year: Year) {
        for p in self.parcels.values() {
            tracing::info!(
                target: "parcel_state",
                year = year,
                parcel_id = p.parcel_id.0,
                capacity_type = p.capacity_type.as_str(),
                geo_id = p.geo_id.0,
                capacity = p.capacity,
                capacity_used = p.capacity_used,
                residential_units = p.residential_units,
                partial_build = p.partial_build,
                land_use_sim = p.land_use_sim.unwrap_or(p.land_use),
            );
        }
    }
}

impl FromIterator<Parcel> for ParcelLedger {
    fn from_iter<I: IntoIterator<Item = Parcel>>(iter: I) -> Self {
        let mut ledger = ParcelLedger::new();
        for parcel in iter {
            ledger.insert(parcel);
        }
        ledger
    }
}
