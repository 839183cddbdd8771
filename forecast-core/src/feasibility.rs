//! Feasibility filter: the per-year working set of parcels open to
//! discretionary allocation.
//!
//! A parcel is feasible in `year` when it still has capacity, its phase year
//! has arrived, it is not part of a scheduled-development site, and its
//! capacity type passes the policy gate. The pool is a projection of the
//! ledger; picking stages shrink it in place as they allocate so later
//! stages of the same year see what is left.

use std::collections::HashMap;

use crate::ledger::{Parcel, ParcelLedger};
use crate::policy::AllocationPolicy;
use crate::types::{CapacityType, GeoId, ParcelKey, Units, Year};

/// A parcel as seen by the picking stages of one year.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub key: ParcelKey,
    pub geo_id: GeoId,
    pub remaining: Units,
    pub partial_build: Units,
}

impl Candidate {
    pub fn from_parcel(parcel: &Parcel) -> Self {
        Self {
            key: parcel.key(),
            geo_id: parcel.geo_id,
            remaining: parcel.remaining_capacity(),
            partial_build: parcel.partial_build,
        }
    }

    pub fn capacity_type(&self) -> CapacityType {
        self.key.capacity_type
    }
}

/// Units handed to one parcel by an allocation stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Allocation {
    pub key: ParcelKey,
    pub geo_id: GeoId,
    pub units: Units,
}

impl Allocation {
    pub fn total(allocations: &[Allocation]) -> Units {
        allocations.iter().map(|a| a.units).sum()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeasiblePool {
    candidates: Vec<Candidate>,
}

impl FeasiblePool {
    pub fn from_candidates(mut candidates: Vec<Candidate>) -> Self {
        candidates.retain(|c| c.remaining > 0);
        candidates.sort_by_key(|c| c.key);
        Self { candidates }
    }

    pub fn candidates(&self) -> &[Candidate] {
        &self.candidates
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn total_remaining(&self) -> Units {
        self.candidates.iter().map(|c| c.remaining).sum()
    }

    /// Candidates at `geo_id`, in key order.
    pub fn in_geo(&self, geo_id: GeoId) -> Vec<Candidate> {
        self.candidates
            .iter()
            .filter(|c| c.geo_id == geo_id)
            .cloned()
            .collect()
    }

    /// Candidates of `capacity_type`, in key order.
    pub fn of_type(&self, capacity_type: CapacityType) -> Vec<Candidate> {
        self.candidates
            .iter()
            .filter(|c| c.capacity_type() == capacity_type)
            .cloned()
            .collect()
    }

    /// Subtract allocated units and drop candidates with nothing left.
    pub fn consume(&mut self, allocations: &[Allocation]) {
        if allocations.is_empty() {
            return;
        }
        let mut taken: HashMap<ParcelKey, Units> = HashMap::with_capacity(allocations.len());
        for a in allocations {
            *taken.entry(a.key).or_insert(0) += a.units;
        }
        for c in &mut self.candidates {
            if let Some(units) = taken.get(&c.key) {
                c.remaining -= units;
            }
        }
        self.candidates.retain(|c| c.remaining > 0);
    }
}

/// Derive the feasible pool for `year`.
pub fn feasible_parcels(
    ledger: &ParcelLedger,
    year: Year,
    policy: &AllocationPolicy,
) -> FeasiblePool {
    let candidates = ledger
        .iter()
        .filter(|p| p.capacity > p.capacity_used)
        .filter(|p| p.phase_yr <= year)
        .filter(|p| !p.is_scheduled())
        .filter(|p| policy.admits(p.capacity_type, year))
        .map(Candidate::from_parcel)
        .collect();

    FeasiblePool::from_candidates(candidates)
}
