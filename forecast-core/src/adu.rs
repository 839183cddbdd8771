//! Accessory-dwelling-unit quotas.
//!
//! A per-year, per-geo fraction of total demand is reserved for ADUs. Each
//! geo's quota is filled by sampling that many distinct ADU parcels from the
//! feasible pool; every sampled parcel gets exactly one unit.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::feasibility::{Allocation, FeasiblePool};
use crate::types::{CapacityType, GeoId, Units, Year};

/// Fraction of a year's demand to be drawn from one geo's ADU parcels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AduShare {
    pub year: Year,
    pub geo_id: GeoId,
    pub allocation: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AduQuota {
    pub geo_id: GeoId,
    pub units: Units,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AduOutcome {
    pub allocations: Vec<Allocation>,
    pub shortfall: Units,
}

/// Round each geo's share of `demand` to whole units.
pub fn adu_quotas(year: Year, demand: Units, shares: &[AduShare]) -> Vec<AduQuota> {
    let mut quotas: Vec<AduQuota> = shares
        .iter()
        .filter(|s| s.year == year)
        .map(|s| AduQuota {
            geo_id: s.geo_id,
            units: ((s.allocation * demand as f64).round() as Units).max(0),
        })
        .collect();
    quotas.sort_by_key(|q| q.geo_id);
    quotas
}

/// Fill each quota with one unit per sampled ADU parcel.
pub fn allocate_adu<R: Rng + ?Sized>(
    pool: &FeasiblePool,
    quotas: &[AduQuota],
    year: Year,
    rng: &mut R,
) -> AduOutcome {
    let adu_parcels = pool.of_type(CapacityType::Adu);
    let mut outcome = AduOutcome::default();

    for quota in quotas.iter().filter(|q| q.units > 0) {
        let local: Vec<_> = adu_parcels
            .iter()
            .filter(|c| c.geo_id == quota.geo_id)
            .collect();
        let wanted = quota.units as usize;
        let amount = wanted.min(local.len());

        if amount < wanted {
            tracing::warn!(
                target: "shortfall",
                year = year,
                geo_id = i64::from(quota.geo_id.0),
                stage = "adu",
                requested = quota.units,
                allocated = amount as i64,
                "not enough ADU parcels to meet quota"
            );
            outcome.shortfall += (wanted - amount) as Units;
        }

        for idx in rand::seq::index::sample(rng, local.len(), amount) {
            let c = local[idx];
            outcome.allocations.push(Allocation {
                key: c.key,
                geo_id: c.geo_id,
                units: 1,
            });
        }
    }

    outcome
}
