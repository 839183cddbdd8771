//! Stochastic parcel picker.
//!
//! Given a pool of candidates for one geography (or the whole region) and a
//! unit target, decide which parcels absorb how many units this year:
//!
//! 1. If the pool cannot cover the target, every candidate is built out and
//!    the gap is reported as a shortfall.
//! 2. Otherwise the pool is shuffled and stratified into tiers:
//!    parcels already mid-build, then untouched `jur` parcels, then every
//!    other non-ADU parcel, then ADU parcels (region scope only).
//! 3. Each parcel contributes at most its policy annual cap, unless the capped
//!    pool is short of the target, in which case caps are lifted.
//! 4. Units are dealt out one slot at a time in tier order until the target
//!    is met.

use std::collections::HashMap;

use rand::Rng;
use rand::seq::SliceRandom;

use crate::feasibility::{Allocation, Candidate};
use crate::policy::AllocationPolicy;
use crate::types::{CapacityType, GeoId, Units, Year};

/// Which pass the picker is serving.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PickScope {
    /// A jurisdiction / sub-area pass. ADU parcels are never picked here.
    Geography(GeoId),
    /// The region-wide residual pass. ADU parcels are picked last.
    Region,
}

impl PickScope {
    fn admits(&self, candidate: &Candidate) -> bool {
        match self {
            PickScope::Geography(_) => candidate.capacity_type() != CapacityType::Adu,
            PickScope::Region => true,
        }
    }

    fn geo_label(&self) -> i64 {
        match self {
            PickScope::Geography(geo) => i64::from(geo.0),
            PickScope::Region => -1,
        }
    }

    fn stage(&self) -> &'static str {
        match self {
            PickScope::Geography(_) => "geography",
            PickScope::Region => "region",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PickOutcome {
    pub allocations: Vec<Allocation>,
    /// Units of the target left unmet.
    pub shortfall: Units,
}

impl PickOutcome {
    pub fn allocated(&self) -> Units {
        Allocation::total(&self.allocations)
    }
}

/// Priority tier of a candidate; lower is picked first.
fn tier(candidate: &Candidate) -> u8 {
    match candidate.capacity_type() {
        CapacityType::Adu => 3,
        _ if candidate.partial_build > 0 => 0,
        CapacityType::Jur => 1,
        _ => 2,
    }
}

/// Select parcels to absorb `target` units.
pub fn pick_parcels<R: Rng + ?Sized>(
    pool: &[Candidate],
    target: Units,
    scope: PickScope,
    year: Year,
    policy: &AllocationPolicy,
    rng: &mut R,
) -> PickOutcome {
    if target <= 0 {
        return PickOutcome::default();
    }

    let mut eligible: Vec<&Candidate> = pool
        .iter()
        .filter(|c| scope.admits(c) && c.remaining > 0)
        .collect();
    let available: Units = eligible.iter().map(|c| c.remaining).sum();

    if available < target {
        tracing::warn!(
            target: "shortfall",
            year = year,
            geo_id = scope.geo_label(),
            stage = scope.stage(),
            requested = target,
            allocated = available,
            "not enough capacity to meet target"
        );
        let allocations = eligible
            .iter()
            .map(|c| Allocation {
                key: c.key,
                geo_id: c.geo_id,
                units: c.remaining,
            })
            .collect();
        return PickOutcome {
            allocations,
            shortfall: target - available,
        };
    }

    eligible.shuffle(rng);
    // Stable sort keeps shuffle order within each tier.
    eligible.sort_by_key(|c| tier(c));

    let mut caps: Vec<Units> = eligible
        .iter()
        .map(|c| policy.annual_cap(c.remaining))
        .collect();
    if caps.iter().sum::<Units>() < target {
        caps = eligible.iter().map(|c| c.remaining).collect();
    }

    let slots = caps
        .iter()
        .enumerate()
        .flat_map(|(idx, &cap)| std::iter::repeat_n(idx, cap.max(0) as usize))
        .take(target as usize);
    let mut units_by_idx: HashMap<usize, Units> = HashMap::new();
    for idx in slots {
        *units_by_idx.entry(idx).or_insert(0) += 1;
    }

    let allocations = eligible
        .iter()
        .enumerate()
        .filter_map(|(idx, c)| {
            units_by_idx.get(&idx).map(|&units| Allocation {
                key: c.key,
                geo_id: c.geo_id,
                units,
            })
        })
        .collect();

    PickOutcome {
        allocations,
        shortfall: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ParcelId, ParcelKey};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    const GEO: GeoId = GeoId(1);

    fn candidate(id: i64, capacity_type: CapacityType, remaining: Units) -> Candidate {
        Candidate {
            key: ParcelKey::new(ParcelId::new(id), capacity_type),
            geo_id: GEO,
            remaining,
            partial_build: 0,
        }
    }

    fn units_for(outcome: &PickOutcome, id: i64) -> Units {
        outcome
            .allocations
            .iter()
            .filter(|a| a.key.parcel_id == ParcelId::new(id))
            .map(|a| a.units)
            .sum()
    }

    #[test]
    fn zero_target_picks_nothing() {
        let pool = vec![candidate(1, CapacityType::Jur, 10)];
        let mut rng = StdRng::seed_from_u64(1);
        let outcome = pick_parcels(
            &pool,
            0,
            PickScope::Region,
            2020,
            &AllocationPolicy::default(),
            &mut rng,
        );
        assert!(outcome.allocations.is_empty());
        assert_eq!(outcome.shortfall, 0);
    }

    #[test]
    fn short_pool_is_built_out() {
        let pool = vec![
            candidate(1, CapacityType::Jur, 20),
            candidate(2, CapacityType::Jur, 30),
        ];
        let mut rng = StdRng::seed_from_u64(1);
        let outcome = pick_parcels(
            &pool,
            100,
            PickScope::Geography(GEO),
            2020,
            &AllocationPolicy::default(),
            &mut rng,
        );
        assert_eq!(outcome.allocated(), 50);
        assert_eq!(outcome.shortfall, 50);
        assert_eq!(units_for(&outcome, 1), 20);
        assert_eq!(units_for(&outcome, 2), 30);
    }

    #[test]
    fn short_pool_ignores_annual_cap() {
        let pool = vec![candidate(1, CapacityType::Jur, 900)];
        let mut rng = StdRng::seed_from_u64(3);
        let outcome = pick_parcels(
            &pool,
            1_000,
            PickScope::Region,
            2020,
            &AllocationPolicy::default(),
            &mut rng,
        );
        assert_eq!(units_for(&outcome, 1), 900);
    }

    #[test]
    fn geography_scope_never_picks_adu() {
        let pool = vec![
            candidate(1, CapacityType::Adu, 1),
            candidate(2, CapacityType::Adu, 1),
            candidate(3, CapacityType::Jur, 1),
        ];
        let mut rng = StdRng::seed_from_u64(9);
        let outcome = pick_parcels(
            &pool,
            2,
            PickScope::Geography(GEO),
            2020,
            &AllocationPolicy::default(),
            &mut rng,
        );
        assert_eq!(outcome.allocated(), 1);
        assert_eq!(outcome.shortfall, 1);
        assert!(
            outcome
                .allocations
                .iter()
                .all(|a| a.key.capacity_type != CapacityType::Adu)
        );
    }

    #[test]
    fn adu_is_last_in_region_scope() {
        let mut pool: Vec<Candidate> = (1..=20)
            .map(|id| candidate(id, CapacityType::Adu, 1))
            .collect();
        pool.push(candidate(100, CapacityType::NoCap, 5));
        let mut rng = StdRng::seed_from_u64(11);
        let outcome = pick_parcels(
            &pool,
            7,
            PickScope::Region,
            2040,
            &AllocationPolicy::default(),
            &mut rng,
        );
        assert_eq!(units_for(&outcome, 100), 5);
        assert_eq!(outcome.allocated(), 7);
    }

    #[test]
    fn mid_build_parcels_come_before_untouched_jur() {
        let mut pool: Vec<Candidate> = (1..=30)
            .map(|id| candidate(id, CapacityType::Jur, 10))
            .collect();
        let mut mid_build = candidate(99, CapacityType::NoCap, 10);
        mid_build.partial_build = 4;
        pool.push(mid_build);

        for seed in 0..10 {
            let mut rng = StdRng::seed_from_u64(seed);
            let outcome = pick_parcels(
                &pool,
                10,
                PickScope::Region,
                2040,
                &AllocationPolicy::default(),
                &mut rng,
            );
            assert_eq!(units_for(&outcome, 99), 10, "seed {seed}");
        }
    }

    #[test]
    fn annual_cap_limits_a_single_parcel() {
        let pool = vec![
            candidate(1, CapacityType::Jur, 300),
            candidate(2, CapacityType::Jur, 300),
        ];
        let mut rng = StdRng::seed_from_u64(5);
        let outcome = pick_parcels(
            &pool,
            400,
            PickScope::Geography(GEO),
            2020,
            &AllocationPolicy::default(),
            &mut rng,
        );
        assert_eq!(outcome.allocated(), 400);
        assert!(units_for(&outcome, 1) <= 250);
        assert!(units_for(&outcome, 2) <= 250);
    }

    #[test]
    fn large_projects_use_higher_cap() {
        let pool = vec![
            candidate(1, CapacityType::Jur, 1_200),
            candidate(2, CapacityType::Jur, 1_200),
        ];
        let mut rng = StdRng::seed_from_u64(5);
        let outcome = pick_parcels(
            &pool,
            1_000,
            PickScope::Geography(GEO),
            2020,
            &AllocationPolicy::default(),
            &mut rng,
        );
        assert_eq!(units_for(&outcome, 1), 500);
        assert_eq!(units_for(&outcome, 2), 500);
    }

    #[test]
    fn caps_are_lifted_when_capped_pool_is_short() {
        let pool = vec![
            candidate(1, CapacityType::Jur, 300),
            candidate(2, CapacityType::Jur, 100),
        ];
        let mut rng = StdRng::seed_from_u64(5);
        let outcome = pick_parcels(
            &pool,
            380,
            PickScope::Geography(GEO),
            2020,
            &AllocationPolicy::default(),
            &mut rng,
        );
        assert_eq!(outcome.allocated(), 380);
        assert_eq!(outcome.shortfall, 0);
        assert!(units_for(&outcome, 1) >= 280);
    }

    #[test]
    fn same_seed_same_picks() {
        let pool: Vec<Candidate> = (1..=50)
            .map(|id| candidate(id, CapacityType::Jur, 3))
            .collect();
        let policy = AllocationPolicy::default();
        let a = pick_parcels(
            &pool,
            40,
            PickScope::Region,
            2020,
            &policy,
            &mut StdRng::seed_from_u64(50),
        );
        let b = pick_parcels(
            &pool,
            40,
            PickScope::Region,
            2020,
            &policy,
            &mut StdRng::seed_from_u64(50),
        );
        assert_eq!(a, b);
    }
}
