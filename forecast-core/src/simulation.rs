// Simulation driver: runs the allocation stages for each year in order

use std::collections::BTreeMap;
use std::ops::RangeInclusive;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::adu::{AduShare, adu_quotas, allocate_adu};
use crate::apportion::{ControlTarget, check_year_controls, distribute_targets};
use crate::error::AllocationError;
use crate::feasibility::{Allocation, feasible_parcels};
use crate::forecast::{HousingUnitForecast, RunSummary, YearSummary};
use crate::ledger::ParcelLedger;
use crate::negative::{NegativeFlag, reduce_negative_capacity};
use crate::picker::{PickScope, pick_parcels};
use crate::policy::AllocationPolicy;
use crate::scheduled::{ScheduledSites, allocate_scheduled};
use crate::types::{Source, Units, Year};
use crate::update::apply_year;

pub const DEFAULT_SEED: u64 = 50;

/// Year-indexed input tables the engine reads but never mutates.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ControlTables {
    pub controls: Vec<ControlTarget>,
    pub adu_shares: Vec<AduShare>,
    /// Total new housing-unit demand per year.
    pub demand: BTreeMap<Year, Units>,
    pub negative_flags: Vec<NegativeFlag>,
}

/// Owns the mutable run state and the single random stream.
#[derive(Debug, Clone)]
pub struct Simulation<R: Rng = StdRng> {
    pub ledger: ParcelLedger,
    pub sites: ScheduledSites,
    pub forecast: HousingUnitForecast,
    pub summary: RunSummary,
    pub tables: ControlTables,
    pub policy: AllocationPolicy,
    rng: R,
}

impl Simulation<StdRng> {
    pub fn new(
        ledger: ParcelLedger,
        sites: ScheduledSites,
        tables: ControlTables,
        policy: AllocationPolicy,
        seed: u64,
    ) -> Self {
        Self::with_rng(ledger, sites, tables, policy, StdRng::seed_from_u64(seed))
    }
}

impl<R: Rng> Simulation<R> {
    pub fn with_rng(
        ledger: ParcelLedger,
        sites: ScheduledSites,
        tables: ControlTables,
        policy: AllocationPolicy,
        rng: R,
    ) -> Self {
        Self {
            ledger,
            sites,
            forecast: HousingUnitForecast::new(),
            summary: RunSummary::default(),
            tables,
            policy,
            rng,
        }
    }

    /// Run every year in `years`, stopping at the first fatal error.
    pub fn run(&mut self, years: RangeInclusive<Year>) -> Result<&[YearSummary], AllocationError> {
        let first = self.summary.years().len();
        for year in years {
            self.run_year(year)?;
        }
        Ok(&self.summary.years()[first..])
    }

    /// Run one simulated year.
    ///
    /// Stage order (and so random-stream order):
    /// 1. Feasible pool from last year's ledger
    /// 2. Scheduled development, net of the ADU quota
    /// 3. ADU quotas
    /// 4. Apportion remaining demand and pick per geography
    /// 5. Region-wide residual pick
    /// 6. Negative-capacity correction
    /// 7. Fold the year's builds into the ledger
    ///
    /// Stages 2 to 5 are staged locally and committed together, so a fatal
    /// control error leaves the ledger, sites, forecast and summary untouched.
    pub fn run_year(&mut self, year: Year) -> Result<YearSummary, AllocationError> {
        check_year_controls(year, &self.tables.controls, &self.policy)?;

        let demand = match self.tables.demand.get(&year) {
            Some(&units) => units.max(0),
            None => {
                tracing::warn!(
                    target: "shortfall",
                    year = year,
                    geo_id = -1i64,
                    stage = "demand",
                    requested = 0i64,
                    allocated = 0i64,
                    "no demand row for year"
                );
                0
            }
        };
        let mut summary = YearSummary {
            year,
            demand,
            ..YearSummary::default()
        };

        // 1. FEASIBILITY
        let mut pool = feasible_parcels(&self.ledger, year, &self.policy);

        // 2. SCHEDULED DEVELOPMENT
        let quotas = adu_quotas(year, demand, &self.tables.adu_shares);
        let adu_quota: Units = quotas.iter().map(|q| q.units).sum();
        let scheduled_demand = (demand - adu_quota).max(0);
        let scheduled = allocate_scheduled(&self.ledger, &self.sites, scheduled_demand);
        let scheduled_units = Allocation::total(&scheduled);

        let mut adu: Vec<Allocation> = Vec::new();
        let mut regional: Vec<Allocation> = Vec::new();
        let mut residual: Vec<Allocation> = Vec::new();

        if pool.is_empty() {
            tracing::warn!(
                target: "shortfall",
                year = year,
                geo_id = -1i64,
                stage = "feasibility",
                requested = demand - scheduled_units,
                allocated = 0i64,
                "no feasible parcels, skipping discretionary allocation"
            );
        } else {
            // 3. ADU
            adu = allocate_adu(&pool, &quotas, year, &mut self.rng).allocations;
            pool.consume(&adu);

            // 4. REGIONAL TARGETS
            let remaining = (demand - scheduled_units - Allocation::total(&adu)).max(0);
            let targets =
                distribute_targets(year, remaining, &self.tables.controls, &self.policy)?;
            for t in targets.iter().filter(|t| t.target > 0) {
                let outcome = pick_parcels(
                    &pool.in_geo(t.geo_id),
                    t.target,
                    PickScope::Geography(t.geo_id),
                    year,
                    &self.policy,
                    &mut self.rng,
                );
                pool.consume(&outcome.allocations);
                regional.extend(outcome.allocations);
            }

            // 5. RESIDUAL
            let residual_target = remaining - Allocation::total(&regional);
            if residual_target > 0 {
                let outcome = pick_parcels(
                    pool.candidates(),
                    residual_target,
                    PickScope::Region,
                    year,
                    &self.policy,
                    &mut self.rng,
                );
                pool.consume(&outcome.allocations);
                residual = outcome.allocations;
            }
        }

        // Commit.
        self.sites.record_builds(&self.ledger, &scheduled);
        summary.scheduled = self.forecast.append(year, Source::Scheduled, &scheduled);
        summary.adu = self.forecast.append(year, Source::Adu, &adu);
        summary.regional = self.forecast.append(year, Source::RegionalTarget, &regional);
        summary.residual = self.forecast.append(year, Source::Residual, &residual);

        // 6. NEGATIVE CAPACITY
        let corrections = reduce_negative_capacity(
            &mut self.ledger,
            &self.tables.negative_flags,
            year,
            &self.policy,
            &mut self.rng,
        );
        summary.correction = self
            .forecast
            .append(year, Source::NegativeCorrection, &corrections);

        // 7. STATE UPDATE
        apply_year(
            &mut self.ledger,
            self.forecast.records_for_year(year),
            &self.policy,
        );

        summary.shortfall = (demand - summary.built()).max(0);

        #[cfg(feature = "instrument")]
        summary.record();

        self.summary.push(summary.clone());
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::Parcel;
    use crate::scheduled::ScheduledSite;
    use crate::types::{CapacityType, GeoId, ParcelId, SiteId};

    fn control(year: Year, geo: u32, control: f64) -> ControlTarget {
        ControlTarget {
            year,
            geo_id: GeoId::new(geo),
            control,
            max_units: None,
        }
    }

    fn simulation(demand: Units) -> Simulation {
        let mut parcels: Vec<Parcel> = (1..=20)
            .map(|id| {
                Parcel::new(
                    ParcelId::new(id),
                    CapacityType::Jur,
                    40,
                    GeoId::new(if id <= 10 { 1 } else { 2 }),
                )
            })
            .collect();
        parcels.push(
            Parcel::new(ParcelId::new(100), CapacityType::Sch, 30, GeoId::new(1))
                .with_site(SiteId::new(1)),
        );
        let sites: ScheduledSites = vec![ScheduledSite::new(SiteId::new(1), 30, Some(2018), None)]
            .into_iter()
            .collect();

        let tables = ControlTables {
            controls: vec![control(2020, 1, 0.4), control(2020, 2, 0.6)],
            demand: [(2020, demand)].into_iter().collect(),
            ..ControlTables::default()
        };
        Simulation::new(
            parcels.into_iter().collect(),
            sites,
            tables,
            AllocationPolicy::default(),
            DEFAULT_SEED,
        )
    }

    #[test]
    fn year_meets_demand_in_stage_order() {
        let mut sim = simulation(130);
        let summary = sim.run_year(2020).unwrap();

        assert_eq!(summary.scheduled, 30);
        // 100 left: 40 to geo 1, 60 to geo 2.
        assert_eq!(summary.regional, 100);
        assert_eq!(summary.residual, 0);
        assert_eq!(summary.shortfall, 0);
        assert_eq!(summary.built(), 130);

        let geo1: Units = sim
            .forecast
            .records_for_year(2020)
            .filter(|r| r.source == Source::RegionalTarget && r.geo_id == GeoId::new(1))
            .map(|r| r.units_added)
            .sum();
        assert_eq!(geo1, 40);
        assert_eq!(sim.ledger.total_residential_units(), 130);
    }

    #[test]
    fn missing_demand_row_builds_nothing() {
        let mut sim = simulation(130);
        let summary = sim.run_year(2021).unwrap();
        assert_eq!(summary.demand, 0);
        assert_eq!(summary.built(), 0);
        assert!(sim.forecast.is_empty());
    }

    #[test]
    fn bad_controls_abort_the_year() {
        let mut sim = simulation(130);
        sim.tables.controls = vec![control(2020, 1, 0.4), control(2020, 2, 0.4)];
        let err = sim.run_year(2020).unwrap_err();
        assert!(matches!(err, AllocationError::ControlSum { year: 2020, .. }));
    }

    #[test]
    fn aborted_year_leaves_state_untouched() {
        let mut sim = simulation(40);
        sim.tables.controls = vec![control(2020, 1, 0.25), control(2020, 2, 0.25)];
        let ledger = sim.ledger.clone();

        let err = sim.run_year(2020).unwrap_err();
        assert!(matches!(err, AllocationError::ControlSum { year: 2020, .. }));
        assert_eq!(sim.forecast.len(), 0);
        assert_eq!(sim.sites.get(SiteId::new(1)).unwrap().capacity_used, 0);
        assert_eq!(sim.ledger, ledger);
        assert!(sim.summary.years().is_empty());

        // Fixing the controls replays the year from the same state.
        sim.tables.controls = vec![control(2020, 1, 0.4), control(2020, 2, 0.6)];
        let summary = sim.run_year(2020).unwrap();
        assert_eq!(summary.scheduled, 30);
        assert_eq!(summary.regional, 10);
        assert_eq!(sim.sites.get(SiteId::new(1)).unwrap().capacity_used, 30);
    }

    #[test]
    fn missing_controls_leave_state_untouched() {
        let mut sim = simulation(130);
        sim.tables.controls.clear();
        let ledger = sim.ledger.clone();

        let err = sim.run_year(2020).unwrap_err();
        assert_eq!(err, AllocationError::MissingControls { year: 2020, units: 100 });
        assert!(sim.forecast.is_empty());
        assert_eq!(sim.sites.get(SiteId::new(1)).unwrap().capacity_used, 0);
        assert_eq!(sim.ledger, ledger);
    }

    #[test]
    fn max_units_cap_spills_into_residual() {
        let mut sim = simulation(130);
        sim.tables.controls[0].max_units = Some(2);
        let summary = sim.run_year(2020).unwrap();

        // geo 1 capped at 2 of its 40; geo 2 keeps 60; 38 left for the region.
        assert_eq!(summary.scheduled, 30);
        assert_eq!(summary.regional, 62);
        assert_eq!(summary.residual, 38);
        assert_eq!(summary.shortfall, 0);
        assert_eq!(summary.built(), 130);

        let residual: Units = sim
            .forecast
            .records_for_year(2020)
            .filter(|r| r.source == Source::Residual)
            .map(|r| r.units_added)
            .sum();
        assert_eq!(residual, 38);
        let geo1_regional: Units = sim
            .forecast
            .records_for_year(2020)
            .filter(|r| r.source == Source::RegionalTarget && r.geo_id == GeoId::new(1))
            .map(|r| r.units_added)
            .sum();
        assert_eq!(geo1_regional, 2);
    }

    /// One geo with a scheduled site, ten jur parcels and `adu_parcels` ADU
    /// parcels; a tenth of demand is reserved for ADUs.
    fn adu_simulation(adu_parcels: i64, site_capacity: Units, demand: Units) -> Simulation {
        let mut parcels: Vec<Parcel> = (1..=10)
            .map(|id| Parcel::new(ParcelId::new(id), CapacityType::Jur, 40, GeoId::new(1)))
            .collect();
        parcels.extend(
            (201..=200 + adu_parcels)
                .map(|id| Parcel::new(ParcelId::new(id), CapacityType::Adu, 1, GeoId::new(1))),
        );
        parcels.push(
            Parcel::new(ParcelId::new(100), CapacityType::Sch, site_capacity, GeoId::new(1))
                .with_site(SiteId::new(1)),
        );
        let sites: ScheduledSites =
            vec![ScheduledSite::new(SiteId::new(1), site_capacity, Some(2018), None)]
                .into_iter()
                .collect();

        let tables = ControlTables {
            controls: vec![control(2020, 1, 1.0)],
            adu_shares: vec![AduShare {
                year: 2020,
                geo_id: GeoId::new(1),
                allocation: 0.1,
            }],
            demand: [(2020, demand)].into_iter().collect(),
            ..ControlTables::default()
        };
        Simulation::new(
            parcels.into_iter().collect(),
            sites,
            tables,
            AllocationPolicy::default(),
            DEFAULT_SEED,
        )
    }

    #[test]
    fn scheduled_capacity_leaves_room_for_adu_quota() {
        let mut sim = adu_simulation(12, 200, 100);
        let summary = sim.run_year(2020).unwrap();

        assert_eq!(summary.scheduled, 100 - 10);
        assert_eq!(summary.adu, 10);
        assert_eq!(summary.regional + summary.residual, 0);
        assert_eq!(summary.shortfall, 0);
        assert_eq!(sim.sites.get(SiteId::new(1)).unwrap().capacity_used, 90);
    }

    #[test]
    fn unmet_adu_quota_flows_to_regional_stages() {
        let mut sim = adu_simulation(4, 200, 100);
        let summary = sim.run_year(2020).unwrap();

        assert_eq!(summary.scheduled, 90);
        assert_eq!(summary.adu, 4);
        assert_eq!(summary.regional + summary.residual, 6);
        assert_eq!(summary.shortfall, 0);
        assert!(
            sim.forecast
                .records_for_year(2020)
                .filter(|r| r.source == Source::Adu)
                .all(|r| r.capacity_type == CapacityType::Adu && r.units_added == 1)
        );
    }

    #[test]
    fn region_shortfall_is_reported_not_raised() {
        let mut sim = simulation(5_000);
        let summary = sim.run_year(2020).unwrap();
        assert_eq!(summary.built(), 20 * 40 + 30);
        assert_eq!(summary.shortfall, 5_000 - 830);
    }
}
