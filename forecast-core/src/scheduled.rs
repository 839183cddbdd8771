//! Scheduled (committed) development.
//!
//! Scheduled sites are built out ahead of any discretionary allocation.
//! Parcels are ordered by site priority, then site id, then parcel id, and
//! the year's scheduled demand is dealt out one unit slot at a time in that
//! order, so a site can be partially consumed and resumed the next year.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::feasibility::Allocation;
use crate::ledger::ParcelLedger;
use crate::types::{SiteId, Units, Year};

// === SITE PRIORITY ===

/// Build order of a scheduled site, derived from which dates are known.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SitePriority {
    /// Both start and completion dates known.
    Dated = 1,
    StartOnly = 2,
    CompletionOnly = 3,
    Undated = 4,
}

impl SitePriority {
    pub fn from_dates(start: Option<Year>, completion: Option<Year>) -> Self {
        match (start, completion) {
            (Some(_), Some(_)) => SitePriority::Dated,
            (Some(_), None) => SitePriority::StartOnly,
            (None, Some(_)) => SitePriority::CompletionOnly,
            (None, None) => SitePriority::Undated,
        }
    }
}

// === SITES ===

/// Aggregate view of a scheduled site.
///
/// Allocation reads parcel rows only. `capacity_used` mirrors the site's
/// committed builds for reporting and is advanced by `ScheduledSites::record_builds`
/// when a year commits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledSite {
    pub site_id: SiteId,
    pub capacity: Units,
    pub capacity_used: Units,
    pub priority: SitePriority,
    pub start_year: Option<Year>,
    pub completion_year: Option<Year>,
}

impl ScheduledSite {
    pub fn new(
        site_id: SiteId,
        capacity: Units,
        start: Option<Year>,
        completion: Option<Year>,
    ) -> Self {
        Self {
            site_id,
            capacity,
            capacity_used: 0,
            priority: SitePriority::from_dates(start, completion),
            start_year: start,
            completion_year: completion,
        }
    }

    pub fn remaining(&self) -> Units {
        self.capacity - self.capacity_used
    }
}

/// Site table keyed by site id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScheduledSites {
    sites: BTreeMap<SiteId, ScheduledSite>,
}

impl ScheduledSites {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, site: ScheduledSite) -> Option<ScheduledSite> {
        self.sites.insert(site.site_id, site)
    }

    pub fn get(&self, site_id: SiteId) -> Option<&ScheduledSite> {
        self.sites.get(&site_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ScheduledSite> {
        self.sites.values()
    }

    pub fn len(&self) -> usize {
        self.sites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }

    /// Priority of `site_id`; sites missing from the table build last.
    pub fn priority(&self, site_id: SiteId) -> SitePriority {
        self.sites
            .get(&site_id)
            .map(|s| s.priority)
            .unwrap_or(SitePriority::Undated)
    }
}

impl ScheduledSites {
    /// Advance site usage by committed scheduled builds.
    pub fn record_builds(&mut self, ledger: &ParcelLedger, allocations: &[Allocation]) {
        for a in allocations {
            let Some(site_id) = ledger.get(&a.key).and_then(|p| p.site_id) else {
                continue;
            };
            if let Some(site) = self.sites.get_mut(&site_id) {
                site.capacity_used += a.units;
            }
        }
    }
}

impl FromIterator<ScheduledSite> for ScheduledSites {
    fn from_iter<I: IntoIterator<Item = ScheduledSite>>(iter: I) -> Self {
        let mut sites = ScheduledSites::new();
        for site in iter {
            sites.insert(site);
        }
        sites
    }
}

// === ALLOCATION ===

/// Deal up to `demand` units of scheduled capacity.
///
/// Nothing is mutated; the caller commits the returned allocations to the
/// site table and, through the yearly update, to the parcel rows.
pub fn allocate_scheduled(
    ledger: &ParcelLedger,
    sites: &ScheduledSites,
    demand: Units,
) -> Vec<Allocation> {
    let mut queue: Vec<_> = ledger
        .scheduled()
        .filter(|p| p.remaining_capacity() > 0)
        .filter_map(|p| p.site_id.map(|site| (sites.priority(site), site, p)))
        .collect();

    let total: Units = queue.iter().map(|(_, _, p)| p.remaining_capacity()).sum();
    if total == 0 || demand <= 0 {
        return Vec::new();
    }

    queue.sort_by_key(|(priority, site, p)| (*priority, *site, p.parcel_id));

    let slots = queue
        .iter()
        .enumerate()
        .flat_map(|(idx, (_, _, p))| std::iter::repeat_n(idx, p.remaining_capacity() as usize))
        .take(demand as usize);
    let mut units_by_idx: HashMap<usize, Units> = HashMap::new();
    for idx in slots {
        *units_by_idx.entry(idx).or_insert(0) += 1;
    }

    let mut allocations = Vec::with_capacity(units_by_idx.len());
    for (idx, (_, _, parcel)) in queue.iter().enumerate() {
        let Some(&units) = units_by_idx.get(&idx) else {
            continue;
        };
        allocations.push(Allocation {
            key: parcel.key(),
            geo_id: parcel.geo_id,
            units,
        });
    }

    allocations
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::Parcel;
    use crate::types::{CapacityType, GeoId, ParcelId};

    fn sched(parcel: i64, site: i64, capacity: Units) -> Parcel {
        Parcel::new(ParcelId::new(parcel), CapacityType::Sch, capacity, GeoId::new(1))
            .with_site(SiteId::new(site))
    }

    fn units_for(allocations: &[Allocation], parcel: i64) -> Units {
        allocations
            .iter()
            .filter(|a| a.key.parcel_id == ParcelId::new(parcel))
            .map(|a| a.units)
            .sum()
    }

    #[test]
    fn priority_from_dates() {
        assert_eq!(SitePriority::from_dates(Some(2019), Some(2022)), SitePriority::Dated);
        assert_eq!(SitePriority::from_dates(Some(2019), None), SitePriority::StartOnly);
        assert_eq!(SitePriority::from_dates(None, Some(2022)), SitePriority::CompletionOnly);
        assert_eq!(SitePriority::from_dates(None, None), SitePriority::Undated);
        assert!(SitePriority::Dated < SitePriority::Undated);
    }

    #[test]
    fn higher_priority_site_exhausts_first() {
        // Undated site 1 sorts first by id, but the dated site 2 builds first.
        let ledger: ParcelLedger = vec![sched(10, 1, 50), sched(20, 2, 30)].into_iter().collect();
        let mut sites: ScheduledSites = vec![
            ScheduledSite::new(SiteId::new(1), 50, None, None),
            ScheduledSite::new(SiteId::new(2), 30, Some(2018), Some(2020)),
        ]
        .into_iter()
        .collect();

        let allocations = allocate_scheduled(&ledger, &sites, 40);
        assert_eq!(units_for(&allocations, 20), 30);
        assert_eq!(units_for(&allocations, 10), 10);
        assert_eq!(sites.get(SiteId::new(2)).unwrap().capacity_used, 0);

        sites.record_builds(&ledger, &allocations);
        assert_eq!(sites.get(SiteId::new(2)).unwrap().remaining(), 0);
        assert_eq!(sites.get(SiteId::new(1)).unwrap().capacity_used, 10);
    }

    #[test]
    fn parcels_within_site_go_in_id_order() {
        let ledger: ParcelLedger =
            vec![sched(3, 5, 10), sched(1, 5, 10), sched(2, 5, 10)].into_iter().collect();
        let sites: ScheduledSites =
            vec![ScheduledSite::new(SiteId::new(5), 30, Some(2018), None)]
                .into_iter()
                .collect();

        let allocations = allocate_scheduled(&ledger, &sites, 15);
        assert_eq!(units_for(&allocations, 1), 10);
        assert_eq!(units_for(&allocations, 2), 5);
        assert_eq!(units_for(&allocations, 3), 0);
    }

    #[test]
    fn partially_used_parcels_resume() {
        let ledger: ParcelLedger = vec![sched(1, 5, 10).with_capacity_used(8), sched(2, 5, 10)]
            .into_iter()
            .collect();
        let sites = ScheduledSites::new();

        let allocations = allocate_scheduled(&ledger, &sites, 5);
        assert_eq!(units_for(&allocations, 1), 2);
        assert_eq!(units_for(&allocations, 2), 3);
    }

    #[test]
    fn exhausted_capacity_is_a_no_op() {
        let ledger: ParcelLedger = vec![sched(1, 5, 10).with_capacity_used(10)].into_iter().collect();
        let sites = ScheduledSites::new();
        assert!(allocate_scheduled(&ledger, &sites, 100).is_empty());
    }

    #[test]
    fn demand_above_capacity_takes_everything() {
        let ledger: ParcelLedger = vec![sched(1, 5, 10), sched(2, 6, 4)].into_iter().collect();
        let sites = ScheduledSites::new();
        let allocations = allocate_scheduled(&ledger, &sites, 1_000);
        assert_eq!(Allocation::total(&allocations), 14);
    }
}
