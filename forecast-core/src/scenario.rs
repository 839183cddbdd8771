//! Scenario ingestion boundary.
//!
//! A scenario is a JSON document of raw input tables as prepared by the data
//! pipeline. Raw rows may leave fields out; `Scenario::normalize` fills every
//! default in one place so the allocation stages only see complete records.
//!
//! ```json
//! {
//!   "name": "baseline",
//!   "seed": 50,
//!   "parcels": [{"parcel_id": 1, "capacity_type": "jur", "capacity": 12, "jur_or_cpa_id": 3}],
//!   "sites": [{"site_id": 7, "start_year": 2019}],
//!   "controls": [{"year": 2018, "geo_id": 3, "control": 1.0}],
//!   "adu_shares": [],
//!   "demand": [{"year": 2018, "housing_units_add": 10}],
//!   "negative_flags": []
//! }
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::adu::AduShare;
use crate::apportion::ControlTarget;
use crate::error::ScenarioError;
use crate::ledger::{Parcel, ParcelLedger};
use crate::negative::NegativeFlag;
use crate::policy::AllocationPolicy;
use crate::scheduled::{ScheduledSite, ScheduledSites};
use crate::simulation::{ControlTables, DEFAULT_SEED, Simulation};
use crate::types::{CapacityType, GeoId, ParcelId, SiteId, Units, Year};

// === RAW ROWS ===

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParcelRow {
    pub parcel_id: i64,
    pub capacity_type: CapacityType,
    pub capacity: Units,
    #[serde(default)]
    pub capacity_used: Option<Units>,
    #[serde(default)]
    pub residential_units: Option<Units>,
    #[serde(default)]
    pub phase_yr: Option<Year>,
    #[serde(default)]
    pub site_id: Option<i64>,
    pub jur_or_cpa_id: u32,
    #[serde(default)]
    pub lu: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteRow {
    pub site_id: i64,
    /// Aggregate capacity; summed from the site's parcels when absent.
    #[serde(default)]
    pub capacity: Option<Units>,
    #[serde(default)]
    pub capacity_used: Option<Units>,
    #[serde(default)]
    pub start_year: Option<Year>,
    #[serde(default)]
    pub completion_year: Option<Year>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DemandRow {
    pub year: Year,
    pub housing_units_add: Units,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Scenario {
    pub name: String,
    pub seed: Option<u64>,
    pub policy: AllocationPolicy,
    pub parcels: Vec<ParcelRow>,
    pub sites: Vec<SiteRow>,
    pub controls: Vec<ControlTarget>,
    pub adu_shares: Vec<AduShare>,
    pub demand: Vec<DemandRow>,
    pub negative_flags: Vec<NegativeFlag>,
}

/// Fully-typed inputs ready for a simulation.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedScenario {
    pub name: String,
    pub seed: u64,
    pub policy: AllocationPolicy,
    pub ledger: ParcelLedger,
    pub sites: ScheduledSites,
    pub tables: ControlTables,
}

impl NormalizedScenario {
    pub fn into_simulation(self) -> Simulation {
        Simulation::new(self.ledger, self.sites, self.tables, self.policy, self.seed)
    }
}

impl Scenario {
    pub fn from_json_str(json: &str) -> Result<Self, ScenarioError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ScenarioError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Fill defaults and build the ledger, site table and control tables.
    pub fn normalize(self) -> Result<NormalizedScenario, ScenarioError> {
        let policy = self.policy;

        let mut ledger = ParcelLedger::new();
        for row in &self.parcels {
            let mut parcel = Parcel::new(
                ParcelId::new(row.parcel_id),
                row.capacity_type,
                row.capacity,
                GeoId::new(row.jur_or_cpa_id),
            )
            .with_phase_year(row.phase_yr.unwrap_or(policy.default_phase_year))
            .with_capacity_used(row.capacity_used.unwrap_or(0))
            .with_residential_units(row.residential_units.unwrap_or(0))
            .with_land_use(row.lu.unwrap_or(0));
            if let Some(site_id) = row.site_id {
                parcel = parcel.with_site(SiteId::new(site_id));
            }

            let key = parcel.key();
            if parcel.capacity >= 0 && parcel.capacity_used > parcel.capacity {
                return Err(ScenarioError::OverBuilt {
                    key,
                    capacity: parcel.capacity,
                    used: parcel.capacity_used,
                });
            }
            if ledger.insert(parcel).is_some() {
                return Err(ScenarioError::DuplicateParcel { key });
            }
        }

        let mut site_capacity: BTreeMap<SiteId, (Units, Units)> = BTreeMap::new();
        for p in ledger.scheduled() {
            if let Some(site_id) = p.site_id {
                let entry = site_capacity.entry(site_id).or_insert((0, 0));
                entry.0 += p.capacity;
                entry.1 += p.capacity_used;
            }
        }

        let mut sites = ScheduledSites::new();
        for row in &self.sites {
            let site_id = SiteId::new(row.site_id);
            let (parcel_capacity, parcel_used) =
                site_capacity.get(&site_id).copied().unwrap_or((0, 0));
            let mut site = ScheduledSite::new(
                site_id,
                row.capacity.unwrap_or(parcel_capacity),
                row.start_year,
                row.completion_year,
            );
            site.capacity_used = row.capacity_used.unwrap_or(parcel_used);
            sites.insert(site);
        }
        // Sites referenced only by parcels build last.
        let listed: BTreeSet<SiteId> = sites.iter().map(|s| s.site_id).collect();
        for (site_id, (capacity, used)) in site_capacity {
            if listed.contains(&site_id) {
                continue;
            }
            let mut site = ScheduledSite::new(site_id, capacity, None, None);
            site.capacity_used = used;
            sites.insert(site);
        }

        let mut demand = BTreeMap::new();
        for row in &self.demand {
            *demand.entry(row.year).or_insert(0) += row.housing_units_add;
        }

        let name = if self.name.is_empty() {
            "scenario".to_string()
        } else {
            self.name
        };

        Ok(NormalizedScenario {
            name,
            seed: self.seed.unwrap_or(DEFAULT_SEED),
            policy,
            ledger,
            sites,
            tables: ControlTables {
                controls: self.controls,
                adu_shares: self.adu_shares,
                demand,
                negative_flags: self.negative_flags,
            },
        })
    }
}
