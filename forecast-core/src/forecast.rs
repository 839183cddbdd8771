// Housing-unit forecast log and per-year summaries

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::feasibility::Allocation;
use crate::types::{CapacityType, GeoId, ParcelId, ParcelKey, Source, Units, Year};

/// One build: units added to one parcel row by one stage in one year.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildRecord {
    pub parcel_id: ParcelId,
    pub capacity_type: CapacityType,
    pub geo_id: GeoId,
    pub units_added: Units,
    pub source: Source,
    pub year_built: Year,
}

impl BuildRecord {
    pub fn key(&self) -> ParcelKey {
        ParcelKey::new(self.parcel_id, self.capacity_type)
    }
}

/// Append-only log of every build over a run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HousingUnitForecast {
    records: Vec<BuildRecord>,
}

impl HousingUnitForecast {
    pub fn new() -> Self {
        Self::default()
    }

    /// Log `allocations` as builds from `source` in `year`. Returns units logged.
    pub fn append(&mut self, year: Year, source: Source, allocations: &[Allocation]) -> Units {
        let mut total = 0;
        for a in allocations.iter().filter(|a| a.units != 0) {
            #[cfg(feature = "instrument")]
            tracing::info!(
                target: "build",
                year = year,
                parcel_id = a.key.parcel_id.0,
                capacity_type = a.key.capacity_type.as_str(),
                geo_id = a.geo_id.0,
                units_added = a.units,
                source = source.code(),
            );

            self.records.push(BuildRecord {
                parcel_id: a.key.parcel_id,
                capacity_type: a.key.capacity_type,
                geo_id: a.geo_id,
                units_added: a.units,
                source,
                year_built: year,
            });
            total += a.units;
        }
        total
    }

    pub fn records(&self) -> &[BuildRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records_for_year(&self, year: Year) -> impl Iterator<Item = &BuildRecord> {
        self.records.iter().filter(move |r| r.year_built == year)
    }

    pub fn units_by_source(&self, year: Year) -> BTreeMap<Source, Units> {
        let mut totals = BTreeMap::new();
        for r in self.records_for_year(year) {
            *totals.entry(r.source).or_insert(0) += r.units_added;
        }
        totals
    }

    pub fn total_for_parcel(&self, key: ParcelKey) -> Units {
        self.records
            .iter()
            .filter(|r| r.key() == key)
            .map(|r| r.units_added)
            .sum()
    }
}

/// Units built by each stage in one simulated year.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct YearSummary {
    pub year: Year,
    pub demand: Units,
    pub scheduled: Units,
    pub adu: Units,
    pub regional: Units,
    pub residual: Units,
    pub correction: Units,
    /// Demand left unmet after every stage.
    pub shortfall: Units,
}

impl YearSummary {
    /// Units that count toward demand (corrections excluded).
    pub fn built(&self) -> Units {
        self.scheduled + self.adu + self.regional + self.residual
    }

    #[cfg(feature = "instrument")]
    pub fn record(&self) {
        tracing::info!(
            target: "year_summary",
            year = self.year,
            demand = self.demand,
            scheduled = self.scheduled,
            adu = self.adu,
            regional = self.regional,
            residual = self.residual,
            correction = self.correction,
            shortfall = self.shortfall,
        );
    }
}

/// Year summaries of one run, in simulation order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    years: Vec<YearSummary>,
}

impl RunSummary {
    pub fn push(&mut self, summary: YearSummary) {
        self.years.push(summary);
    }

    pub fn years(&self) -> &[YearSummary] {
        &self.years
    }

    pub fn get(&self, year: Year) -> Option<&YearSummary> {
        self.years.iter().find(|s| s.year == year)
    }

    pub fn total_demand(&self) -> Units {
        self.years.iter().map(|s| s.demand).sum()
    }

    pub fn total_built(&self) -> Units {
        self.years.iter().map(YearSummary::built).sum()
    }

    pub fn total_shortfall(&self) -> Units {
        self.years.iter().map(|s| s.shortfall).sum()
    }

    /// Years that left demand unmet.
    pub fn shortfall_years(&self) -> impl Iterator<Item = &YearSummary> {
        self.years.iter().filter(|s| s.shortfall > 0)
    }
}
