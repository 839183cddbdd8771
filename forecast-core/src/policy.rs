//! Policy constants for the allocation engine.
//!
//! These are regulatory and smoothing assumptions rather than values derived
//! from input data, so they live in one overridable config instead of being
//! scattered through the allocation stages.

use serde::{Deserialize, Serialize};

use crate::types::{CapacityType, GeoId, Units, Year};

/// Phase year for parcels that arrive without one.
pub const DEFAULT_PHASE_YEAR: Year = 2017;

/// Config for the yearly allocation stages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AllocationPolicy {
    /// Per-parcel annual ceiling for ordinary parcels.
    pub per_parcel_cap: Units,
    /// Per-parcel annual ceiling for parcels above `large_parcel_threshold`.
    pub large_parcel_cap: Units,
    /// Remaining capacity above which a parcel counts as a large project.
    pub large_parcel_threshold: Units,
    /// Years strictly before this only admit `restricted_types`.
    pub restricted_until: Year,
    /// Capacity types eligible for discretionary allocation before `restricted_until`.
    pub restricted_types: Vec<CapacityType>,
    /// Phase year assigned to parcels that arrive without one.
    pub default_phase_year: Year,
    /// Last year of the negative-capacity correction horizon.
    pub negative_capacity_horizon: Year,
    /// Decimal places kept when validating that control fractions sum to one.
    pub control_sum_decimals: u32,
    /// Geo that absorbs a negative apportionment remainder.
    pub fallback_geo: Option<GeoId>,
    /// Land-use code assigned to parcels that receive units in a year.
    pub developed_land_use: u32,
}

impl Default for AllocationPolicy {
    fn default() -> Self {
        Self {
            per_parcel_cap: 250,
            large_parcel_cap: 500,
            large_parcel_threshold: 500,
            restricted_until: 2035,
            restricted_types: vec![CapacityType::Jur, CapacityType::Adu],
            default_phase_year: DEFAULT_PHASE_YEAR,
            negative_capacity_horizon: 2025,
            control_sum_decimals: 2,
            fallback_geo: None,
            developed_land_use: 9999,
        }
    }
}

impl AllocationPolicy {
    /// Annual ceiling for a parcel with `remaining` capacity.
    pub fn annual_cap(&self, remaining: Units) -> Units {
        if remaining > self.large_parcel_threshold {
            remaining.min(self.large_parcel_cap)
        } else {
            remaining.min(self.per_parcel_cap)
        }
    }

    /// Whether `capacity_type` may receive discretionary units in `year`.
    pub fn admits(&self, capacity_type: CapacityType, year: Year) -> bool {
        if capacity_type == CapacityType::Sch {
            return false;
        }
        year >= self.restricted_until || self.restricted_types.contains(&capacity_type)
    }
}
