//! Annual housing-unit allocation engine.
//!
//! Each simulated year distributes a regional demand for new housing units
//! onto parcels with remaining development capacity:
//!
//! 1. `feasibility`: parcels that may build this year
//! 2. `scheduled`: committed projects, by site priority
//! 3. `adu`: accessory dwelling units per geography
//! 4. `apportion` + `picker`: remaining demand split by geography, then parcels picked
//! 5. `picker` again region-wide for any residual
//! 6. `negative`: gradual correction of negative-capacity parcels
//! 7. `update`: fold the year's builds back into the `ledger`
//!
//! `simulation` drives the years and `scenario` loads inputs from JSON.

pub mod adu;
pub mod apportion;
pub mod error;
pub mod feasibility;
pub mod forecast;
pub mod ledger;
pub mod negative;
pub mod picker;
pub mod policy;
pub mod scenario;
pub mod scheduled;
pub mod simulation;
pub mod types;
pub mod update;

pub use adu::{AduQuota, AduShare};
pub use apportion::{
    ControlTarget, GeoTarget, check_year_controls, distribute_targets, largest_remainder,
};
pub use error::{AllocationError, ScenarioError};
pub use feasibility::{Allocation, Candidate, FeasiblePool, feasible_parcels};
pub use forecast::{BuildRecord, HousingUnitForecast, RunSummary, YearSummary};
pub use ledger::{Parcel, ParcelLedger};
pub use negative::NegativeFlag;
pub use picker::{PickOutcome, PickScope, pick_parcels};
pub use policy::AllocationPolicy;
pub use scenario::{NormalizedScenario, Scenario};
pub use scheduled::{ScheduledSite, ScheduledSites, SitePriority};
pub use simulation::{ControlTables, DEFAULT_SEED, Simulation};
pub use types::*;

#[cfg(feature = "instrument")]
pub use instrument;
