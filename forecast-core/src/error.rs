use thiserror::Error;

use crate::types::{ParcelKey, Year};

/// Conditions that abort a simulation run.
///
/// Capacity shortfalls are not errors: they are logged and the run continues.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum AllocationError {
    #[error("control fractions for {year} sum to {sum:.6}, expected 1.0")]
    ControlSum { year: Year, sum: f64 },
    #[error("no control targets for {year} but {units} units remain to apportion")]
    MissingControls { year: Year, units: i64 },
}

/// Problems found while loading and normalizing a scenario.
#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("failed to read scenario: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse scenario: {0}")]
    Json(#[from] serde_json::Error),
    #[error("duplicate parcel row {key:?}")]
    DuplicateParcel { key: ParcelKey },
    #[error("parcel {key:?} has capacity_used {used} above capacity {capacity}")]
    OverBuilt {
        key: ParcelKey,
        capacity: i64,
        used: i64,
    },
    #[error("invalid year range {start}..={end}")]
    YearRange { start: Year, end: Year },
}
