// Core ID types, tags and type aliases

use serde::{Deserialize, Serialize};

// === TYPE ALIASES ===

/// Simulated calendar year.
pub type Year = u32;

/// Housing-unit counts. Signed because data-artifact parcels carry negative
/// capacity until the correction pass zeroes them.
pub type Units = i64;

// === NEWTYPE IDS ===

#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParcelId(pub i64);

impl ParcelId {
    pub fn new(id: i64) -> Self {
        Self(id)
    }
}

/// Geographic allocation key: a jurisdiction id, or a sub-area id inside the
/// jurisdictions that are controlled at sub-area level.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GeoId(pub u32);

impl GeoId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }
}

#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SiteId(pub i64);

impl SiteId {
    pub fn new(id: i64) -> Self {
        Self(id)
    }
}

// === CAPACITY TYPES ===

/// Category of buildable potential on a parcel.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapacityType {
    /// Jurisdiction-provided capacity.
    Jur,
    /// Accessory dwelling units.
    Adu,
    /// Scheduled (committed) development.
    Sch,
    /// Already built, no remaining capacity.
    NoCap,
}

impl CapacityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CapacityType::Jur => "jur",
            CapacityType::Adu => "adu",
            CapacityType::Sch => "sch",
            CapacityType::NoCap => "no_cap",
        }
    }
}

/// A parcel row is unique on `(parcel_id, capacity_type)`.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct ParcelKey {
    pub parcel_id: ParcelId,
    pub capacity_type: CapacityType,
}

impl ParcelKey {
    pub fn new(parcel_id: ParcelId, capacity_type: CapacityType) -> Self {
        Self {
            parcel_id,
            capacity_type,
        }
    }
}

// === BUILD SOURCES ===

/// Which allocation stage produced a build record.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Scheduled,
    RegionalTarget,
    Residual,
    NegativeCorrection,
    Adu,
}

impl Source {
    /// Integer tag written to the forecast output.
    pub fn code(&self) -> u8 {
        match self {
            Source::Scheduled => 1,
            Source::RegionalTarget => 2,
            Source::Residual => 3,
            Source::NegativeCorrection => 4,
            Source::Adu => 5,
        }
    }
}
