//! Regional target distribution by largest-remainder apportionment.

use serde::{Deserialize, Serialize};

use crate::error::AllocationError;
use crate::policy::AllocationPolicy;
use crate::types::{GeoId, Units, Year};

/// Share of one year's remaining demand assigned to one geography.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlTarget {
    pub year: Year,
    pub geo_id: GeoId,
    /// Fraction of the year's demand; fractions for a year sum to one.
    pub control: f64,
    /// Optional ceiling on the geo's apportioned units.
    #[serde(default)]
    pub max_units: Option<Units>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeoTarget {
    pub geo_id: GeoId,
    pub target: Units,
}

/// Check that `controls` sum to one after rounding to `decimals` places.
pub fn validate_control_sum(
    year: Year,
    controls: &[&ControlTarget],
    decimals: u32,
) -> Result<(), AllocationError> {
    let sum: f64 = controls.iter().map(|c| c.control).sum();
    let scale = 10f64.powi(decimals as i32);
    if (sum * scale).round() / scale != 1.0 {
        return Err(AllocationError::ControlSum { year, sum });
    }
    Ok(())
}

/// Split `k` units across `shares` so the integer results sum to exactly `k`.
///
/// Each geo gets the floor of `k * share`; the leftover units go one at a
/// time to the geos with the largest fractional parts (ties keep input order).
/// A negative leftover, possible only when shares sum slightly above one, is
/// taken from `fallback` first and then from the largest targets.
pub fn largest_remainder(
    k: Units,
    shares: &[(GeoId, f64)],
    fallback: Option<GeoId>,
) -> Vec<GeoTarget> {
    let mut targets: Vec<GeoTarget> = shares
        .iter()
        .map(|&(geo_id, _)| GeoTarget { geo_id, target: 0 })
        .collect();
    if k <= 0 || shares.is_empty() {
        return targets;
    }

    let raw: Vec<f64> = shares
        .iter()
        .map(|&(_, share)| k as f64 * share.max(0.0))
        .collect();
    for (t, r) in targets.iter_mut().zip(&raw) {
        t.target = r.floor() as Units;
    }

    let assigned: Units = targets.iter().map(|t| t.target).sum();
    let remainder = k - assigned;

    if remainder > 0 {
        let mut order: Vec<usize> = (0..targets.len()).collect();
        order.sort_by(|&a, &b| {
            let fa = raw[a] - raw[a].floor();
            let fb = raw[b] - raw[b].floor();
            fb.total_cmp(&fa)
        });
        for i in 0..remainder as usize {
            targets[order[i % order.len()]].target += 1;
        }
    } else if remainder < 0 {
        let mut deficit = -remainder;
        tracing::warn!(
            target: "apportion",
            k = k,
            deficit = deficit,
            fallback_geo = fallback.map(|g| i64::from(g.0)).unwrap_or(-1),
            "apportioned targets exceed demand, deducting from fallback geo"
        );

        let mut order: Vec<usize> = (0..targets.len()).collect();
        order.sort_by_key(|&i| {
            let is_fallback = Some(targets[i].geo_id) == fallback;
            (!is_fallback, std::cmp::Reverse(targets[i].target))
        });
        for i in order {
            let take = deficit.min(targets[i].target);
            targets[i].target -= take;
            deficit -= take;
            if deficit == 0 {
                break;
            }
        }
    }

    targets
}

/// Controls for `year`, in geo order.
fn controls_for_year(year: Year, controls: &[ControlTarget]) -> Vec<&ControlTarget> {
    let mut year_controls: Vec<&ControlTarget> =
        controls.iter().filter(|c| c.year == year).collect();
    year_controls.sort_by_key(|c| c.geo_id);
    year_controls
}

/// Validate the year's control fractions without apportioning anything.
///
/// A year with no controls passes; whether that is fatal depends on the units
/// left after the earlier stages.
pub fn check_year_controls(
    year: Year,
    controls: &[ControlTarget],
    policy: &AllocationPolicy,
) -> Result<(), AllocationError> {
    let year_controls = controls_for_year(year, controls);
    if year_controls.is_empty() {
        return Ok(());
    }
    validate_control_sum(year, &year_controls, policy.control_sum_decimals)
}

/// Apportion `target_units` for `year` across the year's control geographies.
///
/// Fails when the control fractions do not sum to one, or when units remain
/// but the year has no controls at all. Per-geo `max_units` caps are applied
/// after apportionment, so capped targets may sum to less than `target_units`.
pub fn distribute_targets(
    year: Year,
    target_units: Units,
    controls: &[ControlTarget],
    policy: &AllocationPolicy,
) -> Result<Vec<GeoTarget>, AllocationError> {
    let year_controls = controls_for_year(year, controls);

    if year_controls.is_empty() {
        if target_units > 0 {
            return Err(AllocationError::MissingControls {
                year,
                units: target_units,
            });
        }
        return Ok(Vec::new());
    }
    validate_control_sum(year, &year_controls, policy.control_sum_decimals)?;

    let shares: Vec<(GeoId, f64)> = year_controls
        .iter()
        .map(|c| (c.geo_id, c.control))
        .collect();
    let mut targets = largest_remainder(target_units.max(0), &shares, policy.fallback_geo);

    for (t, c) in targets.iter_mut().zip(&year_controls) {
        if let Some(max_units) = c.max_units {
            t.target = t.target.min(max_units.max(0));
        }
    }

    Ok(targets)
}
