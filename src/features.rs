//! Feature extraction over a set of fused events.
//!
//! Every feature is a plain finite number. Divisions by zero, empty inputs,
//! and missing areas all resolve to 0 because the consensus models fed by
//! these values cannot handle a missing opinion.

use std::sync::Arc;

use chrono::{Datelike, Weekday};
use serde::{Deserialize, Serialize};

use crate::config::{OpinionCoefficients, PipelineConfig};
use crate::geodesy::centroid;
use crate::model::{seconds, FusedFireEvent};

const SECONDS_PER_DAY: f64 = 86_400.0;

/// The named features of one event set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureSet {
    pub total_fire_count: f64,
    pub fire_density: f64,
    pub mean_frp: f64,
    pub max_frp: f64,
    pub total_frp: f64,
    pub fire_duration_days: f64,
    pub daily_fire_rate: f64,
    pub weekend_fire_ratio: f64,
    pub spatial_dispersion: f64,
    pub high_confidence_ratio: f64,
    pub initial_opinion_risk: f64,
    pub initial_opinion_urgency: f64,
    pub initial_opinion_resources: f64,
}

impl FeatureSet {
    /// Feature names paired with their values, in a fixed order.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, f64)> {
        [
            ("total_fire_count", self.total_fire_count),
            ("fire_density", self.fire_density),
            ("mean_frp", self.mean_frp),
            ("max_frp", self.max_frp),
            ("total_frp", self.total_frp),
            ("fire_duration_days", self.fire_duration_days),
            ("daily_fire_rate", self.daily_fire_rate),
            ("weekend_fire_ratio", self.weekend_fire_ratio),
            ("spatial_dispersion", self.spatial_dispersion),
            ("high_confidence_ratio", self.high_confidence_ratio),
            ("initial_opinion_risk", self.initial_opinion_risk),
            ("initial_opinion_urgency", self.initial_opinion_urgency),
            ("initial_opinion_resources", self.initial_opinion_resources),
        ]
        .into_iter()
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.iter().find(|(n, _)| *n == name).map(|(_, v)| v)
    }
}

/// `num / den`, or 0 when the quotient is not a finite number.
fn ratio(num: f64, den: f64) -> f64 {
    finite_or_zero(num / den)
}

fn finite_or_zero(v: f64) -> f64 {
    if v.is_finite() { v } else { 0.0 }
}

/// Normalized inputs of the initial opinion values, each in [0,1].
struct OpinionInputs {
    density: f64,
    frp: f64,
    confidence: f64,
    rate: f64,
}

impl OpinionInputs {
    fn opinion(&self, c: &OpinionCoefficients) -> f64 {
        let v = c.density * self.density + c.frp * self.frp + c.confidence * self.confidence + c.rate * self.rate;
        finite_or_zero(v).clamp(0.0, 1.0)
    }
}

/// Compute the features of an event set.
///
/// `area_km2` is the area of the region the events were selected from; a
/// missing, zero, or invalid area makes `fire_density` 0.
pub fn extract_features(
    events: &[Arc<FusedFireEvent>],
    area_km2: Option<f64>,
    config: &PipelineConfig,
) -> FeatureSet {
    let count = events.len() as f64;
    if events.is_empty() {
        return FeatureSet::default();
    }

    let fire_density = match area_km2 {
        Some(area) if area.is_finite() && area > 0.0 => ratio(count, area),
        _ => 0.0,
    };

    let total_frp: f64 = events.iter().map(|e| e.merged_frp).sum();
    let max_frp = events.iter().map(|e| e.merged_frp).fold(0.0, f64::max);
    let mean_frp = ratio(total_frp, count);

    let first = events.iter().map(|e| e.timestamp()).min();
    let last = events.iter().map(|e| e.timestamp()).max();
    let fire_duration_days = match (first, last) {
        (Some(first), Some(last)) => seconds(last - first) / SECONDS_PER_DAY,
        _ => 0.0,
    };
    let daily_fire_rate = ratio(count, fire_duration_days.max(1.0));

    let weekend = events
        .iter()
        .filter(|e| matches!(e.window.start.weekday(), Weekday::Sat | Weekday::Sun))
        .count() as f64;
    let weekend_fire_ratio = ratio(weekend, count);

    let high_confidence = events
        .iter()
        .filter(|e| e.merged_confidence >= config.high_confidence_threshold)
        .count() as f64;
    let high_confidence_ratio = ratio(high_confidence, count);

    let spatial_dispersion = spatial_dispersion(events);

    let weights = &config.opinion;
    let inputs = OpinionInputs {
        density: ratio(fire_density, weights.density_reference).clamp(0.0, 1.0),
        frp: ratio(mean_frp, weights.frp_reference_max).clamp(0.0, 1.0),
        confidence: high_confidence_ratio,
        rate: ratio(daily_fire_rate, weights.daily_rate_reference_max).clamp(0.0, 1.0),
    };

    FeatureSet {
        total_fire_count: count,
        fire_density,
        mean_frp,
        max_frp: finite_or_zero(max_frp),
        total_frp: finite_or_zero(total_frp),
        fire_duration_days: finite_or_zero(fire_duration_days),
        daily_fire_rate,
        weekend_fire_ratio,
        spatial_dispersion,
        high_confidence_ratio,
        initial_opinion_risk: inputs.opinion(&weights.risk),
        initial_opinion_urgency: inputs.opinion(&weights.urgency),
        initial_opinion_resources: inputs.opinion(&weights.resources),
    }
}

/// Population standard deviation of the distances (km) from each event to the
/// centroid of all events. 0 for fewer than two events.
fn spatial_dispersion(events: &[Arc<FusedFireEvent>]) -> f64 {
    if events.len() < 2 {
        return 0.0;
    }

    let Some(center) = centroid(events.iter().map(|e| &e.location)) else {
        return 0.0;
    };

    let distances: Vec<f64> = events.iter().map(|e| e.location.distance_km(&center)).collect();
    let n = distances.len() as f64;
    let mean = distances.iter().sum::<f64>() / n;
    let variance = distances.iter().map(|d| (d - mean).powi(2)).sum::<f64>() / n;

    finite_or_zero(variance.sqrt())
}
