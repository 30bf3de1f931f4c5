//! Data models for firefuse.
//!
//! Ownership follows the flow of the pipeline: a normalized batch owns its
//! [`FireDetection`]s behind `Arc`, a [`FusedFireEvent`] shares the detections
//! it was built from, and a [`RegionProfile`] shares fused events. Nothing is
//! copied between stages and nothing is mutated after construction.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::features::FeatureSet;
use crate::geodesy::Coord;
use crate::region::Region;

/// The sensor family a detection came from.
///
/// COARSE is the frequent, low resolution instrument (MODIS class), FINE the
/// less frequent, higher resolution one (VIIRS class). The ordering is used as
/// part of detection identity, COARSE sorts first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sensor {
    #[serde(alias = "modis", alias = "MODIS", alias = "COARSE")]
    Coarse,
    #[serde(alias = "viirs", alias = "VIIRS", alias = "FINE")]
    Fine,
}

impl Sensor {
    pub fn name(&self) -> &'static str {
        match self {
            Sensor::Coarse => "coarse",
            Sensor::Fine => "fine",
        }
    }
}

impl fmt::Display for Sensor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Identity of a detection: its sensor and its row position in the source batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DetectionId {
    pub sensor: Sensor,
    pub index: usize,
}

/// One observation from one sensor, validated at the normalization boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FireDetection {
    pub id: DetectionId,
    pub sensor: Sensor,
    pub location: Coord,
    pub timestamp: DateTime<Utc>,
    /// Fire radiative power in megawatts, never negative.
    pub frp: f64,
    /// Detection confidence normalized to [0,1].
    pub confidence: f64,
    /// Brightness temperature in kelvin, FINE detections only.
    pub brightness_temperature: Option<f64>,
}

impl FireDetection {
    /// Hours between the two detections, always non-negative.
    ///
    /// Sub-second parts count, so a gap just past a threshold never rounds
    /// down onto it.
    pub fn hours_apart(&self, other: &FireDetection) -> f64 {
        seconds((self.timestamp - other.timestamp).abs()) / 3600.0
    }

    pub fn distance_km(&self, other: &FireDetection) -> f64 {
        self.location.distance_km(&other.location)
    }
}

/// A duration in seconds, keeping the fractional part.
pub fn seconds(d: Duration) -> f64 {
    d.num_seconds() as f64 + f64::from(d.subsec_nanos()) * 1.0e-9
}

/// A closed time interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn instant(t: DateTime<Utc>) -> Self {
        TimeWindow { start: t, end: t }
    }

    /// Window spanning both instants, in whichever order they are given.
    pub fn spanning(a: DateTime<Utc>, b: DateTime<Utc>) -> Self {
        TimeWindow {
            start: a.min(b),
            end: a.max(b),
        }
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }
}

/// The unit of truth after reconciling the two sensors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusedFireEvent {
    pub location: Coord,
    pub window: TimeWindow,
    /// One detection, or a COARSE/FINE pair ordered COARSE first.
    pub contributing_detections: Vec<Arc<FireDetection>>,
    pub merged_frp: f64,
    pub merged_confidence: f64,
    pub resolution_class: Sensor,
}

impl FusedFireEvent {
    /// An event confirmed by only one sensor.
    pub fn singleton(detection: Arc<FireDetection>) -> Self {
        FusedFireEvent {
            location: detection.location,
            window: TimeWindow::instant(detection.timestamp),
            merged_frp: detection.frp,
            merged_confidence: detection.confidence,
            resolution_class: detection.sensor,
            contributing_detections: vec![detection],
        }
    }

    /// An event confirmed by both sensors.
    ///
    /// The FINE geolocation wins, FRP is the confidence weighted mean of both
    /// readings and the confidence is the larger of the two.
    pub fn matched(coarse: Arc<FireDetection>, fine: Arc<FireDetection>) -> Self {
        let weight = coarse.confidence + fine.confidence;
        let merged_frp = if weight > 0.0 {
            (coarse.frp * coarse.confidence + fine.frp * fine.confidence) / weight
        } else {
            (coarse.frp + fine.frp) / 2.0
        };

        FusedFireEvent {
            location: fine.location,
            window: TimeWindow::spanning(coarse.timestamp, fine.timestamp),
            merged_frp,
            merged_confidence: coarse.confidence.max(fine.confidence),
            resolution_class: Sensor::Fine,
            contributing_detections: vec![coarse, fine],
        }
    }

    /// The timestamp used for temporal features: the start of the window.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.window.start
    }

    pub fn is_matched(&self) -> bool {
        self.contributing_detections.len() > 1
    }

    pub fn detection_ids(&self) -> impl Iterator<Item = DetectionId> + '_ {
        self.contributing_detections.iter().map(|d| d.id)
    }
}

/// The fused events falling inside one region, with their features.
///
/// Built fresh by every aggregation call and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct RegionProfile {
    pub region: Arc<Region>,
    pub events: Vec<Arc<FusedFireEvent>>,
    pub features: FeatureSet,
}

impl RegionProfile {
    pub fn region_id(&self) -> &str {
        &self.region.name
    }

    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    /// The modeling-ready row handed to exporters.
    pub fn row(&self) -> RegionRow {
        RegionRow {
            region_id: self.region.name.clone(),
            event_count: self.events.len(),
            features: self.features.clone(),
        }
    }
}

/// Flat, serializable summary of a [`RegionProfile`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionRow {
    pub region_id: String,
    pub event_count: usize,
    pub features: FeatureSet,
}
