//! Pipeline configuration.
//!
//! A [`PipelineConfig`] is an immutable value handed to every pipeline call.
//! It is validated once when it is built or loaded, so a running pipeline
//! never discovers a bad threshold halfway through a batch.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{config_error, Result};

/// Default maximum distance between matched COARSE and FINE detections.
pub const DEFAULT_SPATIAL_THRESHOLD_KM: f64 = 0.5;

/// Default maximum time between matched COARSE and FINE detections.
pub const DEFAULT_TEMPORAL_THRESHOLD_HOURS: f64 = 12.0;

/// Default thresholds below which two detections of one sensor are duplicates.
pub const DEFAULT_DUPLICATE_DISTANCE_KM: f64 = 0.1;
pub const DEFAULT_DUPLICATE_TIME_HOURS: f64 = 1.0;

/// Default merged confidence at or above which an event counts as high confidence.
pub const DEFAULT_HIGH_CONFIDENCE: f64 = 0.7;

/// Same-sensor duplicate thresholds. Both bounds are strict.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DuplicateThresholds {
    pub distance_km: f64,
    pub time_hours: f64,
}

impl Default for DuplicateThresholds {
    fn default() -> Self {
        DuplicateThresholds {
            distance_km: DEFAULT_DUPLICATE_DISTANCE_KM,
            time_hours: DEFAULT_DUPLICATE_TIME_HOURS,
        }
    }
}

/// Coefficients of one initial opinion value.
///
/// The opinion is `density * d + frp * f + confidence * c + rate * r` over the
/// normalized inputs, clipped to [0,1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OpinionCoefficients {
    pub density: f64,
    pub frp: f64,
    pub confidence: f64,
    pub rate: f64,
}

impl OpinionCoefficients {
    fn sum(&self) -> f64 {
        self.density + self.frp + self.confidence + self.rate
    }

    fn validate(&self, name: &str) -> Result<()> {
        for (field, value) in [
            ("density", self.density),
            ("frp", self.frp),
            ("confidence", self.confidence),
            ("rate", self.rate),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(config_error(format!(
                    "opinion '{}' coefficient '{}' must be a non-negative number, got {}",
                    name, field, value
                )));
            }
        }

        let sum = self.sum();
        if sum <= 0.0 || sum > 1.0 + 1.0e-9 {
            return Err(config_error(format!(
                "opinion '{}' coefficients must sum to a value in (0, 1], got {}",
                name, sum
            )));
        }

        Ok(())
    }
}

/// Weighting of the three initial opinion features.
///
/// There is deliberately no default: consensus models downstream calibrate
/// these independently and must supply them.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OpinionWeights {
    pub risk: OpinionCoefficients,
    pub urgency: OpinionCoefficients,
    pub resources: OpinionCoefficients,
    /// FRP (MW) that maps to 1.0 when normalizing `mean_frp`.
    pub frp_reference_max: f64,
    /// Events per day that map to 1.0 when normalizing `daily_fire_rate`.
    pub daily_rate_reference_max: f64,
    /// Events per km² that map to 1.0 when normalizing `fire_density`.
    #[serde(default = "default_density_reference")]
    pub density_reference: f64,
}

fn default_density_reference() -> f64 {
    1.0
}

impl OpinionWeights {
    fn validate(&self) -> Result<()> {
        self.risk.validate("risk")?;
        self.urgency.validate("urgency")?;
        self.resources.validate("resources")?;

        for (field, value) in [
            ("frp_reference_max", self.frp_reference_max),
            ("daily_rate_reference_max", self.daily_rate_reference_max),
            ("density_reference", self.density_reference),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(config_error(format!(
                    "'{}' must be a positive number, got {}",
                    field, value
                )));
            }
        }

        Ok(())
    }
}

/// Everything the pipeline needs besides its input data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_spatial_threshold")]
    pub spatial_threshold_km: f64,

    #[serde(default = "default_temporal_threshold")]
    pub temporal_threshold_hours: f64,

    #[serde(default)]
    pub duplicates: DuplicateThresholds,

    /// Normalized detections below this confidence are filtered out.
    #[serde(default)]
    pub min_confidence: f64,

    #[serde(default = "default_high_confidence")]
    pub high_confidence_threshold: f64,

    pub opinion: OpinionWeights,
}

fn default_spatial_threshold() -> f64 {
    DEFAULT_SPATIAL_THRESHOLD_KM
}

fn default_temporal_threshold() -> f64 {
    DEFAULT_TEMPORAL_THRESHOLD_HOURS
}

fn default_high_confidence() -> f64 {
    DEFAULT_HIGH_CONFIDENCE
}

impl PipelineConfig {
    /// Build a configuration with default thresholds and the given opinion weights.
    pub fn new(opinion: OpinionWeights) -> Result<Self> {
        let config = PipelineConfig {
            spatial_threshold_km: DEFAULT_SPATIAL_THRESHOLD_KM,
            temporal_threshold_hours: DEFAULT_TEMPORAL_THRESHOLD_HOURS,
            duplicates: DuplicateThresholds::default(),
            min_confidence: 0.0,
            high_confidence_threshold: DEFAULT_HIGH_CONFIDENCE,
            opinion,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn with_spatial_threshold_km(mut self, km: f64) -> Result<Self> {
        self.spatial_threshold_km = km;
        self.validate()?;
        Ok(self)
    }

    pub fn with_temporal_threshold_hours(mut self, hours: f64) -> Result<Self> {
        self.temporal_threshold_hours = hours;
        self.validate()?;
        Ok(self)
    }

    pub fn with_duplicates(mut self, duplicates: DuplicateThresholds) -> Result<Self> {
        self.duplicates = duplicates;
        self.validate()?;
        Ok(self)
    }

    pub fn with_min_confidence(mut self, min_confidence: f64) -> Result<Self> {
        self.min_confidence = min_confidence;
        self.validate()?;
        Ok(self)
    }

    /// Parse and validate a JSON configuration document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: PipelineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse, and validate a JSON configuration file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Check every value against its sane range.
    pub fn validate(&self) -> Result<()> {
        if !self.spatial_threshold_km.is_finite() || self.spatial_threshold_km <= 0.0 {
            return Err(config_error(format!(
                "spatial threshold must be a positive distance in km, got {}",
                self.spatial_threshold_km
            )));
        }

        if !self.temporal_threshold_hours.is_finite() || self.temporal_threshold_hours <= 0.0 {
            return Err(config_error(format!(
                "temporal threshold must be a positive number of hours, got {}",
                self.temporal_threshold_hours
            )));
        }

        let dup = &self.duplicates;
        if !dup.distance_km.is_finite() || dup.distance_km <= 0.0 {
            return Err(config_error(format!(
                "duplicate distance must be positive, got {}",
                dup.distance_km
            )));
        }
        if !dup.time_hours.is_finite() || dup.time_hours <= 0.0 {
            return Err(config_error(format!(
                "duplicate time must be positive, got {}",
                dup.time_hours
            )));
        }
        if dup.distance_km >= self.spatial_threshold_km
            || dup.time_hours >= self.temporal_threshold_hours
        {
            return Err(config_error(
                "duplicate thresholds must be strictly tighter than the fusion thresholds",
            ));
        }

        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(config_error(format!(
                "minimum confidence must lie in [0, 1], got {}",
                self.min_confidence
            )));
        }

        if !(0.0..=1.0).contains(&self.high_confidence_threshold) {
            return Err(config_error(format!(
                "high confidence threshold must lie in [0, 1], got {}",
                self.high_confidence_threshold
            )));
        }

        self.opinion.validate()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub fn weights() -> OpinionWeights {
        OpinionWeights {
            risk: OpinionCoefficients {
                density: 0.3,
                frp: 0.3,
                confidence: 0.2,
                rate: 0.2,
            },
            urgency: OpinionCoefficients {
                density: 0.1,
                frp: 0.2,
                confidence: 0.2,
                rate: 0.5,
            },
            resources: OpinionCoefficients {
                density: 0.4,
                frp: 0.4,
                confidence: 0.1,
                rate: 0.1,
            },
            frp_reference_max: 100.0,
            daily_rate_reference_max: 10.0,
            density_reference: 1.0,
        }
    }

    pub fn config() -> PipelineConfig {
        PipelineConfig::new(weights()).unwrap()
    }
}
