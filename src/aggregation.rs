//! Spatial aggregation of fused events into region profiles.
//!
//! # Membership
//!
//! Each event is assigned to the first region, in input order, whose polygon
//! contains the event's location (boundary inclusive). Regions are expected
//! not to overlap, but nothing relies on it: a point on a shared edge still
//! lands in exactly one region, so no event is ever counted twice.
//!
//! Events outside every region do not appear in any profile. They are counted
//! in [`Aggregation::unassigned_count`] instead of vanishing.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, info, instrument};

use crate::config::PipelineConfig;
use crate::error::{integrity_error, Result};
use crate::features::extract_features;
use crate::model::{FusedFireEvent, RegionProfile, RegionRow};
use crate::region::Region;

/// Result of one aggregation call.
#[derive(Debug, Clone)]
pub struct Aggregation {
    /// One profile per input region, in input order.
    pub profiles: Vec<RegionProfile>,
    /// Events that fell inside no region.
    pub unassigned: Vec<Arc<FusedFireEvent>>,
}

impl Aggregation {
    pub fn unassigned_count(&self) -> usize {
        self.unassigned.len()
    }

    pub fn assigned_count(&self) -> usize {
        self.profiles.iter().map(RegionProfile::event_count).sum()
    }

    /// The modeling-ready rows of every profile.
    pub fn rows(&self) -> Vec<RegionRow> {
        self.profiles.iter().map(RegionProfile::row).collect()
    }

    pub fn summary(&self) -> AggregationSummary {
        AggregationSummary {
            regions: self.profiles.len(),
            assigned: self.assigned_count(),
            unassigned: self.unassigned_count(),
        }
    }
}

/// Counts for reporting an aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AggregationSummary {
    pub regions: usize,
    pub assigned: usize,
    pub unassigned: usize,
}

/// Index of the first region containing the event, if any.
fn assign(event: &FusedFireEvent, regions: &[Arc<Region>]) -> Option<usize> {
    regions.iter().position(|r| r.contains(&event.location))
}

/// Aggregate fused events into one profile per region.
///
/// # Arguments
///
/// * `events` - Fused events, typically from one fusion run
/// * `regions` - Region polygons; every one of them gets a profile, even with no events
/// * `config` - Pipeline configuration used for feature extraction
///
/// # Returns
///
/// The profiles in region order plus the unassigned events. Fails only with an
/// integrity error if the assigned and unassigned counts do not add up.
#[instrument(skip_all, fields(events = events.len(), regions = regions.len()))]
pub fn aggregate(
    events: &[Arc<FusedFireEvent>],
    regions: &[Arc<Region>],
    config: &PipelineConfig,
) -> Result<Aggregation> {
    let mut members: Vec<Vec<Arc<FusedFireEvent>>> = vec![Vec::new(); regions.len()];
    let mut unassigned = Vec::new();

    for event in events {
        match assign(event, regions) {
            Some(i) => members[i].push(event.clone()),
            None => unassigned.push(event.clone()),
        }
    }

    let profiles: Vec<RegionProfile> = regions
        .iter()
        .zip(members)
        .map(|(region, events)| {
            let features = extract_features(&events, Some(region.area_km2), config);
            debug!(
                region = %region.name,
                events = events.len(),
                density = features.fire_density,
                "Region profiled"
            );
            RegionProfile {
                region: region.clone(),
                events,
                features,
            }
        })
        .collect();

    let aggregation = Aggregation {
        profiles,
        unassigned,
    };

    let summary = aggregation.summary();
    if summary.assigned + summary.unassigned != events.len() {
        error!(
            assigned = summary.assigned,
            unassigned = summary.unassigned,
            total = events.len(),
            "Aggregation lost or duplicated events"
        );
        return Err(integrity_error(format!(
            "{} assigned + {} unassigned events != {} fused events",
            summary.assigned,
            summary.unassigned,
            events.len()
        )));
    }

    info!(
        regions = summary.regions,
        assigned = summary.assigned,
        unassigned = summary.unassigned,
        "Aggregation complete"
    );

    Ok(aggregation)
}
