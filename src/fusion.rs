//! Spatiotemporal fusion of COARSE and FINE detections.
//!
//! Each sensor's detections are first de-duplicated on their own. The two sets
//! are then matched as a bipartite assignment: every pair within both the
//! spatial and the temporal threshold is a candidate, and the cheapest
//! remaining candidate is taken until none are left. Every detection ends up in
//! exactly one [`FusedFireEvent`].
//!
//! Candidate search runs over latitude bands at least as tall as the distance
//! threshold in question. Two points in bands that are not adjacent are always
//! farther apart than the threshold, so only neighbouring bands need to be
//! compared and the result is identical to comparing every pair.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument};

use crate::config::{DuplicateThresholds, PipelineConfig};
use crate::error::{integrity_error, Result};
use crate::geodesy::KM_PER_DEGREE_LAT;
use crate::model::{DetectionId, FireDetection, FusedFireEvent, Sensor};

/// Counts describing one fusion run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FusionReport {
    pub coarse_in: usize,
    pub fine_in: usize,
    pub duplicates_removed: usize,
    pub matched_pairs: usize,
    pub singletons: usize,
}

#[derive(Debug, Clone)]
pub struct FusionResult {
    pub events: Vec<Arc<FusedFireEvent>>,
    pub report: FusionReport,
}

/// Detections bucketed by latitude band.
struct LatitudeBands {
    band_deg: f64,
    bands: HashMap<i64, Vec<usize>>,
}

impl LatitudeBands {
    fn new(threshold_km: f64) -> Self {
        LatitudeBands {
            band_deg: threshold_km / KM_PER_DEGREE_LAT,
            bands: HashMap::new(),
        }
    }

    fn band(&self, lat: f64) -> i64 {
        (lat / self.band_deg).floor() as i64
    }

    fn insert(&mut self, lat: f64, item: usize) {
        let band = self.band(lat);
        self.bands.entry(band).or_default().push(item);
    }

    /// Items in the band of `lat` and the two bands next to it.
    fn neighbours(&self, lat: f64) -> impl Iterator<Item = usize> + '_ {
        let band = self.band(lat);
        (band - 1..=band + 1)
            .filter_map(move |b| self.bands.get(&b))
            .flat_map(|items| items.iter().copied())
    }
}

/// Collapse same-sensor detections reported twice by overlapping passes.
///
/// Two detections are duplicates when they are strictly closer than both
/// duplicate thresholds. Detections are visited from highest to lowest
/// confidence (ties by id) and one is kept unless it duplicates an already
/// kept detection. The survivors are returned in id order together with the
/// number removed.
pub fn suppress_duplicates(
    detections: &[Arc<FireDetection>],
    thresholds: &DuplicateThresholds,
) -> (Vec<Arc<FireDetection>>, usize) {
    let mut order: Vec<&Arc<FireDetection>> = detections.iter().collect();
    order.sort_by(|a, b| {
        b.confidence
            .total_cmp(&a.confidence)
            .then_with(|| a.id.cmp(&b.id))
    });

    let mut kept: Vec<Arc<FireDetection>> = Vec::with_capacity(detections.len());
    let mut index = LatitudeBands::new(thresholds.distance_km);

    for candidate in order {
        let is_duplicate = index.neighbours(candidate.location.lat).any(|k| {
            let other = &kept[k];
            other.sensor == candidate.sensor
                && candidate.distance_km(other) < thresholds.distance_km
                && candidate.hours_apart(other) < thresholds.time_hours
        });

        if is_duplicate {
            debug!(id = ?candidate.id, "Suppressed duplicate detection");
            continue;
        }

        index.insert(candidate.location.lat, kept.len());
        kept.push(candidate.clone());
    }

    let removed = detections.len() - kept.len();
    kept.sort_by_key(|d| d.id);
    (kept, removed)
}

struct Candidate {
    cost: f64,
    coarse: usize,
    fine: usize,
}

/// Every COARSE/FINE pair inside both thresholds (bounds inclusive), cheapest first.
fn candidate_pairs(
    coarse: &[Arc<FireDetection>],
    fine: &[Arc<FireDetection>],
    config: &PipelineConfig,
) -> Vec<Candidate> {
    let spatial = config.spatial_threshold_km;
    let temporal = config.temporal_threshold_hours;

    let mut index = LatitudeBands::new(spatial);
    for (i, b) in fine.iter().enumerate() {
        index.insert(b.location.lat, i);
    }

    let mut pairs = Vec::new();
    for (i, a) in coarse.iter().enumerate() {
        for j in index.neighbours(a.location.lat) {
            let b = &fine[j];
            let distance = a.distance_km(b);
            let hours = a.hours_apart(b);
            if distance <= spatial && hours <= temporal {
                pairs.push(Candidate {
                    cost: distance / spatial + hours / temporal,
                    coarse: i,
                    fine: j,
                });
            }
        }
    }

    pairs.sort_by(|p, q| {
        p.cost
            .total_cmp(&q.cost)
            .then_with(|| coarse[p.coarse].id.cmp(&coarse[q.coarse].id))
            .then_with(|| fine[p.fine].id.cmp(&fine[q.fine].id))
    });
    pairs
}

/// Reconcile the detections of both sensors into fused events.
///
/// Detections may arrive in any order and from either sensor; an empty set
/// for one sensor yields singleton events for the other. Fusion never fails on
/// the detections themselves. An integrity error means an invariant broke:
/// the same detection id was passed twice, which normalization never
/// produces, or the matching consumed a detection other than exactly once.
#[instrument(skip_all, fields(detections = detections.len()))]
pub fn fuse(detections: &[Arc<FireDetection>], config: &PipelineConfig) -> Result<FusionResult> {
    let mut seen = HashSet::with_capacity(detections.len());
    for d in detections {
        if !seen.insert(d.id) {
            error!(id = ?d.id, "Detection supplied more than once");
            return Err(integrity_error(format!("detection {:?} supplied more than once", d.id)));
        }
    }

    let (coarse_raw, fine_raw): (Vec<_>, Vec<_>) = detections
        .iter()
        .cloned()
        .partition(|d| d.sensor == Sensor::Coarse);

    let (coarse, coarse_dups) = suppress_duplicates(&coarse_raw, &config.duplicates);
    let (fine, fine_dups) = suppress_duplicates(&fine_raw, &config.duplicates);

    let mut coarse_used = vec![false; coarse.len()];
    let mut fine_used = vec![false; fine.len()];
    let mut events = Vec::with_capacity(coarse.len() + fine.len());

    for pair in candidate_pairs(&coarse, &fine, config) {
        if coarse_used[pair.coarse] || fine_used[pair.fine] {
            continue;
        }
        coarse_used[pair.coarse] = true;
        fine_used[pair.fine] = true;

        debug!(
            coarse = ?coarse[pair.coarse].id,
            fine = ?fine[pair.fine].id,
            cost = pair.cost,
            "Matched detections"
        );
        events.push(FusedFireEvent::matched(
            coarse[pair.coarse].clone(),
            fine[pair.fine].clone(),
        ));
    }
    let matched_pairs = events.len();

    let unmatched_coarse = coarse
        .iter()
        .zip(&coarse_used)
        .filter(|(_, used)| !**used)
        .map(|(d, _)| d);
    let unmatched_fine = fine.iter().zip(&fine_used).filter(|(_, used)| !**used).map(|(d, _)| d);

    for d in unmatched_coarse.chain(unmatched_fine) {
        events.push(FusedFireEvent::singleton(d.clone()));
    }

    events.sort_by(|a, b| {
        a.window
            .start
            .cmp(&b.window.start)
            .then_with(|| first_id(a).cmp(&first_id(b)))
    });

    let report = FusionReport {
        coarse_in: coarse_raw.len(),
        fine_in: fine_raw.len(),
        duplicates_removed: coarse_dups + fine_dups,
        matched_pairs,
        singletons: events.len() - matched_pairs,
    };

    check_consumption(&events, coarse.len() + fine.len())?;

    info!(
        coarse = report.coarse_in,
        fine = report.fine_in,
        duplicates = report.duplicates_removed,
        matched = report.matched_pairs,
        singletons = report.singletons,
        "Fusion complete"
    );

    Ok(FusionResult {
        events: events.into_iter().map(Arc::new).collect(),
        report,
    })
}

fn first_id(event: &FusedFireEvent) -> Option<DetectionId> {
    event.detection_ids().next()
}

/// Every de-duplicated detection must appear in exactly one event.
fn check_consumption(events: &[FusedFireEvent], expected: usize) -> Result<()> {
    let mut consumed = HashSet::with_capacity(expected);
    for id in events.iter().flat_map(|e| e.detection_ids()) {
        if !consumed.insert(id) {
            error!(id = ?id, "Detection consumed by more than one fused event");
            return Err(integrity_error(format!("detection {:?} consumed twice", id)));
        }
    }

    if consumed.len() != expected {
        error!(consumed = consumed.len(), expected, "Fused events lost detections");
        return Err(integrity_error(format!(
            "{} detections consumed, {} expected",
            consumed.len(),
            expected
        )));
    }

    Ok(())
}
