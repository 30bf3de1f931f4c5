//! The full pipeline: raw rows to region profiles.
//!
//! ```text
//! RawBatch ──normalize──▶ FireDetection ──fuse──▶ FusedFireEvent ──aggregate──▶ RegionProfile
//! ```
//!
//! Every stage is a pure function of its inputs and the configuration.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{info, instrument};

use crate::aggregation::{aggregate, Aggregation};
use crate::config::PipelineConfig;
use crate::error::{input_error, Result};
use crate::fusion::{fuse, FusionResult};
use crate::model::{RegionRow, Sensor};
use crate::normalize::{normalize_batches, NormalizeReport, RawBatch};
use crate::region::Region;

#[derive(Debug, Clone)]
pub struct PipelineOutput {
    /// One report per sensor present in the input.
    pub normalize: Vec<NormalizeReport>,
    pub fusion: FusionResult,
    pub aggregation: Aggregation,
}

impl PipelineOutput {
    pub fn rows(&self) -> Vec<RegionRow> {
        self.aggregation.rows()
    }
}

/// Run every stage over in-memory batches and regions.
///
/// Several batches from the same sensor are treated as one batch, rows in the
/// order given, so detection ids stay unique per sensor. Each batch keeps its
/// own confidence scale.
#[instrument(skip_all, fields(batches = batches.len(), regions = regions.len()))]
pub fn run_pipeline(
    batches: &[RawBatch],
    regions: &[Arc<Region>],
    config: &PipelineConfig,
) -> Result<PipelineOutput> {
    let mut by_sensor: BTreeMap<Sensor, Vec<&RawBatch>> = BTreeMap::new();
    for (i, batch) in batches.iter().enumerate() {
        let sensor = batch
            .sensor
            .ok_or_else(|| input_error(format!("batch {} has no sensor tag", i)))?;
        by_sensor.entry(sensor).or_default().push(batch);
    }

    let mut reports = Vec::with_capacity(by_sensor.len());
    let mut detections = Vec::new();
    for (sensor, group) in &by_sensor {
        let normalized = normalize_batches(*sensor, group, config)?;
        reports.push(normalized.report);
        detections.extend(normalized.detections);
    }

    let fusion = fuse(&detections, config)?;
    let aggregation = aggregate(&fusion.events, regions, config)?;

    info!(
        detections = detections.len(),
        events = fusion.events.len(),
        unassigned = aggregation.unassigned_count(),
        "Pipeline complete"
    );

    Ok(PipelineOutput {
        normalize: reports,
        fusion,
        aggregation,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_support::config;
    use crate::normalize::{ConfidenceScale, RawRecord};
    use crate::region::test_support::square;
    use serde_json::json;

    fn rows(values: Vec<serde_json::Value>) -> Vec<RawRecord> {
        values.into_iter().map(|v| v.as_object().unwrap().clone()).collect()
    }

    #[test]
    fn test_end_to_end_example() {
        let coarse = RawBatch::new(
            Sensor::Coarse,
            rows(vec![
                json!({"latitude": 30.000, "longitude": 120.000, "acq_date": "2024-03-01", "acq_time": "1200", "confidence": 60, "frp": 50.0}),
                json!({"latitude": 31.500, "longitude": 121.500, "acq_date": "2024-03-01", "acq_time": "1200", "confidence": 80, "frp": 5.0}),
                json!({"latitude": "bad", "longitude": 121.500, "acq_date": "2024-03-01", "confidence": 80, "frp": 5.0}),
            ]),
        );
        let fine = RawBatch::new(
            Sensor::Fine,
            rows(vec![
                json!({"latitude": 30.002, "longitude": 120.001, "acq_date": "2024-03-01", "acq_time": "1330", "confidence": "h", "frp": 40.0, "bright_ti4": 340.0}),
            ]),
        );
        let regions = vec![Arc::new(square("city", 29.5, 119.5, 1.0))];

        let output = run_pipeline(&[coarse, fine], &regions, &config()).unwrap();

        assert_eq!(output.normalize.len(), 2);
        assert_eq!(output.normalize[0].sensor, Sensor::Coarse);
        assert_eq!(output.normalize[0].malformed, 1);
        assert_eq!(output.fusion.events.len(), 2);
        assert_eq!(output.fusion.report.matched_pairs, 1);

        let rows = output.rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].event_count, 1);
        // (50 * 0.6 + 40 * 0.9) / 1.5
        assert!((rows[0].features.max_frp - 44.0).abs() < 1.0e-9);
        assert_eq!(rows[0].features.high_confidence_ratio, 1.0);
        assert_eq!(output.aggregation.unassigned_count(), 1);
    }

    #[test]
    fn test_batches_of_one_sensor_are_concatenated() {
        let first = RawBatch::new(
            Sensor::Fine,
            rows(vec![json!({"latitude": 1.0, "longitude": 1.0, "acq_date": "2024-03-01", "confidence": "n", "frp": 1.0})]),
        );
        let second = RawBatch::new(
            Sensor::Fine,
            rows(vec![json!({"latitude": 5.0, "longitude": 5.0, "acq_date": "2024-03-01", "confidence": "n", "frp": 1.0})]),
        );

        let output = run_pipeline(&[first, second], &[], &config()).unwrap();

        assert_eq!(output.normalize.len(), 1);
        assert_eq!(output.normalize[0].accepted, 2);
        assert_eq!(output.fusion.events.len(), 2);
        assert_eq!(output.aggregation.unassigned_count(), 2);
    }

    #[test]
    fn test_unit_scale_batch_through_pipeline() {
        let coarse = RawBatch::new(
            Sensor::Coarse,
            rows(vec![json!({"latitude": 30.000, "longitude": 120.000, "acq_date": "2024-03-01", "acq_time": "1200", "confidence": 0.6, "frp": 50.0})]),
        )
        .with_confidence_scale(ConfidenceScale::Unit);
        let fine = RawBatch::new(
            Sensor::Fine,
            rows(vec![json!({"latitude": 30.002, "longitude": 120.001, "acq_date": "2024-03-01", "acq_time": "1330", "confidence": 80, "frp": 40.0})]),
        );

        let output = run_pipeline(&[coarse, fine], &[], &config()).unwrap();

        assert_eq!(output.fusion.report.matched_pairs, 1);
        let event = &output.fusion.events[0];
        assert_eq!(event.contributing_detections[0].confidence, 0.6);
        assert!((event.merged_frp - 44.2857).abs() < 1.0e-3);
    }

    #[test]
    fn test_date_only_detection_misses_afternoon_partner() {
        let coarse = RawBatch::new(
            Sensor::Coarse,
            rows(vec![json!({"latitude": 30.0, "longitude": 120.0, "acq_date": "2024-03-01", "confidence": 60, "frp": 5.0})]),
        );
        let fine = RawBatch::new(
            Sensor::Fine,
            rows(vec![
                json!({"latitude": 30.0, "longitude": 120.0, "acq_date": "2024-03-01", "acq_time": "1300", "confidence": 80, "frp": 5.0}),
            ]),
        );

        let output = run_pipeline(&[coarse, fine], &[], &config()).unwrap();

        // the coarse detection sits at midnight, 13 hours before its partner
        assert_eq!(output.fusion.report.matched_pairs, 0);
        assert_eq!(output.fusion.report.singletons, 2);
    }

    #[test]
    fn test_untagged_batch_is_input_error() {
        let err = run_pipeline(&[RawBatch::default()], &[], &config()).unwrap_err();
        assert_eq!(err.kind(), "input_validation");
    }
}
