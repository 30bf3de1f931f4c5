//! Record normalization.
//!
//! Raw rows arrive as loosely typed column maps whose names and value types
//! depend on the provider (JSON numbers from one, CSV strings from another).
//! This is the boundary where they become typed [`FireDetection`]s. A row that
//! cannot be read is dropped and counted, it never fails the batch.

use std::io::Read;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::config::PipelineConfig;
use crate::error::{input_error, Result};
use crate::geodesy::Coord;
use crate::model::{DetectionId, FireDetection, Sensor};

/// One raw row: column name to value.
pub type RawRecord = serde_json::Map<String, Value>;

const LATITUDE: &[&str] = &["latitude", "lat"];
const LONGITUDE: &[&str] = &["longitude", "lon", "lng"];
const DATETIME: &[&str] = &["timestamp", "acq_datetime"];
const DATE: &[&str] = &["acq_date", "date"];
const TIME: &[&str] = &["acq_time", "time"];
const FRP: &[&str] = &["frp"];
const CONFIDENCE: &[&str] = &["confidence", "conf"];
const BRIGHTNESS: &[&str] = &["bright_ti4", "brightness", "brightness_temperature"];

/// How numeric confidence values of a batch are to be read.
///
/// Ordinal values (`low`, `nominal`, `high`) go through their fixed table
/// under either scale.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceScale {
    /// Numbers in [0,100].
    #[default]
    Percent,
    /// Numbers already in [0,1].
    Unit,
}

impl ConfidenceScale {
    /// Map a numeric confidence onto [0,1], `None` if it is outside the scale.
    pub fn to_unit(self, value: f64) -> Option<f64> {
        let (max, divisor) = match self {
            ConfidenceScale::Percent => (100.0, 100.0),
            ConfidenceScale::Unit => (1.0, 1.0),
        };
        (0.0..=max).contains(&value).then(|| value / divisor)
    }
}

/// A source tagged batch of raw rows.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawBatch {
    pub sensor: Option<Sensor>,
    #[serde(default)]
    pub confidence_scale: ConfidenceScale,
    #[serde(default)]
    pub rows: Vec<RawRecord>,
}

impl RawBatch {
    pub fn new(sensor: Sensor, rows: Vec<RawRecord>) -> Self {
        RawBatch {
            sensor: Some(sensor),
            confidence_scale: ConfidenceScale::Percent,
            rows,
        }
    }

    pub fn with_confidence_scale(mut self, scale: ConfidenceScale) -> Self {
        self.confidence_scale = scale;
        self
    }

    /// Read a batch from CSV with a header row.
    ///
    /// Records that cannot be decoded are kept as empty rows so they are counted
    /// as malformed and row positions stay aligned with the source file.
    pub fn from_csv_reader<R: Read>(sensor: Sensor, reader: R) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let headers = rdr.headers()?.clone();
        let mut rows = Vec::new();

        for record in rdr.records() {
            let mut row = RawRecord::new();
            match record {
                Ok(record) => {
                    for (name, value) in headers.iter().zip(record.iter()) {
                        row.insert(name.to_lowercase(), Value::String(value.to_string()));
                    }
                }
                Err(e) => {
                    debug!(sensor = %sensor, error = %e, "Undecodable CSV record");
                }
            }
            rows.push(row);
        }

        Ok(RawBatch::new(sensor, rows))
    }
}

/// Counts from normalizing one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizeReport {
    pub sensor: Sensor,
    pub rows: usize,
    pub accepted: usize,
    pub malformed: usize,
    pub below_confidence: usize,
}

/// The typed detections of one batch, in input row order.
#[derive(Debug, Clone)]
pub struct NormalizedBatch {
    pub sensor: Sensor,
    pub detections: Vec<Arc<FireDetection>>,
    pub report: NormalizeReport,
}

#[derive(Error, Debug, Clone, PartialEq)]
enum RowError {
    #[error("missing field '{0}'")]
    Missing(&'static str),

    #[error("field '{0}' is not a valid number")]
    NotNumeric(&'static str),

    #[error("latitude {0} outside [-90, 90]")]
    LatitudeRange(f64),

    #[error("longitude {0} outside [-180, 180]")]
    LongitudeRange(f64),

    #[error("negative FRP {0}")]
    NegativeFrp(f64),

    #[error("unrecognized confidence value {0}")]
    Confidence(String),

    #[error("unparseable acquisition time: {0}")]
    Time(String),
}

/// Normalize rows of a known sensor whose numeric confidence is a percentage.
pub fn normalize_rows(sensor: Sensor, rows: &[RawRecord], config: &PipelineConfig) -> NormalizedBatch {
    normalize_records(
        sensor,
        rows.iter().map(|row| (ConfidenceScale::Percent, row)),
        config,
    )
}

/// Normalize a source tagged batch.
///
/// A batch without a sensor tag cannot be interpreted at all and is rejected
/// as an input validation error; everything below the batch level is tolerant.
pub fn normalize_batch(batch: &RawBatch, config: &PipelineConfig) -> Result<NormalizedBatch> {
    normalize_batches(batch_sensor(batch)?, &[batch], config)
}

/// Normalize several batches of one sensor as a single batch.
///
/// Rows are numbered across the batches in the order given, so detection ids
/// stay unique per sensor. Each batch keeps its own confidence scale. Batches
/// tagged with another sensor are rejected.
pub fn normalize_batches(sensor: Sensor, batches: &[&RawBatch], config: &PipelineConfig) -> Result<NormalizedBatch> {
    for batch in batches {
        let tagged = batch_sensor(batch)?;
        if tagged != sensor {
            return Err(input_error(format!("{} batch passed as {}", tagged, sensor)));
        }
    }

    let records = batches
        .iter()
        .flat_map(|batch| batch.rows.iter().map(move |row| (batch.confidence_scale, row)));
    Ok(normalize_records(sensor, records, config))
}

fn batch_sensor(batch: &RawBatch) -> Result<Sensor> {
    batch
        .sensor
        .ok_or_else(|| input_error("raw batch has no sensor tag"))
}

#[instrument(skip(records, config))]
fn normalize_records<'a>(
    sensor: Sensor,
    records: impl Iterator<Item = (ConfidenceScale, &'a RawRecord)>,
    config: &PipelineConfig,
) -> NormalizedBatch {
    let mut detections = Vec::new();
    let mut rows = 0;
    let mut malformed = 0;
    let mut below_confidence = 0;

    for (index, (scale, row)) in records.enumerate() {
        rows += 1;
        match parse_row(sensor, index, scale, row) {
            Ok(detection) if detection.confidence < config.min_confidence => {
                below_confidence += 1;
                debug!(
                    sensor = %sensor,
                    row = index,
                    confidence = detection.confidence,
                    "Detection below minimum confidence"
                );
            }
            Ok(detection) => detections.push(Arc::new(detection)),
            Err(e) => {
                malformed += 1;
                debug!(sensor = %sensor, row = index, reason = %e, "Dropped malformed row");
            }
        }
    }

    let report = NormalizeReport {
        sensor,
        rows,
        accepted: detections.len(),
        malformed,
        below_confidence,
    };

    if malformed > 0 {
        warn!(
            sensor = %sensor,
            malformed,
            rows = report.rows,
            "Dropped malformed rows"
        );
    }
    info!(
        sensor = %sensor,
        rows,
        accepted = report.accepted,
        below_confidence,
        "Batch normalized"
    );

    NormalizedBatch {
        sensor,
        detections,
        report,
    }
}

fn parse_row(
    sensor: Sensor,
    index: usize,
    scale: ConfidenceScale,
    row: &RawRecord,
) -> std::result::Result<FireDetection, RowError> {
    let lat = required_number(row, LATITUDE, "latitude")?;
    let lon = required_number(row, LONGITUDE, "longitude")?;

    if !(-90.0..=90.0).contains(&lat) {
        return Err(RowError::LatitudeRange(lat));
    }
    if !(-180.0..=180.0).contains(&lon) {
        return Err(RowError::LongitudeRange(lon));
    }

    let timestamp = parse_timestamp(row)?;

    let frp = required_number(row, FRP, "frp")?;
    if frp < 0.0 {
        return Err(RowError::NegativeFrp(frp));
    }

    let confidence = field(row, CONFIDENCE)
        .ok_or(RowError::Missing("confidence"))
        .and_then(|v| parse_confidence(v, scale))?;

    // the coarse instrument's brightness channel is not comparable, only FINE keeps it
    let brightness_temperature = match sensor {
        Sensor::Fine => match field(row, BRIGHTNESS) {
            Some(v) => Some(number(v).ok_or(RowError::NotNumeric("brightness"))?),
            None => None,
        },
        Sensor::Coarse => None,
    };

    Ok(FireDetection {
        id: DetectionId { sensor, index },
        sensor,
        location: Coord::new(lat, lon),
        timestamp,
        frp,
        confidence,
        brightness_temperature,
    })
}

/// First present, non-empty value among the aliases.
fn field<'a>(row: &'a RawRecord, aliases: &[&str]) -> Option<&'a Value> {
    aliases.iter().find_map(|name| match row.get(*name) {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) if s.trim().is_empty() => None,
        Some(v) => Some(v),
    })
}

fn number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    n.is_finite().then_some(n)
}

fn required_number(row: &RawRecord, aliases: &[&str], name: &'static str) -> std::result::Result<f64, RowError> {
    let value = field(row, aliases).ok_or(RowError::Missing(name))?;
    number(value).ok_or(RowError::NotNumeric(name))
}

/// Ordinal categories map through a fixed table, numbers are read on `scale`.
fn parse_confidence(value: &Value, scale: ConfidenceScale) -> std::result::Result<f64, RowError> {
    if let Some(n) = number(value) {
        return scale.to_unit(n).ok_or_else(|| RowError::Confidence(n.to_string()));
    }

    match value {
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "low" | "l" => Ok(0.3),
            "nominal" | "n" => Ok(0.6),
            "high" | "h" => Ok(0.9),
            other => Err(RowError::Confidence(other.to_string())),
        },
        other => Err(RowError::Confidence(other.to_string())),
    }
}

/// Acquisition instant of a row, from an RFC 3339 field or a date plus time.
///
/// A date without a time of day resolves to 00:00 UTC. Such a detection is
/// compared against the other sensor from midnight, so under a 12 hour
/// temporal threshold it cannot match anything observed after noon that day.
fn parse_timestamp(row: &RawRecord) -> std::result::Result<DateTime<Utc>, RowError> {
    if let Some(value) = field(row, DATETIME) {
        let text = value.as_str().ok_or_else(|| RowError::Time(value.to_string()))?;
        return DateTime::parse_from_rfc3339(text.trim())
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|_| RowError::Time(text.to_string()));
    }

    let date_value = field(row, DATE).ok_or(RowError::Missing("acq_date"))?;
    let date_text = date_value
        .as_str()
        .ok_or_else(|| RowError::Time(date_value.to_string()))?;
    let date = NaiveDate::parse_from_str(date_text.trim(), "%Y-%m-%d")
        .map_err(|_| RowError::Time(date_text.to_string()))?;

    let time = match field(row, TIME) {
        Some(v) => parse_time_of_day(v)?,
        None => NaiveTime::MIN,
    };

    Ok(date.and_time(time).and_utc())
}

/// Accepts HHMM as a number or string (`930`, `"0930"`) and `H:MM[:SS]`.
fn parse_time_of_day(value: &Value) -> std::result::Result<NaiveTime, RowError> {
    let bad = || RowError::Time(value.to_string());

    if let Value::String(s) = value {
        let s = s.trim();
        if s.contains(':') {
            return NaiveTime::parse_from_str(s, "%H:%M:%S")
                .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
                .map_err(|_| bad());
        }
    }

    let hhmm = number(value).ok_or_else(bad)?;
    if hhmm < 0.0 || hhmm.fract() != 0.0 {
        return Err(bad());
    }
    let hhmm = hhmm as u32;
    NaiveTime::from_hms_opt(hhmm / 100, hhmm % 100, 0).ok_or_else(bad)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_support::config;
    use crate::model::test_support::at;
    use serde_json::json;

    fn row(value: Value) -> RawRecord {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn test_fine_row_with_ordinal_confidence() {
        let rows = vec![row(json!({
            "latitude": 30.002,
            "longitude": 120.001,
            "acq_date": "2024-03-01",
            "acq_time": 1330,
            "confidence": "h",
            "frp": 40.0,
            "bright_ti4": 330.5
        }))];

        let batch = normalize_rows(Sensor::Fine, &rows, &config());

        assert_eq!(batch.report.accepted, 1);
        let d = &batch.detections[0];
        assert_eq!(d.sensor, Sensor::Fine);
        assert_eq!(d.id, DetectionId { sensor: Sensor::Fine, index: 0 });
        assert_eq!(d.timestamp, at(2024, 3, 1, 13, 30));
        assert_eq!(d.confidence, 0.9);
        assert_eq!(d.brightness_temperature, Some(330.5));
    }

    #[test]
    fn test_coarse_row_with_percent_confidence_and_strings() {
        let rows = vec![row(json!({
            "lat": "30.0",
            "lon": "120.0",
            "acq_date": "2024-03-01",
            "acq_time": "0905",
            "confidence": "60",
            "frp": "50",
            "brightness": "310"
        }))];

        let batch = normalize_rows(Sensor::Coarse, &rows, &config());

        let d = &batch.detections[0];
        assert_eq!(d.confidence, 0.6);
        assert_eq!(d.frp, 50.0);
        assert_eq!(d.timestamp, at(2024, 3, 1, 9, 5));
        assert_eq!(d.brightness_temperature, None);
    }

    #[test]
    fn test_ordinal_table() {
        let pct = ConfidenceScale::Percent;
        assert_eq!(parse_confidence(&json!("low"), pct), Ok(0.3));
        assert_eq!(parse_confidence(&json!("Nominal"), pct), Ok(0.6));
        assert_eq!(parse_confidence(&json!("HIGH"), ConfidenceScale::Unit), Ok(0.9));
        assert_eq!(parse_confidence(&json!(85), pct), Ok(0.85));
        assert!(parse_confidence(&json!("certain"), pct).is_err());
        assert!(parse_confidence(&json!(140), pct).is_err());
    }

    #[test]
    fn test_percent_scale_is_the_default() {
        let batch: RawBatch = serde_json::from_value(json!({
            "sensor": "fine",
            "rows": [{"latitude": 1.0, "longitude": 2.0, "acq_date": "2024-03-01", "confidence": 80, "frp": 1.0}]
        }))
        .unwrap();
        assert_eq!(batch.confidence_scale, ConfidenceScale::Percent);

        let normalized = normalize_batch(&batch, &config()).unwrap();
        assert_eq!(normalized.detections[0].confidence, 0.8);
    }

    #[test]
    fn test_unit_scale_keeps_fractions() {
        let batch: RawBatch = serde_json::from_value(json!({
            "sensor": "fine",
            "confidence_scale": "unit",
            "rows": [
                {"latitude": 1.0, "longitude": 2.0, "acq_date": "2024-03-01", "confidence": 0.8, "frp": 1.0},
                {"latitude": 1.0, "longitude": 2.0, "acq_date": "2024-03-01", "confidence": "0.6", "frp": 1.0},
                // a percentage is out of range on the unit scale
                {"latitude": 1.0, "longitude": 2.0, "acq_date": "2024-03-01", "confidence": 80, "frp": 1.0},
                {"latitude": 1.0, "longitude": 2.0, "acq_date": "2024-03-01", "confidence": "n", "frp": 1.0}
            ]
        }))
        .unwrap();

        let normalized = normalize_batch(&batch, &config()).unwrap();

        let confidences: Vec<f64> = normalized.detections.iter().map(|d| d.confidence).collect();
        assert_eq!(confidences, vec![0.8, 0.6, 0.6]);
        assert_eq!(normalized.report.malformed, 1);
    }

    #[test]
    fn test_batches_of_mixed_scale_share_row_numbering() {
        let percent = RawBatch::new(
            Sensor::Coarse,
            vec![row(json!({"latitude": 1.0, "longitude": 2.0, "acq_date": "2024-03-01", "confidence": 60, "frp": 1.0}))],
        );
        let unit = RawBatch::new(
            Sensor::Coarse,
            vec![row(json!({"latitude": 1.0, "longitude": 2.0, "acq_date": "2024-03-01", "confidence": 0.6, "frp": 1.0}))],
        )
        .with_confidence_scale(ConfidenceScale::Unit);

        let normalized = normalize_batches(Sensor::Coarse, &[&percent, &unit], &config()).unwrap();

        assert_eq!(normalized.report.rows, 2);
        assert_eq!(normalized.detections[0].confidence, 0.6);
        assert_eq!(normalized.detections[1].confidence, 0.6);
        assert_eq!(normalized.detections[1].id.index, 1);
    }

    #[test]
    fn test_batch_of_other_sensor_rejected() {
        let fine = RawBatch::new(Sensor::Fine, Vec::new());
        let err = normalize_batches(Sensor::Coarse, &[&fine], &config()).unwrap_err();
        assert_eq!(err.kind(), "input_validation");
    }

    #[test]
    fn test_date_only_resolves_to_midnight() {
        let rows = vec![row(json!({
            "latitude": 1.0, "longitude": 2.0, "acq_date": "2024-03-02",
            "confidence": 50, "frp": 1.0
        }))];

        let batch = normalize_rows(Sensor::Coarse, &rows, &config());
        assert_eq!(batch.detections[0].timestamp, at(2024, 3, 2, 0, 0));
    }

    #[test]
    fn test_time_formats() {
        assert_eq!(parse_time_of_day(&json!("9:30")), Ok(NaiveTime::from_hms_opt(9, 30, 0).unwrap()));
        assert_eq!(parse_time_of_day(&json!("13:30:15")), Ok(NaiveTime::from_hms_opt(13, 30, 15).unwrap()));
        assert_eq!(parse_time_of_day(&json!(5)), Ok(NaiveTime::from_hms_opt(0, 5, 0).unwrap()));
        assert!(parse_time_of_day(&json!(2460)).is_err());
        assert!(parse_time_of_day(&json!("noon")).is_err());
    }

    #[test]
    fn test_rfc3339_timestamp() {
        let rows = vec![row(json!({
            "latitude": 1.0, "longitude": 2.0, "timestamp": "2024-03-02T08:00:00+02:00",
            "confidence": "n", "frp": 1.0
        }))];

        let batch = normalize_rows(Sensor::Fine, &rows, &config());
        assert_eq!(batch.detections[0].timestamp, at(2024, 3, 2, 6, 0));
    }

    #[test]
    fn test_malformed_rows_are_counted_not_fatal() {
        let rows = vec![
            row(json!({"latitude": 10.0, "longitude": 10.0, "acq_date": "2024-03-01", "confidence": 50, "frp": 5.0})),
            // out of range latitude
            row(json!({"latitude": 91.0, "longitude": 10.0, "acq_date": "2024-03-01", "confidence": 50, "frp": 5.0})),
            // out of range longitude
            row(json!({"latitude": 10.0, "longitude": -180.5, "acq_date": "2024-03-01", "confidence": 50, "frp": 5.0})),
            // non numeric coordinate
            row(json!({"latitude": "north", "longitude": 10.0, "acq_date": "2024-03-01", "confidence": 50, "frp": 5.0})),
            // missing frp
            row(json!({"latitude": 10.0, "longitude": 10.0, "acq_date": "2024-03-01", "confidence": 50})),
            // negative frp
            row(json!({"latitude": 10.0, "longitude": 10.0, "acq_date": "2024-03-01", "confidence": 50, "frp": -1.0})),
            // bad date
            row(json!({"latitude": 10.0, "longitude": 10.0, "acq_date": "03/01/2024", "confidence": 50, "frp": 5.0})),
            row(json!({"latitude": -90.0, "longitude": 180.0, "acq_date": "2024-03-01", "confidence": 50, "frp": 0.0})),
        ];

        let batch = normalize_rows(Sensor::Coarse, &rows, &config());

        assert_eq!(batch.report.rows, 8);
        assert_eq!(batch.report.accepted, 2);
        assert_eq!(batch.report.malformed, 6);
        // stable by input order, ids keep the source row index
        assert_eq!(batch.detections[0].id.index, 0);
        assert_eq!(batch.detections[1].id.index, 7);
    }

    #[test]
    fn test_min_confidence_filter() {
        let config = config().with_min_confidence(0.5).unwrap();
        let rows = vec![
            row(json!({"latitude": 1.0, "longitude": 1.0, "acq_date": "2024-03-01", "confidence": "l", "frp": 1.0})),
            row(json!({"latitude": 1.0, "longitude": 1.0, "acq_date": "2024-03-01", "confidence": "n", "frp": 1.0})),
        ];

        let batch = normalize_rows(Sensor::Fine, &rows, &config);

        assert_eq!(batch.report.accepted, 1);
        assert_eq!(batch.report.below_confidence, 1);
        assert_eq!(batch.report.malformed, 0);
    }

    #[test]
    fn test_untagged_batch_rejected() {
        let batch = RawBatch::default();
        assert!(normalize_batch(&batch, &config()).is_err());
    }

    #[test]
    fn test_csv_batch() {
        let csv = "latitude,longitude,bright_ti4,acq_date,acq_time,confidence,frp\n\
                   30.002,120.001,330.1,2024-03-01,1330,n,40.0\n\
                   30.1,120.2\n\
                   30.5,120.5,301.0,2024-03-01,0100,l,2.5\n";

        let batch = RawBatch::from_csv_reader(Sensor::Fine, csv.as_bytes()).unwrap();
        assert_eq!(batch.rows.len(), 3);

        let normalized = normalize_batch(&batch, &config()).unwrap();
        assert_eq!(normalized.report.accepted, 2);
        assert_eq!(normalized.report.malformed, 1);
        assert_eq!(normalized.detections[1].id.index, 2);
        assert_eq!(normalized.detections[1].timestamp, at(2024, 3, 1, 1, 0));
    }
}
