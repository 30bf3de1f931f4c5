//! Firefuse - fusion of satellite fire detections into region risk profiles.
//!
//! # Overview
//!
//! Two satellite sensors report fire detections independently: a coarse one
//! that passes often and a finer one that passes rarely. Firefuse reconciles
//! both into one de-duplicated set of fire events, derives risk and urgency
//! features from it, and rolls those up to named regions such as cities.
//!
//! Data flows strictly forward and no stage keeps state between calls:
//!
//! 1. [`normalize`]: raw provider rows to typed detections
//! 2. [`fusion`]: detections of both sensors to fused events
//! 3. [`features`]: statistics over a set of fused events
//! 4. [`aggregation`]: fused events to one profile per region
//!
//! # Modules
//!
//! - [`model`]: Detections, fused events, and region profiles
//! - [`config`]: Validated, immutable pipeline configuration
//! - [`error`]: Error classes shared by every stage
//! - [`region`]: Region polygons and GeoJSON loading
//! - [`pipeline`]: The stages composed end to end
//! - [`api`]: HTTP API handlers

pub mod aggregation;
pub mod api;
pub mod config;
pub mod error;
pub mod features;
pub mod fusion;
pub mod geodesy;
pub mod model;
pub mod normalize;
pub mod pipeline;
pub mod region;

pub use config::PipelineConfig;
pub use error::{PipelineError, Result};
pub use pipeline::{run_pipeline, PipelineOutput};
