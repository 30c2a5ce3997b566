//! Tunable parameters for a session.

use std::{path::PathBuf, time::Duration};

use serde::Deserialize;

use crate::error::ConfigError;

/// Default hit-test fallback depth in meters.
pub const DEFAULT_DEPTH: f32 = 2.0;
/// Default near clip plane for snapshot and draw projections.
pub const DEFAULT_NEAR_PLANE: f32 = 0.01;
/// Default far clip plane for snapshot and draw projections.
pub const DEFAULT_FAR_PLANE: f32 = 100.0;
/// Default deadline for an image analysis call.
pub const DEFAULT_ANALYSIS_TIMEOUT_MS: u64 = 30_000;
/// Default age under which a cached location fix is reused.
pub const DEFAULT_LOCATION_CACHE_SECS: u64 = 30;
/// Default interval between distance checks.
pub const DEFAULT_DISTANCE_CHECK_SECS: u64 = 30;
/// Default distance from the last fetch that triggers a refetch.
pub const DEFAULT_REFETCH_DISTANCE_METERS: f64 = 450.0;
/// Default height below the camera at which geo labels are placed.
pub const DEFAULT_GEO_ALTITUDE_OFFSET: f64 = 0.5;
/// Default maximum distance at which layer labels are drawn.
pub const DEFAULT_LAYER_LABEL_MAX_DISTANCE: f32 = 500.0;
/// Default field of view within which layer labels are drawn.
pub const DEFAULT_LAYER_LABEL_FOV_DEGREES: f32 = 50.0;
/// Default JPEG quality for uploaded snapshots.
pub const DEFAULT_JPEG_QUALITY: u8 = 100;

/// Session configuration.
///
/// Every field has a default, so a partial JSON document is enough to
/// override individual values.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Depth used when the environment hit test finds nothing.
    pub default_depth: f32,
    /// Near clip plane.
    pub near_plane: f32,
    /// Far clip plane.
    pub far_plane: f32,
    /// Deadline for an image analysis call in milliseconds.
    pub analysis_timeout_ms: u64,
    /// JPEG quality (1-100) for snapshot uploads.
    pub jpeg_quality: u8,
    /// Directory snapshots are written to.
    pub snapshot_dir: PathBuf,
    /// Age in seconds under which a cached location fix is reused.
    pub location_cache_secs: u64,
    /// Interval in seconds between distance checks.
    pub distance_check_secs: u64,
    /// Distance in meters from the last fetch that triggers a refetch.
    pub refetch_distance_meters: f64,
    /// Height in meters below the camera at which geo labels are placed.
    pub geo_altitude_offset: f64,
    /// Maximum distance in meters at which layer labels are drawn.
    pub layer_label_max_distance: f32,
    /// Field of view in degrees within which layer labels are drawn.
    pub layer_label_fov_degrees: f32,
    /// Place categories selected at startup.
    pub categories: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_depth: DEFAULT_DEPTH,
            near_plane: DEFAULT_NEAR_PLANE,
            far_plane: DEFAULT_FAR_PLANE,
            analysis_timeout_ms: DEFAULT_ANALYSIS_TIMEOUT_MS,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            snapshot_dir: std::env::temp_dir(),
            location_cache_secs: DEFAULT_LOCATION_CACHE_SECS,
            distance_check_secs: DEFAULT_DISTANCE_CHECK_SECS,
            refetch_distance_meters: DEFAULT_REFETCH_DISTANCE_METERS,
            geo_altitude_offset: DEFAULT_GEO_ALTITUDE_OFFSET,
            layer_label_max_distance: DEFAULT_LAYER_LABEL_MAX_DISTANCE,
            layer_label_fov_degrees: DEFAULT_LAYER_LABEL_FOV_DEGREES,
            categories: Vec::new(),
        }
    }
}

impl Config {
    /// Deadline for an image analysis call.
    #[must_use]
    pub fn analysis_timeout(&self) -> Duration {
        Duration::from_millis(self.analysis_timeout_ms)
    }

    /// Age under which a cached location fix is reused.
    #[must_use]
    pub fn location_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.location_cache_secs)
    }

    /// Interval between distance checks.
    #[must_use]
    pub fn distance_check_interval(&self) -> Duration {
        Duration::from_secs(self.distance_check_secs)
    }

    /// Check that every value is usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = |field: &'static str, value: f64| {
            if value > 0.0 && value.is_finite() {
                Ok(())
            } else {
                Err(ConfigError::OutOfRange { field, value })
            }
        };

        positive("default_depth", f64::from(self.default_depth))?;
        positive("near_plane", f64::from(self.near_plane))?;
        positive("far_plane", f64::from(self.far_plane))?;
        if self.far_plane <= self.near_plane {
            return Err(ConfigError::OutOfRange {
                field: "far_plane",
                value: f64::from(self.far_plane),
            });
        }
        if self.analysis_timeout_ms == 0 {
            return Err(ConfigError::OutOfRange {
                field: "analysis_timeout_ms",
                value: 0.0,
            });
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(ConfigError::OutOfRange {
                field: "jpeg_quality",
                value: f64::from(self.jpeg_quality),
            });
        }
        if self.snapshot_dir.as_os_str().is_empty() {
            return Err(ConfigError::Empty {
                field: "snapshot_dir",
            });
        }
        positive("refetch_distance_meters", self.refetch_distance_meters)?;
        positive(
            "layer_label_max_distance",
            f64::from(self.layer_label_max_distance),
        )?;
        let fov = f64::from(self.layer_label_fov_degrees);
        if !(fov > 0.0 && fov <= 180.0) {
            return Err(ConfigError::OutOfRange {
                field: "layer_label_fov_degrees",
                value: fov,
            });
        }
        Ok(())
    }
}
