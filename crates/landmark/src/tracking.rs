//! Interface to the external camera tracking engine.
//!
//! The engine owns the camera, the reconstructed environment and every
//! tracked pose. The core only drives it through these traits: the
//! orchestrator holds the [`TrackingSession`] on the frame thread, and
//! background tasks never see it.

use std::{fmt, sync::Arc};

use glam::{Mat4, Quat, Vec2};

use crate::camera_image::CameraImage;
use crate::error::TrackingError;
use crate::geometry::Pose;

/// Tracking state of the camera or of a tracked anchor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrackingState {
    /// The pose is being tracked and is reliable.
    Tracking,
    /// Tracking is temporarily lost and may resume.
    #[default]
    Paused,
    /// Tracking has stopped for good.
    Stopped,
}

/// A real-world position estimate from the geospatial subsystem.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeospatialPose {
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
    /// Altitude above the WGS84 ellipsoid in meters.
    pub altitude: f64,
    /// Compass heading in degrees.
    pub heading: f64,
}

/// One environment hit-test intersection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HitResult {
    /// Distance from the camera along the hit ray in meters.
    pub distance: f32,
    /// World pose of the intersection.
    pub pose: Pose,
}

/// Dimensions of the camera image in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageDimensions {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl ImageDimensions {
    /// Create new image dimensions.
    #[must_use]
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Scale a normalized point into image pixel coordinates.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn to_pixels(&self, normalized: Vec2) -> Vec2 {
        Vec2::new(
            normalized.x * self.width as f32,
            normalized.y * self.height as f32,
        )
    }
}

/// A pose tracked by the engine that stays fixed to the real world.
pub trait TrackedAnchor: Send + Sync + fmt::Debug {
    /// The anchor's current world pose.
    fn pose(&self) -> Pose;

    /// The anchor's current tracking state.
    fn tracking_state(&self) -> TrackingState;

    /// Stop tracking this anchor. Further calls are no-ops.
    fn detach(&self);
}

/// Shared handle to an engine-owned tracked anchor.
pub type AnchorHandle = Arc<dyn TrackedAnchor>;

/// A single frame sampled from the tracking engine.
pub trait TrackingFrame {
    /// Frame timestamp in nanoseconds.
    fn timestamp(&self) -> i64;

    /// World pose of the camera for this frame.
    fn camera_pose(&self) -> Pose;

    /// Tracking state of the camera for this frame.
    fn camera_tracking_state(&self) -> TrackingState;

    /// World-to-camera matrix for this frame.
    fn view_matrix(&self) -> Mat4;

    /// Projection matrix with the given clip planes.
    fn projection_matrix(&self, near: f32, far: f32) -> Mat4;

    /// Dimensions of the CPU camera image.
    fn image_dimensions(&self) -> ImageDimensions;

    /// Convert image pixel coordinates into view (screen) coordinates.
    fn image_pixels_to_view(&self, pixel: Vec2) -> Vec2;

    /// Intersect the ray through a view point with the environment.
    ///
    /// Results are ordered nearest first.
    fn hit_test(&self, view_point: Vec2) -> Vec<HitResult>;

    /// Copy out the camera image for this frame.
    fn acquire_camera_image(&self) -> Result<CameraImage, TrackingError>;
}

/// A live session with the tracking engine.
///
/// Anchor creation is not thread-safe in the engines this models, so the
/// session is deliberately not required to be `Send`.
pub trait TrackingSession {
    /// The frame type produced by [`update`](Self::update).
    type Frame: TrackingFrame;

    /// Advance the engine and return the newest frame.
    fn update(&mut self) -> Result<Self::Frame, TrackingError>;

    /// Create a tracked anchor at a world pose.
    fn create_anchor(&mut self, pose: Pose) -> Result<AnchorHandle, TrackingError>;

    /// Whether the device supports geospatial tracking.
    fn is_geospatial_supported(&self) -> bool;

    /// Tracking state of the Earth subsystem, if it is running.
    fn earth_tracking_state(&self) -> Option<TrackingState>;

    /// The camera's geospatial pose, if the Earth subsystem has one.
    fn camera_geospatial_pose(&self) -> Option<GeospatialPose>;

    /// Create an anchor fixed to a real-world coordinate.
    fn create_earth_anchor(
        &mut self,
        latitude: f64,
        longitude: f64,
        altitude: f64,
        rotation: Quat,
    ) -> Result<AnchorHandle, TrackingError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_dimensions_to_pixels() {
        let dims = ImageDimensions::new(640, 480);
        let pixel = dims.to_pixels(Vec2::new(0.5, 0.25));
        assert_eq!(pixel, Vec2::new(320.0, 120.0));
    }
}
