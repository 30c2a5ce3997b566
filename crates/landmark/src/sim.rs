//! A deterministic in-process stand-in for the device.
//!
//! Provides a tracking engine, renderer, site service and location provider
//! that behave plausibly without a camera or network. Used by the tests and
//! by the `landmark-sim` binary.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use glam::{Mat4, Quat, Vec2, Vec3};

use crate::camera_image::{CameraImage, PixelFormat};
use crate::error::{RenderError, ServiceError, TrackingError};
use crate::geo::PointOfInterest;
use crate::geometry::{EARTH_RADIUS_METERS, Pose};
use crate::render::{Billboard, BillboardContent, SceneRenderer};
use crate::service::{
    AnalysisResult, GeoLocation, LocationProvider, ServiceFuture, SiteDetails, SiteInformation,
    SiteService,
};
use crate::tracking::{
    AnchorHandle, GeospatialPose, HitResult, ImageDimensions, TrackedAnchor, TrackingFrame,
    TrackingSession, TrackingState,
};

/// Identifier of the sample site returned by [`MockSiteService`].
pub const SAMPLE_SITE_ID: &str = "6850169248601af1be7c8fe3";

/// Name of the sample site returned by [`MockSiteService`].
pub const SAMPLE_SITE_NAME: &str = "Taj Mahal";

const FRAME_INTERVAL_NS: i64 = 33_333_333;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A tracked anchor that stays where it was created.
#[derive(Debug)]
pub struct SimAnchor {
    state: Mutex<(Pose, TrackingState)>,
}

impl SimAnchor {
    /// Create a tracking anchor at a pose.
    #[must_use]
    pub fn new(pose: Pose) -> Self {
        Self {
            state: Mutex::new((pose, TrackingState::Tracking)),
        }
    }

    /// Override the tracking state.
    pub fn set_tracking_state(&self, state: TrackingState) {
        lock(&self.state).1 = state;
    }
}

impl TrackedAnchor for SimAnchor {
    fn pose(&self) -> Pose {
        lock(&self.state).0
    }

    fn tracking_state(&self) -> TrackingState {
        lock(&self.state).1
    }

    fn detach(&self) {
        lock(&self.state).1 = TrackingState::Stopped;
    }
}

/// A frame produced by [`SimSession`].
#[derive(Debug, Clone)]
pub struct SimFrame {
    timestamp: i64,
    camera_pose: Pose,
    tracking_state: TrackingState,
    fov_y: f32,
    view_size: Vec2,
    image_dimensions: ImageDimensions,
    hit_distances: Vec<f32>,
    camera_image: Option<Arc<CameraImage>>,
}

impl SimFrame {
    /// World direction of the ray through a view point.
    fn view_ray(&self, view_point: Vec2) -> Vec3 {
        let ndc = Vec2::new(
            2.0 * view_point.x / self.view_size.x - 1.0,
            1.0 - 2.0 * view_point.y / self.view_size.y,
        );
        let tan = (self.fov_y / 2.0).tan();
        let aspect = self.view_size.x / self.view_size.y;
        let direction = Vec3::new(ndc.x * tan * aspect, ndc.y * tan, -1.0).normalize();
        self.camera_pose.rotate_vector(direction)
    }
}

impl TrackingFrame for SimFrame {
    fn timestamp(&self) -> i64 {
        self.timestamp
    }

    fn camera_pose(&self) -> Pose {
        self.camera_pose
    }

    fn camera_tracking_state(&self) -> TrackingState {
        self.tracking_state
    }

    fn view_matrix(&self) -> Mat4 {
        self.camera_pose.view_matrix()
    }

    fn projection_matrix(&self, near: f32, far: f32) -> Mat4 {
        Mat4::perspective_rh_gl(self.fov_y, self.view_size.x / self.view_size.y, near, far)
    }

    fn image_dimensions(&self) -> ImageDimensions {
        self.image_dimensions
    }

    #[allow(clippy::cast_precision_loss)]
    fn image_pixels_to_view(&self, pixel: Vec2) -> Vec2 {
        let image = Vec2::new(
            self.image_dimensions.width as f32,
            self.image_dimensions.height as f32,
        );
        pixel * self.view_size / image
    }

    fn hit_test(&self, view_point: Vec2) -> Vec<HitResult> {
        if self.tracking_state != TrackingState::Tracking {
            return Vec::new();
        }
        let direction = self.view_ray(view_point);
        self.hit_distances
            .iter()
            .map(|&distance| HitResult {
                distance,
                pose: Pose::from_translation(self.camera_pose.translation + direction * distance),
            })
            .collect()
    }

    fn acquire_camera_image(&self) -> Result<CameraImage, TrackingError> {
        self.camera_image
            .as_deref()
            .cloned()
            .ok_or(TrackingError::ImageUnavailable)
    }
}

/// A scripted tracking session.
///
/// Starts tracking at the origin with Earth tracking available. Everything
/// can be changed between frames through the setters.
#[derive(Debug)]
pub struct SimSession {
    frame_count: i64,
    camera_pose: Pose,
    tracking_state: TrackingState,
    fov_y: f32,
    view_size: Vec2,
    hit_distances: Vec<f32>,
    camera_image: Option<Arc<CameraImage>>,
    update_error: Option<TrackingError>,
    anchor_error: Option<TrackingError>,
    geospatial_supported: bool,
    earth_state: Option<TrackingState>,
    geospatial_pose: Option<GeospatialPose>,
    anchors: Vec<Arc<SimAnchor>>,
    earth_anchor_requests: Vec<(f64, f64, f64, Quat)>,
}

impl Default for SimSession {
    fn default() -> Self {
        Self::new()
    }
}

impl SimSession {
    /// Create a tracking session at the origin.
    #[must_use]
    pub fn new() -> Self {
        Self {
            frame_count: 0,
            camera_pose: Pose::IDENTITY,
            tracking_state: TrackingState::Tracking,
            fov_y: 60.0_f32.to_radians(),
            view_size: Vec2::new(1080.0, 1920.0),
            hit_distances: Vec::new(),
            camera_image: Some(Arc::new(test_pattern(360, 640))),
            update_error: None,
            anchor_error: None,
            geospatial_supported: true,
            earth_state: Some(TrackingState::Tracking),
            geospatial_pose: Some(GeospatialPose {
                latitude: 0.0,
                longitude: 0.0,
                altitude: 10.0,
                heading: 0.0,
            }),
            anchors: Vec::new(),
            earth_anchor_requests: Vec::new(),
        }
    }

    /// Move the camera.
    pub fn set_camera_pose(&mut self, pose: Pose) {
        self.camera_pose = pose;
    }

    /// Set the camera tracking state.
    pub fn set_tracking_state(&mut self, state: TrackingState) {
        self.tracking_state = state;
    }

    /// Set the view size in pixels.
    pub fn set_view_size(&mut self, size: Vec2) {
        self.view_size = size;
    }

    /// Distances at which every hit-test ray meets the environment.
    pub fn set_hit_distances(&mut self, distances: Vec<f32>) {
        self.hit_distances = distances;
    }

    /// Replace the camera image; `None` makes acquisition fail.
    pub fn set_camera_image(&mut self, image: Option<CameraImage>) {
        self.camera_image = image.map(Arc::new);
    }

    /// Make [`update`](TrackingSession::update) fail.
    pub fn fail_updates(&mut self, error: Option<TrackingError>) {
        self.update_error = error;
    }

    /// Make anchor creation fail.
    pub fn fail_anchor_creation(&mut self, error: Option<TrackingError>) {
        self.anchor_error = error;
    }

    /// Set whether the device supports geospatial tracking.
    pub fn set_geospatial_supported(&mut self, supported: bool) {
        self.geospatial_supported = supported;
    }

    /// Set the Earth tracking state.
    pub fn set_earth_tracking(&mut self, state: Option<TrackingState>) {
        self.earth_state = state;
    }

    /// Set the camera's geospatial pose.
    pub fn set_geospatial_pose(&mut self, pose: Option<GeospatialPose>) {
        self.geospatial_pose = pose;
    }

    /// Every anchor created so far, including Earth anchors.
    #[must_use]
    pub fn anchors(&self) -> &[Arc<SimAnchor>] {
        &self.anchors
    }

    /// Arguments of every Earth anchor request: latitude, longitude,
    /// altitude and rotation.
    #[must_use]
    pub fn earth_anchor_requests(&self) -> &[(f64, f64, f64, Quat)] {
        &self.earth_anchor_requests
    }

    fn new_anchor(&mut self, pose: Pose) -> Result<AnchorHandle, TrackingError> {
        if let Some(error) = &self.anchor_error {
            return Err(error.clone());
        }
        let anchor = Arc::new(SimAnchor::new(pose));
        self.anchors.push(anchor.clone());
        Ok(anchor)
    }
}

impl TrackingSession for SimSession {
    type Frame = SimFrame;

    fn update(&mut self) -> Result<SimFrame, TrackingError> {
        if let Some(error) = &self.update_error {
            return Err(error.clone());
        }
        self.frame_count += 1;

        let image_dimensions = self
            .camera_image
            .as_ref()
            .map_or(ImageDimensions::new(360, 640), |image| {
                ImageDimensions::new(image.width, image.height)
            });
        Ok(SimFrame {
            timestamp: self.frame_count * FRAME_INTERVAL_NS,
            camera_pose: self.camera_pose,
            tracking_state: self.tracking_state,
            fov_y: self.fov_y,
            view_size: self.view_size,
            image_dimensions,
            hit_distances: self.hit_distances.clone(),
            camera_image: self.camera_image.clone(),
        })
    }

    fn create_anchor(&mut self, pose: Pose) -> Result<AnchorHandle, TrackingError> {
        self.new_anchor(pose)
    }

    fn is_geospatial_supported(&self) -> bool {
        self.geospatial_supported
    }

    fn earth_tracking_state(&self) -> Option<TrackingState> {
        self.earth_state
    }

    fn camera_geospatial_pose(&self) -> Option<GeospatialPose> {
        self.geospatial_pose
    }

    #[allow(clippy::cast_possible_truncation)]
    fn create_earth_anchor(
        &mut self,
        latitude: f64,
        longitude: f64,
        altitude: f64,
        rotation: Quat,
    ) -> Result<AnchorHandle, TrackingError> {
        if self.earth_state != Some(TrackingState::Tracking) {
            return Err(TrackingError::Engine("Earth is not tracking".to_string()));
        }
        let camera = self
            .geospatial_pose
            .ok_or_else(|| TrackingError::Engine("no geospatial pose".to_string()))?;
        self.earth_anchor_requests
            .push((latitude, longitude, altitude, rotation));

        // Local east-up-south offset from the camera, with -Z facing north.
        let north = (latitude - camera.latitude).to_radians() * EARTH_RADIUS_METERS;
        let east = (longitude - camera.longitude).to_radians()
            * EARTH_RADIUS_METERS
            * camera.latitude.to_radians().cos();
        let up = altitude - camera.altitude;
        let offset = Vec3::new(east as f32, up as f32, -north as f32);
        self.new_anchor(Pose::new(self.camera_pose.translation + offset, rotation))
    }
}

/// A smooth RGB gradient standing in for a camera image.
#[must_use]
pub fn test_pattern(width: u32, height: u32) -> CameraImage {
    let mut data = Vec::with_capacity(width as usize * height as usize * 3);
    for y in 0..height {
        for x in 0..width {
            data.push(u8::try_from(x * 255 / width.max(1)).unwrap_or(u8::MAX));
            data.push(u8::try_from(y * 255 / height.max(1)).unwrap_or(u8::MAX));
            data.push(128);
        }
    }
    CameraImage {
        width,
        height,
        format: PixelFormat::Rgb8,
        data,
        rotation_degrees: 0,
    }
}

/// A draw request recorded by [`SimRenderer`].
#[derive(Debug, Clone, PartialEq)]
pub enum DrawCall {
    /// The camera background.
    Background {
        /// Frame timestamp.
        timestamp: i64,
    },
    /// A snapshot anchor's label.
    Anchor {
        /// Label title.
        title: String,
        /// Label preview.
        preview: Option<String>,
        /// World position of the label centre.
        center: Vec3,
    },
    /// A layer label.
    LayerLabel {
        /// Place identifier.
        place_id: String,
        /// World position of the label centre.
        center: Vec3,
    },
}

/// A renderer that records what it was asked to draw.
///
/// Each background draw starts a new frame.
#[derive(Debug)]
pub struct SimRenderer {
    initialized: bool,
    frame: Vec<DrawCall>,
    frames_drawn: u64,
    fail_next: Option<RenderError>,
}

impl Default for SimRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl SimRenderer {
    /// Create an initialized renderer.
    #[must_use]
    pub fn new() -> Self {
        Self {
            initialized: true,
            frame: Vec::new(),
            frames_drawn: 0,
            fail_next: None,
        }
    }

    /// Set whether the renderer reports itself initialized.
    pub fn set_initialized(&mut self, initialized: bool) {
        self.initialized = initialized;
    }

    /// Make the next billboard draw fail.
    pub fn fail_next_draw(&mut self, error: RenderError) {
        self.fail_next = Some(error);
    }

    /// Draw calls of the most recent frame.
    #[must_use]
    pub fn last_frame(&self) -> &[DrawCall] {
        &self.frame
    }

    /// Number of frames started.
    #[must_use]
    pub fn frames_drawn(&self) -> u64 {
        self.frames_drawn
    }

    /// Titles of the snapshot anchors drawn in the last frame.
    #[must_use]
    pub fn drawn_titles(&self) -> Vec<&str> {
        self.frame
            .iter()
            .filter_map(|call| match call {
                DrawCall::Anchor { title, .. } => Some(title.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Place ids of the layer labels drawn in the last frame.
    #[must_use]
    pub fn drawn_layer_labels(&self) -> Vec<&str> {
        self.frame
            .iter()
            .filter_map(|call| match call {
                DrawCall::LayerLabel { place_id, .. } => Some(place_id.as_str()),
                _ => None,
            })
            .collect()
    }
}

impl SceneRenderer for SimRenderer {
    fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn draw_background(&mut self, timestamp: i64) -> Result<(), RenderError> {
        self.frame.clear();
        self.frames_drawn += 1;
        self.frame.push(DrawCall::Background { timestamp });
        Ok(())
    }

    fn draw_billboard(
        &mut self,
        billboard: &Billboard<'_>,
        _view_projection: &Mat4,
    ) -> Result<(), RenderError> {
        if let Some(error) = self.fail_next.take() {
            return Err(error);
        }
        let center = billboard.center();
        self.frame.push(match billboard.content {
            BillboardContent::Anchor { title, preview } => DrawCall::Anchor {
                title: title.to_string(),
                preview: preview.map(str::to_string),
                center,
            },
            BillboardContent::LayerLabel(place) => DrawCall::LayerLabel {
                place_id: place.id().to_string(),
                center,
            },
        });
        Ok(())
    }
}

/// The analysis result [`MockSiteService`] returns by default.
#[must_use]
pub fn sample_analysis() -> AnalysisResult {
    AnalysisResult {
        status: "assume".to_string(),
        description: Some("Famous site detected in full image.".to_string()),
        site_information: Some(SiteInformation {
            label: Some("full-image".to_string()),
            x: Some(0.5),
            y: Some(0.5),
            site_name: Some(SAMPLE_SITE_NAME.to_string()),
        }),
        site_info_id: Some(SAMPLE_SITE_ID.to_string()),
    }
}

/// Details for the sample site.
#[must_use]
pub fn sample_details() -> SiteDetails {
    SiteDetails {
        id: SAMPLE_SITE_ID.to_string(),
        name: SAMPLE_SITE_NAME.to_string(),
        description: "The Taj Mahal is an ivory-white marble mausoleum on the right bank of \
                      the river Yamuna in Agra, India. It was commissioned in 1631 by the \
                      Mughal emperor Shah Jahan."
            .to_string(),
        average_rating: Some(4.8),
        rating_count: Some(1250),
        image_url: None,
    }
}

/// An in-memory [`SiteService`] with scripted responses.
#[derive(Debug)]
pub struct MockSiteService {
    analysis: Mutex<Result<AnalysisResult, ServiceError>>,
    analysis_delay: Duration,
    places: Mutex<Result<Vec<PointOfInterest>, ServiceError>>,
    details: Mutex<HashMap<String, SiteDetails>>,
    analyzed: Mutex<Vec<PathBuf>>,
    visits: Mutex<Vec<(String, GeoLocation)>>,
    nearby_requests: AtomicUsize,
}

impl Default for MockSiteService {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSiteService {
    /// Create a service that recognizes the sample site instantly and knows
    /// no places or site details.
    #[must_use]
    pub fn new() -> Self {
        Self {
            analysis: Mutex::new(Ok(sample_analysis())),
            analysis_delay: Duration::ZERO,
            places: Mutex::new(Ok(Vec::new())),
            details: Mutex::new(HashMap::new()),
            analyzed: Mutex::new(Vec::new()),
            visits: Mutex::new(Vec::new()),
            nearby_requests: AtomicUsize::new(0),
        }
    }

    /// Delay every analysis by `delay`.
    #[must_use]
    pub fn with_analysis_delay(mut self, delay: Duration) -> Self {
        self.analysis_delay = delay;
        self
    }

    /// Set the analysis response.
    pub fn set_analysis(&self, result: Result<AnalysisResult, ServiceError>) {
        *lock(&self.analysis) = result;
    }

    /// Set the places returned by nearby searches.
    pub fn set_places(&self, places: Vec<PointOfInterest>) {
        *lock(&self.places) = Ok(places);
    }

    /// Make nearby searches fail.
    pub fn fail_places(&self, message: &str) {
        *lock(&self.places) = Err(ServiceError::Unavailable(message.to_string()));
    }

    /// Make details available for a site.
    pub fn insert_details(&self, details: SiteDetails) {
        lock(&self.details).insert(details.id.clone(), details);
    }

    /// Paths of every analyzed image.
    #[must_use]
    pub fn analyzed_paths(&self) -> Vec<PathBuf> {
        lock(&self.analyzed).clone()
    }

    /// Every recorded site visit.
    #[must_use]
    pub fn visits(&self) -> Vec<(String, GeoLocation)> {
        lock(&self.visits).clone()
    }

    /// Number of nearby searches made.
    #[must_use]
    pub fn nearby_requests(&self) -> usize {
        self.nearby_requests.load(Ordering::SeqCst)
    }
}

impl SiteService for MockSiteService {
    fn analyze(&self, image_path: &Path) -> ServiceFuture<'_, AnalysisResult> {
        let path = image_path.to_path_buf();
        Box::pin(async move {
            if !self.analysis_delay.is_zero() {
                tokio::time::sleep(self.analysis_delay).await;
            }
            lock(&self.analyzed).push(path);
            lock(&self.analysis).clone()
        })
    }

    fn fetch_nearby_places(
        &self,
        location: GeoLocation,
        categories: &[String],
    ) -> ServiceFuture<'_, Vec<PointOfInterest>> {
        let categories = categories.to_vec();
        Box::pin(async move {
            self.nearby_requests.fetch_add(1, Ordering::SeqCst);
            tracing::debug!(
                "Mock nearby search at {}, {} for {categories:?}",
                location.latitude,
                location.longitude
            );
            let places = lock(&self.places).clone()?;
            Ok(places
                .into_iter()
                .filter(|place| {
                    place
                        .place_type
                        .as_ref()
                        .is_none_or(|kind| categories.contains(kind))
                })
                .collect())
        })
    }

    fn fetch_site_details(&self, site_id: &str) -> ServiceFuture<'_, SiteDetails> {
        let site_id = site_id.to_string();
        Box::pin(async move {
            lock(&self.details)
                .get(&site_id)
                .cloned()
                .ok_or(ServiceError::HttpStatus {
                    url: format!("mock://site-info/sitename/{site_id}"),
                    status: 404,
                })
        })
    }

    fn record_site_visit(&self, site_id: &str, location: GeoLocation) -> ServiceFuture<'_, ()> {
        let site_id = site_id.to_string();
        Box::pin(async move {
            lock(&self.visits).push((site_id, location));
            Ok(())
        })
    }
}

/// A [`LocationProvider`] reporting a settable fix.
#[derive(Debug)]
pub struct FixedLocationProvider {
    location: Mutex<Result<GeoLocation, ServiceError>>,
    calls: AtomicUsize,
}

impl FixedLocationProvider {
    /// Create a provider reporting `location`.
    #[must_use]
    pub fn new(location: GeoLocation) -> Self {
        Self {
            location: Mutex::new(Ok(location)),
            calls: AtomicUsize::new(0),
        }
    }

    /// Report a new fix from now on.
    pub fn set_location(&self, location: GeoLocation) {
        *lock(&self.location) = Ok(location);
    }

    /// Fail every request from now on.
    pub fn fail(&self, message: &str) {
        *lock(&self.location) = Err(ServiceError::Unavailable(message.to_string()));
    }

    /// Number of location requests made.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl LocationProvider for FixedLocationProvider {
    fn current_location(&self) -> ServiceFuture<'_, GeoLocation> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let result = lock(&self.location).clone();
        Box::pin(async move { result })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_test_along_view_ray() {
        let mut session = SimSession::new();
        session.set_hit_distances(vec![3.0]);
        let frame = session.update().unwrap();

        let hits = frame.hit_test(Vec2::new(540.0, 960.0));
        assert_eq!(hits.len(), 1);
        assert!(
            hits[0]
                .pose
                .translation
                .abs_diff_eq(Vec3::new(0.0, 0.0, -3.0), 1e-4)
        );

        session.set_tracking_state(TrackingState::Paused);
        let frame = session.update().unwrap();
        assert!(frame.hit_test(Vec2::new(540.0, 960.0)).is_empty());
    }

    #[test]
    fn test_image_pixels_scale_to_view() {
        let mut session = SimSession::new();
        let frame = session.update().unwrap();
        let view = frame.image_pixels_to_view(Vec2::new(180.0, 320.0));
        assert!(view.abs_diff_eq(Vec2::new(540.0, 960.0), 1e-3));
    }

    #[test]
    fn test_earth_anchor_local_offset() {
        let mut session = SimSession::new();
        // About 111 m north of the camera, 1 m lower.
        let anchor = session
            .create_earth_anchor(0.001, 0.0, 9.0, Quat::IDENTITY)
            .unwrap();
        let position = anchor.pose().translation;
        assert!((position.z + 111.19).abs() < 0.1, "z was {}", position.z);
        assert!(position.x.abs() < 1e-3);
        assert!((position.y + 1.0).abs() < 1e-4);

        session.set_earth_tracking(Some(TrackingState::Paused));
        assert!(
            session
                .create_earth_anchor(0.0, 0.0, 0.0, Quat::IDENTITY)
                .is_err()
        );
    }

    #[test]
    fn test_timestamps_advance() {
        let mut session = SimSession::new();
        let first = session.update().unwrap().timestamp();
        let second = session.update().unwrap().timestamp();
        assert_eq!(second - first, FRAME_INTERVAL_NS);
    }

    #[test]
    fn test_renderer_starts_new_frame_on_background() {
        let mut renderer = SimRenderer::new();
        renderer.draw_background(1).unwrap();
        renderer.draw_background(2).unwrap();
        assert_eq!(renderer.last_frame(), &[DrawCall::Background { timestamp: 2 }]);
        assert_eq!(renderer.frames_drawn(), 2);
    }

    #[tokio::test]
    async fn test_mock_filters_places_by_category() {
        let service = MockSiteService::new();
        service.set_places(vec![
            PointOfInterest {
                id: "1".to_string(),
                place_type: Some("cafe".to_string()),
                ..PointOfInterest::default()
            },
            PointOfInterest {
                id: "2".to_string(),
                place_type: Some("museum".to_string()),
                ..PointOfInterest::default()
            },
        ]);
        let places = service
            .fetch_nearby_places(GeoLocation::new(0.0, 0.0), &["cafe".to_string()])
            .await
            .unwrap();
        assert_eq!(places.len(), 1);
        assert_eq!(places[0].id, "1");
        assert_eq!(service.nearby_requests(), 1);
    }
}
