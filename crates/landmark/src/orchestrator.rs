//! The per-frame loop.
//!
//! [`FrameOrchestrator::on_draw_frame`] runs on the render thread once per
//! display frame. It owns the tracking session and the renderer, folds in
//! whatever the UI and background tasks produced since the last frame, and
//! draws. Work always happens in the same order: scan request, touch, scan
//! outcome, geo placement, draw, change notification.

use std::sync::{
    Arc, Mutex, MutexGuard, PoisonError,
    atomic::{AtomicBool, Ordering},
};

use glam::{Mat4, Vec2};
use web_time::Instant;

use crate::config::Config;
use crate::error::ConfigError;
use crate::events::{self, EventSender, UiEvent, UserMessage};
use crate::geo::{
    CategoryFilter, GeoAnchorPlacementEngine, GeoServices, LocationCache, resolve_location,
};
use crate::placement::AnchorPlacementEngine;
use crate::render::{Billboard, RenderResult, SceneRenderer, is_layer_label_visible};
use crate::runtime::TaskSpawner;
use crate::service::{LocationProvider, SiteService};
use crate::snapshot::{PendingScan, ScanOutcome, SnapshotCapture, failure_message};
use crate::store::{AnchorStore, LayerLabel};
use crate::touch::{TouchHitTester, TouchTarget};
use crate::tracking::{TrackingFrame, TrackingSession, TrackingState};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The external services a session talks to.
#[derive(Clone)]
pub struct Collaborators {
    /// Image analysis and place data.
    pub site_service: Arc<dyn SiteService>,
    /// Device location.
    pub locations: Arc<dyn LocationProvider>,
}

#[derive(Debug, Default)]
struct SharedInput {
    scan_requested: AtomicBool,
    scanning: AtomicBool,
    pending_touch: Mutex<Option<Vec2>>,
    screen_size: Mutex<Option<Vec2>>,
}

/// UI-side handle for feeding input into the frame loop.
///
/// Cheap to clone and safe to use from any thread. Inputs are picked up on
/// the next frame.
#[derive(Debug, Clone, Default)]
pub struct SessionHandle {
    input: Arc<SharedInput>,
}

impl SessionHandle {
    /// Ask for a snapshot to be analyzed.
    pub fn request_scan(&self) {
        self.input.scan_requested.store(true, Ordering::Release);
    }

    /// Report a touch in screen pixels. Replaces any touch not yet handled.
    pub fn handle_touch(&self, x: f32, y: f32) {
        if lock(&self.input.pending_touch)
            .replace(Vec2::new(x, y))
            .is_some()
        {
            tracing::debug!("Replaced unhandled touch");
        }
    }

    /// Report the size of the drawing surface in pixels.
    pub fn set_screen_size(&self, width: f32, height: f32) {
        *lock(&self.input.screen_size) = Some(Vec2::new(width, height));
    }

    /// Whether a scan is being analyzed.
    #[must_use]
    pub fn is_scanning(&self) -> bool {
        self.input.scanning.load(Ordering::Acquire)
    }
}

/// Drives one tracking session and its renderer frame by frame.
pub struct FrameOrchestrator<S: TrackingSession, R: SceneRenderer> {
    session: Option<S>,
    renderer: R,
    config: Config,
    store: Arc<AnchorStore>,
    spawner: TaskSpawner,
    events: EventSender,
    input: Arc<SharedInput>,
    capture: SnapshotCapture,
    placement: AnchorPlacementEngine,
    geo: GeoAnchorPlacementEngine,
    geo_services: GeoServices,
    pending_scan: Option<PendingScan>,
    visible_layer_labels: Vec<LayerLabel>,
    last_revision: u64,
    last_result: RenderResult,
}

impl<S: TrackingSession, R: SceneRenderer> FrameOrchestrator<S, R> {
    /// Create an orchestrator for a session.
    ///
    /// Returns the UI input handle and the UI event stream alongside it.
    pub fn new(
        session: S,
        renderer: R,
        collaborators: Collaborators,
        spawner: TaskSpawner,
        config: Config,
    ) -> Result<(Self, SessionHandle, async_channel::Receiver<UiEvent>), ConfigError> {
        config.validate()?;

        let (events, receiver) = events::channel();
        let store = Arc::new(AnchorStore::new());
        let geo_services = GeoServices {
            service: collaborators.site_service.clone(),
            locations: collaborators.locations,
            location_cache: Arc::new(LocationCache::new(config.location_cache_ttl())),
        };
        let capture = SnapshotCapture::new(
            spawner.clone(),
            collaborators.site_service.clone(),
            &config,
        );
        let placement = AnchorPlacementEngine::new(
            store.clone(),
            collaborators.site_service,
            spawner.clone(),
            config.default_depth,
        );
        let geo = GeoAnchorPlacementEngine::new(
            store.clone(),
            geo_services.clone(),
            spawner.clone(),
            events.clone(),
            &config,
        );
        let handle = SessionHandle::default();

        let orchestrator = Self {
            session: Some(session),
            renderer,
            config,
            store,
            spawner,
            events,
            input: handle.input.clone(),
            capture,
            placement,
            geo,
            geo_services,
            pending_scan: None,
            visible_layer_labels: Vec::new(),
            last_revision: 0,
            last_result: RenderResult::Success,
        };
        Ok((orchestrator, handle, receiver))
    }

    /// Run one frame.
    pub fn on_draw_frame(&mut self) -> RenderResult {
        let result = self.draw_frame();
        if result != self.last_result {
            if let Some(message) = result.user_message() {
                self.events.message(message);
            }
            self.last_result = result.clone();
        }
        result
    }

    fn draw_frame(&mut self) -> RenderResult {
        if !self.renderer.is_initialized() {
            return RenderResult::NotInitialized;
        }
        let Some(mut session) = self.session.take() else {
            return RenderResult::NoSession;
        };
        let result = self.run_frame(&mut session);
        self.session = Some(session);
        result
    }

    fn run_frame(&mut self, session: &mut S) -> RenderResult {
        let frame = match session.update() {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!("Failed to update tracking session: {e}");
                return RenderResult::CameraError(e.to_string());
            }
        };
        let tracking = frame.camera_tracking_state() == TrackingState::Tracking;

        self.handle_scan_request(&frame, tracking);
        self.handle_touch(&frame, tracking);
        // An outcome waits in its slot until the camera tracks again.
        if tracking && let Some(outcome) = self.capture.poll() {
            self.handle_scan_outcome(session, &frame, outcome);
        }
        self.update_geo(session, Instant::now());
        let result = self.draw(&frame, tracking);
        self.notify_anchor_changes();
        result
    }

    fn view_projection(&self, frame: &S::Frame) -> Mat4 {
        frame.projection_matrix(self.config.near_plane, self.config.far_plane) * frame.view_matrix()
    }

    fn set_scanning(&self, scanning: bool) {
        if self.input.scanning.swap(scanning, Ordering::AcqRel) != scanning {
            self.events.emit(UiEvent::ScanStateChanged { scanning });
        }
    }

    fn handle_scan_request(&mut self, frame: &S::Frame, tracking: bool) {
        if !self.input.scan_requested.swap(false, Ordering::AcqRel) {
            return;
        }
        if self.pending_scan.is_some() {
            tracing::debug!("Scan already in progress, ignoring request");
            return;
        }
        if !tracking {
            self.events.message(UserMessage::WaitForTracking);
            self.set_scanning(false);
            return;
        }

        match self.capture.capture(frame) {
            Ok(pending) => {
                self.pending_scan = Some(pending);
                self.set_scanning(true);
            }
            Err(e) => {
                tracing::warn!("Failed to capture snapshot: {e}");
                self.events.message(failure_message(&e));
                self.set_scanning(false);
            }
        }
    }

    fn handle_touch(&mut self, frame: &S::Frame, tracking: bool) {
        let Some(touch) = lock(&self.input.pending_touch).take() else {
            return;
        };
        if !tracking {
            tracing::debug!("Ignoring touch while the camera is not tracking");
            return;
        }
        let Some(screen) = *lock(&self.input.screen_size) else {
            tracing::warn!("Ignoring touch before the screen size is known");
            return;
        };

        let tester = TouchHitTester::new(
            frame.camera_pose().translation,
            self.view_projection(frame),
            screen,
        );
        match tester.resolve(touch, &self.store.anchors(), &self.visible_layer_labels) {
            Some(TouchTarget::Anchor(anchor)) => {
                tracing::info!("Anchor '{}' clicked", anchor.site_name);
                self.events.emit(UiEvent::AnchorClicked {
                    site_id: anchor.site_id,
                    site_name: anchor.site_name,
                    description: anchor.full_description,
                });
            }
            Some(TouchTarget::LayerLabel(label)) => {
                tracing::info!("Layer label '{}' clicked", label.place.name());
                self.events.emit(UiEvent::LayerLabelClicked {
                    place_id: label.key().to_string(),
                    name: label.place.name().to_string(),
                });
            }
            Some(TouchTarget::LayerLabelClose(label)) => {
                let place_id = label.key().to_string();
                self.store.remove_layer_label(&place_id);
                self.visible_layer_labels.retain(|l| l.key() != place_id);
                tracing::info!("Layer label '{}' closed", label.place.name());
                self.events.emit(UiEvent::LayerLabelClosed {
                    place_id,
                    name: label.place.name().to_string(),
                });
            }
            None => tracing::debug!("Touch at {touch} hit nothing"),
        }
    }

    fn handle_scan_outcome(&mut self, session: &mut S, frame: &S::Frame, outcome: ScanOutcome) {
        let Some(pending) = self.pending_scan.take_if(|p| p.id == outcome.scan_id) else {
            tracing::debug!("Ignoring outcome of superseded scan {}", outcome.scan_id);
            return;
        };
        self.set_scanning(false);

        let analysis = match outcome.result {
            Ok(analysis) => analysis,
            Err(e) => {
                tracing::warn!("Scan {} failed: {e}", pending.id);
                self.events.message(failure_message(&e));
                return;
            }
        };
        if analysis.is_failure() || analysis.site_information.is_none() {
            self.events.message(UserMessage::NoObjectsDetected);
            return;
        }

        match self
            .placement
            .place(session, frame, pending.snapshot, &analysis)
        {
            Ok(anchor) => {
                let site_id = anchor.site_id.unwrap_or_default();
                self.record_visit(site_id.clone());
                self.events.emit(UiEvent::AnchorPlaced {
                    site_id,
                    site_name: anchor.site_name,
                });
            }
            Err(e) => {
                tracing::warn!("Failed to place scan {}: {e}", pending.id);
                self.events.message(UserMessage::PlacementFailed);
            }
        }
    }

    fn record_visit(&self, site_id: String) {
        let services = self.geo_services.clone();

        self.spawner.spawn(async move {
            let location = match services.location_cache.last_known() {
                Some(location) => location,
                None => match resolve_location(&services.location_cache, services.locations.as_ref())
                    .await
                {
                    Ok(location) => location,
                    Err(e) => {
                        tracing::warn!("Not recording visit to {site_id}, no location: {e}");
                        return;
                    }
                },
            };
            match services.service.record_site_visit(&site_id, location).await {
                Ok(()) => tracing::debug!("Recorded visit to {site_id}"),
                Err(e) => tracing::warn!("Failed to record visit to {site_id}: {e}"),
            }
        });
    }

    fn update_geo(&mut self, session: &mut S, now: Instant) {
        if !self.geo.check_support(session) {
            return;
        }
        self.geo.poll_fetch();
        self.geo.monitor_distance(now);
        self.geo.try_place(session);
    }

    fn draw(&mut self, frame: &S::Frame, tracking: bool) -> RenderResult {
        if let Err(e) = self.renderer.draw_background(frame.timestamp()) {
            return RenderResult::UnknownError(e.to_string());
        }
        if !tracking {
            self.visible_layer_labels.clear();
            return RenderResult::CameraNotTracking;
        }

        let view_projection = self.view_projection(frame);
        for anchor in self.store.anchors() {
            if anchor.anchor.tracking_state() != TrackingState::Tracking {
                continue;
            }
            if let Err(e) = self
                .renderer
                .draw_billboard(&Billboard::for_anchor(&anchor), &view_projection)
            {
                return RenderResult::UnknownError(e.to_string());
            }
        }

        let camera = frame.camera_pose();
        self.visible_layer_labels = self
            .store
            .layer_labels()
            .into_iter()
            .filter(|label| {
                label.anchor.tracking_state() == TrackingState::Tracking
                    && is_layer_label_visible(
                        &camera,
                        label.anchor.pose().translation,
                        self.config.layer_label_max_distance,
                        self.config.layer_label_fov_degrees,
                    )
            })
            .collect();
        for label in &self.visible_layer_labels {
            if let Err(e) = self
                .renderer
                .draw_billboard(&Billboard::for_layer_label(label), &view_projection)
            {
                return RenderResult::UnknownError(e.to_string());
            }
        }

        RenderResult::Success
    }

    fn notify_anchor_changes(&mut self) {
        let revision = self.store.revision();
        if revision != self.last_revision {
            self.last_revision = revision;
            self.events.emit(UiEvent::AnchorsChanged {
                count: self.store.anchor_count(),
            });
        }
    }

    /// Stop background work and detach the session.
    ///
    /// Outstanding analysis, detail and place fetches are cancelled and their
    /// results will be discarded. Placed anchors are kept. Returns the
    /// session so it can be resumed later.
    pub fn pause(&mut self) -> Option<S> {
        self.spawner.cancel_all();
        self.capture.clear();
        self.geo.on_tasks_cancelled();
        if self.pending_scan.take().is_some() {
            self.set_scanning(false);
        }
        self.input.scan_requested.store(false, Ordering::Release);
        lock(&self.input.pending_touch).take();
        tracing::info!("Session paused");
        self.session.take()
    }

    /// Attach a session and continue drawing.
    pub fn resume(&mut self, session: S) {
        self.session = Some(session);
        self.last_result = RenderResult::Success;
        tracing::info!("Session resumed");
    }

    /// End the session for good.
    ///
    /// Pauses, then detaches every tracked pose and drops every cache.
    pub fn teardown(&mut self) {
        drop(self.pause());
        self.store.clear();
        self.geo.reset();
        self.visible_layer_labels.clear();
        self.notify_anchor_changes();
        tracing::info!("Session torn down");
    }

    /// Change the place categories shown as layer labels.
    pub fn set_categories(&mut self, filter: CategoryFilter) {
        self.geo.set_categories(filter);
    }

    /// Fetch nearby places for the current categories.
    pub fn request_nearby_places(&mut self) {
        self.geo.request_nearby_places();
    }

    /// Remove every snapshot anchor.
    pub fn clear_anchors(&mut self) {
        self.store.clear_anchors();
    }

    /// Remove every layer label.
    pub fn clear_layer_labels(&mut self) {
        self.store.clear_layer_labels();
        self.visible_layer_labels.clear();
    }

    /// The anchor store.
    #[must_use]
    pub fn store(&self) -> &Arc<AnchorStore> {
        &self.store
    }

    /// The renderer.
    #[must_use]
    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    /// Mutable access to the renderer.
    pub fn renderer_mut(&mut self) -> &mut R {
        &mut self.renderer
    }

    /// The attached session, if any.
    #[must_use]
    pub fn session(&self) -> Option<&S> {
        self.session.as_ref()
    }

    /// Mutable access to the attached session, if any.
    pub fn session_mut(&mut self) -> Option<&mut S> {
        self.session.as_mut()
    }

    /// The geo label engine.
    #[must_use]
    pub fn geo(&self) -> &GeoAnchorPlacementEngine {
        &self.geo
    }

    /// Layer labels drawn in the last frame.
    #[must_use]
    pub fn visible_layer_labels(&self) -> &[LayerLabel] {
        &self.visible_layer_labels
    }
}
