//! Geospatial layer labels for nearby points of interest.
//!
//! Nearby places are fetched in the background for the selected categories
//! and cached. They are turned into Earth anchors only once the geospatial
//! subsystem reports a tracking state, each rotated to face back toward the
//! viewer.

use std::{sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};
use web_time::Instant;

use crate::config::Config;
use crate::error::{ServiceError, TrackingError};
use crate::events::{EventSender, UiEvent, UserMessage};
use crate::geometry::{compute_bearing, corrected_heading, heading_to_quaternion};
use crate::runtime::{LatestSlot, TaskSpawner};
use crate::service::{GeoLocation, LocationProvider, SiteService};
use crate::store::{AnchorStore, LayerLabel};
use crate::tracking::{AnchorHandle, GeospatialPose, TrackingSession, TrackingState};

/// A latitude/longitude pair as sent by the places service.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct LatLng {
    /// Latitude in degrees.
    pub lat: f64,
    /// Longitude in degrees.
    pub lng: f64,
}

/// Opening hours of a place.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OpeningHours {
    /// Whether the place is open right now.
    #[serde(default)]
    pub open_now: bool,
    /// Human-readable hours per weekday.
    #[serde(default)]
    pub weekday_text: Vec<String>,
}

/// A point of interest returned by the places service.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PointOfInterest {
    /// Place identifier.
    #[serde(rename = "place_id")]
    pub id: String,
    /// Display name.
    pub name: String,
    /// Geographic position.
    pub location: LatLng,
    /// Mean rating.
    #[serde(default)]
    pub rating: Option<f32>,
    /// Place category.
    #[serde(rename = "type", default)]
    pub place_type: Option<String>,
    /// Street address.
    #[serde(default)]
    pub address: Option<String>,
    /// Phone number.
    #[serde(default)]
    pub phone_number: Option<String>,
    /// Operational status.
    #[serde(default)]
    pub business_status: Option<String>,
    /// Opening hours.
    #[serde(default)]
    pub opening_hours: Option<OpeningHours>,
    /// Ground elevation in meters.
    #[serde(default)]
    pub elevation: Option<f64>,
    /// Short editorial summary.
    #[serde(default)]
    pub editorial_summary: Option<String>,
    /// Website URL.
    #[serde(default)]
    pub website: Option<String>,
    /// Price level, 0 (free) to 4 (very expensive).
    #[serde(default)]
    pub price_level: Option<u8>,
}

/// Ordered attributes displayed on a layer label.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PlaceAttributes {
    id: String,
    name: String,
    entries: Vec<(&'static str, String)>,
}

impl PlaceAttributes {
    /// Build the attribute list for a point of interest.
    ///
    /// Absent optional attributes are left out.
    #[must_use]
    pub fn from_point(point: &PointOfInterest) -> Self {
        let mut entries = vec![
            ("place_id", point.id.clone()),
            ("name", point.name.clone()),
            (
                "location",
                format!("{},{}", point.location.lat, point.location.lng),
            ),
        ];
        if let Some(rating) = point.rating {
            entries.push(("rating", format!("{rating:.1}")));
        }
        let optional = [
            ("type", &point.place_type),
            ("address", &point.address),
            ("phone_number", &point.phone_number),
            ("business_status", &point.business_status),
        ];
        for (key, value) in optional {
            if let Some(value) = value {
                entries.push((key, value.clone()));
            }
        }
        if let Some(hours) = &point.opening_hours {
            let status = if hours.open_now { "Open" } else { "Closed" };
            let mut text = status.to_string();
            for day in &hours.weekday_text {
                text.push_str("; ");
                text.push_str(day);
            }
            entries.push(("opening_hours", text));
        }

        Self {
            id: point.id.clone(),
            name: point.name.clone(),
            entries,
        }
    }

    /// Place identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Place name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Look up an attribute by key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Iterate over the attributes in display order.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &str)> {
        self.entries.iter().map(|(k, v)| (*k, v.as_str()))
    }
}

/// The set of place categories the user wants to see.
///
/// Keeps first-seen order and drops duplicates and blanks.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CategoryFilter {
    categories: Vec<String>,
}

impl CategoryFilter {
    /// Create a filter from a list of categories.
    #[must_use]
    pub fn new<I, S>(categories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut filter = Self::default();
        for category in categories {
            filter.insert(category);
        }
        filter
    }

    /// Add a category. Returns `false` if it was already present or blank.
    pub fn insert(&mut self, category: impl Into<String>) -> bool {
        let category = category.into().trim().to_string();
        if category.is_empty() || self.contains(&category) {
            return false;
        }
        self.categories.push(category);
        true
    }

    /// Remove a category. Returns `false` if it was not present.
    pub fn remove(&mut self, category: &str) -> bool {
        let before = self.categories.len();
        self.categories.retain(|c| c != category);
        self.categories.len() != before
    }

    /// Replace the whole set. Returns whether anything changed.
    pub fn replace(&mut self, other: CategoryFilter) -> bool {
        let changed = *self != other;
        *self = other;
        changed
    }

    /// Whether a category is selected.
    #[must_use]
    pub fn contains(&self, category: &str) -> bool {
        self.categories.iter().any(|c| c == category)
    }

    /// Whether no category is selected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }

    /// The selected categories in order.
    #[must_use]
    pub fn as_slice(&self) -> &[String] {
        &self.categories
    }
}

/// Placement progress for fetched places.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GeoPlacementState {
    /// Nothing is waiting to be placed.
    #[default]
    Idle,
    /// Fetched places are cached and wait for Earth tracking.
    AwaitingPlacement,
}

#[derive(Debug, Clone, Copy)]
struct CachedLocation {
    location: GeoLocation,
    fetched_at: Instant,
}

/// Throttles device location requests by reusing a recent fix.
#[derive(Debug)]
pub struct LocationCache {
    ttl: Duration,
    entry: std::sync::Mutex<Option<CachedLocation>>,
}

impl LocationCache {
    /// Create an empty cache whose entries stay fresh for `ttl`.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entry: std::sync::Mutex::new(None),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<CachedLocation>> {
        self.entry
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// The cached fix, if it is younger than the TTL at `now`.
    #[must_use]
    pub fn fresh(&self, now: Instant) -> Option<GeoLocation> {
        self.lock()
            .filter(|cached| now.saturating_duration_since(cached.fetched_at) < self.ttl)
            .map(|cached| cached.location)
    }

    /// The cached fix regardless of age.
    #[must_use]
    pub fn last_known(&self) -> Option<GeoLocation> {
        self.lock().map(|cached| cached.location)
    }

    /// Store a fix obtained at `now`.
    pub fn store(&self, location: GeoLocation, now: Instant) {
        *self.lock() = Some(CachedLocation {
            location,
            fetched_at: now,
        });
    }

    /// Forget the cached fix.
    pub fn invalidate(&self) {
        *self.lock() = None;
    }
}

/// Get a location fix, reusing the cache when it is fresh.
///
/// A failed request evicts the cache.
pub async fn resolve_location(
    cache: &LocationCache,
    provider: &dyn LocationProvider,
) -> Result<GeoLocation, ServiceError> {
    if let Some(location) = cache.fresh(Instant::now()) {
        tracing::debug!("Using cached location");
        return Ok(location);
    }

    match provider.current_location().await {
        Ok(location) => {
            cache.store(location, Instant::now());
            Ok(location)
        }
        Err(e) => {
            cache.invalidate();
            Err(e)
        }
    }
}

/// Why a fetch was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FetchMode {
    /// Fetch unconditionally and report failures.
    Explicit,
    /// Fetch only if the device moved far enough; stay silent on failure.
    IfMoved,
}

/// Result of a background nearby-places fetch.
#[derive(Debug)]
pub enum GeoFetchResult {
    /// Places were fetched around `origin`.
    Places {
        /// Where the device was when the fetch ran.
        origin: GeoLocation,
        /// The fetched places.
        places: Vec<PointOfInterest>,
    },
    /// The device had not moved far enough to refetch.
    Skipped,
    /// No location fix could be obtained.
    LocationFailed(ServiceError),
    /// The places service failed.
    PlacesFailed(ServiceError),
}

/// A fetch result tagged with the task that produced it.
#[derive(Debug)]
pub struct GeoFetchOutcome {
    generation: u64,
    sequence: u64,
    result: GeoFetchResult,
}

/// Services the geo engine needs.
#[derive(Clone)]
pub struct GeoServices {
    /// Places service.
    pub service: Arc<dyn SiteService>,
    /// Device location.
    pub locations: Arc<dyn LocationProvider>,
    /// Shared location cache.
    pub location_cache: Arc<LocationCache>,
}

/// Places layer labels for nearby points of interest.
pub struct GeoAnchorPlacementEngine {
    store: Arc<AnchorStore>,
    services: GeoServices,
    spawner: TaskSpawner,
    events: EventSender,
    results: LatestSlot<GeoFetchOutcome>,
    filter: CategoryFilter,
    state: GeoPlacementState,
    pending: Vec<PointOfInterest>,
    last_fetch_location: Option<GeoLocation>,
    last_distance_check: Option<Instant>,
    fetch_sequence: u64,
    fetch_in_flight: bool,
    disabled: bool,
    altitude_offset: f64,
    refetch_distance: f64,
    check_interval: Duration,
}

impl GeoAnchorPlacementEngine {
    /// Create an idle engine.
    #[must_use]
    pub fn new(
        store: Arc<AnchorStore>,
        services: GeoServices,
        spawner: TaskSpawner,
        events: EventSender,
        config: &Config,
    ) -> Self {
        Self {
            store,
            services,
            spawner,
            events,
            results: LatestSlot::new(),
            filter: CategoryFilter::new(config.categories.iter().cloned()),
            state: GeoPlacementState::Idle,
            pending: Vec::new(),
            last_fetch_location: None,
            last_distance_check: None,
            fetch_sequence: 0,
            fetch_in_flight: false,
            disabled: false,
            altitude_offset: config.geo_altitude_offset,
            refetch_distance: config.refetch_distance_meters,
            check_interval: config.distance_check_interval(),
        }
    }

    /// Current placement state.
    #[must_use]
    pub fn state(&self) -> GeoPlacementState {
        self.state
    }

    /// Places fetched but not yet placed.
    #[must_use]
    pub fn pending_places(&self) -> &[PointOfInterest] {
        &self.pending
    }

    /// The selected categories.
    #[must_use]
    pub fn categories(&self) -> &CategoryFilter {
        &self.filter
    }

    /// Whether geospatial placement has been disabled for this session.
    #[must_use]
    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    /// Whether a fetch is running.
    #[must_use]
    pub fn is_fetching(&self) -> bool {
        self.fetch_in_flight
    }

    /// Change the selected categories, refetching if they changed.
    pub fn set_categories(&mut self, filter: CategoryFilter) {
        if self.filter.replace(filter) {
            tracing::info!("Category filter changed: {:?}", self.filter.as_slice());
            self.request_nearby_places();
        }
    }

    /// Fetch nearby places for the selected categories.
    ///
    /// With no category selected, every layer label is removed instead and
    /// no request is made.
    pub fn request_nearby_places(&mut self) {
        if self.disabled {
            return;
        }
        if self.filter.is_empty() {
            tracing::info!("No categories selected, clearing layer labels");
            self.pending.clear();
            self.state = GeoPlacementState::Idle;
            self.store.clear_layer_labels();
            // Outstanding fetches were for the old filter.
            self.fetch_sequence += 1;
            self.fetch_in_flight = false;
            return;
        }
        self.spawn_fetch(FetchMode::Explicit);
    }

    /// Refetch if the device has moved far from the last fetch.
    ///
    /// Checks at most once per interval; `now` is the frame time.
    pub fn monitor_distance(&mut self, now: Instant) {
        if self.disabled || self.filter.is_empty() || self.fetch_in_flight {
            return;
        }
        let due = self
            .last_distance_check
            .is_none_or(|t| now.saturating_duration_since(t) >= self.check_interval);
        if !due {
            return;
        }
        self.last_distance_check = Some(now);
        self.spawn_fetch(FetchMode::IfMoved);
    }

    fn spawn_fetch(&mut self, mode: FetchMode) {
        self.fetch_sequence += 1;
        self.fetch_in_flight = true;

        let sequence = self.fetch_sequence;
        let generation = self.spawner.generation();
        let categories = self.filter.as_slice().to_vec();
        let previous = self.last_fetch_location;
        let threshold = self.refetch_distance;
        let services = self.services.clone();
        let results = self.results.clone();

        self.spawner.spawn(async move {
            let result = fetch_nearby(&services, &categories, mode, previous, threshold).await;
            results.publish(GeoFetchOutcome {
                generation,
                sequence,
                result,
            });
        });
    }

    /// Consume a finished fetch, if any.
    pub fn poll_fetch(&mut self) {
        let Some(outcome) = self.results.take() else {
            return;
        };
        if outcome.generation != self.spawner.generation() || outcome.sequence != self.fetch_sequence
        {
            tracing::debug!("Discarding stale nearby-places result");
            return;
        }
        self.fetch_in_flight = false;

        match outcome.result {
            GeoFetchResult::Places { origin, places } => {
                tracing::info!("Received {} nearby places", places.len());
                self.last_fetch_location = Some(origin);
                self.events.emit(UiEvent::PlacesReceived {
                    count: places.len(),
                });
                self.pending = places;
                self.state = GeoPlacementState::AwaitingPlacement;
            }
            GeoFetchResult::Skipped => {}
            GeoFetchResult::LocationFailed(e) => {
                tracing::warn!("Location request failed: {e}");
                self.events.message(UserMessage::LocationUnavailable);
            }
            GeoFetchResult::PlacesFailed(e) => {
                tracing::warn!("Nearby places request failed: {e}");
                self.events
                    .message(UserMessage::NearbyPlacesFailed(e.to_string()));
            }
        }
    }

    /// Disable the engine if the device cannot do geospatial tracking.
    ///
    /// The unsupported event is emitted once. Returns whether the engine is
    /// still enabled.
    pub fn check_support<S: TrackingSession>(&mut self, session: &S) -> bool {
        if self.disabled {
            return false;
        }
        if session.is_geospatial_supported() {
            return true;
        }

        tracing::warn!("Geospatial mode not supported, disabling layer labels");
        self.disabled = true;
        self.pending.clear();
        self.state = GeoPlacementState::Idle;
        self.fetch_sequence += 1;
        self.fetch_in_flight = false;
        self.events.emit(UiEvent::GeospatialUnsupported);
        false
    }

    /// Place cached points once Earth tracking is valid.
    ///
    /// Points that already have a layer label are skipped. Returns the
    /// number of labels placed.
    pub fn try_place<S: TrackingSession>(&mut self, session: &mut S) -> usize {
        if self.disabled || self.state != GeoPlacementState::AwaitingPlacement {
            return 0;
        }
        if session.earth_tracking_state() != Some(TrackingState::Tracking) {
            return 0;
        }
        let Some(camera) = session.camera_geospatial_pose() else {
            return 0;
        };

        self.events.message(UserMessage::PlacingNearby);
        let places = std::mem::take(&mut self.pending);
        self.state = GeoPlacementState::Idle;

        let mut placed = 0;
        for point in &places {
            if self.store.contains_layer_label(&point.id) {
                continue;
            }
            match create_geo_anchor(session, &camera, point, self.altitude_offset) {
                Ok(anchor) => {
                    self.store.insert_layer_label(LayerLabel {
                        anchor,
                        place: PlaceAttributes::from_point(point),
                    });
                    self.events.emit(UiEvent::GeoAnchorPlaced {
                        id: point.id.clone(),
                        name: point.name.clone(),
                    });
                    placed += 1;
                }
                Err(e) => tracing::warn!("Failed to anchor '{}': {e}", point.name),
            }
        }
        tracing::info!("Placed {placed} of {} nearby places", places.len());
        placed
    }

    /// Forget outstanding fetches after background tasks were cancelled.
    pub fn on_tasks_cancelled(&mut self) {
        self.fetch_in_flight = false;
        self.results.clear();
    }

    /// Drop every cache and pending place for a session teardown.
    pub fn reset(&mut self) {
        self.on_tasks_cancelled();
        self.pending.clear();
        self.state = GeoPlacementState::Idle;
        self.services.location_cache.invalidate();
        self.last_fetch_location = None;
        self.last_distance_check = None;
        self.fetch_sequence += 1;
        self.disabled = false;
    }
}

/// Create an Earth anchor for a point, facing back toward the camera.
pub fn create_geo_anchor<S: TrackingSession>(
    session: &mut S,
    camera: &GeospatialPose,
    point: &PointOfInterest,
    altitude_offset: f64,
) -> Result<AnchorHandle, TrackingError> {
    let bearing = compute_bearing(
        camera.latitude,
        camera.longitude,
        point.location.lat,
        point.location.lng,
    );
    let rotation = heading_to_quaternion(corrected_heading(bearing));
    let altitude = camera.altitude - altitude_offset;
    tracing::debug!(
        "Creating anchor for '{}' at {}, {}, {altitude} (bearing {bearing:.1})",
        point.name,
        point.location.lat,
        point.location.lng
    );
    session.create_earth_anchor(point.location.lat, point.location.lng, altitude, rotation)
}

async fn fetch_nearby(
    services: &GeoServices,
    categories: &[String],
    mode: FetchMode,
    previous: Option<GeoLocation>,
    threshold: f64,
) -> GeoFetchResult {
    let location =
        match resolve_location(&services.location_cache, services.locations.as_ref()).await {
            Ok(location) => location,
            Err(_) if mode == FetchMode::IfMoved => return GeoFetchResult::Skipped,
            Err(e) => return GeoFetchResult::LocationFailed(e),
        };

    if mode == FetchMode::IfMoved {
        if let Some(previous) = previous {
            let distance = location.distance_to(&previous);
            tracing::debug!("Distance since last fetch: {distance:.0} m");
            if distance < threshold {
                return GeoFetchResult::Skipped;
            }
        }
    }

    match services
        .service
        .fetch_nearby_places(location, categories)
        .await
    {
        Ok(places) => GeoFetchResult::Places {
            origin: location,
            places,
        },
        Err(e) => GeoFetchResult::PlacesFailed(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{self, UiEvent};
    use crate::sim::{FixedLocationProvider, MockSiteService, SimSession};
    use std::future::Future;

    fn point(id: &str, lat: f64, lng: f64) -> PointOfInterest {
        PointOfInterest {
            id: id.to_string(),
            name: format!("Place {id}"),
            location: LatLng { lat, lng },
            ..PointOfInterest::default()
        }
    }

    struct Harness {
        engine: GeoAnchorPlacementEngine,
        store: Arc<AnchorStore>,
        service: Arc<MockSiteService>,
        locations: Arc<FixedLocationProvider>,
        events: async_channel::Receiver<UiEvent>,
    }

    fn harness(categories: &[&str]) -> Harness {
        let store = Arc::new(AnchorStore::new());
        let service = Arc::new(MockSiteService::new());
        let locations = Arc::new(FixedLocationProvider::new(GeoLocation::new(0.0, 0.0)));
        let (tx, rx) = events::channel();
        let config = Config {
            categories: categories.iter().map(ToString::to_string).collect(),
            ..Config::default()
        };
        let services = GeoServices {
            service: service.clone(),
            locations: locations.clone(),
            location_cache: Arc::new(LocationCache::new(config.location_cache_ttl())),
        };
        let engine = GeoAnchorPlacementEngine::new(
            store.clone(),
            services,
            TaskSpawner::try_current().unwrap(),
            tx,
            &config,
        );
        Harness {
            engine,
            store,
            service,
            locations,
            events: rx,
        }
    }

    async fn settle(engine: &mut GeoAnchorPlacementEngine) {
        for _ in 0..200 {
            engine.poll_fetch();
            if !engine.is_fetching() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("fetch never completed");
    }

    fn block_on<F: Future>(future: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap()
            .block_on(future)
    }

    #[test]
    fn test_category_filter_dedupes() {
        let mut filter = CategoryFilter::new(["cafe", " cafe ", "", "bar"]);
        assert_eq!(filter.as_slice(), ["cafe", "bar"]);
        assert!(!filter.insert("bar"));
        assert!(filter.remove("cafe"));
        assert!(!filter.remove("cafe"));
        assert!(filter.replace(CategoryFilter::new(["museum"])));
        assert!(!filter.replace(CategoryFilter::new(["museum"])));
    }

    #[test]
    fn test_place_attributes_order() {
        let mut poi = point("p1", 1.5, 2.5);
        poi.rating = Some(4.25);
        poi.address = Some("1 Main St".to_string());
        poi.opening_hours = Some(OpeningHours {
            open_now: true,
            weekday_text: vec!["Mon: 9-5".to_string()],
        });
        let attributes = PlaceAttributes::from_point(&poi);

        let keys: Vec<_> = attributes.iter().map(|(k, _)| k).collect();
        assert_eq!(
            keys,
            ["place_id", "name", "location", "rating", "address", "opening_hours"]
        );
        assert_eq!(attributes.get("opening_hours"), Some("Open; Mon: 9-5"));
        assert_eq!(attributes.get("location"), Some("1.5,2.5"));
        assert_eq!(attributes.id(), "p1");
    }

    #[test]
    fn test_decode_point_of_interest() {
        let json = r#"{
            "place_id": "ChIJ1",
            "name": "Cafe Landwer",
            "location": {"lat": 32.1, "lng": 34.8},
            "rating": 4.3,
            "type": "cafe",
            "business_status": "OPERATIONAL",
            "opening_hours": {"open_now": false, "weekday_text": []},
            "reviews": [{"author": "x"}]
        }"#;
        let poi: PointOfInterest = serde_json::from_str(json).unwrap();
        assert_eq!(poi.id, "ChIJ1");
        assert_eq!(poi.place_type.as_deref(), Some("cafe"));
        assert!(!poi.opening_hours.unwrap().open_now);
        assert!(poi.website.is_none());
    }

    #[test]
    fn test_location_cache_throttles() {
        let cache = LocationCache::new(Duration::from_secs(30));
        let start = Instant::now();
        assert!(cache.fresh(start).is_none());

        cache.store(GeoLocation::new(1.0, 2.0), start);
        assert!(cache.fresh(start + Duration::from_secs(29)).is_some());
        assert!(cache.fresh(start + Duration::from_secs(30)).is_none());
        assert!(cache.last_known().is_some());

        cache.invalidate();
        assert!(cache.last_known().is_none());
    }

    #[test]
    fn test_resolve_location_reuses_fresh_fix() {
        let cache = LocationCache::new(Duration::from_secs(30));
        let provider = FixedLocationProvider::new(GeoLocation::new(5.0, 6.0));

        let first = block_on(resolve_location(&cache, &provider)).unwrap();
        let second = block_on(resolve_location(&cache, &provider)).unwrap();
        assert_eq!(first, second);
        assert_eq!(provider.calls(), 1);
    }

    #[test]
    fn test_resolve_location_failure_evicts() {
        let cache = LocationCache::new(Duration::ZERO);
        let provider = FixedLocationProvider::new(GeoLocation::new(5.0, 6.0));
        block_on(resolve_location(&cache, &provider)).unwrap();
        assert!(cache.last_known().is_some());

        provider.fail("gps off");
        assert!(block_on(resolve_location(&cache, &provider)).is_err());
        assert!(cache.last_known().is_none());
    }

    #[test]
    fn test_create_geo_anchor_faces_viewer() {
        let mut session = SimSession::new();
        let camera = GeospatialPose {
            latitude: 0.0,
            longitude: 0.0,
            altitude: 10.0,
            heading: 0.0,
        };
        create_geo_anchor(&mut session, &camera, &point("east", 0.0, 90.0), 0.5).unwrap();

        let (lat, lng, altitude, rotation) = session.earth_anchor_requests()[0];
        assert!((lat - 0.0).abs() < 1e-9 && (lng - 90.0).abs() < 1e-9);
        assert!((altitude - 9.5).abs() < 1e-9);
        let expected = heading_to_quaternion(270.0);
        assert!(rotation.dot(expected).abs() > 1.0 - 1e-5);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_placement_waits_for_earth_tracking() {
        let mut h = harness(&["cafe"]);
        h.service
            .set_places(vec![point("a", 0.0001, 0.0), point("b", 0.0, 0.0001)]);
        let mut session = SimSession::new();
        session.set_earth_tracking(Some(TrackingState::Paused));

        h.engine.request_nearby_places();
        settle(&mut h.engine).await;
        assert_eq!(h.engine.state(), GeoPlacementState::AwaitingPlacement);
        assert_eq!(h.engine.pending_places().len(), 2);

        // Not tracking yet: nothing is created even though places are cached.
        assert_eq!(h.engine.try_place(&mut session), 0);
        assert!(session.earth_anchor_requests().is_empty());
        assert_eq!(h.engine.state(), GeoPlacementState::AwaitingPlacement);

        session.set_earth_tracking(Some(TrackingState::Tracking));
        assert_eq!(h.engine.try_place(&mut session), 2);
        assert_eq!(h.engine.state(), GeoPlacementState::Idle);
        assert_eq!(h.store.layer_labels().len(), 2);

        let events = events::drain(&h.events);
        assert!(events.contains(&UiEvent::PlacesReceived { count: 2 }));
        assert!(events.contains(&UiEvent::Message(UserMessage::PlacingNearby)));
        assert!(events.iter().any(|e| matches!(e, UiEvent::GeoAnchorPlaced { id, .. } if id == "b")));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_refetch_does_not_duplicate_labels() {
        let mut h = harness(&["cafe"]);
        h.service.set_places(vec![point("a", 0.0001, 0.0)]);
        let mut session = SimSession::new();

        for _ in 0..2 {
            h.engine.request_nearby_places();
            settle(&mut h.engine).await;
            h.engine.try_place(&mut session);
        }
        assert_eq!(h.store.layer_labels().len(), 1);
        assert_eq!(session.earth_anchor_requests().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_empty_filter_clears_without_request() {
        let mut h = harness(&["cafe"]);
        h.service.set_places(vec![point("a", 0.0001, 0.0)]);
        let mut session = SimSession::new();
        h.engine.request_nearby_places();
        settle(&mut h.engine).await;
        h.engine.try_place(&mut session);
        assert_eq!(h.store.layer_labels().len(), 1);
        let requests = h.service.nearby_requests();

        h.engine.set_categories(CategoryFilter::default());
        assert!(h.store.layer_labels().is_empty());
        assert_eq!(h.engine.state(), GeoPlacementState::Idle);
        assert!(!h.engine.is_fetching());
        assert_eq!(h.service.nearby_requests(), requests);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_fetch_failure_keeps_state() {
        let mut h = harness(&["cafe"]);
        h.service.fail_places("server down");
        h.engine.request_nearby_places();
        settle(&mut h.engine).await;

        assert_eq!(h.engine.state(), GeoPlacementState::Idle);
        let events = events::drain(&h.events);
        assert!(events.iter().any(|e| matches!(
            e,
            UiEvent::Message(UserMessage::NearbyPlacesFailed(detail)) if detail.contains("server down")
        )));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_location_failure_reported() {
        let mut h = harness(&["cafe"]);
        h.locations.fail("no fix");
        h.engine.request_nearby_places();
        settle(&mut h.engine).await;

        assert_eq!(
            events::drain(&h.events),
            vec![UiEvent::Message(UserMessage::LocationUnavailable)]
        );
        assert_eq!(h.service.nearby_requests(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_distance_monitor_refetches_after_moving() {
        let mut h = harness(&["cafe"]);
        h.service.set_places(vec![point("a", 0.0001, 0.0)]);
        let start = Instant::now();

        // No fetch yet, so the first check fetches.
        h.engine.monitor_distance(start);
        settle(&mut h.engine).await;
        assert_eq!(h.service.nearby_requests(), 1);

        // Within the interval nothing happens.
        h.engine.monitor_distance(start + Duration::from_secs(10));
        assert!(!h.engine.is_fetching());

        // Moved about 110 m: below the threshold.
        h.engine.services.location_cache.invalidate();
        h.locations.set_location(GeoLocation::new(0.001, 0.0));
        h.engine.monitor_distance(start + Duration::from_secs(31));
        settle(&mut h.engine).await;
        assert_eq!(h.service.nearby_requests(), 1);

        // Moved about 1.1 km: refetch.
        h.engine.services.location_cache.invalidate();
        h.locations.set_location(GeoLocation::new(0.01, 0.0));
        h.engine.monitor_distance(start + Duration::from_secs(62));
        settle(&mut h.engine).await;
        assert_eq!(h.service.nearby_requests(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_unsupported_reported_once() {
        let mut h = harness(&["cafe"]);
        let mut session = SimSession::new();
        session.set_geospatial_supported(false);

        assert!(!h.engine.check_support(&session));
        assert!(!h.engine.check_support(&session));
        assert!(h.engine.is_disabled());

        h.engine.request_nearby_places();
        assert!(!h.engine.is_fetching());
        assert_eq!(h.engine.try_place(&mut session), 0);
        assert_eq!(
            events::drain(&h.events),
            vec![UiEvent::GeospatialUnsupported]
        );
    }
}
