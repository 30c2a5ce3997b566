//! Headless landmark session.
//!
//! Drives the frame loop against the scripted tracking engine: the camera
//! sways around its starting heading, a scan is requested a third of the way
//! in, the screen centre is tapped later on, and nearby places are scattered
//! ahead of the device for the selected categories.

mod params;

use std::{sync::Arc, time::Duration};

use glam::{Quat, Vec3};
use landmark::{
    Collaborators, FrameOrchestrator, GeoLocation, RenderResult, SiteService, TaskSpawner,
    UiEvent,
    geo::{LatLng, PointOfInterest},
    geometry::Pose,
    sim::{FixedLocationProvider, MockSiteService, SimRenderer, SimSession, sample_details},
    tracking::GeospatialPose,
};
use landmark_client::HttpSiteService;
use params::LaunchParams;
use rand::Rng;

/// Simulated frame interval.
const FRAME_INTERVAL: Duration = Duration::from_millis(33);
/// Simulated screen size in pixels.
const SCREEN_SIZE: (f32, f32) = (1080.0, 1920.0);
/// Device altitude in meters.
const DEVICE_ALTITUDE: f64 = 170.0;

/// Scatter places a few hundred meters ahead (north) of the device.
fn scatter_places(
    rng: &mut impl Rng,
    lat: f64,
    lon: f64,
    count: usize,
    categories: &[String],
) -> Vec<PointOfInterest> {
    (0..count)
        .map(|i| PointOfInterest {
            id: format!("sim-place-{i}"),
            name: format!("Place {}", i + 1),
            location: LatLng {
                lat: lat + rng.random_range(0.0005..0.002),
                lng: lon + rng.random_range(-0.0005..0.0005),
            },
            rating: Some(rng.random_range(3.0..5.0)),
            place_type: categories.get(i % categories.len().max(1)).cloned(),
            ..PointOfInterest::default()
        })
        .collect()
}

/// Camera yaw in radians, swaying slowly around the starting heading.
#[allow(clippy::cast_possible_truncation)]
fn sway(frame: u32) -> f32 {
    ((f64::from(frame) * 0.02).sin() * 0.2) as f32
}

fn log_event(event: &UiEvent) {
    match event {
        UiEvent::Message(message) => tracing::warn!("Message: {message}"),
        UiEvent::AnchorClicked {
            site_name,
            description,
            ..
        } => tracing::info!(
            "Tapped '{site_name}': {}",
            description.as_deref().unwrap_or("(loading)")
        ),
        other => tracing::info!("{other:?}"),
    }
}

fn site_service(params: &LaunchParams, rng: &mut impl Rng) -> Arc<dyn SiteService> {
    if let Some(base_url) = &params.backend {
        tracing::info!("Using backend at {base_url}");
        return Arc::new(HttpSiteService::new().with_base_url(base_url.clone()));
    }

    let service = MockSiteService::new()
        .with_analysis_delay(Duration::from_millis(params.mock_delay_ms));
    service.insert_details(sample_details());
    service.set_places(scatter_places(
        rng,
        params.lat,
        params.lon,
        params.places,
        &params.config.categories,
    ));
    Arc::new(service)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    {
        use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
        tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer())
            .with(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .init();
    }

    let params = params::parse()?;
    let mut rng = rand::rng();

    let mut session = SimSession::new();
    session.set_geospatial_pose(Some(GeospatialPose {
        latitude: params.lat,
        longitude: params.lon,
        altitude: DEVICE_ALTITUDE,
        heading: 0.0,
    }));

    let collaborators = Collaborators {
        site_service: site_service(&params, &mut rng),
        locations: Arc::new(FixedLocationProvider::new(GeoLocation::new(
            params.lat, params.lon,
        ))),
    };
    let spawner = TaskSpawner::try_current().ok_or("no tokio runtime")?;
    let (mut orchestrator, handle, events) = FrameOrchestrator::new(
        session,
        SimRenderer::new(),
        collaborators,
        spawner,
        params.config,
    )?;
    handle.set_screen_size(SCREEN_SIZE.0, SCREEN_SIZE.1);

    let scan_frame = params.frames / 3;
    let touch_frame = params.frames * 2 / 3;
    let mut last_result = RenderResult::Success;

    tracing::info!(
        "Simulating {} frames at {}, {}",
        params.frames,
        params.lat,
        params.lon
    );
    for frame in 0..params.frames {
        let jitter = Vec3::new(
            rng.random_range(-0.002..0.002),
            rng.random_range(-0.002..0.002),
            rng.random_range(-0.002..0.002),
        );
        if let Some(session) = orchestrator.session_mut() {
            session.set_camera_pose(Pose::new(jitter, Quat::from_rotation_y(sway(frame))));
        }

        if frame == scan_frame {
            tracing::info!("Requesting scan");
            handle.request_scan();
        }
        if frame == touch_frame {
            tracing::info!("Tapping the screen centre");
            handle.handle_touch(SCREEN_SIZE.0 / 2.0, SCREEN_SIZE.1 / 2.0 - 80.0);
        }

        let result = orchestrator.on_draw_frame();
        if result != last_result {
            tracing::debug!("Frame {frame}: {result:?}");
            last_result = result;
        }
        for event in landmark::events::drain(&events) {
            log_event(&event);
        }

        tokio::time::sleep(FRAME_INTERVAL).await;
    }

    tracing::info!(
        "Finished with {} anchors and {} layer labels, {} frames drawn",
        orchestrator.store().anchor_count(),
        orchestrator.store().layer_labels().len(),
        orchestrator.renderer().frames_drawn()
    );
    orchestrator.teardown();
    for event in landmark::events::drain(&events) {
        log_event(&event);
    }
    Ok(())
}
