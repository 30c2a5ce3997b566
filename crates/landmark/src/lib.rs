//! Anchor placement and frame orchestration for camera-tracked AR sessions.
//!
//! A session turns camera snapshots into labelled anchors: the snapshot is
//! analyzed in the background, the recognized site is projected back into the
//! world from the camera pose frozen at capture time, and a label is drawn
//! there every frame. Nearby points of interest are placed as geospatial
//! layer labels, and touches on the screen resolve to the label under them.
//!
//! The tracking engine, renderer and network are all behind traits, so the
//! same loop runs against a real device or the scripted engine in [`sim`].
//!
//! # Example
//!
//! ```ignore
//! let (mut orchestrator, handle, events) =
//!     FrameOrchestrator::new(session, renderer, collaborators, spawner, Config::default())?;
//!
//! handle.set_screen_size(1080.0, 1920.0);
//! handle.request_scan();
//! loop {
//!     orchestrator.on_draw_frame();
//!     for event in landmark::events::drain(&events) {
//!         // update the UI
//!     }
//! }
//! ```

pub mod camera_image;
pub mod config;
pub mod error;
pub mod events;
pub mod geo;
pub mod geometry;
pub mod orchestrator;
pub mod placement;
pub mod render;
pub mod runtime;
pub mod service;
pub mod sim;
pub mod snapshot;
pub mod store;
pub mod touch;
pub mod tracking;

pub use config::Config;
pub use events::{UiEvent, UserMessage};
pub use orchestrator::{Collaborators, FrameOrchestrator, SessionHandle};
pub use render::{RenderResult, SceneRenderer};
pub use runtime::TaskSpawner;
pub use service::{GeoLocation, LocationProvider, SiteService};
pub use tracking::{TrackedAnchor, TrackingFrame, TrackingSession, TrackingState};
