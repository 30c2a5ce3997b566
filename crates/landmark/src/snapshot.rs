//! Freezing a frame and sending it off for analysis.
//!
//! Capturing a snapshot records the camera state on the frame thread and
//! copies the camera image out of the engine. Everything after that runs in
//! a background task: the image is converted and written as a JPEG, then
//! uploaded to the analysis service under a deadline. The result comes back
//! through a [`LatestSlot`] tagged with the scan it belongs to.

use std::{path::PathBuf, sync::Arc, time::Duration};

use glam::Mat4;

use crate::camera_image::CameraImage;
use crate::config::Config;
use crate::error::ScanError;
use crate::events::UserMessage;
use crate::geometry::Pose;
use crate::runtime::{LatestSlot, TaskSpawner};
use crate::service::{AnalysisResult, SiteService};
use crate::tracking::TrackingFrame;

/// Camera state frozen at the instant a scan was requested.
#[derive(Debug, PartialEq)]
pub struct Snapshot {
    /// Frame timestamp in nanoseconds.
    pub timestamp: i64,
    /// World pose of the camera.
    pub camera_pose: Pose,
    /// World-to-camera matrix.
    pub view_matrix: Mat4,
    /// Projection matrix.
    pub projection_matrix: Mat4,
}

impl Snapshot {
    /// Record the camera state of a frame.
    #[must_use]
    pub fn capture<F: TrackingFrame>(frame: &F, near: f32, far: f32) -> Self {
        Self {
            timestamp: frame.timestamp(),
            camera_pose: frame.camera_pose(),
            view_matrix: frame.view_matrix(),
            projection_matrix: frame.projection_matrix(near, far),
        }
    }
}

/// A scan whose analysis is still running.
///
/// Owns the snapshot until the analysis result is placed.
#[derive(Debug)]
pub struct PendingScan {
    /// Identifier matching the eventual [`ScanOutcome`].
    pub id: u64,
    /// The frozen camera state.
    pub snapshot: Snapshot,
}

/// The finished analysis of a scan.
#[derive(Debug)]
pub struct ScanOutcome {
    /// The scan this outcome belongs to.
    pub scan_id: u64,
    /// Result of the analysis.
    pub result: Result<AnalysisResult, ScanError>,
    generation: u64,
}

/// Captures snapshots and runs their analysis in the background.
pub struct SnapshotCapture {
    spawner: TaskSpawner,
    service: Arc<dyn SiteService>,
    results: LatestSlot<ScanOutcome>,
    next_id: u64,
    snapshot_dir: PathBuf,
    jpeg_quality: u8,
    timeout: Duration,
    near_plane: f32,
    far_plane: f32,
}

impl SnapshotCapture {
    /// Create a capture pipeline.
    #[must_use]
    pub fn new(spawner: TaskSpawner, service: Arc<dyn SiteService>, config: &Config) -> Self {
        Self {
            spawner,
            service,
            results: LatestSlot::new(),
            next_id: 0,
            snapshot_dir: config.snapshot_dir.clone(),
            jpeg_quality: config.jpeg_quality,
            timeout: config.analysis_timeout(),
            near_plane: config.near_plane,
            far_plane: config.far_plane,
        }
    }

    /// Freeze the frame and start analyzing its camera image.
    ///
    /// Fails without spawning anything if the frame has no camera image.
    pub fn capture<F: TrackingFrame>(&mut self, frame: &F) -> Result<PendingScan, ScanError> {
        let image = frame
            .acquire_camera_image()
            .map_err(ScanError::CameraImage)?;
        let snapshot = Snapshot::capture(frame, self.near_plane, self.far_plane);

        self.next_id += 1;
        let scan_id = self.next_id;
        let generation = self.spawner.generation();
        let path = self
            .snapshot_dir
            .join(format!("snapshot_{scan_id}_{}.jpg", snapshot.timestamp));
        let service = self.service.clone();
        let results = self.results.clone();
        let quality = self.jpeg_quality;
        let timeout = self.timeout;

        tracing::info!("Captured snapshot {scan_id} at {}", snapshot.timestamp);
        self.spawner.spawn(async move {
            let result = analyze_image(service.as_ref(), image, path, quality, timeout).await;
            if results.publish(ScanOutcome {
                scan_id,
                result,
                generation,
            }) {
                tracing::debug!("Unread scan outcome replaced by scan {scan_id}");
            }
        });

        Ok(PendingScan {
            id: scan_id,
            snapshot,
        })
    }

    /// Take a finished outcome, dropping it if it predates a cancellation.
    #[must_use]
    pub fn poll(&self) -> Option<ScanOutcome> {
        let outcome = self.results.take()?;
        if outcome.generation != self.spawner.generation() {
            tracing::debug!("Discarding scan {} from a cancelled generation", outcome.scan_id);
            return None;
        }
        Some(outcome)
    }

    /// Drop any unread outcome.
    pub fn clear(&self) {
        self.results.clear();
    }
}

/// Convert, store and analyze a camera image.
///
/// The analysis call races `timeout`; whichever finishes first wins.
pub async fn analyze_image(
    service: &dyn SiteService,
    image: CameraImage,
    path: PathBuf,
    quality: u8,
    timeout: Duration,
) -> Result<AnalysisResult, ScanError> {
    let write_path = path.clone();
    tokio::task::spawn_blocking(move || image.write_jpeg(&write_path, quality))
        .await
        .map_err(|e| ScanError::Worker(e.to_string()))??;
    tracing::debug!("Wrote snapshot to {}", path.display());

    tokio::select! {
        result = service.analyze(&path) => result.map_err(ScanError::from),
        () = tokio::time::sleep(timeout) => {
            tracing::warn!("Analysis of {} timed out after {timeout:?}", path.display());
            Err(ScanError::Timeout)
        }
    }
}

/// The message shown when a scan fails before placement.
#[must_use]
pub fn failure_message(error: &ScanError) -> UserMessage {
    match error {
        ScanError::CameraImage(_) => UserMessage::CameraImageUnavailable,
        ScanError::Timeout => UserMessage::RequestTimedOut,
        ScanError::Service(e) => UserMessage::AnalysisFailed(e.to_string()),
        ScanError::InvalidImage { .. }
        | ScanError::Encode(_)
        | ScanError::Io(_)
        | ScanError::Worker(_) => UserMessage::CaptureFailed(error.to_string()),
    }
}
