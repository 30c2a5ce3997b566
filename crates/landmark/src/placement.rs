//! Placing labeled anchors from analyzed snapshots.
//!
//! A recognized site comes back as a normalized point in the snapshot image.
//! The point is turned into a ray from the snapshot's camera, the live
//! environment is hit-tested to find how far along the ray the site is, and
//! a tracked anchor is created there. The label starts as a loading
//! placeholder and is refined once the site details arrive.

use std::sync::Arc;

use glam::{Vec2, Vec3};

use crate::error::PlacementError;
use crate::geometry::{Pose, normalize, normalized_to_camera_ray};
use crate::runtime::TaskSpawner;
use crate::service::{AnalysisResult, SiteService};
use crate::snapshot::Snapshot;
use crate::store::{AnchorStore, LabeledAnchor};
use crate::tracking::{TrackingFrame, TrackingSession};

/// Descriptions up to this many characters are shown whole.
pub const PREVIEW_MAX_CHARS: usize = 200;

/// The fields of an analysis result needed to place an anchor.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectedSite {
    /// Site identifier.
    pub site_id: String,
    /// Site name; becomes the label title.
    pub site_name: String,
    /// Normalized point in the snapshot image.
    pub point: Vec2,
}

impl DetectedSite {
    /// Extract the placement fields, failing on the first one missing.
    pub fn from_analysis(result: &AnalysisResult) -> Result<Self, PlacementError> {
        let info = result
            .site_information
            .as_ref()
            .ok_or(PlacementError::MissingField("siteInformation"))?;
        let x = info.x.ok_or(PlacementError::MissingField("x"))?;
        let y = info.y.ok_or(PlacementError::MissingField("y"))?;
        let site_name = non_blank(info.site_name.as_deref())
            .ok_or(PlacementError::MissingField("siteName"))?;
        let site_id = non_blank(result.site_info_id.as_deref())
            .ok_or(PlacementError::MissingField("siteInfoId"))?;

        Ok(Self {
            site_id: site_id.to_string(),
            site_name: site_name.to_string(),
            point: Vec2::new(x, y),
        })
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

/// Find the world position of a normalized snapshot point.
///
/// The ray is built in the snapshot camera's frame. The depth is the distance
/// of the first environment hit in the live frame, or `default_depth` when
/// nothing is hit.
pub fn compute_world_position<F: TrackingFrame>(
    snapshot: &Snapshot,
    point: Vec2,
    frame: &F,
    default_depth: f32,
) -> Vec3 {
    let pose = &snapshot.camera_pose;
    let direction = normalize(pose.rotate_vector(normalized_to_camera_ray(point)))
        .unwrap_or_else(|| pose.forward());

    let pixel = frame.image_dimensions().to_pixels(point);
    let view_point = frame.image_pixels_to_view(pixel);
    let depth = match frame.hit_test(view_point).first() {
        Some(hit) => {
            tracing::debug!("Hit test succeeded at {:.2} m", hit.distance);
            hit.distance
        }
        None => {
            tracing::debug!("Hit test found nothing, using {default_depth} m");
            default_depth
        }
    };

    pose.translation + direction * depth
}

/// Shorten a site description into a one-line label preview.
#[must_use]
pub fn extract_preview(description: &str) -> String {
    if description.is_empty() {
        return String::new();
    }

    let sentence_end = description
        .char_indices()
        .enumerate()
        .find(|(_, (_, c))| matches!(c, '.' | '!' | '?'));
    if let Some((position, (byte, c))) = sentence_end {
        if position < PREVIEW_MAX_CHARS {
            return description[..byte + c.len_utf8()].trim().to_string();
        }
    }

    let line_end = description
        .char_indices()
        .enumerate()
        .find(|(_, (_, c))| *c == '\n');
    if let Some((position, (byte, _))) = line_end {
        if position < PREVIEW_MAX_CHARS {
            return description[..byte].trim().to_string();
        }
    }

    if let Some((cut, _)) = description.char_indices().nth(PREVIEW_MAX_CHARS) {
        let head = &description[..cut];
        let head = match head.rfind(' ') {
            Some(space) if space > 0 => &head[..space],
            _ => head,
        };
        return format!("{}...", head.trim());
    }

    description.trim().to_string()
}

/// Creates labeled anchors from analysis results.
pub struct AnchorPlacementEngine {
    store: Arc<AnchorStore>,
    service: Arc<dyn SiteService>,
    spawner: TaskSpawner,
    default_depth: f32,
}

impl AnchorPlacementEngine {
    /// Create an engine that inserts into `store`.
    #[must_use]
    pub fn new(
        store: Arc<AnchorStore>,
        service: Arc<dyn SiteService>,
        spawner: TaskSpawner,
        default_depth: f32,
    ) -> Self {
        Self {
            store,
            service,
            spawner,
            default_depth,
        }
    }

    /// Place an anchor for an analysis result and insert it into the store.
    ///
    /// Consumes the snapshot. On success a detail fetch is started that
    /// later refines the label in place.
    pub fn place<S: TrackingSession>(
        &self,
        session: &mut S,
        frame: &S::Frame,
        snapshot: Snapshot,
        result: &AnalysisResult,
    ) -> Result<LabeledAnchor, PlacementError> {
        let site = DetectedSite::from_analysis(result)?;
        let position = compute_world_position(&snapshot, site.point, frame, self.default_depth);
        let anchor = session.create_anchor(Pose::from_translation(position))?;
        tracing::info!("Placed '{}' at {position}", site.site_name);

        let labeled = LabeledAnchor::loading(anchor, &site.site_name, Some(site.site_id.clone()));
        self.store.insert(labeled.clone());
        self.fetch_details(site.site_id, site.site_name);
        Ok(labeled)
    }

    fn fetch_details(&self, site_id: String, site_name: String) {
        let service = self.service.clone();
        let store = self.store.clone();
        let spawner = self.spawner.clone();
        let generation = spawner.generation();

        self.spawner.spawn(async move {
            let details = match service.fetch_site_details(&site_id).await {
                Ok(details) => details,
                Err(e) => {
                    tracing::warn!("Failed to fetch details for {site_id}: {e}");
                    return;
                }
            };
            if spawner.generation() != generation {
                return;
            }
            let preview = extract_preview(&details.description);
            if store.update_details(&site_name, &preview, &details.description) {
                tracing::debug!("Updated '{site_name}' with details");
            } else {
                tracing::debug!("'{site_name}' was removed before its details arrived");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TrackingError;
    use crate::service::SiteInformation;
    use crate::sim::{MockSiteService, SimSession};
    use glam::Quat;
    use std::time::Duration;

    const EPSILON: f32 = 1e-4;

    fn analysis(x: f32, y: f32) -> AnalysisResult {
        AnalysisResult {
            status: "assume".to_string(),
            description: None,
            site_information: Some(SiteInformation {
                label: Some("monument".to_string()),
                x: Some(x),
                y: Some(y),
                site_name: Some("Colosseum".to_string()),
            }),
            site_info_id: Some("site-1".to_string()),
        }
    }

    fn snapshot_at(pose: Pose) -> Snapshot {
        Snapshot {
            timestamp: 0,
            camera_pose: pose,
            view_matrix: pose.view_matrix(),
            projection_matrix: glam::Mat4::IDENTITY,
        }
    }

    #[test]
    fn test_preview_first_sentence() {
        assert_eq!(
            extract_preview("An amphitheatre. Built in 80 AD."),
            "An amphitheatre."
        );
        assert_eq!(extract_preview("Is it big? Yes."), "Is it big?");
        assert_eq!(extract_preview(""), "");
    }

    #[test]
    fn test_preview_first_line() {
        let description = format!("Intro line\n{}", "word ".repeat(60));
        assert_eq!(extract_preview(&description), "Intro line");
    }

    #[test]
    fn test_preview_truncates_at_word() {
        let description = "word ".repeat(60);
        let preview = extract_preview(&description);
        assert!(preview.ends_with("..."));
        assert!(preview.chars().count() <= PREVIEW_MAX_CHARS + 3);
        assert!(!preview.contains("wor..."));
    }

    #[test]
    fn test_preview_late_sentence_end_is_ignored() {
        let description = format!("{}.", "a".repeat(250));
        assert_eq!(extract_preview(&description), format!("{}...", "a".repeat(200)));
    }

    #[test]
    fn test_preview_short_unpunctuated() {
        assert_eq!(extract_preview("  Rome landmark  "), "Rome landmark");
    }

    #[test]
    fn test_missing_fields() {
        let mut result = analysis(0.5, 0.5);
        result.site_info_id = Some("   ".to_string());
        assert!(matches!(
            DetectedSite::from_analysis(&result),
            Err(PlacementError::MissingField("siteInfoId"))
        ));

        let mut result = analysis(0.5, 0.5);
        if let Some(info) = result.site_information.as_mut() {
            info.y = None;
        }
        assert!(matches!(
            DetectedSite::from_analysis(&result),
            Err(PlacementError::MissingField("y"))
        ));

        assert!(matches!(
            DetectedSite::from_analysis(&AnalysisResult::default()),
            Err(PlacementError::MissingField("siteInformation"))
        ));
    }

    #[test]
    fn test_center_point_without_hit_uses_default_depth() {
        let mut session = SimSession::new();
        session.set_hit_distances(Vec::new());
        let frame = session.update().unwrap();

        let position =
            compute_world_position(&snapshot_at(Pose::IDENTITY), Vec2::splat(0.5), &frame, 2.0);
        assert!(position.abs_diff_eq(Vec3::new(0.0, 0.0, -2.0), EPSILON));
    }

    #[test]
    fn test_hit_distance_sets_depth() {
        let mut session = SimSession::new();
        session.set_hit_distances(vec![3.5, 8.0]);
        let frame = session.update().unwrap();

        let position =
            compute_world_position(&snapshot_at(Pose::IDENTITY), Vec2::splat(0.5), &frame, 2.0);
        assert!(position.abs_diff_eq(Vec3::new(0.0, 0.0, -3.5), EPSILON));
    }

    #[test]
    fn test_ray_uses_snapshot_pose() {
        let mut session = SimSession::new();
        session.set_hit_distances(Vec::new());
        let frame = session.update().unwrap();

        // Turned 90 degrees left and moved: forward is now -X.
        let pose = Pose::new(
            Vec3::new(1.0, 1.5, 0.0),
            Quat::from_rotation_y(std::f32::consts::FRAC_PI_2),
        );
        let position = compute_world_position(&snapshot_at(pose), Vec2::splat(0.5), &frame, 2.0);
        assert!(position.abs_diff_eq(Vec3::new(-1.0, 1.5, 0.0), EPSILON));

        // The top-left corner ray leans left and up.
        let corner = compute_world_position(
            &snapshot_at(Pose::IDENTITY),
            Vec2::ZERO,
            &frame,
            2.0_f32.sqrt() * 3.0_f32.sqrt(),
        );
        assert!(corner.abs_diff_eq(Vec3::new(-1.0, 1.0, -1.0) * 2.0_f32.sqrt(), EPSILON));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_place_inserts_and_refines_label() {
        let store = Arc::new(AnchorStore::new());
        let service = Arc::new(MockSiteService::new());
        service.insert_details(crate::service::SiteDetails {
            id: "site-1".to_string(),
            name: "Colosseum".to_string(),
            description: "An oval amphitheatre. In Rome.".to_string(),
            ..Default::default()
        });
        let engine = AnchorPlacementEngine::new(
            store.clone(),
            service,
            TaskSpawner::try_current().unwrap(),
            2.0,
        );
        let mut session = SimSession::new();
        session.set_hit_distances(Vec::new());
        let frame = session.update().unwrap();
        let snapshot = Snapshot::capture(&frame, 0.01, 100.0);

        let placed = engine
            .place(&mut session, &frame, snapshot, &analysis(0.5, 0.5))
            .unwrap();
        assert_eq!(placed.label, "Colosseum||Loading...");
        assert!(placed.anchor.pose().translation.abs_diff_eq(Vec3::new(0.0, 0.0, -2.0), EPSILON));
        assert_eq!(store.anchor_count(), 1);

        for _ in 0..200 {
            if store.get("Colosseum").unwrap().full_description.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let refined = store.get("Colosseum").unwrap();
        assert_eq!(refined.label, "Colosseum||An oval amphitheatre.");
        assert_eq!(
            refined.full_description.as_deref(),
            Some("An oval amphitheatre. In Rome.")
        );
        assert!(Arc::ptr_eq(&refined.anchor, &placed.anchor));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_failed_detail_fetch_keeps_placeholder() {
        let store = Arc::new(AnchorStore::new());
        let engine = AnchorPlacementEngine::new(
            store.clone(),
            Arc::new(MockSiteService::new()),
            TaskSpawner::try_current().unwrap(),
            2.0,
        );
        let mut session = SimSession::new();
        let frame = session.update().unwrap();
        let snapshot = Snapshot::capture(&frame, 0.01, 100.0);

        engine
            .place(&mut session, &frame, snapshot, &analysis(0.5, 0.5))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(store.get("Colosseum").unwrap().label, "Colosseum||Loading...");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_anchor_creation_failure() {
        let store = Arc::new(AnchorStore::new());
        let engine = AnchorPlacementEngine::new(
            store.clone(),
            Arc::new(MockSiteService::new()),
            TaskSpawner::try_current().unwrap(),
            2.0,
        );
        let mut session = SimSession::new();
        session.fail_anchor_creation(Some(TrackingError::AnchorCreation("no map".to_string())));
        let frame = session.update().unwrap();
        let snapshot = Snapshot::capture(&frame, 0.01, 100.0);

        let err = engine
            .place(&mut session, &frame, snapshot, &analysis(0.5, 0.5))
            .unwrap_err();
        assert!(matches!(err, PlacementError::AnchorCreation(_)));
        assert_eq!(store.anchor_count(), 0);
    }
}
