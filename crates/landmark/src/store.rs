//! The shared collection of placed anchors.
//!
//! Snapshot anchors are keyed by their label title (the site name); geo
//! layer labels are keyed by place id. Both live behind one coarse lock that
//! the frame thread and background completions share. Readers take a
//! point-in-time copy instead of iterating under the lock.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::geo::PlaceAttributes;
use crate::tracking::AnchorHandle;

/// Separator between a label's title and its preview text.
pub const LABEL_DELIMITER: &str = "||";

/// Preview text shown until site details arrive.
pub const LOADING_PREVIEW: &str = "Loading...";

/// Join a title and preview into a display label.
#[must_use]
pub fn compose_label(title: &str, preview: &str) -> String {
    format!("{title}{LABEL_DELIMITER}{preview}")
}

/// Split a display label into its title and optional preview.
#[must_use]
pub fn split_label(label: &str) -> (&str, Option<&str>) {
    match label.split_once(LABEL_DELIMITER) {
        Some((title, preview)) => (title, Some(preview)),
        None => (label, None),
    }
}

/// A snapshot-derived anchor with its display label.
#[derive(Debug, Clone)]
pub struct LabeledAnchor {
    /// Engine-owned tracked pose.
    pub anchor: AnchorHandle,
    /// Display label, `title||preview`.
    pub label: String,
    /// Identifier of the recognized site.
    pub site_id: Option<String>,
    /// Name of the recognized site.
    pub site_name: String,
    /// Full description, once the detail fetch has completed.
    pub full_description: Option<String>,
}

impl LabeledAnchor {
    /// Create an anchor whose preview still reads as loading.
    #[must_use]
    pub fn loading(anchor: AnchorHandle, site_name: &str, site_id: Option<String>) -> Self {
        Self {
            anchor,
            label: compose_label(site_name, LOADING_PREVIEW),
            site_id,
            site_name: site_name.to_string(),
            full_description: None,
        }
    }

    /// The store key: the label title.
    #[must_use]
    pub fn key(&self) -> &str {
        split_label(&self.label).0
    }
}

/// A geo label anchored at a point of interest.
#[derive(Debug, Clone)]
pub struct LayerLabel {
    /// Engine-owned tracked pose.
    pub anchor: AnchorHandle,
    /// Attributes shown on the label.
    pub place: PlaceAttributes,
}

impl LayerLabel {
    /// The store key: the place id.
    #[must_use]
    pub fn key(&self) -> &str {
        self.place.id()
    }
}

#[derive(Debug, Default)]
struct StoreInner {
    anchors: Vec<LabeledAnchor>,
    layer_labels: Vec<LayerLabel>,
    revision: u64,
}

/// Thread-safe keyed store of snapshot anchors and layer labels.
///
/// Every mutation that changes the snapshot anchor list bumps a revision
/// counter, which the orchestrator uses for change notification.
#[derive(Debug, Default)]
pub struct AnchorStore {
    inner: Mutex<StoreInner>,
}

impl AnchorStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert an anchor, replacing any entry with the same key.
    ///
    /// A replaced entry's tracked pose is detached unless it is the same
    /// handle. Returns the replaced entry.
    pub fn insert(&self, anchor: LabeledAnchor) -> Option<LabeledAnchor> {
        let mut inner = self.lock();
        inner.revision += 1;

        let existing = inner.anchors.iter().position(|a| a.key() == anchor.key());
        let Some(index) = existing else {
            inner.anchors.push(anchor);
            return None;
        };

        let replaced = std::mem::replace(&mut inner.anchors[index], anchor);
        if !Arc::ptr_eq(&replaced.anchor, &inner.anchors[index].anchor) {
            replaced.anchor.detach();
        }
        tracing::debug!("Replaced anchor '{}'", replaced.key());
        Some(replaced)
    }

    /// Refine an anchor's preview and description once site details arrive.
    ///
    /// The tracked pose is kept. Returns `false` if no entry has `key`.
    pub fn update_details(&self, key: &str, preview: &str, description: &str) -> bool {
        let mut inner = self.lock();
        let Some(anchor) = inner.anchors.iter_mut().find(|a| a.key() == key) else {
            return false;
        };
        anchor.label = compose_label(key, preview);
        anchor.full_description = Some(description.to_string());
        inner.revision += 1;
        true
    }

    /// Look up an anchor by key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<LabeledAnchor> {
        self.lock().anchors.iter().find(|a| a.key() == key).cloned()
    }

    /// Remove an anchor by key, detaching its tracked pose.
    pub fn remove(&self, key: &str) -> bool {
        let mut inner = self.lock();
        let Some(index) = inner.anchors.iter().position(|a| a.key() == key) else {
            return false;
        };
        let removed = inner.anchors.remove(index);
        removed.anchor.detach();
        inner.revision += 1;
        true
    }

    /// Remove every snapshot anchor, detaching their tracked poses.
    pub fn clear_anchors(&self) {
        let mut inner = self.lock();
        if inner.anchors.is_empty() {
            return;
        }
        for anchor in inner.anchors.drain(..) {
            anchor.anchor.detach();
        }
        inner.revision += 1;
    }

    /// Point-in-time copy of the snapshot anchors.
    #[must_use]
    pub fn anchors(&self) -> Vec<LabeledAnchor> {
        self.lock().anchors.clone()
    }

    /// Number of snapshot anchors.
    #[must_use]
    pub fn anchor_count(&self) -> usize {
        self.lock().anchors.len()
    }

    /// Revision counter of the snapshot anchor list.
    #[must_use]
    pub fn revision(&self) -> u64 {
        self.lock().revision
    }

    /// Insert a layer label, replacing any label with the same place id.
    pub fn insert_layer_label(&self, label: LayerLabel) -> Option<LayerLabel> {
        let mut inner = self.lock();
        let existing = inner
            .layer_labels
            .iter()
            .position(|l| l.key() == label.key());
        let Some(index) = existing else {
            inner.layer_labels.push(label);
            return None;
        };

        let replaced = std::mem::replace(&mut inner.layer_labels[index], label);
        if !Arc::ptr_eq(&replaced.anchor, &inner.layer_labels[index].anchor) {
            replaced.anchor.detach();
        }
        Some(replaced)
    }

    /// Whether a layer label exists for a place id.
    #[must_use]
    pub fn contains_layer_label(&self, place_id: &str) -> bool {
        self.lock().layer_labels.iter().any(|l| l.key() == place_id)
    }

    /// Remove a layer label by place id, detaching its tracked pose.
    pub fn remove_layer_label(&self, place_id: &str) -> Option<LayerLabel> {
        let mut inner = self.lock();
        let index = inner
            .layer_labels
            .iter()
            .position(|l| l.key() == place_id)?;
        let removed = inner.layer_labels.remove(index);
        removed.anchor.detach();
        Some(removed)
    }

    /// Remove every layer label, detaching their tracked poses.
    pub fn clear_layer_labels(&self) {
        for label in self.lock().layer_labels.drain(..) {
            label.anchor.detach();
        }
    }

    /// Point-in-time copy of the layer labels.
    #[must_use]
    pub fn layer_labels(&self) -> Vec<LayerLabel> {
        self.lock().layer_labels.clone()
    }

    /// Remove everything, detaching every tracked pose.
    pub fn clear(&self) {
        self.clear_anchors();
        self.clear_layer_labels();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::{LatLng, PointOfInterest};
    use crate::geometry::Pose;
    use crate::sim::SimAnchor;
    use crate::tracking::{TrackedAnchor, TrackingState};
    use glam::Vec3;

    fn handle(x: f32) -> Arc<SimAnchor> {
        Arc::new(SimAnchor::new(Pose::from_translation(Vec3::new(x, 0.0, -1.0))))
    }

    fn place(id: &str) -> PlaceAttributes {
        PlaceAttributes::from_point(&PointOfInterest {
            id: id.to_string(),
            name: format!("Place {id}"),
            location: LatLng { lat: 1.0, lng: 2.0 },
            ..PointOfInterest::default()
        })
    }

    #[test]
    fn test_label_split() {
        assert_eq!(split_label("Louvre||Museum."), ("Louvre", Some("Museum.")));
        assert_eq!(split_label("Louvre"), ("Louvre", None));
        assert_eq!(compose_label("A", "B"), "A||B");
    }

    #[test]
    fn test_same_key_replaces_and_detaches() {
        let store = AnchorStore::new();
        let first = handle(0.0);
        let second = handle(1.0);

        store.insert(LabeledAnchor::loading(first.clone(), "Louvre", Some("1".into())));
        let replaced =
            store.insert(LabeledAnchor::loading(second.clone(), "Louvre", Some("2".into())));

        assert!(replaced.is_some());
        assert_eq!(store.anchor_count(), 1);
        assert_eq!(first.tracking_state(), TrackingState::Stopped);
        assert_eq!(second.tracking_state(), TrackingState::Tracking);
        assert_eq!(store.get("Louvre").unwrap().site_id.as_deref(), Some("2"));
    }

    #[test]
    fn test_late_details_land_on_replacement() {
        let store = AnchorStore::new();
        let first = handle(0.0);
        let second = handle(1.0);

        store.insert(LabeledAnchor::loading(first.clone(), "Louvre", Some("1".into())));
        store.insert(LabeledAnchor::loading(second.clone(), "Louvre", Some("2".into())));
        // Details requested for the first placement arrive after the second.
        assert!(store.update_details("Louvre", "A museum.", "A museum. In Paris."));

        let current = store.get("Louvre").unwrap();
        let expected: AnchorHandle = second.clone();
        assert!(Arc::ptr_eq(&current.anchor, &expected));
        assert_eq!(current.site_id.as_deref(), Some("2"));
        assert_eq!(current.label, "Louvre||A museum.");
        assert_eq!(current.full_description.as_deref(), Some("A museum. In Paris."));
        assert_eq!(first.tracking_state(), TrackingState::Stopped);
        assert_eq!(second.tracking_state(), TrackingState::Tracking);
        assert_eq!(store.anchor_count(), 1);
    }

    #[test]
    fn test_reinsert_same_handle_keeps_tracking() {
        let store = AnchorStore::new();
        let anchor = handle(0.0);
        store.insert(LabeledAnchor::loading(anchor.clone(), "Louvre", None));
        store.insert(LabeledAnchor::loading(anchor.clone(), "Louvre", None));
        assert_eq!(anchor.tracking_state(), TrackingState::Tracking);
    }

    #[test]
    fn test_update_details_keeps_handle() {
        let store = AnchorStore::new();
        let anchor = handle(0.0);
        store.insert(LabeledAnchor::loading(anchor.clone(), "Louvre", Some("1".into())));
        let before = store.revision();

        assert!(store.update_details("Louvre", "A museum.", "A museum. In Paris."));
        assert!(!store.update_details("Prado", "x", "y"));

        let updated = store.get("Louvre").unwrap();
        assert_eq!(updated.label, "Louvre||A museum.");
        assert_eq!(updated.full_description.as_deref(), Some("A museum. In Paris."));
        let expected: AnchorHandle = anchor;
        assert!(Arc::ptr_eq(&updated.anchor, &expected));
        assert!(store.revision() > before);
    }

    #[test]
    fn test_clear_detaches_everything() {
        let store = AnchorStore::new();
        let a = handle(0.0);
        let b = handle(1.0);
        store.insert(LabeledAnchor::loading(a.clone(), "A", None));
        store.insert_layer_label(LayerLabel {
            anchor: b.clone(),
            place: place("p1"),
        });

        store.clear();
        assert_eq!(store.anchor_count(), 0);
        assert!(store.layer_labels().is_empty());
        assert_eq!(a.tracking_state(), TrackingState::Stopped);
        assert_eq!(b.tracking_state(), TrackingState::Stopped);
    }

    #[test]
    fn test_layer_labels_keyed_by_place_id() {
        let store = AnchorStore::new();
        store.insert_layer_label(LayerLabel {
            anchor: handle(0.0),
            place: place("p1"),
        });
        store.insert_layer_label(LayerLabel {
            anchor: handle(1.0),
            place: place("p1"),
        });
        store.insert_layer_label(LayerLabel {
            anchor: handle(2.0),
            place: place("p2"),
        });

        assert_eq!(store.layer_labels().len(), 2);
        assert!(store.contains_layer_label("p2"));
        assert!(store.remove_layer_label("p1").is_some());
        assert!(store.remove_layer_label("p1").is_none());
        // Layer labels do not touch the snapshot anchor revision.
        assert_eq!(store.revision(), 0);
    }
}
