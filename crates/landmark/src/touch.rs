//! Resolving screen touches to labels.
//!
//! Each candidate's label is projected with the frame's view-projection
//! matrix and sized with the same constants the renderer uses. When several
//! labels contain the touch, the one nearest the camera wins.

use glam::{Mat4, Vec2, Vec3};

use crate::geometry::project_to_screen;
use crate::render::{
    CLOSE_BUTTON_PADDING, CLOSE_BUTTON_RECT, LABEL_ASPECT_RATIO, LABEL_SCREEN_SIZE, label_center,
};
use crate::store::{LabeledAnchor, LayerLabel};
use crate::tracking::{AnchorHandle, TrackingState};

/// An axis-aligned rectangle in screen pixels, `y` growing downward.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScreenRect {
    /// Left edge.
    pub left: f32,
    /// Top edge.
    pub top: f32,
    /// Right edge.
    pub right: f32,
    /// Bottom edge.
    pub bottom: f32,
}

impl ScreenRect {
    /// A rectangle of `size` centred on `center`.
    #[must_use]
    pub fn centered(center: Vec2, size: Vec2) -> Self {
        let half = size / 2.0;
        Self {
            left: center.x - half.x,
            top: center.y - half.y,
            right: center.x + half.x,
            bottom: center.y + half.y,
        }
    }

    /// Width in pixels.
    #[must_use]
    pub fn width(&self) -> f32 {
        self.right - self.left
    }

    /// Height in pixels.
    #[must_use]
    pub fn height(&self) -> f32 {
        self.bottom - self.top
    }

    /// Whether a point lies inside, edges included.
    #[must_use]
    pub fn contains(&self, point: Vec2) -> bool {
        point.x >= self.left && point.x <= self.right && point.y >= self.top && point.y <= self.bottom
    }

    /// The sub-rectangle at normalized `[left, top, right, bottom]`.
    #[must_use]
    pub fn sub_rect(&self, normalized: [f32; 4]) -> Self {
        let [left, top, right, bottom] = normalized;
        Self {
            left: self.left + left * self.width(),
            top: self.top + top * self.height(),
            right: self.left + right * self.width(),
            bottom: self.top + bottom * self.height(),
        }
    }

    /// Grow by `padding` pixels on every side.
    #[must_use]
    pub fn padded(&self, padding: f32) -> Self {
        Self {
            left: self.left - padding,
            top: self.top - padding,
            right: self.right + padding,
            bottom: self.bottom + padding,
        }
    }
}

/// Screen bounds of the label anchored at `anchor_position`.
///
/// `None` if the label centre is behind the camera or off screen.
#[must_use]
pub fn label_screen_bounds(
    anchor_position: Vec3,
    view_projection: &Mat4,
    screen: Vec2,
) -> Option<ScreenRect> {
    let center = project_to_screen(label_center(anchor_position), view_projection, screen)?;
    let height = LABEL_SCREEN_SIZE * screen.y;
    Some(ScreenRect::centered(
        center,
        Vec2::new(height * LABEL_ASPECT_RATIO, height),
    ))
}

/// Touch area of a layer label's close button.
#[must_use]
pub fn close_button_bounds(label: &ScreenRect) -> ScreenRect {
    label.sub_rect(CLOSE_BUTTON_RECT).padded(CLOSE_BUTTON_PADDING)
}

/// What a touch landed on.
#[derive(Debug, Clone)]
pub enum TouchTarget {
    /// A snapshot anchor's label.
    Anchor(LabeledAnchor),
    /// The body of a layer label.
    LayerLabel(LayerLabel),
    /// The close button of a layer label.
    LayerLabelClose(LayerLabel),
}

/// Hit tests touches against labels for one frame.
#[derive(Debug, Clone, Copy)]
pub struct TouchHitTester {
    camera_position: Vec3,
    view_projection: Mat4,
    screen: Vec2,
}

impl TouchHitTester {
    /// Create a hit tester for a frame.
    #[must_use]
    pub fn new(camera_position: Vec3, view_projection: Mat4, screen: Vec2) -> Self {
        Self {
            camera_position,
            view_projection,
            screen,
        }
    }

    /// Screen bounds of an anchor's label, if it is tracking and on screen.
    #[must_use]
    pub fn bounds(&self, anchor: &AnchorHandle) -> Option<ScreenRect> {
        if anchor.tracking_state() != TrackingState::Tracking {
            return None;
        }
        label_screen_bounds(anchor.pose().translation, &self.view_projection, self.screen)
    }

    /// The item whose region contains `touch` and is nearest the camera.
    fn nearest<'a, T>(
        &self,
        items: &'a [T],
        touch: Vec2,
        handle: impl Fn(&T) -> &AnchorHandle,
        region: impl Fn(ScreenRect) -> ScreenRect,
    ) -> Option<&'a T> {
        items
            .iter()
            .filter_map(|item| {
                let anchor = handle(item);
                let bounds = region(self.bounds(anchor)?);
                bounds
                    .contains(touch)
                    .then(|| (item, anchor.pose().distance_to(self.camera_position)))
            })
            .min_by(|(_, a), (_, b)| a.total_cmp(b))
            .map(|(item, _)| item)
    }

    /// Resolve a touch.
    ///
    /// Snapshot anchors take priority over layer label close buttons, which
    /// take priority over layer label bodies.
    #[must_use]
    pub fn resolve(
        &self,
        touch: Vec2,
        anchors: &[LabeledAnchor],
        layer_labels: &[LayerLabel],
    ) -> Option<TouchTarget> {
        if let Some(anchor) = self.nearest(anchors, touch, |a| &a.anchor, |r| r) {
            return Some(TouchTarget::Anchor(anchor.clone()));
        }
        if let Some(label) = self.nearest(layer_labels, touch, |l| &l.anchor, |r| {
            close_button_bounds(&r)
        }) {
            return Some(TouchTarget::LayerLabelClose(label.clone()));
        }
        self.nearest(layer_labels, touch, |l| &l.anchor, |r| r)
            .map(|label| TouchTarget::LayerLabel(label.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::{PlaceAttributes, PointOfInterest};
    use crate::geometry::Pose;
    use crate::sim::SimAnchor;
    use std::sync::Arc;

    const SCREEN: Vec2 = Vec2::new(1080.0, 1920.0);

    fn view_projection() -> Mat4 {
        let projection =
            Mat4::perspective_rh_gl(60.0_f32.to_radians(), SCREEN.x / SCREEN.y, 0.01, 100.0);
        projection * Pose::IDENTITY.view_matrix()
    }

    fn tester() -> TouchHitTester {
        TouchHitTester::new(Vec3::ZERO, view_projection(), SCREEN)
    }

    fn anchor_at(title: &str, position: Vec3) -> LabeledAnchor {
        LabeledAnchor::loading(
            Arc::new(SimAnchor::new(Pose::from_translation(position))),
            title,
            Some(format!("id-{title}")),
        )
    }

    fn layer_label_at(id: &str, position: Vec3) -> LayerLabel {
        LayerLabel {
            anchor: Arc::new(SimAnchor::new(Pose::from_translation(position))),
            place: PlaceAttributes::from_point(&PointOfInterest {
                id: id.to_string(),
                name: id.to_string(),
                ..PointOfInterest::default()
            }),
        }
    }

    fn center_of(position: Vec3) -> Vec2 {
        project_to_screen(label_center(position), &view_projection(), SCREEN).unwrap()
    }

    #[test]
    fn test_label_bounds_size() {
        let bounds = label_screen_bounds(Vec3::new(0.0, -0.1, -2.0), &view_projection(), SCREEN)
            .unwrap();
        assert!((bounds.height() - 0.15 * 1920.0).abs() < 1e-3);
        assert!((bounds.width() - 0.15 * 1920.0 / 0.6).abs() < 1e-2);
        // Label centre sits on the optical axis.
        assert!(bounds.contains(Vec2::new(540.0, 960.0)));
    }

    #[test]
    fn test_behind_camera_has_no_bounds() {
        assert!(label_screen_bounds(Vec3::new(0.0, 0.0, 2.0), &view_projection(), SCREEN).is_none());
    }

    #[test]
    fn test_nearest_overlapping_anchor_wins() {
        let near = anchor_at("Near", Vec3::new(0.0, 0.0, -2.0));
        let far = anchor_at("Far", Vec3::new(0.0, 0.0, -5.0));
        let touch = center_of(Vec3::new(0.0, 0.0, -2.0));

        for anchors in [vec![near.clone(), far.clone()], vec![far, near]] {
            match tester().resolve(touch, &anchors, &[]) {
                Some(TouchTarget::Anchor(hit)) => assert_eq!(hit.site_name, "Near"),
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[test]
    fn test_non_tracking_anchor_is_skipped() {
        let anchor = anchor_at("Gone", Vec3::new(0.0, 0.0, -2.0));
        anchor.anchor.detach();
        let touch = center_of(Vec3::new(0.0, 0.0, -2.0));
        assert!(tester().resolve(touch, &[anchor], &[]).is_none());
    }

    #[test]
    fn test_miss_outside_bounds() {
        let anchor = anchor_at("Louvre", Vec3::new(0.0, 0.0, -2.0));
        assert!(tester().resolve(Vec2::new(5.0, 5.0), &[anchor], &[]).is_none());
    }

    #[test]
    fn test_anchor_beats_layer_label() {
        let position = Vec3::new(0.0, 0.0, -3.0);
        let anchor = anchor_at("Louvre", position);
        let label = layer_label_at("p1", Vec3::new(0.0, 0.0, -2.0));
        let touch = center_of(position);
        assert!(matches!(
            tester().resolve(touch, &[anchor], &[label]),
            Some(TouchTarget::Anchor(_))
        ));
    }

    #[test]
    fn test_close_button_and_body() {
        let position = Vec3::new(0.0, 0.0, -2.0);
        let label = layer_label_at("p1", position);
        let bounds = label_screen_bounds(position, &view_projection(), SCREEN).unwrap();
        let labels = [label];

        let button = close_button_bounds(&bounds);
        let on_button = Vec2::new(
            (button.left + button.right) / 2.0,
            (button.top + button.bottom) / 2.0,
        );
        match tester().resolve(on_button, &[], &labels) {
            Some(TouchTarget::LayerLabelClose(hit)) => assert_eq!(hit.key(), "p1"),
            other => panic!("unexpected {other:?}"),
        }

        let on_body = Vec2::new(bounds.left + 10.0, bounds.bottom - 10.0);
        assert!(matches!(
            tester().resolve(on_body, &[], &labels),
            Some(TouchTarget::LayerLabel(_))
        ));
    }

    #[test]
    fn test_padding_extends_close_button() {
        let rect = ScreenRect {
            left: 0.0,
            top: 0.0,
            right: 100.0,
            bottom: 50.0,
        };
        let button = close_button_bounds(&rect);
        assert!((button.left - (85.0 - CLOSE_BUTTON_PADDING)).abs() < 1e-4);
        assert!(button.contains(Vec2::new(100.0 + CLOSE_BUTTON_PADDING, 0.0)));
        assert!(!button.contains(Vec2::new(50.0, 25.0)));
    }

    #[test]
    fn test_same_input_same_result() {
        let anchors = vec![
            anchor_at("A", Vec3::new(0.1, 0.0, -2.0)),
            anchor_at("B", Vec3::new(-0.1, 0.0, -2.5)),
        ];
        let touch = center_of(Vec3::new(0.0, 0.0, -2.2));
        let first = tester().resolve(touch, &anchors, &[]).map(|t| match t {
            TouchTarget::Anchor(a) => a.site_name,
            _ => String::new(),
        });
        for _ in 0..10 {
            let again = tester().resolve(touch, &anchors, &[]).map(|t| match t {
                TouchTarget::Anchor(a) => a.site_name,
                _ => String::new(),
            });
            assert_eq!(again, first);
        }
    }
}
