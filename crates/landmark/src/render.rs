//! The seam between the frame loop and the external renderer.
//!
//! The core decides what to draw and where; the renderer owns textures,
//! shaders and the label visuals. Label sizing lives here so that drawing
//! and touch hit testing agree on where a label is on screen.

use glam::{Mat4, Vec3};

use crate::error::RenderError;
use crate::events::UserMessage;
use crate::geo::PlaceAttributes;
use crate::geometry::Pose;
use crate::store::{LabeledAnchor, LayerLabel, split_label};

/// Label height as a fraction of the screen height.
pub const LABEL_SCREEN_SIZE: f32 = 0.15;

/// Label width divided by label height.
pub const LABEL_ASPECT_RATIO: f32 = 1.0 / 0.6;

/// Height in meters of the label centre above its anchor.
pub const LABEL_VERTICAL_OFFSET: f32 = 0.1;

/// Close button of a layer label, normalized to the label's bounds as
/// `[left, top, right, bottom]`.
pub const CLOSE_BUTTON_RECT: [f32; 4] = [0.85, 0.04, 0.97, 0.2];

/// Extra touch slop around the close button in pixels.
pub const CLOSE_BUTTON_PADDING: f32 = 20.0;

/// What a billboard shows.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BillboardContent<'a> {
    /// A snapshot anchor's label.
    Anchor {
        /// Label title.
        title: &'a str,
        /// Preview text, if the label has one.
        preview: Option<&'a str>,
    },
    /// A layer label's place attributes.
    LayerLabel(&'a PlaceAttributes),
}

/// A camera-facing label to draw at a world position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Billboard<'a> {
    /// World position of the anchor.
    pub anchor_position: Vec3,
    /// What to show.
    pub content: BillboardContent<'a>,
    /// Label height as a fraction of the screen height.
    pub screen_size: f32,
    /// Label width divided by label height.
    pub aspect_ratio: f32,
}

impl<'a> Billboard<'a> {
    fn new(anchor_position: Vec3, content: BillboardContent<'a>) -> Self {
        Self {
            anchor_position,
            content,
            screen_size: LABEL_SCREEN_SIZE,
            aspect_ratio: LABEL_ASPECT_RATIO,
        }
    }

    /// Billboard for a snapshot anchor at its current pose.
    #[must_use]
    pub fn for_anchor(anchor: &'a LabeledAnchor) -> Self {
        let (title, preview) = split_label(&anchor.label);
        Self::new(
            anchor.anchor.pose().translation,
            BillboardContent::Anchor { title, preview },
        )
    }

    /// Billboard for a layer label at its current pose.
    #[must_use]
    pub fn for_layer_label(label: &'a LayerLabel) -> Self {
        Self::new(
            label.anchor.pose().translation,
            BillboardContent::LayerLabel(&label.place),
        )
    }

    /// World position of the label centre.
    #[must_use]
    pub fn center(&self) -> Vec3 {
        label_center(self.anchor_position)
    }
}

/// World position of the centre of a label anchored at `anchor_position`.
#[must_use]
pub fn label_center(anchor_position: Vec3) -> Vec3 {
    anchor_position + Vec3::Y * LABEL_VERTICAL_OFFSET
}

/// Draws the camera background and labels.
pub trait SceneRenderer {
    /// Whether GPU resources are ready.
    fn is_initialized(&self) -> bool;

    /// Draw the camera image for the frame.
    fn draw_background(&mut self, timestamp: i64) -> Result<(), RenderError>;

    /// Draw one billboard with the frame's view-projection matrix.
    fn draw_billboard(
        &mut self,
        billboard: &Billboard<'_>,
        view_projection: &Mat4,
    ) -> Result<(), RenderError>;
}

/// Outcome of one frame.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RenderResult {
    /// The frame was drawn.
    #[default]
    Success,
    /// The renderer is not ready yet.
    NotInitialized,
    /// No tracking session is attached.
    NoSession,
    /// The background was drawn but the camera is not tracking.
    CameraNotTracking,
    /// The tracking engine failed to produce a frame.
    CameraError(String),
    /// Anything else went wrong.
    UnknownError(String),
}

impl RenderResult {
    /// The message to show for this outcome, if any.
    #[must_use]
    pub fn user_message(&self) -> Option<UserMessage> {
        match self {
            RenderResult::Success | RenderResult::NotInitialized | RenderResult::NoSession => None,
            RenderResult::CameraNotTracking => Some(UserMessage::CameraNotTracking),
            RenderResult::CameraError(_) => Some(UserMessage::CameraUnavailable),
            RenderResult::UnknownError(detail) => Some(UserMessage::RenderingFailed(detail.clone())),
        }
    }
}

/// Whether a layer label at `position` should be drawn.
///
/// The label must be within `max_distance` meters of the camera, in front of
/// it, and within half of `fov_degrees` of the viewing direction.
#[must_use]
pub fn is_layer_label_visible(
    camera: &Pose,
    position: Vec3,
    max_distance: f32,
    fov_degrees: f32,
) -> bool {
    let offset = position - camera.translation;
    let distance = offset.length();
    if distance > max_distance || distance <= f32::EPSILON {
        return false;
    }

    let cos_angle = camera.forward().dot(offset / distance);
    if cos_angle <= 0.0 {
        return false;
    }
    cos_angle.clamp(-1.0, 1.0).acos().to_degrees() < fov_degrees / 2.0
}
