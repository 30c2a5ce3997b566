//! Geometry helpers shared by placement, geospatial anchoring and hit testing.
//!
//! Tracking-space math is `f32` (the engine's precision); geographic math is
//! `f64` and only narrows when a rotation is handed to the engine.

use glam::{Mat4, Quat, Vec2, Vec3, Vec4};

/// Mean Earth radius in meters, used by the haversine distance.
pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// A rigid transform in tracking space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    /// Position in meters.
    pub translation: Vec3,
    /// Orientation.
    pub rotation: Quat,
}

impl Pose {
    /// The identity pose at the tracking origin.
    pub const IDENTITY: Self = Self {
        translation: Vec3::ZERO,
        rotation: Quat::IDENTITY,
    };

    /// Create a pose from a translation and rotation.
    #[must_use]
    pub fn new(translation: Vec3, rotation: Quat) -> Self {
        Self {
            translation,
            rotation,
        }
    }

    /// Create a pose with identity rotation.
    #[must_use]
    pub fn from_translation(translation: Vec3) -> Self {
        Self::new(translation, Quat::IDENTITY)
    }

    /// Transform a point from pose-local space into world space.
    #[must_use]
    pub fn transform_point(&self, point: Vec3) -> Vec3 {
        self.rotation * point + self.translation
    }

    /// Rotate a direction from pose-local space into world space.
    ///
    /// Directions are not translated.
    #[must_use]
    pub fn rotate_vector(&self, direction: Vec3) -> Vec3 {
        self.rotation * direction
    }

    /// The pose's forward axis (local `-Z`) in world space.
    #[must_use]
    pub fn forward(&self) -> Vec3 {
        self.rotate_vector(Vec3::NEG_Z)
    }

    /// The pose as a local-to-world matrix.
    #[must_use]
    pub fn to_matrix(&self) -> Mat4 {
        Mat4::from_rotation_translation(self.rotation, self.translation)
    }

    /// The world-to-local matrix, i.e. a view matrix for a camera pose.
    #[must_use]
    pub fn view_matrix(&self) -> Mat4 {
        self.to_matrix().inverse()
    }

    /// Euclidean distance between the two poses' positions.
    #[must_use]
    pub fn distance_to(&self, other: Vec3) -> f32 {
        self.translation.distance(other)
    }
}

impl Default for Pose {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Map a normalized image point (`[0,1]²`, origin top-left) to a camera-space
/// ray direction on the `z = -1` plane.
#[must_use]
pub fn normalized_to_camera_ray(point: Vec2) -> Vec3 {
    let vx = point.x * 2.0 - 1.0;
    let vy = -(point.y * 2.0 - 1.0);
    Vec3::new(vx, vy, -1.0)
}

/// Normalize a vector, returning `None` for zero-length or non-finite input.
#[must_use]
pub fn normalize(v: Vec3) -> Option<Vec3> {
    v.try_normalize()
}

/// Initial great-circle bearing from one coordinate to another, in degrees
/// clockwise from north, normalized to `[0, 360)`.
#[must_use]
pub fn compute_bearing(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    let lat1 = lat1.to_radians();
    let lat2 = lat2.to_radians();
    let delta_lng = (lng2 - lng1).to_radians();

    let y = delta_lng.sin() * lat2.cos();
    let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * delta_lng.cos();

    normalize_degrees(y.atan2(x).to_degrees())
}

/// Heading that faces back toward the viewer: the bearing rotated by 180°.
#[must_use]
pub fn corrected_heading(bearing: f64) -> f64 {
    normalize_degrees(bearing + 180.0)
}

/// Rotation about the vertical (`+Y`) axis by `heading` degrees.
///
/// Equivalent to the quaternion `(0, sin(h/2), 0, cos(h/2))`.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn heading_to_quaternion(heading: f64) -> Quat {
    let half = heading.to_radians() / 2.0;
    Quat::from_xyzw(0.0, half.sin() as f32, 0.0, half.cos() as f32)
}

/// Great-circle distance in meters between two coordinates.
#[must_use]
pub fn haversine_distance(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let delta_phi = (lat2 - lat1).to_radians();
    let delta_lambda = (lng2 - lng1).to_radians();

    let a = (delta_phi / 2.0).sin().powi(2)
        + phi1.cos() * phi2.cos() * (delta_lambda / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_METERS * c
}

/// Project a world position into screen pixels.
///
/// Returns `None` when the point is behind the camera or outside the view
/// frustum. Screen `y` grows downward.
#[must_use]
pub fn project_to_screen(world: Vec3, view_projection: &Mat4, screen: Vec2) -> Option<Vec2> {
    let clip = *view_projection * Vec4::new(world.x, world.y, world.z, 1.0);
    if clip.w <= 0.0 {
        return None;
    }

    let ndc = clip.truncate() / clip.w;
    let in_range = |v: f32| (-1.0..=1.0).contains(&v);
    if !(in_range(ndc.x) && in_range(ndc.y) && in_range(ndc.z)) {
        return None;
    }

    Some(Vec2::new(
        (ndc.x + 1.0) / 2.0 * screen.x,
        (1.0 - ndc.y) / 2.0 * screen.y,
    ))
}

/// Fold an angle in degrees into `[0, 360)`.
fn normalize_degrees(degrees: f64) -> f64 {
    let folded = degrees.rem_euclid(360.0);
    // `rem_euclid` can round a tiny negative input up to exactly 360.
    if folded >= 360.0 { 0.0 } else { folded }
}
