//! Network and location collaborators.
//!
//! The core never talks to the network directly. It consumes a
//! [`SiteService`] for image analysis and place data, and a
//! [`LocationProvider`] for device location fixes. Both return boxed futures
//! so they can be used as trait objects from spawned tasks.

use std::{future::Future, path::Path, pin::Pin};

use glam::Vec2;
use serde::{Deserialize, Serialize};

use crate::error::ServiceError;
use crate::geo::PointOfInterest;

/// Future type for collaborator calls.
pub type ServiceFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ServiceError>> + Send + 'a>>;

/// Status value an analysis uses to report that nothing was recognized.
pub const FAILURE_STATUS: &str = "failure";

/// A device location fix.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoLocation {
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
}

impl GeoLocation {
    /// Create a new location.
    #[must_use]
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Great-circle distance to another location in meters.
    #[must_use]
    pub fn distance_to(&self, other: &GeoLocation) -> f64 {
        crate::geometry::haversine_distance(
            self.latitude,
            self.longitude,
            other.latitude,
            other.longitude,
        )
    }
}

/// Where in the analyzed image a site was recognized.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteInformation {
    /// Classifier label.
    #[serde(default)]
    pub label: Option<String>,
    /// Normalized horizontal position of the label centroid.
    #[serde(default)]
    pub x: Option<f32>,
    /// Normalized vertical position of the label centroid.
    #[serde(default)]
    pub y: Option<f32>,
    /// Display name of the recognized site.
    #[serde(default)]
    pub site_name: Option<String>,
}

impl SiteInformation {
    /// The normalized point, if both coordinates are present.
    #[must_use]
    pub fn point(&self) -> Option<Vec2> {
        Some(Vec2::new(self.x?, self.y?))
    }
}

/// Result of analyzing a snapshot image.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    /// Outcome status reported by the service.
    #[serde(default)]
    pub status: String,
    /// Free-form description of the result.
    #[serde(default)]
    pub description: Option<String>,
    /// Recognized site, if any.
    #[serde(default)]
    pub site_information: Option<SiteInformation>,
    /// Identifier of the recognized site.
    #[serde(default)]
    pub site_info_id: Option<String>,
}

impl AnalysisResult {
    /// Whether the service reported that nothing was recognized.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        self.status == FAILURE_STATUS
    }
}

/// Detailed information about a recognized site.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteDetails {
    /// Site identifier.
    #[serde(rename = "_id", default)]
    pub id: String,
    /// Site name.
    #[serde(default)]
    pub name: String,
    /// Long-form description.
    #[serde(default)]
    pub description: String,
    /// Mean user rating.
    #[serde(default)]
    pub average_rating: Option<f32>,
    /// Number of ratings.
    #[serde(default)]
    pub rating_count: Option<u32>,
    /// Header image.
    #[serde(default)]
    pub image_url: Option<String>,
}

/// Image analysis and place data.
pub trait SiteService: Send + Sync {
    /// Analyze the snapshot image stored at `image_path`.
    fn analyze(&self, image_path: &Path) -> ServiceFuture<'_, AnalysisResult>;

    /// Fetch points of interest near a location, restricted to `categories`.
    fn fetch_nearby_places(
        &self,
        location: GeoLocation,
        categories: &[String],
    ) -> ServiceFuture<'_, Vec<PointOfInterest>>;

    /// Fetch details for a recognized site.
    fn fetch_site_details(&self, site_id: &str) -> ServiceFuture<'_, SiteDetails>;

    /// Record that the user visited a site from `location`.
    fn record_site_visit(&self, site_id: &str, location: GeoLocation) -> ServiceFuture<'_, ()>;
}

/// Device location fixes.
pub trait LocationProvider: Send + Sync {
    /// Request the device's current location.
    fn current_location(&self) -> ServiceFuture<'_, GeoLocation>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_analysis_result() {
        let json = r#"{
            "status": "assume",
            "description": "Detected landmark",
            "siteInformation": {"label": "monument", "x": 0.5, "y": 0.25, "siteName": "Taj Mahal"},
            "siteInfoId": "6850169248601af1be7c8fe3"
        }"#;
        let result: AnalysisResult = serde_json::from_str(json).unwrap();
        assert!(!result.is_failure());
        let info = result.site_information.unwrap();
        assert_eq!(info.site_name.as_deref(), Some("Taj Mahal"));
        assert_eq!(info.point(), Some(Vec2::new(0.5, 0.25)));
        assert_eq!(
            result.site_info_id.as_deref(),
            Some("6850169248601af1be7c8fe3")
        );
    }

    #[test]
    fn test_decode_failure_without_site() {
        let result: AnalysisResult = serde_json::from_str(r#"{"status": "failure"}"#).unwrap();
        assert!(result.is_failure());
        assert!(result.site_information.is_none());
    }

    #[test]
    fn test_missing_coordinate_has_no_point() {
        let info = SiteInformation {
            x: Some(0.1),
            ..SiteInformation::default()
        };
        assert!(info.point().is_none());
    }

    #[test]
    fn test_decode_site_details() {
        let json = r#"{"_id": "abc", "name": "Colosseum", "description": "Old. Big.", "averageRating": 4.5, "ratingCount": 10}"#;
        let details: SiteDetails = serde_json::from_str(json).unwrap();
        assert_eq!(details.id, "abc");
        assert_eq!(details.rating_count, Some(10));
        assert!(details.image_url.is_none());
    }

    #[test]
    fn test_location_distance() {
        let a = GeoLocation::new(0.0, 0.0);
        let b = GeoLocation::new(0.0, 0.01);
        let d = a.distance_to(&b);
        assert!(d > 1100.0 && d < 1120.0, "distance was {d}");
    }
}
