//! HTTP implementation of [`SiteService`].
//!
//! Talks to the landmark backend over JSON:
//!
//! - `POST /site-info/detect-site` analyzes an uploaded snapshot
//! - `GET /places/nearby/` lists points of interest around a location
//! - `GET /site-info/sitename/{id}` fetches details for a recognized site
//! - `POST /siteinfo_history` records a visit
//!
//! # Example
//!
//! ```ignore
//! let service = HttpSiteService::new().with_base_url("http://localhost:3000".to_string());
//! let result = service.analyze(Path::new("snapshot.jpg")).await?;
//! ```

use std::path::Path;

use landmark::error::ServiceError;
use landmark::geo::PointOfInterest;
use landmark::service::{AnalysisResult, GeoLocation, ServiceFuture, SiteDetails, SiteService};
use serde::{Deserialize, Serialize};

/// Default backend address.
pub const DEFAULT_BASE_URL: &str = "http://localhost:3000";

/// User agent for API requests.
const USER_AGENT: &str = concat!("landmark-client/", env!("CARGO_PKG_VERSION"));

/// An analysis response, either bare or wrapped in a `result` list.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum AnalysisPayload {
    Wrapped { result: Vec<AnalysisResult> },
    Single(AnalysisResult),
}

/// Body of a visit record.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SiteVisitRequest<'a> {
    site_info_id: &'a str,
    latitude: f64,
    longitude: f64,
}

/// Decode an analysis response body.
///
/// A wrapped response yields its first entry; an empty list is an error.
pub fn parse_analysis(body: &[u8]) -> Result<AnalysisResult, ServiceError> {
    let payload: AnalysisPayload =
        serde_json::from_slice(body).map_err(|e| ServiceError::InvalidData {
            context: "analysis result",
            detail: e.to_string(),
        })?;
    match payload {
        AnalysisPayload::Single(result) => Ok(result),
        AnalysisPayload::Wrapped { result } => {
            result
                .into_iter()
                .next()
                .ok_or_else(|| ServiceError::InvalidData {
                    context: "analysis result",
                    detail: "empty result list".to_string(),
                })
        }
    }
}

/// Site service backed by the landmark HTTP API.
#[derive(Debug, Clone)]
pub struct HttpSiteService {
    http: reqwest::Client,
    base_url: String,
}

impl HttpSiteService {
    /// Create a client for the default backend.
    #[must_use]
    pub fn new() -> Self {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!("Failed to build HTTP client, using defaults: {e}");
                reqwest::Client::new()
            });
        Self::with_http(http)
    }

    /// Create a client with a custom HTTP client.
    #[must_use]
    pub fn with_http(http: reqwest::Client) -> Self {
        Self {
            http,
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    /// Set a custom base URL.
    #[must_use]
    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    /// The backend address.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn analyze_url(&self) -> String {
        format!("{}/site-info/detect-site", self.base_url)
    }

    fn nearby_url(&self, location: GeoLocation, categories: &[String]) -> String {
        let mut url = format!(
            "{}/places/nearby/?lat={}&lng={}",
            self.base_url, location.latitude, location.longitude
        );
        for category in categories {
            url.push_str("&categories=");
            url.push_str(&urlencoding::encode(category));
        }
        url
    }

    fn details_url(&self, site_id: &str) -> String {
        format!(
            "{}/site-info/sitename/{}",
            self.base_url,
            urlencoding::encode(site_id)
        )
    }

    fn history_url(&self) -> String {
        format!("{}/siteinfo_history", self.base_url)
    }

    /// Send a request and return the body of a successful response.
    async fn send(&self, url: &str, request: reqwest::RequestBuilder) -> Result<Vec<u8>, ServiceError> {
        tracing::debug!(url, "sending request");

        let response = request.send().await.map_err(|e| ServiceError::Http {
            url: url.to_string(),
            message: e.to_string(),
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ServiceError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let data = response.bytes().await.map_err(|e| ServiceError::Http {
            url: url.to_string(),
            message: e.to_string(),
        })?;
        tracing::debug!(url, bytes = data.len(), "received response");
        Ok(data.to_vec())
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        context: &'static str,
    ) -> Result<T, ServiceError> {
        let body = self.send(url, self.http.get(url)).await?;
        serde_json::from_slice(&body).map_err(|e| ServiceError::InvalidData {
            context,
            detail: e.to_string(),
        })
    }
}

impl Default for HttpSiteService {
    fn default() -> Self {
        Self::new()
    }
}

impl SiteService for HttpSiteService {
    fn analyze(&self, image_path: &Path) -> ServiceFuture<'_, AnalysisResult> {
        let image_path = image_path.to_path_buf();
        Box::pin(async move {
            let data = tokio::fs::read(&image_path)
                .await
                .map_err(|e| ServiceError::InvalidData {
                    context: "snapshot file",
                    detail: format!("{}: {e}", image_path.display()),
                })?;
            let file_name = image_path
                .file_name()
                .map_or_else(|| "snapshot.jpg".to_string(), |n| n.to_string_lossy().into_owned());

            let url = self.analyze_url();
            let part = reqwest::multipart::Part::bytes(data)
                .file_name(file_name)
                .mime_str("image/jpeg")
                .map_err(|e| ServiceError::Http {
                    url: url.clone(),
                    message: e.to_string(),
                })?;
            let form = reqwest::multipart::Form::new().part("image", part);

            let body = self.send(&url, self.http.post(&url).multipart(form)).await?;
            let result = parse_analysis(&body)?;
            tracing::info!("Analysis of {} returned '{}'", image_path.display(), result.status);
            Ok(result)
        })
    }

    fn fetch_nearby_places(
        &self,
        location: GeoLocation,
        categories: &[String],
    ) -> ServiceFuture<'_, Vec<PointOfInterest>> {
        let url = self.nearby_url(location, categories);
        Box::pin(async move { self.get_json(&url, "nearby places").await })
    }

    fn fetch_site_details(&self, site_id: &str) -> ServiceFuture<'_, SiteDetails> {
        let url = self.details_url(site_id);
        Box::pin(async move { self.get_json(&url, "site details").await })
    }

    fn record_site_visit(&self, site_id: &str, location: GeoLocation) -> ServiceFuture<'_, ()> {
        let url = self.history_url();
        let body = SiteVisitRequest {
            site_info_id: site_id,
            latitude: location.latitude,
            longitude: location.longitude,
        };
        let request = self.http.post(&url).json(&body);
        Box::pin(async move {
            self.send(&url, request).await?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> HttpSiteService {
        HttpSiteService::new().with_base_url("http://example.test/".to_string())
    }

    #[test]
    fn test_urls() {
        let service = service();
        assert_eq!(service.base_url(), "http://example.test");
        assert_eq!(
            service.analyze_url(),
            "http://example.test/site-info/detect-site"
        );
        assert_eq!(
            service.details_url("abc 1"),
            "http://example.test/site-info/sitename/abc%201"
        );
        assert_eq!(service.history_url(), "http://example.test/siteinfo_history");
    }

    #[test]
    fn test_nearby_url_repeats_categories() {
        let url = service().nearby_url(
            GeoLocation::new(48.5, 2.25),
            &["cafe".to_string(), "art gallery".to_string()],
        );
        assert_eq!(
            url,
            "http://example.test/places/nearby/?lat=48.5&lng=2.25&categories=cafe&categories=art%20gallery"
        );
    }

    #[test]
    fn test_parse_single_analysis() {
        let body = br#"{"status": "assume", "siteInformation": {"x": 0.5, "y": 0.5, "siteName": "Louvre"}, "siteInfoId": "l1"}"#;
        let result = parse_analysis(body).unwrap();
        assert_eq!(result.site_info_id.as_deref(), Some("l1"));
        assert_eq!(
            result.site_information.unwrap().site_name.as_deref(),
            Some("Louvre")
        );
    }

    #[test]
    fn test_parse_wrapped_analysis_uses_first() {
        let body = br#"{"result": [{"status": "assume", "siteInfoId": "a"}, {"status": "assume", "siteInfoId": "b"}]}"#;
        let result = parse_analysis(body).unwrap();
        assert_eq!(result.site_info_id.as_deref(), Some("a"));
    }

    #[test]
    fn test_parse_empty_or_invalid_analysis() {
        assert!(matches!(
            parse_analysis(br#"{"result": []}"#),
            Err(ServiceError::InvalidData { .. })
        ));
        assert!(matches!(
            parse_analysis(b"not json"),
            Err(ServiceError::InvalidData { .. })
        ));
    }

    #[test]
    fn test_visit_body() {
        let body = SiteVisitRequest {
            site_info_id: "s1",
            latitude: 1.5,
            longitude: -2.0,
        };
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            serde_json::json!({"siteInfoId": "s1", "latitude": 1.5, "longitude": -2.0})
        );
    }

    #[tokio::test]
    async fn test_missing_snapshot_is_invalid_data() {
        let result = service()
            .analyze(Path::new("/nonexistent/landmark/snapshot.jpg"))
            .await;
        assert!(matches!(
            result,
            Err(ServiceError::InvalidData {
                context: "snapshot file",
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_http_error() {
        let service = HttpSiteService::new().with_base_url("http://127.0.0.1:1".to_string());
        let result = service.fetch_site_details("abc").await;
        assert!(matches!(result, Err(ServiceError::Http { .. })));
    }
}
