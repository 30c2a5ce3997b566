//! Error types for the landmark crate.
//!
//! Each failure domain gets its own enum. None of them cross the frame
//! boundary: the orchestrator turns them into a [`RenderResult`] or a
//! [`UserMessage`].
//!
//! [`RenderResult`]: crate::render::RenderResult
//! [`UserMessage`]: crate::events::UserMessage

use std::fmt;

/// Errors reported by the tracking engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackingError {
    /// The camera could not be accessed.
    CameraUnavailable(String),
    /// No camera image was available for the current frame.
    ImageUnavailable,
    /// The engine refused to create a tracked anchor.
    AnchorCreation(String),
    /// Geospatial mode is not supported on this device.
    GeospatialUnsupported,
    /// Any other engine failure.
    Engine(String),
}

impl fmt::Display for TrackingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackingError::CameraUnavailable(message) => {
                write!(f, "camera unavailable: {message}")
            }
            TrackingError::ImageUnavailable => write!(f, "camera image not available"),
            TrackingError::AnchorCreation(message) => {
                write!(f, "anchor creation failed: {message}")
            }
            TrackingError::GeospatialUnsupported => write!(f, "geospatial mode not supported"),
            TrackingError::Engine(message) => write!(f, "tracking engine error: {message}"),
        }
    }
}

impl std::error::Error for TrackingError {}

/// Errors reported by the network collaborators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    /// HTTP request failed.
    Http {
        /// The URL that failed.
        url: String,
        /// The error message.
        message: String,
    },
    /// HTTP response had a non-success status code.
    HttpStatus {
        /// The URL that returned the error.
        url: String,
        /// The HTTP status code.
        status: u16,
    },
    /// The response body could not be interpreted.
    InvalidData {
        /// Context for where the error occurred.
        context: &'static str,
        /// Description of what was invalid.
        detail: String,
    },
    /// A local resource needed by the request was unavailable.
    Unavailable(String),
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceError::Http { url, message } => {
                write!(f, "http request to {url} failed: {message}")
            }
            ServiceError::HttpStatus { url, status } => {
                write!(f, "http request to {url} returned status {status}")
            }
            ServiceError::InvalidData { context, detail } => {
                write!(f, "invalid {context}: {detail}")
            }
            ServiceError::Unavailable(message) => write!(f, "{message}"),
        }
    }
}

impl std::error::Error for ServiceError {}

/// Errors that end a scan attempt before a result can be placed.
#[derive(Debug)]
pub enum ScanError {
    /// The frame had no camera image to capture.
    CameraImage(TrackingError),
    /// The camera image buffer did not match its declared dimensions.
    InvalidImage {
        /// Description of what was wrong.
        detail: String,
    },
    /// The snapshot could not be encoded.
    Encode(image::ImageError),
    /// The snapshot file could not be written.
    Io(std::io::Error),
    /// The background worker stopped before producing a result.
    Worker(String),
    /// The analysis did not finish before the deadline.
    Timeout,
    /// The analysis service returned an error.
    Service(ServiceError),
}

impl fmt::Display for ScanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanError::CameraImage(e) => write!(f, "could not capture camera image: {e}"),
            ScanError::InvalidImage { detail } => write!(f, "invalid camera image: {detail}"),
            ScanError::Encode(e) => write!(f, "could not encode snapshot: {e}"),
            ScanError::Io(e) => write!(f, "could not write snapshot: {e}"),
            ScanError::Worker(message) => write!(f, "snapshot worker failed: {message}"),
            ScanError::Timeout => write!(f, "analysis timed out"),
            ScanError::Service(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for ScanError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ScanError::CameraImage(e) => Some(e),
            ScanError::Encode(e) => Some(e),
            ScanError::Io(e) => Some(e),
            ScanError::Service(e) => Some(e),
            _ => None,
        }
    }
}

impl From<image::ImageError> for ScanError {
    fn from(e: image::ImageError) -> Self {
        ScanError::Encode(e)
    }
}

impl From<std::io::Error> for ScanError {
    fn from(e: std::io::Error) -> Self {
        ScanError::Io(e)
    }
}

impl From<ServiceError> for ScanError {
    fn from(e: ServiceError) -> Self {
        ScanError::Service(e)
    }
}

/// Errors from turning an analysis result into a tracked anchor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlacementError {
    /// A field required for placement was absent or blank.
    MissingField(&'static str),
    /// The tracking engine refused to create the anchor.
    AnchorCreation(TrackingError),
}

impl fmt::Display for PlacementError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlacementError::MissingField(field) => write!(f, "missing {field}"),
            PlacementError::AnchorCreation(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for PlacementError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PlacementError::AnchorCreation(e) => Some(e),
            PlacementError::MissingField(_) => None,
        }
    }
}

impl From<TrackingError> for PlacementError {
    fn from(e: TrackingError) -> Self {
        PlacementError::AnchorCreation(e)
    }
}

/// A failure reported by the renderer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderError {
    /// Description of the failure.
    pub message: String,
}

impl RenderError {
    /// Create a render error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for RenderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for RenderError {}

/// Errors from validating a [`Config`](crate::config::Config).
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// A value was outside its allowed range.
    OutOfRange {
        /// The offending field.
        field: &'static str,
        /// The rejected value.
        value: f64,
    },
    /// A required string was empty.
    Empty {
        /// The offending field.
        field: &'static str,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::OutOfRange { field, value } => {
                write!(f, "config field {field} out of range: {value}")
            }
            ConfigError::Empty { field } => write!(f, "config field {field} must not be empty"),
        }
    }
}

impl std::error::Error for ConfigError {}
