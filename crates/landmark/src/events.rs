//! Outbound notifications for the UI layer.
//!
//! Everything the core wants the UI to know travels as a [`UiEvent`] on a
//! single unbounded channel.

use std::fmt;

/// A user-visible message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserMessage {
    /// The frame had no camera image to analyze.
    CameraImageUnavailable,
    /// The snapshot could not be converted or written.
    CaptureFailed(String),
    /// The analysis call did not finish in time.
    RequestTimedOut,
    /// The analysis recognized nothing.
    NoObjectsDetected,
    /// The analysis call failed.
    AnalysisFailed(String),
    /// A scan was requested before the camera started tracking.
    WaitForTracking,
    /// The tracking engine could not provide a frame.
    CameraUnavailable,
    /// A site was recognized but no anchor could be created for it.
    PlacementFailed,
    /// Geo labels are being placed.
    PlacingNearby,
    /// Fetching nearby places failed.
    NearbyPlacesFailed(String),
    /// No location fix could be obtained.
    LocationUnavailable,
    /// The camera is not tracking.
    CameraNotTracking,
    /// An unexpected rendering failure.
    RenderingFailed(String),
}

impl fmt::Display for UserMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserMessage::CameraImageUnavailable => {
                write!(f, "Camera image not available. Please try again.")
            }
            UserMessage::CaptureFailed(detail) => write!(f, "Failed to capture image: {detail}"),
            UserMessage::RequestTimedOut => write!(f, "Request timed out. Please try again."),
            UserMessage::NoObjectsDetected => write!(f, "No objects detected in the image"),
            UserMessage::AnalysisFailed(detail) => {
                write!(f, "Error analyzing the image: {detail}")
            }
            UserMessage::WaitForTracking => write!(
                f,
                "Please wait for AR to initialize. Move your device around to scan the environment."
            ),
            UserMessage::CameraUnavailable => {
                write!(f, "Camera not available. Try restarting the app.")
            }
            UserMessage::PlacementFailed => write!(
                f,
                "Objects were classified, but could not be attached to an anchor. \
                 Try moving your device around to obtain a better understanding of the environment."
            ),
            UserMessage::PlacingNearby => write!(f, "Placing nearby locations..."),
            UserMessage::NearbyPlacesFailed(detail) => {
                write!(f, "Couldn't load nearby places: {detail}")
            }
            UserMessage::LocationUnavailable => write!(f, "Unable to get current location"),
            UserMessage::CameraNotTracking => {
                write!(f, "Move your device around to resume tracking.")
            }
            UserMessage::RenderingFailed(detail) => write!(f, "Rendering error: {detail}"),
        }
    }
}

/// An event delivered to the UI layer.
#[derive(Debug, Clone, PartialEq)]
pub enum UiEvent {
    /// Show a message.
    Message(UserMessage),
    /// The scan-in-progress indicator changed.
    ScanStateChanged {
        /// Whether a scan is in progress.
        scanning: bool,
    },
    /// A snapshot anchor was placed.
    AnchorPlaced {
        /// Identifier of the recognized site.
        site_id: String,
        /// Name of the recognized site.
        site_name: String,
    },
    /// A snapshot anchor was tapped.
    AnchorClicked {
        /// Identifier of the site.
        site_id: Option<String>,
        /// Name of the site.
        site_name: String,
        /// Full description, once the detail fetch has completed.
        description: Option<String>,
    },
    /// A layer label was tapped.
    LayerLabelClicked {
        /// Place identifier.
        place_id: String,
        /// Place name.
        name: String,
    },
    /// A layer label's close button was tapped and the label removed.
    LayerLabelClosed {
        /// Place identifier.
        place_id: String,
        /// Place name.
        name: String,
    },
    /// The set of snapshot anchors changed.
    AnchorsChanged {
        /// Number of snapshot anchors now in the store.
        count: usize,
    },
    /// A nearby-places fetch completed.
    PlacesReceived {
        /// Number of places received.
        count: usize,
    },
    /// A geo label was placed.
    GeoAnchorPlaced {
        /// Place identifier.
        id: String,
        /// Place name.
        name: String,
    },
    /// Geospatial tracking is not available on this device.
    GeospatialUnsupported,
}

/// Sending half of the UI event stream.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: async_channel::Sender<UiEvent>,
}

impl EventSender {
    /// Deliver an event. Events are dropped once the receiver is gone.
    pub fn emit(&self, event: UiEvent) {
        if self.tx.try_send(event).is_err() {
            tracing::debug!("UI event receiver closed, dropping event");
        }
    }

    /// Deliver a user-visible message.
    pub fn message(&self, message: UserMessage) {
        tracing::info!("{message}");
        self.emit(UiEvent::Message(message));
    }
}

/// Create a connected event sender and receiver.
#[must_use]
pub fn channel() -> (EventSender, async_channel::Receiver<UiEvent>) {
    let (tx, rx) = async_channel::unbounded();
    (EventSender { tx }, rx)
}

/// Drain every event currently queued on a receiver.
#[must_use]
pub fn drain(rx: &async_channel::Receiver<UiEvent>) -> Vec<UiEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
