use crate::capture::CaptureStage;
use crate::error::EventBusError;
use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Events emitted by the check-in pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CheckinEvent {
    /// The capture state machine moved to another stage
    StageChanged {
        session_id: u64,
        venue_id: String,
        from: CaptureStage,
        to: CaptureStage,
        timestamp: SystemTime,
    },
    /// A frame was grabbed and is waiting for review
    CaptureCompleted {
        session_id: u64,
        venue_id: String,
        frame_id: u64,
        width: u32,
        height: u32,
    },
    /// A record was written to the local asset store
    AssetSaved {
        key: String,
        venue_id: String,
        byte_size: u64,
        mime_type: String,
    },
    /// The archive variant was uploaded and recorded against the venue
    ArchiveSynced { venue_id: String, reference: String },
    /// The upload was skipped because the venue already has an archive
    ArchiveSkipped { venue_id: String, reason: String },
    /// The upload failed; the local record is unaffected
    ArchiveFailed { venue_id: String, error: String },
    /// The session reached `Failed`
    CheckinFailed {
        session_id: u64,
        venue_id: String,
        reason: String,
        retry_scheduled: bool,
    },
    /// A system error occurred in a component
    SystemError { component: String, error: String },
}

impl CheckinEvent {
    /// Get a human-readable description of the event
    pub fn description(&self) -> String {
        match self {
            CheckinEvent::StageChanged {
                venue_id, from, to, ..
            } => format!("Check-in at {}: {} -> {}", venue_id, from, to),
            CheckinEvent::CaptureCompleted {
                frame_id,
                width,
                height,
                ..
            } => format!("Captured frame {} ({}x{})", frame_id, width, height),
            CheckinEvent::AssetSaved {
                key, byte_size, ..
            } => format!("Saved asset {} ({} bytes)", key, byte_size),
            CheckinEvent::ArchiveSynced {
                venue_id,
                reference,
            } => format!("Archived {} for {}", reference, venue_id),
            CheckinEvent::ArchiveSkipped { venue_id, reason } => {
                format!("Archive skipped for {}: {}", venue_id, reason)
            }
            CheckinEvent::ArchiveFailed { venue_id, error } => {
                format!("Archive failed for {}: {}", venue_id, error)
            }
            CheckinEvent::CheckinFailed {
                venue_id,
                reason,
                retry_scheduled,
                ..
            } => format!(
                "Check-in at {} failed: {}{}",
                venue_id,
                reason,
                if *retry_scheduled { " (retrying)" } else { "" }
            ),
            CheckinEvent::SystemError { component, error } => {
                format!("Error in {}: {}", component, error)
            }
        }
    }

    /// Get the event type as a string for filtering
    pub fn event_type(&self) -> &'static str {
        match self {
            CheckinEvent::StageChanged { .. } => "stage_changed",
            CheckinEvent::CaptureCompleted { .. } => "capture_completed",
            CheckinEvent::AssetSaved { .. } => "asset_saved",
            CheckinEvent::ArchiveSynced { .. } => "archive_synced",
            CheckinEvent::ArchiveSkipped { .. } => "archive_skipped",
            CheckinEvent::ArchiveFailed { .. } => "archive_failed",
            CheckinEvent::CheckinFailed { .. } => "checkin_failed",
            CheckinEvent::SystemError { .. } => "system_error",
        }
    }

    /// Venue the event belongs to, if any
    pub fn venue_id(&self) -> Option<&str> {
        match self {
            CheckinEvent::StageChanged { venue_id, .. }
            | CheckinEvent::CaptureCompleted { venue_id, .. }
            | CheckinEvent::AssetSaved { venue_id, .. }
            | CheckinEvent::ArchiveSynced { venue_id, .. }
            | CheckinEvent::ArchiveSkipped { venue_id, .. }
            | CheckinEvent::ArchiveFailed { venue_id, .. }
            | CheckinEvent::CheckinFailed { venue_id, .. } => Some(venue_id),
            CheckinEvent::SystemError { .. } => None,
        }
    }
}

/// Async event bus for component coordination using broadcast channels
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CheckinEvent>,
    debug_logging: bool,
}

impl EventBus {
    /// Create a new event bus with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            debug_logging: false,
        }
    }

    /// Also log routine events (captures, saves, skips) at debug level
    pub fn debug_logging(mut self, enabled: bool) -> Self {
        self.debug_logging = enabled;
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CheckinEvent> {
        self.sender.subscribe()
    }

    /// Subscribe with a filter applied on receive
    pub fn subscribe_filtered(&self, filter: EventFilter, name: impl Into<String>) -> EventReceiver {
        EventReceiver::new(self.sender.subscribe(), filter, name.into())
    }

    /// Publish an event to all subscribers; fails when nobody is listening
    pub async fn publish(&self, event: CheckinEvent) -> Result<usize, EventBusError> {
        match &event {
            CheckinEvent::StageChanged { from, to, .. } => {
                debug!("Stage changed: {} -> {}", from, to);
            }
            CheckinEvent::AssetSaved { key, .. } => {
                info!("Asset saved: {}", key);
            }
            CheckinEvent::ArchiveFailed { venue_id, error } => {
                warn!("Archive failed for {}: {}", venue_id, error);
            }
            CheckinEvent::SystemError { component, error } => {
                error!("System error in {}: {}", component, error);
            }
            _ => {
                if self.debug_logging {
                    debug!("Event: {}", event.description());
                }
            }
        }

        self.sender
            .send(event)
            .map_err(|e| EventBusError::PublishFailed {
                details: e.to_string(),
            })
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn has_subscribers(&self) -> bool {
        self.sender.receiver_count() > 0
    }
}

/// Event filter for selective event handling
#[derive(Debug, Clone)]
pub enum EventFilter {
    /// Accept all events
    All,
    /// Accept only specific event types
    EventTypes(Vec<&'static str>),
    /// Accept events for specific venues
    Venues(Vec<String>),
    /// Custom filter function
    Custom(fn(&CheckinEvent) -> bool),
}

impl EventFilter {
    pub fn matches(&self, event: &CheckinEvent) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::EventTypes(types) => types.contains(&event.event_type()),
            EventFilter::Venues(venues) => event
                .venue_id()
                .map(|venue| venues.iter().any(|v| v == venue))
                .unwrap_or(false),
            EventFilter::Custom(filter_fn) => filter_fn(event),
        }
    }
}

/// Event receiver with filtering
pub struct EventReceiver {
    receiver: broadcast::Receiver<CheckinEvent>,
    filter: EventFilter,
    name: String,
}

impl EventReceiver {
    pub fn new(
        receiver: broadcast::Receiver<CheckinEvent>,
        filter: EventFilter,
        name: String,
    ) -> Self {
        Self {
            receiver,
            filter,
            name,
        }
    }

    /// Receive the next event that passes the filter; lagging skips ahead
    pub async fn recv(&mut self) -> Result<CheckinEvent, EventBusError> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    if self.filter.matches(&event) {
                        return Ok(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Receiver '{}' lagged behind by {} events", self.name, n);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Event bus closed for receiver '{}'", self.name);
                    return Err(EventBusError::ChannelClosed);
                }
            }
        }
    }

    /// Try to receive an event without blocking
    pub fn try_recv(&mut self) -> Result<Option<CheckinEvent>, EventBusError> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.filter.matches(&event) {
                        return Ok(Some(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return Ok(None),
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    warn!("Receiver '{}' lagged behind by {} events", self.name, n);
                }
                Err(broadcast::error::TryRecvError::Closed) => {
                    return Err(EventBusError::ChannelClosed);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{timeout, Duration};

    fn stage_changed(venue: &str, to: CaptureStage) -> CheckinEvent {
        CheckinEvent::StageChanged {
            session_id: 1,
            venue_id: venue.to_string(),
            from: CaptureStage::Initializing,
            to,
            timestamp: SystemTime::now(),
        }
    }

    #[tokio::test]
    async fn test_publish_reaches_every_subscriber() {
        let event_bus = EventBus::new(10);
        let mut first = event_bus.subscribe();
        let mut second = event_bus.subscribe();
        assert_eq!(event_bus.subscriber_count(), 2);

        let delivered = event_bus
            .publish(stage_changed("pub-1", CaptureStage::CameraStarting))
            .await
            .unwrap();
        assert_eq!(delivered, 2);

        for receiver in [&mut first, &mut second] {
            let event = timeout(Duration::from_millis(100), receiver.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(event.event_type(), "stage_changed");
        }
    }

    #[tokio::test]
    async fn test_debug_logging_bus_still_delivers() {
        let event_bus = EventBus::new(4).debug_logging(true);
        let mut receiver = event_bus.subscribe();

        event_bus
            .publish(CheckinEvent::ArchiveSynced {
                venue_id: "pub-1".to_string(),
                reference: "archive/pub-1/1.jpg".to_string(),
            })
            .await
            .unwrap();

        let event = receiver.try_recv().unwrap();
        assert_eq!(event.event_type(), "archive_synced");
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_fails() {
        let event_bus = EventBus::new(10);
        let result = event_bus
            .publish(CheckinEvent::SystemError {
                component: "test".to_string(),
                error: "nobody listening".to_string(),
            })
            .await;
        assert!(matches!(result, Err(EventBusError::PublishFailed { .. })));
    }

    #[test]
    fn test_event_filters() {
        let by_type = EventFilter::EventTypes(vec!["archive_synced"]);
        let synced = CheckinEvent::ArchiveSynced {
            venue_id: "pub-1".to_string(),
            reference: "archive/pub-1/1.jpg".to_string(),
        };
        assert!(by_type.matches(&synced));
        assert!(!by_type.matches(&stage_changed("pub-1", CaptureStage::Success)));

        let by_venue = EventFilter::Venues(vec!["pub-2".to_string()]);
        assert!(by_venue.matches(&stage_changed("pub-2", CaptureStage::Success)));
        assert!(!by_venue.matches(&synced));
        assert!(!by_venue.matches(&CheckinEvent::SystemError {
            component: "x".to_string(),
            error: "y".to_string(),
        }));
    }

    #[tokio::test]
    async fn test_filtered_receiver_skips_other_events() {
        let event_bus = EventBus::new(10);
        let mut receiver =
            event_bus.subscribe_filtered(EventFilter::EventTypes(vec!["checkin_failed"]), "test");

        event_bus
            .publish(stage_changed("pub-1", CaptureStage::Failed))
            .await
            .unwrap();
        event_bus
            .publish(CheckinEvent::CheckinFailed {
                session_id: 1,
                venue_id: "pub-1".to_string(),
                reason: "Not a match".to_string(),
                retry_scheduled: true,
            })
            .await
            .unwrap();

        let event = timeout(Duration::from_millis(100), receiver.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(event.description().contains("retrying"));
        assert!(receiver.try_recv().unwrap().is_none());
    }
}
