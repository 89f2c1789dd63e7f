//! Event bus for grading notifications
//!
//! Provides pub/sub messaging using Tokio broadcast channels. The score
//! record trail in the paper store is the durable history; the bus only
//! fans out notifications to live subscribers.

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

use super::types::GradingEvent;
use crate::state::{GraderId, PaperId};

/// Default channel capacity for broadcast
pub const DEFAULT_CAPACITY: usize = 256;

/// Error type for event bus operations
#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    #[error("Failed to send event: {0}")]
    SendFailed(String),

    #[error("Channel closed")]
    ChannelClosed,
}

/// Result type for event bus operations
pub type EventBusResult<T> = Result<T, EventBusError>;

/// Shared reference to EventBus
pub type SharedEventBus = Arc<EventBus>;

/// Event bus with broadcast channels
pub struct EventBus {
    sender: broadcast::Sender<GradingEvent>,
}

impl EventBus {
    /// Create a new event bus with the default capacity
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a new event bus that buffers up to `capacity` events per subscriber
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Create a shared reference to this event bus
    pub fn shared(self) -> SharedEventBus {
        Arc::new(self)
    }

    /// Publish an event to all subscribers
    pub fn publish(&self, event: GradingEvent) -> EventBusResult<()> {
        let event_type = event.event_type();

        // Broadcast to subscribers (ignore if no receivers)
        match self.sender.send(event) {
            Ok(count) => {
                debug!(event_type, receivers = count, "Event published");
                Ok(())
            }
            Err(_) => {
                debug!(event_type, "Event published (no receivers)");
                Ok(())
            }
        }
    }

    /// Subscribe to receive events
    pub fn subscribe(&self) -> broadcast::Receiver<GradingEvent> {
        self.sender.subscribe()
    }

    /// Get the number of current subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Check if the bus has any subscribers
    pub fn has_subscribers(&self) -> bool {
        self.sender.receiver_count() > 0
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Event filter for selective subscription
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    /// Filter by paper ID
    pub paper_id: Option<PaperId>,
    /// Filter by grader ID
    pub grader_id: Option<GraderId>,
    /// Filter by event types
    pub event_types: Option<Vec<String>>,
}

impl EventFilter {
    /// Create a new empty filter (matches all events)
    pub fn new() -> Self {
        Self::default()
    }

    /// Filter by paper ID
    pub fn paper(mut self, paper_id: PaperId) -> Self {
        self.paper_id = Some(paper_id);
        self
    }

    /// Filter by grader ID
    pub fn grader(mut self, grader_id: GraderId) -> Self {
        self.grader_id = Some(grader_id);
        self
    }

    /// Filter by event types
    pub fn types(mut self, event_types: Vec<&str>) -> Self {
        self.event_types = Some(event_types.into_iter().map(String::from).collect());
        self
    }

    /// Check if an event matches this filter
    ///
    /// Events that carry no paper (or grader) pass the corresponding filter.
    pub fn matches(&self, event: &GradingEvent) -> bool {
        if let (Some(want), Some(got)) = (self.paper_id, event.paper_id()) {
            if want != got {
                return false;
            }
        }

        if let (Some(want), Some(got)) = (self.grader_id, event.grader_id()) {
            if want != got {
                return false;
            }
        }

        if let Some(ref types) = self.event_types {
            if !types.iter().any(|t| t == event.event_type()) {
                return false;
            }
        }

        true
    }
}

/// Filtered event receiver that only yields matching events
pub struct FilteredReceiver {
    receiver: broadcast::Receiver<GradingEvent>,
    filter: EventFilter,
}

impl FilteredReceiver {
    /// Create a new filtered receiver
    pub fn new(receiver: broadcast::Receiver<GradingEvent>, filter: EventFilter) -> Self {
        Self { receiver, filter }
    }

    /// Receive the next matching event
    pub async fn recv(&mut self) -> Result<GradingEvent, broadcast::error::RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.filter.matches(&event) {
                return Ok(event);
            }
        }
    }

    /// Drain already-buffered matching events without waiting
    pub fn drain(&mut self) -> Vec<GradingEvent> {
        let mut events = Vec::new();
        loop {
            match self.receiver.try_recv() {
                Ok(event) if self.filter.matches(&event) => events.push(event),
                Ok(_) => continue,
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => break,
            }
        }
        events
    }
}

/// Extension trait for subscribing with filters
pub trait EventBusExt {
    /// Subscribe with a filter
    fn subscribe_filtered(&self, filter: EventFilter) -> FilteredReceiver;
}

impl EventBusExt for EventBus {
    fn subscribe_filtered(&self, filter: EventFilter) -> FilteredReceiver {
        FilteredReceiver::new(self.subscribe(), filter)
    }
}

impl EventBusExt for SharedEventBus {
    fn subscribe_filtered(&self, filter: EventFilter) -> FilteredReceiver {
        FilteredReceiver::new(self.subscribe(), filter)
    }
}
