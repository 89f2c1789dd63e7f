//! Event-driven notifications for the grading engine
//!
//! Every committed transition (work handed out, score submitted, paper
//! finalized, escalation raised, assignment reclaimed) is announced on a
//! broadcast bus after the store commit succeeds. Publishing never fails a
//! grading operation.
//!
//! # Event Flow
//!
//! ```text
//! ┌──────────────┐     ┌──────────────┐     ┌──────────────┐
//! │    Engine    │────▶│  Event Bus   │────▶│  Subscribers │
//! │  (publish)   │     │  (broadcast) │     │   (recv)     │
//! └──────────────┘     └──────────────┘     └──────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use grading::events::{EventBus, EventBusExt, EventFilter};
//!
//! let bus = EventBus::new().shared();
//! let mut finals = bus.subscribe_filtered(EventFilter::new().types(vec!["paper_finalized"]));
//! let event = finals.recv().await?;
//! ```

pub mod bus;
pub mod types;

pub use bus::{
    EventBus, EventBusError, EventBusExt, EventBusResult, EventFilter, FilteredReceiver,
    SharedEventBus, DEFAULT_CAPACITY,
};
pub use types::{EventId, GradingEvent};
