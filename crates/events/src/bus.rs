//! In-process event bus backed by a `tokio::sync::broadcast` channel.
//!
//! [`EventBus`] is the publish/subscribe hub for [`KbEvent`]s. Share it via
//! `Arc<EventBus>`; publishing never blocks and never fails.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use wikigraph_core::article::ChangeType;

// ---------------------------------------------------------------------------
// KbEvent
// ---------------------------------------------------------------------------

/// What happened. Serialized with a kebab-case `type` tag and camelCase
/// fields, e.g. `{"type":"article-changed","oldId":"mario",...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum EventPayload {
    ArticleCreated {
        id: String,
        title: String,
        user: String,
    },
    ArticleCreatedNeedsReview {
        id: String,
        title: String,
        user: String,
    },
    ArticleChanged {
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        old_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        old_title: Option<String>,
        title: String,
        user: String,
        change_type: ChangeType,
    },
    ArticleDeleted {
        id: String,
        title: Option<String>,
        user: String,
    },
    UnreviewedCount {
        count: u64,
    },
    GraphIndexPublished {
        generation: u64,
        articles: usize,
    },
    SchemaMigrated {
        generation: u64,
        from_index: String,
        to_index: String,
        documents: u64,
    },
    SchemaMigrationFailed {
        generation: u64,
        error: String,
    },
    AliasFlipFailed {
        from_index: String,
        to_index: String,
        error: String,
    },
}

impl EventPayload {
    /// The wire name of the event, e.g. `"article-created"`.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::ArticleCreated { .. } => "article-created",
            Self::ArticleCreatedNeedsReview { .. } => "article-created-needs-review",
            Self::ArticleChanged { .. } => "article-changed",
            Self::ArticleDeleted { .. } => "article-deleted",
            Self::UnreviewedCount { .. } => "unreviewed-count",
            Self::GraphIndexPublished { .. } => "graph-index-published",
            Self::SchemaMigrated { .. } => "schema-migrated",
            Self::SchemaMigrationFailed { .. } => "schema-migration-failed",
            Self::AliasFlipFailed { .. } => "alias-flip-failed",
        }
    }

    /// Operator alerts: migration outcomes that need human attention.
    pub fn is_alert(&self) -> bool {
        matches!(
            self,
            Self::SchemaMigrationFailed { .. } | Self::AliasFlipFailed { .. }
        )
    }
}

/// A knowledge-base event with the time it was raised.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KbEvent {
    #[serde(flatten)]
    pub payload: EventPayload,

    /// When the event was created (UTC).
    pub timestamp: DateTime<Utc>,
}

impl KbEvent {
    pub fn new(payload: EventPayload) -> Self {
        Self {
            payload,
            timestamp: Utc::now(),
        }
    }

    pub fn event_type(&self) -> &'static str {
        self.payload.event_type()
    }
}

impl From<EventPayload> for KbEvent {
    fn from(payload: EventPayload) -> Self {
        Self::new(payload)
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
pub const DEFAULT_CAPACITY: usize = 1024;

/// In-process fan-out event bus.
///
/// Wraps a [`broadcast::Sender`] so that any number of subscribers can
/// independently receive every published [`KbEvent`].
///
/// # Usage
///
/// ```rust
/// use wikigraph_events::bus::{EventBus, EventPayload};
///
/// let bus = EventBus::default();
/// let mut rx = bus.subscribe();
///
/// bus.publish(EventPayload::UnreviewedCount { count: 3 });
/// ```
#[derive(Debug)]
pub struct EventBus {
    sender: broadcast::Sender<KbEvent>,
}

impl EventBus {
    /// Create a bus with a specific channel capacity.
    ///
    /// When the buffer is full, the oldest un-consumed messages are dropped
    /// and slow receivers will observe a `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish an event to all current subscribers.
    ///
    /// If there are no active subscribers the event is silently dropped.
    pub fn publish(&self, event: impl Into<KbEvent>) {
        // Ignore the SendError: it only means there are zero receivers.
        let _ = self.sender.send(event.into());
    }

    /// Subscribe to all events published on this bus.
    pub fn subscribe(&self) -> broadcast::Receiver<KbEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
