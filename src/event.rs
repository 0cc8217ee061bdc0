//! # Events and Records
//!
//! [`Event`] is the structured document flowing through a pipeline and
//! [`Record`] is the unit processors operate on: one shared event plus
//! pipeline-local metadata.
//!
//! Events are shared as `Arc<Event>` so fanning a record out to a forwarding
//! batch and keeping it for local fallback is a reference-count increment, not
//! a copy.
//!
//! ## Example
//!
//! ```rust
//! use peerweave::event::{Event, Record};
//! use serde_json::json;
//!
//! let event = Event::builder("log")
//!   .with("user", json!("alice"))
//!   .with("request", json!({ "path": "/login" }))
//!   .build();
//! assert_eq!(event.get("request/path"), Some(&json!("/login")));
//!
//! let record = Record::new(event);
//! assert!(record.acknowledgement().is_none());
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

/// Metadata carried with an event across the network.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventMetadata {
  /// Free-form event type (e.g. `log`, `trace`).
  pub event_type: String,
  /// When the event entered the pipeline.
  pub time_received: DateTime<Utc>,
}

/// A structured key/value document.
///
/// Immutable by contract once built: the forwarding layer only reads field
/// values from it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
  metadata: EventMetadata,
  data: Map<String, Value>,
}

impl Event {
  /// Starts building an event of the given type.
  pub fn builder(event_type: impl Into<String>) -> EventBuilder {
    EventBuilder {
      event_type: event_type.into(),
      time_received: None,
      data: Map::new(),
    }
  }

  /// Wraps a JSON object. Returns `None` when `value` is not an object.
  pub fn from_json(event_type: impl Into<String>, value: Value) -> Option<Self> {
    match value {
      Value::Object(data) => Some(Self {
        metadata: EventMetadata {
          event_type: event_type.into(),
          time_received: Utc::now(),
        },
        data,
      }),
      _ => None,
    }
  }

  /// Looks up a field. `/`-separated paths descend into nested objects, so
  /// `"request/path"` and `"/request/path"` both address `{"request": {"path": ..}}`.
  pub fn get(&self, key: &str) -> Option<&Value> {
    let mut segments = key.trim_start_matches('/').split('/');
    let first = segments.next()?;
    let mut current = self.data.get(first)?;
    for segment in segments {
      current = current.as_object()?.get(segment)?;
    }
    Some(current)
  }

  /// Returns the event's metadata.
  pub fn metadata(&self) -> &EventMetadata {
    &self.metadata
  }

  /// Returns the event's fields.
  pub fn data(&self) -> &Map<String, Value> {
    &self.data
  }

  /// Returns the event body as a JSON value.
  pub fn to_json(&self) -> Value {
    Value::Object(self.data.clone())
  }
}

/// Builder for [`Event`].
#[derive(Debug)]
pub struct EventBuilder {
  event_type: String,
  time_received: Option<DateTime<Utc>>,
  data: Map<String, Value>,
}

impl EventBuilder {
  /// Sets a top-level field.
  #[must_use]
  pub fn with(mut self, key: impl Into<String>, value: Value) -> Self {
    self.data.insert(key.into(), value);
    self
  }

  /// Overrides the receive timestamp (defaults to now).
  #[must_use]
  pub fn with_time_received(mut self, time_received: DateTime<Utc>) -> Self {
    self.time_received = Some(time_received);
    self
  }

  /// Builds the event.
  pub fn build(self) -> Event {
    Event {
      metadata: EventMetadata {
        event_type: self.event_type,
        time_received: self.time_received.unwrap_or_else(Utc::now),
      },
      data: self.data,
    }
  }
}

type AcknowledgeFn = dyn Fn(bool) + Send + Sync;

/// Callback used to acknowledge (or negatively acknowledge) a record's source.
///
/// Acknowledgement handles are pipeline-local: they never cross the network,
/// so records received from peers carry none.
#[derive(Clone)]
pub struct AcknowledgementHandle {
  callback: Arc<AcknowledgeFn>,
}

impl AcknowledgementHandle {
  /// Creates a handle around a callback receiving `true` on success.
  pub fn new<F>(callback: F) -> Self
  where
    F: Fn(bool) + Send + Sync + 'static,
  {
    Self {
      callback: Arc::new(callback),
    }
  }

  /// Invokes the callback.
  pub fn acknowledge(&self, result: bool) {
    (self.callback)(result)
  }
}

impl fmt::Debug for AcknowledgementHandle {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str("AcknowledgementHandle")
  }
}

/// One event plus pipeline metadata.
#[derive(Clone, Debug)]
pub struct Record {
  data: Arc<Event>,
  acknowledgement: Option<AcknowledgementHandle>,
}

impl Record {
  /// Creates a record with no acknowledgement handle.
  pub fn new(event: Event) -> Self {
    Self::from_shared(Arc::new(event))
  }

  /// Creates a record around an already shared event.
  pub fn from_shared(data: Arc<Event>) -> Self {
    Self {
      data,
      acknowledgement: None,
    }
  }

  /// Attaches an acknowledgement handle.
  #[must_use]
  pub fn with_acknowledgement(mut self, handle: AcknowledgementHandle) -> Self {
    self.acknowledgement = Some(handle);
    self
  }

  /// Returns the event.
  pub fn data(&self) -> &Event {
    &self.data
  }

  /// Returns the shared event, for handing to a transport without copying.
  pub fn shared_data(&self) -> &Arc<Event> {
    &self.data
  }

  /// Returns the acknowledgement handle, if any.
  pub fn acknowledgement(&self) -> Option<&AcknowledgementHandle> {
    self.acknowledgement.as_ref()
  }
}

impl PartialEq for Record {
  fn eq(&self, other: &Self) -> bool {
    self.data == other.data
  }
}
