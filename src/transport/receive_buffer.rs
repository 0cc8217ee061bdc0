//! Bounded inbound queues and the routing table that finds them.

use crate::error::TransportError;
use crate::event::Event;
use crate::identification::IdentificationKeySet;
use crate::transport::wire::WireEvents;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, RwLock};
use tracing::debug;

/// Bounded queue of events peers forwarded to one peer forwarder.
///
/// Whole batches are accepted or refused; a full queue never drops entries it
/// already holds.
#[derive(Debug)]
pub struct ReceiveBuffer {
  identification_keys: IdentificationKeySet,
  capacity: usize,
  queue: Mutex<VecDeque<Arc<Event>>>,
}

impl ReceiveBuffer {
  /// Creates an empty buffer.
  pub fn new(identification_keys: IdentificationKeySet, capacity: usize) -> Self {
    Self {
      identification_keys,
      capacity,
      queue: Mutex::new(VecDeque::with_capacity(capacity)),
    }
  }

  /// Keys of the forwarder this buffer belongs to.
  pub fn identification_keys(&self) -> &IdentificationKeySet {
    &self.identification_keys
  }

  /// Maximum number of queued events.
  pub fn capacity(&self) -> usize {
    self.capacity
  }

  /// Number of queued events.
  pub fn len(&self) -> usize {
    self.lock().len()
  }

  /// True when nothing is queued.
  pub fn is_empty(&self) -> bool {
    self.lock().is_empty()
  }

  /// Enqueues all of `events`, or none of them if they do not fit.
  pub fn try_enqueue_all(&self, events: Vec<Arc<Event>>) -> Result<(), TransportError> {
    let mut queue = self.lock();
    if queue.len() + events.len() > self.capacity {
      return Err(TransportError::BufferFull {
        pending: queue.len(),
        incoming: events.len(),
        capacity: self.capacity,
      });
    }
    queue.extend(events);
    Ok(())
  }

  /// Removes and returns everything queued.
  pub fn drain(&self) -> Vec<Arc<Event>> {
    self.lock().drain(..).collect()
  }

  fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<Arc<Event>>> {
    self.queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
  }
}

type BufferKey = (String, String);

/// Receive buffers of every peer forwarder in a process, keyed by
/// (pipeline name, plugin id).
///
/// The forwarding server uses this table to route an incoming batch to the
/// right forwarder.
#[derive(Debug, Default)]
pub struct ReceiveBuffers {
  buffers: RwLock<HashMap<BufferKey, Arc<ReceiveBuffer>>>,
}

impl ReceiveBuffers {
  /// Creates an empty table.
  pub fn new() -> Self {
    Self::default()
  }

  /// Returns the buffer for (pipeline, plugin), creating it if needed.
  pub fn register(
    &self,
    pipeline_name: &str,
    plugin_id: &str,
    identification_keys: IdentificationKeySet,
    capacity: usize,
  ) -> Arc<ReceiveBuffer> {
    let mut buffers = self
      .buffers
      .write()
      .unwrap_or_else(|poisoned| poisoned.into_inner());
    Arc::clone(
      buffers
        .entry((pipeline_name.to_string(), plugin_id.to_string()))
        .or_insert_with(|| Arc::new(ReceiveBuffer::new(identification_keys, capacity))),
    )
  }

  /// Looks up the buffer for (pipeline, plugin).
  pub fn get(&self, pipeline_name: &str, plugin_id: &str) -> Option<Arc<ReceiveBuffer>> {
    self
      .buffers
      .read()
      .unwrap_or_else(|poisoned| poisoned.into_inner())
      .get(&(pipeline_name.to_string(), plugin_id.to_string()))
      .cloned()
  }

  /// Number of registered buffers.
  pub fn len(&self) -> usize {
    self
      .buffers
      .read()
      .unwrap_or_else(|poisoned| poisoned.into_inner())
      .len()
  }

  /// True when no buffer is registered.
  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Routes an incoming batch to its buffer. Returns the number of events
  /// enqueued.
  pub fn accept(&self, request: WireEvents) -> Result<usize, TransportError> {
    let buffer = self
      .get(
        &request.destination_pipeline_name,
        &request.destination_plugin_id,
      )
      .ok_or_else(|| TransportError::UnknownDestination {
        pipeline_name: request.destination_pipeline_name.clone(),
        plugin_id: request.destination_plugin_id.clone(),
      })?;

    if request.identification_keys != *buffer.identification_keys() {
      return Err(TransportError::KeyMismatch {
        expected: buffer.identification_keys().to_string(),
        found: request.identification_keys.to_string(),
      });
    }

    let count = request.events.len();
    buffer.try_enqueue_all(request.events.into_iter().map(|e| e.event).collect())?;
    debug!(
      pipeline = %request.destination_pipeline_name,
      plugin_id = %request.destination_plugin_id,
      count,
      "accepted forwarded batch"
    );
    Ok(count)
  }
}
