//! # Forwarding Decorator
//!
//! [`PeerForwardingProcessorDecorator`] wraps one instance of a stateful
//! processor. Each `execute` call:
//!
//! 1. classifies every record as forwardable, local-only or skipped;
//! 2. hands the forwardable records to the shared [`PeerForwarder`], keeping
//!    the ones this instance must process (owned here, or not delivered);
//! 3. adds the local-only records and the records peers sent here;
//! 4. runs the wrapped processor on that merged set;
//! 5. appends the skipped records, unmodified, to its output.
//!
//! When the processor's identification keys are in the pipeline's
//! [`ExcludeSet`], forwardable records are treated as local-only and the
//! forwarder's `forward_records` is never called.

use crate::error::ConfigurationError;
use crate::event::Record;
use crate::identification::ExcludeSet;
use crate::peer_forwarder::{PeerForwarder, PeerForwarderProvider};
use crate::processor::{Classification, PipelineProcessor, Processor, RoutableProcessor, classify};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Decorates every instance of one stateful processor type.
///
/// All processors must be [`PipelineProcessor::Routable`] and declare the same
/// non-empty identification keys. One forwarder is obtained from `provider`
/// and shared by the returned decorators. An empty list yields an empty list
/// and registers nothing.
///
/// # Errors
///
/// - [`ConfigurationError::UnsupportedPlugin`] when a processor is not routable.
/// - [`ConfigurationError::MismatchedIdentificationKeys`] when instances
///   disagree on their keys.
/// - [`ConfigurationError::EmptyIdentificationKeys`] when the keys are empty.
pub fn decorate_processors(
  processors: Vec<PipelineProcessor>,
  provider: &PeerForwarderProvider,
  pipeline_name: &str,
  plugin_id: &str,
  exclude_set: &ExcludeSet,
  worker_thread_count: usize,
) -> Result<Vec<Box<dyn Processor>>, ConfigurationError> {
  if processors.is_empty() {
    return Ok(Vec::new());
  }

  let mut routables = Vec::with_capacity(processors.len());
  for processor in processors {
    match processor.into_routable() {
      Some(routable) => routables.push(routable),
      None => {
        return Err(ConfigurationError::UnsupportedPlugin {
          plugin_id: plugin_id.to_string(),
        });
      }
    }
  }

  let identification_keys = routables[0].identification_keys();
  for processor in &routables[1..] {
    let found = processor.identification_keys();
    if found != identification_keys {
      return Err(ConfigurationError::MismatchedIdentificationKeys {
        pipeline_name: pipeline_name.to_string(),
        plugin_id: plugin_id.to_string(),
        expected: identification_keys.to_string(),
        found: found.to_string(),
      });
    }
  }
  if identification_keys.is_empty() {
    return Err(ConfigurationError::EmptyIdentificationKeys {
      plugin_id: plugin_id.to_string(),
    });
  }

  let peer_forwarder = provider.register(
    pipeline_name,
    routables[0].as_ref(),
    plugin_id,
    &identification_keys,
    worker_thread_count,
  )?;

  Ok(
    routables
      .into_iter()
      .map(|inner| {
        let forwarding_disabled = exclude_set.contains(&inner.identification_keys());
        Box::new(PeerForwardingProcessorDecorator::new(
          Arc::clone(&peer_forwarder),
          inner,
          forwarding_disabled,
        )) as Box<dyn Processor>
      })
      .collect(),
  )
}

/// A stateful processor behind peer forwarding.
pub struct PeerForwardingProcessorDecorator {
  peer_forwarder: Arc<dyn PeerForwarder>,
  inner: Box<dyn RoutableProcessor>,
  forwarding_disabled: bool,
}

impl PeerForwardingProcessorDecorator {
  /// Wraps `inner`. With `forwarding_disabled`, every forwardable record is
  /// processed locally.
  pub fn new(
    peer_forwarder: Arc<dyn PeerForwarder>,
    inner: Box<dyn RoutableProcessor>,
    forwarding_disabled: bool,
  ) -> Self {
    Self {
      peer_forwarder,
      inner,
      forwarding_disabled,
    }
  }

  /// True when the wrapped processor's keys are excluded from forwarding.
  pub fn is_forwarding_disabled(&self) -> bool {
    self.forwarding_disabled
  }
}

#[async_trait]
impl Processor for PeerForwardingProcessorDecorator {
  fn name(&self) -> &str {
    self.inner.name()
  }

  async fn execute(&mut self, records: Vec<Record>) -> Vec<Record> {
    let mut forwardable = Vec::new();
    let mut local = Vec::new();
    let mut skipped = Vec::new();
    for record in records {
      match classify(self.inner.as_ref(), record.data()) {
        Classification::Forwardable => forwardable.push(record),
        Classification::LocalOnly => local.push(record),
        Classification::Skip => skipped.push(record),
      }
    }

    if self.forwarding_disabled {
      local.append(&mut forwardable);
    } else {
      let mut owned = self.peer_forwarder.forward_records(forwardable).await;
      owned.append(&mut local);
      local = owned;
    }
    local.extend(self.peer_forwarder.receive_records());

    debug!(
      processor = %self.inner.name(),
      local = local.len(),
      skipped = skipped.len(),
      "executing stateful processor"
    );
    let mut output = self.inner.execute(local).await;
    output.append(&mut skipped);
    output
  }

  fn prepare_for_shutdown(&mut self) {
    self.inner.prepare_for_shutdown();
  }

  fn is_ready_for_shutdown(&self) -> bool {
    self.inner.is_ready_for_shutdown()
  }

  fn shutdown(&mut self) {
    self.inner.shutdown();
  }
}
