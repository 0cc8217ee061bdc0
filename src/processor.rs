//! # Processor Contracts
//!
//! The pipeline engine drives processors through the [`Processor`] trait. A
//! stateful processor that needs all events sharing a key on one instance also
//! implements [`RoutableProcessor`], declaring its identification keys and how
//! each event should be classified.
//!
//! The capability is explicit: the pipeline builder hands processors to the
//! forwarding layer as [`PipelineProcessor`], and only the
//! [`Routable`](PipelineProcessor::Routable) variant can be decorated. The
//! check happens once, at construction.

use crate::event::{Event, Record};
use crate::identification::IdentificationKeySet;
use async_trait::async_trait;

/// Base processor contract invoked by the pipeline engine.
///
/// Each instance is driven by at most one worker at a time, hence `&mut self`.
#[async_trait]
pub trait Processor: Send {
  /// Name used in logs.
  fn name(&self) -> &str;

  /// Processes a batch and returns the records to pass downstream.
  async fn execute(&mut self, records: Vec<Record>) -> Vec<Record>;

  /// Signals that shutdown is coming; the processor may start flushing.
  fn prepare_for_shutdown(&mut self) {}

  /// True once the processor has nothing left to flush.
  fn is_ready_for_shutdown(&self) -> bool {
    true
  }

  /// Releases resources. Called once.
  fn shutdown(&mut self) {}
}

/// Capability of processors whose correctness depends on seeing every event
/// sharing an identification-key fingerprint.
///
/// Classification is evaluated per event, in order: forwardable, else
/// local-only, else skipped (passed downstream without reaching the processor).
pub trait RoutableProcessor: Processor {
  /// Fields whose values decide the owning instance.
  fn identification_keys(&self) -> IdentificationKeySet;

  /// True when the event should be routed to the owner of its fingerprint.
  fn is_forwardable(&self, _event: &Event) -> bool {
    true
  }

  /// True when the event must be processed on this instance (e.g. a flush
  /// signal). Only consulted for events that are not forwardable.
  fn is_local_only(&self, _event: &Event) -> bool {
    false
  }
}

/// A processor as handed over by the pipeline builder, tagged with whether it
/// supports peer forwarding.
pub enum PipelineProcessor {
  /// Declares identification keys; eligible for peer forwarding.
  Routable(Box<dyn RoutableProcessor>),
  /// Plain processor without routing capability.
  Plain(Box<dyn Processor>),
}

impl PipelineProcessor {
  /// Wraps a routable processor.
  pub fn routable<P: RoutableProcessor + 'static>(processor: P) -> Self {
    Self::Routable(Box::new(processor))
  }

  /// Wraps a plain processor.
  pub fn plain<P: Processor + 'static>(processor: P) -> Self {
    Self::Plain(Box::new(processor))
  }

  /// Name of the wrapped processor.
  pub fn name(&self) -> &str {
    match self {
      Self::Routable(p) => p.name(),
      Self::Plain(p) => p.name(),
    }
  }

  /// Returns the routable view, if the processor has that capability.
  pub fn as_routable(&self) -> Option<&dyn RoutableProcessor> {
    match self {
      Self::Routable(p) => Some(p.as_ref()),
      Self::Plain(_) => None,
    }
  }

  /// Converts into the routable processor, if it has that capability.
  pub fn into_routable(self) -> Option<Box<dyn RoutableProcessor>> {
    match self {
      Self::Routable(p) => Some(p),
      Self::Plain(_) => None,
    }
  }
}

/// Classification of one record by a [`RoutableProcessor`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Classification {
  /// Eligible for routing to the owning peer.
  Forwardable,
  /// Must run on this instance.
  LocalOnly,
  /// Bypasses the processor and goes straight to the output.
  Skip,
}

/// Classifies `event` for `processor`.
pub fn classify(processor: &dyn RoutableProcessor, event: &Event) -> Classification {
  if processor.is_forwardable(event) {
    Classification::Forwardable
  } else if processor.is_local_only(event) {
    Classification::LocalOnly
  } else {
    Classification::Skip
  }
}
