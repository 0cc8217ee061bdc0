//! # peerweave
//!
//! Peer forwarding for stateful processors in multi-node pipelines.
//!
//! A fleet of identical pipeline instances each ingests an arbitrary shard of
//! the event stream. Stateful processors (aggregation, deduplication, session
//! correlation) need every event sharing a key on one instance. This crate
//! routes each event to the fleet member that owns its key before the event
//! reaches such a processor.
//!
//! ## Key Features
//!
//! - **Decoration**: wrap every instance of a stateful processor with
//!   [`decorate_processors`](peer_forwarder::decorate_processors); the engine
//!   keeps driving plain [`Processor`](processor::Processor)s.
//! - **Consistent Hashing**: key ownership from a virtual-node hash ring that
//!   follows the live peer set.
//! - **No Loss**: a batch its owner does not accept is processed locally.
//! - **HTTP Transport**: pooled HTTP/1.1 client and a bounded forwarding server;
//!   an in-process transport for single-binary clusters and tests.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use peerweave::config::PeerForwarderConfig;
//! use peerweave::peer_forwarder::{PeerForwarderProvider, decorate_processors};
//!
//! # async fn run(processors: Vec<peerweave::processor::PipelineProcessor>)
//! # -> Result<(), Box<dyn std::error::Error>> {
//! let config = PeerForwarderConfig::from_json_file("peer_forwarder.json")?;
//! let exclude = config.exclude_set();
//! let provider = PeerForwarderProvider::from_config(config)?;
//! let decorated = decorate_processors(processors, &provider, "logs", "aggregate", &exclude, 4)?;
//! provider.start().await?;
//! # drop(decorated);
//! # Ok(())
//! # }
//! ```

// Documentation enforcement - treat missing docs as errors
#![deny(missing_docs)]

/// Peer forwarder configuration.
pub mod config;
/// Peer set sources.
pub mod discovery;
/// Error types.
pub mod error;
/// Events and records.
pub mod event;
/// Key ownership on a consistent-hash ring.
pub mod hash_ring;
/// Identification keys, fingerprints and exclusions.
pub mod identification;
/// Tracing subscriber setup.
pub mod logging;
/// Prometheus-compatible metrics for production observability.
pub mod metrics;
/// Peer forwarders, their registry and the processor decorator.
pub mod peer_forwarder;
/// Processor contracts.
pub mod processor;
/// Batch transport between fleet members.
pub mod transport;
