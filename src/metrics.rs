//! Prometheus-compatible metrics for peer forwarding.
//!
//! Counters are labelled by `pipeline` and `plugin_id` so each stateful
//! processor type can be observed separately. Use
//! [`install_prometheus_recorder_on`] at startup to expose them for scraping;
//! without a recorder, recording is a no-op.
//!
//! Records that could not be forwarded and fell back to local processing are
//! counted in `peer_forwarder_records_failed_forwarding_total`, separately from
//! records that were local by ownership
//! (`peer_forwarder_records_to_be_processed_locally_total`). A rising fallback
//! rate means keys are being processed on more than one instance.

use metrics::counter;

/// Installs the Prometheus recorder and serves metrics on `addr` at `GET /metrics`.
pub fn install_prometheus_recorder_on(
  addr: std::net::SocketAddr,
) -> Result<(), metrics_exporter_prometheus::BuildError> {
  use metrics_exporter_prometheus::PrometheusBuilder;
  PrometheusBuilder::new().with_http_listener(addr).install()
}

fn forwarder_counter(name: &'static str, pipeline: &str, plugin_id: &str, count: u64) {
  if count == 0 {
    return;
  }
  counter!(
    name,
    "pipeline" => pipeline.to_string(),
    "plugin_id" => plugin_id.to_string()
  )
  .increment(count);
}

/// Records routed to a remote owner.
pub fn record_records_to_be_forwarded(pipeline: &str, plugin_id: &str, count: u64) {
  forwarder_counter(
    "peer_forwarder_records_to_be_forwarded_total",
    pipeline,
    plugin_id,
    count,
  );
}

/// Records accepted by their remote owner.
pub fn record_records_successfully_forwarded(pipeline: &str, plugin_id: &str, count: u64) {
  forwarder_counter(
    "peer_forwarder_records_successfully_forwarded_total",
    pipeline,
    plugin_id,
    count,
  );
}

/// Records that failed forwarding and fell back to local processing.
pub fn record_records_failed_forwarding(pipeline: &str, plugin_id: &str, count: u64) {
  forwarder_counter(
    "peer_forwarder_records_failed_forwarding_total",
    pipeline,
    plugin_id,
    count,
  );
}

/// Records owned by this instance.
pub fn record_records_to_be_processed_locally(pipeline: &str, plugin_id: &str, count: u64) {
  forwarder_counter(
    "peer_forwarder_records_to_be_processed_locally_total",
    pipeline,
    plugin_id,
    count,
  );
}

/// Records drained from the inbound queue.
pub fn record_records_received(pipeline: &str, plugin_id: &str, count: u64) {
  forwarder_counter(
    "peer_forwarder_records_received_total",
    pipeline,
    plugin_id,
    count,
  );
}

/// Forward requests that were delivered.
pub fn record_request_successful(pipeline: &str, plugin_id: &str) {
  forwarder_counter(
    "peer_forwarder_requests_successful_total",
    pipeline,
    plugin_id,
    1,
  );
}

/// Forward requests that failed, labelled by failure kind.
pub fn record_request_failed(pipeline: &str, plugin_id: &str, kind: &'static str) {
  counter!(
    "peer_forwarder_requests_failed_total",
    "pipeline" => pipeline.to_string(),
    "plugin_id" => plugin_id.to_string(),
    "kind" => kind
  )
  .increment(1);
}

/// Inbound requests the server refused, labelled by reason.
pub fn record_server_request_rejected(reason: &'static str) {
  counter!("peer_forwarder_server_requests_rejected_total", "reason" => reason).increment(1);
}
