//! Prometheus metrics for stream traffic.
//!
//! Counters register on the default registry; hosts expose them however they
//! serve the rest of their metrics.

use prometheus::{
    register_int_counter, register_int_counter_vec, IntCounter, IntCounterVec,
};
use std::sync::LazyLock;

static PACKETS_IN: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!("nexus_network_packets_in", "Total frames read from peers")
        .expect("metric registers once")
});

static PACKETS_OUT: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!("nexus_network_packets_out", "Total frames written to peers")
        .expect("metric registers once")
});

static BYTES_IN: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!("nexus_network_bytes_in", "Total frame bytes read from peers")
        .expect("metric registers once")
});

static BYTES_OUT: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!("nexus_network_bytes_out", "Total frame bytes written to peers")
        .expect("metric registers once")
});

static PACKETS_IN_BY_NAME: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "nexus_network_packets_in_by_name",
        "Frames read from peers, by message name",
        &["name"]
    )
    .expect("metric registers once")
});

static BYTES_IN_BY_NAME: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "nexus_network_bytes_in_by_name",
        "Frame bytes read from peers, by message name",
        &["name"]
    )
    .expect("metric registers once")
});

static PACKETS_OUT_BY_NAME: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "nexus_network_packets_out_by_name",
        "Frames written to peers, by message name",
        &["name"]
    )
    .expect("metric registers once")
});

static BYTES_OUT_BY_NAME: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "nexus_network_bytes_out_by_name",
        "Frame bytes written to peers, by message name",
        &["name"]
    )
    .expect("metric registers once")
});

/// Record one fully parsed ingress frame.
pub(crate) fn record_ingress_frame(name: &str, wire_len: u64) {
    PACKETS_IN.inc();
    BYTES_IN.inc_by(wire_len);
    PACKETS_IN_BY_NAME.with_label_values(&[name]).inc();
    BYTES_IN_BY_NAME.with_label_values(&[name]).inc_by(wire_len);
}

/// Record one egress frame by message name, before it hits the transport.
pub(crate) fn record_egress_message(name: &str, wire_len: u64) {
    PACKETS_OUT_BY_NAME.with_label_values(&[name]).inc();
    BYTES_OUT_BY_NAME.with_label_values(&[name]).inc_by(wire_len);
}

/// Record bytes that actually made it onto the transport.
pub(crate) fn record_write(bytes: u64) {
    PACKETS_OUT.inc();
    BYTES_OUT.inc_by(bytes);
}
