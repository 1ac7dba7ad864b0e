/*
    Metrics - counters, gauges and histograms for the router core

    Covers:
    - Link sessions (establishment, connect timeouts, queue overflow)
    - Paths (build outcomes, transit hop count, latency probes)
    - Dropped input (one counter, labelled by reason, for every silent drop)
    - Discovery (contact merges, lookup timeouts and failures)

    Names are prefixed `veilnet_`. Any `metrics` recorder can export them.
*/

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};

/// Initialize metric descriptions (call once at startup)
pub fn init_metrics() {
    // Input handling
    describe_counter!(
        "veilnet_frames_dropped_total",
        "Frames dropped without reply, labeled by reason (unknown_session, unknown_path, wrong_neighbour, malformed, decrypt_failed, replay, stale)"
    );

    describe_counter!(
        "veilnet_link_messages_total",
        "Link messages accepted for processing, labeled by kind"
    );

    // Sessions
    describe_counter!(
        "veilnet_sessions_established_total",
        "Link sessions that reached the established state"
    );

    describe_counter!(
        "veilnet_sessions_rejected_total",
        "Session establishments or renegotiations that were refused"
    );

    describe_counter!(
        "veilnet_connect_timeouts_total",
        "Outbound connects that did not complete before the connect timeout"
    );

    describe_counter!(
        "veilnet_queued_frames_dropped_total",
        "Frames discarded from a per-peer pending queue (overflow or expiry)"
    );

    describe_gauge!(
        "veilnet_active_sessions",
        "Current number of established link sessions"
    );

    // Paths
    describe_counter!(
        "veilnet_path_builds_total",
        "Locally originated path builds, labeled by result (success, failed, cancelled, exhausted)"
    );

    describe_histogram!(
        "veilnet_path_build_duration_seconds",
        "Time from build start to the last hop confirming"
    );

    describe_counter!(
        "veilnet_transit_builds_total",
        "Build requests handled as a transit hop, labeled by result (accepted, rejected)"
    );

    describe_gauge!(
        "veilnet_transit_hops",
        "Current number of transit hops installed"
    );

    describe_gauge!("veilnet_own_paths", "Current number of locally owned paths");

    describe_histogram!(
        "veilnet_path_latency_seconds",
        "Round trip time of latency probes sent along owned paths"
    );

    // Discovery
    describe_counter!(
        "veilnet_contacts_merged_total",
        "Router contacts from DHT replies, labeled by result (accepted, rejected)"
    );

    describe_counter!(
        "veilnet_dht_lookup_timeouts_total",
        "DHT lookups whose peer did not answer in time"
    );

    describe_counter!(
        "veilnet_dht_lookup_failures_total",
        "DHT lookups abandoned after the last attempt"
    );

    describe_gauge!("veilnet_known_contacts", "Current number of stored router contacts");
}

/// Record a dropped frame
pub fn frame_dropped(reason: &'static str) {
    counter!("veilnet_frames_dropped_total", "reason" => reason).increment(1);
}

/// Record a decoded link message
pub fn link_message_received(kind: &'static str) {
    counter!("veilnet_link_messages_total", "kind" => kind).increment(1);
}

pub fn session_established() {
    counter!("veilnet_sessions_established_total").increment(1);
}

pub fn session_rejected() {
    counter!("veilnet_sessions_rejected_total").increment(1);
}

pub fn connect_timeout() {
    counter!("veilnet_connect_timeouts_total").increment(1);
}

pub fn queued_frames_dropped(count: usize) {
    counter!("veilnet_queued_frames_dropped_total").increment(count as u64);
}

/// Update active sessions gauge
pub fn set_active_sessions(count: usize) {
    gauge!("veilnet_active_sessions").set(count as f64);
}

/// Record the outcome of a locally originated build
pub fn path_build_result(result: &'static str) {
    counter!("veilnet_path_builds_total", "result" => result).increment(1);
}

pub fn path_build_duration(duration_secs: f64) {
    histogram!("veilnet_path_build_duration_seconds").record(duration_secs);
}

pub fn transit_build_result(accepted: bool) {
    let result = if accepted { "accepted" } else { "rejected" };
    counter!("veilnet_transit_builds_total", "result" => result).increment(1);
}

pub fn set_transit_hops(count: usize) {
    gauge!("veilnet_transit_hops").set(count as f64);
}

pub fn set_own_paths(count: usize) {
    gauge!("veilnet_own_paths").set(count as f64);
}

pub fn path_latency(duration_secs: f64) {
    histogram!("veilnet_path_latency_seconds").record(duration_secs);
}

/// Record the result of merging a batch of DHT contacts
pub fn contacts_merged(accepted: usize, rejected: usize) {
    counter!("veilnet_contacts_merged_total", "result" => "accepted").increment(accepted as u64);
    counter!("veilnet_contacts_merged_total", "result" => "rejected").increment(rejected as u64);
}

pub fn dht_lookup_timeout() {
    counter!("veilnet_dht_lookup_timeouts_total").increment(1);
}

pub fn dht_lookup_failed() {
    counter!("veilnet_dht_lookup_failures_total").increment(1);
}

pub fn set_known_contacts(count: usize) {
    gauge!("veilnet_known_contacts").set(count as f64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_compilation() {
        // No recorder installed; every call must still be a harmless no-op
        init_metrics();
        frame_dropped("unknown_path");
        link_message_received("relay_upstream");
        session_established();
        session_rejected();
        connect_timeout();
        queued_frames_dropped(3);
        set_active_sessions(4);
        path_build_result("success");
        path_build_duration(0.25);
        transit_build_result(true);
        transit_build_result(false);
        set_transit_hops(2);
        set_own_paths(1);
        path_latency(0.05);
        contacts_merged(3, 2);
        dht_lookup_timeout();
        dht_lookup_failed();
        set_known_contacts(12);
    }
}
