// ABOUTME: Metric names and recording helpers over the `metrics` facade
// ABOUTME: No-ops unless the binary installs a recorder (Prometheus exporter)

pub const DISPATCH_TOTAL: &str = "husk_dispatch_total";
pub const RATE_LIMITED_TOTAL: &str = "husk_rate_limited_total";
pub const CIRCUIT_TRANSITIONS_TOTAL: &str = "husk_circuit_transitions_total";
pub const AUDIT_ENTRIES_TOTAL: &str = "husk_audit_entries_total";
pub const MESSAGES_RECEIVED_TOTAL: &str = "husk_messages_received_total";

/// One dispatch through a registry, labelled by outcome
/// (`ok`, `error`, `declined`, `unmatched`).
pub fn record_dispatch(registry: &str, outcome: &str) {
    metrics::counter!(
        DISPATCH_TOTAL,
        "registry" => registry.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

pub fn record_rate_limited() {
    metrics::counter!(RATE_LIMITED_TOTAL).increment(1);
}

pub fn record_circuit_transition(breaker: &str, state: &str) {
    metrics::counter!(
        CIRCUIT_TRANSITIONS_TOTAL,
        "breaker" => breaker.to_string(),
        "state" => state.to_string()
    )
    .increment(1);
}

pub fn record_audit_entry(action: &str) {
    metrics::counter!(AUDIT_ENTRIES_TOTAL, "action" => action.to_string()).increment(1);
}

pub fn record_message_received(kind: &str) {
    metrics::counter!(MESSAGES_RECEIVED_TOTAL, "kind" => kind.to_string()).increment(1);
}
