/// Session gauges.
pub mod gauges {
    /// Increment the active sessions gauge.
    pub fn inc_sessions_active() {
        metrics::gauge!("hvpn_relay_sessions_active").increment(1.0);
    }

    /// Decrement the active sessions gauge.
    pub fn dec_sessions_active() {
        metrics::gauge!("hvpn_relay_sessions_active").decrement(1.0);
    }
}

/// Event counters.
pub mod counters {
    /// Record a tunnel session with the given outcome label.
    pub fn sessions_total(outcome: &'static str) {
        metrics::counter!("hvpn_relay_sessions_total", "outcome" => outcome).increment(1);
    }

    /// Record bytes relayed in the given direction.
    pub fn bytes_relayed_total(direction: &'static str, bytes: u64) {
        metrics::counter!("hvpn_relay_bytes_total", "direction" => direction).increment(bytes);
    }

    /// Record a self-registration attempt with the given result label.
    pub fn registrations_total(result: &'static str) {
        metrics::counter!("hvpn_relay_registrations_total", "result" => result).increment(1);
    }
}
