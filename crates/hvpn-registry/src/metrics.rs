/// Membership gauges.
pub mod gauges {
    /// Set the number of registered relays.
    #[allow(clippy::cast_precision_loss)]
    pub fn set_relays_registered(count: usize) {
        metrics::gauge!("hvpn_registry_relays").set(count as f64);
    }
}

/// Event counters.
pub mod counters {
    /// Record a registration attempt with the given status label.
    pub fn registrations_total(status: &'static str) {
        metrics::counter!("hvpn_registry_registrations_total", "status" => status).increment(1);
    }

    /// Record a health probe with the given result label.
    pub fn probes_total(result: &'static str) {
        metrics::counter!("hvpn_registry_probes_total", "result" => result).increment(1);
    }

    /// Increment the evicted-relays counter.
    pub fn evictions_total() {
        metrics::counter!("hvpn_registry_evictions_total").increment(1);
    }

    /// Record a router push with the given result label.
    pub fn pushes_total(result: &'static str) {
        metrics::counter!("hvpn_registry_pushes_total", "result" => result).increment(1);
    }
}
