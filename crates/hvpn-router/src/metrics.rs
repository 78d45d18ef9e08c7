/// Routing gauges.
pub mod gauges {
    /// Set the number of relays in the membership snapshot.
    #[allow(clippy::cast_precision_loss)]
    pub fn set_relays_known(count: usize) {
        metrics::gauge!("hvpn_router_relays").set(count as f64);
    }

    /// Set the number of cached route assignments.
    #[allow(clippy::cast_precision_loss)]
    pub fn set_assignments_cached(count: usize) {
        metrics::gauge!("hvpn_router_assignments").set(count as f64);
    }
}

/// Event counters.
pub mod counters {
    /// Record a route lookup with the given outcome label.
    pub fn routes_total(outcome: &'static str) {
        metrics::counter!("hvpn_router_routes_total", "outcome" => outcome).increment(1);
    }

    /// Record a membership push with the given result label.
    pub fn updates_total(result: &'static str) {
        metrics::counter!("hvpn_router_updates_total", "result" => result).increment(1);
    }

    /// Record a registry pull with the given result label.
    pub fn pulls_total(result: &'static str) {
        metrics::counter!("hvpn_router_pulls_total", "result" => result).increment(1);
    }
}
