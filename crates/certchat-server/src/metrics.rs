//! Prometheus instruments shared by the CA and chat sessions.

use prometheus_client::metrics::{counter::Counter, family::Family, gauge::Gauge};
use prometheus_client::registry::Registry;

type Labels = Vec<(String, String)>;

/// Cloning shares the underlying atomics, so every session can own a copy.
#[derive(Clone, Debug, Default)]
pub struct ServerMetrics {
    pub certificates_issued: Counter,
    pub signing_failures: Counter,
    pub logins: Counter,
    pub login_failures: Counter,
    pub messages_routed: Counter,
    pub messages_dropped: Counter,
    pub active_sessions: Family<Labels, Gauge>,
}

impl ServerMetrics {
    pub fn new(registry: &mut Registry) -> Self {
        let metrics = Self::default();
        metrics.register(registry);
        metrics
    }

    pub fn register(&self, registry: &mut Registry) {
        registry.register(
            "certchat_certificates_issued",
            "Certificates signed by the CA",
            self.certificates_issued.clone(),
        );
        registry.register(
            "certchat_signing_failures",
            "Signing requests answered with ERROR",
            self.signing_failures.clone(),
        );
        registry.register(
            "certchat_logins",
            "Successful chat logins",
            self.logins.clone(),
        );
        registry.register(
            "certchat_login_failures",
            "Rejected chat logins",
            self.login_failures.clone(),
        );
        registry.register(
            "certchat_messages_routed",
            "User messages delivered to a recipient outbox",
            self.messages_routed.clone(),
        );
        registry.register(
            "certchat_messages_dropped",
            "User messages addressed to unknown or unreachable recipients",
            self.messages_dropped.clone(),
        );
        registry.register(
            "certchat_active_sessions",
            "Open connections per service",
            self.active_sessions.clone(),
        );
    }

    fn service_labels(service: &str) -> Labels {
        vec![("service".to_string(), service.to_string())]
    }

    /// Count a session as open until the returned guard drops.
    pub fn session(&self, service: &'static str) -> SessionGuard {
        let gauge = self
            .active_sessions
            .get_or_create(&Self::service_labels(service))
            .clone();
        gauge.inc();
        SessionGuard { gauge }
    }
}

#[derive(Debug)]
pub struct SessionGuard {
    gauge: Gauge,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.gauge.dec();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus_client::encoding::text::encode;

    #[test]
    fn counters_render_with_total_suffix() {
        let mut registry = Registry::default();
        let metrics = ServerMetrics::new(&mut registry);
        metrics.logins.inc();
        metrics.messages_dropped.inc_by(3);

        let mut out = String::new();
        encode(&mut out, &registry).unwrap();
        assert!(out.contains("certchat_logins_total 1"));
        assert!(out.contains("certchat_messages_dropped_total 3"));
    }

    #[test]
    fn session_guard_tracks_open_sessions() {
        let metrics = ServerMetrics::default();
        let labels = ServerMetrics::service_labels("chat");
        {
            let _a = metrics.session("chat");
            let _b = metrics.session("chat");
            assert_eq!(metrics.active_sessions.get_or_create(&labels).get(), 2);
        }
        assert_eq!(metrics.active_sessions.get_or_create(&labels).get(), 0);
    }
}
