//! Prometheus exposition of the sync queue and health counters.

use prometheus_client::encoding::text::encode;
use prometheus_client::registry::Registry;
use services::GatewayCounters;

pub struct Metrics {
    registry: Registry,
}

impl Metrics {
    /// Registers the gateway's own counter handles, so a scrape always reads
    /// the live values.
    pub fn new(counters: GatewayCounters) -> Self {
        let mut registry = Registry::with_prefix("adfleet");
        let sync = registry.sub_registry_with_prefix("sync_jobs");
        sync.register("enqueued", "Box sync jobs accepted by the queue", counters.queue.enqueued);
        sync.register("delivered", "Box sync jobs the box acknowledged", counters.queue.delivered);
        sync.register("failed", "Box sync jobs that could not be delivered", counters.queue.failed);
        sync.register("dropped", "Box sync jobs dropped on a full or closed queue", counters.queue.dropped);
        registry.register(
            "health_deactivations",
            "Monitors taken offline by high severity health reports",
            counters.health_deactivations,
        );
        Self { registry }
    }

    pub fn render(&self) -> Result<String, std::fmt::Error> {
        let mut body = String::new();
        encode(&mut body, &self.registry)?;
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus_client::metrics::counter::Counter;
    use services::SyncCounters;

    #[test]
    fn renders_live_counters_as_totals() {
        let counters = GatewayCounters { queue: SyncCounters::default(), health_deactivations: Counter::default() };
        let metrics = Metrics::new(counters.clone());

        counters.queue.enqueued.inc_by(5);
        counters.queue.dropped.inc();
        counters.health_deactivations.inc_by(2);

        let body = metrics.render().unwrap();
        assert!(body.contains("# TYPE adfleet_sync_jobs_dropped counter"), "{body}");
        assert!(body.contains("adfleet_sync_jobs_enqueued_total 5"), "{body}");
        assert!(body.contains("adfleet_sync_jobs_dropped_total 1"), "{body}");
        assert!(body.contains("adfleet_health_deactivations_total 2"), "{body}");

        counters.queue.dropped.inc();
        assert!(metrics.render().unwrap().contains("adfleet_sync_jobs_dropped_total 2"));
    }
}
