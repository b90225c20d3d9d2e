// Private module declaration
mod server;

use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry};

// Re-export for public API
pub use server::start_metrics_server;

// ============================================================================
// Metrics Module - Prometheus metrics for observability
// ============================================================================
//
// Provides metrics for:
// - Command throughput and latency per entity type
// - Persisted events and persist failures
// - Restarts and permanent failures
// - Activations, recovery failures, passivations and reactivations
// - Number of live entities
//
// All metrics are registered with Prometheus and can be scraped via /metrics
// ============================================================================

/// Command outcome label values
pub const OUTCOME_REPLIED: &str = "replied";
pub const OUTCOME_FAILED: &str = "failed";

pub struct Metrics {
    registry: Registry,

    // Command metrics
    pub commands_total: IntCounterVec,
    pub command_duration: HistogramVec,

    // Persistence metrics
    pub events_persisted: IntCounterVec,
    pub persist_failures: IntCounterVec,

    // Supervision metrics
    pub restarts_total: IntCounterVec,
    pub permanent_failures: IntCounterVec,

    // Lifecycle metrics
    pub activations_total: IntCounterVec,
    pub recovery_failures: IntCounterVec,
    pub passivations_total: IntCounterVec,
    pub reactivations_total: IntCounterVec,
    pub active_entities: IntGaugeVec,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let commands_total = IntCounterVec::new(
            Opts::new("entity_commands_total", "Commands handled by entity engines"),
            &["entity_type", "outcome"],
        )?;
        registry.register(Box::new(commands_total.clone()))?;

        let command_duration = HistogramVec::new(
            HistogramOpts::new("entity_command_duration_seconds", "Command handling duration, persistence included")
                .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            &["entity_type"],
        )?;
        registry.register(Box::new(command_duration.clone()))?;

        let events_persisted = IntCounterVec::new(
            Opts::new("entity_events_persisted_total", "Events durably appended"),
            &["entity_type"],
        )?;
        registry.register(Box::new(events_persisted.clone()))?;

        let persist_failures = IntCounterVec::new(
            Opts::new("entity_persist_failures_total", "Failed event appends"),
            &["entity_type"],
        )?;
        registry.register(Box::new(persist_failures.clone()))?;

        let restarts_total = IntCounterVec::new(
            Opts::new("entity_restarts_total", "Entity restarts after persist failures"),
            &["entity_type"],
        )?;
        registry.register(Box::new(restarts_total.clone()))?;

        let permanent_failures = IntCounterVec::new(
            Opts::new("entity_permanent_failures_total", "Entities that exhausted their restart budget"),
            &["entity_type"],
        )?;
        registry.register(Box::new(permanent_failures.clone()))?;

        let activations_total = IntCounterVec::new(
            Opts::new("entity_activations_total", "Successful entity activations"),
            &["entity_type"],
        )?;
        registry.register(Box::new(activations_total.clone()))?;

        let recovery_failures = IntCounterVec::new(
            Opts::new("entity_recovery_failures_total", "Activations that failed to replay history"),
            &["entity_type"],
        )?;
        registry.register(Box::new(recovery_failures.clone()))?;

        let passivations_total = IntCounterVec::new(
            Opts::new("entity_passivations_total", "Entities passivated"),
            &["entity_type"],
        )?;
        registry.register(Box::new(passivations_total.clone()))?;

        let reactivations_total = IntCounterVec::new(
            Opts::new("entity_reactivations_total", "Fail-stopped entities brought back by an operator"),
            &["entity_type"],
        )?;
        registry.register(Box::new(reactivations_total.clone()))?;

        let active_entities = IntGaugeVec::new(
            Opts::new("entity_active", "Entities currently activated"),
            &["entity_type"],
        )?;
        registry.register(Box::new(active_entities.clone()))?;

        Ok(Self {
            registry,
            commands_total,
            command_duration,
            events_persisted,
            persist_failures,
            restarts_total,
            permanent_failures,
            activations_total,
            recovery_failures,
            passivations_total,
            reactivations_total,
            active_entities,
        })
    }

    /// Get the Prometheus registry for exposing metrics via HTTP
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Helper to record a handled command
    pub fn record_command(&self, entity_type: &str, duration_secs: f64, replied: bool) {
        let outcome = if replied { OUTCOME_REPLIED } else { OUTCOME_FAILED };
        self.commands_total.with_label_values(&[entity_type, outcome]).inc();
        self.command_duration.with_label_values(&[entity_type]).observe(duration_secs);
    }

    pub fn record_persisted(&self, entity_type: &str, event_count: usize) {
        self.events_persisted
            .with_label_values(&[entity_type])
            .inc_by(event_count as u64);
    }

    pub fn record_persist_failure(&self, entity_type: &str) {
        self.persist_failures.with_label_values(&[entity_type]).inc();
    }

    pub fn record_restart(&self, entity_type: &str) {
        self.restarts_total.with_label_values(&[entity_type]).inc();
    }

    pub fn record_permanent_failure(&self, entity_type: &str) {
        self.permanent_failures.with_label_values(&[entity_type]).inc();
    }

    pub fn record_activation(&self, entity_type: &str) {
        self.activations_total.with_label_values(&[entity_type]).inc();
        self.active_entities.with_label_values(&[entity_type]).inc();
    }

    pub fn record_recovery_failure(&self, entity_type: &str) {
        self.recovery_failures.with_label_values(&[entity_type]).inc();
    }

    pub fn record_passivation(&self, entity_type: &str) {
        self.passivations_total.with_label_values(&[entity_type]).inc();
        self.active_entities.with_label_values(&[entity_type]).dec();
    }

    /// The fail-stopped actor is gone; the replacement counts as a new activation.
    pub fn record_reactivation(&self, entity_type: &str) {
        self.reactivations_total.with_label_values(&[entity_type]).inc();
        self.active_entities.with_label_values(&[entity_type]).dec();
    }
}
