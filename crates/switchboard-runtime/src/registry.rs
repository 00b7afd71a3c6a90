//! The breaker registry: sole owner of the live tree.
//!
//! [`BreakerRegistry`] wraps the deterministic board in one async mutex and
//! interprets the [`CascadeEffects`] each transition returns: probing
//! circuits that energized, arming cooldown timers for circuits that
//! tripped, and cancelling timers that no longer apply. Every cascade runs
//! its synchronous mutations to completion under the lock; the only
//! suspension point inside a cascade is the health probe, so concurrent
//! cascades serialize and reads always observe a consistent tree.
//!
//! The registry is an explicitly constructed object: tests and embedders
//! create as many isolated instances as they like, and `shutdown` tears a
//! registry's timers down deterministically.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::warn;

use switchboard_core::{
    AuditLogEntry, AutoResetOutcome, Board, BoardError, BoardLayout, BoardSnapshot,
    CascadeEffects, Circuit, CircuitSpec, Panel, PanelSpec, SystemAlert,
};

use crate::config::RuntimeConfig;
use crate::probe::{HealthProbe, ProbeRunner, ProbeTarget, StaticProbe};
use crate::sink::{AlertNotifier, AuditExporter, ExportError};
use crate::timers::TimerRegistry;

struct Inner {
    board: Mutex<Board>,
    timers: TimerRegistry,
    prober: ProbeRunner,
    notifier: Option<Arc<dyn AlertNotifier>>,
    exporter: Option<Arc<dyn AuditExporter>>,
    last_notified: AtomicU64,
}

/// Cheap-clone handle to one breaker tree and its runtime machinery.
#[derive(Clone)]
pub struct BreakerRegistry {
    inner: Arc<Inner>,
}

impl BreakerRegistry {
    /// Create a registry with default configuration and an always-healthy
    /// static probe. Production embedders inject a real probe through
    /// [`BreakerRegistry::builder`].
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Start building a registry.
    pub fn builder() -> BreakerRegistryBuilder {
        BreakerRegistryBuilder::new()
    }

    // ------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------

    /// Register a panel.
    pub async fn add_panel(&self, spec: &PanelSpec, actor: &str) -> Result<(), BoardError> {
        self.inner.board.lock().await.add_panel(spec, actor)
    }

    /// Register a circuit under a panel.
    pub async fn add_circuit(
        &self,
        panel_id: &str,
        spec: &CircuitSpec,
        actor: &str,
    ) -> Result<(), BoardError> {
        self.inner
            .board
            .lock()
            .await
            .add_circuit(panel_id, spec, actor)
    }

    /// Register every panel and circuit a layout declares, in order.
    pub async fn apply_layout(&self, layout: &BoardLayout, actor: &str) -> Result<(), BoardError> {
        let mut board = self.inner.board.lock().await;
        for panel in &layout.panels {
            board.add_panel(panel, actor)?;
            for circuit in &panel.circuits {
                board.add_circuit(&panel.id, circuit, actor)?;
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Master transitions
    // ------------------------------------------------------------------

    /// Turn the master on, cascading to every panel. Returns false when it
    /// was already on.
    pub async fn master_on(&self, actor: &str) -> bool {
        let pending = {
            let mut board = self.inner.board.lock().await;
            let Some(effects) = board.master_on(actor) else {
                return false;
            };
            self.apply_effects(&mut board, effects).await;
            self.drain_new_alerts(&board)
        };
        self.publish_alerts(pending).await;
        true
    }

    /// Turn the master off, cascading to every panel. Returns false when it
    /// was already off.
    pub async fn master_off(&self, actor: &str) -> bool {
        let pending = {
            let mut board = self.inner.board.lock().await;
            let Some(effects) = board.master_off(actor) else {
                return false;
            };
            self.apply_effects(&mut board, effects).await;
            self.drain_new_alerts(&board)
        };
        self.publish_alerts(pending).await;
        true
    }

    /// Force everything down now. No probes run, no cooldowns are armed,
    /// and any pending cooldowns are cancelled.
    pub async fn emergency_shutdown(&self, actor: &str, reason: &str) {
        let pending = {
            let mut board = self.inner.board.lock().await;
            let effects = board.emergency_shutdown(actor, reason);
            self.apply_effects(&mut board, effects).await;
            self.drain_new_alerts(&board)
        };
        self.publish_alerts(pending).await;
    }

    // ------------------------------------------------------------------
    // Panel and circuit transitions
    // ------------------------------------------------------------------

    /// Turn a panel on or off. Returns false when the request is rejected
    /// (unknown panel, locked out, or energizing while the master is off).
    pub async fn set_panel_state(&self, panel_id: &str, on: bool, actor: &str) -> bool {
        let pending = {
            let mut board = self.inner.board.lock().await;
            let Some(effects) = board.set_panel_state(panel_id, on, actor) else {
                return false;
            };
            self.apply_effects(&mut board, effects).await;
            self.drain_new_alerts(&board)
        };
        self.publish_alerts(pending).await;
        true
    }

    /// Turn a circuit on or off. Energizing probes the circuit before its
    /// health is declared; a failing probe degrades the circuit instead of
    /// failing the call.
    pub async fn set_circuit_state(&self, circuit_id: &str, on: bool, actor: &str) -> bool {
        let pending = {
            let mut board = self.inner.board.lock().await;
            let Some(effects) = board.set_circuit_state(circuit_id, on, actor) else {
                return false;
            };
            self.apply_effects(&mut board, effects).await;
            self.drain_new_alerts(&board)
        };
        self.publish_alerts(pending).await;
        true
    }

    /// Trip a panel and everything under it, sticky until explicitly reset.
    pub async fn lockout_panel(&self, panel_id: &str, actor: &str, reason: &str) -> bool {
        let pending = {
            let mut board = self.inner.board.lock().await;
            let Some(effects) = board.lockout_panel(panel_id, actor, reason) else {
                return false;
            };
            self.apply_effects(&mut board, effects).await;
            self.drain_new_alerts(&board)
        };
        self.publish_alerts(pending).await;
        true
    }

    /// Clear a panel lockout, leaving the panel off and its circuits reset.
    pub async fn reset_panel_lockout(&self, panel_id: &str, actor: &str) -> bool {
        let pending = {
            let mut board = self.inner.board.lock().await;
            let Some(effects) = board.reset_panel_lockout(panel_id, actor) else {
                return false;
            };
            self.apply_effects(&mut board, effects).await;
            self.drain_new_alerts(&board)
        };
        self.publish_alerts(pending).await;
        true
    }

    /// Trip a circuit and schedule its automatic reset.
    pub async fn trip_circuit(&self, circuit_id: &str, reason: &str) -> bool {
        let pending = {
            let mut board = self.inner.board.lock().await;
            let Some(effects) = board.trip_circuit(circuit_id, reason) else {
                return false;
            };
            self.apply_effects(&mut board, effects).await;
            self.drain_new_alerts(&board)
        };
        self.publish_alerts(pending).await;
        true
    }

    /// Manually reset a circuit, cancelling any pending cooldown first.
    pub async fn reset_circuit(&self, circuit_id: &str, actor: &str) -> bool {
        let pending = {
            let mut board = self.inner.board.lock().await;
            let Some(effects) = board.reset_circuit(circuit_id, actor) else {
                return false;
            };
            self.apply_effects(&mut board, effects).await;
            self.drain_new_alerts(&board)
        };
        self.publish_alerts(pending).await;
        true
    }

    // ------------------------------------------------------------------
    // Telemetry
    // ------------------------------------------------------------------

    /// Record a successful call against a circuit.
    pub async fn record_request(&self, circuit_id: &str, latency_ms: f64) -> bool {
        self.inner
            .board
            .lock()
            .await
            .record_request(circuit_id, latency_ms)
    }

    /// Record an errored call against a circuit; trips it at the threshold.
    pub async fn report_error(
        &self,
        circuit_id: &str,
        error: &str,
        latency_ms: Option<f64>,
    ) -> bool {
        let pending = {
            let mut board = self.inner.board.lock().await;
            let Some(effects) = board.report_error(circuit_id, error, latency_ms) else {
                return false;
            };
            self.apply_effects(&mut board, effects).await;
            self.drain_new_alerts(&board)
        };
        self.publish_alerts(pending).await;
        true
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Deep, owned snapshot of the whole tree.
    pub async fn state(&self) -> BoardSnapshot {
        self.inner.board.lock().await.snapshot()
    }

    /// Owned copy of a panel.
    pub async fn panel(&self, panel_id: &str) -> Option<Panel> {
        self.inner.board.lock().await.panel(panel_id).cloned()
    }

    /// Owned copy of a circuit, scanning all panels.
    pub async fn circuit(&self, circuit_id: &str) -> Option<Circuit> {
        self.inner.board.lock().await.circuit(circuit_id).cloned()
    }

    /// Owned copy of the panel owning a circuit.
    pub async fn panel_for_circuit(&self, circuit_id: &str) -> Option<Panel> {
        self.inner
            .board
            .lock()
            .await
            .panel_for_circuit(circuit_id)
            .cloned()
    }

    /// The most recent `limit` alerts.
    pub async fn alerts(&self, limit: usize) -> Vec<SystemAlert> {
        self.inner.board.lock().await.alert_sink().recent(limit)
    }

    /// The most recent `limit` audit entries.
    pub async fn audit_log(&self, limit: usize) -> Vec<AuditLogEntry> {
        self.inner.board.lock().await.audit_trail().recent(limit)
    }

    /// Acknowledge an alert; idempotent.
    pub async fn acknowledge_alert(&self, alert_id: u64, actor: &str) -> bool {
        self.inner
            .board
            .lock()
            .await
            .acknowledge_alert(alert_id, actor)
    }

    /// Unacknowledged alerts at Alert or Critical level.
    pub async fn unacknowledged_severe(&self) -> usize {
        self.inner
            .board
            .lock()
            .await
            .alert_sink()
            .unacknowledged_severe()
    }

    /// Unacknowledged alerts at Warning level.
    pub async fn unacknowledged_warnings(&self) -> usize {
        self.inner
            .board
            .lock()
            .await
            .alert_sink()
            .unacknowledged_warnings()
    }

    /// Number of pending cooldown timers.
    pub fn armed_cooldowns(&self) -> usize {
        self.inner.timers.armed()
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Flush the retained history through the configured exporter, if any.
    pub async fn flush_history(&self) -> Result<(), ExportError> {
        let Some(exporter) = self.inner.exporter.clone() else {
            return Ok(());
        };

        let (entries, alerts) = {
            let board = self.inner.board.lock().await;
            (
                board.audit_trail().entries().cloned().collect::<Vec<_>>(),
                board.alert_sink().alerts().cloned().collect::<Vec<_>>(),
            )
        };
        exporter.flush(&entries, &alerts).await
    }

    /// Cancel every pending cooldown timer and wait for task teardown.
    pub async fn shutdown(&self) {
        let handles = self.inner.timers.shutdown();
        futures::future::join_all(handles).await;
    }

    // ------------------------------------------------------------------
    // Effect interpretation
    // ------------------------------------------------------------------

    /// Carry out the runtime side of a cascade: cancel obsolete timers,
    /// arm cooldowns for trips, and probe energized circuits. Probing can
    /// itself trip a circuit; those follow-up effects are applied too.
    async fn apply_effects(&self, board: &mut Board, effects: CascadeEffects) {
        for circuit_id in &effects.disarm {
            self.inner.timers.disarm(circuit_id);
        }
        for (circuit_id, _next_reset_at) in &effects.arm {
            self.inner.prober.invalidate(circuit_id).await;
            self.arm_cooldown(board, circuit_id);
        }
        for circuit_id in &effects.energize {
            if let Some(follow) = self.probe_energized(board, circuit_id).await {
                for id in &follow.disarm {
                    self.inner.timers.disarm(id);
                }
                for (id, _) in &follow.arm {
                    self.inner.prober.invalidate(id).await;
                    self.arm_cooldown(board, id);
                }
            }
        }
    }

    /// Probe a freshly energized circuit and fold the reading into its
    /// metrics. An unreachable or failing probe becomes an error report
    /// against the circuit; the cascade itself never fails.
    async fn probe_energized(&self, board: &mut Board, circuit_id: &str) -> Option<CascadeEffects> {
        let target = board.circuit(circuit_id).map(ProbeTarget::from_circuit)?;

        match self.inner.prober.check(&target).await {
            Ok(reading) if reading.reachable => {
                board.record_request(circuit_id, reading.latency_ms);
                None
            }
            Ok(_) => board.report_error(circuit_id, "health probe reported unreachable", None),
            Err(err) => {
                board.report_error(circuit_id, &format!("health probe failed: {}", err), None)
            }
        }
    }

    /// Spawn the one-shot cooldown task for a tripped circuit.
    fn arm_cooldown(&self, board: &Board, circuit_id: &str) {
        let Some(circuit) = board.circuit(circuit_id) else {
            return;
        };
        let cooldown = circuit.cooldown;
        let weak = Arc::downgrade(&self.inner);
        let id = circuit_id.to_string();

        let handle = tokio::spawn(async move {
            tokio::time::sleep(cooldown).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            BreakerRegistry { inner }.cooldown_elapsed(&id).await;
        });
        self.inner.timers.arm(circuit_id, handle);
    }

    /// A cooldown elapsed: attempt the automatic reset, and re-energize
    /// through the ordinary on-transition (with a fresh probe) when the
    /// chain above the circuit is on.
    async fn cooldown_elapsed(&self, circuit_id: &str) {
        // This task is finishing either way; drop its table entry without
        // aborting it.
        self.inner.timers.take(circuit_id);

        let pending = {
            let mut board = self.inner.board.lock().await;
            if let AutoResetOutcome::Reset { reenergize: true } = board.auto_reset(circuit_id) {
                if let Some(effects) = board.set_circuit_state(circuit_id, true, "system") {
                    self.apply_effects(&mut board, effects).await;
                }
            }
            self.drain_new_alerts(&board)
        };
        self.publish_alerts(pending).await;
    }

    /// Collect alerts raised since the last notification pass.
    fn drain_new_alerts(&self, board: &Board) -> Vec<SystemAlert> {
        if self.inner.notifier.is_none() {
            return Vec::new();
        }

        let last = self.inner.last_notified.load(Ordering::Acquire);
        let fresh: Vec<SystemAlert> = board
            .alert_sink()
            .alerts()
            .filter(|a| a.id > last)
            .cloned()
            .collect();

        if let Some(max) = fresh.iter().map(|a| a.id).max() {
            self.inner.last_notified.store(max, Ordering::Release);
        }
        fresh
    }

    /// Forward alerts to the notifier, outside the board lock.
    async fn publish_alerts(&self, alerts: Vec<SystemAlert>) {
        let Some(notifier) = &self.inner.notifier else {
            return;
        };
        for alert in alerts {
            if let Err(err) = notifier.publish(&alert).await {
                warn!(
                    notifier = notifier.name(),
                    alert_id = alert.id,
                    error = %err,
                    "alert delivery failed"
                );
            }
        }
    }
}

impl Default for BreakerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for [`BreakerRegistry`].
pub struct BreakerRegistryBuilder {
    config: RuntimeConfig,
    probe: Arc<dyn HealthProbe>,
    notifier: Option<Arc<dyn AlertNotifier>>,
    exporter: Option<Arc<dyn AuditExporter>>,
}

impl BreakerRegistryBuilder {
    /// Create a builder with defaults: static always-healthy probe, no
    /// notifier, no exporter.
    pub fn new() -> Self {
        Self {
            config: RuntimeConfig::default(),
            probe: Arc::new(StaticProbe::healthy(1.0)),
            notifier: None,
            exporter: None,
        }
    }

    /// Set the configuration.
    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the health probe.
    pub fn probe(mut self, probe: Arc<dyn HealthProbe>) -> Self {
        self.probe = probe;
        self
    }

    /// Set the alert notifier.
    pub fn notifier(mut self, notifier: Arc<dyn AlertNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Set the history exporter.
    pub fn exporter(mut self, exporter: Arc<dyn AuditExporter>) -> Self {
        self.exporter = Some(exporter);
        self
    }

    /// Build the registry.
    pub fn build(self) -> BreakerRegistry {
        let prober = ProbeRunner::new(self.probe, &self.config);
        BreakerRegistry {
            inner: Arc::new(Inner {
                board: Mutex::new(Board::with_capacities(
                    self.config.audit_capacity,
                    self.config.alert_capacity,
                )),
                timers: TimerRegistry::new(),
                prober,
                notifier: self.notifier,
                exporter: self.exporter,
                last_notified: AtomicU64::new(0),
            }),
        }
    }
}

impl Default for BreakerRegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}
