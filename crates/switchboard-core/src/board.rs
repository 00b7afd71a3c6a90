//! The breaker tree and its state machine.
//!
//! [`Board`] owns the whole hierarchy (master switch, panels, circuits)
//! together with the audit trail and alert sink, and performs every state
//! transition synchronously. Anything that needs the outside world (health
//! probes on energize, cooldown timers on trip) is returned to the caller
//! as [`CascadeEffects`] instead of being performed here, which keeps the
//! tree deterministic and testable without a runtime.
//!
//! Invariant enforced at every mutation: a circuit may be on only while its
//! owning panel and the master switch are on, and a locked-out panel cannot
//! be turned on at all.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::audit::{AlertLevel, AlertSink, AuditAction, AuditTrail};
use crate::layout::{CircuitSpec, PanelSpec};
use crate::metrics;
use crate::types::{defaults, BreakerState, Circuit, HealthStatus, MasterSwitch, Panel, SystemStatus};

/// Errors from registration-time operations.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum BoardError {
    #[error("unknown panel: {0}")]
    UnknownPanel(String),

    #[error("unknown circuit: {0}")]
    UnknownCircuit(String),

    #[error("duplicate panel id: {0}")]
    DuplicatePanel(String),

    #[error("duplicate circuit id: {0}")]
    DuplicateCircuit(String),

    #[error("panel {panel} is at capacity ({max} circuits)")]
    PanelAtCapacity { panel: String, max: usize },
}

/// Work a transition hands to the async runtime.
///
/// The board never probes or schedules; it reports which circuits turned on
/// (probe them), which tripped (arm their cooldown), and which left the
/// tripped state by other means (disarm any pending cooldown).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CascadeEffects {
    /// Circuits that turned on and need a health probe.
    pub energize: Vec<String>,

    /// Circuits that tripped, with the scheduled reset time.
    pub arm: Vec<(String, DateTime<Utc>)>,

    /// Circuits whose pending cooldown no longer applies.
    pub disarm: Vec<String>,
}

impl CascadeEffects {
    /// Whether the cascade left nothing for the runtime to do.
    pub fn is_empty(&self) -> bool {
        self.energize.is_empty() && self.arm.is_empty() && self.disarm.is_empty()
    }
}

/// Result of an automatic reset attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoResetOutcome {
    /// No circuit with that id.
    UnknownCircuit,

    /// The circuit was no longer tripped; nothing was changed.
    NotTripped,

    /// The circuit was reset to off. When `reenergize` is true the chain
    /// above it is on and the caller should re-run the on transition.
    Reset { reenergize: bool },
}

/// Deep, owned view of one panel with derived counts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PanelSnapshot {
    #[serde(flatten)]
    pub panel: Panel,

    /// Circuits currently on.
    pub active_circuits: usize,

    /// Circuits owned in total.
    pub total_circuits: usize,
}

/// Deep, owned view of the whole board.
///
/// Snapshots share no storage with the live tree; mutating one never
/// affects the other.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoardSnapshot {
    pub master: MasterSwitch,
    pub panels: Vec<PanelSnapshot>,
    pub taken_at: DateTime<Utc>,
}

impl BoardSnapshot {
    /// Look up a panel view by id.
    pub fn panel(&self, panel_id: &str) -> Option<&PanelSnapshot> {
        self.panels.iter().find(|p| p.panel.id == panel_id)
    }

    /// Look up a circuit view by id across all panels.
    pub fn circuit(&self, circuit_id: &str) -> Option<&Circuit> {
        self.panels
            .iter()
            .find_map(|p| p.panel.circuit(circuit_id))
    }
}

/// The breaker tree: one master switch over an ordered list of panels.
#[derive(Debug)]
pub struct Board {
    master: MasterSwitch,
    panels: Vec<Panel>,
    audit: AuditTrail,
    alerts: AlertSink,
}

impl Board {
    /// Create an empty board with default history capacities.
    pub fn new() -> Self {
        Self::with_capacities(defaults::AUDIT_CAPACITY, defaults::ALERT_CAPACITY)
    }

    /// Create an empty board with explicit history capacities.
    pub fn with_capacities(audit_capacity: usize, alert_capacity: usize) -> Self {
        Self {
            master: MasterSwitch::new(),
            panels: Vec::new(),
            audit: AuditTrail::new(audit_capacity),
            alerts: AlertSink::new(alert_capacity),
        }
    }

    // ------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------

    /// Register a panel in the off, unlocked state.
    ///
    /// The panel list stays sorted by declared position. Circuits listed in
    /// a [`PanelSpec`] are not added here; register them with
    /// [`Board::add_circuit`].
    pub fn add_panel(&mut self, spec: &PanelSpec, actor: &str) -> Result<(), BoardError> {
        if self.panels.iter().any(|p| p.id == spec.id) {
            return Err(BoardError::DuplicatePanel(spec.id.clone()));
        }

        let mut panel = Panel::new(&spec.id, &spec.name, spec.position);
        if let Some(max) = spec.max_circuits {
            panel.max_circuits = max;
        }

        self.panels.push(panel);
        self.panels.sort_by_key(|p| p.position);

        self.audit
            .record(actor, AuditAction::PanelAdded, &spec.id, None, None);
        info!(panel = %spec.id, position = spec.position, "panel registered");
        Ok(())
    }

    /// Register a circuit under a panel.
    ///
    /// Fails if the panel is unknown or at capacity, or if the circuit id
    /// is already taken anywhere on the board.
    pub fn add_circuit(
        &mut self,
        panel_id: &str,
        spec: &CircuitSpec,
        actor: &str,
    ) -> Result<(), BoardError> {
        if self.circuit(&spec.id).is_some() {
            return Err(BoardError::DuplicateCircuit(spec.id.clone()));
        }

        let Some(pi) = self.panel_index(panel_id) else {
            return Err(BoardError::UnknownPanel(panel_id.to_string()));
        };

        let panel = &mut self.panels[pi];
        if !panel.has_capacity() {
            return Err(BoardError::PanelAtCapacity {
                panel: panel_id.to_string(),
                max: panel.max_circuits,
            });
        }

        let mut circuit = Circuit::new(&spec.id, &spec.name, &spec.category);
        if let Some(max_ms) = spec.max_latency_ms {
            circuit.latency.max_allowed_ms = max_ms;
        }
        panel.circuits.push(circuit);

        self.audit.record(
            actor,
            AuditAction::CircuitAdded,
            &spec.id,
            None,
            Some(panel_id.to_string()),
        );
        info!(circuit = %spec.id, panel = %panel_id, "circuit registered");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Master transitions
    // ------------------------------------------------------------------

    /// Turn the master switch on and cascade to every panel in order.
    ///
    /// No-op returning `None` when the master is already on: no audit entry
    /// and no power-cycle increment. Clears the emergency flag, which makes
    /// this the recovery path after an emergency shutdown.
    pub fn master_on(&mut self, actor: &str) -> Option<CascadeEffects> {
        if self.master.state.is_on() {
            debug!("master already on");
            return None;
        }

        self.master.state = BreakerState::On;
        self.master.power_cycles += 1;
        self.master.emergency_shutdown = false;
        self.master.last_state_change = Utc::now();

        let mut effects = CascadeEffects::default();
        for pi in 0..self.panels.len() {
            if self.panels[pi].locked_out {
                warn!(panel = %self.panels[pi].id, "panel locked out, not energizing");
                continue;
            }
            self.apply_panel_state(pi, true, actor, &mut effects);
        }

        self.refresh_system_status();
        self.audit.record(
            actor,
            AuditAction::MasterOn,
            "master",
            Some(BreakerState::Off.to_string()),
            Some(BreakerState::On.to_string()),
        );
        info!(power_cycles = self.master.power_cycles, "master switch on");
        Some(effects)
    }

    /// Turn the master switch off and cascade to every panel.
    ///
    /// No-op returning `None` when already off. Accumulates uptime for the
    /// completed on-period. Locked panels are left as they are.
    pub fn master_off(&mut self, actor: &str) -> Option<CascadeEffects> {
        if !self.master.state.is_on() {
            debug!("master already off");
            return None;
        }

        self.accumulate_uptime();
        self.master.state = BreakerState::Off;
        self.master.last_state_change = Utc::now();

        let mut effects = CascadeEffects::default();
        for pi in 0..self.panels.len() {
            if self.panels[pi].locked_out {
                continue;
            }
            self.apply_panel_state(pi, false, actor, &mut effects);
        }

        self.master.system_status = SystemStatus::Offline;
        self.audit.record(
            actor,
            AuditAction::MasterOff,
            "master",
            Some(BreakerState::On.to_string()),
            Some(BreakerState::Off.to_string()),
        );
        info!("master switch off");
        Some(effects)
    }

    /// Force the whole board down in one synchronous pass.
    ///
    /// Every panel and circuit goes directly to tripped, without the
    /// per-circuit trip path and without arming any cooldown, so nothing
    /// recovers until an operator turns the master back on. Pending
    /// cooldowns are reported for cancellation.
    pub fn emergency_shutdown(&mut self, actor: &str, reason: &str) -> CascadeEffects {
        let now = Utc::now();
        let mut effects = CascadeEffects::default();

        for panel in &mut self.panels {
            panel.state = BreakerState::Tripped;
            panel.trip_count += 1;
            panel.last_tripped = Some(now);

            for circuit in &mut panel.circuits {
                circuit.state = BreakerState::Tripped;
                circuit.trip_count += 1;
                circuit.last_tripped = Some(now);
                circuit.next_reset_at = None;
                circuit.health = HealthStatus::Critical;
                effects.disarm.push(circuit.id.clone());
            }
            panel.health = HealthStatus::Offline;
        }

        if self.master.state.is_on() {
            self.accumulate_uptime();
        }
        self.master.state = BreakerState::Off;
        self.master.emergency_shutdown = true;
        self.master.last_state_change = now;
        self.master.system_status = SystemStatus::Critical;

        self.alerts.raise(
            AlertLevel::Critical,
            "master",
            format!("emergency shutdown by {}: {}", actor, reason),
        );
        self.audit.record(
            actor,
            AuditAction::EmergencyShutdown,
            "master",
            None,
            Some(reason.to_string()),
        );
        warn!(actor, reason, "emergency shutdown");
        effects
    }

    // ------------------------------------------------------------------
    // Panel transitions
    // ------------------------------------------------------------------

    /// Turn a panel on or off, cascading to its circuits.
    ///
    /// Returns `None` (with a warning) when the panel is unknown, locked
    /// out, or asked to turn on while the master is off. Turning off is
    /// always permitted.
    pub fn set_panel_state(
        &mut self,
        panel_id: &str,
        on: bool,
        actor: &str,
    ) -> Option<CascadeEffects> {
        let Some(pi) = self.panel_index(panel_id) else {
            warn!(panel = %panel_id, "unknown panel");
            return None;
        };

        if self.panels[pi].locked_out {
            warn!(panel = %panel_id, "panel is locked out");
            return None;
        }
        if on && !self.master.state.is_on() {
            warn!(panel = %panel_id, "cannot energize panel while master is off");
            return None;
        }

        let mut effects = CascadeEffects::default();
        self.apply_panel_state(pi, on, actor, &mut effects);
        self.refresh_system_status();
        Some(effects)
    }

    /// Trip a panel and everything under it, then stick it in lockout.
    ///
    /// The same unconditional force-trip as an emergency shutdown, scoped
    /// to one panel; no cooldowns are armed and pending ones are reported
    /// for cancellation. Only [`Board::reset_panel_lockout`] clears it.
    pub fn lockout_panel(
        &mut self,
        panel_id: &str,
        actor: &str,
        reason: &str,
    ) -> Option<CascadeEffects> {
        let Some(pi) = self.panel_index(panel_id) else {
            warn!(panel = %panel_id, "unknown panel");
            return None;
        };

        let now = Utc::now();
        let mut effects = CascadeEffects::default();
        let panel = &mut self.panels[pi];

        panel.state = BreakerState::Tripped;
        panel.locked_out = true;
        panel.trip_count += 1;
        panel.last_tripped = Some(now);

        for circuit in &mut panel.circuits {
            circuit.state = BreakerState::Tripped;
            circuit.trip_count += 1;
            circuit.last_tripped = Some(now);
            circuit.next_reset_at = None;
            circuit.health = HealthStatus::Critical;
            effects.disarm.push(circuit.id.clone());
        }
        panel.health = HealthStatus::Offline;

        self.alerts.raise(
            AlertLevel::Alert,
            panel_id,
            format!("panel locked out by {}: {}", actor, reason),
        );
        self.audit.record(
            actor,
            AuditAction::PanelLockout,
            panel_id,
            None,
            Some(reason.to_string()),
        );
        self.refresh_system_status();
        warn!(panel = %panel_id, actor, reason, "panel locked out");
        Some(effects)
    }

    /// Clear a panel lockout, resetting every owned circuit.
    ///
    /// Circuits go through the manual reset path (off, zero errors); the
    /// panel itself is left off: ready, not re-energized.
    pub fn reset_panel_lockout(&mut self, panel_id: &str, actor: &str) -> Option<CascadeEffects> {
        let Some(pi) = self.panel_index(panel_id) else {
            warn!(panel = %panel_id, "unknown panel");
            return None;
        };
        if !self.panels[pi].locked_out {
            warn!(panel = %panel_id, "panel is not locked out");
            return None;
        }

        let now = Utc::now();
        let mut effects = CascadeEffects::default();
        let panel = &mut self.panels[pi];

        panel.locked_out = false;
        panel.state = BreakerState::Off;

        for circuit in &mut panel.circuits {
            reset_circuit_fields(circuit, now);
            effects.disarm.push(circuit.id.clone());
        }
        panel.health = HealthStatus::Offline;

        self.audit.record(
            actor,
            AuditAction::PanelLockoutReset,
            panel_id,
            Some("locked".to_string()),
            Some("off".to_string()),
        );
        self.refresh_system_status();
        info!(panel = %panel_id, actor, "panel lockout reset");
        Some(effects)
    }

    // ------------------------------------------------------------------
    // Circuit transitions
    // ------------------------------------------------------------------

    /// Turn a circuit on or off.
    ///
    /// Energizing requires the whole chain above it to be on (master on,
    /// panel on and not locked out); turning off is always permitted. The
    /// caller is expected to run a health probe for every circuit reported
    /// in [`CascadeEffects::energize`].
    pub fn set_circuit_state(
        &mut self,
        circuit_id: &str,
        on: bool,
        actor: &str,
    ) -> Option<CascadeEffects> {
        let Some((pi, ci)) = self.locate(circuit_id) else {
            warn!(circuit = %circuit_id, "unknown circuit");
            return None;
        };

        if on {
            if !self.master.state.is_on() {
                warn!(circuit = %circuit_id, "cannot energize circuit while master is off");
                return None;
            }
            let panel = &self.panels[pi];
            if !panel.state.is_on() || panel.locked_out {
                warn!(
                    circuit = %circuit_id,
                    panel = %panel.id,
                    "cannot energize circuit while its panel is off or locked"
                );
                return None;
            }
        }

        let mut effects = CascadeEffects::default();
        self.apply_circuit_state(pi, ci, on, actor, &mut effects);
        self.refresh_panel_health(pi);
        self.refresh_system_status();
        Some(effects)
    }

    /// Trip a circuit: isolate it and schedule the automatic reset.
    pub fn trip_circuit(&mut self, circuit_id: &str, reason: &str) -> Option<CascadeEffects> {
        let Some((pi, ci)) = self.locate(circuit_id) else {
            warn!(circuit = %circuit_id, "unknown circuit");
            return None;
        };

        let mut effects = CascadeEffects::default();
        self.apply_trip(pi, ci, reason, &mut effects);
        self.refresh_panel_health(pi);
        self.refresh_system_status();
        Some(effects)
    }

    /// Manually reset a circuit: off, zero errors, pending cooldown gone.
    pub fn reset_circuit(&mut self, circuit_id: &str, actor: &str) -> Option<CascadeEffects> {
        let Some((pi, ci)) = self.locate(circuit_id) else {
            warn!(circuit = %circuit_id, "unknown circuit");
            return None;
        };

        let now = Utc::now();
        let circuit = &mut self.panels[pi].circuits[ci];
        let previous = circuit.state;
        reset_circuit_fields(circuit, now);
        let id = circuit.id.clone();

        self.audit.record(
            actor,
            AuditAction::CircuitReset,
            &id,
            Some(previous.to_string()),
            Some(BreakerState::Off.to_string()),
        );
        self.refresh_panel_health(pi);
        self.refresh_system_status();
        info!(circuit = %id, actor, "circuit reset");

        Some(CascadeEffects {
            disarm: vec![id],
            ..Default::default()
        })
    }

    /// Automatic reset when a cooldown elapses.
    ///
    /// No-op if the circuit is no longer tripped; a manual reset or an
    /// off-cascade may have won the race against the timer.
    pub fn auto_reset(&mut self, circuit_id: &str) -> AutoResetOutcome {
        let Some((pi, ci)) = self.locate(circuit_id) else {
            warn!(circuit = %circuit_id, "unknown circuit");
            return AutoResetOutcome::UnknownCircuit;
        };

        let circuit = &mut self.panels[pi].circuits[ci];
        if circuit.state != BreakerState::Tripped {
            debug!(circuit = %circuit_id, "cooldown elapsed but circuit is no longer tripped");
            return AutoResetOutcome::NotTripped;
        }

        let now = Utc::now();
        reset_circuit_fields(circuit, now);
        let id = circuit.id.clone();

        self.audit.record(
            "system",
            AuditAction::CircuitAutoReset,
            &id,
            Some(BreakerState::Tripped.to_string()),
            Some(BreakerState::Off.to_string()),
        );
        self.alerts.raise(
            AlertLevel::Info,
            &id,
            "circuit automatically reset after cooldown",
        );
        self.refresh_panel_health(pi);
        self.refresh_system_status();
        info!(circuit = %id, "circuit auto-reset after cooldown");

        let panel = &self.panels[pi];
        let reenergize = self.master.state.is_on() && panel.state.is_on() && !panel.locked_out;
        AutoResetOutcome::Reset { reenergize }
    }

    // ------------------------------------------------------------------
    // Telemetry
    // ------------------------------------------------------------------

    /// Record a successful call against a circuit.
    pub fn record_request(&mut self, circuit_id: &str, latency_ms: f64) -> bool {
        let Some((pi, ci)) = self.locate(circuit_id) else {
            warn!(circuit = %circuit_id, "unknown circuit");
            return false;
        };
        metrics::record_request(&mut self.panels[pi].circuits[ci], latency_ms);
        self.refresh_panel_health(pi);
        self.refresh_system_status();
        true
    }

    /// Record an errored call against a circuit.
    ///
    /// Raises a warning alert on a latency breach and trips the circuit
    /// when the error count reaches its threshold; the trip schedules a
    /// cooldown through the returned effects.
    pub fn report_error(
        &mut self,
        circuit_id: &str,
        error: &str,
        latency_ms: Option<f64>,
    ) -> Option<CascadeEffects> {
        let Some((pi, ci)) = self.locate(circuit_id) else {
            warn!(circuit = %circuit_id, "unknown circuit");
            return None;
        };

        let outcome = metrics::report_error(&mut self.panels[pi].circuits[ci], latency_ms);
        debug!(circuit = %circuit_id, error, "error reported");

        let mut effects = CascadeEffects::default();
        if outcome.latency_breach {
            let circuit = &self.panels[pi].circuits[ci];
            let message = format!(
                "latency {:.1}ms over {:.1}ms ceiling",
                circuit.latency.current_ms, circuit.latency.max_allowed_ms
            );
            self.alerts.raise(AlertLevel::Warning, circuit_id, message);
        }

        if outcome.should_trip {
            let threshold = self.panels[pi].circuits[ci].trip_threshold;
            let reason = format!("error threshold reached ({} errors)", threshold);
            self.apply_trip(pi, ci, &reason, &mut effects);
        }

        self.refresh_panel_health(pi);
        self.refresh_system_status();
        Some(effects)
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// The master switch.
    pub fn master(&self) -> &MasterSwitch {
        &self.master
    }

    /// All panels in position order.
    pub fn panels(&self) -> &[Panel] {
        &self.panels
    }

    /// Look up a panel by id.
    pub fn panel(&self, panel_id: &str) -> Option<&Panel> {
        self.panels.iter().find(|p| p.id == panel_id)
    }

    /// Look up a circuit by id, scanning all panels.
    pub fn circuit(&self, circuit_id: &str) -> Option<&Circuit> {
        self.panels.iter().find_map(|p| p.circuit(circuit_id))
    }

    /// Find the panel owning a circuit.
    pub fn panel_for_circuit(&self, circuit_id: &str) -> Option<&Panel> {
        self.panels.iter().find(|p| p.circuit(circuit_id).is_some())
    }

    /// The audit trail.
    pub fn audit_trail(&self) -> &AuditTrail {
        &self.audit
    }

    /// The alert sink.
    pub fn alert_sink(&self) -> &AlertSink {
        &self.alerts
    }

    /// Acknowledge an alert; idempotent, audited when it takes effect.
    pub fn acknowledge_alert(&mut self, alert_id: u64, actor: &str) -> bool {
        if !self.alerts.acknowledge(alert_id, actor) {
            return false;
        }
        self.audit.record(
            actor,
            AuditAction::AlertAcknowledged,
            &alert_id.to_string(),
            None,
            None,
        );
        true
    }

    /// Take a deep, owned snapshot of the whole tree.
    pub fn snapshot(&self) -> BoardSnapshot {
        BoardSnapshot {
            master: self.master.clone(),
            panels: self
                .panels
                .iter()
                .map(|p| PanelSnapshot {
                    active_circuits: p.active_circuits(),
                    total_circuits: p.circuits.len(),
                    panel: p.clone(),
                })
                .collect(),
            taken_at: Utc::now(),
        }
    }

    // ------------------------------------------------------------------
    // Internal transitions
    // ------------------------------------------------------------------

    /// Set a panel's state and cascade to its circuits. Validation is the
    /// caller's job; this always applies.
    fn apply_panel_state(
        &mut self,
        pi: usize,
        on: bool,
        actor: &str,
        effects: &mut CascadeEffects,
    ) {
        let target = if on { BreakerState::On } else { BreakerState::Off };
        let previous = self.panels[pi].state;
        if previous == target {
            debug!(panel = %self.panels[pi].id, state = %target, "panel already in requested state");
            return;
        }

        self.panels[pi].state = target;
        let panel_id = self.panels[pi].id.clone();

        for ci in 0..self.panels[pi].circuits.len() {
            self.apply_circuit_state(pi, ci, on, actor, effects);
        }

        self.refresh_panel_health(pi);
        self.audit.record(
            actor,
            if on { AuditAction::PanelOn } else { AuditAction::PanelOff },
            &panel_id,
            Some(previous.to_string()),
            Some(target.to_string()),
        );
        info!(panel = %panel_id, state = %target, "panel state changed");
    }

    /// Set a circuit's state. Validation is the caller's job.
    fn apply_circuit_state(
        &mut self,
        pi: usize,
        ci: usize,
        on: bool,
        actor: &str,
        effects: &mut CascadeEffects,
    ) {
        let target = if on { BreakerState::On } else { BreakerState::Off };
        let circuit = &mut self.panels[pi].circuits[ci];
        let previous = circuit.state;
        if previous == target {
            debug!(circuit = %circuit.id, state = %target, "circuit already in requested state");
            return;
        }

        circuit.state = target;
        if previous == BreakerState::Tripped {
            circuit.next_reset_at = None;
            effects.disarm.push(circuit.id.clone());
        }
        metrics::refresh_health(circuit);
        let circuit_id = circuit.id.clone();

        if on {
            effects.energize.push(circuit_id.clone());
        }

        self.audit.record(
            actor,
            if on { AuditAction::CircuitOn } else { AuditAction::CircuitOff },
            &circuit_id,
            Some(previous.to_string()),
            Some(target.to_string()),
        );
        debug!(circuit = %circuit_id, state = %target, "circuit state changed");
    }

    /// Trip one circuit through the ordinary (self-healing) path.
    fn apply_trip(&mut self, pi: usize, ci: usize, reason: &str, effects: &mut CascadeEffects) {
        let now = Utc::now();
        let circuit = &mut self.panels[pi].circuits[ci];
        let previous = circuit.state;

        circuit.state = BreakerState::Tripped;
        circuit.trip_count += 1;
        circuit.last_tripped = Some(now);
        circuit.health = HealthStatus::Critical;

        let next_reset_at = now
            + chrono::Duration::from_std(circuit.cooldown)
                .unwrap_or_else(|_| chrono::Duration::seconds(30));
        circuit.next_reset_at = Some(next_reset_at);

        let circuit_id = circuit.id.clone();
        effects.arm.push((circuit_id.clone(), next_reset_at));

        self.alerts.raise(
            AlertLevel::Alert,
            &circuit_id,
            format!("circuit tripped: {}", reason),
        );
        self.audit.record(
            "system",
            AuditAction::CircuitTrip,
            &circuit_id,
            Some(previous.to_string()),
            Some(BreakerState::Tripped.to_string()),
        );
        warn!(circuit = %circuit_id, reason, "circuit tripped");
    }

    /// Recompute one panel's aggregated health.
    fn refresh_panel_health(&mut self, pi: usize) {
        let panel = &mut self.panels[pi];
        panel.health = aggregate_panel_health(panel);
    }

    /// Recompute the board-level status from panel health.
    fn refresh_system_status(&mut self) {
        self.master.system_status = if self.master.emergency_shutdown {
            SystemStatus::Critical
        } else if !self.master.state.is_on() {
            SystemStatus::Offline
        } else if self.panels.iter().any(|p| p.health == HealthStatus::Critical) {
            SystemStatus::Critical
        } else {
            let on = self.panels.iter().filter(|p| p.state.is_on()).count();
            let healthy = self
                .panels
                .iter()
                .filter(|p| p.health == HealthStatus::Healthy)
                .count();
            if healthy < on {
                SystemStatus::Degraded
            } else {
                SystemStatus::Optimal
            }
        };
    }

    fn accumulate_uptime(&mut self) {
        let since = Utc::now().signed_duration_since(self.master.last_state_change);
        if let Ok(elapsed) = since.to_std() {
            self.master.uptime += elapsed;
        }
    }

    fn panel_index(&self, panel_id: &str) -> Option<usize> {
        self.panels.iter().position(|p| p.id == panel_id)
    }

    fn locate(&self, circuit_id: &str) -> Option<(usize, usize)> {
        self.panels.iter().enumerate().find_map(|(pi, panel)| {
            panel
                .circuits
                .iter()
                .position(|c| c.id == circuit_id)
                .map(|ci| (pi, ci))
        })
    }
}

impl Default for Board {
    fn default() -> Self {
        Self::new()
    }
}

/// The manual/automatic reset shared by every reset path.
fn reset_circuit_fields(circuit: &mut Circuit, now: DateTime<Utc>) {
    circuit.state = BreakerState::Off;
    circuit.error_count = 0;
    circuit.error_rate = 0.0;
    circuit.last_reset = Some(now);
    circuit.next_reset_at = None;
    circuit.health = HealthStatus::Offline;
}

/// Aggregate a panel's health from its state and children.
fn aggregate_panel_health(panel: &Panel) -> HealthStatus {
    if !panel.state.is_on() || panel.locked_out {
        return HealthStatus::Offline;
    }
    if panel
        .circuits
        .iter()
        .any(|c| c.health == HealthStatus::Critical)
    {
        return HealthStatus::Critical;
    }

    let on = panel.circuits.iter().filter(|c| c.state.is_on()).count();
    let healthy = panel
        .circuits
        .iter()
        .filter(|c| c.health == HealthStatus::Healthy)
        .count();
    if healthy < on {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{CircuitSpec, PanelSpec};

    fn board_with(panels: &[(&str, &[&str])]) -> Board {
        let mut board = Board::new();
        for (i, (panel_id, circuits)) in panels.iter().enumerate() {
            let spec = PanelSpec::new(*panel_id, *panel_id, i as u32);
            board.add_panel(&spec, "test").unwrap();
            for circuit_id in *circuits {
                let spec = CircuitSpec::new(*circuit_id, *circuit_id, "general");
                board.add_circuit(panel_id, &spec, "test").unwrap();
            }
        }
        board
    }

    fn energize(board: &mut Board) {
        board.master_on("test");
    }

    #[test]
    fn test_panels_sorted_by_position() {
        let mut board = Board::new();
        board
            .add_panel(&PanelSpec::new("late", "late", 5), "test")
            .unwrap();
        board
            .add_panel(&PanelSpec::new("early", "early", 1), "test")
            .unwrap();
        let ids: Vec<&str> = board.panels().iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["early", "late"]);
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let mut board = board_with(&[("p1", &["c1"])]);
        assert_eq!(
            board.add_panel(&PanelSpec::new("p1", "again", 9), "test"),
            Err(BoardError::DuplicatePanel("p1".to_string()))
        );
        assert_eq!(
            board.add_circuit("p1", &CircuitSpec::new("c1", "again", "general"), "test"),
            Err(BoardError::DuplicateCircuit("c1".to_string()))
        );
    }

    #[test]
    fn test_panel_capacity_enforced() {
        let mut board = Board::new();
        let mut spec = PanelSpec::new("p1", "p1", 0);
        spec.max_circuits = Some(2);
        board.add_panel(&spec, "test").unwrap();

        board
            .add_circuit("p1", &CircuitSpec::new("c1", "c1", "general"), "test")
            .unwrap();
        board
            .add_circuit("p1", &CircuitSpec::new("c2", "c2", "general"), "test")
            .unwrap();
        assert!(matches!(
            board.add_circuit("p1", &CircuitSpec::new("c3", "c3", "general"), "test"),
            Err(BoardError::PanelAtCapacity { .. })
        ));
    }

    #[test]
    fn test_circuit_on_requires_full_chain() {
        // Every master/panel combination; energizing must succeed only when
        // the whole chain is on.
        for (master_on, panel_on, locked) in [
            (false, false, false),
            (false, true, false),
            (true, false, false),
            (true, true, false),
            (false, false, true),
            (true, false, true),
        ] {
            let mut board = board_with(&[("p1", &["c1"])]);
            if master_on {
                board.master_on("test");
                // Start from a known panel/circuit state.
                board.set_panel_state("p1", false, "test");
            }
            if locked {
                board.lockout_panel("p1", "test", "maintenance");
            } else if panel_on {
                board.set_panel_state("p1", true, "test");
            }

            let accepted = board.set_circuit_state("c1", true, "test").is_some();
            let expect = master_on && panel_on && !locked;
            assert_eq!(accepted, expect, "master={master_on} panel={panel_on} locked={locked}");

            if accepted {
                assert_eq!(board.circuit("c1").unwrap().state, BreakerState::On);
            } else {
                assert_ne!(board.circuit("c1").unwrap().state, BreakerState::On);
            }
        }
    }

    #[test]
    fn test_master_on_is_idempotent() {
        let mut board = board_with(&[("p1", &["c1"])]);
        assert!(board.master_on("admin").is_some());
        let audits = board.audit_trail().len();
        let cycles = board.master().power_cycles;

        assert!(board.master_on("admin").is_none());
        assert_eq!(board.audit_trail().len(), audits);
        assert_eq!(board.master().power_cycles, cycles);
    }

    #[test]
    fn test_master_on_cascades_in_order() {
        let mut board = board_with(&[("p1", &["c1"]), ("p2", &["c2", "c3"])]);
        let effects = board.master_on("admin").unwrap();
        assert_eq!(effects.energize, vec!["c1", "c2", "c3"]);
        assert_eq!(board.master().system_status, SystemStatus::Optimal);
        assert_eq!(board.panel("p1").unwrap().active_circuits(), 1);
    }

    #[test]
    fn test_master_off_cascades_but_skips_locked_panels() {
        let mut board = board_with(&[("p1", &["c1"]), ("p2", &["c2"])]);
        energize(&mut board);
        board.lockout_panel("p2", "admin", "maintenance");

        board.master_off("admin").unwrap();
        assert_eq!(board.circuit("c1").unwrap().state, BreakerState::Off);
        assert_eq!(board.panel("p2").unwrap().state, BreakerState::Tripped);
        assert!(board.panel("p2").unwrap().locked_out);
        assert_eq!(board.master().system_status, SystemStatus::Offline);
    }

    #[test]
    fn test_five_errors_trip_exactly_once() {
        let mut board = board_with(&[("p1", &["c1"])]);
        energize(&mut board);

        for _ in 0..4 {
            let effects = board.report_error("c1", "boom", None).unwrap();
            assert!(effects.arm.is_empty());
            assert_ne!(board.circuit("c1").unwrap().state, BreakerState::Tripped);
        }

        let effects = board.report_error("c1", "boom", None).unwrap();
        assert_eq!(effects.arm.len(), 1);
        let circuit = board.circuit("c1").unwrap();
        assert_eq!(circuit.state, BreakerState::Tripped);
        assert_eq!(circuit.trip_count, 1);
        assert!(circuit.next_reset_at.is_some());

        // Further errors do not re-trip.
        let effects = board.report_error("c1", "boom", None).unwrap();
        assert!(effects.arm.is_empty());
        assert_eq!(board.circuit("c1").unwrap().trip_count, 1);
    }

    #[test]
    fn test_trip_raises_alert_and_audit() {
        let mut board = board_with(&[("p1", &["c1"])]);
        energize(&mut board);
        for _ in 0..5 {
            board.report_error("c1", "boom", None);
        }

        assert!(board
            .alert_sink()
            .alerts()
            .any(|a| a.level == AlertLevel::Alert && a.source == "c1"));
        assert!(board
            .audit_trail()
            .entries()
            .any(|e| e.action == AuditAction::CircuitTrip && e.target == "c1"));
        assert_eq!(board.panel("p1").unwrap().health, HealthStatus::Critical);
        assert_eq!(board.master().system_status, SystemStatus::Critical);
    }

    #[test]
    fn test_manual_reset_zeroes_errors_and_disarms() {
        let mut board = board_with(&[("p1", &["c1"])]);
        energize(&mut board);
        for _ in 0..5 {
            board.report_error("c1", "boom", None);
        }

        let effects = board.reset_circuit("c1", "admin").unwrap();
        assert_eq!(effects.disarm, vec!["c1"]);

        let circuit = board.circuit("c1").unwrap();
        assert_eq!(circuit.state, BreakerState::Off);
        assert_eq!(circuit.error_count, 0);
        assert!(circuit.next_reset_at.is_none());
        assert_eq!(circuit.health, HealthStatus::Offline);
        assert!(circuit.last_reset.is_some());
    }

    #[test]
    fn test_auto_reset_requires_tripped_state() {
        let mut board = board_with(&[("p1", &["c1"])]);
        energize(&mut board);

        assert_eq!(board.auto_reset("c1"), AutoResetOutcome::NotTripped);
        assert_eq!(board.auto_reset("ghost"), AutoResetOutcome::UnknownCircuit);

        board.trip_circuit("c1", "test trip");
        assert_eq!(
            board.auto_reset("c1"),
            AutoResetOutcome::Reset { reenergize: true }
        );
        let circuit = board.circuit("c1").unwrap();
        assert_eq!(circuit.state, BreakerState::Off);
        assert_eq!(circuit.error_count, 0);
        assert!(circuit.next_reset_at.is_none());
    }

    #[test]
    fn test_auto_reset_does_not_reenergize_when_chain_is_down() {
        let mut board = board_with(&[("p1", &["c1"])]);
        energize(&mut board);
        board.trip_circuit("c1", "test trip");
        board.master_off("admin");

        // The off-cascade already reset the circuit to off, so the timer
        // firing later finds nothing to do.
        assert_eq!(board.auto_reset("c1"), AutoResetOutcome::NotTripped);
    }

    #[test]
    fn test_emergency_shutdown_trips_everything_without_cooldowns() {
        let mut board = board_with(&[("p1", &["c1", "c2"]), ("p2", &["c3"])]);
        energize(&mut board);
        board.trip_circuit("c1", "earlier trip");

        let effects = board.emergency_shutdown("admin", "fire drill");
        assert!(effects.arm.is_empty());
        assert_eq!(effects.disarm.len(), 3);

        for id in ["c1", "c2", "c3"] {
            let circuit = board.circuit(id).unwrap();
            assert_eq!(circuit.state, BreakerState::Tripped);
            assert!(circuit.next_reset_at.is_none());
        }
        for panel in board.panels() {
            assert_eq!(panel.state, BreakerState::Tripped);
        }
        assert!(board.master().emergency_shutdown);
        assert_eq!(board.master().state, BreakerState::Off);
        assert_eq!(board.master().system_status, SystemStatus::Critical);
        assert!(board
            .alert_sink()
            .alerts()
            .any(|a| a.level == AlertLevel::Critical));
    }

    #[test]
    fn test_master_on_recovers_from_emergency() {
        let mut board = board_with(&[("p1", &["c1"])]);
        energize(&mut board);
        board.emergency_shutdown("admin", "drill");

        let effects = board.master_on("admin").unwrap();
        assert!(!board.master().emergency_shutdown);
        assert_eq!(effects.energize, vec!["c1"]);
        assert_eq!(board.circuit("c1").unwrap().state, BreakerState::On);
    }

    #[test]
    fn test_lockout_rejects_energize_until_reset() {
        let mut board = board_with(&[("p1", &["c1"])]);
        energize(&mut board);
        board.lockout_panel("p1", "admin", "maintenance");

        assert!(board.set_panel_state("p1", true, "admin").is_none());
        let panel = board.panel("p1").unwrap();
        assert_eq!(panel.state, BreakerState::Tripped);
        assert!(panel.locked_out);

        board.reset_panel_lockout("p1", "admin").unwrap();
        let panel = board.panel("p1").unwrap();
        assert_eq!(panel.state, BreakerState::Off);
        assert!(!panel.locked_out);
        assert_eq!(board.circuit("c1").unwrap().state, BreakerState::Off);
        assert_eq!(board.circuit("c1").unwrap().error_count, 0);

        // Ready but not re-energized; turning it on now works.
        assert!(board.set_panel_state("p1", true, "admin").is_some());
    }

    #[test]
    fn test_reset_lockout_requires_lockout() {
        let mut board = board_with(&[("p1", &["c1"])]);
        assert!(board.reset_panel_lockout("p1", "admin").is_none());
    }

    #[test]
    fn test_panel_health_degrades_with_unhealthy_children() {
        let mut board = board_with(&[("p1", &["c1", "c2"])]);
        energize(&mut board);
        assert_eq!(board.panel("p1").unwrap().health, HealthStatus::Healthy);

        // Push c1 over the latency ceiling: degraded child, degraded panel.
        board.record_request("c1", 80.0);
        assert_eq!(board.circuit("c1").unwrap().health, HealthStatus::Degraded);
        assert_eq!(board.panel("p1").unwrap().health, HealthStatus::Degraded);
        assert_eq!(board.master().system_status, SystemStatus::Degraded);
    }

    #[test]
    fn test_snapshot_does_not_alias_live_tree() {
        let mut board = board_with(&[("p1", &["c1"])]);
        energize(&mut board);

        let snapshot = board.snapshot();
        assert_eq!(snapshot.circuit("c1").unwrap().state, BreakerState::On);
        assert_eq!(snapshot.panel("p1").unwrap().active_circuits, 1);

        board.emergency_shutdown("admin", "drill");
        assert_eq!(snapshot.circuit("c1").unwrap().state, BreakerState::On);
        assert_eq!(snapshot.master.state, BreakerState::On);
    }

    #[test]
    fn test_report_error_latency_breach_raises_warning() {
        let mut board = board_with(&[("p1", &["c1"])]);
        energize(&mut board);
        board.report_error("c1", "slow failure", Some(200.0));

        assert!(board
            .alert_sink()
            .alerts()
            .any(|a| a.level == AlertLevel::Warning && a.source == "c1"));
    }

    #[test]
    fn test_turning_off_is_always_permitted() {
        let mut board = board_with(&[("p1", &["c1"])]);
        energize(&mut board);
        board.master_off("admin");

        // Master is off, but explicit off-requests still go through.
        assert!(board.set_panel_state("p1", false, "admin").is_some());
        assert!(board.set_circuit_state("c1", false, "admin").is_some());
    }

    #[test]
    fn test_uptime_accumulates_across_power_cycles() {
        let mut board = board_with(&[("p1", &[] as &[&str])]);
        board.master_on("admin");
        board.master_off("admin");
        board.master_on("admin");
        assert_eq!(board.master().power_cycles, 2);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        #[derive(Debug, Clone)]
        enum Op {
            MasterOn,
            MasterOff,
            PanelState(bool),
            CircuitState(bool),
            ReportError,
            Trip,
            Reset,
            AutoReset,
            Lockout,
            LockoutReset,
            Emergency,
        }

        fn op_strategy() -> impl Strategy<Value = Op> {
            prop_oneof![
                Just(Op::MasterOn),
                Just(Op::MasterOff),
                any::<bool>().prop_map(Op::PanelState),
                any::<bool>().prop_map(Op::CircuitState),
                Just(Op::ReportError),
                Just(Op::Trip),
                Just(Op::Reset),
                Just(Op::AutoReset),
                Just(Op::Lockout),
                Just(Op::LockoutReset),
                Just(Op::Emergency),
            ]
        }

        proptest! {
            // Whatever sequence of operations runs, no circuit may be on
            // while its panel or the master is off, and a cooldown may be
            // pending only on a tripped circuit.
            #[test]
            fn chain_invariant_holds(ops in prop::collection::vec(op_strategy(), 1..60)) {
                let mut board = board_with(&[("p1", &["c1", "c2"])]);
                for op in ops {
                    match op {
                        Op::MasterOn => { board.master_on("prop"); }
                        Op::MasterOff => { board.master_off("prop"); }
                        Op::PanelState(on) => { board.set_panel_state("p1", on, "prop"); }
                        Op::CircuitState(on) => { board.set_circuit_state("c1", on, "prop"); }
                        Op::ReportError => { board.report_error("c1", "boom", None); }
                        Op::Trip => { board.trip_circuit("c1", "prop trip"); }
                        Op::Reset => { board.reset_circuit("c1", "prop"); }
                        Op::AutoReset => { board.auto_reset("c1"); }
                        Op::Lockout => { board.lockout_panel("p1", "prop", "prop"); }
                        Op::LockoutReset => { board.reset_panel_lockout("p1", "prop"); }
                        Op::Emergency => { board.emergency_shutdown("prop", "prop"); }
                    }

                    let master_on = board.master().state.is_on();
                    for panel in board.panels() {
                        for circuit in &panel.circuits {
                            if circuit.state.is_on() {
                                prop_assert!(master_on && panel.state.is_on() && !panel.locked_out);
                            }
                            if circuit.next_reset_at.is_some() {
                                prop_assert_eq!(circuit.state, BreakerState::Tripped);
                            }
                        }
                    }
                }
            }
        }
    }
}
