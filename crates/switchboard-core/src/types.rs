//! Breaker node types for the Switchboard tree.
//!
//! The tree has three levels: one [`MasterSwitch`] gates a list of
//! [`Panel`]s, and each panel exclusively owns an ordered list of
//! [`Circuit`]s. A circuit may carry traffic only while its whole chain is
//! on. Nodes are created once at registration and only change state
//! afterwards.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::metrics::LatencyTracker;

/// Default values shared by the core model and the runtime configuration.
pub mod defaults {
    use std::time::Duration;

    /// Consecutive errors before a circuit trips.
    pub const TRIP_THRESHOLD: u32 = 5;

    /// Cooldown before an automatic reset attempt.
    pub const COOLDOWN: Duration = Duration::from_secs(30);

    /// Latency ceiling per circuit, in milliseconds.
    pub const MAX_ALLOWED_LATENCY_MS: f64 = 50.0;

    /// Circuits a panel may own.
    pub const MAX_CIRCUITS_PER_PANEL: usize = 50;

    /// Audit entries retained in memory.
    pub const AUDIT_CAPACITY: usize = 10_000;

    /// Alerts retained in memory.
    pub const ALERT_CAPACITY: usize = 1_000;
}

/// State of a breaker node.
///
/// The master switch holds only `On`/`Off`; panels and circuits can
/// additionally be `Tripped` by failure detection, lockout, or emergency
/// shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    /// Carrying traffic.
    On,

    /// Switched off; safe but idle.
    Off,

    /// Isolated after a failure, lockout, or emergency stop.
    Tripped,
}

impl BreakerState {
    /// Whether this node currently gates traffic open.
    pub fn is_on(&self) -> bool {
        matches!(self, BreakerState::On)
    }
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BreakerState::On => write!(f, "on"),
            BreakerState::Off => write!(f, "off"),
            BreakerState::Tripped => write!(f, "tripped"),
        }
    }
}

/// Derived health classification for a circuit or panel.
///
/// Health is computed from state plus live metrics and is distinct from the
/// raw breaker state: an `On` circuit can be `Degraded` or `Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Within error and latency budgets.
    Healthy,

    /// Operational but outside budget.
    Degraded,

    /// Tripped, or severely outside budget.
    Critical,

    /// Not carrying traffic.
    Offline,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Degraded => write!(f, "degraded"),
            HealthStatus::Critical => write!(f, "critical"),
            HealthStatus::Offline => write!(f, "offline"),
        }
    }
}

/// Aggregated status of the whole board, derived from panel health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemStatus {
    /// Master on, every energized panel healthy.
    Optimal,

    /// Some energized panels are below healthy.
    Degraded,

    /// Emergency shutdown, or at least one panel critical.
    Critical,

    /// Master switch is off.
    Offline,
}

impl std::fmt::Display for SystemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SystemStatus::Optimal => write!(f, "optimal"),
            SystemStatus::Degraded => write!(f, "degraded"),
            SystemStatus::Critical => write!(f, "critical"),
            SystemStatus::Offline => write!(f, "offline"),
        }
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

/// A leaf breaker guarding one managed subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Circuit {
    /// Unique identifier (e.g., "checkout-api").
    pub id: String,

    /// Human-readable name.
    pub name: String,

    /// Free-form grouping label (e.g., "payments").
    pub category: String,

    /// Current breaker state.
    pub state: BreakerState,

    /// Errors since the last reset; zeroed by every reset path.
    pub error_count: u32,

    /// Lifetime trips; never decreases.
    pub trip_count: u32,

    /// Errors that cause a trip.
    pub trip_threshold: u32,

    /// Wait before an automatic reset attempt.
    #[serde(with = "duration_secs")]
    pub cooldown: Duration,

    /// When this circuit last tripped.
    pub last_tripped: Option<DateTime<Utc>>,

    /// When this circuit was last reset (manually or automatically).
    pub last_reset: Option<DateTime<Utc>>,

    /// Scheduled automatic reset; present only while a cooldown is pending.
    pub next_reset_at: Option<DateTime<Utc>>,

    /// Derived health classification.
    pub health: HealthStatus,

    /// Rolling latency estimators.
    pub latency: LatencyTracker,

    /// Calls observed, including errored ones.
    pub request_count: u64,

    /// error_count / request_count, in [0, 1]; falls back to zero on any
    /// reset along with the error count.
    pub error_rate: f64,

    /// Last time any traffic or error was observed.
    pub last_activity: Option<DateTime<Utc>>,
}

impl Circuit {
    /// Create a circuit in the de-energized initial state.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        category: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            category: category.into(),
            state: BreakerState::Off,
            error_count: 0,
            trip_count: 0,
            trip_threshold: defaults::TRIP_THRESHOLD,
            cooldown: defaults::COOLDOWN,
            last_tripped: None,
            last_reset: None,
            next_reset_at: None,
            health: HealthStatus::Offline,
            latency: LatencyTracker::new(defaults::MAX_ALLOWED_LATENCY_MS),
            request_count: 0,
            error_rate: 0.0,
            last_activity: None,
        }
    }
}

/// A mid-tier breaker owning a group of circuits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Panel {
    /// Unique identifier (e.g., "payments").
    pub id: String,

    /// Human-readable name.
    pub name: String,

    /// Current breaker state.
    pub state: BreakerState,

    /// Manual sticky override; only an explicit lockout reset clears it.
    pub locked_out: bool,

    /// Lifetime trips; never decreases.
    pub trip_count: u32,

    /// When this panel last tripped.
    pub last_tripped: Option<DateTime<Utc>>,

    /// Ordering position declared at registration.
    pub position: u32,

    /// Circuits this panel may own.
    pub max_circuits: usize,

    /// Owned circuits, in registration order.
    pub circuits: Vec<Circuit>,

    /// Health aggregated bottom-up from the owned circuits.
    pub health: HealthStatus,
}

impl Panel {
    /// Create a panel in the de-energized, unlocked initial state.
    pub fn new(id: impl Into<String>, name: impl Into<String>, position: u32) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            state: BreakerState::Off,
            locked_out: false,
            trip_count: 0,
            last_tripped: None,
            position,
            max_circuits: defaults::MAX_CIRCUITS_PER_PANEL,
            circuits: Vec::new(),
            health: HealthStatus::Offline,
        }
    }

    /// Look up an owned circuit by id.
    pub fn circuit(&self, circuit_id: &str) -> Option<&Circuit> {
        self.circuits.iter().find(|c| c.id == circuit_id)
    }

    /// Mutable lookup of an owned circuit by id.
    pub fn circuit_mut(&mut self, circuit_id: &str) -> Option<&mut Circuit> {
        self.circuits.iter_mut().find(|c| c.id == circuit_id)
    }

    /// Whether another circuit fits under `max_circuits`.
    pub fn has_capacity(&self) -> bool {
        self.circuits.len() < self.max_circuits
    }

    /// Number of circuits currently on.
    pub fn active_circuits(&self) -> usize {
        self.circuits.iter().filter(|c| c.state.is_on()).count()
    }
}

/// The root breaker gating the whole board.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MasterSwitch {
    /// Current state; the root never trips, it is switched off.
    pub state: BreakerState,

    /// Set by emergency shutdown, cleared when the master is turned on.
    pub emergency_shutdown: bool,

    /// Last on/off transition.
    pub last_state_change: DateTime<Utc>,

    /// When this board was constructed.
    pub start_time: DateTime<Utc>,

    /// Accumulated time spent on, across power cycles.
    #[serde(with = "duration_secs")]
    pub uptime: Duration,

    /// Times the master has been turned on.
    pub power_cycles: u32,

    /// Aggregated status derived from panel health.
    pub system_status: SystemStatus,
}

impl MasterSwitch {
    /// Create a master switch in the off state.
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            state: BreakerState::Off,
            emergency_shutdown: false,
            last_state_change: now,
            start_time: now,
            uptime: Duration::ZERO,
            power_cycles: 0,
            system_status: SystemStatus::Offline,
        }
    }
}

impl Default for MasterSwitch {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_circuit_is_off_and_offline() {
        let circuit = Circuit::new("c1", "Checkout", "payments");
        assert_eq!(circuit.state, BreakerState::Off);
        assert_eq!(circuit.health, HealthStatus::Offline);
        assert_eq!(circuit.error_count, 0);
        assert_eq!(circuit.trip_threshold, defaults::TRIP_THRESHOLD);
        assert!(circuit.next_reset_at.is_none());
    }

    #[test]
    fn test_new_panel_is_unlocked_with_capacity() {
        let panel = Panel::new("p1", "Payments", 0);
        assert_eq!(panel.state, BreakerState::Off);
        assert!(!panel.locked_out);
        assert!(panel.has_capacity());
        assert_eq!(panel.active_circuits(), 0);
    }

    #[test]
    fn test_master_switch_starts_offline() {
        let master = MasterSwitch::new();
        assert_eq!(master.state, BreakerState::Off);
        assert_eq!(master.system_status, SystemStatus::Offline);
        assert_eq!(master.power_cycles, 0);
        assert!(!master.emergency_shutdown);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(BreakerState::Tripped.to_string(), "tripped");
        assert_eq!(HealthStatus::Degraded.to_string(), "degraded");
        assert_eq!(SystemStatus::Optimal.to_string(), "optimal");
    }
}
