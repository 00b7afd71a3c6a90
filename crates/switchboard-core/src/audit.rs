//! Append-only audit trail and alert sink.
//!
//! Both buffers are bounded FIFO rings: the audit trail keeps the last
//! 10,000 entries and the alert sink the last 1,000, silently evicting the
//! oldest. History beyond that lives only behind an optional exporter.
//! Unacknowledged-alert counts are maintained O(1) on insert; acknowledging
//! recounts over the ring.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::types::defaults;

/// What a control-plane operation did, recorded on every mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    MasterOn,
    MasterOff,
    EmergencyShutdown,
    PanelAdded,
    PanelOn,
    PanelOff,
    PanelLockout,
    PanelLockoutReset,
    CircuitAdded,
    CircuitOn,
    CircuitOff,
    CircuitTrip,
    CircuitReset,
    CircuitAutoReset,
    AlertAcknowledged,
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AuditAction::MasterOn => "MASTER_ON",
            AuditAction::MasterOff => "MASTER_OFF",
            AuditAction::EmergencyShutdown => "EMERGENCY_SHUTDOWN",
            AuditAction::PanelAdded => "PANEL_ADDED",
            AuditAction::PanelOn => "PANEL_ON",
            AuditAction::PanelOff => "PANEL_OFF",
            AuditAction::PanelLockout => "PANEL_LOCKOUT",
            AuditAction::PanelLockoutReset => "PANEL_LOCKOUT_RESET",
            AuditAction::CircuitAdded => "CIRCUIT_ADDED",
            AuditAction::CircuitOn => "CIRCUIT_ON",
            AuditAction::CircuitOff => "CIRCUIT_OFF",
            AuditAction::CircuitTrip => "CIRCUIT_TRIP",
            AuditAction::CircuitReset => "CIRCUIT_RESET",
            AuditAction::CircuitAutoReset => "CIRCUIT_AUTO_RESET",
            AuditAction::AlertAcknowledged => "ALERT_ACKNOWLEDGED",
        };
        write!(f, "{}", s)
    }
}

/// One immutable audit record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLogEntry {
    /// Monotonic sequence number.
    pub id: u64,

    /// When the operation ran.
    pub timestamp: DateTime<Utc>,

    /// Who requested it ("system" for automatic transitions).
    pub actor: String,

    /// What was done.
    pub action: AuditAction,

    /// The node or alert the operation applied to.
    pub target: String,

    /// Value before the operation, when meaningful.
    pub previous_value: Option<String>,

    /// Value after the operation, when meaningful.
    pub new_value: Option<String>,
}

/// Bounded append-only log of control-plane mutations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditTrail {
    entries: VecDeque<AuditLogEntry>,
    capacity: usize,
    next_id: u64,
}

impl AuditTrail {
    /// Create a trail retaining at most `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
            next_id: 1,
        }
    }

    /// Append one entry, evicting the oldest past capacity.
    pub fn record(
        &mut self,
        actor: &str,
        action: AuditAction,
        target: &str,
        previous_value: Option<String>,
        new_value: Option<String>,
    ) -> u64 {
        let id = self.next_id;
        self.next_id += 1;

        self.entries.push_back(AuditLogEntry {
            id,
            timestamp: Utc::now(),
            actor: actor.to_string(),
            action,
            target: target.to_string(),
            previous_value,
            new_value,
        });

        if self.entries.len() > self.capacity {
            self.entries.pop_front();
        }

        id
    }

    /// Entries currently retained, oldest first.
    pub fn entries(&self) -> impl Iterator<Item = &AuditLogEntry> {
        self.entries.iter()
    }

    /// The most recent `n` entries, oldest of them first.
    pub fn recent(&self, n: usize) -> Vec<AuditLogEntry> {
        let skip = self.entries.len().saturating_sub(n);
        self.entries.iter().skip(skip).cloned().collect()
    }

    /// Number of retained entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the trail is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for AuditTrail {
    fn default() -> Self {
        Self::new(defaults::AUDIT_CAPACITY)
    }
}

/// Severity of a system alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertLevel {
    /// Routine event worth surfacing (e.g., a successful auto-reset).
    Info,

    /// Budget breach, rejected transition fallout.
    Warning,

    /// A breaker tripped or was locked out.
    Alert,

    /// Emergency shutdown.
    Critical,
}

impl std::fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertLevel::Info => write!(f, "info"),
            AlertLevel::Warning => write!(f, "warning"),
            AlertLevel::Alert => write!(f, "alert"),
            AlertLevel::Critical => write!(f, "critical"),
        }
    }
}

/// An operator-facing alert with acknowledgement tracking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemAlert {
    /// Monotonic sequence number.
    pub id: u64,

    /// Severity.
    pub level: AlertLevel,

    /// When the alert was raised.
    pub timestamp: DateTime<Utc>,

    /// Node id or subsystem that raised it.
    pub source: String,

    /// Human-readable description.
    pub message: String,

    /// Whether an operator has acknowledged it.
    pub acknowledged: bool,

    /// Who acknowledged it.
    pub acknowledged_by: Option<String>,

    /// When it was acknowledged.
    pub acknowledged_at: Option<DateTime<Utc>>,
}

/// Bounded alert buffer with live unacknowledged counts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertSink {
    alerts: VecDeque<SystemAlert>,
    capacity: usize,
    next_id: u64,
    unacked_severe: usize,
    unacked_warnings: usize,
}

impl AlertSink {
    /// Create a sink retaining at most `capacity` alerts.
    pub fn new(capacity: usize) -> Self {
        Self {
            alerts: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
            next_id: 1,
            unacked_severe: 0,
            unacked_warnings: 0,
        }
    }

    /// Raise a new alert, evicting the oldest past capacity.
    pub fn raise(&mut self, level: AlertLevel, source: &str, message: impl Into<String>) -> u64 {
        let id = self.next_id;
        self.next_id += 1;

        self.alerts.push_back(SystemAlert {
            id,
            level,
            timestamp: Utc::now(),
            source: source.to_string(),
            message: message.into(),
            acknowledged: false,
            acknowledged_by: None,
            acknowledged_at: None,
        });

        match level {
            AlertLevel::Critical | AlertLevel::Alert => self.unacked_severe += 1,
            AlertLevel::Warning => self.unacked_warnings += 1,
            AlertLevel::Info => {}
        }

        if self.alerts.len() > self.capacity {
            if let Some(evicted) = self.alerts.pop_front() {
                if !evicted.acknowledged {
                    match evicted.level {
                        AlertLevel::Critical | AlertLevel::Alert => {
                            self.unacked_severe = self.unacked_severe.saturating_sub(1)
                        }
                        AlertLevel::Warning => {
                            self.unacked_warnings = self.unacked_warnings.saturating_sub(1)
                        }
                        AlertLevel::Info => {}
                    }
                }
            }
        }

        id
    }

    /// Acknowledge an alert by id.
    ///
    /// Idempotent: unknown or already-acknowledged ids are a no-op
    /// returning false. A successful acknowledgement recounts the live
    /// unacknowledged tallies over the retained ring.
    pub fn acknowledge(&mut self, id: u64, actor: &str) -> bool {
        let Some(alert) = self.alerts.iter_mut().find(|a| a.id == id) else {
            return false;
        };
        if alert.acknowledged {
            return false;
        }

        alert.acknowledged = true;
        alert.acknowledged_by = Some(actor.to_string());
        alert.acknowledged_at = Some(Utc::now());

        self.recount();
        true
    }

    /// Unacknowledged alerts at Alert or Critical level.
    pub fn unacknowledged_severe(&self) -> usize {
        self.unacked_severe
    }

    /// Unacknowledged alerts at Warning level.
    pub fn unacknowledged_warnings(&self) -> usize {
        self.unacked_warnings
    }

    /// Alerts currently retained, oldest first.
    pub fn alerts(&self) -> impl Iterator<Item = &SystemAlert> {
        self.alerts.iter()
    }

    /// The most recent `n` alerts, oldest of them first.
    pub fn recent(&self, n: usize) -> Vec<SystemAlert> {
        let skip = self.alerts.len().saturating_sub(n);
        self.alerts.iter().skip(skip).cloned().collect()
    }

    /// Number of retained alerts.
    pub fn len(&self) -> usize {
        self.alerts.len()
    }

    /// Whether the sink is empty.
    pub fn is_empty(&self) -> bool {
        self.alerts.is_empty()
    }

    fn recount(&mut self) {
        self.unacked_severe = 0;
        self.unacked_warnings = 0;
        for alert in &self.alerts {
            if alert.acknowledged {
                continue;
            }
            match alert.level {
                AlertLevel::Critical | AlertLevel::Alert => self.unacked_severe += 1,
                AlertLevel::Warning => self.unacked_warnings += 1,
                AlertLevel::Info => {}
            }
        }
    }
}

impl Default for AlertSink {
    fn default() -> Self {
        Self::new(defaults::ALERT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audit_trail_evicts_oldest() {
        let mut trail = AuditTrail::new(3);
        for i in 0..5 {
            trail.record(
                "admin",
                AuditAction::CircuitOn,
                &format!("c{}", i),
                None,
                None,
            );
        }
        assert_eq!(trail.len(), 3);
        let ids: Vec<u64> = trail.entries().map(|e| e.id).collect();
        assert_eq!(ids, vec![3, 4, 5]);
    }

    #[test]
    fn test_audit_ids_are_monotonic() {
        let mut trail = AuditTrail::new(10);
        let a = trail.record("admin", AuditAction::MasterOn, "master", None, None);
        let b = trail.record("admin", AuditAction::MasterOff, "master", None, None);
        assert!(b > a);
    }

    #[test]
    fn test_alert_counters_track_inserts() {
        let mut sink = AlertSink::new(10);
        sink.raise(AlertLevel::Info, "c1", "auto-reset complete");
        sink.raise(AlertLevel::Warning, "c1", "latency over ceiling");
        sink.raise(AlertLevel::Alert, "c1", "tripped");
        sink.raise(AlertLevel::Critical, "master", "emergency shutdown");

        assert_eq!(sink.unacknowledged_severe(), 2);
        assert_eq!(sink.unacknowledged_warnings(), 1);
    }

    #[test]
    fn test_acknowledge_is_idempotent() {
        let mut sink = AlertSink::new(10);
        let id = sink.raise(AlertLevel::Alert, "c1", "tripped");

        assert!(sink.acknowledge(id, "admin"));
        assert_eq!(sink.unacknowledged_severe(), 0);

        // Second acknowledgement and unknown ids are no-ops.
        assert!(!sink.acknowledge(id, "admin"));
        assert!(!sink.acknowledge(9999, "admin"));
        assert_eq!(sink.unacknowledged_severe(), 0);
    }

    #[test]
    fn test_eviction_of_unacked_alert_adjusts_counters() {
        let mut sink = AlertSink::new(2);
        sink.raise(AlertLevel::Alert, "c1", "first");
        sink.raise(AlertLevel::Alert, "c2", "second");
        sink.raise(AlertLevel::Alert, "c3", "third"); // evicts "first"

        assert_eq!(sink.len(), 2);
        assert_eq!(sink.unacknowledged_severe(), 2);
    }

    #[test]
    fn test_recent_returns_tail() {
        let mut sink = AlertSink::new(10);
        for i in 0..5 {
            sink.raise(AlertLevel::Info, "c1", format!("event {}", i));
        }
        let recent = sink.recent(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].message, "event 3");
        assert_eq!(recent[1].message, "event 4");
    }
}
