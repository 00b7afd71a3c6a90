//! # switchboard-core
//!
//! Deterministic breaker-tree engine for the Switchboard control plane.
//!
//! This crate owns the hierarchy (one master switch gating panels, panels
//! gating circuits) and answers:
//! - May this subsystem carry traffic right now?
//! - Is it failing, and should it be isolated?
//! - Who switched what, and when?
//!
//! ## Key Guarantees
//!
//! 1. **Deterministic**: every transition is synchronous; probes and timers
//!    are returned as [`board::CascadeEffects`] for a runtime to carry out
//! 2. **Invariant-enforcing**: a circuit is on only while its whole chain
//!    is on, checked at every mutation
//! 3. **Audited**: every mutating operation appends exactly one audit entry
//! 4. **Bounded**: audit and alert history live in fixed-size rings
//!
//! ## Example
//!
//! ```rust,ignore
//! use switchboard_core::{Board, BoardLayout};
//!
//! let layout = BoardLayout::from_yaml_file("board.yaml")?;
//! let mut board = Board::new();
//! for panel in &layout.panels {
//!     board.add_panel(panel, "bootstrap")?;
//!     for circuit in &panel.circuits {
//!         board.add_circuit(&panel.id, circuit, "bootstrap")?;
//!     }
//! }
//! board.master_on("bootstrap");
//! ```

pub mod audit;
pub mod board;
pub mod layout;
pub mod metrics;
pub mod types;

// Re-export main types at crate root
pub use audit::{AlertLevel, AlertSink, AuditAction, AuditLogEntry, AuditTrail, SystemAlert};
pub use board::{
    AutoResetOutcome, Board, BoardError, BoardSnapshot, CascadeEffects, PanelSnapshot,
};
pub use layout::{BoardLayout, CircuitSpec, LayoutError, PanelSpec};
pub use metrics::LatencyTracker;
pub use types::{BreakerState, Circuit, HealthStatus, MasterSwitch, Panel, SystemStatus};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_board_from_layout_energizes() {
        let yaml = r#"
layout_version: "1.0"
name: "Smoke"
panels:
  - id: "p1"
    name: "One"
    position: 0
    circuits:
      - id: "c1"
        name: "First"
"#;
        let layout = BoardLayout::from_yaml(yaml).unwrap();
        let mut board = Board::new();
        for panel in &layout.panels {
            board.add_panel(panel, "bootstrap").unwrap();
            for circuit in &panel.circuits {
                board.add_circuit(&panel.id, circuit, "bootstrap").unwrap();
            }
        }

        let effects = board.master_on("bootstrap").unwrap();
        assert_eq!(effects.energize, vec!["c1"]);
        assert_eq!(board.circuit("c1").unwrap().state, BreakerState::On);
        assert_eq!(board.master().system_status, SystemStatus::Optimal);
    }
}
