//! Error accounting, latency tracking, and health classification.
//!
//! Latency percentiles are estimated in O(1) per sample with a
//! decaying-max/EMA hybrid rather than a true percentile: p50 is an
//! exponential moving average, while p95/p99 jump to any outlier immediately
//! and decay slowly afterwards. The bias is deliberate (fast tail-latency
//! detection over statistical precision) and the formulas are kept exactly
//! as the control plane has always computed them, so observed numbers stay
//! comparable across versions.

use serde::{Deserialize, Serialize};

use crate::types::{BreakerState, Circuit, HealthStatus};

/// Error rate above which a circuit is classified critical.
const CRITICAL_ERROR_RATE: f64 = 0.10;

/// Error rate above which a circuit is classified degraded.
const DEGRADED_ERROR_RATE: f64 = 0.05;

/// Rolling latency estimators for one circuit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LatencyTracker {
    /// Most recent sample, in milliseconds.
    pub current_ms: f64,

    /// Exponential moving average (weight 0.1 per sample).
    pub p50_ms: f64,

    /// Decaying max, 5% decay per sample.
    pub p95_ms: f64,

    /// Decaying max, 1% decay per sample.
    pub p99_ms: f64,

    /// Latency ceiling this circuit is held to.
    pub max_allowed_ms: f64,
}

impl LatencyTracker {
    /// Create a tracker with all estimators at zero.
    pub fn new(max_allowed_ms: f64) -> Self {
        Self {
            current_ms: 0.0,
            p50_ms: 0.0,
            p95_ms: 0.0,
            p99_ms: 0.0,
            max_allowed_ms,
        }
    }

    /// Fold one latency sample into the estimators.
    pub fn observe(&mut self, latency_ms: f64) {
        self.current_ms = latency_ms;
        self.p50_ms = self.p50_ms * 0.9 + latency_ms * 0.1;
        self.p95_ms = (self.p95_ms * 0.95).max(latency_ms);
        self.p99_ms = (self.p99_ms * 0.99).max(latency_ms);
    }

    /// Whether the p95 estimate is over the allowed ceiling.
    pub fn over_ceiling(&self) -> bool {
        self.p95_ms > self.max_allowed_ms
    }

    /// Whether the p95 estimate is over twice the allowed ceiling.
    pub fn far_over_ceiling(&self) -> bool {
        self.p95_ms > self.max_allowed_ms * 2.0
    }
}

/// What a recorded error requires of the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorOutcome {
    /// The error count reached the trip threshold on a non-tripped circuit.
    pub should_trip: bool,

    /// The reported latency exceeded the circuit's ceiling.
    pub latency_breach: bool,
}

/// Record a successful call against a circuit.
///
/// Updates the request tally, the rolling latency estimators, and the
/// derived error rate, then reclassifies health.
pub fn record_request(circuit: &mut Circuit, latency_ms: f64) {
    circuit.request_count += 1;
    circuit.latency.observe(latency_ms);
    circuit.error_rate = error_rate(circuit.error_count, circuit.request_count);
    circuit.last_activity = Some(chrono::Utc::now());
    refresh_health(circuit);
}

/// Record an errored call against a circuit.
///
/// An errored call still counts as a request, so the error rate stays a
/// fraction of observed traffic even for circuits that only ever fail.
/// The rate is derived from the resettable error count, so a reset circuit
/// starts clean instead of dragging its failure history around.
/// Returns what the caller must do next: raise a latency warning and/or
/// trip the circuit. The trip itself is the caller's transition so that
/// scheduling stays outside the accounting path.
pub fn report_error(circuit: &mut Circuit, latency_ms: Option<f64>) -> ErrorOutcome {
    circuit.error_count += 1;
    circuit.request_count += 1;
    circuit.error_rate = error_rate(circuit.error_count, circuit.request_count);
    circuit.last_activity = Some(chrono::Utc::now());

    let latency_breach = match latency_ms {
        Some(ms) => {
            circuit.latency.observe(ms);
            ms > circuit.latency.max_allowed_ms
        }
        None => false,
    };

    let should_trip =
        circuit.state != BreakerState::Tripped && circuit.error_count >= circuit.trip_threshold;

    refresh_health(circuit);

    ErrorOutcome {
        should_trip,
        latency_breach,
    }
}

/// Classify a circuit's health from its state and live metrics.
pub fn classify(circuit: &Circuit) -> HealthStatus {
    match circuit.state {
        BreakerState::Tripped => HealthStatus::Critical,
        BreakerState::Off => HealthStatus::Offline,
        BreakerState::On => {
            if circuit.error_rate > CRITICAL_ERROR_RATE || circuit.latency.far_over_ceiling() {
                HealthStatus::Critical
            } else if circuit.error_rate > DEGRADED_ERROR_RATE || circuit.latency.over_ceiling() {
                HealthStatus::Degraded
            } else {
                HealthStatus::Healthy
            }
        }
    }
}

/// Recompute and store a circuit's health classification.
pub fn refresh_health(circuit: &mut Circuit) {
    circuit.health = classify(circuit);
}

fn error_rate(errors: u32, requests: u64) -> f64 {
    if requests == 0 {
        0.0
    } else {
        f64::from(errors) / requests as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Circuit;

    fn on_circuit() -> Circuit {
        let mut circuit = Circuit::new("c1", "Checkout", "payments");
        circuit.state = BreakerState::On;
        refresh_health(&mut circuit);
        circuit
    }

    #[test]
    fn test_p95_rises_immediately_on_outlier() {
        let mut tracker = LatencyTracker::new(50.0);
        for _ in 0..100 {
            tracker.observe(10.0);
        }
        assert!(tracker.p95_ms < 50.0);

        tracker.observe(400.0);
        assert_eq!(tracker.p95_ms, 400.0);
        assert_eq!(tracker.p99_ms, 400.0);

        // Decays by 5% per subsequent sample rather than dropping back.
        tracker.observe(10.0);
        assert!((tracker.p95_ms - 380.0).abs() < 1e-9);
    }

    #[test]
    fn test_healthy_circuit_classification() {
        let mut circuit = on_circuit();
        for _ in 0..20 {
            record_request(&mut circuit, 10.0);
        }
        assert_eq!(circuit.health, HealthStatus::Healthy);
        assert_eq!(circuit.request_count, 20);
        assert_eq!(circuit.error_rate, 0.0);
    }

    #[test]
    fn test_latency_over_ceiling_degrades() {
        let mut circuit = on_circuit();
        record_request(&mut circuit, 60.0);
        assert_eq!(circuit.health, HealthStatus::Degraded);

        record_request(&mut circuit, 150.0);
        assert_eq!(circuit.health, HealthStatus::Critical);
    }

    #[test]
    fn test_error_rate_bands() {
        let mut circuit = on_circuit();
        for _ in 0..100 {
            record_request(&mut circuit, 1.0);
        }
        // 7 errors over 107 calls: past 5%, under 10%.
        for _ in 0..7 {
            report_error(&mut circuit, None);
        }
        assert_eq!(circuit.health, HealthStatus::Degraded);

        for _ in 0..10 {
            report_error(&mut circuit, None);
        }
        assert_eq!(circuit.health, HealthStatus::Critical);
    }

    #[test]
    fn test_trip_signalled_at_threshold() {
        let mut circuit = on_circuit();
        for _ in 0..4 {
            let outcome = report_error(&mut circuit, None);
            assert!(!outcome.should_trip);
        }
        let outcome = report_error(&mut circuit, None);
        assert!(outcome.should_trip);
        assert_eq!(circuit.error_count, 5);
    }

    #[test]
    fn test_no_trip_signal_while_already_tripped() {
        let mut circuit = on_circuit();
        circuit.state = BreakerState::Tripped;
        circuit.error_count = 10;
        let outcome = report_error(&mut circuit, None);
        assert!(!outcome.should_trip);
    }

    #[test]
    fn test_latency_breach_flagged() {
        let mut circuit = on_circuit();
        let outcome = report_error(&mut circuit, Some(120.0));
        assert!(outcome.latency_breach);
        let outcome = report_error(&mut circuit, Some(5.0));
        assert!(!outcome.latency_breach);
    }

    #[test]
    fn test_errors_only_rate_stays_bounded() {
        let mut circuit = on_circuit();
        report_error(&mut circuit, None);
        report_error(&mut circuit, None);
        assert_eq!(circuit.error_rate, 1.0);
        assert_eq!(circuit.request_count, 2);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            // The slower-decaying estimator can never fall below the
            // faster one: both start at zero and take the max with the
            // same sample.
            #[test]
            fn p99_dominates_p95(samples in prop::collection::vec(0.0f64..10_000.0, 1..200)) {
                let mut tracker = LatencyTracker::new(50.0);
                for s in samples {
                    tracker.observe(s);
                    prop_assert!(tracker.p99_ms >= tracker.p95_ms);
                    prop_assert!(tracker.p95_ms >= 0.0);
                }
            }

            #[test]
            fn error_rate_stays_in_unit_interval(
                ops in prop::collection::vec(any::<bool>(), 1..200)
            ) {
                let mut circuit = on_circuit();
                for is_error in ops {
                    if is_error {
                        report_error(&mut circuit, None);
                    } else {
                        record_request(&mut circuit, 1.0);
                    }
                    prop_assert!(circuit.error_rate >= 0.0 && circuit.error_rate <= 1.0);
                }
            }
        }
    }
}
