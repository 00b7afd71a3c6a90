//! Health probe contract and the wrapper the registry runs probes through.
//!
//! A probe answers one question about one circuit's backing subsystem: is
//! it reachable, and how fast. How that is measured is the integrator's
//! business; the registry only consumes the contract. Probe failures are
//! never surfaced to the caller of a cascade: the registry converts them
//! into error reports against the circuit, which count toward the trip
//! threshold like any other error.
//!
//! [`ProbeRunner`] adds the operational envelope around a raw probe: a
//! bounded timeout per attempt, retry with exponential backoff, and a
//! short-TTL cache so energize storms do not hammer a subsystem that was
//! probed moments ago.

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use switchboard_core::Circuit;

use crate::config::RuntimeConfig;

/// Errors from health probes.
#[derive(Error, Debug, Clone)]
pub enum ProbeError {
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),

    #[error("probe failed: {0}")]
    Failed(String),
}

/// What a probe observed about a circuit's backing subsystem.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ProbeReading {
    /// Whether the subsystem answered at all.
    pub reachable: bool,

    /// Round-trip latency of the probe, in milliseconds.
    pub latency_ms: f64,
}

/// The circuit identity handed to probes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeTarget {
    /// Circuit id.
    pub circuit_id: String,

    /// Human-readable circuit name.
    pub name: String,

    /// Circuit category.
    pub category: String,
}

impl ProbeTarget {
    /// Build a target from a live circuit.
    pub fn from_circuit(circuit: &Circuit) -> Self {
        Self {
            circuit_id: circuit.id.clone(),
            name: circuit.name.clone(),
            category: circuit.category.clone(),
        }
    }
}

/// Health check contract for one circuit's backing subsystem.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// Check the subsystem behind `target` once.
    async fn probe(&self, target: &ProbeTarget) -> Result<ProbeReading, ProbeError>;

    /// Probe name for logs.
    fn name(&self) -> &str {
        "probe"
    }
}

/// A probe returning a fixed reading; the default for tests and dry runs.
#[derive(Debug, Clone)]
pub struct StaticProbe {
    /// The reading every probe call returns.
    pub reading: ProbeReading,
}

impl StaticProbe {
    /// A probe that always reports reachable at the given latency.
    pub fn healthy(latency_ms: f64) -> Self {
        Self {
            reading: ProbeReading {
                reachable: true,
                latency_ms,
            },
        }
    }

    /// A probe that always reports unreachable.
    pub fn unreachable() -> Self {
        Self {
            reading: ProbeReading {
                reachable: false,
                latency_ms: 0.0,
            },
        }
    }
}

#[async_trait]
impl HealthProbe for StaticProbe {
    async fn probe(&self, _target: &ProbeTarget) -> Result<ProbeReading, ProbeError> {
        Ok(self.reading)
    }

    fn name(&self) -> &str {
        "static"
    }
}

/// Timeout, retry and caching around a raw probe.
pub struct ProbeRunner {
    probe: Arc<dyn HealthProbe>,
    timeout: Duration,
    retries: usize,
    cache: Cache<String, ProbeReading>,
}

impl ProbeRunner {
    /// Wrap a probe with the envelope described by `config`.
    pub fn new(probe: Arc<dyn HealthProbe>, config: &RuntimeConfig) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.probe_cache_capacity)
            .time_to_live(config.probe_cache_ttl)
            .build();

        Self {
            probe,
            timeout: config.probe_timeout,
            retries: config.probe_retries,
            cache,
        }
    }

    /// Probe a circuit, serving a recent cached reading when available.
    pub async fn check(&self, target: &ProbeTarget) -> Result<ProbeReading, ProbeError> {
        if let Some(reading) = self.cache.get(&target.circuit_id).await {
            debug!(circuit = %target.circuit_id, "probe reading served from cache");
            return Ok(reading);
        }

        self.check_fresh(target).await
    }

    /// Probe a circuit, bypassing and refreshing the cache.
    pub async fn check_fresh(&self, target: &ProbeTarget) -> Result<ProbeReading, ProbeError> {
        let attempt = || async {
            match tokio::time::timeout(self.timeout, self.probe.probe(target)).await {
                Ok(result) => result,
                Err(_) => Err(ProbeError::Timeout(self.timeout)),
            }
        };

        let backoff = ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(50))
            .with_max_times(self.retries);

        let reading = attempt
            .retry(backoff)
            .notify(|err, delay| {
                debug!(
                    probe = self.probe.name(),
                    circuit = %target.circuit_id,
                    error = %err,
                    ?delay,
                    "probe attempt failed, retrying"
                );
            })
            .await?;

        self.cache
            .insert(target.circuit_id.clone(), reading)
            .await;
        Ok(reading)
    }

    /// Drop any cached reading for a circuit.
    ///
    /// Called when a circuit trips so the post-cooldown energize sees a
    /// fresh reading, never the one recorded before the failure.
    pub async fn invalidate(&self, circuit_id: &str) {
        self.cache.invalidate(circuit_id).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingProbe {
        calls: AtomicU32,
        fail_first: u32,
    }

    #[async_trait]
    impl HealthProbe for CountingProbe {
        async fn probe(&self, _target: &ProbeTarget) -> Result<ProbeReading, ProbeError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_first {
                Err(ProbeError::Failed("transient".to_string()))
            } else {
                Ok(ProbeReading {
                    reachable: true,
                    latency_ms: 5.0,
                })
            }
        }
    }

    fn target() -> ProbeTarget {
        ProbeTarget {
            circuit_id: "c1".to_string(),
            name: "Checkout".to_string(),
            category: "payments".to_string(),
        }
    }

    #[tokio::test]
    async fn test_cached_reading_is_reused() {
        let probe = Arc::new(CountingProbe {
            calls: AtomicU32::new(0),
            fail_first: 0,
        });
        let runner = ProbeRunner::new(probe.clone(), &RuntimeConfig::default());

        runner.check(&target()).await.unwrap();
        runner.check(&target()).await.unwrap();
        assert_eq!(probe.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invalidate_forces_fresh_probe() {
        let probe = Arc::new(CountingProbe {
            calls: AtomicU32::new(0),
            fail_first: 0,
        });
        let runner = ProbeRunner::new(probe.clone(), &RuntimeConfig::default());

        runner.check(&target()).await.unwrap();
        runner.invalidate("c1").await;
        runner.check(&target()).await.unwrap();
        assert_eq!(probe.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let probe = Arc::new(CountingProbe {
            calls: AtomicU32::new(0),
            fail_first: 2,
        });
        let runner = ProbeRunner::new(probe.clone(), &RuntimeConfig::default());

        let reading = runner.check(&target()).await.unwrap();
        assert!(reading.reachable);
        assert_eq!(probe.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausted_retries_surface_the_error() {
        let probe = Arc::new(CountingProbe {
            calls: AtomicU32::new(0),
            fail_first: 10,
        });
        let runner = ProbeRunner::new(probe, &RuntimeConfig::default());

        assert!(matches!(
            runner.check(&target()).await,
            Err(ProbeError::Failed(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_probe_times_out() {
        struct SlowProbe;

        #[async_trait]
        impl HealthProbe for SlowProbe {
            async fn probe(&self, _target: &ProbeTarget) -> Result<ProbeReading, ProbeError> {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(ProbeReading {
                    reachable: true,
                    latency_ms: 1.0,
                })
            }
        }

        let config = RuntimeConfig {
            probe_retries: 0,
            ..Default::default()
        };
        let runner = ProbeRunner::new(Arc::new(SlowProbe), &config);

        assert!(matches!(
            runner.check(&target()).await,
            Err(ProbeError::Timeout(_))
        ));
    }
}
