//! # switchboard-runtime
//!
//! Tokio runtime for the Switchboard control plane.
//!
//! `switchboard-core` owns the breaker tree and every synchronous
//! transition; this crate adds the parts that need a clock and the outside
//! world:
//! - the [`BreakerRegistry`] facade, sole owner of one live tree
//! - cooldown timers implementing automatic reset after a trip
//! - the health-probe contract, with timeout, retry and result caching
//! - optional history export and alert notification contracts
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use switchboard_core::BoardLayout;
//! use switchboard_runtime::{BreakerRegistry, StaticProbe};
//!
//! let layout = BoardLayout::from_yaml_file("board.yaml")?;
//! let registry = BreakerRegistry::builder()
//!     .probe(Arc::new(StaticProbe::healthy(1.0)))
//!     .build();
//! registry.apply_layout(&layout, "bootstrap").await?;
//! registry.master_on("bootstrap").await;
//! ```

pub mod config;
pub mod probe;
pub mod registry;
pub mod sink;
pub mod timers;

pub use config::{ConfigError, RuntimeConfig};
pub use probe::{HealthProbe, ProbeError, ProbeReading, ProbeRunner, ProbeTarget, StaticProbe};
pub use registry::{BreakerRegistry, BreakerRegistryBuilder};
pub use sink::{AlertNotifier, AuditExporter, ExportError, NotifyError, TracingNotifier};
pub use timers::TimerRegistry;
