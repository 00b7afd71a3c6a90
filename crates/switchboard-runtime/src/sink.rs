//! Optional outbound contracts: durable history export and alert delivery.
//!
//! Both are consumed interfaces. Without an exporter, audit and alert
//! history live only in the bounded in-memory rings; without a notifier,
//! alerts surface through logs alone. Neither is ever on a cascade's
//! critical path.

use async_trait::async_trait;
use thiserror::Error;
use tracing::{error, info, warn};

use switchboard_core::{AlertLevel, AuditLogEntry, SystemAlert};

/// Errors from history export.
#[derive(Error, Debug)]
pub enum ExportError {
    #[error("export failed: {0}")]
    Failed(String),
}

/// Errors from alert delivery.
#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("delivery failed: {0}")]
    Failed(String),
}

/// Batched flush of audit entries and alerts to durable storage.
#[async_trait]
pub trait AuditExporter: Send + Sync {
    /// Persist a batch of history.
    async fn flush(
        &self,
        entries: &[AuditLogEntry],
        alerts: &[SystemAlert],
    ) -> Result<(), ExportError>;

    /// Exporter name for logs.
    fn name(&self) -> &str {
        "exporter"
    }
}

/// Forwarding of a single alert to a human-facing channel.
#[async_trait]
pub trait AlertNotifier: Send + Sync {
    /// Deliver one alert.
    async fn publish(&self, alert: &SystemAlert) -> Result<(), NotifyError>;

    /// Notifier name for logs.
    fn name(&self) -> &str {
        "notifier"
    }
}

/// Notifier that writes alerts to the log at a level matching severity.
#[derive(Debug, Default, Clone)]
pub struct TracingNotifier;

#[async_trait]
impl AlertNotifier for TracingNotifier {
    async fn publish(&self, alert: &SystemAlert) -> Result<(), NotifyError> {
        match alert.level {
            AlertLevel::Critical | AlertLevel::Alert => {
                error!(alert_id = alert.id, source = %alert.source, level = %alert.level, "{}", alert.message)
            }
            AlertLevel::Warning => {
                warn!(alert_id = alert.id, source = %alert.source, "{}", alert.message)
            }
            AlertLevel::Info => {
                info!(alert_id = alert.id, source = %alert.source, "{}", alert.message)
            }
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "tracing"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn test_tracing_notifier_accepts_all_levels() {
        let notifier = TracingNotifier;
        for level in [
            AlertLevel::Info,
            AlertLevel::Warning,
            AlertLevel::Alert,
            AlertLevel::Critical,
        ] {
            let alert = SystemAlert {
                id: 1,
                level,
                timestamp: Utc::now(),
                source: "c1".to_string(),
                message: "test".to_string(),
                acknowledged: false,
                acknowledged_by: None,
                acknowledged_at: None,
            };
            assert!(notifier.publish(&alert).await.is_ok());
        }
    }
}
