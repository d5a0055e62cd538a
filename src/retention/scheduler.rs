//! Periodic retention sweep

use super::RetentionManager;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Background task running [`RetentionManager::sweep_all`] on an interval
pub struct RetentionScheduler {
    handle: JoinHandle<()>,
}

impl RetentionScheduler {
    /// Start sweeping; the first sweep runs immediately
    pub fn spawn(manager: Arc<RetentionManager>, interval: Duration) -> Self {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                match manager.sweep_all().await {
                    Ok(report) => {
                        for (tenant, error) in &report.failed {
                            tracing::warn!(tenant_id = %tenant, error = %error, "Tenant retention failed");
                        }
                        tracing::info!(
                            succeeded = report.succeeded.len(),
                            failed = report.failed.len(),
                            "Retention sweep finished"
                        );
                    }
                    Err(e) => tracing::error!(error = %e, "Retention sweep could not list tenants"),
                }
            }
        });

        tracing::info!(interval_secs = interval.as_secs(), "Retention scheduler started");
        Self { handle }
    }

    /// Stop the background loop
    pub fn shutdown(self) {
        self.handle.abort();
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}
