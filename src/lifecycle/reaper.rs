//! Periodic removal of expired instances.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::service::LabService;
use super::store::LabStore;
use crate::engine::{EngineClient, EngineGuard};
use crate::error::VulnlabError;

/// Default time between sweeps.
pub const DEFAULT_REAP_INTERVAL: Duration = Duration::from_secs(60);

/// Outcome of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Instances inspected.
    pub examined: usize,
    /// Instances past their expiry.
    pub expired: usize,
    /// Expired instances removed.
    pub removed: usize,
    /// Expired instances whose removal failed.
    pub failed: usize,
    /// Expired instances that were extended or removed before the sweep
    /// reached them.
    pub skipped: usize,
}

/// Deletes instances whose expiry has passed.
#[derive(Debug)]
pub struct Reaper<C, S, E = mockable::DefaultEnv> {
    service: Arc<LabService<C, S, E>>,
    interval: Duration,
    guard: Option<Arc<EngineGuard>>,
}

impl<C, S, E> Reaper<C, S, E>
where
    C: EngineClient + 'static,
    S: LabStore + 'static,
    E: mockable::Env + Send + Sync + 'static,
{
    /// Create a reaper sweeping every `interval`.
    #[must_use]
    pub const fn new(service: Arc<LabService<C, S, E>>, interval: Duration) -> Self {
        Self {
            service,
            interval,
            guard: None,
        }
    }

    /// Skip sweeps while `guard` cannot reach the engine.
    #[must_use]
    pub fn with_engine_guard(mut self, guard: Arc<EngineGuard>) -> Self {
        self.guard = Some(guard);
        self
    }

    /// Delete every instance that expired strictly before `now`.
    ///
    /// Each candidate is re-read before removal; one whose expiry was
    /// extended since the listing, or that is already gone, is counted in
    /// [`SweepReport::skipped`]. One failing instance does not stop the
    /// sweep; it is logged and counted in [`SweepReport::failed`].
    ///
    /// # Errors
    ///
    /// Returns the store error when the instance list cannot be read.
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> Result<SweepReport, VulnlabError> {
        let instances = self.service.list_instances().await?;
        let mut report = SweepReport {
            examined: instances.len(),
            ..SweepReport::default()
        };

        for instance in instances.iter().filter(|instance| instance.is_expired_at(now)) {
            report.expired = report.expired.saturating_add(1);
            match self.service.delete_expired_instance(instance.id, now).await {
                Ok(true) => {
                    report.removed = report.removed.saturating_add(1);
                    info!(
                        instance_id = instance.id,
                        user_id = instance.user_id,
                        target = %instance.target,
                        "expired instance removed"
                    );
                }
                Ok(false) => report.skipped = report.skipped.saturating_add(1),
                Err(error) => {
                    report.failed = report.failed.saturating_add(1);
                    warn!(
                        instance_id = instance.id,
                        user_id = instance.user_id,
                        target = %instance.target,
                        error = %error,
                        "failed to remove expired instance"
                    );
                }
            }
        }
        Ok(report)
    }

    /// Sweep at `now` unless the engine guard reports the engine
    /// unreachable, in which case `None` is returned.
    ///
    /// # Errors
    ///
    /// As for [`sweep_at`](Self::sweep_at).
    pub async fn tick_at(&self, now: DateTime<Utc>) -> Result<Option<SweepReport>, VulnlabError> {
        if let Some(guard) = &self.guard
            && !guard.is_available().await
        {
            warn!("container engine unreachable, skipping sweep");
            return Ok(None);
        }
        self.sweep_at(now).await.map(Some)
    }

    /// Run sweeps until `shutdown` is cancelled.
    ///
    /// The first sweep runs one full interval after spawning.
    #[must_use]
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + self.interval;
            let mut ticker = tokio::time::interval_at(start, self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(interval_secs = self.interval.as_secs(), "reaper started");
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                match self.tick_at(Utc::now()).await {
                    Ok(Some(report)) => debug!(?report, "reaper sweep finished"),
                    Ok(None) => {}
                    Err(error) => warn!(error = %error, "reaper sweep failed"),
                }
            }
            info!("reaper stopped");
        })
    }
}
