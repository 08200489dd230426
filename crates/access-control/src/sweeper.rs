//! Periodic purge of expired tokens.
//!
//! Admission never depends on the sweeper: live counting already ignores
//! expired tokens, so a missed sweep only delays reclamation.

use std::sync::{Arc, Weak};
use std::time::Duration;

use ac_access_store::AccessStore;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::token::Clock;

/// Shortest accepted sweep cadence.
pub const MIN_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Handle to a running sweeper task.
pub struct TokenSweeper {
    cancel: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl TokenSweeper {
    /// Spawns the sweep loop on the current tokio runtime.
    ///
    /// The task holds the store weakly and exits once every strong handle is
    /// gone, or on [`TokenSweeper::stop`].
    pub fn start(store: &Arc<dyn AccessStore>, clock: Arc<dyn Clock>, period: Duration) -> Self {
        let period = period.max(MIN_SWEEP_INTERVAL);
        let weak: Weak<dyn AccessStore> = Arc::downgrade(store);
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = task_cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let Some(store) = weak.upgrade() else {
                    break;
                };
                sweep_once(store.as_ref(), clock.as_ref()).await;
            }
            debug!("token sweeper exited");
        });
        info!(interval = ?period, "token sweeper started");

        Self {
            cancel,
            handle: Mutex::new(Some(handle)),
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Signals the loop to exit and waits for it.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                warn!("token sweeper task ended abnormally: {err}");
            }
            info!("token sweeper stopped");
        }
    }
}

impl Drop for TokenSweeper {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Runs one purge pass. Failures are logged and swallowed.
pub async fn sweep_once(store: &dyn AccessStore, clock: &dyn Clock) -> u64 {
    match store.purge_expired_tokens(clock.now()).await {
        Ok(0) => 0,
        Ok(purged) => {
            debug!(purged, "expired tokens purged");
            purged
        }
        Err(err) => {
            warn!("token sweep failed: {err}");
            0
        }
    }
}
