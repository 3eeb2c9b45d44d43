//! Periodic cleanup of expired in-process state.

use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

use super::handlers::auth::AuthState;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub rate_windows: usize,
    pub refresh_sessions: usize,
    pub oauth_flows: usize,
}

/// Purge expired rate windows, refresh sessions and abandoned OAuth flows.
pub async fn sweep_once(auth_state: &AuthState) -> SweepReport {
    SweepReport {
        rate_windows: auth_state.rate_limiter().sweep(),
        refresh_sessions: auth_state.sessions().purge_expired().await,
        oauth_flows: auth_state.oauth_flows().sweep().await,
    }
}

/// Run [`sweep_once`] on the configured interval until `shutdown` flips.
pub fn spawn_sweeper(
    auth_state: Arc<AuthState>,
    mut shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(auth_state.config().sweep_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = sweep_once(&auth_state).await;
                    if report == SweepReport::default() {
                        debug!("Sweep found nothing to purge");
                    } else {
                        info!(
                            rate_windows = report.rate_windows,
                            refresh_sessions = report.refresh_sessions,
                            oauth_flows = report.oauth_flows,
                            "Sweep purged expired state"
                        );
                    }
                }
                _ = shutdown.changed() => {
                    debug!("Sweeper stopping");
                    break;
                }
            }
        }
    })
}
