//! Periodic reconciliation of the waiting pool

use crate::state::ServerState;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

/// Run [`ServerState::sweep`] every `period` until the task is aborted.
///
/// Sweeps run one after another on this task; a tick that comes due while a
/// sweep is still running is skipped rather than queued.
pub fn spawn(state: ServerState, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately; nothing to reconcile yet.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Some(report) = state.sweep() {
                tracing::trace!(?report, "sweep finished");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PairingPolicy;
    use crate::connections::{ConnectionTable, Connections};
    use crate::protocol::Preferences;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn evicts_stale_waiters_on_each_tick() {
        let table = Arc::new(ConnectionTable::new());
        let state = ServerState::new(table.clone(), PairingPolicy::default());
        let (stale, _rx_stale) = state.connect();
        let (live, _rx_live) = state.connect();
        state.search(stale, Preferences::default());
        table.close(stale);
        state.search(live, Preferences::default());
        assert_eq!(state.snapshot().waiting, vec![stale, live]);

        let janitor = spawn(state.clone(), Duration::from_secs(10));

        time::sleep(Duration::from_secs(5)).await;
        assert_eq!(state.snapshot().waiting, vec![stale, live]);

        time::sleep(Duration::from_secs(6)).await;
        assert_eq!(state.snapshot().waiting, vec![live]);
        assert_eq!(state.online_count(), 1);

        janitor.abort();
    }
}
