//! Inbound-traffic staleness detection.
//!
//! A socket can sit open while the service has silently stopped talking;
//! transport-level disconnect detection never fires for that. This monitor
//! samples the timestamp of the most recent inbound message and raises an
//! informational flag when the gap grows past the threshold. It never
//! triggers a reconnect itself.

use crate::session::SessionState;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

pub(crate) async fn run_monitor(
    interval: Duration,
    threshold: Duration,
    last_inbound: watch::Receiver<Instant>,
    session_state: watch::Receiver<SessionState>,
    delayed_tx: Arc<watch::Sender<bool>>,
    cancel: CancellationToken,
) {
    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let connected = matches!(*session_state.borrow(), SessionState::Connected);
                let delayed = connected && last_inbound.borrow().elapsed() >= threshold;
                delayed_tx.send_if_modified(|current| {
                    if *current != delayed {
                        *current = delayed;
                        true
                    } else {
                        false
                    }
                });
            }
            _ = cancel.cancelled() => {
                delayed_tx.send_replace(false);
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Rig {
        last_inbound_tx: watch::Sender<Instant>,
        state_tx: watch::Sender<SessionState>,
        delayed_rx: watch::Receiver<bool>,
        cancel: CancellationToken,
    }

    fn spawn_monitor(state: SessionState) -> Rig {
        let (last_inbound_tx, last_inbound_rx) = watch::channel(Instant::now());
        let (state_tx, state_rx) = watch::channel(state);
        let (delayed_tx, delayed_rx) = watch::channel(false);
        let cancel = CancellationToken::new();
        tokio::spawn(run_monitor(
            Duration::from_secs(1),
            Duration::from_secs(5),
            last_inbound_rx,
            state_rx,
            Arc::new(delayed_tx),
            cancel.clone(),
        ));
        Rig {
            last_inbound_tx,
            state_tx,
            delayed_rx,
            cancel,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn flags_a_silent_stall_and_recovers() {
        let mut rig = spawn_monitor(SessionState::Connected);

        time::sleep(Duration::from_millis(4500)).await;
        assert!(!*rig.delayed_rx.borrow());

        time::sleep(Duration::from_millis(1000)).await;
        rig.delayed_rx.changed().await.unwrap();
        assert!(*rig.delayed_rx.borrow());

        // A fresh inbound message clears the flag at the next sample.
        rig.last_inbound_tx.send_replace(Instant::now());
        rig.delayed_rx.changed().await.unwrap();
        assert!(!*rig.delayed_rx.borrow());
    }

    #[tokio::test(start_paused = true)]
    async fn never_flags_while_not_connected() {
        let rig = spawn_monitor(SessionState::Reconnecting);
        time::sleep(Duration::from_secs(20)).await;
        assert!(!*rig.delayed_rx.borrow());
        drop(rig);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnecting_clears_the_flag() {
        let mut rig = spawn_monitor(SessionState::Connected);
        time::sleep(Duration::from_secs(6)).await;
        rig.delayed_rx.changed().await.unwrap();
        assert!(*rig.delayed_rx.borrow());

        rig.state_tx.send_replace(SessionState::Reconnecting);
        rig.delayed_rx.changed().await.unwrap();
        assert!(!*rig.delayed_rx.borrow());
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_resets_the_flag() {
        let mut rig = spawn_monitor(SessionState::Connected);
        time::sleep(Duration::from_secs(6)).await;
        rig.delayed_rx.changed().await.unwrap();
        assert!(*rig.delayed_rx.borrow());

        rig.cancel.cancel();
        rig.delayed_rx.changed().await.unwrap();
        assert!(!*rig.delayed_rx.borrow());
    }
}
