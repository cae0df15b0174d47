use super::{cycle, FeeUpdate, LiquidityFees};
use crate::client::LightningClient;
use crate::config::Config;
use crate::error::Error;
use crate::scheduler::Cadence;
use log::{debug, error, info, warn};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

/// Keep channel fees in line with the schedule until cancelled.
///
/// Runs a cycle right away, then again every monitor interval (plus jitter) or,
/// with the `events` trigger, as soon as the node reports HTLC activity. Every
/// written fee is reported on the first stream in write order. The first failure
/// is sent on the second stream and ends the monitor. Dropping the update receiver
/// also stops it. Both streams close when the monitor stops.
pub fn monitor<C: LightningClient + 'static>(
    config: Arc<Config>,
    client: Arc<C>,
    policy: Arc<LiquidityFees>,
    mut cancel: watch::Receiver<bool>,
) -> (mpsc::UnboundedReceiver<FeeUpdate>, mpsc::Receiver<Error>) {
    let (update_tx, update_rx) = mpsc::unbounded_channel();
    let (error_tx, error_rx) = mpsc::channel(1);

    tokio::spawn(async move {
        let cadence = Cadence::new(&config.monitor);

        let mut events = if cadence.wants_events() {
            match client.channel_events().await {
                Ok(Some(rx)) => Some(rx),
                Ok(None) => {
                    warn!("Fee monitor: node offers no event stream, using the interval only");
                    None
                }
                Err(e) => {
                    error!("Fee monitor: subscribing to events failed: {}", e);
                    let _ = error_tx.send(e).await;
                    return;
                }
            }
        } else {
            None
        };

        info!("Fee monitor: started");
        loop {
            if *cancel.borrow() {
                break;
            }
            if update_tx.is_closed() {
                info!("Fee monitor: update receiver dropped");
                break;
            }

            let result = cycle(&config, client.as_ref(), &policy, &cancel, |update| {
                update_tx.send(update).is_ok()
            })
            .await;
            if let Err(e) = result {
                error!("Fee monitor: cycle failed: {}", e);
                let _ = error_tx.send(e).await;
                return;
            }
            if update_tx.is_closed() {
                info!("Fee monitor: update receiver dropped");
                break;
            }

            let delay = cadence.next_delay();
            debug!("Fee monitor: next cycle in {}s", delay.as_secs());
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = next_event(&mut events) => {
                    debug!("Fee monitor: woken by node event");
                }
                _ = update_tx.closed() => {}
                changed = cancel.changed() => {
                    // A dropped sender can never cancel us again; stop as well.
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        info!("Fee monitor: stopped");
    });

    (update_rx, error_rx)
}

/// Wait for the next node event. Never resolves without a stream.
async fn next_event(events: &mut Option<mpsc::Receiver<()>>) {
    if let Some(rx) = events {
        if rx.recv().await.is_some() {
            // Collapse a burst into a single wakeup
            while rx.try_recv().is_ok() {}
            return;
        }
        warn!("Fee monitor: event stream closed, using the interval only");
        *events = None;
    }
    std::future::pending::<()>().await
}
