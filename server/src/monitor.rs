//! Inactivity monitoring
//!
//! One long-lived task drives a per-client ping/timeout state machine:
//! Active -> Probed (ping sent) -> Active again on any traffic, or evicted
//! once the probe goes unanswered past its timeout. Each cycle considers
//! only the single least-recently-active client, which bounds the probe
//! rate at one client per interval.

use crate::network::Server;
use crate::registry::ClientSnapshot;
use log::{debug, info};
use shared::Reply;
use std::time::Instant;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

pub(crate) fn spawn(server: Server) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(server.config().monitor_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // the first tick fires immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;
            run_cycle(&server).await;
        }
    })
}

/// The client that has gone longest without traffic, if any.
pub(crate) fn pick_oldest(snapshot: &[ClientSnapshot]) -> Option<&ClientSnapshot> {
    snapshot.iter().min_by_key(|client| client.last_active)
}

/// One monitor pass: scan, then probe or evict the single oldest client.
pub(crate) async fn run_cycle(server: &Server) {
    let config = server.config().clone();
    let snapshot = server.registry().read().await.snapshot();

    let Some(oldest) = pick_oldest(&snapshot) else {
        return;
    };
    if oldest.last_active.elapsed() < config.idle_threshold {
        return;
    }

    match oldest.pending_ping {
        None => {
            // Mark before sending, re-checking the live entry: the client
            // may have sent traffic (or left) since the snapshot was taken.
            let marked = {
                let mut registry = server.registry().write().await;
                let still_idle = registry
                    .find_by_addr(oldest.addr)
                    .map(|c| c.pending_ping.is_none() && c.idle_for() >= config.idle_threshold)
                    .unwrap_or(false);
                still_idle && registry.mark_probed(oldest.addr, Instant::now())
            };
            if marked {
                debug!("probing idle client '{}' at {}", oldest.name, oldest.addr);
                server.send_raw(oldest.addr, shared::PING_PROBE).await;
            }
        }
        Some(probed_at) => {
            if probed_at.elapsed() < config.probe_timeout {
                return;
            }
            // evict_if_stale re-checks live state; a client that answered
            // (or was removed) in the meantime makes this a no-op
            let evicted = server.registry().write().await.evict_if_stale(
                oldest.addr,
                config.idle_threshold,
                config.probe_timeout,
            );
            if let Some(client) = evicted {
                info!("evicting inactive client '{}' at {}", client.name, client.addr);
                server
                    .send_raw(
                        client.addr,
                        &Reply::system("You have been removed from the chat due to inactivity")
                            .to_wire(),
                    )
                    .await;
                server
                    .broadcast_system(
                        &format!("{} has been removed from the chat due to inactivity", client.name),
                        None,
                    )
                    .await;
            }
        }
    }
}
