//! Lease-backed registration in the coordinator.

use std::time::Duration;

use anyhow::{Context, Result};
use etcd_client::{Client, LeaseKeepAliveStream, LeaseKeeper, PutOptions};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::Config;

/// A live registration: `{service}/{addr}` bound to a lease that a
/// background loop keeps refreshing.
///
/// Dropping the registration without calling [`unregister`] lets the lease
/// expire on its own, at which point the coordinator removes the key. That
/// is the same path a crashed node takes.
///
/// [`unregister`]: Registration::unregister
pub struct Registration {
    client: Client,
    lease_id: i64,
    key: String,
    stop: watch::Sender<bool>,
    keepalive: JoinHandle<()>,
}

/// Registers this node under `{service}/{addr}` with a fresh lease and
/// starts the keep-alive loop.
pub async fn register(config: &Config) -> Result<Registration> {
    let coordinator = &config.coordinator;
    let mut client = Client::connect(&coordinator.endpoints, None)
        .await
        .context("connecting to coordinator")?;

    let lease = client
        .lease_grant(coordinator.lease_ttl.as_secs() as i64, None)
        .await
        .context("granting registration lease")?;
    let key = format!("{}/{}", config.service_name, config.node.addr);
    client
        .put(
            key.clone(),
            config.node.addr.clone(),
            Some(PutOptions::new().with_lease(lease.id())),
        )
        .await
        .context("writing registration key")?;

    let (keeper, responses) = client
        .lease_keep_alive(lease.id())
        .await
        .context("starting lease keep-alive")?;
    let (stop, stop_rx) = watch::channel(false);
    let keepalive = tokio::spawn(keep_alive_loop(
        keeper,
        responses,
        stop_rx,
        coordinator.keepalive_interval,
    ));

    tracing::info!(key = %key, lease = lease.id(), "registered with coordinator");
    Ok(Registration {
        client,
        lease_id: lease.id(),
        key,
        stop,
        keepalive,
    })
}

impl Registration {
    /// The coordinator key this registration holds.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Stops the keep-alive loop and revokes the lease, removing the
    /// registration key immediately.
    pub async fn unregister(mut self) {
        let _ = self.stop.send(true);
        let _ = (&mut self.keepalive).await;
        match self.client.lease_revoke(self.lease_id).await {
            Ok(_) => tracing::info!(key = %self.key, "unregistered from coordinator"),
            Err(err) => tracing::error!(error = %err, "failed to revoke registration lease"),
        }
    }
}

/// Refreshes the lease on a fixed cadence until stopped.
///
/// On any keep-alive failure the loop logs and exits; the lease then expires
/// naturally and the coordinator drops the key.
async fn keep_alive_loop(
    mut keeper: LeaseKeeper,
    mut responses: LeaseKeepAliveStream,
    mut stop: watch::Receiver<bool>,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(err) = keeper.keep_alive().await {
                    tracing::error!(error = %err, "lease keep-alive failed, letting the lease expire");
                    return;
                }
                match responses.message().await {
                    Ok(Some(_)) => tracing::trace!("lease refreshed"),
                    Ok(None) => {
                        tracing::error!("keep-alive stream closed, letting the lease expire");
                        return;
                    }
                    Err(err) => {
                        tracing::error!(error = %err, "keep-alive response failed, letting the lease expire");
                        return;
                    }
                }
            }
            _ = stop.changed() => return,
        }
    }
}
