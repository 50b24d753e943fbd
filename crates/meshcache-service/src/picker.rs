//! Membership-driven peer selection.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use anyhow::{Context, Result};
use etcd_client::{Client, EventType, GetOptions, WatchOptions};
use parking_lot::RwLock;

use crate::peer::PeerClient;
use crate::ring::HashRing;

/// How long the watcher waits before re-establishing a broken watch stream.
const REWATCH_DELAY: Duration = Duration::from_secs(1);

/// Tracks the live membership and picks the owning peer for a key.
///
/// On construction the picker loads the full membership under the service
/// prefix and then follows coordinator watch events: PUT adds the address to
/// the peer map and the ring, DELETE removes it from both. Watch failures
/// are logged and the picker keeps serving with the last known membership
/// until the stream comes back.
pub struct PeerPicker {
    service_name: String,
    self_addr: String,
    peers: RwLock<HashMap<String, Arc<PeerClient>>>,
    ring: HashRing,
}

impl PeerPicker {
    /// Connects to the coordinator, loads the current membership, and starts
    /// the background watcher.
    pub async fn connect(
        service_name: &str,
        self_addr: &str,
        endpoints: &[String],
    ) -> Result<Arc<Self>> {
        let mut client = Client::connect(endpoints, None)
            .await
            .context("connecting to coordinator")?;
        let picker = Arc::new(PeerPicker {
            service_name: service_name.to_owned(),
            self_addr: self_addr.to_owned(),
            peers: RwLock::default(),
            ring: HashRing::default(),
        });

        let prefix = picker.prefix();
        let response = client
            .get(prefix.clone(), Some(GetOptions::new().with_prefix()))
            .await
            .context("listing current membership")?;
        for kv in response.kvs() {
            if let Ok(key) = kv.key_str() {
                if let Some(addr) = key.strip_prefix(&prefix) {
                    picker.apply_put(addr);
                }
            }
        }
        tracing::info!(
            service = service_name,
            members = picker.ring.node_count(),
            "loaded initial membership"
        );

        tokio::spawn(watch_members(client, Arc::downgrade(&picker), prefix));
        Ok(picker)
    }

    /// Picks the peer owning `key` per the local view of the ring.
    ///
    /// Returns `None` when the ring routes the key to this node itself, in
    /// which case the caller handles it locally.
    pub fn pick(&self, key: &str) -> Option<Arc<PeerClient>> {
        let node = self.ring.get(key)?;
        if node == self.self_addr {
            return None;
        }
        let peer = self.peers.read().get(&node).cloned();
        if peer.is_none() {
            tracing::warn!(node, "ring names a node with no peer client");
        }
        peer
    }

    /// This node's own registration address.
    pub fn self_addr(&self) -> &str {
        &self.self_addr
    }

    fn prefix(&self) -> String {
        format!("{}/", self.service_name)
    }

    fn apply_put(&self, addr: &str) {
        if addr.is_empty() {
            return;
        }
        self.ring.add(addr);
        self.peers
            .write()
            .insert(addr.to_owned(), Arc::new(PeerClient::new(addr)));
        tracing::debug!(addr, "peer joined");
    }

    fn apply_delete(&self, addr: &str) {
        self.ring.remove(addr);
        self.peers.write().remove(addr);
        tracing::debug!(addr, "peer left");
    }

    /// A picker with no coordinator behind it, for exercising group logic
    /// without a live etcd.
    #[cfg(test)]
    pub(crate) fn detached(service_name: &str, self_addr: &str) -> Arc<Self> {
        Arc::new(PeerPicker {
            service_name: service_name.to_owned(),
            self_addr: self_addr.to_owned(),
            peers: RwLock::default(),
            ring: HashRing::default(),
        })
    }
}

/// Follows membership events for as long as the picker is alive.
async fn watch_members(mut client: Client, picker: Weak<PeerPicker>, prefix: String) {
    loop {
        if picker.strong_count() == 0 {
            return;
        }
        match client
            .watch(prefix.clone(), Some(WatchOptions::new().with_prefix()))
            .await
        {
            Ok((_watcher, mut stream)) => loop {
                match stream.message().await {
                    Ok(Some(response)) => {
                        let Some(picker) = picker.upgrade() else {
                            return;
                        };
                        for event in response.events() {
                            let Some(kv) = event.kv() else { continue };
                            let Ok(key) = kv.key_str() else { continue };
                            let Some(addr) = key.strip_prefix(&prefix) else {
                                continue;
                            };
                            match event.event_type() {
                                EventType::Put => picker.apply_put(addr),
                                EventType::Delete => picker.apply_delete(addr),
                            }
                        }
                    }
                    Ok(None) => {
                        tracing::warn!("membership watch stream closed, re-watching");
                        break;
                    }
                    Err(err) => {
                        tracing::error!(error = %err, "membership watch failed, keeping last known peers");
                        break;
                    }
                }
            },
            Err(err) => {
                tracing::error!(error = %err, "failed to establish membership watch");
            }
        }
        tokio::time::sleep(REWATCH_DELAY).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picking_the_own_address_returns_local() {
        let picker = PeerPicker::detached("meshcache", "127.0.0.1:8001");
        picker.apply_put("127.0.0.1:8001");
        // Every key routes to the only member, which is this node.
        assert!(picker.pick("any-key").is_none());
    }

    #[test]
    fn events_maintain_peers_and_ring() {
        let picker = PeerPicker::detached("meshcache", "127.0.0.1:8001");
        picker.apply_put("127.0.0.1:8001");
        picker.apply_put("127.0.0.1:8002");
        assert_eq!(picker.ring.node_count(), 2);
        assert!(picker.peers.read().contains_key("127.0.0.1:8002"));

        // Some key must route to the other node.
        let routed = (0..100)
            .filter_map(|i| picker.pick(&format!("key-{i}")))
            .any(|peer| peer.addr() == "127.0.0.1:8002");
        assert!(routed);

        picker.apply_delete("127.0.0.1:8002");
        assert_eq!(picker.ring.node_count(), 1);
        assert!(picker.pick("any-key").is_none());
    }

    #[test]
    fn empty_membership_yields_no_peer() {
        let picker = PeerPicker::detached("meshcache", "127.0.0.1:8001");
        assert!(picker.pick("key").is_none());
    }
}
