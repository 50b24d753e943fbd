//! Cache groups: the composition of local cache, single-flight, peer fetch
//! and loader.

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;

use meshcache_engine::{ArcCache, AvgLfuCache, LfuCache, LruCache, LruKCache, Policy, Sharded};

use crate::config::{CacheSettings, PolicyKind};
use crate::error::CacheError;
use crate::picker::PeerPicker;
use crate::singleflight::SingleFlight;

/// Resolves a missing key to a value, or to `None` when the key does not
/// exist at the source of truth.
pub type LoaderFn<V> = Arc<dyn Fn(&str) -> BoxFuture<'static, Option<V>> + Send + Sync>;

/// Marker for types that can live in a cache group and cross the wire.
///
/// Groups encode values as JSON at the RPC boundary; any serde-able clonable
/// type qualifies.
pub trait GroupValue:
    Clone + Send + Sync + Serialize + DeserializeOwned + 'static
{
}

impl<V> GroupValue for V where V: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {}

type LocalCache<V> = Sharded<String, V, Box<dyn Policy<String, V> + Send>>;

struct GroupInner<V> {
    name: String,
    loader: LoaderFn<V>,
    cache: LocalCache<V>,
    picker: Arc<PeerPicker>,
    flights: SingleFlight<V>,
    closed: AtomicBool,
}

/// A named cache with a loader behind it.
///
/// Reads consult the local cache first; a miss is coalesced per key and
/// resolved by asking the owning peer (when the ring points elsewhere) and
/// then the loader. Writes and deletes apply locally and are forwarded
/// best-effort to the owning peer when broadcast is requested.
pub struct CacheGroup<V> {
    inner: Arc<GroupInner<V>>,
}

impl<V> Clone for CacheGroup<V> {
    fn clone(&self) -> Self {
        CacheGroup {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V: GroupValue> CacheGroup<V> {
    fn new(
        name: &str,
        settings: &CacheSettings,
        picker: Arc<PeerPicker>,
        loader: LoaderFn<V>,
    ) -> Self {
        CacheGroup {
            inner: Arc::new(GroupInner {
                name: name.to_owned(),
                loader,
                cache: build_local_cache(settings),
                picker,
                flights: SingleFlight::new(),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// The group name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Looks up `key`, loading it on a miss.
    ///
    /// Concurrent misses for the same key share one load; the first
    /// completing load populates the local cache, so every waiter observes
    /// the same value.
    pub async fn get(&self, key: &str) -> Option<V> {
        if self.inner.closed.load(Ordering::Relaxed) {
            return None;
        }
        crate::metric!(counter("group.access") += 1, "group" => &self.inner.name);
        if let Some(value) = self.inner.cache.get(&key.to_owned()) {
            crate::metric!(counter("group.hit") += 1, "group" => &self.inner.name);
            return Some(value);
        }

        let inner = Arc::clone(&self.inner);
        let load_key = key.to_owned();
        self.inner
            .flights
            .run(key, async move { load(inner, load_key).await })
            .await
    }

    /// Stores `key` locally; with `broadcast`, also forwards the write to
    /// the owning peer. The local write is unconditional, the broadcast is
    /// best-effort.
    pub async fn set(&self, key: &str, value: V, broadcast: bool) {
        if self.inner.closed.load(Ordering::Relaxed) {
            return;
        }
        self.inner.cache.put(key.to_owned(), value.clone());
        if !broadcast {
            return;
        }
        let Some(peer) = self.inner.picker.pick(key) else {
            return;
        };
        match serde_json::to_vec(&value) {
            Ok(bytes) => {
                if let Err(err) = peer.set(&self.inner.name, key, bytes).await {
                    tracing::warn!(
                        group = %self.inner.name,
                        key,
                        error = %err,
                        "set broadcast failed"
                    );
                }
            }
            Err(err) => {
                tracing::warn!(group = %self.inner.name, key, error = %err, "value not encodable")
            }
        }
    }

    /// Removes `key` locally; with `broadcast`, also forwards the delete to
    /// the owning peer. Returns whether the key was resident locally.
    pub async fn del(&self, key: &str, broadcast: bool) -> bool {
        if self.inner.closed.load(Ordering::Relaxed) {
            return false;
        }
        let removed = self.inner.cache.remove(&key.to_owned()).is_some();
        if broadcast {
            if let Some(peer) = self.inner.picker.pick(key) {
                if let Err(err) = peer.delete(&self.inner.name, key).await {
                    tracing::warn!(
                        group = %self.inner.name,
                        key,
                        error = %err,
                        "delete broadcast failed"
                    );
                }
            }
        }
        removed
    }

    /// Marks the group closed; subsequent operations become no-ops.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Relaxed);
    }
}

/// The coalesced miss path: owning peer first, then the loader. The result
/// populates the local cache before it fans out to the waiters.
async fn load<V: GroupValue>(inner: Arc<GroupInner<V>>, key: String) -> Option<V> {
    crate::metric!(counter("group.load") += 1, "group" => &inner.name);
    if let Some(peer) = inner.picker.pick(&key) {
        match peer.get(&inner.name, &key).await {
            Ok(Some(bytes)) => match serde_json::from_slice::<V>(&bytes) {
                Ok(value) => {
                    inner.cache.put(key, value.clone());
                    return Some(value);
                }
                Err(err) => {
                    tracing::warn!(
                        group = %inner.name,
                        key,
                        error = %err,
                        "discarding malformed peer value"
                    );
                }
            },
            Ok(None) => {}
            Err(err) => {
                // A peer failure is treated as a local miss; the loader is
                // still attempted.
                tracing::warn!(group = %inner.name, key, error = %err, "peer fetch failed");
            }
        }
    }
    let value = (inner.loader)(&key).await?;
    inner.cache.put(key, value.clone());
    Some(value)
}

fn build_local_cache<V: GroupValue>(settings: &CacheSettings) -> LocalCache<V> {
    let cold_capacity = settings.cold_capacity;
    let promotion = settings.promotion_threshold;
    let max_avg = settings.max_average_frequency;
    match settings.policy {
        PolicyKind::Lru => Sharded::new(settings.capacity, settings.shards, |capacity| {
            Box::new(LruCache::new(capacity)) as Box<dyn Policy<String, V> + Send>
        }),
        PolicyKind::LruK => Sharded::new(settings.capacity, settings.shards, move |capacity| {
            Box::new(LruKCache::new(capacity, cold_capacity, promotion))
                as Box<dyn Policy<String, V> + Send>
        }),
        PolicyKind::Lfu => Sharded::new(settings.capacity, settings.shards, |capacity| {
            Box::new(LfuCache::new(capacity)) as Box<dyn Policy<String, V> + Send>
        }),
        PolicyKind::AvgLfu => Sharded::new(settings.capacity, settings.shards, move |capacity| {
            Box::new(AvgLfuCache::new(capacity, max_avg)) as Box<dyn Policy<String, V> + Send>
        }),
        PolicyKind::Arc => Sharded::new(settings.capacity, settings.shards, move |capacity| {
            Box::new(ArcCache::with_promotion_threshold(capacity, promotion))
                as Box<dyn Policy<String, V> + Send>
        }),
    }
}

/// A type-erased group as the RPC server sees it: byte-blob values, the
/// group's own encoding behind them.
#[async_trait]
pub trait GroupHandle: Send + Sync + 'static {
    /// The group name.
    fn name(&self) -> &str;

    /// Escape hatch for recovering the typed group from the registry.
    fn as_any(&self) -> &dyn Any;

    /// Fetches `key`, encoding the value with the group's encoding.
    async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, CacheError>;

    /// Decodes and stores a value under `key`.
    async fn set_bytes(&self, key: &str, value: Vec<u8>, broadcast: bool)
        -> Result<(), CacheError>;

    /// Deletes `key`, reporting whether it was resident.
    async fn delete(&self, key: &str, broadcast: bool) -> Result<bool, CacheError>;
}

#[async_trait]
impl<V: GroupValue> GroupHandle for CacheGroup<V> {
    fn name(&self) -> &str {
        CacheGroup::name(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, CacheError> {
        let value = self.get(key).await.ok_or(CacheError::MissingKey)?;
        serde_json::to_vec(&value).map_err(|err| CacheError::Malformed(err.to_string()))
    }

    async fn set_bytes(
        &self,
        key: &str,
        value: Vec<u8>,
        broadcast: bool,
    ) -> Result<(), CacheError> {
        let value: V = serde_json::from_slice(&value)
            .map_err(|err| CacheError::Malformed(err.to_string()))?;
        self.set(key, value, broadcast).await;
        Ok(())
    }

    async fn delete(&self, key: &str, broadcast: bool) -> Result<bool, CacheError> {
        Ok(self.del(key, broadcast).await)
    }
}

fn groups() -> &'static Mutex<HashMap<String, Arc<dyn GroupHandle>>> {
    static GROUPS: OnceLock<Mutex<HashMap<String, Arc<dyn GroupHandle>>>> = OnceLock::new();
    GROUPS.get_or_init(Mutex::default)
}

/// Creates and registers a cache group, or returns the existing group when
/// the name is already taken.
///
/// Re-creating a name with a different value type is an error.
pub fn create_group<V: GroupValue>(
    name: &str,
    settings: &CacheSettings,
    picker: Arc<PeerPicker>,
    loader: LoaderFn<V>,
) -> anyhow::Result<CacheGroup<V>> {
    let mut groups = groups().lock();
    if let Some(existing) = groups.get(name) {
        return existing
            .as_any()
            .downcast_ref::<CacheGroup<V>>()
            .cloned()
            .ok_or_else(|| {
                anyhow::anyhow!("cache group {name} already registered with a different value type")
            });
    }
    let group = CacheGroup::new(name, settings, picker, loader);
    groups.insert(name.to_owned(), Arc::new(group.clone()));
    tracing::info!(group = name, "cache group registered");
    Ok(group)
}

/// Looks up a registered group by name.
pub fn lookup_group(name: &str) -> Option<Arc<dyn GroupHandle>> {
    groups().lock().get(name).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use futures::FutureExt;

    fn static_loader(value: Option<&'static str>) -> LoaderFn<String> {
        Arc::new(move |_key| {
            let value = value.map(str::to_owned);
            async move { value }.boxed()
        })
    }

    fn counting_loader(counter: Arc<AtomicUsize>) -> LoaderFn<String> {
        Arc::new(move |key| {
            let counter = Arc::clone(&counter);
            let key = key.to_owned();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                Some(format!("loaded-{key}"))
            }
            .boxed()
        })
    }

    fn test_group(name: &str, loader: LoaderFn<String>) -> CacheGroup<String> {
        let picker = PeerPicker::detached("meshcache-test", "127.0.0.1:0");
        create_group(name, &CacheSettings::default(), picker, loader).unwrap()
    }

    #[tokio::test]
    async fn set_then_get_observes_the_write() {
        let group = test_group("t-set-get", static_loader(None));
        group.set("Tom", "cat".to_owned(), false).await;
        assert_eq!(group.get("Tom").await, Some("cat".to_owned()));
    }

    #[tokio::test]
    async fn del_then_get_misses() {
        let group = test_group("t-del", static_loader(None));
        group.set("Tom", "cat".to_owned(), false).await;
        assert!(group.del("Tom", false).await);
        assert_eq!(group.get("Tom").await, None);
        assert!(!group.del("Tom", false).await);
    }

    #[tokio::test]
    async fn miss_falls_through_to_the_loader() {
        let group = test_group("t-loader", static_loader(Some("from-source")));
        assert_eq!(group.get("any").await, Some("from-source".to_owned()));
        // The load populated the local cache.
        assert_eq!(
            group.inner.cache.get(&"any".to_owned()),
            Some("from-source".to_owned())
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn concurrent_misses_share_one_load() {
        let counter = Arc::new(AtomicUsize::new(0));
        let group = test_group("t-coalesce", counting_loader(Arc::clone(&counter)));

        let tasks: Vec<_> = (0..32)
            .map(|_| {
                let group = group.clone();
                tokio::spawn(async move { group.get("hot").await })
            })
            .collect();
        for task in tasks {
            assert_eq!(task.await.unwrap(), Some("loaded-hot".to_owned()));
        }
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn duplicate_create_returns_the_existing_group() {
        let picker = PeerPicker::detached("meshcache-test", "127.0.0.1:0");
        let first: CacheGroup<String> = create_group(
            "t-dup",
            &CacheSettings::default(),
            Arc::clone(&picker),
            static_loader(None),
        )
        .unwrap();
        first.set("k", "v".to_owned(), false).await;

        let second: CacheGroup<String> = create_group(
            "t-dup",
            &CacheSettings::default(),
            picker,
            static_loader(None),
        )
        .unwrap();
        assert_eq!(second.get("k").await, Some("v".to_owned()));
    }

    #[tokio::test]
    async fn duplicate_create_with_other_type_is_an_error() {
        let picker = PeerPicker::detached("meshcache-test", "127.0.0.1:0");
        let _first: CacheGroup<String> = create_group(
            "t-type-clash",
            &CacheSettings::default(),
            Arc::clone(&picker),
            static_loader(None),
        )
        .unwrap();

        let loader: LoaderFn<u32> = Arc::new(|_key| async { None }.boxed());
        let second = create_group::<u32>("t-type-clash", &CacheSettings::default(), picker, loader);
        assert!(second.is_err());
    }

    #[tokio::test]
    async fn handle_round_trips_bytes() {
        let group = test_group("t-bytes", static_loader(None));
        let handle = lookup_group("t-bytes").unwrap();

        let bytes = serde_json::to_vec("payload").unwrap();
        handle.set_bytes("k", bytes.clone(), false).await.unwrap();
        assert_eq!(handle.get_bytes("k").await.unwrap(), bytes);
        assert_eq!(group.get("k").await, Some("payload".to_owned()));

        assert!(handle.delete("k", false).await.unwrap());
        assert_eq!(
            handle.get_bytes("k").await.unwrap_err(),
            CacheError::MissingKey
        );
    }

    #[tokio::test]
    async fn malformed_bytes_are_rejected() {
        let _group = test_group("t-malformed", static_loader(None));
        let handle = lookup_group("t-malformed").unwrap();
        let result = handle.set_bytes("k", b"not json".to_vec(), false).await;
        assert!(matches!(result, Err(CacheError::Malformed(_))));
    }

    #[tokio::test]
    async fn closed_groups_stop_serving() {
        let group = test_group("t-closed", static_loader(Some("x")));
        group.set("k", "v".to_owned(), false).await;
        group.close();
        assert_eq!(group.get("k").await, None);
        group.set("k2", "v2".to_owned(), false).await;
        assert!(!group.del("k", false).await);
    }

    #[tokio::test]
    async fn absent_loader_results_are_not_cached() {
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_in_loader = Arc::clone(&counter);
        let loader: LoaderFn<String> = Arc::new(move |_key| {
            let counter = Arc::clone(&counter_in_loader);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                None
            }
            .boxed()
        });
        let group = test_group("t-absent", loader);

        assert_eq!(group.get("ghost").await, None);
        assert_eq!(group.get("ghost").await, None);
        // Each miss consulted the source again.
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }
}
