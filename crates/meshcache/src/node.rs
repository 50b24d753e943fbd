//! Node bootstrap: runtime, peer discovery, the default group, the server.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use futures::FutureExt;

use meshcache_service::config::Config;
use meshcache_service::group::{self, LoaderFn};
use meshcache_service::picker::PeerPicker;
use meshcache_service::server;

/// Starts the runtime and runs the node until shutdown.
pub fn run(config: Config) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("meshcache")
        .enable_all()
        .build()
        .context("failed to build the runtime")?;

    if let Some(ref id) = config.node.id {
        tracing::info!(node = %id, addr = %config.node.addr, "starting cache node");
    } else {
        tracing::info!(addr = %config.node.addr, "starting cache node");
    }

    runtime.block_on(async {
        let picker = PeerPicker::connect(
            &config.service_name,
            &config.node.addr,
            &config.coordinator.endpoints,
        )
        .await
        .context("starting peer discovery")?;

        group::create_group("names", &config.cache, picker, names_loader())
            .context("creating the default cache group")?;

        server::serve(&config).await
    })
}

/// The loader backing the default `names` group: a small in-process table
/// standing in for a real database.
fn names_loader() -> LoaderFn<String> {
    let records: HashMap<&'static str, &'static str> = [
        ("Tom", "Tom"),
        ("Jack", "Jack"),
        ("Alice", "Alice"),
        ("Bob", "Bob"),
        ("Charlie", "Charlie"),
        ("Diana", "Diana"),
    ]
    .into_iter()
    .collect();

    Arc::new(move |key| {
        let value = records.get(key).map(|record| record.to_string());
        let key = key.to_owned();
        async move {
            tracing::info!(key = %key, "cache miss, consulting the source table");
            if value.is_none() {
                tracing::warn!(key = %key, "key not present in the source table");
            }
            value
        }
        .boxed()
    })
}
