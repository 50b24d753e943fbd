//! Cluster plumbing for meshcache.
//!
//! This crate wires the eviction engines from `meshcache-engine` into a
//! distributed cache: consistent-hash peer selection, etcd-backed membership
//! with leases and watches, single-flight load coalescing, the cache group
//! composing all of it, the node RPC surface, and the HTTP gateway router.

pub mod config;
pub mod error;
pub mod gateway;
pub mod group;
pub mod logging;
pub mod metrics;
pub mod peer;
pub mod picker;
pub mod registry;
pub mod ring;
pub mod server;
pub mod singleflight;
pub mod wire;
