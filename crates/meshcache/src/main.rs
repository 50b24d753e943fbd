//! Meshcache node.
//!
//! A cache node owns a slice of the key space, chosen via consistent hashing
//! over the live membership. It registers itself with the coordinator under
//! a lease, serves the typed RPC surface to its peers and the gateway, and
//! resolves local misses through the owning peer or the configured loader.

#![warn(missing_docs, missing_debug_implementations, clippy::all)]

mod cli;
mod node;

fn main() {
    match cli::execute() {
        Ok(()) => std::process::exit(0),
        Err(error) => {
            meshcache_service::logging::ensure_log_error(&error);
            std::process::exit(1);
        }
    }
}
