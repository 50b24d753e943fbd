//! Meshcache gateway.
//!
//! The REST face of the cluster: routes `GET`/`POST`/`DELETE` on
//! `/{group}/{key}` to the cache node owning the key, discovering members by
//! polling the coordinator.

#![warn(missing_docs, missing_debug_implementations, clippy::all)]

mod cli;

fn main() {
    match cli::execute() {
        Ok(()) => std::process::exit(0),
        Err(error) => {
            meshcache_service::logging::ensure_log_error(&error);
            std::process::exit(1);
        }
    }
}
