//! Typed RPC stub for a remote cache node.

use std::time::Duration;

use crate::error::CacheError;
use crate::wire::{DeleteResponse, GetResponse, RpcRequest, SetResponse};

/// Per-call deadline on every peer RPC.
pub const RPC_TIMEOUT: Duration = Duration::from_secs(3);

/// A client for the RPC surface of one remote node.
///
/// Transport failures are reported as [`CacheError::PeerUnavailable`] and
/// never retried here; retrying is a caller-layer concern.
#[derive(Debug, Clone)]
pub struct PeerClient {
    addr: String,
    http: reqwest::Client,
}

impl PeerClient {
    /// Creates a client dialing `addr` (host:port) with the standard
    /// deadline.
    pub fn new(addr: &str) -> Self {
        let http = reqwest::Client::builder()
            .timeout(RPC_TIMEOUT)
            .build()
            .expect("building peer http client");
        PeerClient {
            addr: addr.to_owned(),
            http,
        }
    }

    /// The address this client dials.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Fetches `key` from `group` on the peer.
    ///
    /// `Ok(None)` is a clean miss (the peer answered NOT_FOUND); `Err` is a
    /// transport or server failure.
    pub async fn get(&self, group: &str, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let request = RpcRequest {
            group: group.to_owned(),
            key: key.to_owned(),
            value: None,
        };
        let response = self
            .http
            .post(self.url("get"))
            .json(&request)
            .send()
            .await
            .map_err(|err| self.unavailable(err))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(CacheError::PeerUnavailable(format!(
                "{}: get returned {}",
                self.addr,
                response.status()
            )));
        }
        let body: GetResponse = response
            .json()
            .await
            .map_err(|err| CacheError::Malformed(err.to_string()))?;
        Ok(Some(body.value))
    }

    /// Stores `value` under `key` in `group` on the peer.
    pub async fn set(&self, group: &str, key: &str, value: Vec<u8>) -> Result<(), CacheError> {
        let request = RpcRequest {
            group: group.to_owned(),
            key: key.to_owned(),
            value: Some(value),
        };
        let response = self
            .http
            .post(self.url("set"))
            .json(&request)
            .send()
            .await
            .map_err(|err| self.unavailable(err))?;
        if !response.status().is_success() {
            return Err(CacheError::PeerUnavailable(format!(
                "{}: set returned {}",
                self.addr,
                response.status()
            )));
        }
        let _body: SetResponse = response
            .json()
            .await
            .map_err(|err| CacheError::Malformed(err.to_string()))?;
        Ok(())
    }

    /// Deletes `key` from `group` on the peer, returning whether it was
    /// resident there.
    pub async fn delete(&self, group: &str, key: &str) -> Result<bool, CacheError> {
        let request = RpcRequest {
            group: group.to_owned(),
            key: key.to_owned(),
            value: None,
        };
        let response = self
            .http
            .post(self.url("delete"))
            .json(&request)
            .send()
            .await
            .map_err(|err| self.unavailable(err))?;
        if !response.status().is_success() {
            return Err(CacheError::PeerUnavailable(format!(
                "{}: delete returned {}",
                self.addr,
                response.status()
            )));
        }
        let body: DeleteResponse = response
            .json()
            .await
            .map_err(|err| CacheError::Malformed(err.to_string()))?;
        Ok(body.ok)
    }

    fn url(&self, method: &str) -> String {
        format!("http://{}/rpc/{method}", self.addr)
    }

    fn unavailable(&self, err: reqwest::Error) -> CacheError {
        CacheError::PeerUnavailable(format!("{}: {err}", self.addr))
    }
}
