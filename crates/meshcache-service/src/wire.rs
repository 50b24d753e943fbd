//! DTOs for the node RPC surface.
//!
//! Values cross the wire as opaque byte blobs; each cache group defines its
//! own encoding (the groups in this repository use JSON). Decode failures on
//! the receiving side surface as `Malformed` rather than silently producing
//! garbage.

use serde::{Deserialize, Serialize};

/// The request body shared by `get`, `set` and `delete`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcRequest {
    /// Target cache group.
    pub group: String,
    /// The cache key.
    pub key: String,
    /// Value bytes, present only for `set`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Vec<u8>>,
}

/// Successful `get` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetResponse {
    /// Encoded value bytes.
    pub value: Vec<u8>,
}

/// Successful `set` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetResponse {
    /// Whether the write was applied locally.
    pub ok: bool,
}

/// Successful `delete` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteResponse {
    /// Whether the key was resident on the receiving node.
    pub ok: bool,
}

/// Error body attached to non-2xx responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Human-readable error description.
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_request_round_trips() {
        let request = RpcRequest {
            group: "names".into(),
            key: "Tom".into(),
            value: Some(serde_json::to_vec("Tom").unwrap()),
        };
        let encoded = serde_json::to_vec(&request).unwrap();
        let decoded: RpcRequest = serde_json::from_slice(&encoded).unwrap();
        assert_eq!(decoded, request);
    }

    #[test]
    fn absent_value_is_omitted() {
        let request = RpcRequest {
            group: "names".into(),
            key: "Tom".into(),
            value: None,
        };
        let encoded = serde_json::to_string(&request).unwrap();
        assert!(!encoded.contains("value"));
        let decoded: RpcRequest = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.value, None);
    }
}
