// Request/response envelope for signature requests

use super::{NetworkError, NetworkResult, RequestId};
use crate::types::{ChainId, UnsignedMessage};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Handler prefix byte routing requests to the signature handler
pub const SIGNATURE_REQUEST_HANDLER_ID: u8 = 2;

/// Ask a validator to sign a message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureRequest {
    pub message: Vec<u8>,
    pub justification: Vec<u8>,
}

impl SignatureRequest {
    pub fn new(message: &UnsignedMessage, justification: &[u8]) -> Self {
        Self {
            message: message.bytes().to_vec(),
            justification: justification.to_vec(),
        }
    }

    /// Serialize with the handler prefix
    pub fn to_bytes(&self) -> NetworkResult<Vec<u8>> {
        let body = bincode::serialize(self)?;
        let mut bytes = Vec::with_capacity(body.len() + 1);
        bytes.push(SIGNATURE_REQUEST_HANDLER_ID);
        bytes.extend_from_slice(&body);
        Ok(bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> NetworkResult<Self> {
        match bytes.split_first() {
            Some((&SIGNATURE_REQUEST_HANDLER_ID, body)) => Ok(bincode::deserialize(body)?),
            Some((prefix, _)) => Err(NetworkError::InvalidMessage(format!(
                "unexpected handler prefix {}",
                prefix
            ))),
            None => Err(NetworkError::InvalidMessage("empty request".into())),
        }
    }
}

/// A validator's answer
///
/// An empty response body means the validator has not seen the message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureResponse {
    pub signature: Vec<u8>,
}

impl SignatureResponse {
    pub fn to_bytes(&self) -> NetworkResult<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Decode a response body; `Ok(None)` for the empty "not seen" body
    pub fn from_bytes(bytes: &[u8]) -> NetworkResult<Option<Self>> {
        if bytes.is_empty() {
            return Ok(None);
        }
        Ok(Some(bincode::deserialize(bytes)?))
    }
}

/// One outbound request, shared by every identity of a wave
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub chain_id: ChainId,
    pub request_id: RequestId,
    pub deadline: Duration,
    pub payload: Vec<u8>,
}
