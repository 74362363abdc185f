//! Wire types exchanged with the coordinator
//!
//! The coordinator pushes JSON objects over the websocket:
//!
//! ```json
//! { "request_type": "work_generate",
//!   "hash": "<64 hex chars>",
//!   "difficulty_multiplier": 1.5 }
//! ```
//!
//! `ClientRequest` is the raw serde model; `ClientRequest::into_command`
//! validates it and yields a `ServerCommand` the client can route.
//!
//! ## Usage
//!
//! ```rust
//! use workstream::proto::{ClientRequest, ServerCommand};
//!
//! let frame = format!(
//!     r#"{{"request_type":"work_generate","hash":"{}","difficulty_multiplier":2}}"#,
//!     "A".repeat(64)
//! );
//! let request = ClientRequest::from_json(&frame).unwrap();
//! assert!(matches!(request.into_command(), Ok(ServerCommand::Generate(_))));
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of hex characters in a work hash
pub const HASH_HEX_LEN: usize = 64;

pub const WORK_GENERATE: &str = "work_generate";
pub const WORK_CANCEL: &str = "work_cancel";

#[derive(Debug, Error)]
pub enum MessageError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("invalid hash '{hash}': {reason}")]
    InvalidHash { hash: String, reason: &'static str },

    #[error("missing field '{field}' in {request_type}")]
    MissingField {
        request_type: &'static str,
        field: &'static str,
    },

    #[error("difficulty multiplier must be positive, got {0}")]
    InvalidDifficulty(f64),
}

pub type Result<T> = std::result::Result<T, MessageError>;

/// One unit of requested work, keyed by `hash`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    pub hash: String,
    pub difficulty_multiplier: f64,
}

impl WorkItem {
    /// Build a work item after validating both fields
    pub fn new(hash: impl Into<String>, difficulty_multiplier: f64) -> Result<Self> {
        let hash = hash.into();
        validate_hash(&hash)?;
        validate_difficulty(difficulty_multiplier)?;
        Ok(Self {
            hash,
            difficulty_multiplier,
        })
    }

    /// Decoded 32-byte hash
    pub fn hash_bytes(&self) -> Result<[u8; 32]> {
        decode_hash(&self.hash)
    }
}

/// Raw inbound message from the coordinator
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientRequest {
    pub request_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub difficulty_multiplier: Option<f64>,
}

/// Validated, routable form of a `ClientRequest`
#[derive(Debug, Clone, PartialEq)]
pub enum ServerCommand {
    Generate(WorkItem),
    Cancel(String),
    Unknown(String),
}

impl ClientRequest {
    pub fn from_json(frame: &str) -> Result<Self> {
        Ok(serde_json::from_str(frame)?)
    }

    /// Validate and classify the request.
    ///
    /// Unrecognized request types are not an error; they come back as
    /// `ServerCommand::Unknown` so the caller decides how loudly to drop them.
    pub fn into_command(self) -> Result<ServerCommand> {
        match self.request_type.as_str() {
            WORK_GENERATE => {
                let hash = self.hash.ok_or(MessageError::MissingField {
                    request_type: WORK_GENERATE,
                    field: "hash",
                })?;
                let difficulty =
                    self.difficulty_multiplier
                        .ok_or(MessageError::MissingField {
                            request_type: WORK_GENERATE,
                            field: "difficulty_multiplier",
                        })?;
                Ok(ServerCommand::Generate(WorkItem::new(hash, difficulty)?))
            }
            WORK_CANCEL => {
                let hash = self.hash.ok_or(MessageError::MissingField {
                    request_type: WORK_CANCEL,
                    field: "hash",
                })?;
                validate_hash(&hash)?;
                Ok(ServerCommand::Cancel(hash))
            }
            _ => Ok(ServerCommand::Unknown(self.request_type)),
        }
    }
}

/// Check that `hash` is exactly 64 hex characters
pub fn validate_hash(hash: &str) -> Result<()> {
    decode_hash(hash).map(|_| ())
}

fn decode_hash(hash: &str) -> Result<[u8; 32]> {
    if hash.len() != HASH_HEX_LEN {
        return Err(MessageError::InvalidHash {
            hash: hash.to_string(),
            reason: "expected 64 hex characters",
        });
    }

    let mut bytes = [0u8; 32];
    hex::decode_to_slice(hash, &mut bytes).map_err(|_| MessageError::InvalidHash {
        hash: hash.to_string(),
        reason: "not hexadecimal",
    })?;
    Ok(bytes)
}

fn validate_difficulty(multiplier: f64) -> Result<()> {
    if multiplier.is_finite() && multiplier > 0.0 {
        Ok(())
    } else {
        Err(MessageError::InvalidDifficulty(multiplier))
    }
}
