//! Wire contract for the txt2img endpoint exposed by a hired provider.
//!
//! Module boundaries:
//! - `negotiation`: media types and `Accept` header resolution
//! - `chunk`: fixed-size framing of a serialized response and its reassembly
//!
//! A request travels `requestor -> tunnel -> provider` as one JSON document. The reply is the
//! same [`GenerationResponse`] either as a single JSON body or as the JSON text split into
//! transport chunks; both carry byte-identical payloads.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod chunk;
pub mod negotiation;

pub use chunk::{DEFAULT_CHUNK_SIZE, reassemble, split_into_chunks};
pub use negotiation::{ACCEPT_JSON, ACCEPT_OCTET_STREAM, JSON_CONTENT_TYPE, Representation};

/// Path the collaborator publishes for text-to-image generation.
pub const TXT2IMG_PATH: &str = "/sdapi/v1/txt2img";

/// Body returned with `415` when the request body is not JSON.
pub const REQUEST_MUST_BE_JSON: &str = "Request must be JSON";

/// Default sampling steps sent by the requestor.
pub const DEFAULT_STEPS: u32 = 250;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("generation_response_invalid_json: {message}")]
    InvalidJson { message: String },
    #[error("generation_image_{index}_invalid_base64: {message}")]
    InvalidImage { index: usize, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub steps: Option<u32>,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            steps: Some(DEFAULT_STEPS),
        }
    }

    pub fn with_steps(mut self, steps: u32) -> Self {
        self.steps = Some(steps);
        self
    }
}

/// Response document. Field order matches what the provider emits so the serialized text
/// is stable across both representations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationResponse {
    pub prompt: String,
    #[serde(default)]
    pub images: Vec<String>,
}

impl GenerationResponse {
    pub fn new(prompt: impl Into<String>, images: Vec<String>) -> Self {
        Self {
            prompt: prompt.into(),
            images,
        }
    }

    /// Parse one complete document. Partial input never yields a value.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, ProtocolError> {
        serde_json::from_slice(bytes).map_err(|error| ProtocolError::InvalidJson {
            message: error.to_string(),
        })
    }

    pub fn to_json_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(self).map_err(|error| ProtocolError::InvalidJson {
            message: error.to_string(),
        })
    }

    /// Decode every `images` entry from base64, in order.
    pub fn decode_images(&self) -> Result<Vec<Vec<u8>>, ProtocolError> {
        self.images
            .iter()
            .enumerate()
            .map(|(index, encoded)| decode_image(index, encoded))
            .collect()
    }
}

pub fn encode_image(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

fn decode_image(index: usize, encoded: &str) -> Result<Vec<u8>, ProtocolError> {
    STANDARD
        .decode(encoded.trim())
        .map_err(|error| ProtocolError::InvalidImage {
            index,
            message: error.to_string(),
        })
}

/// Proxy path for an activity: `/activity/{id}/proxy-http{TXT2IMG_PATH}`.
pub fn activity_proxy_path(activity_id: &str) -> String {
    format!("/activity/{}/proxy-http{TXT2IMG_PATH}", activity_id.trim())
}
