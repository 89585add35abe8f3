use std::env;
use std::net::{AddrParseError, SocketAddr};
use std::path::PathBuf;

use thiserror::Error;
use txt2img_protocol::DEFAULT_CHUNK_SIZE;

pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:7861";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    pub bind_addr: SocketAddr,
    /// Transport chunk size for `application/octet-stream` replies.
    pub chunk_size: usize,
    /// Image served in every reply. `None` serves the built-in 1x1 PNG.
    pub image_path: Option<PathBuf>,
    /// Bearer token required on generation routes when set.
    pub auth_token: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 7861)),
            chunk_size: DEFAULT_CHUNK_SIZE,
            image_path: None,
            auth_token: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid TXT2IMG_BIND_ADDR: {0}")]
    BindAddrParse(#[from] AddrParseError),
    #[error("invalid TXT2IMG_CHUNK_SIZE: {0}")]
    InvalidChunkSize(String),
    #[error("failed to read TXT2IMG_IMAGE_PATH {path}: {message}")]
    ImageRead { path: String, message: String },
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let bind_addr = non_empty(&lookup, "TXT2IMG_BIND_ADDR")
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string())
            .parse()?;
        let chunk_size = match non_empty(&lookup, "TXT2IMG_CHUNK_SIZE") {
            Some(raw) => parse_chunk_size(&raw)?,
            None => DEFAULT_CHUNK_SIZE,
        };
        let image_path = non_empty(&lookup, "TXT2IMG_IMAGE_PATH").map(PathBuf::from);
        let auth_token = non_empty(&lookup, "TXT2IMG_AUTH_TOKEN");

        Ok(Self {
            bind_addr,
            chunk_size,
            image_path,
            auth_token,
        })
    }
}

fn non_empty(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<String> {
    lookup(key)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_chunk_size(raw: &str) -> Result<usize, ConfigError> {
    let value = raw
        .parse::<usize>()
        .map_err(|error| ConfigError::InvalidChunkSize(error.to_string()))?;
    if value == 0 {
        return Err(ConfigError::InvalidChunkSize(
            "must be greater than zero".to_string(),
        ));
    }
    Ok(value)
}
