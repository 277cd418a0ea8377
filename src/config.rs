// src/config.rs
//
// Copyright, 2025.  Signal65 / Futurum Group.
//
//! Reader parameters and upload tuning.

use std::collections::HashMap;
use std::env;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::constants::{
    DEFAULT_CONCURRENT_UPLOADS, DEFAULT_MIN_REQUEST_SIZE, DEFAULT_PIPE_DEPTH,
    DEFAULT_S3_MULTIPART_PART_SIZE, ENV_MIN_REQUEST_SIZE, ENV_PART_SIZE, ENV_UPLOAD_CONCURRENCY,
    MIN_S3_MULTIPART_PART_SIZE,
};
use crate::error::SourceError;
use crate::object_client::{ObjectClient, PutOptions};

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|s| s.trim().parse().ok())
}

/// Minimum request size used when a reader does not ask for one.
pub fn default_min_request_size() -> u64 {
    env_parse::<u64>(ENV_MIN_REQUEST_SIZE)
        .filter(|n| *n > 0)
        .unwrap_or(DEFAULT_MIN_REQUEST_SIZE)
}

/// Configures a read handle.
#[derive(Clone, Default)]
pub struct ReaderParams {
    pub bucket: String,
    pub key: String,
    /// Object version to read; the newest when `None`.
    pub version: Option<String>,
    /// Bytes asked for per GET. A large value means fewer requests; the body
    /// is streamed so memory use does not grow with it. Set it at or above the
    /// footer size and the largest column chunk. `0` means the default.
    pub min_request_size: u64,
    /// Client to issue requests with. The process-wide AWS client if `None`.
    pub client: Option<Arc<dyn ObjectClient>>,
    /// Cancels every remote call issued by the handle and its `open()` copies.
    pub cancel: Option<CancellationToken>,
}

impl ReaderParams {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self { bucket: bucket.into(), key: key.into(), ..Default::default() }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn with_min_request_size(mut self, n: u64) -> Self {
        self.min_request_size = n;
        self
    }

    pub fn with_client(mut self, client: Arc<dyn ObjectClient>) -> Self {
        self.client = Some(client);
        self
    }

    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub(crate) fn effective_min_request_size(&self) -> u64 {
        if self.min_request_size == 0 {
            default_min_request_size()
        } else {
            self.min_request_size
        }
    }
}

/// Upload tuning for write handles.
#[derive(Clone, Debug)]
pub struct UploadConfig {
    /// Target size of each part in bytes (AWS minimum is 5 MiB).
    pub part_size: usize,
    /// Maximum number of concurrent in-flight part uploads.
    pub max_in_flight: usize,
    /// Abort the multipart upload when it fails. When false the uploaded
    /// parts are left for the bucket's lifecycle rules.
    pub abort_on_error: bool,
    /// Optional content-type for the object.
    pub content_type: Option<String>,
    /// User metadata for the object.
    pub metadata: HashMap<String, String>,
    /// `write()` calls that may queue ahead of the upload task.
    pub pipe_depth: usize,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            part_size: DEFAULT_S3_MULTIPART_PART_SIZE,
            max_in_flight: DEFAULT_CONCURRENT_UPLOADS,
            abort_on_error: true,
            content_type: None,
            metadata: HashMap::new(),
            pipe_depth: DEFAULT_PIPE_DEPTH,
        }
    }
}

impl UploadConfig {
    /// Defaults overridden by `S3SOURCE_PART_SIZE` / `S3SOURCE_UPLOAD_CONCURRENCY`.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Some(n) = env_parse::<usize>(ENV_PART_SIZE) {
            cfg.part_size = n;
        }
        if let Some(n) = env_parse::<usize>(ENV_UPLOAD_CONCURRENCY) {
            cfg.max_in_flight = n;
        }
        cfg
    }

    pub fn with_part_size(mut self, n: usize) -> Self {
        self.part_size = n;
        self
    }

    pub fn with_max_in_flight(mut self, n: usize) -> Self {
        self.max_in_flight = n;
        self
    }

    pub fn with_content_type(mut self, ct: impl Into<String>) -> Self {
        self.content_type = Some(ct.into());
        self
    }

    pub fn validate(&self) -> Result<(), SourceError> {
        if self.part_size < MIN_S3_MULTIPART_PART_SIZE {
            return Err(SourceError::InvalidConfig(format!(
                "part_size must be at least {} bytes, got {}",
                MIN_S3_MULTIPART_PART_SIZE, self.part_size
            )));
        }
        if self.max_in_flight == 0 {
            return Err(SourceError::InvalidConfig("max_in_flight must be >= 1".into()));
        }
        if self.pipe_depth == 0 {
            return Err(SourceError::InvalidConfig("pipe_depth must be >= 1".into()));
        }
        Ok(())
    }

    pub(crate) fn put_options(&self) -> PutOptions {
        PutOptions {
            content_type: self.content_type.clone(),
            metadata: self.metadata.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_upload_config_is_valid() {
        let cfg = UploadConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.part_size, DEFAULT_S3_MULTIPART_PART_SIZE);
        assert!(cfg.abort_on_error);
    }

    #[test]
    fn small_parts_rejected() {
        let cfg = UploadConfig::default().with_part_size(1024);
        assert!(matches!(cfg.validate(), Err(SourceError::InvalidConfig(_))));
    }

    #[test]
    fn zero_concurrency_rejected() {
        let cfg = UploadConfig::default().with_max_in_flight(0);
        assert!(matches!(cfg.validate(), Err(SourceError::InvalidConfig(_))));
    }

    #[test]
    fn zero_min_request_size_means_default() {
        let p = ReaderParams::new("b", "k");
        assert!(p.effective_min_request_size() > 0);
        let p = ReaderParams::new("b", "k").with_min_request_size(64);
        assert_eq!(p.effective_min_request_size(), 64);
    }

    #[test]
    fn put_options_carry_content_type() {
        let cfg = UploadConfig::default().with_content_type("application/vnd.apache.parquet");
        assert_eq!(cfg.put_options().content_type.as_deref(), Some("application/vnd.apache.parquet"));
    }
}
