// src/constants.rs
//
// Copyright, 2025.  Signal65 / Futurum Group.
//
// Centralized constants for s3source to avoid hardcoded values throughout the codebase

/// Default minimum number of bytes requested per ranged GET.
///
/// Large enough that, by default, a single fetch covers the rest of the object.
/// The handle never buffers this much in memory; the body is streamed.
pub const DEFAULT_MIN_REQUEST_SIZE: u64 = u32::MAX as u64;

/// Default multipart upload part size for S3 (16 MB)
pub const DEFAULT_S3_MULTIPART_PART_SIZE: usize = 16 * 1024 * 1024;

/// Minimum S3 multipart upload part size (5 MB - AWS requirement)
pub const MIN_S3_MULTIPART_PART_SIZE: usize = 5 * 1024 * 1024;

/// Maximum number of parts in a multipart upload
pub const MAX_MULTIPART_PARTS: usize = 10000;

/// Default concurrent part uploads per write handle
pub const DEFAULT_CONCURRENT_UPLOADS: usize = 5;

/// Number of `write()` calls that may be queued ahead of the upload task.
/// Small on purpose: the pipe should push back, not absorb the object.
pub const DEFAULT_PIPE_DEPTH: usize = 1;

/// Connect timeout for the default client (seconds)
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;

/// Default timeout for a single storage operation (seconds)
pub const DEFAULT_OPERATION_TIMEOUT_SECS: u64 = 300; // 5 minutes

// ============================================================================
// Environment overrides
// ============================================================================

/// Overrides `UploadConfig::part_size`
pub const ENV_PART_SIZE: &str = "S3SOURCE_PART_SIZE";

/// Overrides `UploadConfig::max_in_flight`
pub const ENV_UPLOAD_CONCURRENCY: &str = "S3SOURCE_UPLOAD_CONCURRENCY";

/// Overrides the default minimum request size of read handles
pub const ENV_MIN_REQUEST_SIZE: &str = "S3SOURCE_MIN_REQUEST_SIZE";

/// Worker threads of the global runtime
pub const ENV_RT_THREADS: &str = "S3SOURCE_RT_THREADS";

/// Per-operation timeout of the default client
pub const ENV_OPERATION_TIMEOUT_SECS: &str = "S3SOURCE_OPERATION_TIMEOUT_SECS";
