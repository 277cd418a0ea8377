//
// Copyright, 2025.  Signal65 / Futurum Group.
//
// src/s3_utils.rs
//! URI helpers shared by the CLI and the handle constructors.

use anyhow::{bail, Context, Result};

// -----------------------------------------------------------------------------
//  URI helpers ----------------------------------------------------------------
// -----------------------------------------------------------------------------

/// Split `s3://bucket/key` → (`bucket`, `key`). `key` may be empty (prefix).
pub fn parse_s3_uri(uri: &str) -> Result<(String, String)> {
    let trimmed = uri
        .strip_prefix("s3://")
        .context("URI must start with s3://")?;
    let (bucket, key) = trimmed
        .split_once('/')
        .context("URI must contain a '/' after bucket")?;
    if bucket.is_empty() {
        bail!("URI has an empty bucket name: {uri}");
    }
    Ok((bucket.to_owned(), key.to_owned()))
}

/// Like [`parse_s3_uri`] but the key must name an object, not a prefix.
pub fn parse_s3_object_uri(uri: &str) -> Result<(String, String)> {
    let (bucket, key) = parse_s3_uri(uri)?;
    if key.is_empty() || key.ends_with('/') {
        bail!("URI must name an object, got prefix: {uri}");
    }
    Ok((bucket, key))
}
