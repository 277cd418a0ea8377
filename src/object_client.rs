// src/object_client.rs
//
// Copyright, 2025.  Signal65 / Futurum Group.
//
//! The remote seam used by file handles.
//!
//! [`ObjectClient`] is the slice of the S3 API a handle needs: HEAD for the
//! size probe, ranged GET for reads, and PUT / multipart calls for the upload
//! task. [`AwsObjectClient`] is the production implementation; tests plug in
//! an in-memory one.

use std::collections::HashMap;
use std::fmt;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use thiserror::Error;

/// Streamed response body of a GET.
pub type ObjectBody = BoxStream<'static, Result<Bytes>>;

/// Bucket, key and optional version of one object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectLocation {
    pub bucket: String,
    pub key: String,
    pub version: Option<String>,
}

impl ObjectLocation {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self { bucket: bucket.into(), key: key.into(), version: None }
    }

    pub fn with_version(mut self, version: Option<String>) -> Self {
        self.version = version;
        self
    }
}

impl fmt::Display for ObjectLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s3://{}/{}", self.bucket, self.key)?;
        if let Some(v) = &self.version {
            write!(f, "?versionId={v}")?;
        }
        Ok(())
    }
}

/// A ranged GET that starts at or past the end of the object (HTTP 416).
///
/// Clients return it as the error's root so handles can tell it apart from
/// other failures.
#[derive(Debug, Clone, Error)]
#[error("InvalidRange (416): {range} not satisfiable for {loc}")]
pub struct RangeNotSatisfiable {
    pub loc: String,
    pub range: String,
}

/// What a HEAD told us.
#[derive(Debug, Clone, Default)]
pub struct ObjectHead {
    pub content_length: Option<u64>,
    pub e_tag: Option<String>,
}

/// Options applied to `PutObject` and `CreateMultipartUpload`.
#[derive(Debug, Clone, Default)]
pub struct PutOptions {
    pub content_type: Option<String>,
    pub metadata: HashMap<String, String>,
}

#[async_trait]
pub trait ObjectClient: Send + Sync {
    async fn head_object(&self, loc: &ObjectLocation) -> Result<ObjectHead>;

    /// GET the object, restricted to `range` (a `Range` header value) if given.
    async fn get_object(&self, loc: &ObjectLocation, range: Option<String>) -> Result<ObjectBody>;

    /// Single-shot upload. Returns the ETag.
    async fn put_object(&self, loc: &ObjectLocation, body: Bytes, opts: &PutOptions) -> Result<Option<String>>;

    /// Returns the upload id.
    async fn create_multipart_upload(&self, loc: &ObjectLocation, opts: &PutOptions) -> Result<String>;

    /// Returns the part's ETag.
    async fn upload_part(&self, loc: &ObjectLocation, upload_id: &str, part_number: i32, body: Bytes) -> Result<String>;

    /// `parts` is (part number, ETag), sorted by part number. Returns the object's ETag.
    async fn complete_multipart_upload(
        &self,
        loc: &ObjectLocation,
        upload_id: &str,
        parts: Vec<(i32, String)>,
    ) -> Result<Option<String>>;

    async fn abort_multipart_upload(&self, loc: &ObjectLocation, upload_id: &str) -> Result<()>;
}

/// [`ObjectClient`] over the AWS SDK.
#[derive(Clone, Debug)]
pub struct AwsObjectClient {
    client: Client,
}

impl AwsObjectClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Wrap the process-wide default client.
    pub fn from_env() -> Result<Self> {
        Ok(Self::new(crate::s3_client::aws_s3_client()?))
    }
}

#[async_trait]
impl ObjectClient for AwsObjectClient {
    async fn head_object(&self, loc: &ObjectLocation) -> Result<ObjectHead> {
        let resp = self.client
            .head_object()
            .bucket(&loc.bucket)
            .key(&loc.key)
            .set_version_id(loc.version.clone())
            .send()
            .await
            .with_context(|| format!("HeadObject {loc} failed"))?;

        Ok(ObjectHead {
            content_length: resp.content_length().and_then(|n| u64::try_from(n).ok()),
            e_tag: resp.e_tag().map(str::to_string),
        })
    }

    async fn get_object(&self, loc: &ObjectLocation, range: Option<String>) -> Result<ObjectBody> {
        let resp = self.client
            .get_object()
            .bucket(&loc.bucket)
            .key(&loc.key)
            .set_version_id(loc.version.clone())
            .set_range(range.clone())
            .send()
            .await;
        let resp = match resp {
            Ok(resp) => resp,
            Err(e) if is_invalid_range(&e) => {
                return Err(RangeNotSatisfiable {
                    loc: loc.to_string(),
                    range: range.unwrap_or_default(),
                }
                .into());
            }
            Err(e) => return Err(anyhow::Error::new(e).context(format!("GetObject {loc} range={range:?} failed"))),
        };

        let body = stream::unfold(resp.body, |mut body: ByteStream| async move {
            body.next()
                .await
                .map(|chunk| (chunk.context("GetObject body read failed"), body))
        });
        Ok(body.boxed())
    }

    async fn put_object(&self, loc: &ObjectLocation, body: Bytes, opts: &PutOptions) -> Result<Option<String>> {
        let mut req = self.client
            .put_object()
            .bucket(&loc.bucket)
            .key(&loc.key)
            .body(ByteStream::from(body));
        if let Some(ct) = &opts.content_type {
            req = req.content_type(ct);
        }
        if !opts.metadata.is_empty() {
            req = req.set_metadata(Some(opts.metadata.clone()));
        }
        let resp = req.send().await.with_context(|| format!("PutObject {loc} failed"))?;
        Ok(resp.e_tag().map(str::to_string))
    }

    async fn create_multipart_upload(&self, loc: &ObjectLocation, opts: &PutOptions) -> Result<String> {
        let mut req = self.client
            .create_multipart_upload()
            .bucket(&loc.bucket)
            .key(&loc.key);
        if let Some(ct) = &opts.content_type {
            req = req.content_type(ct);
        }
        if !opts.metadata.is_empty() {
            req = req.set_metadata(Some(opts.metadata.clone()));
        }
        let resp = req.send().await.context("CreateMultipartUpload failed")?;
        let upload_id = resp.upload_id().unwrap_or_default().to_string();
        if upload_id.is_empty() {
            bail!("CreateMultipartUpload returned empty upload_id");
        }
        Ok(upload_id)
    }

    async fn upload_part(&self, loc: &ObjectLocation, upload_id: &str, part_number: i32, body: Bytes) -> Result<String> {
        let resp = self.client
            .upload_part()
            .bucket(&loc.bucket)
            .key(&loc.key)
            .upload_id(upload_id)
            .part_number(part_number)
            .body(ByteStream::from(body))
            .send()
            .await
            .context("UploadPart failed")?;

        let etag = resp.e_tag().unwrap_or_default().to_string();
        if etag.is_empty() {
            bail!("UploadPart returned empty ETag");
        }
        Ok(etag)
    }

    async fn complete_multipart_upload(
        &self,
        loc: &ObjectLocation,
        upload_id: &str,
        parts: Vec<(i32, String)>,
    ) -> Result<Option<String>> {
        let completed_parts: Vec<CompletedPart> = parts
            .into_iter()
            .map(|(pn, etag)| {
                CompletedPart::builder()
                    .set_e_tag(Some(etag))
                    .set_part_number(Some(pn))
                    .build()
            })
            .collect();

        let cmu = CompletedMultipartUpload::builder()
            .set_parts(Some(completed_parts))
            .build();

        let resp = self.client
            .complete_multipart_upload()
            .bucket(&loc.bucket)
            .key(&loc.key)
            .upload_id(upload_id)
            .multipart_upload(cmu)
            .send()
            .await
            .context("CompleteMultipartUpload failed")?;
        Ok(resp.e_tag().map(str::to_string))
    }

    async fn abort_multipart_upload(&self, loc: &ObjectLocation, upload_id: &str) -> Result<()> {
        self.client
            .abort_multipart_upload()
            .bucket(&loc.bucket)
            .key(&loc.key)
            .upload_id(upload_id)
            .send()
            .await
            .context("AbortMultipartUpload failed")?;
        Ok(())
    }
}

fn is_invalid_range<E: ProvideErrorMetadata, R>(err: &SdkError<E, R>) -> bool {
    match err {
        SdkError::ServiceError(se) => se.err().code() == Some("InvalidRange"),
        _ => false,
    }
}
