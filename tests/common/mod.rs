// tests/common/mod.rs
//
// In-memory ObjectClient used by the integration tests. Bodies are served in
// small chunks so stream boundaries get exercised, every call is logged, and
// failures can be injected per operation.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt};

use s3source::{ObjectBody, ObjectClient, ObjectHead, ObjectLocation, PutOptions, RangeNotSatisfiable};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Head { key: String },
    Get { key: String, version: Option<String>, range: Option<String> },
    Put { key: String, len: usize, content_type: Option<String> },
    CreateMpu { key: String },
    UploadPart { key: String, part: i32, len: usize },
    Complete { key: String, parts: Vec<i32> },
    Abort { key: String },
}

#[derive(Default)]
pub struct MemoryClient {
    objects: Mutex<HashMap<(String, String), Vec<u8>>>,
    versions: Mutex<HashMap<(String, String, String), Vec<u8>>>,
    uploads: Mutex<HashMap<String, (ObjectLocation, BTreeMap<i32, Vec<u8>>)>>,
    calls: Mutex<Vec<Call>>,
    next_upload: AtomicUsize,

    /// Bytes per body stream item; 0 means the whole range in one item.
    pub body_chunk: usize,
    /// HEAD reports no content length.
    pub hide_length: bool,
    /// HEAD fails with this message.
    pub fail_head: Option<String>,
    /// The next N GETs fail.
    pub fail_gets: AtomicUsize,
    /// GETs succeed with an empty body.
    pub empty_bodies: bool,
    /// UploadPart for this part number fails.
    pub fail_part: Option<i32>,
    /// PutObject fails.
    pub fail_put: bool,
}

impl MemoryClient {
    pub fn new() -> Self {
        Self { body_chunk: 7, ..Default::default() }
    }

    pub fn with_object(self, bucket: &str, key: &str, data: Vec<u8>) -> Self {
        self.put_raw(bucket, key, data);
        self
    }

    pub fn put_raw(&self, bucket: &str, key: &str, data: Vec<u8>) {
        self.objects
            .lock()
            .unwrap()
            .insert((bucket.to_string(), key.to_string()), data);
    }

    pub fn put_version(&self, bucket: &str, key: &str, version: &str, data: Vec<u8>) {
        self.versions
            .lock()
            .unwrap()
            .insert((bucket.to_string(), key.to_string(), version.to_string()), data);
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.objects
            .lock()
            .unwrap()
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn gets(&self) -> Vec<Option<String>> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Get { range, .. } => Some(range),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|c| pred(c)).count()
    }

    pub fn open_uploads(&self) -> usize {
        self.uploads.lock().unwrap().len()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn lookup(&self, loc: &ObjectLocation) -> Result<Vec<u8>> {
        let found = match &loc.version {
            Some(v) => self
                .versions
                .lock()
                .unwrap()
                .get(&(loc.bucket.clone(), loc.key.clone(), v.clone()))
                .cloned(),
            None => self.object(&loc.bucket, &loc.key),
        };
        found.ok_or_else(|| anyhow!("NoSuchKey: {loc}"))
    }
}

/// Resolve a `Range` header the way S3 does.
pub fn resolve_range(loc: &ObjectLocation, range: Option<&str>, len: usize) -> Result<(usize, usize)> {
    let Some(range) = range else {
        return Ok((0, len));
    };
    let rest = range.strip_prefix("bytes=").ok_or_else(|| anyhow!("bad range {range}"))?;
    if let Some(suffix) = rest.strip_prefix('-') {
        let n: usize = suffix.parse()?;
        return Ok((len.saturating_sub(n), len));
    }
    let (a, b) = rest.split_once('-').ok_or_else(|| anyhow!("bad range {range}"))?;
    let a: usize = a.parse()?;
    let b: usize = b.parse()?;
    if b < a {
        bail!("bad range {range}");
    }
    if a >= len {
        return Err(RangeNotSatisfiable { loc: loc.to_string(), range: range.to_string() }.into());
    }
    Ok((a, (b + 1).min(len)))
}

#[async_trait]
impl ObjectClient for MemoryClient {
    async fn head_object(&self, loc: &ObjectLocation) -> Result<ObjectHead> {
        self.record(Call::Head { key: loc.key.clone() });
        if let Some(msg) = &self.fail_head {
            bail!("{msg}");
        }
        let data = self.lookup(loc)?;
        Ok(ObjectHead {
            content_length: if self.hide_length { None } else { Some(data.len() as u64) },
            e_tag: None,
        })
    }

    async fn get_object(&self, loc: &ObjectLocation, range: Option<String>) -> Result<ObjectBody> {
        self.record(Call::Get {
            key: loc.key.clone(),
            version: loc.version.clone(),
            range: range.clone(),
        });
        if self
            .fail_gets
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            bail!("injected GetObject failure");
        }
        let data = self.lookup(loc)?;
        let (begin, end) = resolve_range(loc, range.as_deref(), data.len())?;
        if self.empty_bodies {
            return Ok(stream::empty().boxed());
        }
        let body = Bytes::from(data[begin..end].to_vec());

        let step = if self.body_chunk == 0 { body.len().max(1) } else { self.body_chunk };
        let chunks: Vec<Result<Bytes>> = (0..body.len())
            .step_by(step)
            .map(|i| Ok(body.slice(i..(i + step).min(body.len()))))
            .collect();
        Ok(stream::iter(chunks).boxed())
    }

    async fn put_object(&self, loc: &ObjectLocation, body: Bytes, opts: &PutOptions) -> Result<Option<String>> {
        self.record(Call::Put {
            key: loc.key.clone(),
            len: body.len(),
            content_type: opts.content_type.clone(),
        });
        if self.fail_put {
            bail!("injected PutObject failure");
        }
        self.put_raw(&loc.bucket, &loc.key, body.to_vec());
        Ok(Some(format!("etag-{}", body.len())))
    }

    async fn create_multipart_upload(&self, loc: &ObjectLocation, _opts: &PutOptions) -> Result<String> {
        self.record(Call::CreateMpu { key: loc.key.clone() });
        let id = format!("upload-{}", self.next_upload.fetch_add(1, Ordering::SeqCst));
        self.uploads
            .lock()
            .unwrap()
            .insert(id.clone(), (loc.clone(), BTreeMap::new()));
        Ok(id)
    }

    async fn upload_part(&self, loc: &ObjectLocation, upload_id: &str, part_number: i32, body: Bytes) -> Result<String> {
        self.record(Call::UploadPart {
            key: loc.key.clone(),
            part: part_number,
            len: body.len(),
        });
        if self.fail_part == Some(part_number) {
            bail!("injected UploadPart failure on part {part_number}");
        }
        let mut uploads = self.uploads.lock().unwrap();
        let (_, parts) = uploads
            .get_mut(upload_id)
            .ok_or_else(|| anyhow!("NoSuchUpload: {upload_id}"))?;
        parts.insert(part_number, body.to_vec());
        Ok(format!("part-etag-{part_number}"))
    }

    async fn complete_multipart_upload(
        &self,
        loc: &ObjectLocation,
        upload_id: &str,
        parts: Vec<(i32, String)>,
    ) -> Result<Option<String>> {
        self.record(Call::Complete {
            key: loc.key.clone(),
            parts: parts.iter().map(|(n, _)| *n).collect(),
        });
        let (target, stored) = self
            .uploads
            .lock()
            .unwrap()
            .remove(upload_id)
            .ok_or_else(|| anyhow!("NoSuchUpload: {upload_id}"))?;
        let mut data = Vec::new();
        for (n, etag) in &parts {
            if *etag != format!("part-etag-{n}") {
                bail!("InvalidPart {n}");
            }
            data.extend_from_slice(stored.get(n).ok_or_else(|| anyhow!("InvalidPart {n}"))?);
        }
        self.put_raw(&target.bucket, &target.key, data);
        Ok(Some(format!("mpu-etag-{}", parts.len())))
    }

    async fn abort_multipart_upload(&self, loc: &ObjectLocation, upload_id: &str) -> Result<()> {
        self.record(Call::Abort { key: loc.key.clone() });
        self.uploads.lock().unwrap().remove(upload_id);
        Ok(())
    }
}

/// Deterministic, non-repeating-looking test payload.
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}
