// src/uploader.rs
//
// Copyright, 2025.  Signal65 / Futurum Group.
//
// Background upload task behind a write handle.
//
// Design:
// - The handle owns the sending half of a bounded channel (the "pipe"); each
//   write() becomes one message, so a slow upload pushes back on the writer.
// - The task accumulates bytes into parts of `part_size`.
//     - pipe closes with <= one part buffered  -> single PutObject
//     - otherwise                              -> CreateMultipartUpload,
//       concurrent UploadPart (bounded by max_in_flight), CompleteMultipartUpload
// - Any failure after the MPU exists aborts outstanding parts and, unless
//   disabled, issues AbortMultipartUpload.
// - The terminal result goes out exactly once on a oneshot channel. A failure
//   is latched into the handle *before* the pipe is dropped, so a writer that
//   sees the pipe close can always find the cause.

use std::sync::Arc;
use std::time::SystemTime;

use anyhow::anyhow;
use bytes::{Bytes, BytesMut};
use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::UploadConfig;
use crate::constants::MAX_MULTIPART_PARTS;
use crate::error::SourceError;
use crate::object_client::{ObjectClient, ObjectLocation, PutOptions};
use crate::s3_client::{spawn_on_global_rt, with_cancel};

/// Result info of a finished upload.
#[derive(Clone, Debug)]
pub struct UploadCompleteInfo {
    pub e_tag: Option<String>,
    pub total_bytes: u64,
    /// Number of multipart parts; 0 for a single PutObject.
    pub parts: usize,
    pub started_at: SystemTime,
    pub completed_at: SystemTime,
}

pub(crate) type UploadResult = Result<UploadCompleteInfo, SourceError>;

/// Start the upload task for `loc` and return the pipe's write end plus the
/// completion signal.
///
/// `latch` runs on failure, before the pipe's read end is dropped. Fails only
/// if the background runtime cannot be started.
pub(crate) fn spawn_upload<F>(
    client: Arc<dyn ObjectClient>,
    loc: ObjectLocation,
    cfg: UploadConfig,
    cancel: CancellationToken,
    latch: F,
) -> Result<(mpsc::Sender<Bytes>, oneshot::Receiver<UploadResult>), SourceError>
where
    F: FnOnce(&SourceError) + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<Bytes>(cfg.pipe_depth.max(1));
    let (done_tx, done_rx) = oneshot::channel();

    let uploader = Uploader {
        client,
        opts: cfg.put_options(),
        loc,
        cfg,
        cancel,
    };

    spawn_on_global_rt(async move {
        let res = uploader.run(&mut rx).await;
        if let Err(e) = &res {
            debug!("upload {} failed: {}", uploader.loc, e);
            latch(e);
        }
        drop(rx);
        let _ = done_tx.send(res);
    })?;

    Ok((tx, done_rx))
}

struct Uploader {
    client: Arc<dyn ObjectClient>,
    loc: ObjectLocation,
    cfg: UploadConfig,
    opts: PutOptions,
    cancel: CancellationToken,
}

impl Uploader {
    async fn run(&self, rx: &mut mpsc::Receiver<Bytes>) -> UploadResult {
        let started_at = SystemTime::now();
        let mut buf = BytesMut::new();
        let mut total_bytes = 0u64;

        // Buffer until we know whether the object fits in one part.
        loop {
            match self.recv(rx).await? {
                Some(chunk) => {
                    total_bytes += chunk.len() as u64;
                    buf.extend_from_slice(&chunk);
                    if buf.len() > self.cfg.part_size {
                        break;
                    }
                }
                None => {
                    debug!("upload {}: single PutObject of {} bytes", self.loc, buf.len());
                    let e_tag = with_cancel(
                        &self.cancel,
                        self.client.put_object(&self.loc, buf.freeze(), &self.opts),
                    )
                    .await?;
                    info!("upload {} complete: {} bytes", self.loc, total_bytes);
                    return Ok(UploadCompleteInfo {
                        e_tag,
                        total_bytes,
                        parts: 0,
                        started_at,
                        completed_at: SystemTime::now(),
                    });
                }
            }
        }

        let upload_id = with_cancel(
            &self.cancel,
            self.client.create_multipart_upload(&self.loc, &self.opts),
        )
        .await?;
        debug!("upload {}: multipart upload {} started", self.loc, upload_id);

        match self.multipart(rx, &upload_id, buf, total_bytes).await {
            Ok((e_tag, total_bytes, parts)) => {
                info!("upload {} complete: {} bytes in {} parts", self.loc, total_bytes, parts);
                Ok(UploadCompleteInfo {
                    e_tag,
                    total_bytes,
                    parts,
                    started_at,
                    completed_at: SystemTime::now(),
                })
            }
            Err(e) => {
                if self.cfg.abort_on_error {
                    // Not tied to the token: a cancelled upload still has to be cleaned up.
                    if let Err(abort_err) = self.client.abort_multipart_upload(&self.loc, &upload_id).await {
                        warn!("upload {}: abort of {} failed: {:#}", self.loc, upload_id, abort_err);
                    }
                }
                Err(e)
            }
        }
    }

    async fn recv(&self, rx: &mut mpsc::Receiver<Bytes>) -> Result<Option<Bytes>, SourceError> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(SourceError::Cancelled),
            chunk = rx.recv() => Ok(chunk),
        }
    }

    /// Stream the rest of the pipe as parts. `buf` already holds more than one part.
    async fn multipart(
        &self,
        rx: &mut mpsc::Receiver<Bytes>,
        upload_id: &str,
        mut buf: BytesMut,
        mut total_bytes: u64,
    ) -> Result<(Option<String>, u64, usize), SourceError> {
        let part_size = self.cfg.part_size;
        let sem = Arc::new(Semaphore::new(self.cfg.max_in_flight));
        // Dropping the set on an error path aborts parts still in flight.
        let mut tasks: JoinSet<anyhow::Result<(i32, String)>> = JoinSet::new();
        let mut completed: Vec<(i32, String)> = Vec::new();
        let mut next_part_number = 1i32;
        let mut closed = false;

        loop {
            while buf.len() >= part_size || (closed && !buf.is_empty()) {
                let n = part_size.min(buf.len());
                let chunk = buf.split_to(n).freeze();
                self.spawn_part(&mut tasks, &sem, upload_id, next_part_number, chunk).await?;
                next_part_number += 1;
            }
            if closed {
                break;
            }

            // Surface failed parts while the writer is still producing.
            while let Some(res) = tasks.try_join_next() {
                completed.push(flatten_part(res)?);
            }

            match self.recv(rx).await? {
                Some(chunk) => {
                    total_bytes += chunk.len() as u64;
                    buf.extend_from_slice(&chunk);
                }
                None => closed = true,
            }
        }

        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(SourceError::Cancelled),
                res = tasks.join_next() => res,
            };
            match next {
                Some(res) => completed.push(flatten_part(res)?),
                None => break,
            }
        }

        completed.sort_by_key(|(pn, _)| *pn);
        let parts = completed.len();
        let e_tag = with_cancel(
            &self.cancel,
            self.client.complete_multipart_upload(&self.loc, upload_id, completed),
        )
        .await?;
        Ok((e_tag, total_bytes, parts))
    }

    async fn spawn_part(
        &self,
        tasks: &mut JoinSet<anyhow::Result<(i32, String)>>,
        sem: &Arc<Semaphore>,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
    ) -> Result<(), SourceError> {
        if part_number as usize > MAX_MULTIPART_PARTS {
            return Err(anyhow!(
                "upload {} exceeds {} parts; raise part_size",
                self.loc, MAX_MULTIPART_PARTS
            )
            .into());
        }

        // Concurrency permit, held by the part task until it finishes.
        let permit = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(SourceError::Cancelled),
            p = sem.clone().acquire_owned() => p.map_err(|_| anyhow!("upload semaphore closed"))?,
        };

        let client = self.client.clone();
        let loc = self.loc.clone();
        let upload_id = upload_id.to_string();
        debug!("upload {}: part {} ({} bytes)", loc, part_number, body.len());
        tasks.spawn(async move {
            let _permit = permit;
            let etag = client.upload_part(&loc, &upload_id, part_number, body).await?;
            Ok((part_number, etag))
        });
        Ok(())
    }
}

fn flatten_part(
    res: Result<anyhow::Result<(i32, String)>, tokio::task::JoinError>,
) -> Result<(i32, String), SourceError> {
    match res {
        Ok(Ok(part)) => Ok(part),
        Ok(Err(e)) => Err(e.into()),
        Err(join_err) => Err(anyhow!("part task join failed: {join_err}").into()),
    }
}
