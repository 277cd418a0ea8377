// src/s3_file.rs
//
// Copyright, 2025.  Signal65 / Futurum Group.
//
//! Seekable file handle over one S3 object.
//!
//! A handle is either a reader or a writer:
//!
//! * **Reader** (from [`S3File::open`] or the `reader*` constructors). `read()`
//!   serves bytes from at most one open GET body. The body is requested for
//!   `max(buf.len(), min_request_size)` bytes at the cursor; when it runs dry
//!   the next `read()` issues a fresh ranged GET. `seek()` only moves the
//!   cursor and drops the open body.
//! * **Writer** (from [`S3File::create`] or the `writer*` constructors). An
//!   upload task is started before the handle is returned; `write()` feeds it
//!   through a bounded pipe and `close()` waits for its verdict.
//!
//! The blocking API runs every remote call on the global runtime, so handles
//! work from plain threads as well as from inside async code.

use std::io;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::{ReaderParams, UploadConfig};
use crate::error::{Result, SourceError};
use crate::object_client::{AwsObjectClient, ObjectBody, ObjectClient, ObjectLocation};
use crate::range::{byte_range, Whence};
use crate::s3_client::{run_on_global_rt, with_cancel};
use crate::source::ParquetFile;
use crate::uploader::{spawn_upload, UploadCompleteInfo, UploadResult};

/// Mutable block shared between the handle and its upload task.
#[derive(Debug, Default, Clone)]
struct HandleState {
    read_opened: bool,
    write_opened: bool,
    file_size: Option<u64>,
    err: Option<SourceError>,
}

/// The GET body currently being drained.
struct OpenStream {
    body: ObjectBody,
    pending: Bytes,
    requested: u64,
    delivered: u64,
}

pub struct S3File {
    client: Arc<dyn ObjectClient>,
    cancel: CancellationToken,
    loc: ObjectLocation,

    offset: i64,
    whence: Whence,

    // read-related fields
    min_request_size: u64,
    socket: Option<OpenStream>,
    exhausted: bool,
    // Unknown size only: the last range was delivered in full.
    range_drained: bool,

    // write-related fields
    upload_cfg: UploadConfig,
    upload_cancel: Option<CancellationToken>,
    pipe: Option<mpsc::Sender<Bytes>>,
    write_done: Option<oneshot::Receiver<UploadResult>>,
    upload_info: Option<UploadCompleteInfo>,

    state: Arc<RwLock<HandleState>>,
}

impl S3File {
    fn new_handle(
        client: Arc<dyn ObjectClient>,
        loc: ObjectLocation,
        min_request_size: u64,
        upload_cfg: UploadConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            client,
            cancel,
            loc,
            offset: 0,
            whence: Whence::Start,
            min_request_size,
            socket: None,
            exhausted: false,
            range_drained: false,
            upload_cfg,
            upload_cancel: None,
            pipe: None,
            write_done: None,
            upload_info: None,
            state: Arc::new(RwLock::new(HandleState::default())),
        }
    }

    // -------------------------------------------------------------------------
    // Constructors
    // -------------------------------------------------------------------------

    /// Write handle for `s3://bucket/key` using the process-wide AWS client.
    pub fn writer(bucket: &str, key: &str, cfg: UploadConfig) -> Result<Self> {
        let client = AwsObjectClient::from_env()?;
        Self::writer_with_client(Arc::new(client), bucket, key, cfg, CancellationToken::new())
    }

    /// Same as [`S3File::writer`] with a caller-supplied client and token.
    pub fn writer_with_client(
        client: Arc<dyn ObjectClient>,
        bucket: &str,
        key: &str,
        cfg: UploadConfig,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let base = Self::new_handle(
            client,
            ObjectLocation::new(bucket, key),
            crate::config::default_min_request_size(),
            cfg,
            cancel,
        );
        base.create(key)
    }

    /// Read handle for the newest version of `s3://bucket/key`.
    pub fn reader(bucket: &str, key: &str) -> Result<Self> {
        Self::reader_with_params(ReaderParams::new(bucket, key))
    }

    /// Read handle for one version of `s3://bucket/key`.
    pub fn reader_versioned(bucket: &str, key: &str, version: &str) -> Result<Self> {
        Self::reader_with_params(ReaderParams::new(bucket, key).with_version(version))
    }

    pub fn reader_with_client(client: Arc<dyn ObjectClient>, bucket: &str, key: &str) -> Result<Self> {
        Self::reader_with_params(ReaderParams::new(bucket, key).with_client(client))
    }

    pub fn reader_with_client_versioned(
        client: Arc<dyn ObjectClient>,
        bucket: &str,
        key: &str,
        version: &str,
    ) -> Result<Self> {
        Self::reader_with_params(
            ReaderParams::new(bucket, key).with_client(client).with_version(version),
        )
    }

    /// Read handle configured by `params`. Probes the object size.
    pub fn reader_with_params(params: ReaderParams) -> Result<Self> {
        let min_request_size = params.effective_min_request_size();
        let client: Arc<dyn ObjectClient> = match params.client {
            Some(c) => c,
            None => Arc::new(AwsObjectClient::from_env()?),
        };
        let base = Self::new_handle(
            client,
            ObjectLocation::new(params.bucket, params.key).with_version(params.version),
            min_request_size,
            UploadConfig::default(),
            params.cancel.unwrap_or_default(),
        );
        base.open("")
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    pub fn bucket(&self) -> &str {
        &self.loc.bucket
    }

    pub fn key(&self) -> &str {
        &self.loc.key
    }

    pub fn version(&self) -> Option<&str> {
        self.loc.version.as_deref()
    }

    /// Object size learned by the HEAD probe, if any.
    pub fn size(&self) -> Option<u64> {
        self.state().file_size
    }

    /// Current cursor. Relative to the end of the object after an end-relative
    /// seek on an object of unknown size.
    pub fn position(&self) -> i64 {
        self.offset
    }

    pub fn min_request_size(&self) -> u64 {
        self.min_request_size
    }

    /// Outcome of the upload, available after a successful [`S3File::close`].
    pub fn upload_info(&self) -> Option<&UploadCompleteInfo> {
        self.upload_info.as_ref()
    }

    fn state(&self) -> RwLockReadGuard<'_, HandleState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn state_mut(&self) -> RwLockWriteGuard<'_, HandleState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record `err` as the handle's write error unless one is already set.
    /// Returns the error that is now latched.
    fn latch(&self, err: SourceError) -> SourceError {
        latch_into(&self.state, &err)
    }

    // -------------------------------------------------------------------------
    // Seek
    // -------------------------------------------------------------------------

    /// Move the cursor for the next `read()`. Has no effect on writes.
    ///
    /// With a known size the target must land in `[0, size]` and the cursor is
    /// stored as an absolute position. With an unknown size nothing is checked
    /// and end-relative offsets stay end-relative.
    pub fn seek(&mut self, offset: i64, whence: Whence) -> Result<i64> {
        let size = self.state().file_size;

        let (target, whence) = match size {
            Some(size) => {
                let size_i = i64::try_from(size).unwrap_or(i64::MAX);
                let target = match whence {
                    Whence::Start => Some(offset),
                    Whence::Current => self.offset.checked_add(offset),
                    Whence::End => size_i.checked_add(offset),
                };
                match target {
                    Some(t) if (0..=size_i).contains(&t) => (t, Whence::Start),
                    _ => return Err(SourceError::InvalidOffset { offset, size }),
                }
            }
            None => match whence {
                Whence::Current => (self.offset.saturating_add(offset), self.whence),
                Whence::End => {
                    if offset > 0 {
                        warn!("{}: end-relative seek to positive offset {} on object of unknown size", self.loc, offset);
                    }
                    (offset, Whence::End)
                }
                Whence::Start => (offset, Whence::Start),
            },
        };

        self.offset = target;
        self.whence = whence;
        self.exhausted = false;
        self.range_drained = false;
        self.close_socket();
        Ok(self.offset)
    }

    // -------------------------------------------------------------------------
    // Read
    // -------------------------------------------------------------------------

    /// Read up to `buf.len()` bytes at the cursor. `Ok(0)` is end of file.
    ///
    /// Reaching the end of one ranged GET is not end of file; the next range
    /// is fetched transparently.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let size = self.state().file_size;

        loop {
            if self.at_eof(size) {
                return Ok(0);
            }

            // Taken out of `self` so every error path leaves no stream behind.
            let mut stream = match self.socket.take() {
                Some(s) => s,
                None => {
                    let want = u64::try_from(buf.len()).unwrap_or(u64::MAX);
                    match self.open_socket(want, size) {
                        Ok(s) => s,
                        // The previous range ended exactly at the object's end.
                        Err(e) if self.range_drained && e.is_range_not_satisfiable() => {
                            debug!("{}: end of object at offset {}", self.loc, self.offset);
                            self.exhausted = true;
                            return Ok(0);
                        }
                        Err(e) => return Err(e),
                    }
                }
            };
            self.range_drained = false;

            if !stream.pending.is_empty() {
                let n = stream.pending.len().min(buf.len());
                buf[..n].copy_from_slice(&stream.pending.split_to(n));
                let n_u64 = u64::try_from(n).unwrap_or(u64::MAX);
                stream.delivered = stream.delivered.saturating_add(n_u64);
                self.offset = self.offset.saturating_add(i64::try_from(n).unwrap_or(i64::MAX));
                self.socket = Some(stream);
                return Ok(n);
            }

            let (mut stream, chunk) = self.next_chunk(stream)?;
            match chunk {
                Some(Ok(bytes)) => {
                    stream.pending = bytes;
                    self.socket = Some(stream);
                }
                Some(Err(e)) => return Err(e),
                None => {
                    // Chunk boundary: the stream is dropped here and the loop
                    // reopens at the cursor unless this was the object's end.
                    if let Some(size) = size {
                        // at_eof() already ruled out cursor >= size.
                        if stream.delivered == 0 {
                            return Err(SourceError::UnexpectedEof { offset: self.offset, size });
                        }
                    } else if stream.delivered == 0 || stream.delivered < stream.requested {
                        self.exhausted = true;
                        return Ok(0);
                    } else {
                        self.range_drained = true;
                    }
                }
            }
        }
    }

    fn at_eof(&self, size: Option<u64>) -> bool {
        if self.exhausted {
            return true;
        }
        match size {
            Some(size) => self.offset >= i64::try_from(size).unwrap_or(i64::MAX),
            // The suffix has been fully consumed.
            None => self.whence == Whence::End && self.offset == 0,
        }
    }

    /// Issue a ranged GET for the next chunk at the cursor.
    fn open_socket(&self, num_bytes: u64, size: Option<u64>) -> Result<OpenStream> {
        let num_bytes = num_bytes.max(self.min_request_size);
        let range = byte_range(self.offset, self.whence, num_bytes, size);
        let requested = range.map(|r| r.len()).unwrap_or(u64::MAX);
        let header = range.map(|r| r.to_string());
        debug!("GET {} range={:?}", self.loc, header);

        let client = self.client.clone();
        let loc = self.loc.clone();
        let token = self.cancel.clone();
        let body = run_on_global_rt(async move {
            with_cancel(&token, client.get_object(&loc, header)).await
        })??;

        Ok(OpenStream {
            body,
            pending: Bytes::new(),
            requested,
            delivered: 0,
        })
    }

    /// Pull the next body chunk. The stream comes back so it can be kept open.
    fn next_chunk(&self, mut stream: OpenStream) -> Result<(OpenStream, Option<Result<Bytes>>)> {
        let token = self.cancel.clone();
        let res = run_on_global_rt(async move {
            let chunk = tokio::select! {
                biased;
                _ = token.cancelled() => Some(Err(SourceError::Cancelled)),
                c = stream.body.next() => c.map(|r| r.map_err(SourceError::from)),
            };
            (stream, chunk)
        })?;
        Ok(res)
    }

    fn close_socket(&mut self) {
        if self.socket.take().is_some() {
            debug!("{}: closed open GET body", self.loc);
        }
    }

    // -------------------------------------------------------------------------
    // Write
    // -------------------------------------------------------------------------

    /// Queue `p` for upload. Blocks while the pipe is full.
    ///
    /// Returns `p.len()` on success. After the first failure every call
    /// returns that same error without writing anything.
    pub fn write(&mut self, p: &[u8]) -> Result<usize> {
        if !self.state().write_opened {
            self.open_write()?;
        }
        if let Some(err) = self.state().err.clone() {
            return Err(err);
        }
        if p.is_empty() {
            return Ok(0);
        }

        let Some(pipe) = self.pipe.clone() else {
            return Err(self.latch(SourceError::Closed));
        };
        let token = self.cancel.clone();
        let chunk = Bytes::copy_from_slice(p);
        let sent = run_on_global_rt(async move {
            tokio::select! {
                biased;
                _ = token.cancelled() => Err(SourceError::Cancelled),
                r = pipe.send(chunk) => r.map_err(|_| SourceError::UploadPipeClosed),
            }
        })
        .map_err(SourceError::from)
        .and_then(|r| r);

        if let Err(e) = sent {
            // The upload task latches its own error before closing the pipe.
            let err = self.latch(e);
            self.pipe = None;
            return Err(err);
        }
        Ok(p.len())
    }

    /// Start the upload task. Called by `create()`, and by `write()` on a
    /// handle that was never write-opened.
    fn open_write(&mut self) -> Result<()> {
        self.upload_cfg.validate()?;

        let state = self.state.clone();
        let upload_cancel = self.cancel.child_token();
        let (tx, done) = spawn_upload(
            self.client.clone(),
            ObjectLocation::new(self.loc.bucket.clone(), self.loc.key.clone()),
            self.upload_cfg.clone(),
            upload_cancel.clone(),
            move |e| {
                latch_into(&state, e);
            },
        )?;

        self.state_mut().write_opened = true;
        self.pipe = Some(tx);
        self.write_done = Some(done);
        self.upload_cancel = Some(upload_cancel);
        debug!("{}: upload started", self.loc);
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Close / Open / Create
    // -------------------------------------------------------------------------

    /// Drop any open GET body; on a writer, signal end of data and wait for
    /// the upload to finish. Returns the upload's error, if any.
    ///
    /// A second call returns `Ok(())`.
    pub fn close(&mut self) -> Result<()> {
        self.close_socket();
        drop(self.pipe.take());

        let Some(done) = self.write_done.take() else {
            return Ok(());
        };
        match run_on_global_rt(done) {
            Ok(Ok(Ok(info))) => {
                self.upload_info = Some(info);
                Ok(())
            }
            Ok(Ok(Err(e))) => Err(self.latch(e)),
            Ok(Err(_)) | Err(_) => Err(self.latch(SourceError::UploadPipeClosed)),
        }
    }

    /// A new read handle at offset 0. Probes the size on first use.
    ///
    /// An empty `name` (what a columnar reader passes) re-opens this key and
    /// shares its size; another name opens that key in the same bucket.
    pub fn open(&self, name: &str) -> Result<S3File> {
        if !name.is_empty() && name != self.loc.key {
            let sibling = self.derive(ObjectLocation::new(self.loc.bucket.clone(), name), HandleState::default());
            sibling.open_read()?;
            return Ok(sibling);
        }

        if !self.state().read_opened {
            self.open_read()?;
        }
        let st = self.state();
        let shared = HandleState {
            read_opened: st.read_opened,
            file_size: st.file_size,
            ..HandleState::default()
        };
        drop(st);
        Ok(self.derive(self.loc.clone(), shared))
    }

    /// A new write handle for `key` in the same bucket, upload already running.
    pub fn create(&self, key: &str) -> Result<S3File> {
        let mut pf = self.derive(
            ObjectLocation::new(self.loc.bucket.clone(), key),
            HandleState::default(),
        );
        pf.open_write()?;
        Ok(pf)
    }

    fn derive(&self, loc: ObjectLocation, state: HandleState) -> S3File {
        let mut pf = Self::new_handle(
            self.client.clone(),
            loc,
            self.min_request_size,
            self.upload_cfg.clone(),
            self.cancel.clone(),
        );
        pf.state = Arc::new(RwLock::new(state));
        pf
    }

    /// HEAD the object and record its size.
    fn open_read(&self) -> Result<()> {
        let client = self.client.clone();
        let loc = self.loc.clone();
        let token = self.cancel.clone();
        let head = run_on_global_rt(async move {
            with_cancel(&token, client.head_object(&loc)).await
        })??;
        debug!("{}: HEAD content_length={:?}", self.loc, head.content_length);

        let mut st = self.state_mut();
        st.read_opened = true;
        st.file_size = head.content_length;
        Ok(())
    }
}

fn latch_into(state: &RwLock<HandleState>, err: &SourceError) -> SourceError {
    let mut st = state.write().unwrap_or_else(PoisonError::into_inner);
    st.err.get_or_insert_with(|| err.clone()).clone()
}

impl Drop for S3File {
    fn drop(&mut self) {
        // Dropped without close(): abandon the upload rather than commit a
        // truncated object.
        if self.write_done.is_some() {
            if let Some(token) = &self.upload_cancel {
                token.cancel();
            }
        }
    }
}

impl std::fmt::Debug for S3File {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3File")
            .field("loc", &self.loc)
            .field("offset", &self.offset)
            .field("whence", &self.whence)
            .field("min_request_size", &self.min_request_size)
            .field("stream_open", &self.socket.is_some())
            .field("state", &*self.state())
            .finish()
    }
}

impl ParquetFile for S3File {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        S3File::read(self, buf)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        S3File::write(self, buf)
    }

    fn seek(&mut self, offset: i64, whence: Whence) -> Result<i64> {
        S3File::seek(self, offset, whence)
    }

    fn close(&mut self) -> Result<()> {
        S3File::close(self)
    }

    fn open(&self, name: &str) -> Result<Box<dyn ParquetFile>> {
        Ok(Box::new(S3File::open(self, name)?))
    }

    fn create(&self, name: &str) -> Result<Box<dyn ParquetFile>> {
        Ok(Box::new(S3File::create(self, name)?))
    }
}

impl io::Read for S3File {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        S3File::read(self, buf).map_err(io::Error::from)
    }
}

impl io::Write for S3File {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        S3File::write(self, buf).map_err(io::Error::from)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl io::Seek for S3File {
    fn seek(&mut self, pos: io::SeekFrom) -> io::Result<u64> {
        let (offset, whence) = match pos {
            io::SeekFrom::Start(n) => (
                i64::try_from(n).map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "offset overflows i64"))?,
                Whence::Start,
            ),
            io::SeekFrom::Current(n) => (n, Whence::Current),
            io::SeekFrom::End(n) => (n, Whence::End),
        };
        let pos = S3File::seek(self, offset, whence)?;
        u64::try_from(pos).map_err(|_| {
            io::Error::new(io::ErrorKind::InvalidInput, "position is end-relative; object size unknown")
        })
    }
}
