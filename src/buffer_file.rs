// src/buffer_file.rs
//
// Copyright, 2025.  Signal65 / Futurum Group.
//
// In-memory backend of the file contract: a growable byte vector and a cursor.

use crate::error::{Result, SourceError};
use crate::range::Whence;
use crate::source::ParquetFile;

/// Initial capacity of [`BufferFile::new`] (bytes)
pub const DEFAULT_CAPACITY: usize = 512;

/// Reads and writes a memory buffer.
#[derive(Debug, Clone, Default)]
pub struct BufferFile {
    buf: Vec<u8>,
    loc: usize,
}

impl BufferFile {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(cap: usize) -> Self {
        Self { buf: Vec::with_capacity(cap), loc: 0 }
    }

    /// Copies `data`.
    pub fn from_bytes(data: &[u8]) -> Self {
        Self { buf: data.to_vec(), loc: 0 }
    }

    /// Takes ownership of `data` without copying.
    pub fn from_vec(data: Vec<u8>) -> Self {
        Self { buf: data, loc: 0 }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Targets past the end are clamped to the end; negative targets fail and
    /// leave the cursor where it was.
    pub fn seek(&mut self, offset: i64, whence: Whence) -> Result<i64> {
        let base = match whence {
            Whence::Start => 0,
            Whence::Current => self.loc as i64,
            Whence::End => self.buf.len() as i64,
        };
        let target = base.saturating_add(offset);
        if target < 0 {
            return Err(SourceError::NegativeOffset(target));
        }
        self.loc = (target as u64).min(self.buf.len() as u64) as usize;
        Ok(self.loc as i64)
    }

    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let avail = &self.buf[self.loc..];
        let n = avail.len().min(buf.len());
        buf[..n].copy_from_slice(&avail[..n]);
        self.loc += n;
        Ok(n)
    }

    /// Overwrites at the cursor, growing the buffer as needed.
    pub fn write(&mut self, p: &[u8]) -> Result<usize> {
        let end = self.loc + p.len();
        if end > self.buf.len() {
            self.buf.resize(end, 0);
        }
        self.buf[self.loc..end].copy_from_slice(p);
        self.loc = end;
        Ok(p.len())
    }
}

impl ParquetFile for BufferFile {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        BufferFile::read(self, buf)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        BufferFile::write(self, buf)
    }

    fn seek(&mut self, offset: i64, whence: Whence) -> Result<i64> {
        BufferFile::seek(self, offset, whence)
    }

    // Nothing to release.
    fn close(&mut self) -> Result<()> {
        Ok(())
    }

    fn open(&self, _name: &str) -> Result<Box<dyn ParquetFile>> {
        Ok(Box::new(BufferFile::from_bytes(&self.buf)))
    }

    fn create(&self, _name: &str) -> Result<Box<dyn ParquetFile>> {
        Ok(Box::new(BufferFile::new()))
    }
}
