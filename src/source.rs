// src/source.rs
//
// Copyright, 2025.  Signal65 / Futurum Group.
//
//! The file contract a columnar reader/writer programs against.
//!
//! Backends ([`crate::S3File`], [`crate::BufferFile`]) are interchangeable
//! behind `Box<dyn ParquetFile>`.

use crate::error::{Result, SourceError};
use crate::range::Whence;

pub trait ParquetFile: Send {
    /// Read up to `buf.len()` bytes. `Ok(0)` means end of file.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    fn write(&mut self, buf: &[u8]) -> Result<usize>;

    /// Returns the new offset.
    fn seek(&mut self, offset: i64, whence: Whence) -> Result<i64>;

    fn close(&mut self) -> Result<()>;

    /// A fresh, independent handle for reading `name`.
    fn open(&self, name: &str) -> Result<Box<dyn ParquetFile>>;

    /// A fresh handle for writing `name`.
    fn create(&self, name: &str) -> Result<Box<dyn ParquetFile>>;

    /// Read until `buf` is full or the file ends. Returns the bytes read.
    fn read_full(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.read(&mut buf[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        Ok(filled)
    }

    /// Write all of `buf`.
    fn write_full(&mut self, mut buf: &[u8]) -> Result<()> {
        while !buf.is_empty() {
            let n = self.write(buf)?;
            if n == 0 {
                return Err(SourceError::Closed);
            }
            buf = &buf[n..];
        }
        Ok(())
    }
}
