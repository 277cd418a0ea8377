// src/lib.rs
//
// Copyright, 2025.  Signal65 / Futurum Group.
//
// Crate root — public re-exports.

pub mod constants;
pub mod config;
pub mod error;
pub mod range;
pub mod source;

pub mod s3_client;
pub mod s3_utils;
pub mod object_client;
pub mod uploader;
pub mod s3_file;
pub mod buffer_file;

pub use crate::buffer_file::BufferFile;
pub use crate::config::{ReaderParams, UploadConfig};
pub use crate::error::{Result, SourceError};
pub use crate::object_client::{
    AwsObjectClient,
    ObjectBody,
    ObjectClient,
    ObjectHead,
    ObjectLocation,
    PutOptions,
    RangeNotSatisfiable,
};
pub use crate::range::{byte_range, ByteRange, Whence};
pub use crate::s3_file::S3File;
pub use crate::s3_utils::{parse_s3_object_uri, parse_s3_uri};
pub use crate::source::ParquetFile;
pub use crate::uploader::UploadCompleteInfo;
