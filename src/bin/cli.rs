//
// Copyright, 2025.  Signal65 / Futurum Group.
//
//! CLI over the seekable S3 file handle: `stat`, `cat` and `put`.
//!
//! Examples:
//! ```bash
//! s3source-cli stat  s3://bucket/data/part-0.parquet
//! s3source-cli cat   s3://bucket/data/part-0.parquet --from-end --offset 8    # parquet footer
//! s3source-cli cat   s3://bucket/log.txt --offset 100 --length 64
//! s3source-cli put   s3://bucket/data/out.parquet ./out.parquet --part-size 8388608
//! cat big.bin | s3source-cli put s3://bucket/big.bin
//! ```

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use std::fs::File;
use std::io::{self, ErrorKind, Read, Write};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Instant;
use tracing::info;
use tracing_subscriber::EnvFilter;

use s3source::{parse_s3_object_uri, ReaderParams, S3File, UploadConfig, Whence};

/// Buffer size for copying between local streams and a handle.
const COPY_BUF_SIZE: usize = 1024 * 1024;

/// Macro to safely print with broken pipe handling
macro_rules! safe_println {
    ($($arg:tt)*) => {
        match writeln!(io::stdout(), $($arg)*) {
            Ok(_) => {},
            Err(e) if e.kind() == ErrorKind::BrokenPipe => {
                // Gracefully exit on broken pipe (e.g., when piped to head/tail)
                std::process::exit(0);
            }
            Err(e) => return Err(e.into())
        }
    };
}

// --- S3Path: `s3://bucket/key` parsed by clap.
#[derive(Clone, Debug)]
struct S3Path {
    bucket: String,
    key: String,
}

impl FromStr for S3Path {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (bucket, key) = parse_s3_object_uri(s)?;
        Ok(S3Path { bucket, key })
    }
}

// -- Commands

#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[arg(short = 'v',
        long,
        action = ArgAction::Count,
        help = "Increase log verbosity: -v = Info, -vv = Debug",
    )]
    verbose: u8,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the size of an object.
    Stat {
        /// S3 URI of the object (e.g. s3://bucket/key)
        uri: S3Path,

        /// Object version to inspect.
        #[arg(long = "version-id")]
        version_id: Option<String>,
    },

    /// Write an object, or a range of it, to stdout.
    Cat {
        /// S3 URI of the object (e.g. s3://bucket/key)
        uri: S3Path,

        /// Start offset in bytes.
        #[arg(long, default_value_t = 0)]
        offset: i64,

        /// Count `--offset` back from the end of the object.
        #[arg(long = "from-end")]
        from_end: bool,

        /// Stop after this many bytes.
        #[arg(long)]
        length: Option<u64>,

        /// Minimum bytes per ranged GET.
        #[arg(long = "min-request-size")]
        min_request_size: Option<u64>,

        /// Object version to read.
        #[arg(long = "version-id")]
        version_id: Option<String>,
    },

    /// Upload a local file, or stdin, to an object.
    Put {
        /// Destination S3 URI (e.g. s3://bucket/key)
        uri: S3Path,

        /// Local file; stdin when omitted.
        file: Option<PathBuf>,

        /// Multipart part size in bytes (minimum 5 MiB).
        #[arg(long = "part-size")]
        part_size: Option<usize>,

        /// Concurrent part uploads.
        #[arg(short = 'j', long = "concurrency")]
        concurrency: Option<usize>,

        /// Content-Type stored with the object.
        #[arg(long = "content-type")]
        content_type: Option<String>,
    },
}

fn main() -> Result<()> {
    // Loads any variables from .env file that are not already set
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    // Logs go to stderr so `cat` output stays clean.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    // Bridge `log` records from the AWS SDK's dependencies into tracing
    tracing_log::LogTracer::init().ok();

    match cli.cmd {
        Command::Stat { uri, version_id } => stat_cmd(&uri, version_id)?,

        Command::Cat { uri, offset, from_end, length, min_request_size, version_id } => {
            if offset < 0 {
                bail!("--offset must not be negative; use --from-end to count from the end");
            }
            let mut params = ReaderParams::new(&uri.bucket, &uri.key);
            if let Some(v) = version_id {
                params = params.with_version(v);
            }
            if let Some(n) = min_request_size {
                params = params.with_min_request_size(n);
            }
            let (offset, whence) = if from_end { (-offset, Whence::End) } else { (offset, Whence::Start) };
            cat_cmd(params, offset, whence, length)?;
        }

        Command::Put { uri, file, part_size, concurrency, content_type } => {
            let mut cfg = UploadConfig::from_env();
            if let Some(n) = part_size {
                cfg = cfg.with_part_size(n);
            }
            if let Some(n) = concurrency {
                cfg = cfg.with_max_in_flight(n);
            }
            if let Some(ct) = content_type {
                cfg = cfg.with_content_type(ct);
            }
            put_cmd(&uri, file, cfg)?;
        }
    }

    Ok(())
}

fn stat_cmd(uri: &S3Path, version_id: Option<String>) -> Result<()> {
    let f = match version_id {
        Some(v) => S3File::reader_versioned(&uri.bucket, &uri.key, &v)?,
        None => S3File::reader(&uri.bucket, &uri.key)?,
    };
    safe_println!("Object: s3://{}/{}", f.bucket(), f.key());
    if let Some(v) = f.version() {
        safe_println!("Version: {}", v);
    }
    match f.size() {
        Some(size) => { safe_println!("Size: {}", size); }
        None => { safe_println!("Size: unknown"); }
    }
    Ok(())
}

fn cat_cmd(params: ReaderParams, offset: i64, whence: Whence, length: Option<u64>) -> Result<()> {
    let mut f = S3File::reader_with_params(params)?;
    f.seek(offset, whence)?;

    let t0 = Instant::now();
    let mut remaining = length.unwrap_or(u64::MAX);
    let mut buf = vec![0u8; COPY_BUF_SIZE];
    let mut total = 0u64;
    let mut out = io::stdout().lock();

    while remaining > 0 {
        let want = remaining.min(buf.len() as u64) as usize;
        let n = f.read(&mut buf[..want])?;
        if n == 0 {
            break;
        }
        match out.write_all(&buf[..n]) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::BrokenPipe => break,
            Err(e) => return Err(e.into()),
        }
        total += n as u64;
        remaining -= n as u64;
    }
    out.flush().ok();
    f.close()?;

    info!("read {} bytes from s3://{}/{} in {:?}", total, f.bucket(), f.key(), t0.elapsed());
    Ok(())
}

fn put_cmd(uri: &S3Path, file: Option<PathBuf>, cfg: UploadConfig) -> Result<()> {
    let mut input: Box<dyn Read> = match &file {
        Some(path) => Box::new(
            File::open(path).with_context(|| format!("cannot open {}", path.display()))?,
        ),
        None => Box::new(io::stdin().lock()),
    };

    let t0 = Instant::now();
    let mut f = S3File::writer(&uri.bucket, &uri.key, cfg)?;
    let mut buf = vec![0u8; COPY_BUF_SIZE];
    loop {
        let n = match input.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        f.write(&buf[..n])?;
    }
    f.close()?;

    let elapsed = t0.elapsed();
    if let Some(info) = f.upload_info() {
        let mib = info.total_bytes as f64 / (1024.0 * 1024.0);
        safe_println!(
            "Uploaded {} bytes to s3://{}/{} ({} parts) in {:?} ({:.2} MiB/s)",
            info.total_bytes,
            uri.bucket,
            uri.key,
            info.parts,
            elapsed,
            mib / elapsed.as_secs_f64().max(f64::EPSILON),
        );
        if let Some(etag) = &info.e_tag {
            safe_println!("ETag: {}", etag);
        }
    }
    Ok(())
}
