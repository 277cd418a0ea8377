// src/s3_client.rs
//
// Copyright, 2025.  Signal65 / Futurum Group.
//
//! Global Tokio runtime and default S3 client.
//!
//! File handles expose a blocking API; every remote call hops onto one
//! background multi-thread runtime through [`run_on_global_rt`], and write
//! handles spawn their upload task there with [`spawn_on_global_rt`].

use anyhow::{Context, Result};
use aws_config::meta::region::RegionProviderChain;
use aws_config::timeout::TimeoutConfig;
use aws_sdk_s3::{config::Region, Client};
use aws_smithy_http_client::tls;
use aws_smithy_http_client::tls::rustls_provider::CryptoMode;
use std::future::Future;
use std::path::Path;
use std::sync::mpsc;
use std::{env, fs, thread, time::Duration};
use tokio::runtime::{Builder as TokioBuilder, Handle};
use tokio::sync::{oneshot, OnceCell};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::constants::{
    DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_OPERATION_TIMEOUT_SECS, ENV_OPERATION_TIMEOUT_SECS,
    ENV_RT_THREADS,
};
use crate::error::SourceError;


// -----------------------------------------------------------------------------
// Constants
// -----------------------------------------------------------------------------
pub const DEFAULT_REGION: &str     = "us-east-1";


// -----------------------------------------------------------------------------
// Background runtime and shared client, both created on first use
// -----------------------------------------------------------------------------
static RT_HANDLE: once_cell::sync::OnceCell<Handle> = once_cell::sync::OnceCell::new();
static CLIENT: OnceCell<Client> = OnceCell::const_new();


/// Handle of the background runtime. The runtime lives on its own thread for
/// the rest of the process.
fn global_rt_handle() -> Result<&'static Handle> {
    RT_HANDLE.get_or_try_init(|| {
        let (tx, rx) = mpsc::sync_channel::<std::io::Result<Handle>>(1);
        thread::Builder::new()
            .name("s3source-rt".to_string())
            .spawn(move || {
                let threads = get_runtime_threads();
                debug!("starting s3source runtime, {} workers", threads);

                let rt = match TokioBuilder::new_multi_thread()
                    .enable_io()
                    .enable_time()
                    .worker_threads(threads)
                    .thread_name("s3source-rt-worker")
                    .build()
                {
                    Ok(rt) => rt,
                    Err(e) => {
                        let _ = tx.send(Err(e));
                        return;
                    }
                };
                if tx.send(Ok(rt.handle().clone())).is_err() {
                    return;
                }
                rt.block_on(std::future::pending::<()>());
            })
            .context("cannot spawn the s3source runtime thread")?;

        rx.recv()
            .context("s3source runtime thread exited during startup")?
            .context("cannot build the s3source runtime")
    })
}

/// Worker thread count, `S3SOURCE_RT_THREADS` wins over the core-based default.
fn get_runtime_threads() -> usize {
    env::var(ENV_RT_THREADS)
        .ok()
        .and_then(|s| s.parse().ok())
        .filter(|n: &usize| *n > 0)
        .unwrap_or_else(|| num_cpus::get().clamp(2, 16))
}


/// Block the calling thread on `fut`, which runs on the background runtime.
/// Callable from plain threads and from async code alike.
///
/// Fails only if the runtime is unavailable or the task was lost.
pub fn run_on_global_rt<F, T>(fut: F) -> Result<T>
where
    F: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let handle = global_rt_handle()?;
    if Handle::try_current().is_ok() {
        // Inside a runtime a tokio oneshot cannot be waited on synchronously.
        let (tx, rx) = mpsc::channel();
        handle.spawn(async move {
            let _ = tx.send(fut.await);
        });
        return rx.recv().context("task on the s3source runtime ended without a result");
    }
    let (tx, rx) = oneshot::channel();
    handle.spawn(async move {
        let _ = tx.send(fut.await);
    });
    rx.blocking_recv().context("task on the s3source runtime ended without a result")
}

/// Start `fut` on the background runtime without waiting for it.
pub fn spawn_on_global_rt<F>(fut: F) -> Result<JoinHandle<F::Output>>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    Ok(global_rt_handle()?.spawn(fut))
}

/// Await `fut` unless `token` fires first. Remote errors become
/// [`SourceError::Backend`] unchanged.
pub async fn with_cancel<F, T>(token: &CancellationToken, fut: F) -> Result<T, SourceError>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(SourceError::Cancelled),
        res = fut => res.map_err(SourceError::from),
    }
}


// -----------------------------------------------------------------------------
// Custom CA bundle
// -----------------------------------------------------------------------------

/// TLS context trusting only the certificates in the PEM file at `filename`.
fn tls_context_from_pem(filename: impl AsRef<Path>) -> Result<tls::TlsContext> {
    let pem_contents = fs::read(&filename)
        .with_context(|| format!("cannot read CA bundle {}", filename.as_ref().display()))?;

    let trust_store = tls::TrustStore::empty()
        .with_pem_certificate(pem_contents.as_slice());

    tls::TlsContext::builder()
        .with_trust_store(trust_store)
        .build()
        .with_context(|| format!("CA bundle {} is not a usable trust store", filename.as_ref().display()))
}

/// Per-operation timeout, `S3SOURCE_OPERATION_TIMEOUT_SECS` or five minutes.
fn get_operation_timeout() -> Duration {
    env::var(ENV_OPERATION_TIMEOUT_SECS)
        .ok()
        .and_then(|s| s.parse().ok())
        .map(Duration::from_secs)
        .unwrap_or(Duration::from_secs(DEFAULT_OPERATION_TIMEOUT_SECS))
}


// -----------------------------------------------------------------------------
// Default client
// -----------------------------------------------------------------------------

/// Blocking form of [`aws_s3_client_async`].
pub fn aws_s3_client() -> Result<Client> {
    run_on_global_rt(aws_s3_client_async())?
}

/// The process-wide client. The first caller builds it from the environment;
/// later callers get a clone.
pub async fn aws_s3_client_async() -> Result<Client> {
    let client_ref = CLIENT
        .get_or_try_init(|| async {
            dotenvy::dotenv().ok();

            let http_client = match env::var("AWS_CA_BUNDLE_PATH") {
                Ok(ca_bundle_path) if !ca_bundle_path.is_empty() => {
                    debug!("using CA bundle {}", ca_bundle_path);
                    let tls_context = tls_context_from_pem(&ca_bundle_path)?;
                    Some(aws_smithy_http_client::Builder::new()
                        .tls_provider(tls::Provider::Rustls(CryptoMode::AwsLc))
                        .tls_context(tls_context)
                        .build_https())
                }
                _ => None,
            };

            // AWS_REGION, then the provider chain, then us-east-1.
            let region =
                RegionProviderChain::first_try(env::var("AWS_REGION").ok().map(Region::new))
                    .or_default_provider()
                    .or_else(Region::new(DEFAULT_REGION));

            let mut loader =
                aws_config::defaults(aws_config::BehaviorVersion::latest()).region(region);
            if let Ok(endpoint) = env::var("AWS_ENDPOINT_URL") {
                if !endpoint.is_empty() {
                    loader = loader.endpoint_url(endpoint);
                }
            }

            let timeout_config = TimeoutConfig::builder()
                .connect_timeout(Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS))
                .operation_timeout(get_operation_timeout())
                .build();

            let mut config_builder = loader.timeout_config(timeout_config);
            if let Some(client) = http_client {
                config_builder = config_builder.http_client(client);
            }
            let cfg = config_builder.load().await;

            // Path-style addressing for S3-compatible endpoints (MinIO, Ceph, ...).
            let s3_config = aws_sdk_s3::config::Builder::from(&cfg)
                .force_path_style(true)
                .build();
            Ok::<_, anyhow::Error>(Client::from_conf(s3_config))
        })
        .await?;

    Ok(client_ref.clone())
}
