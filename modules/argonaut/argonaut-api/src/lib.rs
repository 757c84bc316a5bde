//! Argo CD API client with bounded-memory event streams
//!
//! Talks to the Argo CD control plane over plain HTTP calls and long-lived
//! server-sent event subscriptions:
//!
//! - Plain calls run through a pluggable [`Retry`] policy and fail fast when
//!   the server does not answer with headers in time
//! - Subscriptions never time out waiting for the first event
//! - Event framing adapts its buffers to event size and refuses events past
//!   a configured ceiling instead of growing without bound
//! - Every failure is an [`ApiError`] with a category, a code, and a
//!   suggested action
//!
//! # Examples
//!
//! ## Listing applications
//!
//! ```no_run
//! use argonaut_api::{ApplicationService, ArgoClient, ClientConfig, FixedRetry, RequestContext};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ClientConfig::from_env()?;
//! let client = ArgoClient::from_config(&config)?.with_retry(FixedRetry::default());
//! let apps = ApplicationService::new(client);
//!
//! let ctx = RequestContext::with_timeout(Duration::from_secs(10));
//! for app in apps.list_applications(&ctx).await? {
//!     println!("{} {:?}", app.metadata.name, app.health());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Watching applications
//!
//! ```no_run
//! use argonaut_api::{ApplicationService, ArgoClient, ClientConfig, RequestContext, WatchMessage};
//! use tokio::sync::mpsc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ClientConfig::from_env()?;
//! let apps = ApplicationService::new(ArgoClient::from_config(&config)?);
//!
//! let ctx = RequestContext::new();
//! let (tx, mut rx) = mpsc::channel(64);
//! let watcher = ctx.clone();
//! tokio::spawn(async move { apps.watch_applications(&watcher, tx).await });
//!
//! while let Some(message) = rx.recv().await {
//!     match message {
//!         WatchMessage::Event(event) => println!("{:?} {}", event.kind, event.application.metadata.name),
//!         WatchMessage::Failed(err) => eprintln!("watch failed: {err}"),
//!     }
//! }
//! # Ok(())
//! # }
//! ```

mod applications;
mod classify;
mod client;
mod config;
mod context;
mod error;
mod executor;
mod retry;
pub mod sse;
mod trust;
mod watch;

// Re-export public API
pub use applications::{
    Application, ApplicationService, ApplicationWatchEvent, DeleteOptions, ObjectMeta,
    PropagationPolicy, ResourceNode, ResourceTree, RollbackOptions, SyncOptions, UserInfo,
    WatchEventKind, parse_application,
};
pub use classify::classify_status;
pub use client::ArgoClient;
pub use config::{ClientConfig, TimeoutConfig};
pub use context::RequestContext;
pub use error::{ApiError, ErrorCategory, StreamError};
pub use executor::{EventBody, EventStream, RequestExecutor, sanitize_url};
pub use retry::{FixedRetry, NoRetry, Retry};
pub use trust::{MinTlsVersion, TlsConfig};
pub use watch::{WatchEnd, WatchMessage, decode_event, run_watch};

// Re-export commonly used types from dependencies
pub use http::{Method, StatusCode};
pub use tokio_util::sync::CancellationToken;
