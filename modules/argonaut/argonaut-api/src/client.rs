use std::sync::Arc;

use bytes::Bytes;
use http::Method;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::config::ClientConfig;
use crate::context::RequestContext;
use crate::error::{ApiError, ErrorCategory};
use crate::executor::{EventStream, RequestExecutor};
use crate::retry::{NoRetry, Retry};

/// Argo CD API client.
///
/// Plain calls run through the retry policy `R`; stream opens never do.
/// Cloning is cheap and shares the connection pools.
#[derive(Debug)]
pub struct ArgoClient<R = NoRetry> {
    executor: Arc<RequestExecutor>,
    retry: R,
}

impl<R: Clone> Clone for ArgoClient<R> {
    fn clone(&self) -> Self {
        Self {
            executor: Arc::clone(&self.executor),
            retry: self.retry.clone(),
        }
    }
}

impl ArgoClient<NoRetry> {
    /// Create a client that makes a single attempt per call.
    ///
    /// # Errors
    /// Fails when the server URL is invalid or a transport cannot be built.
    pub fn from_config(config: &ClientConfig) -> Result<Self, ApiError> {
        Ok(Self {
            executor: Arc::new(RequestExecutor::new(config)?),
            retry: NoRetry,
        })
    }
}

impl<R: Retry> ArgoClient<R> {
    /// Swap the retry policy.
    #[must_use]
    pub fn with_retry<P: Retry>(self, retry: P) -> ArgoClient<P> {
        ArgoClient {
            executor: self.executor,
            retry,
        }
    }

    #[must_use]
    pub fn executor(&self) -> &RequestExecutor {
        &self.executor
    }

    /// # Errors
    /// See [`RequestExecutor::execute`].
    pub async fn get(&self, ctx: &RequestContext, path: &str) -> Result<Bytes, ApiError> {
        self.call(ctx, Method::GET, path, None::<&()>).await
    }

    /// # Errors
    /// See [`RequestExecutor::execute`].
    pub async fn post<B>(&self, ctx: &RequestContext, path: &str, body: &B) -> Result<Bytes, ApiError>
    where
        B: Serialize + Sync + ?Sized,
    {
        self.call(ctx, Method::POST, path, Some(body)).await
    }

    /// # Errors
    /// See [`RequestExecutor::execute`].
    pub async fn put<B>(&self, ctx: &RequestContext, path: &str, body: &B) -> Result<Bytes, ApiError>
    where
        B: Serialize + Sync + ?Sized,
    {
        self.call(ctx, Method::PUT, path, Some(body)).await
    }

    /// # Errors
    /// See [`RequestExecutor::execute`].
    pub async fn delete(&self, ctx: &RequestContext, path: &str) -> Result<Bytes, ApiError> {
        self.call(ctx, Method::DELETE, path, None::<&()>).await
    }

    /// GET and decode a JSON response.
    ///
    /// # Errors
    /// As [`ArgoClient::get`], plus `RESPONSE_DECODE_FAILED` when the body
    /// does not match `T`.
    pub async fn get_json<T: DeserializeOwned>(&self, ctx: &RequestContext, path: &str) -> Result<T, ApiError> {
        let body = self.get(ctx, path).await?;
        decode_json(&body, path)
    }

    /// Open a server-sent events subscription. Never retried.
    ///
    /// # Errors
    /// See [`RequestExecutor::open_stream`].
    pub async fn stream(&self, ctx: &RequestContext, path: &str) -> Result<EventStream, ApiError> {
        self.executor.open_stream(ctx, path).await
    }

    async fn call<B>(
        &self,
        ctx: &RequestContext,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<Bytes, ApiError>
    where
        B: Serialize + Sync + ?Sized,
    {
        let label = format!("{method} {path}");
        let executor = &*self.executor;
        self.retry
            .retry(ctx, &label, move |attempt| {
                let method = method.clone();
                async move {
                    if attempt > 1 {
                        tracing::debug!(%method, path, attempt, "retrying request");
                    }
                    executor.execute(ctx, method, path, body).await
                }
            })
            .await
    }
}

pub fn decode_json<T: DeserializeOwned>(body: &[u8], path: &str) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|e| {
        ApiError::new(
            ErrorCategory::Internal,
            "RESPONSE_DECODE_FAILED",
            format!("Failed to decode response: {e}"),
        )
        .with_context("path", path)
    })
}
