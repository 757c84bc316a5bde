//! Argo CD application endpoints.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::client::{ArgoClient, decode_json};
use crate::context::RequestContext;
use crate::error::{ApiError, ErrorCategory};
use crate::retry::Retry;
use crate::watch::{WatchEnd, WatchMessage, run_watch};

const APPS: &str = "/api/v1/applications";
const STREAM_APPS: &str = "/api/v1/stream/applications";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,
}

/// An Argo CD application. Only the metadata is typed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Application {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: Value,
    #[serde(default)]
    pub status: Value,
}

impl Application {
    /// `status.health.status`, when reported.
    #[must_use]
    pub fn health(&self) -> Option<&str> {
        self.status.pointer("/health/status").and_then(Value::as_str)
    }

    /// `status.sync.status`, when reported.
    #[must_use]
    pub fn sync_status(&self) -> Option<&str> {
        self.status.pointer("/sync/status").and_then(Value::as_str)
    }
}

#[derive(Debug, Default, Deserialize)]
struct ApplicationList {
    #[serde(default)]
    items: Option<Vec<Application>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum WatchEventKind {
    Added,
    Modified,
    Deleted,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ApplicationWatchEvent {
    #[serde(rename = "type")]
    pub kind: WatchEventKind,
    pub application: Application,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceNode {
    #[serde(default)]
    pub group: String,
    #[serde(default)]
    pub version: String,
    pub kind: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default)]
    pub uid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parent_refs: Vec<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceTree {
    #[serde(default)]
    pub nodes: Vec<ResourceNode>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    #[serde(default)]
    pub logged_in: bool,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub iss: String,
    #[serde(default)]
    pub groups: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncOptions {
    #[serde(skip_serializing_if = "is_false")]
    pub prune: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub dry_run: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_namespace: Option<String>,
}

/// How Kubernetes removes an application's resources on a cascading delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropagationPolicy {
    Foreground,
    Background,
    Orphan,
}

impl PropagationPolicy {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Foreground => "foreground",
            Self::Background => "background",
            Self::Orphan => "orphan",
        }
    }
}

/// Query options for [`ApplicationService::delete_application`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteOptions {
    /// Also delete the application's managed resources.
    pub cascade: bool,
    pub propagation_policy: Option<PropagationPolicy>,
    pub app_namespace: Option<String>,
}

impl Default for DeleteOptions {
    fn default() -> Self {
        Self {
            cascade: true,
            propagation_policy: None,
            app_namespace: None,
        }
    }
}

/// Target of [`ApplicationService::rollback_application`]: a deployment
/// history id of the application.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RollbackOptions {
    pub id: i64,
    pub prune: bool,
    pub dry_run: bool,
    pub app_namespace: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RollbackBody<'a> {
    id: i64,
    name: &'a str,
    #[serde(skip_serializing_if = "is_false")]
    dry_run: bool,
    #[serde(skip_serializing_if = "is_false")]
    prune: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    app_namespace: Option<&'a str>,
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_false(value: &bool) -> bool {
    !*value
}

/// Application queries, mutations and watches.
#[derive(Debug, Clone)]
pub struct ApplicationService<R: Retry> {
    client: ArgoClient<R>,
}

impl<R: Retry> ApplicationService<R> {
    #[must_use]
    pub fn new(client: ArgoClient<R>) -> Self {
        Self { client }
    }

    #[must_use]
    pub fn client(&self) -> &ArgoClient<R> {
        &self.client
    }

    /// # Errors
    /// Request failures, or `RESPONSE_DECODE_FAILED`.
    pub async fn list_applications(&self, ctx: &RequestContext) -> Result<Vec<Application>, ApiError> {
        let list: ApplicationList = self.client.get_json(ctx, APPS).await?;
        let apps = list.items.unwrap_or_default();
        debug!(count = apps.len(), "listed applications");
        Ok(apps)
    }

    /// # Errors
    /// Request failures, or `RESPONSE_DECODE_FAILED`.
    pub async fn get_application(
        &self,
        ctx: &RequestContext,
        name: &str,
        app_namespace: Option<&str>,
    ) -> Result<Application, ApiError> {
        let path = app_path(name, "", app_namespace);
        self.client.get_json(ctx, &path).await
    }

    /// # Errors
    /// Request failures, or `RESPONSE_DECODE_FAILED`.
    pub async fn get_resource_tree(
        &self,
        ctx: &RequestContext,
        name: &str,
        app_namespace: Option<&str>,
    ) -> Result<ResourceTree, ApiError> {
        let path = app_path(name, "/resource-tree", app_namespace);
        self.client.get_json(ctx, &path).await
    }

    /// Trigger a sync of one application.
    ///
    /// # Errors
    /// Request failures.
    pub async fn sync_application(
        &self,
        ctx: &RequestContext,
        name: &str,
        options: &SyncOptions,
    ) -> Result<(), ApiError> {
        let path = app_path(name, "/sync", options.app_namespace.as_deref());
        self.client.post(ctx, &path, options).await?;
        info!(app = name, prune = options.prune, dry_run = options.dry_run, "sync requested");
        Ok(())
    }

    /// Delete one application.
    ///
    /// # Errors
    /// `MISSING_APP_NAME` for an empty name, or request failures; a
    /// conflicting delete (for example pending finalizers) is a recoverable
    /// validation error.
    pub async fn delete_application(
        &self,
        ctx: &RequestContext,
        name: &str,
        options: &DeleteOptions,
    ) -> Result<(), ApiError> {
        require_name(name)?;
        let path = with_query(
            format!("{APPS}/{}", urlencoding::encode(name)),
            &[
                ("cascade", if options.cascade { "true" } else { "false" }),
                (
                    "propagationPolicy",
                    options.propagation_policy.map_or("", PropagationPolicy::as_str),
                ),
                ("appNamespace", options.app_namespace.as_deref().unwrap_or_default()),
            ],
        );
        self.client.delete(ctx, &path).await?;
        info!(app = name, cascade = options.cascade, "application deleted");
        Ok(())
    }

    /// Roll an application back to an earlier deployment.
    ///
    /// # Errors
    /// `MISSING_APP_NAME` for an empty name, or request failures.
    pub async fn rollback_application(
        &self,
        ctx: &RequestContext,
        name: &str,
        options: &RollbackOptions,
    ) -> Result<(), ApiError> {
        require_name(name)?;
        let namespace = options.app_namespace.as_deref();
        let path = app_path(name, "/rollback", namespace);
        let body = RollbackBody {
            id: options.id,
            name,
            dry_run: options.dry_run,
            prune: options.prune,
            app_namespace: namespace,
        };
        self.client
            .post(ctx, &path, &body)
            .await
            .map_err(|e| e.with_context("deploymentId", options.id))?;
        info!(app = name, id = options.id, dry_run = options.dry_run, "rollback requested");
        Ok(())
    }

    /// Verify the session; fails with an auth error when the token is rejected.
    ///
    /// # Errors
    /// Request failures, or `RESPONSE_DECODE_FAILED`.
    pub async fn get_user_info(&self, ctx: &RequestContext) -> Result<UserInfo, ApiError> {
        self.client.get_json(ctx, "/api/v1/session/userinfo").await
    }

    /// Stream application changes into `tx` until the server closes the
    /// stream or `ctx` is cancelled.
    ///
    /// `ctx` bounds the stream open; afterwards only its cancellation token
    /// is observed.
    ///
    /// # Errors
    /// Open failures, or the failure that ended the watch.
    pub async fn watch_applications(
        &self,
        ctx: &RequestContext,
        tx: mpsc::Sender<WatchMessage<ApplicationWatchEvent>>,
    ) -> Result<WatchEnd, ApiError> {
        let reader = self.client.stream(ctx, STREAM_APPS).await?;
        run_watch("applications", reader, tx, ctx.token().clone()).await
    }

    /// Stream resource-tree snapshots of one application.
    ///
    /// # Errors
    /// `MISSING_APP_NAME` for an empty name, open failures, or the failure
    /// that ended the watch.
    pub async fn watch_resource_tree(
        &self,
        ctx: &RequestContext,
        name: &str,
        app_namespace: Option<&str>,
        tx: mpsc::Sender<WatchMessage<ResourceTree>>,
    ) -> Result<WatchEnd, ApiError> {
        require_name(name)?;
        let path = resource_path(STREAM_APPS, name, "/resource-tree", app_namespace);
        let reader = self.client.stream(ctx, &path).await?;
        let label = format!("resource-tree/{name}");
        run_watch(&label, reader, tx, ctx.token().clone()).await
    }
}

/// Decode an application from a raw JSON body.
///
/// # Errors
/// `RESPONSE_DECODE_FAILED` when the body is not an application.
pub fn parse_application(body: &[u8]) -> Result<Application, ApiError> {
    decode_json(body, "application")
}

fn app_path(name: &str, suffix: &str, app_namespace: Option<&str>) -> String {
    resource_path(APPS, name, suffix, app_namespace)
}

fn resource_path(base: &str, name: &str, suffix: &str, app_namespace: Option<&str>) -> String {
    with_query(
        format!("{base}/{}{suffix}", urlencoding::encode(name)),
        &[("appNamespace", app_namespace.unwrap_or_default())],
    )
}

/// Append the non-empty parameters, percent-encoding values.
fn with_query(mut path: String, params: &[(&str, &str)]) -> String {
    let mut separator = '?';
    for (key, value) in params.iter().filter(|(_, value)| !value.is_empty()) {
        path.push(separator);
        path.push_str(key);
        path.push('=');
        path.push_str(&urlencoding::encode(value));
        separator = '&';
    }
    path
}

fn require_name(name: &str) -> Result<(), ApiError> {
    if name.trim().is_empty() {
        return Err(ApiError::new(
            ErrorCategory::Validation,
            "MISSING_APP_NAME",
            "Application name is required",
        ));
    }
    Ok(())
}
