use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Response, StatusCode, Url};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::collections::HashMap;

use crate::errors::ClientError;
use crate::tfe::models::{
    Capacity, Page, Pagination, QueuedRun, Run, RunActions, RunCreateOptions, RunStatus, Workspace,
};

const JSONAPI_CONTENT_TYPE: &str = "application/vnd.api+json";

/// Abstraction over the remote run service for testability.
/// Real implementation: `HttpClient`. Test double: `tfe::fake::FakeClient`.
#[async_trait]
pub trait RemoteClient: Send + Sync {
    async fn read_workspace(&self, organization: &str, name: &str)
    -> Result<Workspace, ClientError>;

    async fn read_workspace_by_id(&self, workspace_id: &str) -> Result<Workspace, ClientError>;

    async fn create_run(&self, options: RunCreateOptions) -> Result<Run, ClientError>;

    async fn read_run(&self, run_id: &str) -> Result<Run, ClientError>;

    async fn apply_run(&self, run_id: &str, comment: &str) -> Result<(), ClientError>;

    /// One page of a workspace's runs, newest first.
    async fn list_runs(&self, workspace_id: &str, page: u32) -> Result<Page<Run>, ClientError>;

    /// One page of the organization-wide run queue.
    async fn run_queue(&self, organization: &str, page: u32)
    -> Result<Page<QueuedRun>, ClientError>;

    async fn capacity(&self, organization: &str) -> Result<Capacity, ClientError>;
}

/// Settings for the HTTP transport.
#[derive(Debug, Clone, Default)]
pub struct HttpOptions {
    pub user_agent: Option<String>,
    pub insecure_skip_verify: bool,
}

impl HttpOptions {
    pub fn user_agent(&self) -> String {
        self.user_agent
            .clone()
            .unwrap_or_else(|| format!("multispace/{}", env!("CARGO_PKG_VERSION")))
    }

    /// Build the underlying reqwest client.
    pub fn build_http(&self) -> Result<reqwest::Client, ClientError> {
        let mut builder = reqwest::Client::builder().user_agent(self.user_agent());
        if self.insecure_skip_verify {
            tracing::debug!("client configured to skip certificate verification");
            builder = builder.danger_accept_invalid_certs(true);
        }
        Ok(builder.build()?)
    }
}

/// JSON:API client for the remote run service.
#[derive(Debug, Clone)]
pub struct HttpClient {
    http: reqwest::Client,
    base: Url,
    token: String,
}

impl HttpClient {
    /// `base` is the API root, e.g. `https://app.terraform.io/api/v2/`.
    pub fn new(base: Url, token: impl Into<String>, options: &HttpOptions) -> Result<Self, ClientError> {
        Ok(Self::with_http(options.build_http()?, base, token))
    }

    pub fn with_http(http: reqwest::Client, base: Url, token: impl Into<String>) -> Self {
        Self {
            http,
            base,
            token: token.into(),
        }
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn url(&self, segments: &[&str]) -> Result<Url, ClientError> {
        let mut url = self.base.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| ClientError::Discovery(format!("{} cannot be a base URL", self.base)))?;
            path.pop_if_empty().extend(segments);
        }
        Ok(url)
    }

    async fn get<T: DeserializeOwned>(&self, url: Url, page: Option<u32>) -> Result<T, ClientError> {
        let mut request = self
            .http
            .get(url)
            .bearer_auth(&self.token)
            .header(ACCEPT, JSONAPI_CONTENT_TYPE);
        if let Some(page) = page {
            request = request.query(&[("page[number]", page.to_string())]);
        }
        decode(request.send().await?).await
    }

    async fn post(&self, url: Url, body: &Value) -> Result<Response, ClientError> {
        let response = self
            .http
            .post(url)
            .bearer_auth(&self.token)
            .header(ACCEPT, JSONAPI_CONTENT_TYPE)
            .header(CONTENT_TYPE, JSONAPI_CONTENT_TYPE)
            .body(body.to_string())
            .send()
            .await?;
        check(response).await
    }
}

#[async_trait]
impl RemoteClient for HttpClient {
    async fn read_workspace(
        &self,
        organization: &str,
        name: &str,
    ) -> Result<Workspace, ClientError> {
        let url = self.url(&["organizations", organization, "workspaces", name])?;
        let doc: Document<Resource<WorkspaceAttributes>> = self.get(url, None).await?;
        Ok(doc.data.into_workspace())
    }

    async fn read_workspace_by_id(&self, workspace_id: &str) -> Result<Workspace, ClientError> {
        let url = self.url(&["workspaces", workspace_id])?;
        let doc: Document<Resource<WorkspaceAttributes>> = self.get(url, None).await?;
        Ok(doc.data.into_workspace())
    }

    async fn create_run(&self, options: RunCreateOptions) -> Result<Run, ClientError> {
        let body = json!({
            "data": {
                "type": "runs",
                "attributes": {
                    "is-destroy": options.is_destroy,
                    "auto-apply": options.auto_apply,
                    "message": options.message,
                },
                "relationships": {
                    "workspace": {
                        "data": { "type": "workspaces", "id": options.workspace_id }
                    }
                }
            }
        });
        let response = self.post(self.url(&["runs"])?, &body).await?;
        let doc: Document<Resource<RunAttributes>> = decode(response).await?;
        Ok(doc.data.into_run())
    }

    async fn read_run(&self, run_id: &str) -> Result<Run, ClientError> {
        let url = self.url(&["runs", run_id])?;
        let doc: Document<Resource<RunAttributes>> = self.get(url, None).await?;
        Ok(doc.data.into_run())
    }

    async fn apply_run(&self, run_id: &str, comment: &str) -> Result<(), ClientError> {
        let url = self.url(&["runs", run_id, "actions", "apply"])?;
        self.post(url, &json!({ "comment": comment })).await?;
        Ok(())
    }

    async fn list_runs(&self, workspace_id: &str, page: u32) -> Result<Page<Run>, ClientError> {
        let url = self.url(&["workspaces", workspace_id, "runs"])?;
        let doc: Document<Vec<Resource<RunAttributes>>> = self.get(url, Some(page)).await?;
        let pagination = doc.pagination();
        Ok(Page {
            items: doc.data.into_iter().map(Resource::into_run).collect(),
            pagination,
        })
    }

    async fn run_queue(
        &self,
        organization: &str,
        page: u32,
    ) -> Result<Page<QueuedRun>, ClientError> {
        let url = self.url(&["organizations", organization, "runs", "queue"])?;
        let doc: Document<Vec<Resource<QueueAttributes>>> = self.get(url, Some(page)).await?;
        let pagination = doc.pagination();
        Ok(Page {
            items: doc
                .data
                .into_iter()
                .map(|item| QueuedRun {
                    id: item.id,
                    status: item.attributes.status,
                    position_in_queue: item.attributes.position_in_queue,
                })
                .collect(),
            pagination,
        })
    }

    async fn capacity(&self, organization: &str) -> Result<Capacity, ClientError> {
        let url = self.url(&["organizations", organization, "capacity"])?;
        let doc: Document<Resource<CapacityAttributes>> = self.get(url, None).await?;
        Ok(Capacity {
            pending: doc.data.attributes.pending,
            running: doc.data.attributes.running,
        })
    }
}

/// Map error statuses onto `ClientError`, passing successful responses through.
async fn check(response: Response) -> Result<Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    match status {
        StatusCode::NOT_FOUND => Err(ClientError::NotFound),
        StatusCode::UNAUTHORIZED => Err(ClientError::Unauthorized),
        _ => Err(ClientError::Status {
            status: status.as_u16(),
            body: response.text().await.unwrap_or_default(),
        }),
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ClientError> {
    let bytes = check(response).await?.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|e| ClientError::Decode(e.to_string()))
}

// ── JSON:API documents ────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct Document<T> {
    data: T,
    #[serde(default)]
    meta: Option<Meta>,
}

impl<T> Document<T> {
    fn pagination(&self) -> Pagination {
        self.meta
            .as_ref()
            .and_then(|m| m.pagination)
            .map(|p| Pagination {
                current_page: p.current_page,
                next_page: p.next_page,
                total_pages: p.total_pages,
            })
            .unwrap_or_else(Pagination::single)
    }
}

#[derive(Debug, Deserialize)]
struct Meta {
    #[serde(default)]
    pagination: Option<WirePagination>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct WirePagination {
    current_page: u32,
    #[serde(default)]
    next_page: Option<u32>,
    total_pages: u32,
}

#[derive(Debug, Deserialize)]
struct Resource<A> {
    id: String,
    attributes: A,
    #[serde(default)]
    relationships: HashMap<String, Relationship>,
}

#[derive(Debug, Deserialize)]
struct Relationship {
    /// Either a single identifier, an array of them, or null.
    #[serde(default)]
    data: Value,
}

impl<A> Resource<A> {
    fn related_id(&self, name: &str) -> Option<String> {
        self.relationships
            .get(name)?
            .data
            .get("id")?
            .as_str()
            .map(str::to_string)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct RunAttributes {
    status: RunStatus,
    #[serde(default)]
    has_changes: bool,
    #[serde(default)]
    is_destroy: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    actions: WireActions,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct WireActions {
    #[serde(default)]
    is_confirmable: bool,
    #[serde(default)]
    is_cancelable: bool,
    #[serde(default)]
    is_discardable: bool,
}

impl Resource<RunAttributes> {
    fn into_run(self) -> Run {
        Run {
            id: self.id,
            status: self.attributes.status,
            has_changes: self.attributes.has_changes,
            is_destroy: self.attributes.is_destroy,
            message: self.attributes.message,
            actions: RunActions {
                is_confirmable: self.attributes.actions.is_confirmable,
                is_cancelable: self.attributes.actions.is_cancelable,
                is_discardable: self.attributes.actions.is_discardable,
            },
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct WorkspaceAttributes {
    name: String,
    #[serde(default)]
    locked: bool,
}

impl Resource<WorkspaceAttributes> {
    fn into_workspace(self) -> Workspace {
        let organization = self.related_id("organization").unwrap_or_default();
        let current_run = self.related_id("current-run");
        Workspace {
            id: self.id,
            name: self.attributes.name,
            organization,
            locked: self.attributes.locked,
            current_run,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct QueueAttributes {
    status: RunStatus,
    #[serde(default)]
    position_in_queue: u32,
}

#[derive(Debug, Deserialize)]
struct CapacityAttributes {
    #[serde(default)]
    pending: u32,
    #[serde(default)]
    running: u32,
}
