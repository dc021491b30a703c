//! REST tracker client.
//!
//! Endpoints, relative to the base URL:
//!
//! - `GET  /api/requirements/{id}` → requirement JSON, 404 when unknown
//! - `GET  /api/requirements?project=&type=&state=&limit=` → `[{"id": ...}]`
//! - `GET  /api/requirements/{id}/children?kind=` → `[{"id": ...}]`
//! - `POST /api/requirements/{id}/children` → `{"id": ...}`

use async_trait::async_trait;
use reqwatch_core::{ArtifactKind, DraftArtifact, RequirementSnapshot};
use reqwest::{RequestBuilder, Response, Url};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{RequirementFilter, TrackerClient, TrackerError};

pub struct HttpTracker {
    client: reqwest::Client,
    base_url: Url,
    token: Option<String>,
}

#[derive(Deserialize)]
struct RequirementBody {
    title: String,
    #[serde(default)]
    description: String,
    state: String,
    #[serde(default)]
    priority: Option<String>,
}

#[derive(Deserialize)]
struct ItemRef {
    id: String,
}

#[derive(Serialize)]
struct NewChild<'a> {
    kind: ArtifactKind,
    title: &'a str,
    description: &'a str,
    acceptance_criteria: &'a [String],
}

impl HttpTracker {
    /// `base_url` is the tracker root, e.g. `http://localhost:4000`.
    pub fn new(base_url: &str) -> Result<Self, TrackerError> {
        let trimmed = base_url.trim_end_matches('/');
        let base_url =
            Url::parse(trimmed).map_err(|e| TrackerError::InvalidUrl(format!("{trimmed}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(TrackerError::InvalidUrl(trimmed.to_string()));
        }
        Ok(Self {
            client: reqwest::Client::new(),
            base_url,
            token: None,
        })
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Base URL plus path segments, each percent-encoded.
    fn url(&self, segments: &[&str]) -> Result<Url, TrackerError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| TrackerError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorized(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn checked(resp: Response) -> Result<Response, TrackerError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(TrackerError::Server {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl TrackerClient for HttpTracker {
    async fn fetch_requirement(&self, id: &str) -> Result<RequirementSnapshot, TrackerError> {
        let url = self.url(&["api", "requirements", id])?;
        debug!(url = %url, "fetching requirement");
        let resp = self.authorized(self.client.get(url)).send().await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(TrackerError::NotFound(id.to_string()));
        }
        let body: RequirementBody = Self::checked(resp).await?.json().await?;

        let mut snapshot = RequirementSnapshot::new(id, body.title, body.description, body.state);
        snapshot.priority = body.priority;
        Ok(snapshot)
    }

    async fn list_requirements(&self, filter: &RequirementFilter) -> Result<Vec<String>, TrackerError> {
        let mut url = self.url(&["api", "requirements"])?;
        {
            let mut query = url.query_pairs_mut();
            if let Some(project) = &filter.project {
                query.append_pair("project", project);
            }
            if let Some(item_type) = &filter.item_type {
                query.append_pair("type", item_type);
            }
            for state in &filter.states {
                query.append_pair("state", state);
            }
            if let Some(limit) = filter.limit {
                query.append_pair("limit", &limit.to_string());
            }
        }
        if url.query() == Some("") {
            url.set_query(None);
        }

        let resp = self.authorized(self.client.get(url)).send().await?;
        let items: Vec<ItemRef> = Self::checked(resp).await?.json().await?;
        info!(count = items.len(), "listed requirements");
        Ok(items.into_iter().map(|i| i.id).collect())
    }

    async fn child_items_exist(&self, parent_id: &str, kind: ArtifactKind) -> Result<bool, TrackerError> {
        let mut url = self.url(&["api", "requirements", parent_id, "children"])?;
        url.query_pairs_mut().append_pair("kind", kind.as_str());

        let resp = self.authorized(self.client.get(url)).send().await?;
        let items: Vec<ItemRef> = Self::checked(resp).await?.json().await?;
        Ok(!items.is_empty())
    }

    async fn create_child(
        &self,
        parent_id: &str,
        kind: ArtifactKind,
        draft: &DraftArtifact,
    ) -> Result<String, TrackerError> {
        let url = self.url(&["api", "requirements", parent_id, "children"])?;
        let body = NewChild {
            kind,
            title: &draft.title,
            description: &draft.description,
            acceptance_criteria: &draft.acceptance_criteria,
        };
        let resp = self
            .authorized(self.client.post(url).json(&body))
            .send()
            .await?;
        let created: ItemRef = Self::checked(resp).await?.json().await?;
        info!(parent = parent_id, child = %created.id, kind = %kind, "created child item");
        Ok(created.id)
    }
}
