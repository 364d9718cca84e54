//! GitLab REST v4 repository

use super::{PutOutcome, VersionedRepository};
use crate::config::GitLabConfig;
use crate::error::RepositoryError;
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::time::Duration;
use tokio::sync::OnceCell;
use url::Url;

/// Longest response body kept in a [`RepositoryError::Status`]
const MAX_ERROR_BODY: usize = 512;

/// Files in one GitLab project, one commit per put
///
/// The project (and its group, when configured) is resolved by name on the
/// first call and created when missing. The resolved project id is cached
/// for the lifetime of the repository.
pub struct GitLabRepository {
    client: reqwest::Client,
    api_base: Url,
    token: String,
    project_name: String,
    group_name: Option<String>,
    branch: String,
    timeout: Duration,
    project_id: OnceCell<u64>,
}

#[derive(Debug, Deserialize)]
struct Named {
    id: u64,
    name: String,
    path: String,
}

impl Named {
    fn matches(&self, wanted: &str) -> bool {
        self.name == wanted || self.path == wanted
    }
}

#[derive(Debug, Serialize)]
struct NewGroup<'a> {
    name: &'a str,
    path: String,
}

#[derive(Debug, Serialize)]
struct NewProject<'a> {
    name: &'a str,
    path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    namespace_id: Option<u64>,
}

#[derive(Debug, Serialize)]
struct FileCommit<'a> {
    branch: &'a str,
    content: &'a str,
    /// Set to "base64" when the bytes are not valid UTF-8
    #[serde(skip_serializing_if = "Option::is_none")]
    encoding: Option<&'static str>,
    commit_message: &'a str,
}

impl GitLabRepository {
    /// Create a client for the instance and project in `config`
    ///
    /// No request is made until [`prepare`](VersionedRepository::prepare) or
    /// the first put.
    pub fn new(config: &GitLabConfig) -> crate::Result<Self> {
        let mut base = Url::parse(&config.url)
            .map_err(|e| crate::Error::config(format!("invalid URL: {}", e), "target.url"))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let api_base = base
            .join("api/v4/")
            .map_err(|e| crate::Error::config(format!("invalid URL: {}", e), "target.url"))?;

        let client = reqwest::Client::builder().timeout(config.timeout).build()?;

        Ok(Self {
            client,
            api_base,
            token: config.token.clone(),
            project_name: config.project_name.clone(),
            group_name: config.group_name.clone(),
            branch: config.branch.clone(),
            timeout: config.timeout,
            project_id: OnceCell::new(),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, RepositoryError> {
        self.api_base
            .join(path)
            .map_err(|e| RepositoryError::Rejected(format!("invalid API path {}: {}", path, e)))
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, RepositoryError> {
        request
            .header("PRIVATE-TOKEN", &self.token)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    RepositoryError::Timeout(self.timeout)
                } else {
                    RepositoryError::from(e)
                }
            })
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(
        &self,
        request: RequestBuilder,
    ) -> Result<T, RepositoryError> {
        let response = self.send(request).await?;
        if !response.status().is_success() {
            return Err(status_error(response).await);
        }
        Ok(response.json::<T>().await?)
    }

    async fn project_id(&self) -> Result<u64, RepositoryError> {
        self.project_id
            .get_or_try_init(|| self.resolve_project())
            .await
            .copied()
    }

    async fn resolve_group(&self, name: &str) -> Result<u64, RepositoryError> {
        let groups: Vec<Named> = self
            .get_json(
                self.client
                    .get(self.endpoint("groups")?)
                    .query(&[("search", name)]),
            )
            .await?;
        if let Some(group) = groups.iter().find(|g| g.matches(name)) {
            tracing::debug!(group = name, id = group.id, "found GitLab group");
            return Ok(group.id);
        }

        tracing::info!(group = name, "GitLab group does not exist, creating");
        let created: Named = self
            .get_json(self.client.post(self.endpoint("groups")?).json(&NewGroup {
                name,
                path: slug(name),
            }))
            .await?;
        tracing::info!(group = %created.name, id = created.id, "GitLab group created");
        Ok(created.id)
    }

    async fn resolve_project(&self) -> Result<u64, RepositoryError> {
        let group_id = match &self.group_name {
            Some(group) if !group.is_empty() => Some(self.resolve_group(group).await?),
            _ => None,
        };

        let search = match group_id {
            Some(id) => self.client.get(self.endpoint(&format!("groups/{}/projects", id))?),
            None => self
                .client
                .get(self.endpoint("projects")?)
                .query(&[("owned", "true")]),
        };
        let projects: Vec<Named> = self
            .get_json(search.query(&[("search", self.project_name.as_str())]))
            .await?;
        if let Some(project) = projects.iter().find(|p| p.matches(&self.project_name)) {
            tracing::debug!(project = %self.project_name, id = project.id, "found GitLab project");
            return Ok(project.id);
        }

        tracing::info!(project = %self.project_name, "GitLab project does not exist, creating");
        let created: Named = self
            .get_json(self.client.post(self.endpoint("projects")?).json(&NewProject {
                name: &self.project_name,
                path: slug(&self.project_name),
                namespace_id: group_id,
            }))
            .await?;
        tracing::info!(project = %created.name, id = created.id, "GitLab project created");
        Ok(created.id)
    }
}

#[async_trait]
impl VersionedRepository for GitLabRepository {
    async fn prepare(&self) -> Result<(), RepositoryError> {
        let id = self.project_id().await?;
        tracing::info!(
            project = %self.project_name,
            id,
            branch = %self.branch,
            "GitLab repository ready"
        );
        Ok(())
    }

    async fn put(
        &self,
        path: &str,
        content: &[u8],
        message: &str,
    ) -> Result<PutOutcome, RepositoryError> {
        let project_id = self.project_id().await?;
        // The file path is a single URL segment, so '/' must be encoded too
        let file_url = self.endpoint(&format!(
            "projects/{}/repository/files/{}",
            project_id,
            urlencoding::encode(path)
        ))?;

        let existing = self
            .send(
                self.client
                    .get(file_url.clone())
                    .query(&[("ref", self.branch.as_str())]),
            )
            .await?;
        let outcome = match existing.status() {
            StatusCode::NOT_FOUND => PutOutcome::Created,
            status if status.is_success() => PutOutcome::Updated,
            _ => return Err(status_error(existing).await),
        };

        let (content, encoding) = match std::str::from_utf8(content) {
            Ok(text) => (Cow::Borrowed(text), None),
            Err(_) => (Cow::Owned(STANDARD.encode(content)), Some("base64")),
        };
        let body = FileCommit {
            branch: &self.branch,
            content: &content,
            encoding,
            commit_message: message,
        };
        let request = match outcome {
            PutOutcome::Created => self.client.post(file_url),
            PutOutcome::Updated => self.client.put(file_url),
        };
        let response = self.send(request.json(&body)).await?;
        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        tracing::debug!(path, ?outcome, "file committed to GitLab");
        Ok(outcome)
    }

    fn name(&self) -> &'static str {
        "gitlab"
    }
}

async fn status_error(response: Response) -> RepositoryError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    RepositoryError::Status {
        status,
        body: body.chars().take(MAX_ERROR_BODY).collect(),
    }
}

/// URL path for a group or project created from a display name
fn slug(name: &str) -> String {
    let raw: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '.' {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect();
    raw.trim_matches('-').to_string()
}
