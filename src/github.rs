use std::{future::Future, process::Command, time::Duration};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::{StreamExt, TryStreamExt, stream};
use octocrab::{Octocrab, models::IssueState};
use serde::{Deserialize, de::DeserializeOwned};
use tracing::{debug, info};

use crate::{
    graphql::{
        CLOSING_REFERENCES_QUERY, ClosingReferencesData, Connection, GraphQLResponse, RefNode,
        TAGS_QUERY, TagsData,
    },
    ratelimit::{RetryPolicy, with_rate_limit_retry},
    types::{Forge, PageStream, PullRequest, RawTag, Release, Repo},
};

const PER_PAGE: usize = 100;

pub fn get_github_token() -> Result<String> {
    for var in ["GITHUB_TOKEN", "GH_TOKEN"] {
        if let Ok(token) = std::env::var(var)
            && !token.trim().is_empty()
        {
            return Ok(token);
        }
    }

    let output = Command::new("gh")
        .args(["auth", "token"])
        .output()
        .context("no GITHUB_TOKEN or GH_TOKEN set and the gh CLI could not be run")?;

    if !output.status.success() {
        anyhow::bail!("Failed to get GitHub token from gh CLI. Please run 'gh auth login' first");
    }

    let token = String::from_utf8(output.stdout)?.trim().to_string();

    if token.is_empty() {
        anyhow::bail!("Empty token returned from gh CLI");
    }

    Ok(token)
}

#[derive(Debug, Deserialize)]
struct RestPullRequest {
    number: u64,
    #[serde(default)]
    title: String,
    html_url: String,
    body: Option<String>,
    merged_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
    base: RestBranch,
    #[serde(default)]
    labels: Vec<RestLabel>,
}

#[derive(Debug, Deserialize)]
struct RestBranch {
    #[serde(rename = "ref")]
    name: String,
}

#[derive(Debug, Deserialize)]
struct RestLabel {
    name: String,
}

#[derive(Debug, Deserialize)]
struct RestFile {
    filename: String,
}

#[derive(Debug, Deserialize)]
struct RestRelease {
    id: u64,
    tag_name: String,
    prerelease: bool,
    draft: bool,
    created_at: DateTime<Utc>,
    published_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct RateLimitStatus {
    resources: RateLimitResources,
}

#[derive(Debug, Deserialize)]
struct RateLimitResources {
    core: RateLimitQuota,
}

#[derive(Debug, Deserialize)]
struct RateLimitQuota {
    /// Epoch seconds at which the quota resets.
    reset: i64,
}

impl From<RestPullRequest> for PullRequest {
    fn from(pr: RestPullRequest) -> Self {
        PullRequest {
            number: pr.number,
            title: pr.title,
            html_url: pr.html_url,
            body: pr.body,
            merged_at: pr.merged_at,
            updated_at: pr.updated_at,
            base_branch: pr.base.name,
            labels: pr.labels.into_iter().map(|label| label.name).collect(),
        }
    }
}

impl From<RestRelease> for Release {
    fn from(release: RestRelease) -> Self {
        Release {
            id: release.id,
            tag_name: release.tag_name,
            prerelease: release.prerelease,
            draft: release.draft,
            created_at: release.created_at,
            published_at: release.published_at,
        }
    }
}

enum Cursor {
    Start,
    After(String),
    Done,
}

/// GitHub forge adapter. Every request goes through the rate-limit retry
/// policy.
pub struct GitHub {
    client: Octocrab,
    policy: RetryPolicy,
}

impl GitHub {
    pub fn new(client: Octocrab, policy: RetryPolicy) -> Self {
        Self { client, policy }
    }

    /// Creates an authenticated client using available credentials.
    pub fn from_env(policy: RetryPolicy) -> Result<Self> {
        let token = get_github_token().context("Failed to obtain GitHub authentication token")?;
        let client = Octocrab::builder()
            .personal_token(token)
            .build()
            .context("Failed to create GitHub client")?;
        Ok(Self::new(client, policy))
    }

    /// Time until the primary quota resets, if GitHub will say.
    async fn primary_reset_delay(&self) -> Option<Duration> {
        let status: RateLimitStatus = self
            .client
            .get("/rate_limit", None::<&()>)
            .await
            .inspect_err(|e| debug!(error = %e, "could not query rate limit status"))
            .ok()?;

        let reset = DateTime::from_timestamp(status.resources.core.reset, 0)?;
        Some((reset - Utc::now()).to_std().unwrap_or(Duration::ZERO))
    }

    async fn request<T, Call, Fut>(&self, operation: &str, call: Call) -> Result<T>
    where
        Call: FnMut() -> Fut,
        Fut: Future<Output = octocrab::Result<T>>,
    {
        with_rate_limit_retry(operation, &self.policy, || self.primary_reset_delay(), call).await
    }

    async fn graphql<D>(&self, operation: &str, body: &serde_json::Value) -> Result<D>
    where
        D: DeserializeOwned,
    {
        let client = &self.client;
        let response: GraphQLResponse<D> = self
            .request(operation, move || async move { client.graphql(body).await })
            .await?;

        response
            .into_data()
            .with_context(|| format!("GraphQL query '{operation}' failed"))
    }

    /// A numbered-page REST listing. The last page is the first one shorter
    /// than a full page.
    fn rest_pages<'a, T>(
        &'a self,
        operation: &'static str,
        route: String,
        params: Vec<(&'static str, String)>,
    ) -> PageStream<'a, T>
    where
        T: DeserializeOwned + Send + 'a,
    {
        stream::try_unfold(Some(1u32), move |page| {
            let route = route.clone();
            let mut query = params.clone();

            async move {
                let Some(page) = page else {
                    return Ok(None);
                };

                query.push(("per_page", PER_PAGE.to_string()));
                query.push(("page", page.to_string()));

                let client = &self.client;
                let (route, query) = (route.as_str(), &query);
                let items: Vec<T> = self
                    .request(operation, move || async move {
                        client.get(route, Some(query)).await
                    })
                    .await?;

                let next = (items.len() >= PER_PAGE).then_some(page + 1);
                Ok::<_, anyhow::Error>(Some((items, next)))
            }
        })
        .boxed()
    }

    /// A cursor-paginated GraphQL connection. `variables` must be a JSON
    /// object; `after` is filled in per page.
    fn graphql_pages<'a, D, T>(
        &'a self,
        operation: &'static str,
        query: &'static str,
        variables: serde_json::Value,
        extract: fn(D) -> Option<Connection<T>>,
    ) -> PageStream<'a, T>
    where
        D: DeserializeOwned + Send + 'a,
        T: Send + 'a,
    {
        stream::try_unfold(Cursor::Start, move |cursor| {
            let mut variables = variables.clone();

            async move {
                variables["after"] = match cursor {
                    Cursor::Done => return Ok(None),
                    Cursor::Start => serde_json::Value::Null,
                    Cursor::After(after) => serde_json::Value::String(after),
                };

                let body = serde_json::json!({ "query": query, "variables": variables });
                let data: D = self.graphql(operation, &body).await?;

                let Some(connection) = extract(data) else {
                    return Ok(Some((Vec::new(), Cursor::Done)));
                };

                let next = connection
                    .page_info
                    .next_cursor()
                    .map_or(Cursor::Done, Cursor::After);
                Ok::<_, anyhow::Error>(Some((connection.nodes, next)))
            }
        })
        .boxed()
    }
}

#[async_trait]
impl Forge for GitHub {
    async fn list_tags(&self, repo: &Repo) -> Result<Vec<RawTag>> {
        let variables = serde_json::json!({ "owner": repo.owner(), "name": repo.name() });

        let tags: Vec<RawTag> = self
            .graphql_pages("list tags", TAGS_QUERY, variables, TagsData::into_connection)
            .map_ok(|nodes: Vec<RefNode>| {
                nodes
                    .into_iter()
                    .filter_map(RefNode::into_raw_tag)
                    .collect::<Vec<_>>()
            })
            .try_concat()
            .await?;

        info!(%repo, count = tags.len(), "listed tags");
        Ok(tags)
    }

    fn closed_pull_requests<'a>(
        &'a self,
        repo: &'a Repo,
        base: Option<&'a str>,
    ) -> PageStream<'a, PullRequest> {
        let mut params = vec![
            ("state", "closed".to_string()),
            ("sort", "updated".to_string()),
            ("direction", "desc".to_string()),
        ];
        if let Some(base) = base {
            params.push(("base", base.to_string()));
        }

        self.rest_pages("list closed pull requests", format!("/repos/{repo}/pulls"), params)
            .map_ok(|prs: Vec<RestPullRequest>| prs.into_iter().map(PullRequest::from).collect())
            .boxed()
    }

    async fn changed_files(&self, repo: &Repo, number: u64) -> Result<Vec<String>> {
        self.rest_pages(
            "list changed files",
            format!("/repos/{repo}/pulls/{number}/files"),
            Vec::new(),
        )
        .map_ok(|files: Vec<RestFile>| {
            files
                .into_iter()
                .map(|file| file.filename)
                .collect::<Vec<_>>()
        })
        .try_concat()
        .await
    }

    async fn closing_issue_references(&self, pr_url: &str) -> Result<Vec<u64>> {
        let variables = serde_json::json!({ "url": pr_url });

        self.graphql_pages(
            "list closing issue references",
            CLOSING_REFERENCES_QUERY,
            variables,
            ClosingReferencesData::into_connection,
        )
        .map_ok(|nodes| nodes.into_iter().map(|issue| issue.number).collect::<Vec<_>>())
        .try_concat()
        .await
    }

    async fn list_releases(&self, repo: &Repo) -> Result<Vec<Release>> {
        let releases: Vec<Release> = self
            .rest_pages("list releases", format!("/repos/{repo}/releases"), Vec::new())
            .map_ok(|releases: Vec<RestRelease>| {
                releases.into_iter().map(Release::from).collect::<Vec<_>>()
            })
            .try_concat()
            .await?;

        info!(%repo, count = releases.len(), "listed releases");
        Ok(releases)
    }

    async fn create_comment(&self, repo: &Repo, number: u64, body: &str) -> Result<()> {
        let client = &self.client;
        self.request("create comment", move || async move {
            client
                .issues(repo.owner(), repo.name())
                .create_comment(number, body)
                .await
        })
        .await?;
        Ok(())
    }

    async fn remove_label(&self, repo: &Repo, number: u64, label: &str) -> Result<()> {
        let client = &self.client;
        self.request("remove label", move || async move {
            client
                .issues(repo.owner(), repo.name())
                .remove_label(number, label)
                .await
        })
        .await?;
        Ok(())
    }

    async fn close_issue(&self, repo: &Repo, number: u64) -> Result<()> {
        let client = &self.client;
        self.request("close issue", move || async move {
            client
                .issues(repo.owner(), repo.name())
                .update(number)
                .state(IssueState::Closed)
                .send()
                .await
        })
        .await?;
        Ok(())
    }

    async fn delete_release(&self, repo: &Repo, release_id: u64) -> Result<()> {
        let client = &self.client;
        self.request("delete release", move || async move {
            client
                .repos(repo.owner(), repo.name())
                .releases()
                .delete(release_id)
                .await
        })
        .await
    }
}
