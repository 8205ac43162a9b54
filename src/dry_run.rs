use anyhow::Result;
use async_trait::async_trait;
use tracing::warn;

use crate::types::{Forge, PageStream, PullRequest, RawTag, Release, Repo};

/// Wraps a forge so that reads go through and mutations are only logged.
pub struct DryRun<F> {
    inner: F,
}

impl<F> DryRun<F> {
    pub fn new(inner: F) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<F> Forge for DryRun<F>
where
    F: Forge + Send + Sync,
{
    async fn list_tags(&self, repo: &Repo) -> Result<Vec<RawTag>> {
        self.inner.list_tags(repo).await
    }

    fn closed_pull_requests<'a>(
        &'a self,
        repo: &'a Repo,
        base: Option<&'a str>,
    ) -> PageStream<'a, PullRequest> {
        self.inner.closed_pull_requests(repo, base)
    }

    async fn changed_files(&self, repo: &Repo, number: u64) -> Result<Vec<String>> {
        self.inner.changed_files(repo, number).await
    }

    async fn closing_issue_references(&self, pr_url: &str) -> Result<Vec<u64>> {
        self.inner.closing_issue_references(pr_url).await
    }

    async fn list_releases(&self, repo: &Repo) -> Result<Vec<Release>> {
        self.inner.list_releases(repo).await
    }

    async fn create_comment(&self, repo: &Repo, number: u64, body: &str) -> Result<()> {
        warn!("dry_run: would comment on {}: {body:?}", repo.issue_url(number));
        Ok(())
    }

    async fn remove_label(&self, repo: &Repo, number: u64, label: &str) -> Result<()> {
        warn!("dry_run: would remove label '{label}' from {}", repo.issue_url(number));
        Ok(())
    }

    async fn close_issue(&self, repo: &Repo, number: u64) -> Result<()> {
        warn!("dry_run: would close {}", repo.issue_url(number));
        Ok(())
    }

    async fn delete_release(&self, repo: &Repo, release_id: u64) -> Result<()> {
        warn!("dry_run: would delete release {release_id} of {repo}");
        Ok(())
    }
}
