use std::fmt;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use semver::Version;

/// A lazily fetched sequence of result pages. Finite; restart it by calling
/// the producing method again.
pub type PageStream<'a, T> = BoxStream<'a, Result<Vec<T>>>;

/// Errors produced while parsing an `owner/name` repository identifier.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RepoError {
    #[error("repository must be in format 'owner/repo', got: '{0}'")]
    InvalidFormat(String),
    #[error("owner cannot be empty")]
    EmptyOwner,
    #[error("repository name cannot be empty")]
    EmptyName,
}

/// A repository on the forge.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Repo {
    owner: String,
    name: String,
}

impl Repo {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Result<Self, RepoError> {
        let owner = owner.into();
        let name = name.into();

        if owner.trim().is_empty() {
            return Err(RepoError::EmptyOwner);
        }
        if name.trim().is_empty() {
            return Err(RepoError::EmptyName);
        }

        Ok(Self { owner, name })
    }

    /// Parses `owner/name`, as found in `GITHUB_REPOSITORY`.
    pub fn parse(repo: &str) -> Result<Self, RepoError> {
        let parts: Vec<&str> = repo.trim().split('/').collect();
        let [owner, name] = parts.as_slice() else {
            return Err(RepoError::InvalidFormat(repo.to_string()));
        };
        Self::new(*owner, *name)
    }

    /// Parses a pull request URL (`https://github.com/owner/repo/pull/123`)
    /// into its repository and number.
    pub fn parse_pull_url(pr_url: &str) -> Result<(Self, u64)> {
        let url =
            url::Url::parse(pr_url).with_context(|| format!("failed to parse URL: '{pr_url}'"))?;

        if url.host_str() != Some("github.com") {
            bail!("URL must be a GitHub pull request URL, got: '{pr_url}'");
        }

        let segments: Vec<&str> = url.path_segments().context("cannot parse URL path")?.collect();
        let [owner, name, "pull", number] = segments.as_slice() else {
            bail!("URL must be in format https://github.com/owner/repo/pull/123, got: '{pr_url}'");
        };

        let number = number
            .parse()
            .with_context(|| format!("invalid pull request number in URL: '{pr_url}'"))?;

        Ok((Self::new(*owner, *name)?, number))
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pull_url(&self, number: u64) -> String {
        format!("https://github.com/{self}/pull/{number}")
    }

    pub fn issue_url(&self, number: u64) -> String {
        format!("https://github.com/{self}/issues/{number}")
    }
}

impl fmt::Display for Repo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// A tag as listed by the forge, before version classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawTag {
    pub name: String,
    /// Tagger date for annotated tags, otherwise the tagged commit's date.
    pub date: DateTime<Utc>,
}

/// Release classification derived from a version's prerelease component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReleaseKind {
    Stable,
    Prerelease,
    Nightly,
    Experimental,
}

impl ReleaseKind {
    pub fn of(version: &Version) -> Self {
        let pre = version.pre.as_str();
        if pre.is_empty() {
            ReleaseKind::Stable
        } else if pre.contains("nightly") {
            ReleaseKind::Nightly
        } else if pre.contains("experimental") {
            ReleaseKind::Experimental
        } else {
            ReleaseKind::Prerelease
        }
    }

    pub fn is_prerelease(&self) -> bool {
        !matches!(self, ReleaseKind::Stable)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReleaseKind::Stable => "stable",
            ReleaseKind::Prerelease => "prerelease",
            ReleaseKind::Nightly => "nightly",
            ReleaseKind::Experimental => "experimental",
        }
    }
}

impl fmt::Display for ReleaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tag whose name parsed as a semantic version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    /// Full tag name on the forge, including any package namespace.
    pub name: String,
    pub version: Version,
    pub date: DateTime<Utc>,
    pub kind: ReleaseKind,
}

impl Tag {
    pub fn is_prerelease(&self) -> bool {
        self.kind.is_prerelease()
    }
}

/// A closed pull request. Changed files are not carried here; the window
/// selector fetches them only for pull requests inside the window.
#[derive(Debug, Clone, PartialEq)]
pub struct PullRequest {
    pub number: u64,
    pub title: String,
    pub html_url: String,
    pub body: Option<String>,
    pub merged_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub base_branch: String,
    pub labels: Vec<String>,
}

impl PullRequest {
    pub fn has_label(&self, label_name: &str) -> bool {
        self.labels.iter().any(|label| label == label_name)
    }
}

/// A published (or draft) release on the forge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Release {
    pub id: u64,
    pub tag_name: String,
    pub prerelease: bool,
    pub draft: bool,
    pub created_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
}

impl Release {
    pub fn published(&self) -> DateTime<Utc> {
        self.published_at.unwrap_or(self.created_at)
    }

    pub fn is_nightly(&self) -> bool {
        self.tag_name.contains("nightly")
    }
}

/// Forge operations the release notifier depends on.
///
/// Implementations own pagination and rate-limit handling; every error they
/// return has already been through their retry policy.
#[async_trait]
pub trait Forge {
    async fn list_tags(&self, repo: &Repo) -> Result<Vec<RawTag>>;

    /// Closed pull requests, most recently updated first. Each stream item is
    /// one page.
    /// `base` restricts the listing to pull requests targeting that branch.
    fn closed_pull_requests<'a>(
        &'a self,
        repo: &'a Repo,
        base: Option<&'a str>,
    ) -> PageStream<'a, PullRequest>;

    async fn changed_files(&self, repo: &Repo, number: u64) -> Result<Vec<String>>;

    /// Issue numbers the forge links as closed by the pull request at
    /// `pr_url`.
    async fn closing_issue_references(&self, pr_url: &str) -> Result<Vec<u64>>;

    async fn list_releases(&self, repo: &Repo) -> Result<Vec<Release>>;

    async fn create_comment(&self, repo: &Repo, number: u64, body: &str) -> Result<()>;

    async fn remove_label(&self, repo: &Repo, number: u64, label: &str) -> Result<()>;

    async fn close_issue(&self, repo: &Repo, number: u64) -> Result<()>;

    async fn delete_release(&self, repo: &Repo, release_id: u64) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repo_parse() {
        let repo = Repo::parse("remix-run/react-router").unwrap();
        assert_eq!(repo.owner(), "remix-run");
        assert_eq!(repo.name(), "react-router");
        assert_eq!(repo.to_string(), "remix-run/react-router");
    }

    #[test]
    fn test_repo_parse_rejects_malformed() {
        assert_eq!(
            Repo::parse("just-a-name"),
            Err(RepoError::InvalidFormat("just-a-name".to_string()))
        );
        assert!(Repo::parse("a/b/c").is_err());
        assert_eq!(Repo::parse("/repo"), Err(RepoError::EmptyOwner));
        assert_eq!(Repo::parse("owner/"), Err(RepoError::EmptyName));
    }

    #[test]
    fn test_parse_pull_url() {
        let (repo, number) =
            Repo::parse_pull_url("https://github.com/remix-run/react-router/pull/1234").unwrap();
        assert_eq!(repo.to_string(), "remix-run/react-router");
        assert_eq!(number, 1234);

        assert!(Repo::parse_pull_url("https://gitlab.com/a/b/pull/1").is_err());
        assert!(Repo::parse_pull_url("https://github.com/a/b/issues/1").is_err());
        assert!(Repo::parse_pull_url("https://github.com/a/b/pull/abc").is_err());
        assert!(Repo::parse_pull_url("not a url").is_err());
    }

    #[test]
    fn test_repo_urls() {
        let repo = Repo::new("owner", "repo").unwrap();
        assert_eq!(repo.pull_url(7), "https://github.com/owner/repo/pull/7");
        assert_eq!(repo.issue_url(8), "https://github.com/owner/repo/issues/8");
    }

    #[test]
    fn test_release_kind_classification() {
        let kind = |v: &str| ReleaseKind::of(&Version::parse(v).unwrap());

        assert_eq!(kind("1.2.3"), ReleaseKind::Stable);
        assert_eq!(kind("1.2.3-pre.0"), ReleaseKind::Prerelease);
        assert_eq!(kind("0.0.0-nightly-5f3e2a1-20240101"), ReleaseKind::Nightly);
        assert_eq!(kind("0.0.0-experimental-5f3e2a1"), ReleaseKind::Experimental);
        assert!(kind("2.0.0-rc.1").is_prerelease());
        assert!(!kind("2.0.0+build.5").is_prerelease());
    }
}
