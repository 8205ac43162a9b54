use std::{collections::BTreeMap, fmt};

use anyhow::Result;
use chrono::{DateTime, Utc};
use futures::{StreamExt, TryStreamExt, stream};
use tracing::{debug, info, warn};

use crate::{
    config::BranchScope,
    error::ReleaseError,
    types::{Forge, PullRequest, Release, Repo},
};

/// The open interval between two reference points. Both ends are
/// excluded: a pull request merged exactly at a tag's timestamp belongs to
/// neither release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReleaseWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl ReleaseWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.start < instant && instant < self.end
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }
}

impl fmt::Display for ReleaseWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.start.to_rfc3339(), self.end.to_rfc3339())
    }
}

/// What the selector should look for.
#[derive(Debug, Clone, Copy)]
pub struct WindowQuery<'a> {
    pub window: ReleaseWindow,
    pub branches: &'a BranchScope,
    /// Keep only pull requests changing a file under one of these paths.
    /// Empty means no path filtering.
    pub path_prefixes: &'a [String],
    /// Pull requests with one of these titles (compared case-insensitively)
    /// are never part of a release.
    pub skip_titles: &'a [String],
}

/// Merged pull requests inside the query's window, ascending by number.
pub async fn select_merged_prs<F>(
    forge: &F,
    repo: &Repo,
    query: &WindowQuery<'_>,
    max_concurrent: usize,
) -> Result<Vec<PullRequest>>
where
    F: Forge + Sync,
{
    let window = query.window;
    if window.is_empty() {
        warn!(%window, "release window is empty, no pull requests can be selected");
        return Ok(Vec::new());
    }

    let mut selected = BTreeMap::new();

    for base in query.branches.bases() {
        let mut pages = forge.closed_pull_requests(repo, base);
        let mut pages_read = 0usize;

        while let Some(page) = pages.try_next().await? {
            pages_read += 1;

            // Pages arrive most recently updated first, and merging updates
            // a pull request, so once a whole page predates the window no
            // later page can contain anything in it.
            let predates_window =
                !page.is_empty() && page.iter().all(|pr| pr.updated_at <= window.start);

            for pr in page {
                if pr.merged_at.is_some_and(|merged_at| window.contains(merged_at)) {
                    selected.entry(pr.number).or_insert(pr);
                }
            }

            if predates_window {
                break;
            }
        }

        debug!(
            base = base.unwrap_or("*"),
            pages = pages_read,
            "scanned closed pull requests"
        );
    }

    let candidates: Vec<PullRequest> = selected
        .into_values()
        .filter(|pr| {
            let skipped = is_skipped_title(&pr.title, query.skip_titles);
            if skipped {
                debug!(pr = pr.number, title = %pr.title, "skipping release housekeeping pull request");
            }
            !skipped
        })
        .collect();

    let in_window = if query.path_prefixes.is_empty() {
        candidates
    } else {
        filter_by_paths(forge, repo, candidates, query.path_prefixes, max_concurrent).await?
    };

    info!(
        %window,
        count = in_window.len(),
        "selected merged pull requests"
    );

    Ok(in_window)
}

async fn filter_by_paths<F>(
    forge: &F,
    repo: &Repo,
    candidates: Vec<PullRequest>,
    prefixes: &[String],
    max_concurrent: usize,
) -> Result<Vec<PullRequest>>
where
    F: Forge + Sync,
{
    let checked: Vec<(PullRequest, bool)> = stream::iter(candidates)
        .map(|pr| async move {
            let files = forge.changed_files(repo, pr.number).await?;
            let touches = touches_prefixes(&files, prefixes);
            if !touches {
                debug!(pr = pr.number, files = files.len(), "no changed file under watched paths");
            }
            Ok::<_, anyhow::Error>((pr, touches))
        })
        .buffered(max_concurrent.max(1))
        .try_collect()
        .await?;

    Ok(checked
        .into_iter()
        .filter_map(|(pr, touches)| touches.then_some(pr))
        .collect())
}

/// True if any path starts with any prefix. Plain prefix match, not a glob.
pub fn touches_prefixes(files: &[String], prefixes: &[String]) -> bool {
    files
        .iter()
        .any(|file| prefixes.iter().any(|prefix| file.starts_with(prefix.as_str())))
}

fn is_skipped_title(title: &str, skip_titles: &[String]) -> bool {
    let title = title.trim();
    skip_titles.iter().any(|skip| skip.trim().eq_ignore_ascii_case(title))
}

/// A release and the stable release it is compared against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleasePair {
    pub current: Release,
    pub previous: Release,
}

impl ReleasePair {
    pub fn window(&self) -> ReleaseWindow {
        ReleaseWindow::new(self.previous.published(), self.current.published())
    }
}

/// Pairs the release for `target` with the newest stable release published
/// before it. Drafts are never considered.
pub fn window_from_releases(target: &str, releases: &[Release]) -> Result<ReleasePair, ReleaseError> {
    let current = releases
        .iter()
        .find(|release| !release.draft && release.tag_name == target)
        .ok_or_else(|| ReleaseError::TagNotFound {
            tag: target.to_string(),
        })?;

    let previous = releases
        .iter()
        .filter(|release| !release.draft && !release.prerelease)
        .filter(|release| release.published() < current.published())
        .max_by_key(|release| release.published())
        .ok_or_else(|| ReleaseError::NoStableRelease {
            tag: target.to_string(),
        })?;

    debug!(
        current = %current.tag_name,
        previous = %previous.tag_name,
        "resolved previous stable release"
    );

    Ok(ReleasePair {
        current: current.clone(),
        previous: previous.clone(),
    })
}
