use anyhow::Result;
use tracing::{error, info};

use crate::{
    config::{Config, WindowSource},
    error::ReleaseError,
    notify::{DispatchReport, Dispatcher, Task, dispatch},
    tags::{classify, resolve_previous_tag},
    types::{Forge, ReleaseKind},
    window::{ReleaseWindow, WindowQuery, select_merged_prs, window_from_releases},
};

/// What a notification run did.
#[derive(Debug)]
pub struct RunSummary {
    pub tag: String,
    pub kind: ReleaseKind,
    /// The reference point the release was compared against. `None` when
    /// the run was skipped.
    pub previous: Option<String>,
    pub window: Option<ReleaseWindow>,
    pub pull_requests: Vec<u64>,
    pub issues_notified: usize,
    pub report: DispatchReport,
}

impl RunSummary {
    fn skipped(tag: &str, kind: ReleaseKind) -> Self {
        Self {
            tag: tag.to_string(),
            kind,
            previous: None,
            window: None,
            pull_requests: Vec::new(),
            issues_notified: 0,
            report: DispatchReport::default(),
        }
    }

    pub fn is_skipped(&self) -> bool {
        self.window.is_none()
    }

    pub fn ensure_success(&self) -> Result<(), ReleaseError> {
        self.report.ensure_success()
    }

    pub fn log(&self) {
        if self.is_skipped() {
            info!(tag = %self.tag, kind = %self.kind, "release skipped");
            return;
        }

        info!(
            tag = %self.tag,
            previous = self.previous.as_deref().unwrap_or_default(),
            pull_requests = self.pull_requests.len(),
            issues = self.issues_notified,
            completed = self.report.completed.len(),
            failed = self.report.failures.len(),
            "release notification finished"
        );

        for failure in &self.report.failures {
            error!("{failure}");
        }
    }
}

/// Notifies everything resolved by the configured release.
///
/// Configuration and tag resolution errors abort the run. Failed forge
/// mutations do not; they are collected in the summary's report.
pub async fn run<F>(config: &Config, forge: &F) -> Result<RunSummary>
where
    F: Forge + Sync,
{
    // Forcing a nightly never un-skips an experimental version.
    if ReleaseKind::of(config.semver()) == ReleaseKind::Experimental {
        info!(tag = config.tag(), "experimental release, nothing to notify");
        return Ok(RunSummary::skipped(config.tag(), ReleaseKind::Experimental));
    }

    let kind = config.release_kind();

    let (previous, window) = match config.window_source {
        WindowSource::Tags => {
            let raw = forge.list_tags(&config.repo).await?;
            let tags = classify(&raw, config.namespace());
            let pair = resolve_previous_tag(config.tag(), &tags)?;
            (pair.previous.name.clone(), pair.window())
        }
        WindowSource::Releases => {
            let releases = forge.list_releases(&config.repo).await?;
            let pair = window_from_releases(config.tag(), &releases)?;
            (pair.previous.tag_name.clone(), pair.window())
        }
    };

    info!(
        current = config.tag(),
        previous = %previous,
        %kind,
        %window,
        "resolved release window"
    );

    let branches = config.branch_scope();
    let query = WindowQuery {
        window,
        branches: &branches,
        path_prefixes: &config.path_prefixes,
        skip_titles: &config.skip_titles,
    };
    let prs = select_merged_prs(forge, &config.repo, &query, config.max_concurrent).await?;

    for pr in &prs {
        info!(pr = pr.number, title = %pr.title, base = %pr.base_branch, "released pull request");
    }

    let dispatcher = Dispatcher::new(
        forge,
        &config.repo,
        config.notify_policy(),
        config.max_concurrent,
    );
    let report = dispatcher.notify(&prs).await;

    Ok(RunSummary {
        tag: config.tag().to_string(),
        kind,
        previous: Some(previous),
        window: Some(window),
        pull_requests: prs.iter().map(|pr| pr.number).collect(),
        issues_notified: dispatcher.record().len(),
        report,
    })
}

/// Deletes every nightly release except the configured one.
pub async fn prune_nightlies<F>(config: &Config, forge: &F) -> Result<DispatchReport>
where
    F: Forge + Sync,
{
    let releases = forge.list_releases(&config.repo).await?;

    let groups: Vec<Vec<Task>> = releases
        .into_iter()
        .filter(|release| release.is_nightly() && release.tag_name != config.tag())
        .map(|release| {
            vec![Task::DeleteRelease {
                id: release.id,
                tag: release.tag_name,
            }]
        })
        .collect();

    info!(keep = config.tag(), count = groups.len(), "pruning nightly releases");

    Ok(dispatch(forge, &config.repo, groups, config.max_concurrent).await)
}
