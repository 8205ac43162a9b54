//! Notification dispatch: comments on released pull requests and the
//! issues they close.

use std::{
    collections::{BTreeMap, BTreeSet, HashSet},
    fmt,
    sync::Mutex,
};

use anyhow::Result;
use futures::{StreamExt, stream};
use tracing::{debug, error, info, warn};

use crate::{
    attribution::issues_closed_by,
    error::ReleaseError,
    types::{Forge, PullRequest, Repo},
};

pub fn pull_request_comment(version: &str) -> String {
    format!(
        "🤖 Hello there,\n\nWe just published version `{version}` which includes this pull \
         request. If you'd like to take it for a test run please try it out and let us know what \
         you think!\n\nThanks!"
    )
}

pub fn issue_comment(version: &str) -> String {
    format!(
        "🤖 Hello there,\n\nWe just published version `{version}` which involves this issue. If \
         you'd like to take it for a test run please try it out and let us know what you \
         think!\n\nThanks!"
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    PullRequest,
    Issue,
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::PullRequest => f.write_str("pull request"),
            Target::Issue => f.write_str("issue"),
        }
    }
}

/// A single mutating forge operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Task {
    Comment {
        target: Target,
        number: u64,
        body: String,
    },
    RemoveLabel {
        number: u64,
        label: String,
    },
    CloseIssue {
        number: u64,
    },
    DeleteRelease {
        id: u64,
        tag: String,
    },
}

impl Task {
    async fn execute<F>(&self, forge: &F, repo: &Repo) -> Result<()>
    where
        F: Forge + Sync,
    {
        match self {
            Task::Comment { number, body, .. } => forge.create_comment(repo, *number, body).await,
            Task::RemoveLabel { number, label } => forge.remove_label(repo, *number, label).await,
            Task::CloseIssue { number } => forge.close_issue(repo, *number).await,
            Task::DeleteRelease { id, .. } => forge.delete_release(repo, *id).await,
        }
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Task::Comment { target, number, .. } => write!(f, "comment on {target} #{number}"),
            Task::RemoveLabel { number, label } => write!(f, "remove label '{label}' from #{number}"),
            Task::CloseIssue { number } => write!(f, "close issue #{number}"),
            Task::DeleteRelease { id, tag } => write!(f, "delete release '{tag}' ({id})"),
        }
    }
}

/// Issues already handled in this run. Claiming is a single locked
/// check-and-insert, so an issue is only ever claimed once.
#[derive(Debug, Default)]
pub struct NotificationRecord {
    notified: Mutex<HashSet<u64>>,
}

impl NotificationRecord {
    /// Returns true if `issue` had not been claimed before.
    pub fn claim(&self, issue: u64) -> bool {
        self.notified
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(issue)
    }

    pub fn len(&self) -> usize {
        self.notified
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifyPolicy {
    pub version: String,
    pub awaiting_release_label: Option<String>,
    /// Nightlies never close issues.
    pub nightly: bool,
}

/// An operation that did not complete.
#[derive(Debug)]
pub struct DispatchFailure {
    pub operation: String,
    pub error: anyhow::Error,
}

impl fmt::Display for DispatchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {:#}", self.operation, self.error)
    }
}

/// Outcome of a batch of operations. Failures are collected rather than
/// aborting the batch.
#[derive(Debug, Default)]
pub struct DispatchReport {
    pub completed: Vec<Task>,
    pub failures: Vec<DispatchFailure>,
}

impl DispatchReport {
    pub fn attempted(&self) -> usize {
        self.completed.len() + self.failures.len()
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn merge(&mut self, other: DispatchReport) {
        self.completed.extend(other.completed);
        self.failures.extend(other.failures);
    }

    pub fn ensure_success(&self) -> Result<(), ReleaseError> {
        if self.is_success() {
            return Ok(());
        }
        Err(ReleaseError::DispatchFailed {
            failed: self.failures.len(),
            attempted: self.attempted(),
        })
    }

    fn record(&mut self, task: Task, result: Result<()>) {
        match result {
            Ok(()) => {
                info!(%task, "done");
                self.completed.push(task);
            }
            Err(e) => {
                error!(%task, error = %format!("{e:#}"), "failed");
                self.failures.push(DispatchFailure {
                    operation: task.to_string(),
                    error: e,
                });
            }
        }
    }
}

/// Runs groups of tasks concurrently. Tasks within a group run in order,
/// and a failure does not stop the rest of its group.
pub async fn dispatch<F>(
    forge: &F,
    repo: &Repo,
    groups: Vec<Vec<Task>>,
    max_concurrent: usize,
) -> DispatchReport
where
    F: Forge + Sync,
{
    let outcomes: Vec<Vec<(Task, Result<()>)>> = stream::iter(groups)
        .map(|group| async move {
            let mut outcomes = Vec::with_capacity(group.len());
            for task in group {
                let result = task.execute(forge, repo).await;
                outcomes.push((task, result));
            }
            outcomes
        })
        .buffered(max_concurrent.max(1))
        .collect()
        .await;

    let mut report = DispatchReport::default();
    for (task, result) in outcomes.into_iter().flatten() {
        report.record(task, result);
    }
    report
}

/// Notifies the pull requests of one release and the issues they close.
pub struct Dispatcher<'a, F> {
    forge: &'a F,
    repo: &'a Repo,
    policy: NotifyPolicy,
    record: NotificationRecord,
    max_concurrent: usize,
}

impl<'a, F> Dispatcher<'a, F>
where
    F: Forge + Sync,
{
    pub fn new(forge: &'a F, repo: &'a Repo, policy: NotifyPolicy, max_concurrent: usize) -> Self {
        Self {
            forge,
            repo,
            policy,
            record: NotificationRecord::default(),
            max_concurrent,
        }
    }

    pub fn record(&self) -> &NotificationRecord {
        &self.record
    }

    /// Comments on every pull request, then on every issue they close that
    /// has not been notified yet by this dispatcher.
    ///
    /// A pull request whose issues could not be attributed is still
    /// commented on; the attribution failure is reported with the rest.
    pub async fn notify(&self, prs: &[PullRequest]) -> DispatchReport {
        let attributed: Vec<(&PullRequest, Result<BTreeSet<u64>>)> = stream::iter(prs)
            .map(|pr| async move {
                let issues = issues_closed_by(self.forge, &pr.html_url, pr.body.as_deref()).await;
                (pr, issues)
            })
            .buffered(self.max_concurrent.max(1))
            .collect()
            .await;

        let mut report = DispatchReport::default();
        let mut resolved = Vec::with_capacity(attributed.len());

        for (pr, issues) in attributed {
            match issues {
                Ok(issues) => {
                    debug!(pr = pr.number, ?issues, "attributed issues");
                    resolved.push((pr, issues));
                }
                Err(e) => {
                    warn!(pr = pr.number, error = %format!("{e:#}"), "could not attribute issues");
                    report.failures.push(DispatchFailure {
                        operation: format!("attribute issues for pull request #{}", pr.number),
                        error: e,
                    });
                    resolved.push((pr, BTreeSet::new()));
                }
            }
        }

        let groups = self.plan(&resolved);
        report.merge(dispatch(self.forge, self.repo, groups, self.max_concurrent).await);
        report
    }

    fn plan(&self, attributed: &[(&PullRequest, BTreeSet<u64>)]) -> Vec<Vec<Task>> {
        let label = self.policy.awaiting_release_label.as_deref();
        let mut groups = Vec::new();
        // Issue number to whether any pull request closing it was awaiting
        // the release.
        let mut issues: BTreeMap<u64, bool> = BTreeMap::new();

        for (pr, closed) in attributed {
            let awaiting_label = label.filter(|label| pr.has_label(label));

            let mut group = vec![Task::Comment {
                target: Target::PullRequest,
                number: pr.number,
                body: pull_request_comment(&self.policy.version),
            }];
            if let Some(label) = awaiting_label {
                group.push(Task::RemoveLabel {
                    number: pr.number,
                    label: label.to_string(),
                });
            }
            groups.push(group);

            for issue in closed {
                *issues.entry(*issue).or_default() |= awaiting_label.is_some();
            }
        }

        for (issue, awaiting) in issues {
            if !self.record.claim(issue) {
                debug!(issue, "issue already notified in this run");
                continue;
            }

            let mut group = vec![Task::Comment {
                target: Target::Issue,
                number: issue,
                body: issue_comment(&self.policy.version),
            }];
            if awaiting && !self.policy.nightly {
                group.push(Task::CloseIssue { number: issue });
            }
            groups.push(group);
        }

        groups
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn test_comment_templates() {
        let body = pull_request_comment("2.1.0");
        assert!(body.starts_with("🤖 Hello there,\n\n"));
        assert!(body.contains("We just published version `2.1.0` which includes this pull request."));
        assert!(body.ends_with("let us know what you think!\n\nThanks!"));

        let body = issue_comment("2.1.0");
        assert!(body.contains("We just published version `2.1.0` which involves this issue."));
    }

    #[test]
    fn test_notification_record_claims_once() {
        let record = NotificationRecord::default();
        assert!(record.is_empty());
        assert!(record.claim(42));
        assert!(!record.claim(42));
        assert!(record.claim(7));
        assert_eq!(record.len(), 2);
    }

    #[test]
    fn test_notification_record_concurrent_claims() {
        let record = Arc::new(NotificationRecord::default());

        let winners: usize = (0..8)
            .map(|_| {
                let record = Arc::clone(&record);
                std::thread::spawn(move || record.claim(42))
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|handle| usize::from(handle.join().unwrap()))
            .sum();

        assert_eq!(winners, 1);
    }

    #[test]
    fn test_report_aggregates_failures() {
        let mut report = DispatchReport::default();
        report.record(Task::CloseIssue { number: 1 }, Ok(()));
        report.record(
            Task::Comment {
                target: Target::Issue,
                number: 2,
                body: String::new(),
            },
            Err(anyhow::anyhow!("boom")),
        );

        assert_eq!(report.attempted(), 2);
        assert!(!report.is_success());
        assert_eq!(report.failures[0].to_string(), "comment on issue #2: boom");
        assert!(matches!(
            report.ensure_success(),
            Err(ReleaseError::DispatchFailed {
                failed: 1,
                attempted: 2
            })
        ));
    }

    #[test]
    fn test_task_display() {
        let task = Task::RemoveLabel {
            number: 3,
            label: "awaiting release".to_string(),
        };
        assert_eq!(task.to_string(), "remove label 'awaiting release' from #3");

        let task = Task::DeleteRelease {
            id: 99,
            tag: "v0.0.0-nightly-a".to_string(),
        };
        assert_eq!(task.to_string(), "delete release 'v0.0.0-nightly-a' (99)");
    }
}
