//! Issue attribution: which issues a pull request closes.
//!
//! Two independent sources of evidence are gathered and merged in one place.
//! The forge's own closing references only exist when the pull request
//! targets the default branch; scanning the description for closing
//! keywords recovers the rest.

use std::{collections::BTreeSet, sync::LazyLock};

use anyhow::Result;
use regex::Regex;
use tracing::debug;

use crate::types::Forge;

static CLOSING_KEYWORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(close|closes|closed|fix|fixes|fixed|resolve|resolves|resolved)\s*:?\s*#(\d+)")
        .expect("closing keyword pattern is valid")
});

/// Issue numbers referenced with a closing keyword in a pull request body.
/// A missing body references nothing.
pub fn scan_body(body: Option<&str>) -> BTreeSet<u64> {
    let Some(body) = body else {
        return BTreeSet::new();
    };

    CLOSING_KEYWORD
        .captures_iter(body)
        .filter_map(|captures| captures.get(2)?.as_str().parse().ok())
        .collect()
}

/// Both sources of evidence for one pull request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IssueEvidence {
    pub closing_references: BTreeSet<u64>,
    pub body_keywords: BTreeSet<u64>,
}

impl IssueEvidence {
    /// Every attributed issue, without regard to which source found it.
    pub fn issues(&self) -> BTreeSet<u64> {
        self.closing_references
            .union(&self.body_keywords)
            .copied()
            .collect()
    }
}

pub async fn gather_evidence<F>(forge: &F, pr_url: &str, pr_body: Option<&str>) -> Result<IssueEvidence>
where
    F: Forge + Sync,
{
    let closing_references = forge
        .closing_issue_references(pr_url)
        .await?
        .into_iter()
        .collect();

    let evidence = IssueEvidence {
        closing_references,
        body_keywords: scan_body(pr_body),
    };

    debug!(
        pr = pr_url,
        linked = ?evidence.closing_references,
        mentioned = ?evidence.body_keywords,
        "gathered issue evidence"
    );

    Ok(evidence)
}

/// The de-duplicated set of issues closed by the pull request at `pr_url`.
pub async fn issues_closed_by<F>(forge: &F, pr_url: &str, pr_body: Option<&str>) -> Result<BTreeSet<u64>>
where
    F: Forge + Sync,
{
    Ok(gather_evidence(forge, pr_url, pr_body).await?.issues())
}
