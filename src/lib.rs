//! Relnotify: release notifications for GitHub repositories.
//!
//! After a version is tagged, works out which pull requests were merged
//! since the previous comparable release, which issues they close, and
//! comments on all of them. Issues are closed for stable releases when the
//! pull request resolving them was labelled as awaiting a release.

pub mod attribution;
pub mod cli;
pub mod config;
pub mod dry_run;
pub mod error;
pub mod github;
pub mod graphql;
pub mod notify;
pub mod ratelimit;
pub mod release;
pub mod tags;
pub mod types;
pub mod window;

pub use cli::{Command, parse_args};
pub use config::{BranchScope, Config, WindowSource};
pub use dry_run::DryRun;
pub use error::ReleaseError;
pub use github::GitHub;
pub use notify::{DispatchReport, Dispatcher, NotificationRecord, NotifyPolicy, Task};
pub use ratelimit::RetryPolicy;
pub use release::{RunSummary, prune_nightlies, run};
pub use tags::{TagNamespace, TagPair, classify, resolve_previous_tag};
pub use types::{Forge, PageStream, PullRequest, RawTag, Release, ReleaseKind, Repo, RepoError, Tag};
pub use window::{ReleaseWindow, WindowQuery, select_merged_prs, window_from_releases};
