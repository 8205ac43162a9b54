use std::time::Duration;

use semver::Version;

use crate::{
    error::ReleaseError,
    notify::NotifyPolicy,
    tags::{TagNamespace, clean_ref, parse_version},
    types::{ReleaseKind, Repo},
};

pub const DEFAULT_AWAITING_RELEASE_LABEL: &str = "awaiting release";

/// Titles of the pull requests that bump versions for a release. They are
/// part of every window and are never worth a notification.
pub const DEFAULT_SKIP_TITLES: [&str; 2] = [
    "chore: update version for release",
    "chore: update version for release (pre)",
];

pub const DEFAULT_MAX_CONCURRENT: usize = 8;

pub const DEFAULT_MAX_RATE_LIMIT_WAIT: Duration = Duration::from_secs(15 * 60);

/// Where the window's reference points come from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum WindowSource {
    /// The target tag and the tag resolved as its predecessor.
    #[default]
    Tags,
    /// The target's release and the previous stable release, by publish date.
    Releases,
}

/// The base branches whose pull requests are considered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BranchScope {
    Unscoped,
    Only(String),
    /// Each branch is listed separately and the results are unioned.
    Union(Vec<String>),
}

impl BranchScope {
    /// One entry per listing the selector performs; `None` lists every base.
    pub fn bases(&self) -> Vec<Option<&str>> {
        match self {
            BranchScope::Unscoped => vec![None],
            BranchScope::Only(branch) => vec![Some(branch.as_str())],
            BranchScope::Union(branches) => branches.iter().map(|b| Some(b.as_str())).collect(),
        }
    }

    fn from_branches(mut branches: Vec<String>) -> Self {
        branches.dedup();
        match branches.len() {
            0 => BranchScope::Unscoped,
            1 => BranchScope::Only(branches.remove(0)),
            _ => BranchScope::Union(branches),
        }
    }
}

/// Everything a run needs, built once at startup. Core modules never read
/// the environment themselves.
#[derive(Debug, Clone)]
pub struct Config {
    pub repo: Repo,
    tag: String,
    version: String,
    semver: Version,
    namespace: TagNamespace,

    pub window_source: WindowSource,
    pub path_prefixes: Vec<String>,
    pub default_branch: Option<String>,
    pub nightly_branch: Option<String>,
    /// `None` disables label removal and issue closing.
    pub awaiting_release_label: Option<String>,
    pub skip_titles: Vec<String>,
    /// Treat the release as a nightly whatever its version says.
    pub force_nightly: bool,
    pub dry_run: bool,
    pub max_concurrent: usize,
    pub max_rate_limit_wait: Duration,
}

impl Config {
    /// Validates the release target. `tag` may be a bare tag name or a
    /// `refs/tags/` ref; with a `package`, a bare version is qualified as
    /// `<package>@<version>`.
    pub fn new(repo: Repo, tag: &str, package: Option<String>) -> Result<Self, ReleaseError> {
        let tag = clean_ref(tag)?;
        let namespace = TagNamespace::new(package.filter(|p| !p.trim().is_empty()));

        let version = namespace
            .version_part(&tag)
            .ok_or_else(|| {
                ReleaseError::configuration(format!(
                    "tag '{tag}' does not belong to package '{}'",
                    namespace.package().unwrap_or_default()
                ))
            })?
            .to_string();

        let semver = parse_version(&version).ok_or_else(|| {
            ReleaseError::configuration(format!("'{version}' is not a semantic version"))
        })?;

        let tag = namespace.qualify(&tag, ReleaseKind::of(&semver));

        Ok(Self {
            repo,
            tag,
            version,
            semver,
            namespace,
            window_source: WindowSource::default(),
            path_prefixes: Vec::new(),
            default_branch: None,
            nightly_branch: None,
            awaiting_release_label: Some(DEFAULT_AWAITING_RELEASE_LABEL.to_string()),
            skip_titles: DEFAULT_SKIP_TITLES.iter().map(|t| t.to_string()).collect(),
            force_nightly: false,
            dry_run: false,
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            max_rate_limit_wait: DEFAULT_MAX_RATE_LIMIT_WAIT,
        })
    }

    /// Full tag name on the forge.
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// The version as shown to people, without any package prefix.
    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn semver(&self) -> &Version {
        &self.semver
    }

    pub fn namespace(&self) -> &TagNamespace {
        &self.namespace
    }

    pub fn release_kind(&self) -> ReleaseKind {
        if self.force_nightly {
            ReleaseKind::Nightly
        } else {
            ReleaseKind::of(&self.semver)
        }
    }

    /// Nightlies come from the nightly branch and stable releases from the
    /// default branch. Other prereleases may come from either, so both are
    /// searched. Unconfigured branches widen the scope.
    pub fn branch_scope(&self) -> BranchScope {
        match (self.release_kind(), &self.default_branch, &self.nightly_branch) {
            (ReleaseKind::Nightly, _, Some(nightly)) => BranchScope::Only(nightly.clone()),
            (ReleaseKind::Stable, Some(default), _) => BranchScope::Only(default.clone()),
            (_, default, nightly) => BranchScope::from_branches(
                [default, nightly].into_iter().flatten().cloned().collect(),
            ),
        }
    }

    pub fn notify_policy(&self) -> NotifyPolicy {
        NotifyPolicy {
            version: self.version.clone(),
            awaiting_release_label: self.awaiting_release_label.clone(),
            nightly: self.release_kind() == ReleaseKind::Nightly,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo() -> Repo {
        Repo::new("remix-run", "remix").unwrap()
    }

    #[test]
    fn test_config_from_tag_ref() {
        let config = Config::new(repo(), "refs/tags/v1.2.0", None).unwrap();

        assert_eq!(config.tag(), "v1.2.0");
        assert_eq!(config.version(), "v1.2.0");
        assert_eq!(config.semver(), &Version::new(1, 2, 0));
        assert_eq!(config.release_kind(), ReleaseKind::Stable);
    }

    #[test]
    fn test_config_rejects_bad_targets() {
        assert!(matches!(
            Config::new(repo(), "refs/heads/main", None),
            Err(ReleaseError::Configuration(_))
        ));
        assert!(matches!(
            Config::new(repo(), "latest", None),
            Err(ReleaseError::Configuration(_))
        ));
        assert!(matches!(
            Config::new(repo(), "other@1.0.0", Some("remix".to_string())),
            Err(ReleaseError::Configuration(_))
        ));
    }

    #[test]
    fn test_config_qualifies_package_tags() {
        let config = Config::new(repo(), "2.1.0", Some("remix".to_string())).unwrap();
        assert_eq!(config.tag(), "remix@2.1.0");
        assert_eq!(config.version(), "2.1.0");

        let config = Config::new(repo(), "remix@2.1.0", Some("remix".to_string())).unwrap();
        assert_eq!(config.tag(), "remix@2.1.0");

        let config =
            Config::new(repo(), "v0.0.0-nightly-abc", Some("remix".to_string())).unwrap();
        assert_eq!(config.tag(), "v0.0.0-nightly-abc");
        assert_eq!(config.release_kind(), ReleaseKind::Nightly);

        let config = Config::new(repo(), "2.1.0", Some("  ".to_string())).unwrap();
        assert_eq!(config.tag(), "2.1.0");
    }

    #[test]
    fn test_branch_scope_rules() {
        let mut config = Config::new(repo(), "v1.0.0", None).unwrap();
        assert_eq!(config.branch_scope(), BranchScope::Unscoped);

        config.default_branch = Some("main".to_string());
        config.nightly_branch = Some("dev".to_string());
        assert_eq!(config.branch_scope(), BranchScope::Only("main".to_string()));

        config.force_nightly = true;
        assert_eq!(config.branch_scope(), BranchScope::Only("dev".to_string()));

        let mut config = Config::new(repo(), "v1.1.0-pre.0", None).unwrap();
        config.default_branch = Some("main".to_string());
        config.nightly_branch = Some("dev".to_string());
        assert_eq!(
            config.branch_scope(),
            BranchScope::Union(vec!["main".to_string(), "dev".to_string()])
        );
        assert_eq!(config.branch_scope().bases(), vec![Some("main"), Some("dev")]);

        config.nightly_branch = Some("main".to_string());
        assert_eq!(config.branch_scope(), BranchScope::Only("main".to_string()));
    }

    #[test]
    fn test_notify_policy() {
        let mut config = Config::new(repo(), "v1.0.0", None).unwrap();
        let policy = config.notify_policy();
        assert_eq!(policy.version, "v1.0.0");
        assert_eq!(policy.awaiting_release_label.as_deref(), Some("awaiting release"));
        assert!(!policy.nightly);

        config.force_nightly = true;
        assert!(config.notify_policy().nightly);
    }
}
