use std::time::Duration;

use anyhow::Result;
use clap::{ArgAction, Args, Parser, Subcommand, builder::FalseyValueParser};

use crate::{
    config::{
        Config, DEFAULT_AWAITING_RELEASE_LABEL, DEFAULT_MAX_CONCURRENT, DEFAULT_MAX_RATE_LIMIT_WAIT,
        WindowSource,
    },
    error::ReleaseError,
    types::Repo,
};

const BUILD_INFO_HUMAN: &str = env!("BUILD_INFO_HUMAN");

#[derive(Args, Debug, Clone)]
struct TargetArgs {
    /// GitHub repository in format 'owner/repo'
    #[arg(short = 'r', long, env = "GITHUB_REPOSITORY", value_name = "OWNER/REPO")]
    repo: Option<String>,

    /// Release tag, bare or as a refs/tags/ ref
    #[arg(short = 't', long, env = "VERSION", value_name = "TAG")]
    tag: Option<String>,

    /// Ref that triggered the workflow; used when no tag is given
    #[arg(long, env = "GITHUB_REF", hide = true)]
    github_ref: Option<String>,

    /// Only consider '<PACKAGE>@<version>' tags (plus shared nightly tags)
    #[arg(short = 'p', long, env = "PACKAGE_TO_WATCH", value_name = "PACKAGE")]
    package: Option<String>,

    /// Log forge mutations instead of performing them
    #[arg(
        long,
        env = "DRY_RUN",
        action = ArgAction::Set,
        value_parser = FalseyValueParser::new(),
        num_args = 0..=1,
        default_value = "false",
        default_missing_value = "true",
        value_name = "BOOL"
    )]
    dry_run: bool,

    /// Maximum forge requests in flight
    #[arg(long, env = "MAX_CONCURRENT", default_value_t = DEFAULT_MAX_CONCURRENT, value_name = "NUM")]
    max_concurrent: usize,

    /// Longest wait for a rate-limit reset before the single retry
    #[arg(
        long,
        default_value_t = DEFAULT_MAX_RATE_LIMIT_WAIT.as_secs(),
        value_name = "SECONDS"
    )]
    max_rate_limit_wait: u64,
}

#[derive(Args, Debug, Clone)]
struct CommentArgs {
    #[command(flatten)]
    target: TargetArgs,

    /// Only notify pull requests changing a file under PATH (can specify multiple or comma-separated)
    #[arg(
        long = "path-prefix",
        env = "PR_FILES_STARTS_WITH",
        value_delimiter = ',',
        value_name = "PATH",
        help_heading = "Selection"
    )]
    path_prefixes: Vec<String>,

    /// Branch stable releases are cut from
    #[arg(long, env = "DEFAULT_BRANCH", value_name = "BRANCH", help_heading = "Selection")]
    default_branch: Option<String>,

    /// Branch nightly releases are cut from
    #[arg(long, env = "NIGHTLY_BRANCH", value_name = "BRANCH", help_heading = "Selection")]
    nightly_branch: Option<String>,

    /// Where the previous reference point comes from
    #[arg(long, value_enum, default_value_t = WindowSource::Tags, help_heading = "Selection")]
    window: WindowSource,

    /// Never notify pull requests with this title (adds to the built-in version bump titles)
    #[arg(long = "skip-title", value_name = "TITLE", help_heading = "Selection")]
    skip_titles: Vec<String>,

    /// Label marking work awaiting a release; empty disables label removal and issue closing
    #[arg(
        long,
        env = "AWAITING_RELEASE_LABEL",
        default_value = DEFAULT_AWAITING_RELEASE_LABEL,
        value_name = "LABEL",
        help_heading = "Notification"
    )]
    awaiting_release_label: String,

    /// Treat the release as a nightly: comment on issues but never close them
    #[arg(
        long,
        env = "NIGHTLY_RELEASE",
        action = ArgAction::Set,
        value_parser = FalseyValueParser::new(),
        num_args = 0..=1,
        default_value = "false",
        default_missing_value = "true",
        value_name = "BOOL",
        help_heading = "Notification"
    )]
    nightly: bool,
}

#[derive(Subcommand, Debug)]
enum CliCommand {
    /// Comment on the pull requests and issues resolved by a release
    Comment(CommentArgs),
    /// Delete every nightly release except the given one
    PruneNightlies(TargetArgs),
}

#[derive(Parser, Debug)]
#[command(
    name = "relnotify",
    about = "Notify pull requests and issues when the release that resolves them is published"
)]
#[command(long_version = BUILD_INFO_HUMAN)]
struct CliArgs {
    #[command(subcommand)]
    command: CliCommand,
}

/// A validated invocation.
#[derive(Debug, Clone)]
pub enum Command {
    Comment(Config),
    PruneNightlies(Config),
}

impl Command {
    pub fn config(&self) -> &Config {
        match self {
            Command::Comment(config) | Command::PruneNightlies(config) => config,
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl TargetArgs {
    fn into_config(self) -> Result<Config, ReleaseError> {
        let repo = non_empty(self.repo).ok_or_else(|| {
            ReleaseError::configuration("no repository given; use --repo or GITHUB_REPOSITORY")
        })?;
        let repo = Repo::parse(&repo).map_err(|e| {
            ReleaseError::configuration(format!("invalid repository '{repo}': {e}"))
        })?;

        let tag = non_empty(self.tag)
            .or_else(|| non_empty(self.github_ref))
            .ok_or_else(|| {
                ReleaseError::configuration("no release tag given; use --tag, VERSION or GITHUB_REF")
            })?;

        let mut config = Config::new(repo, &tag, non_empty(self.package))?;
        config.dry_run = self.dry_run;
        config.max_concurrent = self.max_concurrent.max(1);
        config.max_rate_limit_wait = Duration::from_secs(self.max_rate_limit_wait);
        Ok(config)
    }
}

impl CommentArgs {
    fn into_config(self) -> Result<Config, ReleaseError> {
        let mut config = self.target.into_config()?;

        config.path_prefixes = self
            .path_prefixes
            .into_iter()
            .filter_map(|p| non_empty(Some(p)))
            .collect();
        config.default_branch = non_empty(self.default_branch);
        config.nightly_branch = non_empty(self.nightly_branch);
        config.window_source = self.window;
        config
            .skip_titles
            .extend(self.skip_titles.into_iter().filter_map(|t| non_empty(Some(t))));
        config.awaiting_release_label = non_empty(Some(self.awaiting_release_label));
        config.force_nightly = self.nightly;

        Ok(config)
    }
}

/// Parses command-line arguments, with environment fallbacks, into a
/// validated command.
///
/// Clap errors (including `--help` and `--version`) are returned as
/// `clap::Error` inside the `anyhow::Error`; configuration problems as
/// [`ReleaseError::Configuration`].
pub fn parse_args<I, T>(args: I) -> Result<Command>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    let cli = CliArgs::try_parse_from(args)?;

    let command = match cli.command {
        CliCommand::Comment(args) => Command::Comment(args.into_config()?),
        CliCommand::PruneNightlies(args) => Command::PruneNightlies(args.into_config()?),
    };

    Ok(command)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_valid() {
        use clap::CommandFactory;
        CliArgs::command().debug_assert();
    }

    fn comment(extra: &[&str]) -> CommentArgs {
        let mut args = vec!["relnotify", "comment"];
        args.extend_from_slice(extra);
        match CliArgs::try_parse_from(args).unwrap().command {
            CliCommand::Comment(args) => args,
            other => panic!("expected comment command, got {other:?}"),
        }
    }

    #[test]
    fn test_boolean_flags_accept_ci_values() {
        assert!(comment(&["--dry-run"]).target.dry_run);
        assert!(comment(&["--dry-run=1"]).target.dry_run);
        assert!(comment(&["--dry-run=yes"]).target.dry_run);
        assert!(!comment(&["--dry-run=false"]).target.dry_run);
        assert!(!comment(&["--dry-run=0"]).target.dry_run);
        assert!(!comment(&["--dry-run="]).target.dry_run);

        assert!(comment(&["--nightly", "--dry-run"]).nightly);
        assert!(comment(&["--nightly=true"]).nightly);
        assert!(!comment(&["--nightly="]).nightly);
        assert!(!comment(&["--nightly=no"]).nightly);
    }

    #[test]
    fn test_non_empty() {
        assert_eq!(non_empty(Some("  main ".to_string())), Some("main".to_string()));
        assert_eq!(non_empty(Some("   ".to_string())), None);
        assert_eq!(non_empty(None), None);
    }
}
