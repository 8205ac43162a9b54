//! Tag resolution: which tag a release should be compared against.
//!
//! Stable releases follow their version lineage, so a patch cut from an old
//! major after a newer major still compares against the previous version,
//! not the previous tag in time. Prerelease, nightly and experimental tags
//! have no lineage and are compared against whatever was tagged before them.

use semver::Version;
use tracing::{debug, warn};

use crate::{
    error::ReleaseError,
    types::{RawTag, ReleaseKind, Tag},
    window::ReleaseWindow,
};

const TAG_REF_PREFIX: &str = "refs/tags/";

/// Parses a tag's version, ignoring a leading `v`.
pub fn parse_version(name: &str) -> Option<Version> {
    Version::parse(name.strip_prefix('v').unwrap_or(name)).ok()
}

/// Strips `refs/tags/` from a git ref. Bare tag names pass through; any
/// other ref is rejected.
pub fn clean_ref(reference: &str) -> Result<String, ReleaseError> {
    let reference = reference.trim();

    if let Some(tag) = reference.strip_prefix(TAG_REF_PREFIX) {
        return Ok(tag.to_string());
    }
    if reference.starts_with("refs/") {
        return Err(ReleaseError::configuration(format!(
            "release ref must be a tag (refs/tags/...), got: '{reference}'"
        )));
    }
    if reference.is_empty() {
        return Err(ReleaseError::configuration("release tag is empty"));
    }

    Ok(reference.to_string())
}

/// The slice of a repository's tags that belongs to one release line.
///
/// Without a package every tag is in scope. With a package, tags are named
/// `<package>@<version>`, and repository-wide nightly tags (no `@`) are
/// shared by every package.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagNamespace {
    package: Option<String>,
}

impl TagNamespace {
    pub fn new(package: Option<String>) -> Self {
        Self { package }
    }

    pub fn package(&self) -> Option<&str> {
        self.package.as_deref()
    }

    /// The version part of `tag`, or `None` if the tag belongs to another
    /// package.
    pub fn version_part<'a>(&self, tag: &'a str) -> Option<&'a str> {
        let Some(package) = &self.package else {
            return Some(tag);
        };

        if let Some(version) = tag
            .strip_prefix(package.as_str())
            .and_then(|rest| rest.strip_prefix('@'))
        {
            return Some(version);
        }

        (!tag.contains('@')).then_some(tag)
    }

    fn is_shared(&self, tag: &str) -> bool {
        self.package.is_some() && !tag.contains('@')
    }

    /// Full tag name for a version in this namespace.
    pub fn qualify(&self, version_name: &str, kind: ReleaseKind) -> String {
        match &self.package {
            Some(package) if kind != ReleaseKind::Nightly && !version_name.contains('@') => {
                format!("{package}@{version_name}")
            }
            _ => version_name.to_string(),
        }
    }
}

/// Builds the working tag set: tags in `namespace` whose names parse as
/// semantic versions.
pub fn classify(raw: &[RawTag], namespace: &TagNamespace) -> Vec<Tag> {
    raw.iter()
        .filter_map(|tag| {
            let version_name = namespace.version_part(&tag.name)?;

            let Some(version) = parse_version(version_name) else {
                debug!(tag = %tag.name, "ignoring tag that is not a semantic version");
                return None;
            };

            let kind = ReleaseKind::of(&version);
            if namespace.is_shared(&tag.name) && kind != ReleaseKind::Nightly {
                return None;
            }

            Some(Tag {
                name: tag.name.clone(),
                version,
                date: tag.date,
                kind,
            })
        })
        .collect()
}

/// A release tag and the tag it is compared against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagPair {
    pub current: Tag,
    pub previous: Tag,
}

impl TagPair {
    pub fn window(&self) -> ReleaseWindow {
        ReleaseWindow::new(self.previous.date, self.current.date)
    }

    /// The previous tag was created after the current one, which only
    /// happens when tags were created retroactively.
    pub fn is_inverted(&self) -> bool {
        self.previous.date > self.current.date
    }
}

/// Finds `current` in `tags` and the tag preceding it.
///
/// Stable tags are compared against the next lower stable version;
/// prereleases against the next older tag of any kind.
pub fn resolve_previous_tag(current: &str, tags: &[Tag]) -> Result<TagPair, ReleaseError> {
    let current_tag = tags
        .iter()
        .find(|tag| tag.name == current)
        .ok_or_else(|| ReleaseError::TagNotFound {
            tag: current.to_string(),
        })?;

    let previous = if current_tag.is_prerelease() {
        previous_by_date(current_tag, tags)
    } else {
        previous_stable(current_tag, tags)
    }
    .ok_or_else(|| ReleaseError::NoPreviousTagFound {
        tag: current.to_string(),
    })?;

    let pair = TagPair {
        current: current_tag.clone(),
        previous: previous.clone(),
    };

    debug!(
        current = %pair.current.name,
        previous = %pair.previous.name,
        kind = %pair.current.kind,
        "resolved previous tag"
    );

    if pair.is_inverted() {
        warn!(
            current = %pair.current.name,
            current_date = %pair.current.date,
            previous = %pair.previous.name,
            previous_date = %pair.previous.date,
            "previous tag is newer than the current tag, tag history is inconsistent"
        );
    }

    Ok(pair)
}

fn previous_stable<'a>(current: &Tag, tags: &'a [Tag]) -> Option<&'a Tag> {
    let mut stable: Vec<&Tag> = tags.iter().filter(|tag| !tag.is_prerelease()).collect();
    stable.sort_by(|a, b| b.version.cmp(&a.version).then_with(|| b.date.cmp(&a.date)));

    let position = stable.iter().position(|tag| tag.name == current.name)?;

    // Skip tags of the same version spelled differently (`v1.0.0` and
    // `1.0.0`, or differing build metadata).
    stable
        .into_iter()
        .skip(position + 1)
        .find(|tag| core_version(&tag.version) < core_version(&current.version))
}

fn previous_by_date<'a>(current: &Tag, tags: &'a [Tag]) -> Option<&'a Tag> {
    let mut by_date: Vec<&Tag> = tags.iter().collect();
    by_date.sort_by(|a, b| b.date.cmp(&a.date).then_with(|| b.version.cmp(&a.version)));

    let position = by_date.iter().position(|tag| tag.name == current.name)?;
    by_date.get(position + 1).copied()
}

fn core_version(version: &Version) -> (u64, u64, u64) {
    (version.major, version.minor, version.patch)
}
