//! GraphQL documents and response shapes used by the GitHub adapter.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::types::RawTag;

/// Tags, newest target commit first. Annotated tags carry their tagger date;
/// lightweight tags only have the commit they point at.
pub const TAGS_QUERY: &str = r#"
query($owner: String!, $name: String!, $after: String) {
    repository(owner: $owner, name: $name) {
        refs(
            refPrefix: "refs/tags/"
            first: 100
            after: $after
            orderBy: { field: TAG_COMMIT_DATE, direction: DESC }
        ) {
            nodes {
                name
                target {
                    __typename
                    ... on Commit {
                        committedDate
                    }
                    ... on Tag {
                        tagger {
                            date
                        }
                        target {
                            ... on Commit {
                                committedDate
                            }
                        }
                    }
                }
            }
            pageInfo {
                hasNextPage
                endCursor
            }
        }
    }
}
"#;

pub const CLOSING_REFERENCES_QUERY: &str = r#"
query($url: URI!, $after: String) {
    resource(url: $url) {
        ... on PullRequest {
            closingIssuesReferences(first: 100, after: $after) {
                nodes {
                    number
                }
                pageInfo {
                    hasNextPage
                    endCursor
                }
            }
        }
    }
}
"#;

#[derive(Debug, Deserialize)]
pub struct GraphQLResponse<T> {
    pub data: Option<T>,
    #[serde(default)]
    pub errors: Vec<GraphQLError>,
}

#[derive(Debug, Deserialize)]
pub struct GraphQLError {
    pub message: String,
}

impl<T> GraphQLResponse<T> {
    /// The response data, or the errors GitHub reported instead.
    pub fn into_data(self) -> Result<T> {
        if !self.errors.is_empty() {
            let messages: Vec<&str> = self.errors.iter().map(|e| e.message.as_str()).collect();
            anyhow::bail!("GraphQL errors: {}", messages.join("; "));
        }
        self.data.context("GraphQL response contained no data")
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub has_next_page: bool,
    pub end_cursor: Option<String>,
}

impl PageInfo {
    pub fn next_cursor(self) -> Option<String> {
        self.end_cursor.filter(|_| self.has_next_page)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection<T> {
    pub nodes: Vec<T>,
    pub page_info: PageInfo,
}

#[derive(Debug, Deserialize)]
pub struct TagsData {
    pub repository: Option<TagsRepository>,
}

#[derive(Debug, Deserialize)]
pub struct TagsRepository {
    pub refs: Option<Connection<RefNode>>,
}

impl TagsData {
    pub fn into_connection(self) -> Option<Connection<RefNode>> {
        self.repository?.refs
    }
}

#[derive(Debug, Deserialize)]
pub struct RefNode {
    pub name: String,
    pub target: Option<RefTarget>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefTarget {
    #[serde(rename = "__typename")]
    pub typename: String,
    pub committed_date: Option<DateTime<Utc>>,
    pub tagger: Option<Tagger>,
    pub target: Option<TaggedCommit>,
}

#[derive(Debug, Deserialize)]
pub struct Tagger {
    pub date: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaggedCommit {
    pub committed_date: Option<DateTime<Utc>>,
}

impl RefNode {
    /// `None` when no date can be determined, e.g. a tag of a tree.
    pub fn into_raw_tag(self) -> Option<RawTag> {
        let target = self.target?;

        let date = match target.typename.as_str() {
            "Tag" => target
                .tagger
                .and_then(|tagger| tagger.date)
                .or_else(|| target.target.and_then(|commit| commit.committed_date)),
            _ => target.committed_date,
        }?;

        Some(RawTag {
            name: self.name,
            date,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct ClosingReferencesData {
    pub resource: Option<ClosingReferencesResource>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClosingReferencesResource {
    pub closing_issues_references: Option<Connection<IssueNode>>,
}

impl ClosingReferencesData {
    pub fn into_connection(self) -> Option<Connection<IssueNode>> {
        self.resource?.closing_issues_references
    }
}

#[derive(Debug, Deserialize)]
pub struct IssueNode {
    pub number: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_dates_prefer_tagger_date() {
        let response: GraphQLResponse<TagsData> = serde_json::from_value(serde_json::json!({
            "data": {
                "repository": {
                    "refs": {
                        "nodes": [
                            {
                                "name": "v1.1.0",
                                "target": {
                                    "__typename": "Tag",
                                    "tagger": { "date": "2024-03-10T12:00:00Z" },
                                    "target": { "committedDate": "2024-03-09T08:00:00Z" }
                                }
                            },
                            {
                                "name": "v1.0.0",
                                "target": {
                                    "__typename": "Commit",
                                    "committedDate": "2024-03-01T12:00:00Z"
                                }
                            },
                            {
                                "name": "tree-tag",
                                "target": { "__typename": "Tree" }
                            }
                        ],
                        "pageInfo": { "hasNextPage": true, "endCursor": "Y3Vyc29y" }
                    }
                }
            }
        }))
        .unwrap();

        let connection = response.into_data().unwrap().into_connection().unwrap();
        assert_eq!(connection.page_info.next_cursor().as_deref(), Some("Y3Vyc29y"));

        let tags: Vec<RawTag> = connection
            .nodes
            .into_iter()
            .filter_map(RefNode::into_raw_tag)
            .collect();
        assert_eq!(tags.len(), 2);
        assert_eq!(tags[0].date.to_rfc3339(), "2024-03-10T12:00:00+00:00");
        assert_eq!(tags[1].date.to_rfc3339(), "2024-03-01T12:00:00+00:00");
    }

    #[test]
    fn test_closing_references_on_non_pull_request() {
        let response: GraphQLResponse<ClosingReferencesData> =
            serde_json::from_value(serde_json::json!({ "data": { "resource": {} } })).unwrap();

        assert!(response.into_data().unwrap().into_connection().is_none());
    }

    #[test]
    fn test_errors_take_precedence() {
        let response: GraphQLResponse<ClosingReferencesData> =
            serde_json::from_value(serde_json::json!({
                "data": null,
                "errors": [{ "message": "Could not resolve to a Resource" }]
            }))
            .unwrap();

        let err = response.into_data().unwrap_err();
        assert!(err.to_string().contains("Could not resolve to a Resource"));
    }

    #[test]
    fn test_last_page_has_no_cursor() {
        let info = PageInfo {
            has_next_page: false,
            end_cursor: Some("abc".to_string()),
        };
        assert_eq!(info.next_cursor(), None);
    }
}
