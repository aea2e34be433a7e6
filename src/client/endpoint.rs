//! Endpoint URLs and metric names

use crate::{JiraLinkError, Result};
use lazy_static::lazy_static;
use regex::Regex;
use reqwest::Url;
use std::borrow::Cow;

/// Name used for paths that aren't Jira REST calls
pub const UNRECOGNIZED_ENDPOINT: &str = "_unrecognized";

const REST_API_PREFIX: &str = "/rest/api";

lazy_static! {
    static ref KEY_OR_ID: Regex =
        Regex::new(r"(^[[:alnum:]]+-)?[[:digit:]]+$").expect("valid key-or-id regex");
}

/// Resolve `endpoint` against a REST root.
///
/// Absolute URLs pass through; relative ones like `2/user` land under
/// `<root>/rest/api/`.
pub fn endpoint_url(rest_root: &str, endpoint: &str) -> Result<Url> {
    if let Ok(url) = Url::parse(endpoint) {
        return Ok(url);
    }
    let joined = format!(
        "{}{}/{}",
        rest_root.trim_end_matches('/'),
        REST_API_PREFIX,
        endpoint.trim_start_matches('/')
    );
    Url::parse(&joined)
        .map_err(|e| JiraLinkError::InvalidInput(format!("invalid endpoint {:?}: {}", endpoint, e)))
}

/// Percent-encode one path segment (issue key, project key, comment ID)
pub fn path_segment(segment: &str) -> Cow<'_, str> {
    urlencoding::encode(segment)
}

/// Low-cardinality name for a request, e.g. `api/jira/2/issue/comment/POST`.
///
/// Anything before `/rest/api` (context paths, gateway prefixes) is ignored.
/// Issue keys and numeric IDs after `issue` are dropped, as is anything
/// after `project` or `comment`; after `user` only `groups` and
/// `assignable` are kept.
pub fn endpoint_name(method: &str, path: &str) -> String {
    let lower = path.to_lowercase();
    let rest = match lower.find(REST_API_PREFIX) {
        Some(at) => &lower[at + REST_API_PREFIX.len()..],
        None => return UNRECOGNIZED_ENDPOINT.to_string(),
    };

    let parts: Vec<&str> = rest.trim_matches('/').split('/').collect();
    if parts.len() < 2 || parts[0].is_empty() {
        return UNRECOGNIZED_ENDPOINT.to_string();
    }

    let mut out = vec!["api/jira", parts[0], parts[1]];
    let mut context = parts[1];
    for &part in &parts[2..] {
        let skip = match context {
            "issue" => KEY_OR_ID.is_match(part),
            "user" => part != "groups" && part != "assignable",
            "project" | "comment" => true,
            _ => false,
        };
        if skip {
            continue;
        }
        out.push(part);
        context = part;
    }

    out.push(method);
    out.join("/")
}
