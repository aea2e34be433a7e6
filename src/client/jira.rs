//! Shared Jira REST plumbing
//!
//! [`JiraClient`] owns the HTTP client, the REST root and the connection's
//! credentials. Every request goes through [`JiraClient::send`], which
//! records metrics and normalizes failures into
//! [`RestError`](super::RestError).

use super::endpoint::{endpoint_name, endpoint_url, path_segment};
use super::error::{attachment_upload_error, user_friendly_jira_error};
use super::metrics;
use super::model::*;
use crate::user::Credentials;
use crate::{JiraLinkError, Result};
use reqwest::multipart::{Form, Part};
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::debug;

/// Per-request timeout for attachment uploads (large bodies)
const UPLOAD_TIMEOUT: Duration = Duration::from_secs(120);

pub(crate) const USER_SEARCH_ROUTE: &str = "2/user/assignable/search";
pub(crate) const AUTOCOMPLETE_SEARCH_ROUTE: &str = "2/jql/autocompletedata/suggestions";
pub(crate) const COMMENT_VISIBILITY_ROUTE: &str = "2/user";

/// Synthetic group offered alongside the user's real groups
pub const VISIBLE_TO_ALL_USERS: &str = "visible-to-all-users";

/// Request plumbing shared by the server and cloud clients
#[derive(Clone)]
pub struct JiraClient {
    http: reqwest::Client,
    rest_root: String,
    credentials: Credentials,
}

impl std::fmt::Debug for JiraClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JiraClient")
            .field("rest_root", &self.rest_root)
            .field("credentials", &self.credentials)
            .finish()
    }
}

impl JiraClient {
    pub fn new(http: reqwest::Client, rest_root: &str, credentials: Credentials) -> Result<Self> {
        let rest_root = rest_root.trim_end_matches('/').to_string();
        reqwest::Url::parse(&rest_root).map_err(|e| {
            JiraLinkError::InvalidInput(format!("invalid Jira REST root {:?}: {}", rest_root, e))
        })?;
        Ok(Self {
            http,
            rest_root,
            credentials,
        })
    }

    pub fn rest_root(&self) -> &str {
        &self.rest_root
    }

    fn request(&self, method: Method, endpoint: &str) -> Result<RequestBuilder> {
        let url = endpoint_url(&self.rest_root, endpoint)?;
        let request = self.http.request(method, url);
        Ok(match &self.credentials {
            Credentials::Bearer { token } => request.bearer_auth(token),
            Credentials::Basic { username, password } => {
                request.basic_auth(username, Some(password))
            }
        })
    }

    /// Send a request, returning the response only if it succeeded
    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let response = self.execute(request).await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(user_friendly_jira_error(status.as_u16(), &body).into())
    }

    /// Send a request and record metrics, whatever the status
    async fn execute(&self, request: RequestBuilder) -> Result<Response> {
        let request = request.build()?;
        let name = endpoint_name(request.method().as_str(), request.url().path());
        debug!(endpoint = %name, url = %request.url(), "Jira request");

        let started = Instant::now();
        match self.http.execute(request).await {
            Ok(response) => {
                metrics::record_response(&name, response.status().as_u16(), started.elapsed());
                Ok(response)
            }
            Err(e) => {
                metrics::record_transport_error(&name);
                Err(JiraLinkError::Transport(format!("request to Jira failed: {}", e)))
            }
        }
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
        let url = response.url().to_string();
        let body = response
            .bytes()
            .await
            .map_err(|e| JiraLinkError::Transport(format!("reading response from {}: {}", url, e)))?;
        serde_json::from_slice(&body)
            .map_err(|e| JiraLinkError::Transport(format!("unexpected response from {}: {}", url, e)))
    }

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        params: &[(&str, &str)],
    ) -> Result<T> {
        let request = self.request(Method::GET, endpoint)?.query(params);
        Self::decode(self.send(request).await?).await
    }

    pub async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        endpoint: &str,
        body: &B,
    ) -> Result<T> {
        let request = self.request(Method::POST, endpoint)?.json(body);
        Self::decode(self.send(request).await?).await
    }

    /// POST or PUT where the response body is ignored
    pub async fn send_json<B: Serialize + ?Sized>(
        &self,
        method: Method,
        endpoint: &str,
        body: &B,
    ) -> Result<()> {
        let request = self.request(method, endpoint)?.json(body);
        self.send(request).await?;
        Ok(())
    }

    pub async fn put_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        endpoint: &str,
        body: &B,
    ) -> Result<T> {
        let request = self.request(Method::PUT, endpoint)?.json(body);
        Self::decode(self.send(request).await?).await
    }

    pub async fn rest_get(
        &self,
        endpoint: &str,
        params: &[(&str, &str)],
    ) -> Result<serde_json::Value> {
        self.get_json(endpoint, params).await
    }

    /// Upload one file to an issue.
    ///
    /// Jira answers some upload failures as structured JSON and some as plain
    /// text; both are normalized. A success must contain exactly one
    /// attachment.
    pub async fn rest_post_attachment(
        &self,
        issue_id: &str,
        data: Vec<u8>,
        name: &str,
    ) -> Result<Attachment> {
        let form = Form::new().part("file", Part::bytes(data).file_name(name.to_string()));
        let request = self
            .request(Method::POST, &format!("2/issue/{}/attachments", path_segment(issue_id)))?
            .header("X-Atlassian-Token", "no-check")
            .timeout(UPLOAD_TIMEOUT)
            .multipart(form);

        let response = self.execute(request).await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(attachment_upload_error(status.as_u16(), &body).into());
        }

        let mut attachments: Vec<Attachment> = Self::decode(response).await?;
        if attachments.len() != 1 {
            return Err(JiraLinkError::Other(format!(
                "expected 1 attachment, got {}",
                attachments.len()
            )));
        }
        Ok(attachments.remove(0))
    }

    pub async fn get_project(&self, key: &str) -> Result<Project> {
        self.get_json(&format!("2/project/{}", path_segment(key)), &[]).await
    }

    pub async fn get_issue(&self, key: &str, options: Option<&GetQueryOptions>) -> Result<Issue> {
        let params = options.map(GetQueryOptions::to_params).unwrap_or_default();
        let params: Vec<(&str, &str)> = params.iter().map(|(k, v)| (*k, v.as_str())).collect();
        self.get_json(&format!("2/issue/{}", path_segment(key)), &params).await
    }

    pub async fn get_transitions(&self, key: &str) -> Result<Vec<Transition>> {
        let result: TransitionsResult = self
            .get_json(&format!("2/issue/{}/transitions", path_segment(key)), &[])
            .await?;
        Ok(result.transitions)
    }

    pub async fn create_issue(&self, issue: &Issue) -> Result<Issue> {
        #[derive(Serialize)]
        struct Create<'a> {
            fields: &'a IssueFields,
        }
        self.post_json("2/issue", &Create {
            fields: &issue.fields,
        })
        .await
    }

    pub async fn update_assignee(&self, key: &str, user: &User) -> Result<()> {
        self.send_json(Method::PUT, &format!("2/issue/{}/assignee", path_segment(key)), user)
            .await
    }

    pub async fn add_comment(&self, key: &str, comment: &Comment) -> Result<Comment> {
        self.post_json(&format!("2/issue/{}/comment", path_segment(key)), comment)
            .await
    }

    pub async fn update_comment(&self, key: &str, comment: &Comment) -> Result<Comment> {
        #[derive(Serialize)]
        struct Update<'a> {
            body: &'a str,
        }
        self.put_json(
            &format!(
                "2/issue/{}/comment/{}",
                path_segment(key),
                path_segment(&comment.id)
            ),
            &Update {
                body: &comment.body,
            },
        )
        .await
    }

    pub async fn do_transition(&self, key: &str, transition_id: &str) -> Result<()> {
        let body = serde_json::json!({ "transition": { "id": transition_id } });
        self.send_json(Method::POST, &format!("2/issue/{}/transitions", path_segment(key)), &body)
            .await
    }

    pub async fn search_issues(&self, jql: &str, options: &SearchOptions) -> Result<Vec<Issue>> {
        let start_at = options.start_at.to_string();
        let max_results = options.max_results.to_string();
        let fields = options.fields.join(",");
        let mut params = vec![("jql", jql), ("startAt", start_at.as_str())];
        if options.max_results > 0 {
            params.push(("maxResults", max_results.as_str()));
        }
        if !fields.is_empty() {
            params.push(("fields", fields.as_str()));
        }

        match self.get_json::<SearchResult>("2/search", &params).await {
            Ok(result) => Ok(result.issues),
            Err(JiraLinkError::Rest(e)) if e.status == 401 || e.status == 403 => Err(
                super::RestError::new(e.status, "not authorized to search issues").into(),
            ),
            Err(e) => Err(e),
        }
    }

    /// Assignable-user search; `query_key` differs between server and cloud
    pub async fn search_assignable_users(
        &self,
        scope: (&str, &str),
        query_key: &str,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<User>> {
        let max = max_results.to_string();
        let mut params = vec![scope, (query_key, query)];
        if max_results > 0 {
            params.push(("maxResults", max.as_str()));
        }
        self.get_json(USER_SEARCH_ROUTE, &params).await
    }

    pub async fn search_autocomplete_fields(
        &self,
        params: &[(&str, &str)],
    ) -> Result<AutoCompleteResult> {
        self.get_json(AUTOCOMPLETE_SEARCH_ROUTE, params).await
    }

    pub async fn get_user_visibility_groups(
        &self,
        params: &[(&str, &str)],
    ) -> Result<CommentVisibilityResult> {
        let mut result: CommentVisibilityResult =
            self.get_json(COMMENT_VISIBILITY_ROUTE, params).await?;
        result.groups.items.push(UserGroup {
            name: VISIBLE_TO_ALL_USERS.to_string(),
        });
        Ok(result)
    }

    pub async fn get_self(&self) -> Result<User> {
        self.get_json("2/myself", &[]).await
    }

    pub async fn list_project_statuses(&self, project_id: &str) -> Result<Vec<IssueTypeWithStatuses>> {
        self.get_json(&format!("2/project/{}/statuses", path_segment(project_id)), &[])
            .await
    }

    pub async fn get_create_meta_info(&self, options: &GetQueryOptions) -> Result<CreateMetaInfo> {
        let params = options.to_params();
        let params: Vec<(&str, &str)> = params.iter().map(|(k, v)| (*k, v.as_str())).collect();
        self.get_json("2/issue/createmeta", &params).await
    }
}
