//! Jira REST client facade
//!
//! Callers see one [`Client`] made of capability traits. Behavior that is
//! identical on the wire lives in [`JiraClient`]; what differs between
//! self-hosted and cloud Jira goes through the [`Upstream`] hooks implemented
//! by [`ServerClient`] and [`CloudClient`].

mod endpoint;
mod error;
mod jira;
pub mod metrics;
pub mod model;

pub use endpoint::{endpoint_name, endpoint_url, path_segment, UNRECOGNIZED_ENDPOINT};
pub use error::{
    attachment_upload_error, status_code, status_code_of, user_friendly_jira_error,
    JiraErrorBody, RestError, StatusCoder,
};
pub use jira::{JiraClient, VISIBLE_TO_ALL_USERS};

use crate::host::HostApi;
use crate::instance::Instance;
use crate::types::ByteSize;
use crate::user::Connection;
use crate::{JiraLinkError, Result};
use async_trait::async_trait;
use model::*;
use reqwest::Url;
use serde_json::Value;

/// Low-level access to the upstream API
#[async_trait]
pub trait RestService: Send + Sync {
    /// GET a relative endpoint such as `2/user` or an absolute URL
    async fn rest_get(&self, endpoint: &str, params: &[(&str, &str)]) -> Result<Value>;

    async fn rest_post_attachment(&self, issue_id: &str, data: Vec<u8>, name: &str)
        -> Result<Attachment>;
}

/// [`RestService::rest_get`] decoded into `T`
pub async fn rest_get_json<T: serde::de::DeserializeOwned>(
    client: &dyn RestService,
    endpoint: &str,
    params: &[(&str, &str)],
) -> Result<T> {
    let value = client.rest_get(endpoint, params).await?;
    Ok(serde_json::from_value(value)?)
}

/// Result of one attachment upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentUpload {
    /// File name on the host
    pub host_name: String,
    /// File name Jira stored it under
    pub jira_name: String,
    pub mime_type: String,
}

/// A failed attachment upload, with the host file name when it was known
#[derive(Debug, thiserror::Error)]
#[error("{source}")]
pub struct AttachmentError {
    pub file_name: String,
    #[source]
    pub source: JiraLinkError,
}

impl AttachmentError {
    fn new(file_name: impl Into<String>, source: JiraLinkError) -> Self {
        Self {
            file_name: file_name.into(),
            source,
        }
    }
}

#[async_trait]
pub trait IssueService: Send + Sync {
    async fn get_issue(&self, key: &str, options: Option<&GetQueryOptions>) -> Result<Issue>;

    async fn create_issue(&self, issue: &Issue) -> Result<Issue>;

    async fn add_comment(&self, issue_key: &str, comment: &Comment) -> Result<Comment>;

    async fn update_comment(&self, issue_key: &str, comment: &Comment) -> Result<Comment>;

    async fn get_transitions(&self, issue_key: &str) -> Result<Vec<Transition>>;

    async fn do_transition(&self, issue_key: &str, transition_id: &str) -> Result<()>;

    async fn update_assignee(&self, issue_key: &str, user: &User) -> Result<()>;

    /// Clear the assignee
    async fn unassign(&self, issue_key: &str) -> Result<()>;

    /// Copy a host file onto an issue, refusing files over `max_size`
    async fn add_attachment(
        &self,
        host: &dyn HostApi,
        issue_key: &str,
        file_id: &str,
        max_size: ByteSize,
    ) -> std::result::Result<AttachmentUpload, AttachmentError>;

    async fn get_create_meta_info(&self, options: &GetQueryOptions) -> Result<CreateMetaInfo>;
}

#[async_trait]
pub trait ProjectService: Send + Sync {
    async fn get_project(&self, key: &str) -> Result<Project>;

    /// Projects visible to the user; `limit` of `None` means all
    async fn list_projects(
        &self,
        query: &str,
        limit: Option<usize>,
        expand_issue_types: bool,
    ) -> Result<Vec<Project>>;

    async fn get_issue_types(&self, project_id: &str) -> Result<Vec<IssueType>>;

    async fn list_project_statuses(&self, project_id: &str) -> Result<Vec<IssueTypeWithStatuses>>;
}

#[async_trait]
pub trait SearchService: Send + Sync {
    async fn search_issues(&self, jql: &str, options: &SearchOptions) -> Result<Vec<Issue>>;

    async fn search_users_assignable_to_issue(
        &self,
        issue_key: &str,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<User>>;

    async fn search_users_assignable_in_project(
        &self,
        project_key: &str,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<User>>;

    async fn search_autocomplete_fields(&self, params: &[(&str, &str)]) -> Result<AutoCompleteResult>;

    /// Groups for comment visibility, plus `visible-to-all-users`
    async fn get_user_visibility_groups(
        &self,
        params: &[(&str, &str)],
    ) -> Result<CommentVisibilityResult>;
}

#[async_trait]
pub trait UserService: Send + Sync {
    async fn get_self(&self) -> Result<User>;

    async fn get_user_groups(&self, connection: &Connection) -> Result<Vec<UserGroup>>;
}

/// Everything a workflow can ask of Jira
pub trait Client: RestService + IssueService + ProjectService + SearchService + UserService {}

impl<T> Client for T where T: RestService + IssueService + ProjectService + SearchService + UserService
{}

/// What differs between server and cloud flavors
#[async_trait]
pub trait Upstream: Send + Sync {
    fn base(&self) -> &JiraClient;

    /// Query parameter used by user search
    fn user_query_key(&self) -> &'static str;

    /// Body that clears an issue's assignee
    fn unassign_payload(&self) -> Value;

    async fn fetch_projects(&self, query: &str, expand_issue_types: bool) -> Result<Vec<Project>>;

    async fn fetch_issue_types(&self, project_id: &str) -> Result<Vec<IssueType>>;

    async fn fetch_user_groups(&self, connection: &Connection) -> Result<Vec<UserGroup>>;
}

#[async_trait]
impl<U: Upstream> RestService for U {
    async fn rest_get(&self, endpoint: &str, params: &[(&str, &str)]) -> Result<Value> {
        self.base().rest_get(endpoint, params).await
    }

    async fn rest_post_attachment(
        &self,
        issue_id: &str,
        data: Vec<u8>,
        name: &str,
    ) -> Result<Attachment> {
        self.base().rest_post_attachment(issue_id, data, name).await
    }
}

#[async_trait]
impl<U: Upstream> IssueService for U {
    async fn get_issue(&self, key: &str, options: Option<&GetQueryOptions>) -> Result<Issue> {
        self.base().get_issue(key, options).await
    }

    async fn create_issue(&self, issue: &Issue) -> Result<Issue> {
        self.base().create_issue(issue).await
    }

    async fn add_comment(&self, issue_key: &str, comment: &Comment) -> Result<Comment> {
        self.base().add_comment(issue_key, comment).await
    }

    async fn update_comment(&self, issue_key: &str, comment: &Comment) -> Result<Comment> {
        self.base().update_comment(issue_key, comment).await
    }

    async fn get_transitions(&self, issue_key: &str) -> Result<Vec<Transition>> {
        self.base().get_transitions(issue_key).await
    }

    async fn do_transition(&self, issue_key: &str, transition_id: &str) -> Result<()> {
        self.base().do_transition(issue_key, transition_id).await
    }

    async fn update_assignee(&self, issue_key: &str, user: &User) -> Result<()> {
        self.base().update_assignee(issue_key, user).await
    }

    async fn unassign(&self, issue_key: &str) -> Result<()> {
        self.base()
            .send_json(
                reqwest::Method::PUT,
                &format!("2/issue/{}/assignee", path_segment(issue_key)),
                &self.unassign_payload(),
            )
            .await
    }

    async fn add_attachment(
        &self,
        host: &dyn HostApi,
        issue_key: &str,
        file_id: &str,
        max_size: ByteSize,
    ) -> std::result::Result<AttachmentUpload, AttachmentError> {
        let info = host
            .get_file_info(file_id)
            .await
            .map_err(|e| AttachmentError::new("", e))?;

        let size = ByteSize(info.size);
        if size > max_size {
            return Err(AttachmentError::new(
                &info.name,
                JiraLinkError::InvalidInput(format!(
                    "Maximum attachment size {} exceeded, file size {}",
                    max_size, size
                )),
            ));
        }

        let data = host
            .read_file(&info.path)
            .await
            .map_err(|e| AttachmentError::new("", e))?;
        let attachment = self
            .base()
            .rest_post_attachment(issue_key, data, &info.name)
            .await
            .map_err(|e| AttachmentError::new(&info.name, e))?;

        Ok(AttachmentUpload {
            host_name: info.name,
            jira_name: attachment.filename,
            mime_type: info.mime_type,
        })
    }

    async fn get_create_meta_info(&self, options: &GetQueryOptions) -> Result<CreateMetaInfo> {
        self.base().get_create_meta_info(options).await
    }
}

#[async_trait]
impl<U: Upstream> ProjectService for U {
    async fn get_project(&self, key: &str) -> Result<Project> {
        self.base().get_project(key).await
    }

    async fn list_projects(
        &self,
        query: &str,
        limit: Option<usize>,
        expand_issue_types: bool,
    ) -> Result<Vec<Project>> {
        let mut projects = self.fetch_projects(query, expand_issue_types).await?;
        if let Some(limit) = limit {
            projects.truncate(limit);
        }
        Ok(projects)
    }

    async fn get_issue_types(&self, project_id: &str) -> Result<Vec<IssueType>> {
        self.fetch_issue_types(project_id).await
    }

    async fn list_project_statuses(&self, project_id: &str) -> Result<Vec<IssueTypeWithStatuses>> {
        self.base().list_project_statuses(project_id).await
    }
}

#[async_trait]
impl<U: Upstream> SearchService for U {
    async fn search_issues(&self, jql: &str, options: &SearchOptions) -> Result<Vec<Issue>> {
        self.base().search_issues(jql, options).await
    }

    async fn search_users_assignable_to_issue(
        &self,
        issue_key: &str,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<User>> {
        self.base()
            .search_assignable_users(
                ("issueKey", issue_key),
                self.user_query_key(),
                query,
                max_results,
            )
            .await
    }

    async fn search_users_assignable_in_project(
        &self,
        project_key: &str,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<User>> {
        self.base()
            .search_assignable_users(
                ("project", project_key),
                self.user_query_key(),
                query,
                max_results,
            )
            .await
    }

    async fn search_autocomplete_fields(&self, params: &[(&str, &str)]) -> Result<AutoCompleteResult> {
        self.base().search_autocomplete_fields(params).await
    }

    async fn get_user_visibility_groups(
        &self,
        params: &[(&str, &str)],
    ) -> Result<CommentVisibilityResult> {
        self.base().get_user_visibility_groups(params).await
    }
}

#[async_trait]
impl<U: Upstream> UserService for U {
    async fn get_self(&self) -> Result<User> {
        self.base().get_self().await
    }

    async fn get_user_groups(&self, connection: &Connection) -> Result<Vec<UserGroup>> {
        self.fetch_user_groups(connection).await
    }
}

#[derive(serde::Deserialize)]
struct GroupsEnvelope {
    #[serde(default)]
    groups: UserGroupCollection,
}

#[derive(serde::Deserialize)]
struct ProjectPage {
    #[serde(default)]
    values: Vec<Project>,
    #[serde(rename = "isLast", default = "default_true")]
    is_last: bool,
}

fn default_true() -> bool {
    true
}

/// Self-hosted Jira (Server / Data Center)
#[derive(Debug, Clone)]
pub struct ServerClient {
    base: JiraClient,
}

impl ServerClient {
    pub fn new(base: JiraClient) -> Self {
        Self { base }
    }
}

#[async_trait]
impl Upstream for ServerClient {
    fn base(&self) -> &JiraClient {
        &self.base
    }

    fn user_query_key(&self) -> &'static str {
        "username"
    }

    fn unassign_payload(&self) -> Value {
        serde_json::json!({ "name": null })
    }

    async fn fetch_projects(&self, query: &str, expand_issue_types: bool) -> Result<Vec<Project>> {
        let params: &[(&str, &str)] = if expand_issue_types {
            &[("expand", "issueTypes")]
        } else {
            &[]
        };
        let projects: Vec<Project> = self.base.get_json("2/project", params).await?;
        let query = query.to_lowercase();
        Ok(projects
            .into_iter()
            .filter(|p| {
                query.is_empty()
                    || p.key.to_lowercase().contains(&query)
                    || p.name.to_lowercase().contains(&query)
            })
            .collect())
    }

    async fn fetch_issue_types(&self, project_id: &str) -> Result<Vec<IssueType>> {
        let project = self.base.get_project(project_id).await?;
        Ok(project.issue_types)
    }

    async fn fetch_user_groups(&self, connection: &Connection) -> Result<Vec<UserGroup>> {
        let envelope: GroupsEnvelope = self
            .base
            .get_json(
                "2/user",
                &[("username", connection.name.as_str()), ("expand", "groups")],
            )
            .await?;
        Ok(envelope.groups.items)
    }
}

/// Jira Cloud, via OAuth gateway or app install
#[derive(Debug, Clone)]
pub struct CloudClient {
    base: JiraClient,
}

impl CloudClient {
    pub fn new(base: JiraClient) -> Self {
        Self { base }
    }
}

/// Cloud project search page size
const CLOUD_PROJECT_PAGE: usize = 50;

#[async_trait]
impl Upstream for CloudClient {
    fn base(&self) -> &JiraClient {
        &self.base
    }

    fn user_query_key(&self) -> &'static str {
        "query"
    }

    fn unassign_payload(&self) -> Value {
        serde_json::json!({ "accountId": null })
    }

    async fn fetch_projects(&self, query: &str, expand_issue_types: bool) -> Result<Vec<Project>> {
        let mut projects = Vec::new();
        let page_size = CLOUD_PROJECT_PAGE.to_string();
        loop {
            let start_at = projects.len().to_string();
            let mut params = vec![
                ("startAt", start_at.as_str()),
                ("maxResults", page_size.as_str()),
            ];
            if !query.is_empty() {
                params.push(("query", query));
            }
            if expand_issue_types {
                params.push(("expand", "issueTypes"));
            }

            let page: ProjectPage = self.base.get_json("3/project/search", &params).await?;
            let fetched = page.values.len();
            projects.extend(page.values);
            if page.is_last || fetched == 0 {
                return Ok(projects);
            }
        }
    }

    async fn fetch_issue_types(&self, project_id: &str) -> Result<Vec<IssueType>> {
        self.base
            .get_json("3/issuetype/project", &[("projectId", project_id)])
            .await
    }

    async fn fetch_user_groups(&self, connection: &Connection) -> Result<Vec<UserGroup>> {
        self.base
            .get_json(
                "3/user/groups",
                &[("accountId", connection.account_id.as_str())],
            )
            .await
    }
}

/// Link to Jira's manual create form, pre-filled from `issue`.
///
/// Custom fields are carried over when they are strings, `{id}` objects, or
/// arrays of either. The reporter is only sent to server instances.
pub fn make_create_issue_url(instance: &Instance, project: &Project, issue: &Issue) -> String {
    let base = format!(
        "{}/secure/CreateIssueDetails!init.jspa",
        instance.jira_base_url()
    );
    let mut url = match Url::parse(&base) {
        Ok(url) => url,
        Err(_) => return String::new(),
    };

    {
        let fields = &issue.fields;
        let mut q = url.query_pairs_mut();
        q.append_pair("pid", &project.id);
        q.append_pair(
            "issuetype",
            fields.issue_type.as_ref().map(|t| t.id.as_str()).unwrap_or(""),
        );
        q.append_pair("summary", &fields.summary);
        q.append_pair("description", &fields.description);

        if instance.instance_type() == crate::instance::InstanceType::Server {
            if let Some(reporter) = &fields.reporter {
                q.append_pair("reporter", &reporter.name);
            }
        }

        if let Some(priority) = &fields.priority {
            q.append_pair("priority", &priority.id);
        }

        for (key, value) in &fields.unknowns {
            match value {
                Value::String(s) => {
                    q.append_pair(key, s);
                }
                Value::Object(_) => {
                    if let Some(id) = value.get("id").and_then(Value::as_str) {
                        q.append_pair(key, id);
                    }
                }
                Value::Array(elements) => {
                    for element in elements {
                        match element {
                            Value::String(s) => {
                                q.append_pair(key, s);
                            }
                            Value::Object(_) => {
                                if let Some(id) = element.get("id").and_then(Value::as_str) {
                                    q.append_pair(key, id);
                                }
                            }
                            _ => {}
                        }
                    }
                }
                _ => {}
            }
        }
    }

    url.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CannedRest(Value);

    #[async_trait]
    impl RestService for CannedRest {
        async fn rest_get(&self, _endpoint: &str, _params: &[(&str, &str)]) -> Result<Value> {
            Ok(self.0.clone())
        }

        async fn rest_post_attachment(
            &self,
            _issue_id: &str,
            _data: Vec<u8>,
            _name: &str,
        ) -> Result<Attachment> {
            Err(JiraLinkError::Unsupported("no uploads".into()))
        }
    }

    #[tokio::test]
    async fn test_rest_get_json_decodes() {
        let rest = CannedRest(serde_json::json!({ "name": "jdoe", "displayName": "J Doe" }));
        let user: User = rest_get_json(&rest, "2/myself", &[]).await.unwrap();
        assert_eq!(user.name, "jdoe");
        assert_eq!(user.display_name, "J Doe");

        let rest = CannedRest(serde_json::json!([1, 2]));
        let err = rest_get_json::<User>(&rest, "2/myself", &[]).await.unwrap_err();
        assert!(matches!(err, JiraLinkError::Json(_)));
    }

    fn issue_with_fields() -> Issue {
        let mut issue = Issue::default();
        issue.fields.summary = "Build is red".into();
        issue.fields.description = "see logs".into();
        issue.fields.issue_type = Some(IssueType {
            id: "10002".into(),
            ..Default::default()
        });
        issue.fields.priority = Some(Priority {
            id: "3".into(),
            ..Default::default()
        });
        issue.fields.reporter = Some(User {
            name: "jdoe".into(),
            ..Default::default()
        });
        issue
            .fields
            .unknowns
            .insert("customfield_1".into(), serde_json::json!("plain"));
        issue
            .fields
            .unknowns
            .insert("customfield_2".into(), serde_json::json!({"id": "77", "value": "x"}));
        issue
            .fields
            .unknowns
            .insert("labels_like".into(), serde_json::json!(["a", {"id": "9"}, 5]));
        issue
    }

    #[test]
    fn test_make_create_issue_url_server() {
        let instance = Instance::server("https://jira.local").unwrap();
        let project = Project {
            id: "10000".into(),
            key: "ABC".into(),
            ..Default::default()
        };
        let url = make_create_issue_url(&instance, &project, &issue_with_fields());
        let parsed = Url::parse(&url).unwrap();
        assert_eq!(parsed.path(), "/secure/CreateIssueDetails!init.jspa");

        let pairs: Vec<(String, String)> = parsed.query_pairs().into_owned().collect();
        let get = |k: &str| -> Vec<&str> {
            pairs
                .iter()
                .filter(|(key, _)| key == k)
                .map(|(_, v)| v.as_str())
                .collect()
        };
        assert_eq!(get("pid"), vec!["10000"]);
        assert_eq!(get("issuetype"), vec!["10002"]);
        assert_eq!(get("summary"), vec!["Build is red"]);
        assert_eq!(get("reporter"), vec!["jdoe"]);
        assert_eq!(get("priority"), vec!["3"]);
        assert_eq!(get("customfield_1"), vec!["plain"]);
        assert_eq!(get("customfield_2"), vec!["77"]);
        assert_eq!(get("labels_like"), vec!["a", "9"]);
    }

    #[test]
    fn test_make_create_issue_url_cloud_omits_reporter() {
        let instance = Instance::cloud("https://team.atlassian.net", "app").unwrap();
        let url = make_create_issue_url(&instance, &Project::default(), &issue_with_fields());
        assert!(url.starts_with("https://team.atlassian.net/secure/CreateIssueDetails!init.jspa?"));
        assert!(!url.contains("reporter="));
    }

    #[test]
    fn test_variant_hooks() {
        let base = JiraClient::new(
            reqwest::Client::new(),
            "https://jira.local",
            crate::user::Credentials::Bearer { token: "t".into() },
        )
        .unwrap();
        let server = ServerClient::new(base.clone());
        let cloud = CloudClient::new(base);

        assert_eq!(server.user_query_key(), "username");
        assert_eq!(cloud.user_query_key(), "query");
        assert_eq!(server.unassign_payload(), serde_json::json!({"name": null}));
        assert_eq!(cloud.unassign_payload(), serde_json::json!({"accountId": null}));
    }
}
