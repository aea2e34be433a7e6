//! Issue workflows
//!
//! Each operation resolves the caller's client, talks to Jira, and turns
//! upstream failures into messages a chat user can act on.

use super::attachments::{AttachmentTask, UploadJob};
use super::Plugin;
use crate::client::model::{
    Comment, CreateMetaInfo, GetQueryOptions, Issue, IssueFields, IssueType,
    IssueTypeWithStatuses, Project, SearchOptions, User,
};
use crate::client::{make_create_issue_url, status_code, RestError};
use crate::host::Post;
use crate::instance::{Instance, InstanceType};
use crate::types::Id;
use crate::user::{Connection, SavedFieldValues};
use crate::{JiraLinkError, Result, ResultExt};
use indexmap::IndexMap;
use lazy_static::lazy_static;
use regex::Regex;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Search result cap when the caller gives none
pub const DEFAULT_SEARCH_LIMIT: usize = 50;

/// Shortest assignee query accepted
pub const MIN_USER_SEARCH_QUERY_LENGTH: usize = 3;

const ASSIGNEE_SEARCH_LIMIT: usize = 10;
const DEFAULT_SEARCH_FIELDS: &str = "key,summary";
const REPORTER_FIELD: &str = "reporter";

const MSG_ISSUE_NOT_VISIBLE: &str = "we couldn't find the issue key, or you do not have the appropriate permissions to view the issue. Please try again or contact your Jira administrator";
const MSG_NO_VIEW_PERMISSION: &str =
    "you do not have the appropriate permissions to view the issue. Please contact your Jira administrator";
const MSG_NO_ACTION_PERMISSION: &str =
    "You do not have the appropriate permissions to perform this action. Please contact your Jira administrator.";
const MSG_UNSUPPORTED_REQUIRED_FIELDS: &str =
    "The project you tried to create an issue for has **required fields** this plugin does not yet support:";

lazy_static! {
    static ref ISSUE_KEY: Regex =
        Regex::new(r"^([[:alnum:]]+)-([[:digit:]]+)$").expect("valid issue key regex");
}

/// Move an issue to the state best matching `to_state`
#[derive(Debug, Clone, Default)]
pub struct TransitionIssue {
    pub instance_id: Id,
    pub user_id: Id,
    /// Channel the confirmation is shown in
    pub channel_id: String,
    pub issue_key: String,
    pub to_state: String,
}

/// Create an issue, optionally from a post
#[derive(Debug, Clone, Default)]
pub struct CreateIssue {
    pub instance_id: Id,
    pub user_id: Id,
    pub channel_id: String,
    /// Originating post; empty when the issue isn't created from one
    pub post_id: String,
    /// Team name used in the post permalink
    pub current_team: String,
    pub fields: IssueFields,
    /// Required fields the caller couldn't fill, as `(field key, display name)`
    pub required_fields_not_covered: Vec<(String, String)>,
}

#[derive(Debug)]
pub struct CreateIssueResult {
    /// The issue as Jira reports it after creation
    pub issue: Issue,
    /// Upload of the originating post's files, if it had any
    pub attachments: Option<AttachmentTask>,
}

/// Copy a post into an issue as a comment
#[derive(Debug, Clone, Default)]
pub struct AttachComment {
    pub instance_id: Id,
    pub user_id: Id,
    pub post_id: String,
    pub current_team: String,
    pub issue_key: String,
}

#[derive(Debug)]
pub struct AttachedComment {
    pub comment: Comment,
    pub attachments: Option<AttachmentTask>,
}

/// What the create dialog needs for a set of projects
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CreateMetadata {
    pub meta: CreateMetaInfo,
    pub statuses: Vec<IssueTypeWithStatuses>,
}

/// Projects the user can create issues in, with their issue types
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProjectMetadata {
    /// `(key, name)` pairs
    pub projects: Vec<(String, String)>,
    /// Non-subtask issue types per project key
    pub issues_per_project: IndexMap<String, Vec<IssueType>>,
    pub saved_field_values: Option<SavedFieldValues>,
}

fn md_issue_link(instance: &Instance, issue_key: &str) -> String {
    format!("[{}]({})", issue_key, instance.browse_url(issue_key))
}

fn md_key_summary_link(instance: &Instance, issue: &Issue) -> String {
    format!("{} {}", md_issue_link(instance, &issue.key), issue.summary())
}

/// Jira user record for the connected account
fn connection_user(connection: &Connection) -> User {
    User {
        account_id: connection.account_id.clone(),
        name: connection.name.clone(),
        key: connection.key.clone(),
        display_name: connection.display_name.clone(),
        email_address: connection.email_address.clone(),
        active: false,
    }
}

/// Lowercased with all whitespace removed
fn squash(state: &str) -> String {
    state.split_whitespace().collect::<String>().to_lowercase()
}

impl Plugin {
    fn site_url(&self) -> String {
        let site = self.host.site_url();
        if site.is_empty() {
            self.config.site_url.trim_end_matches('/').to_string()
        } else {
            site
        }
    }

    fn permalink(&self, team: &str, post_id: &str) -> String {
        format!("{}/{}/pl/{}", self.site_url(), team, post_id)
    }

    async fn send_ephemeral(&self, user_id: &Id, post: Post) {
        if let Err(e) = self.notifier.send_ephemeral_post(user_id, post).await {
            warn!(user = %user_id, error = %e, "Failed to send ephemeral post");
        }
    }

    /// Free-text or JQL search.
    ///
    /// When `q` looks like an issue key that issue is fetched alongside the
    /// search and listed first. An unparseable `limit` is ignored.
    pub async fn get_search_issues(
        &self,
        instance_id: &Id,
        user_id: &Id,
        q: &str,
        jql: &str,
        fields: &str,
        limit: &str,
    ) -> Result<Vec<Issue>> {
        let (client, _, _) = self.get_client(instance_id, user_id).await?;

        let fields = if fields.is_empty() {
            DEFAULT_SEARCH_FIELDS
        } else {
            fields
        };
        let jql = if jql.is_empty() {
            let escaped = q.replace('"', "\\\"");
            format!("text ~ \"{}\" OR text ~ \"{}*\"", escaped, escaped)
        } else {
            jql.to_string()
        };
        let limit = limit.trim().parse::<usize>().unwrap_or(DEFAULT_SEARCH_LIMIT);
        let options = SearchOptions {
            start_at: 0,
            max_results: limit,
            fields: fields.split(',').map(str::to_string).collect(),
        };

        let exact_options = GetQueryOptions::fields(fields);
        let exact = async {
            if !ISSUE_KEY.is_match(q) {
                return None;
            }
            match client.get_issue(q, Some(&exact_options)).await {
                Ok(issue) => Some(issue),
                Err(e) => {
                    debug!(issue = q, error = %e, "No exact issue match");
                    None
                }
            }
        };
        let (exact, found) = tokio::join!(exact, client.search_issues(&jql, &options));

        let mut result = Vec::new();
        let exact_found = exact.is_some();
        result.extend(exact);
        match found {
            Ok(found) => result.extend(found),
            Err(e) if exact_found => warn!(error = %e, "Issue search failed"),
            Err(e) => return Err(e),
        }
        Ok(result)
    }

    /// Transition an issue and show the user the result
    pub async fn transition_issue(&self, input: &TransitionIssue) -> Result<String> {
        let (client, instance, _) = self
            .get_client(&input.instance_id, &input.user_id)
            .await?;

        let transitions = client.get_transitions(&input.issue_key).await.map_err(|e| {
            JiraLinkError::Rest(RestError::new(
                status_code(Some(&e)),
                "we couldn't find the issue key. Please confirm the issue key and try again. You may not have permissions to access this issue",
            ))
        })?;
        if transitions.is_empty() {
            return Err(RestError::new(
                403,
                "you do not have the appropriate permissions to perform this action. Please contact your Jira administrator",
            )
            .into());
        }

        let wanted = squash(&input.to_state);
        let available: Vec<&str> = transitions.iter().map(|t| t.to.name.as_str()).collect();
        let matching: Vec<_> = transitions
            .iter()
            .filter(|t| squash(&t.to.name).contains(&wanted))
            .collect();

        let transition = match matching.as_slice() {
            [] => {
                return Err(JiraLinkError::Ambiguous(format!(
                    "{:?} is not a valid state. Please use one of: {:?}",
                    input.to_state,
                    available.join(", ")
                )))
            }
            [one] => *one,
            several => {
                let names: Vec<&str> = several.iter().map(|t| t.to.name.as_str()).collect();
                return Err(JiraLinkError::Ambiguous(format!(
                    "please be more specific, {:?} matched several states: {:?}",
                    input.to_state,
                    names.join(", ")
                )));
            }
        };

        client
            .do_transition(&input.issue_key, &transition.id)
            .await?;

        let msg = format!(
            "{} transitioned to `{}`",
            md_issue_link(&instance, &input.issue_key),
            transition.to.name
        );

        if let Err(e) = client.get_issue(&input.issue_key, None).await {
            return Err(match status_code(Some(&e)) {
                404 => RestError::new(404, MSG_ISSUE_NOT_VISIBLE).into(),
                401 => RestError::new(401, MSG_NO_VIEW_PERMISSION).into(),
                _ => e.context("request to Jira failed"),
            });
        }

        info!(issue = %input.issue_key, state = %transition.to.name, "Transitioned issue");
        self.send_ephemeral(
            &input.user_id,
            Post::new(self.bot_user_id(), input.channel_id.clone(), msg.clone()),
        )
        .await;
        Ok(msg)
    }

    /// Assign an issue to the single Jira user matching `query`, or to
    /// `assignee` when the caller already picked one
    pub async fn assign_issue(
        &self,
        instance_id: &Id,
        user_id: &Id,
        issue_key: &str,
        query: &str,
        assignee: Option<User>,
    ) -> Result<String> {
        let (client, instance, _) = self.get_client(instance_id, user_id).await?;

        if query.chars().count() < MIN_USER_SEARCH_QUERY_LENGTH {
            return Err(JiraLinkError::InvalidInput(format!(
                "`{}` contains less than {} characters.",
                query, MIN_USER_SEARCH_QUERY_LENGTH
            )));
        }

        if client.get_issue(issue_key, None).await.is_err() {
            return Err(RestError::new(
                404,
                format!(
                    "We couldn't find the issue key `{}`.  Please confirm the issue key and try again.",
                    issue_key
                ),
            )
            .into());
        }

        let users = match assignee {
            Some(user) => vec![user],
            None => match client
                .search_users_assignable_to_issue(issue_key, query, ASSIGNEE_SEARCH_LIMIT)
                .await
            {
                Ok(users) => users,
                Err(e) if status_code(Some(&e)) == 401 => {
                    return Err(RestError::new(401, MSG_NO_ACTION_PERMISSION).into())
                }
                Err(e) => return Err(e),
            },
        };

        let mut user = match users.as_slice() {
            [] => {
                return Err(JiraLinkError::Ambiguous(
                    "we couldn't find the assignee. Please use a Jira member and try again"
                        .to_string(),
                ))
            }
            [one] => one.clone(),
            several => {
                let mut msg = format!(
                    "`{}` matches {} or more users.  Please specify a unique assignee.\n",
                    query,
                    several.len()
                );
                for user in several {
                    msg.push_str(&format!("* {}\n", user.describe()));
                }
                return Err(JiraLinkError::Ambiguous(msg));
            }
        };

        // Jira rejects requests naming both
        if !user.account_id.is_empty() {
            user.name.clear();
        }

        client.update_assignee(issue_key, &user).await?;
        info!(issue = issue_key, assignee = %user.display_name, "Assigned issue");
        Ok(format!(
            "`{}` assigned to Jira issue {}",
            user.display_name,
            md_issue_link(&instance, issue_key)
        ))
    }

    pub async fn unassign_issue(
        &self,
        instance_id: &Id,
        user_id: &Id,
        issue_key: &str,
    ) -> Result<String> {
        let (client, instance, _) = self.get_client(instance_id, user_id).await?;

        if client.get_issue(issue_key, None).await.is_err() {
            return Err(RestError::new(
                404,
                format!(
                    "We couldn't find the issue key `{}`. Please confirm the issue key and try again.",
                    issue_key
                ),
            )
            .into());
        }

        if let Err(e) = client.unassign(issue_key).await {
            if status_code(Some(&e)) == 403 {
                return Err(RestError::new(403, MSG_NO_ACTION_PERMISSION).into());
            }
            return Err(e);
        }

        info!(issue = issue_key, "Unassigned issue");
        Ok(format!(
            "Unassigned Jira issue {}",
            md_issue_link(&instance, issue_key)
        ))
    }

    /// Create an issue and announce it in the channel.
    ///
    /// Files on the originating post are uploaded in the background once the
    /// issue exists; upload failures never undo the creation.
    pub async fn create_issue(&self, input: CreateIssue) -> Result<CreateIssueResult> {
        let CreateIssue {
            instance_id,
            user_id,
            channel_id,
            post_id,
            current_team,
            mut fields,
            mut required_fields_not_covered,
        } = input;

        let (client, instance, connection) = self.get_client(&instance_id, &user_id).await?;

        let post = if post_id.is_empty() {
            None
        } else {
            let post = self
                .host
                .get_post(&post_id)
                .await
                .with_context(|| format!("failed to load post {}", post_id))?;
            let permalink = self.permalink(&current_team, &post_id);
            if fields.description.is_empty() {
                fields.description =
                    format!("_Issue created from a [message in Mattermost|{}]_.", permalink);
            } else {
                fields.description.push_str(&format!(
                    "\n\n_Issue created from a [message in Mattermost|{}]_.",
                    permalink
                ));
            }
            Some(post)
        };

        let (channel_id, root_id) = match &post {
            Some(post) => (post.channel_id.clone(), post.thread_root().to_string()),
            None => (channel_id, post_id.clone()),
        };
        let bot_reply = |message: String| {
            Post::new(self.bot_user_id(), channel_id.clone(), message).in_thread(root_id.clone())
        };

        if let Some(i) = required_fields_not_covered
            .iter()
            .position(|(key, _)| key.to_lowercase() == REPORTER_FIELD)
        {
            required_fields_not_covered.remove(i);
            if instance.instance_type() == InstanceType::Server {
                fields.reporter = Some(connection_user(&connection));
            }
        }

        let issue = Issue {
            fields,
            ..Default::default()
        };

        let project_key = issue
            .fields
            .project
            .as_ref()
            .map(|p| p.key.clone())
            .unwrap_or_default();
        let project = client
            .get_project(&project_key)
            .await
            .with_context(|| format!("failed to get project {:?}", project_key))?;

        if !required_fields_not_covered.is_empty() {
            let create_url = make_create_issue_url(&instance, &project, &issue);
            let mut fields_list = String::new();
            for (_, name) in &required_fields_not_covered {
                fields_list.push_str(&format!("- {}\n", name));
            }
            self.send_ephemeral(
                &user_id,
                bot_reply(format!(
                    "[Please create your Jira issue manually]({}). {}\n{}",
                    create_url, MSG_UNSUPPORTED_REQUIRED_FIELDS, fields_list
                )),
            )
            .await;
            return Err(JiraLinkError::Unsupported(format!(
                "issue can not be created via API: {}",
                MSG_UNSUPPORTED_REQUIRED_FIELDS
            )));
        }

        let created = match client.create_issue(&issue).await {
            Ok(created) => created,
            Err(e) if e.to_string().contains("is required.") => {
                let message = format!(
                    "Failed to create issue. Your Jira project requires fields the plugin does not yet support. \
                     [Please create your Jira issue manually]({}) or contact your Jira administrator.\n{}",
                    make_create_issue_url(&instance, &project, &issue),
                    e
                );
                self.send_ephemeral(&user_id, bot_reply(message.clone())).await;
                return Err(JiraLinkError::Unsupported(format!(
                    "issue can not be created via API: {}",
                    message
                )));
            }
            Err(e) => return Err(e.context("failed to create issue")),
        };

        self.send_ephemeral(
            &user_id,
            bot_reply(format!(
                "Created Jira issue {}",
                md_issue_link(&instance, &created.key)
            )),
        )
        .await;

        // Creation only returns the ID and key
        let created_issue = client
            .get_issue(&created.key, None)
            .await
            .with_context(|| format!("failed to fetch issue details {}", created.key))?;

        self.update_user_defaults(
            &user_id,
            &instance_id,
            Some(SavedFieldValues {
                project_key: project.key.clone(),
                issue_type: issue
                    .fields
                    .issue_type
                    .as_ref()
                    .map(|t| t.id.clone())
                    .unwrap_or_default(),
            }),
        )
        .await;

        let public = Post::new(
            user_id.clone(),
            channel_id.clone(),
            format!(
                "Created a Jira issue: {}",
                md_key_summary_link(&instance, &created_issue)
            ),
        )
        .in_thread(root_id.clone());
        self.notifier
            .create_post(public)
            .await
            .with_context(|| format!("failed to create notification post {}", post_id))?;

        info!(issue = %created.key, instance = %instance_id, "Created issue");

        let attachments = post.filter(|p| !p.file_ids.is_empty()).map(|p| {
            UploadJob {
                client: Arc::clone(&client),
                host: Arc::clone(&self.host),
                notifier: Arc::clone(&self.notifier),
                user_id: user_id.clone(),
                issue_key: created.key.clone(),
                target: created.id.clone(),
                file_ids: p.file_ids,
                max_size: self.config.max_attachment_size,
                comment: None,
            }
            .spawn()
        });

        Ok(CreateIssueResult {
            issue: created_issue,
            attachments,
        })
    }

    /// Add a post to an issue as a comment, then upload its files
    pub async fn attach_comment_to_issue(&self, input: &AttachComment) -> Result<AttachedComment> {
        let (client, instance, connection) = self
            .get_client(&input.instance_id, &input.user_id)
            .await?;

        let post = self
            .host
            .get_post(&input.post_id)
            .await
            .with_context(|| format!("failed to load post {}", input.post_id))?;
        let author = self.host.get_user(&post.user_id).await.map_err(|_| {
            JiraLinkError::not_found(format!("failed to load post.UserID {}", post.user_id))
        })?;

        let permalink = self.permalink(&input.current_team, &input.post_id);
        let comment = Comment::new(format!(
            "*@{} attached a* [message|{}] *from @{}*\n{}",
            connection.display_name, permalink, author.username, post.message
        ));

        let added = match client.add_comment(&input.issue_key, &comment).await {
            Ok(added) => added,
            Err(e)
                if e.to_string()
                    .contains("you do not have the permission to comment on this issue") =>
            {
                return Err(RestError::new(
                    status_code(Some(&e)),
                    "you do not have permission to create a comment in the selected Jira issue. Please choose another issue or contact your Jira admin",
                )
                .into());
            }
            Err(e) => {
                return Err(e.context(format!(
                    "failed to attach the comment, postId: {}",
                    input.post_id
                )))
            }
        };

        let attachments = if post.file_ids.is_empty() {
            None
        } else {
            Some(
                UploadJob {
                    client: Arc::clone(&client),
                    host: Arc::clone(&self.host),
                    notifier: Arc::clone(&self.notifier),
                    user_id: input.user_id.clone(),
                    issue_key: input.issue_key.clone(),
                    target: input.issue_key.clone(),
                    file_ids: post.file_ids.clone(),
                    max_size: self.config.max_attachment_size,
                    comment: Some(Comment {
                        id: added.id.clone(),
                        ..comment
                    }),
                }
                .spawn(),
            )
        };

        self.update_user_defaults(&input.user_id, &input.instance_id, None)
            .await;

        let reply = Post::new(
            input.user_id.clone(),
            post.channel_id.clone(),
            format!(
                "Message attached to {}",
                md_issue_link(&instance, &input.issue_key)
            ),
        )
        .in_thread(post.thread_root());
        self.notifier
            .create_post(reply)
            .await
            .with_context(|| format!("failed to create notification post {}", input.post_id))?;

        Ok(AttachedComment {
            comment: added,
            attachments,
        })
    }

    pub async fn get_issue_by_key(
        &self,
        instance_id: &Id,
        user_id: &Id,
        issue_key: &str,
    ) -> Result<Issue> {
        let (client, _, _) = self.get_client(instance_id, user_id).await?;
        client
            .get_issue(issue_key, None)
            .await
            .map_err(|e| match status_code(Some(&e)) {
                404 => RestError::new(404, MSG_ISSUE_NOT_VISIBLE).into(),
                _ => e.context("request to Jira failed"),
            })
    }

    /// All projects visible to the user, and the connection they were
    /// listed with
    pub async fn list_jira_projects(
        &self,
        instance_id: &Id,
        user_id: &Id,
        expand_issue_types: bool,
    ) -> Result<(Vec<Project>, Connection)> {
        let (client, _, connection) = self.get_client(instance_id, user_id).await?;
        let projects = client.list_projects("", None, expand_issue_types).await?;
        Ok((projects, connection))
    }

    pub async fn get_issue_types(
        &self,
        instance_id: &Id,
        user_id: &Id,
        project_id: &str,
    ) -> Result<Vec<IssueType>> {
        let (client, _, _) = self.get_client(instance_id, user_id).await?;
        client.get_issue_types(project_id).await
    }

    /// Projects and issue types for the create dialog.
    ///
    /// Some Jira versions reject the expanded project listing with a 400; the
    /// issue types are then fetched project by project.
    pub async fn get_jira_project_metadata(
        &self,
        instance_id: &Id,
        user_id: &Id,
    ) -> Result<ProjectMetadata> {
        let (projects, connection) = match self.list_jira_projects(instance_id, user_id, true).await
        {
            Ok(listed) => listed,
            Err(e) if status_code(Some(&e)) == 400 => {
                let (projects, connection) = self
                    .list_jira_projects(instance_id, user_id, false)
                    .await
                    .context("failed to get the list of Jira Projects")?;
                let mut with_types = Vec::with_capacity(projects.len());
                for mut project in projects {
                    match self.get_issue_types(instance_id, user_id, &project.id).await {
                        Ok(types) => {
                            project.issue_types = types;
                            with_types.push(project);
                        }
                        Err(e) => {
                            debug!(project = %project.key, error = %e, "Failed to get issue types for project");
                        }
                    }
                }
                (with_types, connection)
            }
            Err(e) => return Err(e.context("failed to GetProjectMetadata")),
        };

        let mut metadata = ProjectMetadata {
            saved_field_values: connection.saved_field_values,
            ..Default::default()
        };
        for project in projects {
            let types = project
                .issue_types
                .iter()
                .filter(|t| !t.subtask)
                .cloned()
                .collect();
            metadata
                .issues_per_project
                .insert(project.key.clone(), types);
            metadata.projects.push((project.key, project.name));
        }
        Ok(metadata)
    }

    /// Field schemas and statuses for the comma-separated `project_keys`
    pub async fn get_create_issue_metadata_for_projects(
        &self,
        instance_id: &Id,
        user_id: &Id,
        project_keys: &str,
    ) -> Result<CreateMetadata> {
        let (client, _, _) = self.get_client(instance_id, user_id).await?;

        let statuses = client.list_project_statuses(project_keys).await?;
        let meta = client
            .get_create_meta_info(&GetQueryOptions {
                expand: "projects.issuetypes.fields".to_string(),
                project_keys: project_keys.to_string(),
                ..Default::default()
            })
            .await?;

        Ok(CreateMetadata { meta, statuses })
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{fixture, Fixture};
    use super::*;
    use crate::client::status_code_of;
    use crate::host::{FileInfo, HostUser};
    use crate::store::UserStore;
    use crate::user::Credentials;
    use axum::extract::{Path, Query, State};
    use axum::http::StatusCode;
    use axum::response::{IntoResponse, Response};
    use axum::routing::{get, post, put};
    use axum::{Json, Router};
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use std::sync::Mutex;

    type Params = Query<HashMap<String, String>>;

    /// Requests the fake Jira received, as `(route, payload)`
    #[derive(Clone, Default)]
    struct Seen(Arc<Mutex<Vec<(String, Value)>>>);

    impl Seen {
        fn push(&self, route: impl Into<String>, payload: Value) {
            self.0.lock().unwrap().push((route.into(), payload));
        }

        fn find(&self, route: &str) -> Vec<Value> {
            self.0
                .lock()
                .unwrap()
                .iter()
                .filter(|(r, _)| r == route)
                .map(|(_, v)| v.clone())
                .collect()
        }
    }

    fn jira_error(status: StatusCode, message: &str) -> Response {
        (status, Json(json!({ "errorMessages": [message] }))).into_response()
    }

    async fn get_issue(Path(key): Path<String>) -> Response {
        let summary = match key.as_str() {
            "ABC-1" => "Build is red",
            "ABC-2" => "Broken",
            _ => return jira_error(StatusCode::NOT_FOUND, "Issue does not exist"),
        };
        Json(json!({ "id": "1000", "key": key, "fields": { "summary": summary } })).into_response()
    }

    async fn search(State(seen): State<Seen>, Query(params): Params) -> Json<Value> {
        seen.push("search", json!(params));
        Json(json!({ "issues": [{ "id": "7", "key": "ABC-7", "fields": { "summary": "found" } }] }))
    }

    async fn transitions(Path(key): Path<String>) -> Response {
        if key != "ABC-1" {
            return jira_error(StatusCode::NOT_FOUND, "Issue does not exist");
        }
        Json(json!({ "transitions": [
            { "id": "11", "name": "Start", "to": { "name": "In Progress" } },
            { "id": "21", "name": "Finish", "to": { "name": "Done" } },
            { "id": "31", "name": "Reject", "to": { "name": "Won't Do" } }
        ]}))
        .into_response()
    }

    async fn do_transition(
        State(seen): State<Seen>,
        Path(key): Path<String>,
        Json(body): Json<Value>,
    ) -> StatusCode {
        seen.push(format!("transition {}", key), body);
        StatusCode::NO_CONTENT
    }

    async fn assignable(Query(params): Params) -> Json<Value> {
        Json(match params.get("username").map(String::as_str) {
            Some("jdoe") => json!([{ "name": "jdoe", "displayName": "Jo Doe" }]),
            Some("smith") => json!([
                { "name": "asmith", "displayName": "Al Smith", "emailAddress": "al@example.com" },
                { "name": "bsmith", "displayName": "Bo Smith" }
            ]),
            _ => json!([]),
        })
    }

    async fn assignee(
        State(seen): State<Seen>,
        Path(key): Path<String>,
        Json(body): Json<Value>,
    ) -> StatusCode {
        seen.push(format!("assignee {}", key), body);
        StatusCode::NO_CONTENT
    }

    async fn create(State(seen): State<Seen>, Json(body): Json<Value>) -> Response {
        seen.push("create", body.clone());
        if body["fields"]["summary"] == "needs more" {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "errors": { "customfield_10": "Team is required." } })),
            )
                .into_response();
        }
        (StatusCode::CREATED, Json(json!({ "id": "1000", "key": "ABC-2" }))).into_response()
    }

    async fn add_comment(
        State(seen): State<Seen>,
        Path(key): Path<String>,
        Json(body): Json<Value>,
    ) -> Response {
        seen.push(format!("comment {}", key), body.clone());
        if key == "ABC-9" {
            return jira_error(
                StatusCode::FORBIDDEN,
                "you do not have the permission to comment on this issue.",
            );
        }
        Json(json!({ "id": "500", "body": body["body"] })).into_response()
    }

    async fn update_comment(
        State(seen): State<Seen>,
        Path((key, id)): Path<(String, String)>,
        Json(body): Json<Value>,
    ) -> Json<Value> {
        seen.push(format!("update comment {} {}", key, id), body.clone());
        Json(json!({ "id": id, "body": body["body"] }))
    }

    async fn attach() -> Json<Value> {
        Json(json!([{ "id": "9", "filename": "shot.png", "mimeType": "image/png", "size": 3 }]))
    }

    async fn projects(Query(params): Params) -> Response {
        if params.contains_key("expand") {
            return jira_error(StatusCode::BAD_REQUEST, "expand is not supported");
        }
        Json(json!([{ "id": "100", "key": "ABC", "name": "Alpha" }])).into_response()
    }

    async fn project() -> Json<Value> {
        Json(json!({ "id": "100", "key": "ABC", "name": "Alpha", "issueTypes": [
            { "id": "3", "name": "Task" },
            { "id": "5", "name": "Sub-task", "subtask": true }
        ]}))
    }

    async fn statuses() -> Json<Value> {
        Json(json!([{ "id": "3", "name": "Task", "statuses": [{ "name": "Open" }] }]))
    }

    async fn createmeta(State(seen): State<Seen>, Query(params): Params) -> Json<Value> {
        seen.push("createmeta", json!(params));
        Json(json!({ "expand": "projects", "projects": [{
            "id": "100", "key": "ABC", "name": "Alpha",
            "issuetypes": [{ "id": "3", "name": "Task", "fields": { "summary": { "required": true } } }]
        }]}))
    }

    async fn fake_jira() -> (String, Seen) {
        let seen = Seen::default();
        let app = Router::new()
            .route("/rest/api/2/search", get(search))
            .route("/rest/api/2/issue", post(create))
            .route("/rest/api/2/issue/createmeta", get(createmeta))
            .route("/rest/api/2/issue/{key}", get(get_issue))
            .route(
                "/rest/api/2/issue/{key}/transitions",
                get(transitions).post(do_transition),
            )
            .route("/rest/api/2/issue/{key}/assignee", put(assignee))
            .route("/rest/api/2/issue/{key}/comment", post(add_comment))
            .route("/rest/api/2/issue/{key}/comment/{id}", put(update_comment))
            .route("/rest/api/2/issue/{key}/attachments", post(attach))
            .route("/rest/api/2/user/assignable/search", get(assignable))
            .route("/rest/api/2/project", get(projects))
            .route("/rest/api/2/project/{key}", get(project))
            .route("/rest/api/2/project/{key}/statuses", get(statuses))
            .with_state(seen.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        (format!("http://{}", addr), seen)
    }

    struct Env {
        f: Fixture,
        instance: Instance,
        user_id: Id,
        seen: Seen,
    }

    async fn connected() -> Env {
        let (url, seen) = fake_jira().await;
        let f = fixture(true);
        let instance = Instance::server(&url).unwrap();
        f.plugin.install_instance(instance.clone()).await.unwrap();

        let user_id = Id::new("u1");
        let mut connection = Connection::new(Credentials::Bearer { token: "t".into() });
        connection.name = "jdoe".into();
        connection.display_name = "Jo Doe".into();
        f.plugin
            .connect_user(instance.id(), &user_id, connection)
            .await
            .unwrap();

        Env {
            f,
            instance,
            user_id,
            seen,
        }
    }

    fn screenshot() -> FileInfo {
        FileInfo {
            id: "f1".into(),
            name: "shot.png".into(),
            size: 3,
            mime_type: "image/png".into(),
            path: "files/f1".into(),
        }
    }

    #[test]
    fn test_issue_key_pattern() {
        assert!(ISSUE_KEY.is_match("ABC-123"));
        assert!(ISSUE_KEY.is_match("abc2-1"));
        assert!(!ISSUE_KEY.is_match("ABC-"));
        assert!(!ISSUE_KEY.is_match("ABC 1"));
        assert!(!ISSUE_KEY.is_match("fix the build"));
    }

    #[test]
    fn test_squash() {
        assert_eq!(squash("  In   Progress "), "inprogress");
        assert!(squash("In Progress").contains(&squash("progr")));
    }

    #[test]
    fn test_links() {
        let instance = Instance::server("https://jira.example.com").unwrap();
        let mut issue = Issue {
            key: "ABC-1".into(),
            ..Default::default()
        };
        issue.fields.summary = "Build is red".into();
        assert_eq!(
            md_key_summary_link(&instance, &issue),
            "[ABC-1](https://jira.example.com/browse/ABC-1) Build is red"
        );
    }

    #[test]
    fn test_connection_user() {
        let mut connection = Connection::new(Credentials::Bearer { token: "t".into() });
        connection.name = "jdoe".into();
        connection.display_name = "Jo Doe".into();
        let user = connection_user(&connection);
        assert_eq!(user.name, "jdoe");
        assert_eq!(user.display_name, "Jo Doe");
    }

    #[tokio::test]
    async fn test_search_puts_exact_match_first() {
        let env = connected().await;
        let issues = env
            .f
            .plugin
            .get_search_issues(env.instance.id(), &env.user_id, "ABC-1", "", "", "oops")
            .await
            .unwrap();
        let keys: Vec<&str> = issues.iter().map(|i| i.key.as_str()).collect();
        assert_eq!(keys, vec!["ABC-1", "ABC-7"]);

        let params = &env.seen.find("search")[0];
        assert_eq!(params["jql"], r#"text ~ "ABC-1" OR text ~ "ABC-1*""#);
        assert_eq!(params["maxResults"], "50");
        assert_eq!(params["fields"], "key,summary");
    }

    #[tokio::test]
    async fn test_search_escapes_quotes() {
        let env = connected().await;
        let issues = env
            .f
            .plugin
            .get_search_issues(env.instance.id(), &env.user_id, r#"say "hi""#, "", "key", "5")
            .await
            .unwrap();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].key, "ABC-7");

        let params = &env.seen.find("search")[0];
        assert_eq!(params["jql"], r#"text ~ "say \"hi\"" OR text ~ "say \"hi\"*""#);
        assert_eq!(params["maxResults"], "5");
        assert_eq!(params["fields"], "key");
    }

    fn transition(env: &Env, issue_key: &str, to_state: &str) -> TransitionIssue {
        TransitionIssue {
            instance_id: env.instance.id().clone(),
            user_id: env.user_id.clone(),
            channel_id: "town".into(),
            issue_key: issue_key.into(),
            to_state: to_state.into(),
        }
    }

    #[tokio::test]
    async fn test_transition_matches_state() {
        let env = connected().await;
        let msg = env
            .f
            .plugin
            .transition_issue(&transition(&env, "ABC-1", "in progress"))
            .await
            .unwrap();
        assert_eq!(
            msg,
            format!(
                "[ABC-1]({}) transitioned to `In Progress`",
                env.instance.browse_url("ABC-1")
            )
        );
        assert_eq!(
            env.seen.find("transition ABC-1"),
            vec![json!({ "transition": { "id": "11" } })]
        );
        assert_eq!(env.f.notifier.ephemeral_messages(&env.user_id).await, vec![msg]);
    }

    #[tokio::test]
    async fn test_transition_rejects_unclear_state() {
        let env = connected().await;

        let err = env
            .f
            .plugin
            .transition_issue(&transition(&env, "ABC-1", "do"))
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            r#"please be more specific, "do" matched several states: "Done, Won't Do""#
        );

        let err = env
            .f
            .plugin
            .transition_issue(&transition(&env, "ABC-1", "closed"))
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            r#""closed" is not a valid state. Please use one of: "In Progress, Done, Won't Do""#
        );

        let result = env
            .f
            .plugin
            .transition_issue(&transition(&env, "ABC-404", "done"))
            .await;
        assert_eq!(status_code_of(&result), 404);
        assert!(result
            .unwrap_err()
            .to_string()
            .starts_with("we couldn't find the issue key."));

        assert!(env.seen.find("transition ABC-1").is_empty());
    }

    #[tokio::test]
    async fn test_assign_issue() {
        let env = connected().await;
        let plugin = &env.f.plugin;
        let id = env.instance.id();

        let err = plugin
            .assign_issue(id, &env.user_id, "ABC-1", "jd", None)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "`jd` contains less than 3 characters.");

        let msg = plugin
            .assign_issue(id, &env.user_id, "ABC-1", "jdoe", None)
            .await
            .unwrap();
        assert_eq!(
            msg,
            format!(
                "`Jo Doe` assigned to Jira issue [ABC-1]({})",
                env.instance.browse_url("ABC-1")
            )
        );

        let err = plugin
            .assign_issue(id, &env.user_id, "ABC-1", "smith", None)
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "`smith` matches 2 or more users.  Please specify a unique assignee.\n\
             * Al Smith (asmith, al@example.com)\n\
             * Bo Smith (bsmith)\n"
        );

        let err = plugin
            .assign_issue(id, &env.user_id, "ABC-1", "nobody", None)
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "we couldn't find the assignee. Please use a Jira member and try again"
        );

        let err = plugin
            .assign_issue(id, &env.user_id, "ABC-404", "jdoe", None)
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "We couldn't find the issue key `ABC-404`.  Please confirm the issue key and try again."
        );

        // A picked cloud user is sent by account ID only
        let picked = User {
            account_id: "acc-1".into(),
            name: "cloudy".into(),
            display_name: "Cloud Person".into(),
            ..Default::default()
        };
        plugin
            .assign_issue(id, &env.user_id, "ABC-1", "cloud", Some(picked))
            .await
            .unwrap();

        assert_eq!(
            env.seen.find("assignee ABC-1"),
            vec![
                json!({ "name": "jdoe", "displayName": "Jo Doe" }),
                json!({ "accountId": "acc-1", "displayName": "Cloud Person" }),
            ]
        );
    }

    #[tokio::test]
    async fn test_unassign_issue() {
        let env = connected().await;
        let msg = env
            .f
            .plugin
            .unassign_issue(env.instance.id(), &env.user_id, "ABC-1")
            .await
            .unwrap();
        assert_eq!(
            msg,
            format!("Unassigned Jira issue [ABC-1]({})", env.instance.browse_url("ABC-1"))
        );
        assert_eq!(env.seen.find("assignee ABC-1"), vec![json!({ "name": null })]);

        let err = env
            .f
            .plugin
            .unassign_issue(env.instance.id(), &env.user_id, "ABC-404")
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "We couldn't find the issue key `ABC-404`. Please confirm the issue key and try again."
        );
    }

    fn create_input(env: &Env, summary: &str) -> CreateIssue {
        CreateIssue {
            instance_id: env.instance.id().clone(),
            user_id: env.user_id.clone(),
            channel_id: "town".into(),
            current_team: "team".into(),
            fields: IssueFields {
                project: Some(Project::by_key("ABC")),
                summary: summary.into(),
                issue_type: Some(IssueType {
                    id: "3".into(),
                    name: "Task".into(),
                    ..Default::default()
                }),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_issue_from_post() {
        let env = connected().await;
        env.f
            .host
            .add_post(Post {
                id: "p1".into(),
                user_id: env.user_id.clone(),
                channel_id: "support".into(),
                root_id: String::new(),
                message: "it broke".into(),
                file_ids: vec!["f1".into()],
            })
            .await;
        env.f.host.add_file(screenshot(), vec![1, 2, 3]).await;

        let mut input = create_input(&env, "Broken");
        input.post_id = "p1".into();
        input.fields.description = "Steps".into();
        input.required_fields_not_covered = vec![("Reporter".into(), "Reporter".into())];

        let result = env.f.plugin.create_issue(input).await.unwrap();
        assert_eq!(result.issue.key, "ABC-2");
        assert_eq!(result.issue.summary(), "Broken");

        let sent = &env.seen.find("create")[0];
        assert_eq!(
            sent["fields"]["description"],
            "Steps\n\n_Issue created from a [message in Mattermost|https://chat.example.com/team/pl/p1]_."
        );
        assert_eq!(sent["fields"]["reporter"]["name"], "jdoe");

        let report = result.attachments.unwrap().join().await.unwrap();
        assert_eq!(report.uploaded.len(), 1);
        assert!(report.failed.is_empty());
        assert_eq!(report.comment_updated, None);

        let browse = env.instance.browse_url("ABC-2");
        let posts = env.f.notifier.posts().await;
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].channel_id, "support");
        assert_eq!(posts[0].root_id, "p1");
        assert_eq!(
            posts[0].message,
            format!("Created a Jira issue: [ABC-2]({}) Broken", browse)
        );
        assert_eq!(
            env.f.notifier.ephemeral_messages(&env.user_id).await,
            vec![format!("Created Jira issue [ABC-2]({})", browse)]
        );

        let connection = env
            .f
            .store
            .load_connection(env.instance.id(), &env.user_id)
            .await
            .unwrap();
        assert_eq!(
            connection.saved_field_values,
            Some(SavedFieldValues {
                project_key: "ABC".into(),
                issue_type: "3".into(),
            })
        );
    }

    #[tokio::test]
    async fn test_create_issue_with_uncovered_fields() {
        let env = connected().await;
        let mut input = create_input(&env, "Broken");
        input.required_fields_not_covered = vec![("customfield_10".into(), "Team".into())];

        let err = env.f.plugin.create_issue(input).await.unwrap_err();
        assert!(matches!(err, JiraLinkError::Unsupported(_)));
        assert_eq!(
            err.to_string(),
            format!("issue can not be created via API: {}", MSG_UNSUPPORTED_REQUIRED_FIELDS)
        );

        let messages = env.f.notifier.ephemeral_messages(&env.user_id).await;
        assert_eq!(messages.len(), 1);
        assert!(messages[0].starts_with("[Please create your Jira issue manually](http://127.0.0.1:"));
        assert!(messages[0].ends_with("support:\n- Team\n"));
        assert!(env.seen.find("create").is_empty());
    }

    #[tokio::test]
    async fn test_create_issue_rejected_for_required_field() {
        let env = connected().await;
        let err = env
            .f
            .plugin
            .create_issue(create_input(&env, "needs more"))
            .await
            .unwrap_err();
        assert!(matches!(err, JiraLinkError::Unsupported(_)));
        let text = err.to_string();
        assert!(text.starts_with("issue can not be created via API: Failed to create issue."));
        assert!(text.contains("Team is required."));

        let messages = env.f.notifier.ephemeral_messages(&env.user_id).await;
        assert_eq!(messages.len(), 1);
        assert!(messages[0].starts_with("Failed to create issue."));
        assert!(env.f.notifier.posts().await.is_empty());
    }

    #[tokio::test]
    async fn test_attach_comment_with_files() {
        let env = connected().await;
        env.f
            .host
            .add_user(HostUser {
                id: Id::new("u2"),
                username: "alice".into(),
            })
            .await;
        env.f
            .host
            .add_post(Post {
                id: "p2".into(),
                user_id: Id::new("u2"),
                channel_id: "support".into(),
                root_id: "p0".into(),
                message: "look at this".into(),
                file_ids: vec!["f1".into()],
            })
            .await;
        env.f.host.add_file(screenshot(), vec![1, 2, 3]).await;

        let input = AttachComment {
            instance_id: env.instance.id().clone(),
            user_id: env.user_id.clone(),
            post_id: "p2".into(),
            current_team: "team".into(),
            issue_key: "ABC-1".into(),
        };
        let attached = env.f.plugin.attach_comment_to_issue(&input).await.unwrap();
        assert_eq!(attached.comment.id, "500");

        let body = "*@Jo Doe attached a* [message|https://chat.example.com/team/pl/p2] *from @alice*\nlook at this";
        assert_eq!(env.seen.find("comment ABC-1")[0]["body"], body);

        let report = attached.attachments.unwrap().join().await.unwrap();
        assert_eq!(report.comment_updated, Some(true));
        assert_eq!(
            env.seen.find("update comment ABC-1 500")[0]["body"],
            format!("{}\n\nAttachment: !shot.png!", body)
        );

        let posts = env.f.notifier.posts().await;
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].user_id, env.user_id);
        assert_eq!(posts[0].root_id, "p0");
        assert_eq!(
            posts[0].message,
            format!("Message attached to [ABC-1]({})", env.instance.browse_url("ABC-1"))
        );
    }

    #[tokio::test]
    async fn test_attach_comment_failures() {
        let env = connected().await;
        env.f
            .host
            .add_user(HostUser {
                id: Id::new("u2"),
                username: "alice".into(),
            })
            .await;
        env.f
            .host
            .add_post(Post {
                id: "p3".into(),
                ..Post::new(Id::new("u2"), "support", "hi")
            })
            .await;
        env.f
            .host
            .add_post(Post {
                id: "p4".into(),
                ..Post::new(Id::new("u3"), "support", "who")
            })
            .await;

        let mut input = AttachComment {
            instance_id: env.instance.id().clone(),
            user_id: env.user_id.clone(),
            post_id: "p3".into(),
            current_team: "team".into(),
            issue_key: "ABC-9".into(),
        };
        let err = env.f.plugin.attach_comment_to_issue(&input).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "you do not have permission to create a comment in the selected Jira issue. Please choose another issue or contact your Jira admin"
        );

        input.post_id = "p4".into();
        let err = env.f.plugin.attach_comment_to_issue(&input).await.unwrap_err();
        assert!(err.is_not_found());
        assert!(err.to_string().starts_with("failed to load post.UserID u3"));
        assert!(env.f.notifier.posts().await.is_empty());
    }

    #[tokio::test]
    async fn test_get_issue_by_key() {
        let env = connected().await;
        let issue = env
            .f
            .plugin
            .get_issue_by_key(env.instance.id(), &env.user_id, "ABC-1")
            .await
            .unwrap();
        assert_eq!(issue.summary(), "Build is red");

        let result = env
            .f
            .plugin
            .get_issue_by_key(env.instance.id(), &env.user_id, "ABC-404")
            .await;
        assert_eq!(status_code_of(&result), 404);
        assert_eq!(result.unwrap_err().to_string(), MSG_ISSUE_NOT_VISIBLE);
    }

    #[tokio::test]
    async fn test_project_metadata_falls_back_per_project() {
        let env = connected().await;
        let metadata = env
            .f
            .plugin
            .get_jira_project_metadata(env.instance.id(), &env.user_id)
            .await
            .unwrap();
        assert_eq!(metadata.projects, vec![("ABC".to_string(), "Alpha".to_string())]);
        let names: Vec<&str> = metadata.issues_per_project["ABC"]
            .iter()
            .map(|t| t.name.as_str())
            .collect();
        assert_eq!(names, vec!["Task"]);
        assert!(metadata.saved_field_values.is_none());
    }

    #[tokio::test]
    async fn test_create_metadata_for_projects() {
        let env = connected().await;
        let metadata = env
            .f
            .plugin
            .get_create_issue_metadata_for_projects(env.instance.id(), &env.user_id, "ABC")
            .await
            .unwrap();
        assert_eq!(metadata.meta.projects[0].key, "ABC");
        assert_eq!(metadata.statuses[0].statuses[0].name, "Open");

        let params = &env.seen.find("createmeta")[0];
        assert_eq!(params["expand"], "projects.issuetypes.fields");
        assert_eq!(params["projectKeys"], "ABC");
    }
}
