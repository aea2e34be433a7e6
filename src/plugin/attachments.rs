//! Background attachment uploads
//!
//! Copying post files to Jira can take a while, so it runs in a spawned task
//! after the user has had their reply. Failures reach the user as a direct
//! message from the bot; the task handle reports what happened for callers
//! that want to wait.

use crate::client::model::Comment;
use crate::client::{AttachmentUpload, Client};
use crate::host::{HostApi, Notifier};
use crate::types::{ByteSize, Id};
use crate::{JiraLinkError, Result};
use std::fmt::Display;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Longest error text included in a failure message, in bytes
const MAX_ERROR_TEXT: usize = 2048;

/// Outcome of one background upload run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttachmentReport {
    pub issue_key: String,
    pub uploaded: Vec<AttachmentUpload>,
    /// Host file IDs that could not be attached
    pub failed: Vec<String>,
    /// Whether the comment edit with attachment links succeeded, when one was due
    pub comment_updated: Option<bool>,
}

/// Handle to a spawned upload run
#[derive(Debug)]
pub struct AttachmentTask {
    handle: JoinHandle<AttachmentReport>,
}

impl AttachmentTask {
    /// Wait for the uploads to finish
    pub async fn join(self) -> Result<AttachmentReport> {
        self.handle
            .await
            .map_err(|e| JiraLinkError::Other(format!("attachment task failed: {}", e)))
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

/// Whether Jira renders this MIME type inline (`!name!` markup)
pub(crate) fn is_embeddable_mime(mime_type: &str) -> bool {
    let mime_type = mime_type.to_ascii_lowercase();
    mime_type.starts_with("image/")
        || mime_type.starts_with("video/")
        || mime_type.starts_with("audio/")
}

/// Jira wiki markup linking to an uploaded attachment
pub(crate) fn attachment_markup(upload: &AttachmentUpload) -> String {
    if is_embeddable_mime(&upload.mime_type) {
        format!("\n\nAttachment: !{}!", upload.jira_name)
    } else {
        format!("\n\nAttachment: [^{}]", upload.jira_name)
    }
}

fn truncate_at_boundary(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// Tell a user that an attachment step failed
pub async fn notify_on_failed_attachment(
    notifier: &dyn Notifier,
    user_id: &Id,
    issue_key: &str,
    err: &(dyn Display + Sync),
    detail: &str,
) {
    let msg = format!("Failed to attach to issue: {}, {}", issue_key, detail);
    error!(issue = issue_key, user = %user_id, "{}: {}", msg, err);

    let err_text = err.to_string();
    let message = format!(
        "{}. Please notify your system administrator.\n{}",
        msg,
        truncate_at_boundary(&err_text, MAX_ERROR_TEXT)
    );
    if let Err(e) = notifier.direct_message(user_id, &message).await {
        warn!(user = %user_id, error = %e, "Failed to send attachment failure message");
    }
}

/// What to upload and where
pub(crate) struct UploadJob {
    pub client: Arc<dyn Client>,
    pub host: Arc<dyn HostApi>,
    pub notifier: Arc<dyn Notifier>,
    pub user_id: Id,
    /// Key used in messages and comment edits
    pub issue_key: String,
    /// Issue ID or key the files are posted to
    pub target: String,
    pub file_ids: Vec<String>,
    pub max_size: ByteSize,
    /// Comment to extend with links once all uploads are done
    pub comment: Option<Comment>,
}

impl UploadJob {
    pub fn spawn(self) -> AttachmentTask {
        AttachmentTask {
            handle: tokio::spawn(self.run()),
        }
    }

    async fn run(self) -> AttachmentReport {
        let mut report = AttachmentReport {
            issue_key: self.issue_key.clone(),
            ..Default::default()
        };

        let mut extra_text = String::new();
        for file_id in &self.file_ids {
            match self
                .client
                .add_attachment(self.host.as_ref(), &self.target, file_id, self.max_size)
                .await
            {
                Ok(upload) => {
                    debug!(issue = %self.issue_key, file = %upload.host_name, "Uploaded attachment");
                    extra_text.push_str(&attachment_markup(&upload));
                    report.uploaded.push(upload);
                }
                Err(e) => {
                    notify_on_failed_attachment(
                        self.notifier.as_ref(),
                        &self.user_id,
                        &self.issue_key,
                        &e.source,
                        &format!("file: {}", e.file_name),
                    )
                    .await;
                    report.failed.push(file_id.clone());
                }
            }
        }

        if let Some(mut comment) = self.comment {
            if !extra_text.is_empty() {
                comment.body.push_str(&extra_text);
                let updated = self.client.update_comment(&self.issue_key, &comment).await;
                if let Err(e) = &updated {
                    notify_on_failed_attachment(
                        self.notifier.as_ref(),
                        &self.user_id,
                        &self.issue_key,
                        e,
                        "failed to completely update comment with attachments",
                    )
                    .await;
                }
                report.comment_updated = Some(updated.is_ok());
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::RecordingNotifier;

    #[test]
    fn test_markup() {
        let upload = |mime: &str| AttachmentUpload {
            host_name: "shot.png".into(),
            jira_name: "shot.png".into(),
            mime_type: mime.into(),
        };
        assert_eq!(attachment_markup(&upload("image/png")), "\n\nAttachment: !shot.png!");
        assert_eq!(attachment_markup(&upload("Video/mp4")), "\n\nAttachment: !shot.png!");
        assert_eq!(
            attachment_markup(&upload("application/pdf")),
            "\n\nAttachment: [^shot.png]"
        );
    }

    #[test]
    fn test_truncate_keeps_char_boundary() {
        let text = "é".repeat(2000);
        let cut = truncate_at_boundary(&text, MAX_ERROR_TEXT);
        assert_eq!(cut.len(), MAX_ERROR_TEXT);
        assert_eq!(truncate_at_boundary("aé", 2), "a");
        assert_eq!(truncate_at_boundary("short", MAX_ERROR_TEXT), "short");
    }

    #[tokio::test]
    async fn test_notify_truncates_error() {
        let notifier = RecordingNotifier::new();
        let user = Id::new("u1");
        let err = JiraLinkError::Other("x".repeat(5000));
        notify_on_failed_attachment(&notifier, &user, "ABC-1", &err, "file: big.bin").await;

        let messages = notifier.direct_messages(&user).await;
        assert_eq!(messages.len(), 1);
        let (head, body) = messages[0].split_once('\n').unwrap();
        assert_eq!(
            head,
            "Failed to attach to issue: ABC-1, file: big.bin. Please notify your system administrator."
        );
        assert_eq!(body.len(), MAX_ERROR_TEXT);
    }
}
