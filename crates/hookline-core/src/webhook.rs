//! Inbound webhooks, delivery audit records and source-control event payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{DeliveryId, ProjectId, WebhookId};

/// Prefix of branch refs in push events.
pub const BRANCH_REF_PREFIX: &str = "refs/heads/";

/// A registered inbound event subscription.
///
/// The secret is only ever held encrypted; it is decrypted transiently
/// at signature verification time.
#[derive(Clone, Serialize, Deserialize)]
pub struct Webhook {
    pub id: WebhookId,
    pub project_id: ProjectId,
    #[serde(skip_serializing, default)]
    pub secret_ciphertext: String,
    /// Subscribed event types. Empty means every event.
    pub events: Vec<String>,
    pub active: bool,
    pub last_triggered_at: Option<DateTime<Utc>>,
}

impl Webhook {
    pub fn subscribes_to(&self, event_type: &str) -> bool {
        self.events.is_empty() || self.events.iter().any(|e| e == event_type || e == "*")
    }
}

impl std::fmt::Debug for Webhook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Webhook")
            .field("id", &self.id)
            .field("project_id", &self.project_id)
            .field("secret_ciphertext", &"<redacted>")
            .field("events", &self.events)
            .field("active", &self.active)
            .field("last_triggered_at", &self.last_triggered_at)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryOutcome {
    Success,
    Failed,
}

impl std::fmt::Display for DeliveryOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryOutcome::Success => write!(f, "success"),
            DeliveryOutcome::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for DeliveryOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "success" => Ok(DeliveryOutcome::Success),
            "failed" => Ok(DeliveryOutcome::Failed),
            _ => Err(format!("Unknown delivery outcome: {}", s)),
        }
    }
}

/// Append-only audit record of one processed delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookDelivery {
    pub id: DeliveryId,
    pub webhook_id: WebhookId,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub outcome: DeliveryOutcome,
    pub response: Option<String>,
    pub error: Option<String>,
    pub attempt: i32,
    pub created_at: DateTime<Utc>,
}

/// A delivery record before it is stored.
#[derive(Debug, Clone)]
pub struct NewDelivery {
    pub webhook_id: WebhookId,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub outcome: DeliveryOutcome,
    pub response: Option<String>,
    pub error: Option<String>,
    pub attempt: i32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RepositoryInfo {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub html_url: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GitUser {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PushCommit {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub author: Option<GitUser>,
}

/// A `push` event.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PushEvent {
    pub r#ref: String,
    #[serde(default)]
    pub before: String,
    #[serde(default)]
    pub after: String,
    #[serde(default)]
    pub repository: RepositoryInfo,
    #[serde(default)]
    pub pusher: GitUser,
    #[serde(default)]
    pub commits: Vec<PushCommit>,
}

impl PushEvent {
    /// Branch name with the `refs/heads/` prefix stripped.
    pub fn branch(&self) -> &str {
        self.r#ref
            .strip_prefix(BRANCH_REF_PREFIX)
            .unwrap_or(&self.r#ref)
    }

    pub fn head_message(&self) -> Option<&str> {
        self.commits.first().map(|c| c.message.as_str())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GitRef {
    #[serde(default)]
    pub r#ref: String,
    #[serde(default)]
    pub sha: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PullRequestUser {
    #[serde(default)]
    pub login: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PullRequest {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub number: u64,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub html_url: String,
    #[serde(default)]
    pub head: GitRef,
    #[serde(default)]
    pub base: GitRef,
    #[serde(default)]
    pub user: Option<PullRequestUser>,
}

/// A `pull_request` event.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PullRequestEvent {
    pub action: String,
    #[serde(default)]
    pub number: u64,
    pub pull_request: PullRequest,
    #[serde(default)]
    pub repository: RepositoryInfo,
}

impl PullRequestEvent {
    /// Only newly opened or updated pull requests start pipelines.
    pub fn should_trigger(&self) -> bool {
        matches!(self.action.as_str(), "opened" | "synchronize")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_event_parses_minimal_payload() {
        let event: PushEvent = serde_json::from_str(
            r#"{"ref":"refs/heads/main","after":"abc123","commits":[{"message":"fix bug"}],"pusher":{"name":"alice"}}"#,
        )
        .unwrap();
        assert_eq!(event.branch(), "main");
        assert_eq!(event.after, "abc123");
        assert_eq!(event.head_message(), Some("fix bug"));
        assert_eq!(event.pusher.name, "alice");
    }

    #[test]
    fn test_branch_without_prefix_is_kept() {
        let event = PushEvent {
            r#ref: "refs/tags/v1.0".to_string(),
            ..Default::default()
        };
        assert_eq!(event.branch(), "refs/tags/v1.0");
    }

    #[test]
    fn test_pull_request_actions() {
        let mut event = PullRequestEvent {
            action: "opened".to_string(),
            ..Default::default()
        };
        assert!(event.should_trigger());
        event.action = "synchronize".to_string();
        assert!(event.should_trigger());
        event.action = "labeled".to_string();
        assert!(!event.should_trigger());
    }

    #[test]
    fn test_debug_redacts_secret() {
        let webhook = Webhook {
            id: WebhookId::new(),
            project_id: ProjectId::new(),
            secret_ciphertext: "c2VjcmV0".to_string(),
            events: vec!["push".to_string()],
            active: true,
            last_triggered_at: None,
        };
        let debug = format!("{:?}", webhook);
        assert!(!debug.contains("c2VjcmV0"));
        assert!(webhook.subscribes_to("push"));
        assert!(!webhook.subscribes_to("pull_request"));
    }
}
