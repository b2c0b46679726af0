//! Authenticates inbound webhook deliveries and turns them into runs.

use std::sync::Arc;

use chrono::Utc;
use hookline_core::WebhookId;
use hookline_core::pipeline::{PipelineRun, Project, TriggerCondition, TriggerMetadata};
use hookline_core::secret::SecretCipher;
use hookline_core::webhook::{
    DeliveryOutcome, NewDelivery, PullRequestEvent, PushEvent, Webhook, WebhookDelivery,
};
use hookline_db::{DbError, PipelineRepo, ProjectRepo, WebhookRepo};
use hookline_queue::QueueError;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use super::pipeline_trigger::{PipelineTrigger, TriggerError};
use super::signature;

#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("webhook signature mismatch")]
    SignatureMismatch,

    #[error("webhook {0} not found")]
    WebhookNotFound(WebhookId),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error(transparent)]
    Db(#[from] DbError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Core(#[from] hookline_core::Error),
}

impl From<TriggerError> for WebhookError {
    fn from(err: TriggerError) -> Self {
        match err {
            TriggerError::RunNotFound(id) => {
                WebhookError::Core(hookline_core::Error::NotFound(format!("pipeline run {}", id)))
            }
            TriggerError::Core(e) => WebhookError::Core(e),
            TriggerError::Db(e) => WebhookError::Db(e),
        }
    }
}

/// Result of one processed delivery.
#[derive(Debug)]
pub struct ProcessedDelivery {
    pub delivery: WebhookDelivery,
    pub runs: Vec<PipelineRun>,
}

/// What handling an authenticated event amounted to.
struct Handled {
    runs: Vec<PipelineRun>,
    summary: String,
}

impl Handled {
    fn ignored(summary: impl Into<String>) -> Self {
        Self {
            runs: Vec::new(),
            summary: summary.into(),
        }
    }
}

pub struct WebhookProcessor {
    webhooks: Arc<dyn WebhookRepo>,
    projects: Arc<dyn ProjectRepo>,
    pipelines: Arc<dyn PipelineRepo>,
    cipher: Arc<dyn SecretCipher>,
    trigger: Arc<PipelineTrigger>,
}

impl WebhookProcessor {
    pub fn new(
        webhooks: Arc<dyn WebhookRepo>,
        projects: Arc<dyn ProjectRepo>,
        pipelines: Arc<dyn PipelineRepo>,
        cipher: Arc<dyn SecretCipher>,
        trigger: Arc<PipelineTrigger>,
    ) -> Self {
        Self {
            webhooks,
            projects,
            pipelines,
            cipher,
            trigger,
        }
    }

    /// Verify and process one delivery.
    ///
    /// A delivery that cannot be attributed to a webhook, or whose signature
    /// does not match, leaves no trace. Everything past verification records
    /// exactly one delivery: success when handling finished (even if nothing
    /// was triggered), failed with the error text otherwise.
    pub async fn process(
        &self,
        webhook_id: WebhookId,
        event_type: &str,
        signature_header: Option<&str>,
        body: &[u8],
    ) -> Result<ProcessedDelivery, WebhookError> {
        let webhook = self
            .webhooks
            .get_by_id(webhook_id)
            .await?
            .ok_or(WebhookError::WebhookNotFound(webhook_id))?;

        self.authenticate(&webhook, body, signature_header)?;

        let payload = match serde_json::from_slice::<Value>(body) {
            Ok(payload) => payload,
            Err(e) => {
                let err = WebhookError::InvalidPayload(e.to_string());
                let snapshot = Value::String(String::from_utf8_lossy(body).into_owned());
                self.record_failure(&webhook, event_type, snapshot, &err)
                    .await;
                return Err(err);
            }
        };

        info!(webhook_id = %webhook.id, event = %event_type, "Received webhook");

        let handled = self.handle(&webhook, event_type, &payload).await;
        match handled {
            Ok(handled) => {
                let delivery = self
                    .webhooks
                    .record_delivery(NewDelivery {
                        webhook_id: webhook.id,
                        event_type: event_type.to_string(),
                        payload,
                        outcome: DeliveryOutcome::Success,
                        response: Some(handled.summary),
                        error: None,
                        attempt: 1,
                    })
                    .await?;
                // The delivery is already recorded as a success.
                if webhook.active {
                    if let Err(e) = self
                        .webhooks
                        .touch_last_triggered(webhook.id, Utc::now())
                        .await
                    {
                        warn!(webhook_id = %webhook.id, error = %e, "Failed to update last triggered time");
                    }
                }
                Ok(ProcessedDelivery {
                    delivery,
                    runs: handled.runs,
                })
            }
            Err(err) => {
                self.record_failure(&webhook, event_type, payload, &err)
                    .await;
                Err(err)
            }
        }
    }

    /// The plaintext secret only lives for the duration of this call.
    fn authenticate(
        &self,
        webhook: &Webhook,
        body: &[u8],
        signature_header: Option<&str>,
    ) -> Result<(), WebhookError> {
        let secret = self.cipher.decrypt(&webhook.secret_ciphertext)?;
        if signature::verify(secret.as_bytes(), body, signature_header) {
            Ok(())
        } else {
            warn!(webhook_id = %webhook.id, "Invalid webhook signature");
            Err(WebhookError::SignatureMismatch)
        }
    }

    async fn record_failure(
        &self,
        webhook: &Webhook,
        event_type: &str,
        payload: Value,
        err: &WebhookError,
    ) {
        error!(webhook_id = %webhook.id, event = %event_type, error = %err, "Webhook processing failed");
        let recorded = self
            .webhooks
            .record_delivery(NewDelivery {
                webhook_id: webhook.id,
                event_type: event_type.to_string(),
                payload,
                outcome: DeliveryOutcome::Failed,
                response: None,
                error: Some(err.to_string()),
                attempt: 1,
            })
            .await;
        if let Err(e) = recorded {
            error!(webhook_id = %webhook.id, error = %e, "Failed to record webhook delivery");
        }
    }

    async fn handle(
        &self,
        webhook: &Webhook,
        event_type: &str,
        payload: &Value,
    ) -> Result<Handled, WebhookError> {
        if !webhook.active {
            info!(webhook_id = %webhook.id, "Webhook inactive, ignoring event");
            return Ok(Handled::ignored("webhook inactive"));
        }
        if event_type == "ping" {
            info!(webhook_id = %webhook.id, "Ping event received");
            return Ok(Handled::ignored("pong"));
        }
        if !webhook.subscribes_to(event_type) {
            info!(webhook_id = %webhook.id, event = %event_type, "Event not subscribed, ignoring");
            return Ok(Handled::ignored("event not subscribed"));
        }
        let Some(project) = self.projects.find(webhook.project_id).await? else {
            warn!(webhook_id = %webhook.id, project_id = %webhook.project_id, "Webhook project not found");
            return Ok(Handled::ignored("project not found"));
        };

        match event_type {
            "push" => {
                let event: PushEvent = serde_json::from_value(payload.clone())
                    .map_err(|e| WebhookError::InvalidPayload(e.to_string()))?;
                self.handle_push(&project, event).await
            }
            "pull_request" => {
                let event: PullRequestEvent = serde_json::from_value(payload.clone())
                    .map_err(|e| WebhookError::InvalidPayload(e.to_string()))?;
                self.handle_pull_request(&project, event).await
            }
            other => {
                info!(event = %other, "Unhandled event type");
                Ok(Handled::ignored(format!("unhandled event {}", other)))
            }
        }
    }

    async fn handle_push(&self, project: &Project, event: PushEvent) -> Result<Handled, WebhookError> {
        let branch = event.branch().to_string();
        info!(project = %project.name, branch = %branch, sha = %event.after, "Processing push event");

        let pipelines = self
            .pipelines
            .find_active_by_project(
                project.id,
                &[TriggerCondition::Push, TriggerCondition::Webhook],
            )
            .await?;

        let author = event.commits.first().and_then(|c| c.author.as_ref());
        let metadata = TriggerMetadata {
            branch: branch.clone(),
            commit_hash: event.after.clone(),
            commit_message: event.head_message().map(str::to_string),
            author_name: author.map(|a| a.name.clone()),
            author_email: author.and_then(|a| a.email.clone()),
            repository_url: repository_url(&event.repository.html_url, project),
            triggered_by: triggered_by(&event.pusher.name),
            ..Default::default()
        };

        let mut runs = Vec::new();
        for pipeline in pipelines {
            if let Some(filter) = &project.branch {
                if filter != &branch {
                    debug!(pipeline = %pipeline.name, filter = %filter, branch = %branch, "Branch filtered, skipping");
                    continue;
                }
            }
            runs.push(
                self.trigger
                    .trigger(project, &pipeline, metadata.clone())
                    .await?,
            );
        }

        let summary = format!("triggered {} run(s)", runs.len());
        Ok(Handled { runs, summary })
    }

    async fn handle_pull_request(
        &self,
        project: &Project,
        event: PullRequestEvent,
    ) -> Result<Handled, WebhookError> {
        if !event.should_trigger() {
            info!(action = %event.action, "Pull request action ignored");
            return Ok(Handled::ignored(format!("action {} ignored", event.action)));
        }

        let pr = &event.pull_request;
        let number = if pr.number != 0 { pr.number } else { event.number };
        info!(project = %project.name, pr = number, sha = %pr.head.sha, "Processing pull request event");

        let pipelines = self
            .pipelines
            .find_active_by_project(
                project.id,
                &[TriggerCondition::PullRequest, TriggerCondition::Webhook],
            )
            .await?;

        let login = pr.user.as_ref().map(|u| u.login.clone());
        let metadata = TriggerMetadata {
            branch: pr.head.r#ref.clone(),
            commit_hash: pr.head.sha.clone(),
            commit_message: Some(pr.title.clone()).filter(|t| !t.is_empty()),
            author_name: login.clone(),
            author_email: None,
            repository_url: repository_url(&event.repository.html_url, project),
            triggered_by: triggered_by(login.as_deref().unwrap_or_default()),
            pr_number: Some(number),
            pr_url: Some(pr.html_url.clone()).filter(|u| !u.is_empty()),
            base_branch: Some(pr.base.r#ref.clone()).filter(|b| !b.is_empty()),
        };

        let mut runs = Vec::new();
        for pipeline in pipelines {
            runs.push(
                self.trigger
                    .trigger(project, &pipeline, metadata.clone())
                    .await?,
            );
        }

        let summary = format!("triggered {} run(s)", runs.len());
        Ok(Handled { runs, summary })
    }
}

fn repository_url(from_event: &str, project: &Project) -> String {
    if from_event.is_empty() {
        project.repository_url.clone()
    } else {
        from_event.to_string()
    }
}

fn triggered_by(name: &str) -> String {
    if name.is_empty() {
        "webhook".to_string()
    } else {
        name.to_string()
    }
}
