//! WebSocket handling for real-time run events.

use std::collections::HashSet;

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use futures::{Sink, SinkExt, StreamExt};
use hookline_core::events::{BroadcastEvent, Broadcaster};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::AppState;

const HUB_CAPACITY: usize = 256;

/// Fan-out point between the run lifecycle and connected sockets.
#[derive(Clone)]
pub struct WsHub {
    sender: broadcast::Sender<BroadcastEvent>,
}

impl WsHub {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BroadcastEvent> {
        self.sender.subscribe()
    }
}

impl Default for WsHub {
    fn default() -> Self {
        Self::new(HUB_CAPACITY)
    }
}

impl Broadcaster for WsHub {
    fn publish(&self, event: BroadcastEvent) {
        // Err only means nobody is listening.
        if self.sender.send(event).is_err() {
            debug!("No WebSocket subscribers for event");
        }
    }
}

/// WebSocket upgrade handler.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let events = state.hub.subscribe();
    ws.on_upgrade(move |socket| handle_socket(socket, events))
}

async fn handle_socket(socket: WebSocket, mut events: broadcast::Receiver<BroadcastEvent>) {
    info!("WebSocket connection established");

    let (mut sink, mut stream) = socket.split();
    let mut channels = HashSet::new();

    loop {
        tokio::select! {
            msg = stream.next() => {
                let Some(msg) = msg else { break };
                match msg {
                    Ok(Message::Text(text)) => {
                        let Ok(cmd) = serde_json::from_str::<WsCommand>(&text) else {
                            continue;
                        };
                        let reply = match cmd {
                            WsCommand::Subscribe { channel } => {
                                info!(channel = %channel, "Client subscribed");
                                channels.insert(channel.clone());
                                WsMessage::Subscribed { channel }
                            }
                            WsCommand::Unsubscribe { channel } => {
                                info!(channel = %channel, "Client unsubscribed");
                                channels.remove(&channel);
                                WsMessage::Unsubscribed { channel }
                            }
                        };
                        if send_json(&mut sink, &reply).await.is_err() {
                            break;
                        }
                    }
                    Ok(Message::Close(_)) => {
                        info!("WebSocket connection closed");
                        break;
                    }
                    Err(e) => {
                        warn!(error = %e, "WebSocket error");
                        break;
                    }
                    _ => {}
                }
            }
            event = events.recv() => {
                match event {
                    Ok(event) => {
                        if wants(&channels, &event) && send_json(&mut sink, &event).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "WebSocket client lagging, events dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }
}

async fn send_json<S, T>(sink: &mut S, value: &T) -> Result<(), ()>
where
    S: Sink<Message> + Unpin,
    T: Serialize,
{
    let json = serde_json::to_string(value).map_err(|_| ())?;
    sink.send(Message::Text(json.into())).await.map_err(|_| ())
}

fn wants(channels: &HashSet<String>, event: &BroadcastEvent) -> bool {
    channels.contains("*") || event.channels().iter().any(|c| channels.contains(c))
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WsCommand {
    Subscribe { channel: String },
    Unsubscribe { channel: String },
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WsMessage {
    Subscribed { channel: String },
    Unsubscribed { channel: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use hookline_core::events::EventType;
    use hookline_core::pipeline::{
        Pipeline, PipelineRun, Project, RunStatus, TriggerCondition, TriggerMetadata,
    };
    use hookline_core::{PipelineId, ProjectId, RunId};

    fn event() -> BroadcastEvent {
        let project = Project {
            id: ProjectId::new(),
            name: "app".into(),
            repository_url: "https://github.com/acme/app".into(),
            branch: None,
        };
        let pipeline = Pipeline {
            id: PipelineId::new(),
            project_id: project.id,
            name: "ci".into(),
            active: true,
            trigger: TriggerCondition::Push,
            stages: vec![],
            status: None,
            last_run_at: None,
        };
        let run = PipelineRun {
            id: RunId::new(),
            pipeline_id: pipeline.id,
            number: 1,
            status: RunStatus::Pending,
            trigger: TriggerMetadata::default(),
            created_at: chrono::Utc::now(),
            started_at: None,
            finished_at: None,
        };
        BroadcastEvent::for_run(EventType::PipelineRunCreated, &project, &pipeline, &run)
    }

    #[test]
    fn test_channel_filter() {
        let event = event();
        let mut channels = HashSet::new();
        assert!(!wants(&channels, &event));

        channels.insert(format!("pipeline:{}", event.pipeline_id));
        assert!(wants(&channels, &event));

        channels.clear();
        channels.insert(format!("project:{}", ProjectId::new()));
        assert!(!wants(&channels, &event));

        channels.insert("*".to_string());
        assert!(wants(&channels, &event));
    }

    #[tokio::test]
    async fn test_hub_fans_out() {
        let hub = WsHub::default();
        let mut first = hub.subscribe();
        let mut second = hub.subscribe();

        let event = event();
        hub.publish(event.clone());

        assert_eq!(first.recv().await.unwrap(), event);
        assert_eq!(second.recv().await.unwrap(), event);
    }

    #[test]
    fn test_publish_without_subscribers_is_silent() {
        WsHub::default().publish(event());
    }
}
