use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use services::services::events::{ConnectionNotifier, EventSink, JobEvent};

use super::message::ClientMessage;
use crate::AppState;

pub async fn handle(socket: WebSocket, state: AppState) {
    let (notifier, mut events) = ConnectionNotifier::channel();
    let notifier = Arc::new(notifier);
    let (mut sender, mut inbound) = socket.split();

    tracing::debug!("websocket session started");

    loop {
        tokio::select! {
            maybe_event = events.recv() => {
                match maybe_event {
                    Some(event) => {
                        if send_event(&mut sender, &event).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }

            maybe_message = inbound.next() => {
                match maybe_message {
                    Some(Ok(Message::Text(text))) => {
                        // Starting a job touches the store; keep draining events meanwhile.
                        let state = state.clone();
                        let notifier = notifier.clone();
                        tokio::spawn(async move {
                            handle_inbound_message(&state, text.as_str(), &notifier).await;
                        });
                    }
                    Some(Ok(Message::Close(_))) => break,
                    Some(Ok(_)) => {}
                    Some(Err(error)) => {
                        tracing::debug!(?error, "websocket receive error");
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    // Running jobs keep going; their remaining events are dropped.
    tracing::debug!("websocket session ended");
}

/// Act on one client frame. Every reply, including parse errors, goes out
/// through `notifier` so it stays ordered with job events.
pub async fn handle_inbound_message(
    state: &AppState,
    payload: &str,
    notifier: &Arc<ConnectionNotifier>,
) {
    let message: ClientMessage = match serde_json::from_str(payload) {
        Ok(message) => message,
        Err(error) => {
            tracing::debug!(?error, "invalid inbound message");
            notifier.emit(JobEvent::error(format!("Invalid message: {}", error)));
            return;
        }
    };

    match message {
        ClientMessage::ExecuteCommand { key } => {
            let sink: Arc<dyn EventSink> = notifier.clone();
            // Failures were already reported to the client as events.
            if let Err(error) = state.jobs().execute(&key, sink).await {
                tracing::debug!(%key, %error, "execute-command did not start a process");
            }
        }
    }
}

async fn send_event(
    sender: &mut SplitSink<WebSocket, Message>,
    event: &JobEvent,
) -> Result<(), ()> {
    match serde_json::to_string(event) {
        Ok(json) => sender
            .send(Message::Text(json.into()))
            .await
            .map_err(|error| {
                tracing::debug!(?error, "failed to send job event");
            }),
        Err(error) => {
            tracing::error!(?error, "failed to serialise job event");
            Err(())
        }
    }
}
