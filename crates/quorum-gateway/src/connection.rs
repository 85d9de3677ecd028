use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast;
use tracing::{info, warn};
use uuid::Uuid;

use quorum_db::Database;
use quorum_types::events::{ClientCommand, SessionEvent};

use crate::dispatcher::Dispatcher;
use crate::workflow::{self, SessionError};

/// The client must identify within this window or the socket is closed.
const IDENTIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// Bound on any store or workflow call made on behalf of a socket command.
/// A slow downstream yields an explicit error event, never a hung group.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

/// The session group this connection is currently bound to.
struct GroupBinding {
    session_id: Uuid,
    rx: broadcast::Receiver<SessionEvent>,
}

/// Handle a single WebSocket connection.
///
/// Authentication happens exactly once, before any session logic runs: the
/// first frame must be an `identify` command carrying a valid JWT. The
/// connection is not bound to any session at transport-connect time — the
/// client binds explicitly with `join-session` once it knows the id.
pub async fn handle_connection(
    socket: WebSocket,
    dispatcher: Dispatcher,
    db: Arc<Database>,
    jwt_secret: String,
) {
    let (mut sender, mut receiver) = socket.split();

    let (user_id, username) = match wait_for_identify(&mut receiver, &jwt_secret).await {
        Some(id) => id,
        None => {
            warn!("WebSocket client failed to identify, closing");
            let _ = send_event(
                &mut sender,
                &SessionEvent::Error {
                    message: SessionError::Authentication.to_string(),
                },
            )
            .await;
            return;
        }
    };

    info!("{} ({}) connected to gateway", username, user_id);

    let ready = SessionEvent::Ready {
        user_id,
        username: username.clone(),
    };
    if send_event(&mut sender, &ready).await.is_err() {
        return;
    }

    let mut group: Option<GroupBinding> = None;

    loop {
        tokio::select! {
            incoming = receiver.next() => {
                let msg = match incoming {
                    Some(Ok(msg)) => msg,
                    _ => break,
                };
                match msg {
                    Message::Text(text) => match serde_json::from_str::<ClientCommand>(&text) {
                        Ok(cmd) => {
                            let handled = handle_command(
                                &mut sender,
                                &mut group,
                                &dispatcher,
                                &db,
                                user_id,
                                cmd,
                            )
                            .await;
                            if handled.is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            warn!(
                                "{} ({}) bad command: {} -- raw: {}",
                                username,
                                user_id,
                                e,
                                log_excerpt(&text)
                            );
                            let err = SessionEvent::Error {
                                message: "malformed command".to_string(),
                            };
                            if send_event(&mut sender, &err).await.is_err() {
                                break;
                            }
                        }
                    },
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            event = recv_group(&mut group) => {
                match event {
                    Ok(event) => {
                        if send_event(&mut sender, &event).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("{} ({}) lagged {} session events", username, user_id, n);
                        let err = SessionEvent::Error {
                            message: format!(
                                "missed {} events; rejoin the session for a fresh roster",
                                n
                            ),
                        };
                        if send_event(&mut sender, &err).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        group = None;
                    }
                }
            }
        }
    }

    // Disconnection is purely a transport event: drop the group binding,
    // never touch the roster.
    if let Some(binding) = group.take() {
        dispatcher.leave_group(binding.session_id).await;
    }
    info!("{} ({}) disconnected from gateway", username, user_id);
}

/// Receive from the bound group, or park forever while unbound.
async fn recv_group(
    group: &mut Option<GroupBinding>,
) -> Result<SessionEvent, broadcast::error::RecvError> {
    match group {
        Some(binding) => binding.rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn handle_command(
    sender: &mut SplitSink<WebSocket, Message>,
    group: &mut Option<GroupBinding>,
    dispatcher: &Dispatcher,
    db: &Arc<Database>,
    user_id: Uuid,
    cmd: ClientCommand,
) -> Result<(), ()> {
    match cmd {
        ClientCommand::Identify { .. } => Ok(()), // Already handled

        ClientCommand::JoinSession { session_id } => {
            if let Err(e) = bounded(workflow::active_session(db, session_id)).await {
                return report(sender, Err(e)).await;
            }

            // Rebinding replaces any previous binding, including one to the
            // same session — the fresh subscription plus the snapshot below
            // is the reconnect recovery path.
            if let Some(previous) = group.take() {
                dispatcher.leave_group(previous.session_id).await;
            }
            let rx = dispatcher.join_group(session_id).await;
            *group = Some(GroupBinding { session_id, rx });

            match bounded(workflow::roster(db, session_id)).await {
                Ok(participants) => {
                    dispatcher
                        .broadcast(session_id, SessionEvent::SessionUpdate { participants })
                        .await;
                    Ok(())
                }
                Err(e) => report(sender, Err(e)).await,
            }
        }

        ClientCommand::ApproveParticipant {
            session_id,
            participant_id,
        } => {
            let result = bounded(workflow::approve(
                db,
                dispatcher,
                user_id,
                session_id,
                participant_id,
            ))
            .await;
            report(sender, result).await
        }

        ClientCommand::RemoveParticipant {
            session_id,
            participant_id,
        } => {
            let result = bounded(workflow::remove(
                db,
                dispatcher,
                user_id,
                session_id,
                participant_id,
            ))
            .await;
            report(sender, result).await
        }

        ClientCommand::StartQuiz { session_id } => {
            let result = bounded(workflow::start(db, dispatcher, user_id, session_id)).await;
            report(sender, result).await
        }
    }
}

/// Cap a workflow call at COMMAND_TIMEOUT.
async fn bounded<F, T>(fut: F) -> Result<T, SessionError>
where
    F: Future<Output = Result<T, SessionError>>,
{
    match tokio::time::timeout(COMMAND_TIMEOUT, fut).await {
        Ok(result) => result,
        Err(_) => Err(SessionError::Internal(anyhow::anyhow!(
            "store call exceeded {:?}",
            COMMAND_TIMEOUT
        ))),
    }
}

/// Surface a workflow failure to the initiating connection only; a failed
/// host action must never poison the group's broadcast stream.
async fn report(
    sender: &mut SplitSink<WebSocket, Message>,
    result: Result<(), SessionError>,
) -> Result<(), ()> {
    match result {
        Ok(()) => Ok(()),
        Err(e) => {
            send_event(
                sender,
                &SessionEvent::Error {
                    message: e.to_string(),
                },
            )
            .await
        }
    }
}

async fn send_event(
    sender: &mut SplitSink<WebSocket, Message>,
    event: &SessionEvent,
) -> Result<(), ()> {
    let text = serde_json::to_string(event).unwrap();
    sender
        .send(Message::Text(text.into()))
        .await
        .map_err(|_| ())
}

/// First 200 bytes of a frame for logging, cut back to a char boundary so
/// multi-byte input can never panic the connection task.
fn log_excerpt(text: &str) -> &str {
    let mut end = text.len().min(200);
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

async fn wait_for_identify(
    receiver: &mut SplitStream<WebSocket>,
    jwt_secret: &str,
) -> Option<(Uuid, String)> {
    use jsonwebtoken::{DecodingKey, Validation, decode};
    use quorum_types::api::Claims;

    let timeout = tokio::time::timeout(IDENTIFY_TIMEOUT, async {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Text(text) = msg {
                if let Ok(ClientCommand::Identify { token }) =
                    serde_json::from_str::<ClientCommand>(&text)
                {
                    let token_data = decode::<Claims>(
                        &token,
                        &DecodingKey::from_secret(jwt_secret.as_bytes()),
                        &Validation::default(),
                    )
                    .ok()?;

                    return Some((token_data.claims.sub, token_data.claims.username));
                }
            }
        }
        None
    });

    timeout.await.ok().flatten()
}
