use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tracing::{info, warn};
use uuid::Uuid;

use threads_db::models::NewNotification;
use threads_types::events::{GatewayCommand, GatewayEvent};
use threads_types::models::{Conversation, NotificationKind};

use crate::notify::notify;
use crate::{GatewayContext, db_task};

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

const MAX_MESSAGE_LENGTH: usize = 2000;

/// Serve a socket whose token was already validated at the HTTP upgrade.
pub async fn handle_connection(socket: WebSocket, ctx: GatewayContext, user_id: i64, username: String) {
    let (mut sender, mut receiver) = socket.split();

    info!("{} ({}) connected to gateway", username, user_id);

    let (conn_id, mut outbound) = ctx.dispatcher.register(user_id).await;
    ctx.dispatcher
        .send_to_connection(
            conn_id,
            GatewayEvent::Ready {
                user_id,
                username: username.clone(),
            },
        )
        .await;

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward queued events -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                event = outbound.recv() => {
                    let Some(event) = event else { break };
                    let text = match serde_json::to_string(&event) {
                        Ok(text) => text,
                        Err(e) => {
                            warn!("Failed to serialize gateway event: {}", e);
                            continue;
                        }
                    };
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(Bytes::new())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read commands from client
    let recv_ctx = ctx.clone();
    let username_recv = username.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<GatewayCommand>(&text) {
                    Ok(cmd) => handle_command(&recv_ctx, conn_id, user_id, cmd).await,
                    Err(e) => {
                        warn!(
                            "{} ({}) bad command: {} -- raw: {}",
                            username_recv,
                            user_id,
                            e,
                            text.chars().take(200).collect::<String>()
                        );
                        recv_ctx
                            .dispatcher
                            .send_to_connection(conn_id, GatewayEvent::error("Malformed command"))
                            .await;
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    ctx.dispatcher.unregister(conn_id).await;
    info!("{} ({}) disconnected from gateway", username, user_id);
}

/// Execute one client command. Rejections go back to the issuing
/// connection as an `error` event; the socket stays open.
pub async fn handle_command(ctx: &GatewayContext, conn_id: Uuid, user_id: i64, cmd: GatewayCommand) {
    let result = match cmd {
        GatewayCommand::JoinConversation { conversation_id } => {
            join_conversation(ctx, conn_id, user_id, conversation_id).await
        }
        GatewayCommand::LeaveConversation { conversation_id } => {
            ctx.dispatcher.leave_room(conn_id, conversation_id).await;
            Ok(())
        }
        GatewayCommand::StartConversation { user_id: other_id } => {
            start_conversation(ctx, conn_id, user_id, other_id).await
        }
        GatewayCommand::SendMessage {
            conversation_id,
            content,
        } => send_message(ctx, user_id, conversation_id, content).await,
    };

    if let Err(rejection) = result {
        ctx.dispatcher
            .send_to_connection(conn_id, GatewayEvent::error(rejection))
            .await;
    }
}

type CommandResult = Result<(), String>;

async fn participant_conversation(
    ctx: &GatewayContext,
    user_id: i64,
    conversation_id: i64,
) -> Result<Conversation, String> {
    let conversation = db_task(&ctx.db, move |db| db.get_conversation(conversation_id, user_id))
        .await
        .map_err(internal)?
        .ok_or_else(|| "Conversation not found".to_string())?;

    if !conversation.has_participant(user_id) {
        warn!("user {} tried to use conversation {} without being in it", user_id, conversation_id);
        return Err("Not a participant in this conversation".into());
    }
    Ok(conversation)
}

async fn join_conversation(
    ctx: &GatewayContext,
    conn_id: Uuid,
    user_id: i64,
    conversation_id: i64,
) -> CommandResult {
    participant_conversation(ctx, user_id, conversation_id).await?;
    ctx.dispatcher.join_room(conn_id, conversation_id).await;
    Ok(())
}

async fn start_conversation(
    ctx: &GatewayContext,
    conn_id: Uuid,
    user_id: i64,
    other_id: i64,
) -> CommandResult {
    if other_id == user_id {
        return Err("Cannot start a conversation with yourself".into());
    }

    let conversation = db_task(&ctx.db, move |db| {
        if db.get_user_by_id(other_id)?.is_none() {
            return Ok(None);
        }
        db.find_or_create_conversation(user_id, other_id).map(Some)
    })
    .await
    .map_err(internal)?
    .ok_or_else(|| "User not found".to_string())?;

    info!("user {} opened conversation {} with user {}", user_id, conversation.id, other_id);
    ctx.dispatcher.join_room(conn_id, conversation.id).await;
    ctx.dispatcher
        .send_to_connection(conn_id, GatewayEvent::ConversationStarted(conversation))
        .await;
    Ok(())
}

async fn send_message(
    ctx: &GatewayContext,
    user_id: i64,
    conversation_id: i64,
    content: String,
) -> CommandResult {
    let content = content.trim().to_string();
    if content.is_empty() {
        return Err("Message content is required".into());
    }
    if content.chars().count() > MAX_MESSAGE_LENGTH {
        return Err(format!("Message must be at most {} characters", MAX_MESSAGE_LENGTH));
    }

    let conversation = participant_conversation(ctx, user_id, conversation_id).await?;

    let body = content.clone();
    let message = db_task(&ctx.db, move |db| db.insert_message(conversation_id, user_id, &body))
        .await
        .map_err(internal)?;

    ctx.dispatcher
        .emit_to_room(conversation_id, GatewayEvent::ReceiveMessage(message))
        .await;

    notify(
        &ctx.db,
        &ctx.dispatcher,
        NewNotification {
            recipient_id: conversation.other_participant(user_id),
            sender_id: user_id,
            kind: NotificationKind::Message,
            post_id: None,
            content: Some(content),
        },
    )
    .await;
    Ok(())
}

fn internal(e: anyhow::Error) -> String {
    tracing::error!("gateway command failed: {}", e);
    "Server error".to_string()
}
