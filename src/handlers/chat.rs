//! HTTP chat endpoints: sending, metadata, pagination and presence marks

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::warn;
use serde::{Deserialize, Serialize};
use warp::http::StatusCode;
use warp::Rejection;

use crate::auth::UserClaims;
use crate::constants::{
    CACHE_TIMEOUT, DEFAULT_PAGE_LIMIT, MAX_MESSAGE_LENGTH, MAX_PAGE_LIMIT, STORE_TIMEOUT,
};
use crate::core::ingress::escape_html;
use crate::core::message::{Chat, Message, MessageType};
use crate::error::{ChatHubError, Result};
use crate::handlers::response::{json_reply, reject};
use crate::handlers::AppState;
use crate::storage::traits::Direction;

// Request/Response structs

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    #[serde(default)]
    pub receiver_id: u64,
    #[serde(default)]
    pub chat_id: u64,
    pub message: String,
    #[serde(rename = "type", default)]
    pub kind: MessageType,
}

#[derive(Debug, Deserialize)]
pub struct CreateChatRequest {
    #[serde(default)]
    pub name: String,
    pub user_ids: Vec<u64>,
}

#[derive(Debug, Deserialize)]
pub struct CreateGroupRequest {
    pub name: String,
    pub user_ids: Vec<u64>,
}

#[derive(Debug, Deserialize)]
pub struct MessagesQuery {
    pub cursor: Option<String>,
    pub limit: Option<usize>,
    pub direction: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginationInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_cursor: Option<String>,
    pub has_next: bool,
    pub has_previous: bool,
    pub limit: usize,
    pub total_count: u64,
}

#[derive(Debug, Serialize)]
pub struct MessagesResponse {
    pub data: Vec<Message>,
    pub pagination: PaginationInfo,
}

#[derive(Debug, Serialize)]
pub struct ChatSummary {
    pub id: u64,
    pub name: String,
    #[serde(rename = "lastMessage", skip_serializing_if = "Option::is_none")]
    pub last_message: Option<Message>,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: String,
}

async fn with_timeout<T>(
    duration: Duration,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(duration, fut).await {
        Ok(result) => result,
        Err(_) => Err(ChatHubError::StorageError("operation timed out".to_string())),
    }
}

/// Membership gate shared by the read endpoints
async fn require_membership(state: &AppState, chat_id: u64, user_id: u64) -> Result<()> {
    let is_member =
        with_timeout(CACHE_TIMEOUT, state.identity.is_member(chat_id, user_id)).await?;
    if !is_member {
        return Err(ChatHubError::Forbidden(
            "user is not a member of this chat".to_string(),
        ));
    }
    Ok(())
}

/// POST /api/sendmessage
pub async fn send_message(
    claims: UserClaims,
    req: SendMessageRequest,
    state: Arc<AppState>,
) -> std::result::Result<warp::reply::Response, Rejection> {
    let text = req.message.trim();
    if text.is_empty() || text.chars().count() > MAX_MESSAGE_LENGTH {
        return Err(reject(ChatHubError::Validation(format!(
            "message must be 1-{} characters",
            MAX_MESSAGE_LENGTH
        ))));
    }

    let chat = if req.chat_id > 0 {
        let chat = with_timeout(STORE_TIMEOUT, state.store.get_chat(req.chat_id))
            .await
            .map_err(reject)?;
        require_membership(&state, chat.id, claims.user_id)
            .await
            .map_err(reject)?;
        chat
    } else {
        if req.receiver_id == 0 {
            return Err(reject(ChatHubError::Validation(
                "receiver_id is required".to_string(),
            )));
        }
        with_timeout(
            STORE_TIMEOUT,
            find_or_create_direct_chat(&state, claims.user_id, req.receiver_id),
        )
        .await
        .map_err(reject)?
    };

    let body = escape_html(text);
    let saved = state
        .ingress
        .process_message(chat.id, claims.user_id, body, req.kind)
        .await
        .map_err(reject)?;

    Ok(json_reply(StatusCode::CREATED, &saved))
}

/// Finds the existing two-party chat with `receiver` or creates one,
/// rolling the empty chat back when member insertion fails.
async fn find_or_create_direct_chat(
    state: &AppState,
    sender: u64,
    receiver: u64,
) -> Result<Chat> {
    let candidates = state.store.direct_chats_for_user(sender).await?;
    for chat in candidates {
        let members = match state.store.chat_members(chat.id).await {
            Ok(members) => members,
            Err(_) => continue,
        };
        if members.contains(&receiver) {
            return Ok(chat);
        }
    }

    let chat = state.store.create_chat("", false).await?;
    if let Err(e) = state
        .store
        .add_users_to_chat(chat.id, &[sender, receiver])
        .await
    {
        if let Err(rollback) = state.store.delete_chat(chat.id).await {
            warn!("failed to roll back chat {}: {}", chat.id, rollback);
        }
        return Err(e);
    }

    Ok(chat)
}

/// GET /api/chat/{id}
pub async fn get_chat_info(
    chat_id: u64,
    claims: UserClaims,
    state: Arc<AppState>,
) -> std::result::Result<warp::reply::Response, Rejection> {
    require_membership(&state, chat_id, claims.user_id)
        .await
        .map_err(reject)?;

    let chat = with_timeout(CACHE_TIMEOUT, state.store.get_chat(chat_id))
        .await
        .map_err(reject)?;

    Ok(json_reply(StatusCode::OK, &chat))
}

/// GET /api/chat/list
pub async fn list_chats(
    claims: UserClaims,
    state: Arc<AppState>,
) -> std::result::Result<warp::reply::Response, Rejection> {
    let chats = with_timeout(STORE_TIMEOUT, state.store.chats_for_user(claims.user_id))
        .await
        .map_err(reject)?;

    let mut summaries = Vec::with_capacity(chats.len());
    for chat in chats {
        let last_message = state
            .store
            .recent_messages(chat.id, 1)
            .await
            .ok()
            .and_then(|mut recent| recent.pop());
        summaries.push(ChatSummary {
            id: chat.id,
            name: chat.name,
            last_message,
            created_at: chat.created_at,
            updated_at: chat.updated_at,
        });
    }

    Ok(json_reply(StatusCode::OK, &summaries))
}

/// GET /api/chat/{id}/messages
pub async fn get_messages(
    chat_id: u64,
    claims: UserClaims,
    query: MessagesQuery,
    state: Arc<AppState>,
) -> std::result::Result<warp::reply::Response, Rejection> {
    require_membership(&state, chat_id, claims.user_id)
        .await
        .map_err(reject)?;

    let cursor = match query.cursor.as_deref().filter(|c| !c.is_empty()) {
        Some(raw) => Some(
            DateTime::parse_from_rfc3339(raw)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|_| {
                    reject(ChatHubError::Validation("invalid cursor format".to_string()))
                })?,
        ),
        None => None,
    };

    let limit = match query.limit {
        Some(limit) if (1..=MAX_PAGE_LIMIT).contains(&limit) => limit,
        _ => DEFAULT_PAGE_LIMIT,
    };
    let direction = Direction::parse(query.direction.as_deref().unwrap_or(""));

    let page = with_timeout(
        STORE_TIMEOUT,
        state.store.messages_page(chat_id, cursor, limit, direction),
    )
    .await
    .map_err(reject)?;

    // cursors anchor to the page edges; nanosecond precision keeps the
    // strict comparisons exact across a round-trip
    let format_cursor =
        |m: &Message| m.timestamp.to_rfc3339_opts(chrono::SecondsFormat::Nanos, true);
    let next_cursor = (page.has_next && !page.messages.is_empty())
        .then(|| page.messages.last().map(format_cursor))
        .flatten();
    let previous_cursor = (page.has_previous && !page.messages.is_empty())
        .then(|| page.messages.first().map(format_cursor))
        .flatten();

    let response = MessagesResponse {
        data: page.messages,
        pagination: PaginationInfo {
            next_cursor,
            previous_cursor,
            has_next: page.has_next,
            has_previous: page.has_previous,
            limit,
            total_count: page.total_count,
        },
    };

    Ok(json_reply(StatusCode::OK, &response))
}

/// POST /api/chat/create
pub async fn create_chat(
    claims: UserClaims,
    req: CreateChatRequest,
    state: Arc<AppState>,
) -> std::result::Result<warp::reply::Response, Rejection> {
    if req.user_ids.is_empty() {
        return Err(reject(ChatHubError::Validation(
            "at least one user is required".to_string(),
        )));
    }

    let chat = with_timeout(STORE_TIMEOUT, state.store.create_chat(req.name.trim(), false))
        .await
        .map_err(reject)?;

    let mut user_ids = req.user_ids;
    if !user_ids.contains(&claims.user_id) {
        user_ids.push(claims.user_id);
    }

    if let Err(e) = with_timeout(
        STORE_TIMEOUT,
        state.store.add_users_to_chat(chat.id, &user_ids),
    )
    .await
    {
        if let Err(rollback) = state.store.delete_chat(chat.id).await {
            warn!("failed to roll back chat {}: {}", chat.id, rollback);
        }
        return Err(reject(e));
    }

    Ok(json_reply(StatusCode::CREATED, &chat))
}

/// POST /api/chat/group/create
pub async fn create_group(
    claims: UserClaims,
    req: CreateGroupRequest,
    state: Arc<AppState>,
) -> std::result::Result<warp::reply::Response, Rejection> {
    let name = req.name.trim();
    if name.is_empty() {
        return Err(reject(ChatHubError::Validation(
            "group name is required".to_string(),
        )));
    }
    if req.user_ids.is_empty() {
        return Err(reject(ChatHubError::Validation(
            "at least one user is required".to_string(),
        )));
    }

    let mut user_ids = req.user_ids;
    if !user_ids.contains(&claims.user_id) {
        user_ids.push(claims.user_id);
    }

    let chat = with_timeout(
        STORE_TIMEOUT,
        state.store.create_group_chat(name, &user_ids),
    )
    .await
    .map_err(reject)?;

    Ok(json_reply(StatusCode::CREATED, &chat))
}

/// POST /api/chat/join/{chat_id}/{user_id}
pub async fn user_joined(
    chat_id: u64,
    user_id: u64,
    claims: UserClaims,
    state: Arc<AppState>,
) -> std::result::Result<warp::reply::Response, Rejection> {
    presence_mark(chat_id, user_id, claims, state, true).await
}

/// POST /api/chat/leave/{chat_id}/{user_id}
pub async fn user_left(
    chat_id: u64,
    user_id: u64,
    claims: UserClaims,
    state: Arc<AppState>,
) -> std::result::Result<warp::reply::Response, Rejection> {
    presence_mark(chat_id, user_id, claims, state, false).await
}

/// Presence marks are self-only: a user may not toggle anyone else
async fn presence_mark(
    chat_id: u64,
    user_id: u64,
    claims: UserClaims,
    state: Arc<AppState>,
    joined: bool,
) -> std::result::Result<warp::reply::Response, Rejection> {
    if claims.user_id != user_id {
        return Err(reject(ChatHubError::Forbidden(
            "cannot update presence for other users".to_string(),
        )));
    }

    let update = async {
        if joined {
            state.cache.user_joined(chat_id, user_id).await
        } else {
            state.cache.user_left(chat_id, user_id).await
        }
    };
    match tokio::time::timeout(CACHE_TIMEOUT, update).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => return Err(reject(e)),
        Err(_) => {
            return Err(reject(ChatHubError::CacheError(
                "presence update timed out".to_string(),
            )))
        }
    }

    let status = if joined { "user joined" } else { "user left" };
    Ok(json_reply(
        StatusCode::OK,
        &StatusResponse {
            status: status.to_string(),
        },
    ))
}
