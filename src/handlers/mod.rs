//! Request handlers and route table

pub mod auth;
pub mod chat;
pub mod response;
pub mod websocket;

use std::convert::Infallible;
use std::sync::Arc;

use warp::Filter;

use crate::auth::AuthVerifier;
use crate::config::ServerConfig;
use crate::constants::API_PREFIX;
use crate::core::hub::Hub;
use crate::core::ingress::Ingress;
use crate::storage::chat_cache::ChatCacheService;
use crate::storage::traits::{ChatStore, IdentityProvider};

/// Handler state. Every collaborator arrives by construction; there is
/// no process-wide mutable state besides the hub itself.
pub struct AppState {
    pub config: ServerConfig,
    pub store: Arc<dyn ChatStore>,
    pub identity: Arc<dyn IdentityProvider>,
    pub cache: Arc<ChatCacheService>,
    pub hub: Arc<Hub>,
    pub verifier: Arc<dyn AuthVerifier>,
    pub ingress: Arc<Ingress>,
}

/// Helper to include the shared state in a request
pub fn with_state(
    state: Arc<AppState>,
) -> impl Filter<Extract = (Arc<AppState>,), Error = Infallible> + Clone {
    warp::any().map(move || Arc::clone(&state))
}

/// Builds the full route table under the `/api` prefix
pub fn routes(
    state: Arc<AppState>,
) -> impl Filter<Extract = (impl warp::Reply,), Error = Infallible> + Clone {
    let api = warp::path(API_PREFIX);

    let send_message = api
        .and(warp::path!("sendmessage"))
        .and(warp::post())
        .and(auth::authenticated(Arc::clone(&state)))
        .and(warp::body::json())
        .and(with_state(Arc::clone(&state)))
        .and_then(chat::send_message);

    let create_chat = api
        .and(warp::path!("chat" / "create"))
        .and(warp::post())
        .and(auth::authenticated(Arc::clone(&state)))
        .and(warp::body::json())
        .and(with_state(Arc::clone(&state)))
        .and_then(chat::create_chat);

    let create_group = api
        .and(warp::path!("chat" / "group" / "create"))
        .and(warp::post())
        .and(auth::authenticated(Arc::clone(&state)))
        .and(warp::body::json())
        .and(with_state(Arc::clone(&state)))
        .and_then(chat::create_group);

    let list_chats = api
        .and(warp::path!("chat" / "list"))
        .and(warp::get())
        .and(auth::authenticated(Arc::clone(&state)))
        .and(with_state(Arc::clone(&state)))
        .and_then(chat::list_chats);

    let chat_ws = api
        .and(warp::path!("chat" / u64 / "ws"))
        .and(warp::ws())
        .and(warp::header::optional::<String>("authorization"))
        .and(with_state(Arc::clone(&state)))
        .and_then(websocket::upgrade_chat);

    let chat_messages = api
        .and(warp::path!("chat" / u64 / "messages"))
        .and(warp::get())
        .and(auth::authenticated(Arc::clone(&state)))
        .and(warp::query::<chat::MessagesQuery>())
        .and(with_state(Arc::clone(&state)))
        .and_then(chat::get_messages);

    let chat_join = api
        .and(warp::path!("chat" / "join" / u64 / u64))
        .and(warp::post())
        .and(auth::authenticated(Arc::clone(&state)))
        .and(with_state(Arc::clone(&state)))
        .and_then(chat::user_joined);

    let chat_leave = api
        .and(warp::path!("chat" / "leave" / u64 / u64))
        .and(warp::post())
        .and(auth::authenticated(Arc::clone(&state)))
        .and(with_state(Arc::clone(&state)))
        .and_then(chat::user_left);

    let chat_info = api
        .and(warp::path!("chat" / u64))
        .and(warp::get())
        .and(auth::authenticated(Arc::clone(&state)))
        .and(with_state(Arc::clone(&state)))
        .and_then(chat::get_chat_info);

    let health = warp::path!("health").and(warp::get()).map(|| "OK");

    send_message
        .or(create_chat)
        .or(create_group)
        .or(list_chats)
        .or(chat_ws)
        .or(chat_messages)
        .or(chat_join)
        .or(chat_leave)
        .or(chat_info)
        .or(health)
        .recover(response::handle_rejection)
}
