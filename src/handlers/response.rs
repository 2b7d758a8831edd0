//! HTTP reply and rejection plumbing
//!
//! Every error body on the wire is `{"message": ...}` with a mapped
//! status. User-actionable problems carry their message through;
//! infrastructure failures are logged and collapsed to a generic 5xx.

use std::convert::Infallible;

use log::error;
use serde::Serialize;
use warp::http::StatusCode;
use warp::{Rejection, Reply};

use crate::error::ChatHubError;

/// Wraps a crate error so it can travel through warp's rejection machinery
#[derive(Debug)]
pub struct ApiReject(pub ChatHubError);

impl warp::reject::Reject for ApiReject {}

pub fn reject(err: ChatHubError) -> Rejection {
    warp::reject::custom(ApiReject(err))
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
}

pub fn status_for(err: &ChatHubError) -> StatusCode {
    match err {
        ChatHubError::AuthError(_) => StatusCode::UNAUTHORIZED,
        ChatHubError::Forbidden(_) => StatusCode::FORBIDDEN,
        ChatHubError::Validation(_) | ChatHubError::MessageParseError(_) => {
            StatusCode::BAD_REQUEST
        }
        ChatHubError::MessageTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
        ChatHubError::NotFound(_) => StatusCode::NOT_FOUND,
        ChatHubError::RateLimited | ChatHubError::RoomFull | ChatHubError::RoomBusy => {
            StatusCode::TOO_MANY_REQUESTS
        }
        ChatHubError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
        ChatHubError::StorageError(_)
        | ChatHubError::CacheError(_)
        | ChatHubError::ConnectionClosed
        | ChatHubError::ConfigError(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub fn json_reply<T: Serialize>(status: StatusCode, value: &T) -> warp::reply::Response {
    warp::reply::with_status(warp::reply::json(value), status).into_response()
}

pub fn json_error(status: StatusCode, message: impl Into<String>) -> warp::reply::Response {
    json_reply(
        status,
        &ErrorBody {
            message: message.into(),
        },
    )
}

/// Renders every rejection as the `{message}` error envelope
pub async fn handle_rejection(err: Rejection) -> Result<warp::reply::Response, Infallible> {
    if let Some(ApiReject(e)) = err.find::<ApiReject>() {
        let status = status_for(e);
        if status.is_server_error() {
            error!("request failed: {}", e);
            return Ok(json_error(status, "internal server error"));
        }
        return Ok(json_error(status, e.to_string()));
    }

    if err.is_not_found() {
        return Ok(json_error(StatusCode::NOT_FOUND, "not found"));
    }
    if err
        .find::<warp::filters::body::BodyDeserializeError>()
        .is_some()
    {
        return Ok(json_error(StatusCode::BAD_REQUEST, "invalid request format"));
    }
    if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        return Ok(json_error(
            StatusCode::METHOD_NOT_ALLOWED,
            "method not allowed",
        ));
    }

    error!("unhandled rejection: {:?}", err);
    Ok(json_error(
        StatusCode::INTERNAL_SERVER_ERROR,
        "internal server error",
    ))
}
