use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

/// Rejection of a connection attempt before the WebSocket upgrade completes.
///
/// No per-connection state exists yet when one of these is returned, so the
/// client receives a plain HTTP error instead of a close frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectError {
    /// No credential was presented with the handshake.
    MissingCredential,
    /// The credential failed signature or expiry checks.
    InvalidCredential,
    /// The `Origin` header does not match the configured allowed origin.
    OriginNotAllowed,
    /// Too many connection attempts from this origin within the window.
    RateLimited,
}

impl ConnectError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MissingCredential | Self::InvalidCredential => StatusCode::UNAUTHORIZED,
            Self::OriginNotAllowed => StatusCode::FORBIDDEN,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingCredential => "MISSING_CREDENTIAL",
            Self::InvalidCredential => "INVALID_CREDENTIAL",
            Self::OriginNotAllowed => "ORIGIN_NOT_ALLOWED",
            Self::RateLimited => "RATE_LIMITED",
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            Self::MissingCredential => "Missing authentication credential",
            Self::InvalidCredential => "Invalid or expired credential",
            Self::OriginNotAllowed => "Origin not allowed",
            Self::RateLimited => "Too many connection attempts",
        }
    }
}

impl IntoResponse for ConnectError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": {
                "code": self.code(),
                "message": self.message(),
            }
        });
        (self.status(), Json(body)).into_response()
    }
}

/// Failure of a single inbound command on an established connection.
///
/// Converted into a typed `error` event to the sender; never terminates the
/// connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// The sender tried to publish into a room they never joined.
    NotInRoom { room_id: String },
    /// A chat message with no content.
    EmptyMessage,
}

impl CommandError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotInRoom { .. } => "NOT_IN_ROOM",
            Self::EmptyMessage => "EMPTY_MESSAGE",
        }
    }

    pub fn message(&self) -> String {
        match self {
            Self::NotInRoom { room_id } => format!("Not a member of room {room_id}"),
            Self::EmptyMessage => "Message content is empty".to_string(),
        }
    }
}
