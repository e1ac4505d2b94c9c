//! Turns raw non-2xx responses and transport errors into messages fit for
//! a terminal. The transport itself never calls into this module.

use crate::error::ClientError;
use http::StatusCode;
use serde::Deserialize;
use std::fmt;

const DESKTOP_NOT_RUNNING: &str =
    "Beeper Desktop not running or API disabled. Start Beeper and enable Developer API in Settings";

/// Error body returned by the local API
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: String,
    pub message: String,
}

/// One entry of a validation error array
#[derive(Debug, Deserialize)]
struct ValidationError {
    #[serde(default)]
    path: Vec<String>,
    message: String,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

impl ApiError {
    /// Build from a response status and body. Never fails; unparseable
    /// bodies leave `code` and `message` empty.
    pub fn from_response(status: StatusCode, body: &[u8]) -> Self {
        let mut err = Self {
            status,
            code: String::new(),
            message: String::new(),
        };

        if body.is_empty() {
            return err;
        }

        if let Some(message) = parse_validation_errors(body) {
            err.message = message;
            return err;
        }

        if let Ok(parsed) = serde_json::from_slice::<ErrorBody>(body) {
            err.code = parsed.code;
            err.message = parsed.message;
        }
        err
    }

    pub fn is_not_found(&self) -> bool {
        self.status == StatusCode::NOT_FOUND
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status == StatusCode::UNAUTHORIZED
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "API error: {}", self.status.as_u16())
        } else {
            f.write_str(&self.message)
        }
    }
}

impl std::error::Error for ApiError {}

/// `[{path, message}, ...]` joined as `a.b: msg; other`
fn parse_validation_errors(body: &[u8]) -> Option<String> {
    let errors: Vec<ValidationError> = serde_json::from_slice(body).ok()?;
    if errors.is_empty() {
        return None;
    }

    let messages: Vec<String> = errors
        .into_iter()
        .map(|ve| {
            let path = ve.path.join(".");
            if path.is_empty() {
                ve.message
            } else {
                format!("{}: {}", path, ve.message)
            }
        })
        .collect();
    Some(messages.join("; "))
}

/// Message for a non-2xx response. `context` names the thing being looked
/// up (e.g. `"Chat 123"`) and is only used for 404s.
pub fn user_facing(status: StatusCode, body: &[u8], context: Option<&str>) -> String {
    let err = ApiError::from_response(status, body);

    match status {
        StatusCode::UNAUTHORIZED => "Invalid or expired token. Run: beeper auth add".to_string(),
        StatusCode::NOT_FOUND => match context.filter(|c| !c.is_empty()) {
            Some(context) => format!("{} not found", context),
            None if !err.message.is_empty() => format!("Not found: {}", err.message),
            None => "Not found".to_string(),
        },
        StatusCode::BAD_REQUEST | StatusCode::INTERNAL_SERVER_ERROR
            if !err.message.is_empty() =>
        {
            format!("invalid request: {}", err.message)
        }
        _ => err.to_string(),
    }
}

/// Message for a transport-layer failure
pub fn friendly_transport_error(err: &ClientError) -> String {
    if err.is_connection_refused() {
        return DESKTOP_NOT_RUNNING.to_string();
    }
    err.to_string()
}
