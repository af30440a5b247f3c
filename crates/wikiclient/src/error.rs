//! Error taxonomy for wiki API calls.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, WikiError>;

#[derive(Debug, Error)]
pub enum WikiError {
    /// Connection failure or non-2xx HTTP status.
    #[error("{}", transport_message(.status, .message))]
    Transport {
        status: Option<u16>,
        message: String,
    },

    /// Response body was not JSON, or lacked a field the call consumes.
    #[error("unexpected API response: {0}")]
    Protocol(String),

    /// Server returned an `error` object on a non-edit call.
    #[error("MediaWiki API error [{code}]: {info}")]
    Api { code: String, info: String },

    #[error("login failed ({result}): {reason}")]
    Authentication { result: String, reason: String },

    #[error("page does not exist: {title}")]
    PageNotFound { title: String },

    /// The page changed after the base revision the caller edited from.
    #[error("edit conflict on {title}: {info}")]
    EditConflict { title: String, info: String },

    #[error("edit of {title} rejected [{code}]: {info}")]
    Edit {
        title: String,
        code: String,
        info: String,
    },

    #[error("invalid configuration: {0}")]
    Config(String),
}

fn transport_message(status: &Option<u16>, message: &str) -> String {
    match status {
        Some(status) => format!("MediaWiki API request failed with HTTP {status}: {message}"),
        None => format!("failed to call MediaWiki API: {message}"),
    }
}

impl WikiError {
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    pub(crate) fn from_reqwest(error: reqwest::Error) -> Self {
        Self::Transport {
            status: error.status().map(|status| status.as_u16()),
            message: error.to_string(),
        }
    }

    /// Server-provided error code, when the failure came from the API itself.
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Api { code, .. } | Self::Edit { code, .. } => Some(code.as_str()),
            Self::Authentication { result, .. } => Some(result.as_str()),
            Self::EditConflict { .. } => Some("editconflict"),
            _ => None,
        }
    }

    /// True for failures a fresh login may resolve.
    pub fn needs_reauthentication(&self) -> bool {
        match self {
            Self::Authentication { .. } => true,
            Self::Api { code, .. } | Self::Edit { code, .. } => matches!(
                code.as_str(),
                "badtoken" | "notloggedin" | "assertuserfailed" | "assertbotfailed"
            ),
            _ => false,
        }
    }

    pub(crate) fn is_bad_token(&self) -> bool {
        matches!(self, Self::Api { code, .. } if code == "badtoken")
    }
}
