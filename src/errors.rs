//! Error taxonomy
//!
//! Every pipeline step fails with a `PipelineError`; the single place
//! errors become responses is `error_response`. Unknown and internal
//! failures are flattened to an opaque 500 so no detail leaks to the
//! caller.

use thiserror::Error;
use tracing::error;

use crate::connection::{Connection, Response};
use crate::resource::store::StoreError;

/// Typed failure raised by pipeline steps.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Malformed request. Defaults to 400; other 4xx codes via
    /// `client_with_status`.
    #[error("{message}")]
    Client { message: String, status_code: u16 },

    /// Authentication or ownership failure. Always 401.
    #[error("{0}")]
    NotAuthorized(String),

    /// Body failed schema validation. Always 422 with per-field
    /// messages.
    #[error("body failed validation")]
    Validation(Vec<String>),

    /// No row matched a lookup or mutation. Carries the offending
    /// connection for diagnostics.
    #[error("record was not found in `{table}`")]
    RecordNotFound {
        table: String,
        conn: Box<Connection>,
    },

    /// Payload contained a key the operation does not accept (for
    /// example the id column on create). Carries the offending
    /// connection for diagnostics.
    #[error("data contained a disallowed key")]
    DisallowedKey {
        keys: Vec<String>,
        conn: Box<Connection>,
    },

    /// A legacy middleware wrote and ended its response before the
    /// pipeline could continue. The captured response is emitted as-is.
    #[error("legacy middleware ended the response early")]
    EarlyResponse(Response),

    /// The row store failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Contract violation or unexpected fault. Detail is logged, never
    /// returned to the caller.
    #[error("{0}")]
    Internal(String),
}

impl PipelineError {
    pub fn client(message: impl Into<String>) -> Self {
        Self::Client {
            message: message.into(),
            status_code: 400,
        }
    }

    pub fn client_with_status(message: impl Into<String>, status_code: u16) -> Self {
        Self::Client {
            message: message.into(),
            status_code,
        }
    }

    pub fn not_authorized(message: impl Into<String>) -> Self {
        Self::NotAuthorized(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    pub fn record_not_found(table: impl Into<String>, conn: Connection) -> Self {
        Self::RecordNotFound {
            table: table.into(),
            conn: Box::new(conn),
        }
    }

    pub fn disallowed_key(keys: Vec<String>, conn: Connection) -> Self {
        Self::DisallowedKey {
            keys,
            conn: Box::new(conn),
        }
    }

    /// HTTP status this error maps to.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Client { status_code, .. } => *status_code,
            Self::NotAuthorized(_) => 401,
            Self::Validation(_) => 422,
            Self::RecordNotFound { .. } => 404,
            Self::DisallowedKey { .. } => 400,
            Self::EarlyResponse(resp) => resp.status_code,
            Self::Store(_) | Self::Internal(_) => 500,
        }
    }

    /// Convert this error into the response the caller sees.
    pub fn into_response(self) -> Response {
        match self {
            Self::EarlyResponse(resp) => resp,
            Self::Validation(messages) => {
                Response::new(422, format!("errors:\n{}", messages.join("\n")))
            }
            Self::Store(err) => {
                error!(error = %err, "store failure surfaced as opaque 500");
                Response::new(500, "an error occurred")
            }
            Self::Internal(detail) => {
                error!(detail = %detail, "internal failure surfaced as opaque 500");
                Response::new(500, "an error occurred")
            }
            other => {
                let status = other.status_code();
                Response::new(status, other.to_string())
            }
        }
    }
}

/// Total conversion from any pipeline failure to a response. The only
/// error-to-response point in the crate.
pub fn error_response(err: PipelineError) -> Response {
    err.into_response()
}
