//! CRUD response terminals
//!
//! Terminal handlers producing the standard envelopes: `{"rows": []}`
//! for lists, `{"row": {}}` for single rows, `{"status": "ok"}` for
//! destroys, `{"message": "..."}` for custom actions.

use serde_json::json;

use crate::connection::{Capability, Connection, Response};
use crate::errors::PipelineError;
use crate::pipeline::{BoxFuture, Terminal};

/// Respond 200 with `{"row": {...}}` from the attached row.
pub struct RowTerminal;

pub fn respond_row() -> RowTerminal {
    RowTerminal
}

impl Terminal for RowTerminal {
    fn name(&self) -> &str {
        "respond_row"
    }

    fn requires(&self) -> &[Capability] {
        &[Capability::Row]
    }

    fn respond(&self, conn: Connection) -> BoxFuture<'_, Result<Response, PipelineError>> {
        Box::pin(async move {
            let row = conn.require_row()?;
            Ok(Response::json(200, &json!({ "row": row })))
        })
    }
}

/// Respond 200 with `{"rows": [...]}` from the attached row list.
pub struct RowsTerminal;

pub fn respond_rows() -> RowsTerminal {
    RowsTerminal
}

impl Terminal for RowsTerminal {
    fn name(&self) -> &str {
        "respond_rows"
    }

    fn requires(&self) -> &[Capability] {
        &[Capability::Rows]
    }

    fn respond(&self, conn: Connection) -> BoxFuture<'_, Result<Response, PipelineError>> {
        Box::pin(async move {
            let rows = conn.require_rows()?;
            Ok(Response::json(200, &json!({ "rows": rows })))
        })
    }
}

/// Respond 200 with `{"status": "ok"}`, used after destroy.
pub struct OkTerminal;

pub fn respond_ok() -> OkTerminal {
    OkTerminal
}

impl Terminal for OkTerminal {
    fn name(&self) -> &str {
        "respond_ok"
    }

    fn respond(&self, _conn: Connection) -> BoxFuture<'_, Result<Response, PipelineError>> {
        Box::pin(async move { Ok(Response::json(200, &json!({ "status": "ok" }))) })
    }
}

/// Respond 200 with `{"message": "<text>"}`.
pub struct MessageTerminal {
    message: String,
}

pub fn respond_message(message: impl Into<String>) -> MessageTerminal {
    MessageTerminal {
        message: message.into(),
    }
}

impl Terminal for MessageTerminal {
    fn name(&self) -> &str {
        "respond_message"
    }

    fn respond(&self, _conn: Connection) -> BoxFuture<'_, Result<Response, PipelineError>> {
        Box::pin(async move { Ok(Response::json(200, &json!({ "message": self.message }))) })
    }
}
