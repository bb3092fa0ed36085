//! Connection model
//!
//! The immutable per-request value carried through the pipeline.
//! Steps never mutate a `Connection`; they consume it and return a new
//! one with additional capability slots filled in.

pub mod response;

use std::collections::HashMap;
use std::fmt;

use serde_json::Value;

use crate::errors::PipelineError;

pub use response::Response;

/// A capability slot a step can attach to a `Connection`.
///
/// Steps declare which capabilities they require and provide so that a
/// misordered pipeline is rejected at construction time instead of
/// reading an empty slot mid-request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Authenticated principal, attached by `RequiresLogin`.
    User,
    /// Identifier of the targeted row, attached by `item_id_from_path`.
    ItemId,
    /// A single loaded row.
    Row,
    /// A list of loaded rows.
    Rows,
    /// Equality filter for `find`.
    Criterion,
    /// Body narrowed from raw JSON to a schema-validated payload.
    TypedBody,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Capability::User => "user",
            Capability::ItemId => "item_id",
            Capability::Row => "row",
            Capability::Rows => "rows",
            Capability::Criterion => "criterion",
            Capability::TypedBody => "typed_body",
        };
        write!(f, "{}", name)
    }
}

/// The authenticated principal attached by the auth step.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthUser {
    /// Stable identifier, compared against row owner columns.
    pub id: String,
    /// Extra claims the authenticator chose to attach.
    pub claims: HashMap<String, Value>,
}

impl AuthUser {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            claims: HashMap::new(),
        }
    }

    pub fn with_claim(mut self, key: impl Into<String>, value: Value) -> Self {
        self.claims.insert(key.into(), value);
        self
    }
}

/// Identifier of the row targeted by get/update/destroy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemId(pub String);

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Equality filter handed to `find`, built from whitelisted query params.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Criterion(pub Vec<(String, Value)>);

impl Criterion {
    pub fn eq(mut self, column: impl Into<String>, value: Value) -> Self {
        self.0.push((column.into(), value));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Request body, narrowing from raw JSON to a validated payload as
/// decode steps run.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    /// As received from the transport; not yet validated.
    Untyped(Option<Value>),
    /// Validated against a `BodySchema`.
    Typed(Value),
}

impl Body {
    /// The raw body, if any was sent and no decode step ran yet.
    pub fn raw(&self) -> Option<&Value> {
        match self {
            Body::Untyped(v) => v.as_ref(),
            Body::Typed(_) => None,
        }
    }

    /// The validated body, if a decode step ran.
    pub fn typed(&self) -> Option<&Value> {
        match self {
            Body::Typed(v) => Some(v),
            Body::Untyped(_) => None,
        }
    }
}

/// The raw request handed over by the transport layer.
///
/// `Connection::from_raw` snapshots this value; mutating a `RawRequest`
/// after the snapshot never changes an already-created `Connection`.
#[derive(Debug, Clone, Default)]
pub struct RawRequest {
    pub method: String,
    pub path: String,
    pub params: HashMap<String, String>,
    pub query: HashMap<String, String>,
    pub headers: HashMap<String, String>,
    pub body: Option<Value>,
}

impl RawRequest {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(key.into(), value.into());
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }
}

/// Capability slots accumulated by pipeline steps. Attach-only.
#[derive(Debug, Clone, Default)]
struct Slots {
    user: Option<AuthUser>,
    item_id: Option<ItemId>,
    row: Option<Value>,
    rows: Option<Vec<Value>>,
    criterion: Option<Criterion>,
}

/// Immutable per-request value carried through the pipeline.
#[derive(Debug, Clone)]
pub struct Connection {
    pub method: String,
    pub path: String,
    pub params: HashMap<String, String>,
    pub query: HashMap<String, String>,
    pub headers: HashMap<String, String>,
    body: Body,
    slots: Slots,
}

impl Connection {
    /// Pure snapshot of the raw request at call time.
    pub fn from_raw(raw: &RawRequest) -> Self {
        Self {
            method: raw.method.clone(),
            path: raw.path.clone(),
            params: raw.params.clone(),
            query: raw.query.clone(),
            headers: raw.headers.clone(),
            body: Body::Untyped(raw.body.clone()),
            slots: Slots::default(),
        }
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    /// Whether the given capability slot has been attached.
    pub fn has(&self, cap: Capability) -> bool {
        match cap {
            Capability::User => self.slots.user.is_some(),
            Capability::ItemId => self.slots.item_id.is_some(),
            Capability::Row => self.slots.row.is_some(),
            Capability::Rows => self.slots.rows.is_some(),
            Capability::Criterion => self.slots.criterion.is_some(),
            Capability::TypedBody => matches!(self.body, Body::Typed(_)),
        }
    }

    pub fn with_user(mut self, user: AuthUser) -> Self {
        self.slots.user = Some(user);
        self
    }

    pub fn user(&self) -> Option<&AuthUser> {
        self.slots.user.as_ref()
    }

    pub fn require_user(&self) -> Result<&AuthUser, PipelineError> {
        self.user().ok_or_else(|| {
            PipelineError::internal("`user` read before any auth step attached it")
        })
    }

    pub fn with_item_id(mut self, id: ItemId) -> Self {
        self.slots.item_id = Some(id);
        self
    }

    pub fn item_id(&self) -> Option<&ItemId> {
        self.slots.item_id.as_ref()
    }

    pub fn require_item_id(&self) -> Result<&ItemId, PipelineError> {
        self.item_id().ok_or_else(|| {
            PipelineError::internal("`item_id` read before any step attached it")
        })
    }

    pub fn with_row(mut self, row: Value) -> Self {
        self.slots.row = Some(row);
        self
    }

    pub fn row(&self) -> Option<&Value> {
        self.slots.row.as_ref()
    }

    pub fn require_row(&self) -> Result<&Value, PipelineError> {
        self.row()
            .ok_or_else(|| PipelineError::internal("`row` read before any step attached it"))
    }

    pub fn with_rows(mut self, rows: Vec<Value>) -> Self {
        self.slots.rows = Some(rows);
        self
    }

    pub fn rows(&self) -> Option<&[Value]> {
        self.slots.rows.as_deref()
    }

    pub fn require_rows(&self) -> Result<&[Value], PipelineError> {
        self.rows()
            .ok_or_else(|| PipelineError::internal("`rows` read before any step attached it"))
    }

    pub fn with_criterion(mut self, criterion: Criterion) -> Self {
        self.slots.criterion = Some(criterion);
        self
    }

    pub fn criterion(&self) -> Option<&Criterion> {
        self.slots.criterion.as_ref()
    }

    /// Narrow the body to a validated payload.
    pub fn with_typed_body(mut self, body: Value) -> Self {
        self.body = Body::Typed(body);
        self
    }

    pub fn typed_body(&self) -> Option<&Value> {
        self.body.typed()
    }

    pub fn require_typed_body(&self) -> Result<&Value, PipelineError> {
        self.typed_body().ok_or_else(|| {
            PipelineError::internal("typed body read before a decode step validated it")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_snapshot_is_independent_of_raw_request() {
        let mut raw = RawRequest::new("GET", "/talks/7").with_param("id", "7");
        let conn = Connection::from_raw(&raw);

        raw.params.insert("id".to_string(), "8".to_string());
        raw.body = Some(json!({"title": "changed"}));

        assert_eq!(conn.params.get("id"), Some(&"7".to_string()));
        assert_eq!(conn.body().raw(), None);
    }

    #[test]
    fn test_capabilities_attach_without_mutating_input() {
        let raw = RawRequest::new("POST", "/talks");
        let conn = Connection::from_raw(&raw);
        let enriched = conn.clone().with_user(AuthUser::new("u1"));

        assert!(!conn.has(Capability::User));
        assert!(enriched.has(Capability::User));
        assert_eq!(enriched.user().map(|u| u.id.as_str()), Some("u1"));
    }

    #[test]
    fn test_require_user_fails_fast_when_missing() {
        let conn = Connection::from_raw(&RawRequest::new("GET", "/"));
        let err = conn.require_user().unwrap_err();
        assert_eq!(err.status_code(), 500);
    }

    #[test]
    fn test_body_narrows_from_raw_to_typed() {
        let raw = RawRequest::new("POST", "/talks").with_body(json!({"title": "t"}));
        let conn = Connection::from_raw(&raw);
        assert!(conn.body().raw().is_some());
        assert!(!conn.has(Capability::TypedBody));

        let conn = conn.with_typed_body(json!({"title": "t"}));
        assert!(conn.has(Capability::TypedBody));
        assert_eq!(conn.typed_body(), Some(&json!({"title": "t"})));
    }
}
