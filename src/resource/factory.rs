//! Resource factory
//!
//! Generates the CRUD pipeline steps for a named table: find, get,
//! create, update, destroy, plus the small request-shaping steps that
//! feed them (body decode, item id extraction, query criterion,
//! owner stamping).

use std::sync::Arc;

use serde_json::Value;

use crate::connection::{Capability, Connection, Criterion, ItemId};
use crate::errors::PipelineError;
use crate::pipeline::{BoxFuture, Flow, Step, StepResult};

use super::schema::BodySchema;
use super::store::RowStore;

/// Table and column conventions for one resource.
#[derive(Debug, Clone)]
pub struct ResourceOptions {
    pub table: String,
    pub id_column: String,
    pub owner_column: String,
}

impl ResourceOptions {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            id_column: "id".to_string(),
            owner_column: "owner_id".to_string(),
        }
    }

    pub fn with_id_column(mut self, column: impl Into<String>) -> Self {
        self.id_column = column.into();
        self
    }

    pub fn with_owner_column(mut self, column: impl Into<String>) -> Self {
        self.owner_column = column.into();
        self
    }
}

/// Generates CRUD steps for one table over an injected store.
///
/// The store handle is passed in explicitly so pipelines stay testable
/// in isolation; nothing here touches process-wide state.
#[derive(Clone)]
pub struct Resource {
    store: Arc<dyn RowStore>,
    options: ResourceOptions,
}

impl Resource {
    pub fn new(store: Arc<dyn RowStore>, options: ResourceOptions) -> Self {
        Self { store, options }
    }

    pub fn options(&self) -> &ResourceOptions {
        &self.options
    }

    pub(crate) fn store(&self) -> Arc<dyn RowStore> {
        self.store.clone()
    }

    /// List rows, optionally filtered by an attached criterion. Zero
    /// matches yield an empty list, never an error.
    pub fn find(&self) -> FindStep {
        FindStep {
            store: self.store.clone(),
            options: self.options.clone(),
        }
    }

    /// Load one row by the attached item id; `RecordNotFound` when no
    /// row matches.
    pub fn get(&self) -> GetStep {
        GetStep {
            store: self.store.clone(),
            options: self.options.clone(),
        }
    }

    /// Insert the typed body; attaches the created row including any
    /// store-generated identifier.
    pub fn create(&self) -> CreateStep {
        CreateStep {
            store: self.store.clone(),
            options: self.options.clone(),
        }
    }

    /// Patch the row matching the attached item id with the typed
    /// body; `RecordNotFound` when zero rows were affected.
    pub fn update(&self) -> UpdateStep {
        UpdateStep {
            store: self.store.clone(),
            options: self.options.clone(),
        }
    }

    /// Delete the row matching the attached item id; `RecordNotFound`
    /// when zero rows were affected.
    pub fn destroy(&self) -> DestroyStep {
        DestroyStep {
            store: self.store.clone(),
            options: self.options.clone(),
        }
    }
}

fn disallowed_id_key(
    body: &Value,
    id_column: &str,
    conn: Connection,
) -> Result<Connection, PipelineError> {
    match body.as_object() {
        Some(obj) if obj.contains_key(id_column) => Err(PipelineError::disallowed_key(
            vec![id_column.to_string()],
            conn,
        )),
        _ => Ok(conn),
    }
}

pub struct FindStep {
    store: Arc<dyn RowStore>,
    options: ResourceOptions,
}

impl Step for FindStep {
    fn name(&self) -> &str {
        "find"
    }

    fn provides(&self) -> &[Capability] {
        &[Capability::Rows]
    }

    fn run(&self, conn: Connection) -> BoxFuture<'_, StepResult> {
        Box::pin(async move {
            let criterion = conn.criterion().cloned();
            let rows = self
                .store
                .select(&self.options.table, criterion.as_ref())
                .await?;
            Ok(Flow::Continue(conn.with_rows(rows)))
        })
    }
}

pub struct GetStep {
    store: Arc<dyn RowStore>,
    options: ResourceOptions,
}

impl Step for GetStep {
    fn name(&self) -> &str {
        "get"
    }

    fn requires(&self) -> &[Capability] {
        &[Capability::ItemId]
    }

    fn provides(&self) -> &[Capability] {
        &[Capability::Row]
    }

    fn run(&self, conn: Connection) -> BoxFuture<'_, StepResult> {
        Box::pin(async move {
            let id = conn.require_item_id()?.to_string();
            let row = self
                .store
                .find_by_id(&self.options.table, &self.options.id_column, &id)
                .await?;
            match row {
                Some(row) => Ok(Flow::Continue(conn.with_row(row))),
                None => Err(PipelineError::record_not_found(&self.options.table, conn)),
            }
        })
    }
}

pub struct CreateStep {
    store: Arc<dyn RowStore>,
    options: ResourceOptions,
}

impl Step for CreateStep {
    fn name(&self) -> &str {
        "create"
    }

    fn requires(&self) -> &[Capability] {
        &[Capability::TypedBody]
    }

    fn provides(&self) -> &[Capability] {
        &[Capability::Row]
    }

    fn run(&self, conn: Connection) -> BoxFuture<'_, StepResult> {
        Box::pin(async move {
            let body = conn.require_typed_body()?.clone();
            let conn = disallowed_id_key(&body, &self.options.id_column, conn)?;
            let row = self
                .store
                .insert(&self.options.table, &self.options.id_column, body)
                .await?;
            Ok(Flow::Continue(conn.with_row(row)))
        })
    }
}

pub struct UpdateStep {
    store: Arc<dyn RowStore>,
    options: ResourceOptions,
}

impl Step for UpdateStep {
    fn name(&self) -> &str {
        "update"
    }

    fn requires(&self) -> &[Capability] {
        &[Capability::ItemId, Capability::TypedBody]
    }

    fn provides(&self) -> &[Capability] {
        &[Capability::Row]
    }

    fn run(&self, conn: Connection) -> BoxFuture<'_, StepResult> {
        Box::pin(async move {
            let id = conn.require_item_id()?.to_string();
            let body = conn.require_typed_body()?.clone();
            let conn = disallowed_id_key(&body, &self.options.id_column, conn)?;
            let updated = self
                .store
                .update_by_id(&self.options.table, &self.options.id_column, &id, body)
                .await?;
            match updated {
                Some(row) => Ok(Flow::Continue(conn.with_row(row))),
                None => Err(PipelineError::record_not_found(&self.options.table, conn)),
            }
        })
    }
}

pub struct DestroyStep {
    store: Arc<dyn RowStore>,
    options: ResourceOptions,
}

impl Step for DestroyStep {
    fn name(&self) -> &str {
        "destroy"
    }

    fn requires(&self) -> &[Capability] {
        &[Capability::ItemId]
    }

    fn run(&self, conn: Connection) -> BoxFuture<'_, StepResult> {
        Box::pin(async move {
            let id = conn.require_item_id()?.to_string();
            let affected = self
                .store
                .delete_by_id(&self.options.table, &self.options.id_column, &id)
                .await?;
            if affected == 0 {
                return Err(PipelineError::record_not_found(&self.options.table, conn));
            }
            Ok(Flow::Continue(conn))
        })
    }
}

/// Validate the raw body against a schema, narrowing it to a typed
/// payload.
pub struct DecodeBody {
    schema: BodySchema,
}

pub fn decode_body(schema: BodySchema) -> DecodeBody {
    DecodeBody { schema }
}

impl Step for DecodeBody {
    fn name(&self) -> &str {
        "decode_body"
    }

    fn provides(&self) -> &[Capability] {
        &[Capability::TypedBody]
    }

    fn run(&self, conn: Connection) -> BoxFuture<'_, StepResult> {
        Box::pin(async move {
            let Some(raw) = conn.body().raw().cloned() else {
                return Err(PipelineError::client("request body is required"));
            };
            match self.schema.validate(&raw) {
                Ok(typed) => Ok(Flow::Continue(conn.with_typed_body(typed))),
                Err(messages) => Err(PipelineError::Validation(messages)),
            }
        })
    }
}

/// Read the item id from a route parameter.
pub struct ItemIdFromPath {
    param: String,
}

pub fn item_id_from_path(param: impl Into<String>) -> ItemIdFromPath {
    ItemIdFromPath {
        param: param.into(),
    }
}

impl Step for ItemIdFromPath {
    fn name(&self) -> &str {
        "item_id_from_path"
    }

    fn provides(&self) -> &[Capability] {
        &[Capability::ItemId]
    }

    fn run(&self, conn: Connection) -> BoxFuture<'_, StepResult> {
        Box::pin(async move {
            match conn.params.get(&self.param) {
                Some(id) if !id.is_empty() => {
                    let id = ItemId(id.clone());
                    Ok(Flow::Continue(conn.with_item_id(id)))
                }
                _ => Err(PipelineError::client(format!(
                    "missing route parameter `{}`",
                    self.param
                ))),
            }
        })
    }
}

/// Build the find criterion from whitelisted query parameters. Always
/// attaches a criterion; with no matching params it is empty and
/// matches every row.
pub struct CriterionFromQuery {
    columns: Vec<String>,
}

pub fn criterion_from_query(columns: &[&str]) -> CriterionFromQuery {
    CriterionFromQuery {
        columns: columns.iter().map(|c| c.to_string()).collect(),
    }
}

impl Step for CriterionFromQuery {
    fn name(&self) -> &str {
        "criterion_from_query"
    }

    fn provides(&self) -> &[Capability] {
        &[Capability::Criterion]
    }

    fn run(&self, conn: Connection) -> BoxFuture<'_, StepResult> {
        Box::pin(async move {
            let mut criterion = Criterion::default();
            for column in &self.columns {
                if let Some(value) = conn.query.get(column) {
                    criterion = criterion.eq(column.clone(), Value::String(value.clone()));
                }
            }
            Ok(Flow::Continue(conn.with_criterion(criterion)))
        })
    }
}

/// Stamp the authenticated user's id into the typed body's owner
/// column before a create.
pub struct SetOwner {
    owner_column: String,
}

pub fn set_owner(owner_column: impl Into<String>) -> SetOwner {
    SetOwner {
        owner_column: owner_column.into(),
    }
}

impl Step for SetOwner {
    fn name(&self) -> &str {
        "set_owner"
    }

    fn requires(&self) -> &[Capability] {
        &[Capability::User, Capability::TypedBody]
    }

    fn run(&self, conn: Connection) -> BoxFuture<'_, StepResult> {
        Box::pin(async move {
            let user_id = conn.require_user()?.id.clone();
            let mut body = conn.require_typed_body()?.clone();
            match body.as_object_mut() {
                Some(fields) => {
                    fields.insert(self.owner_column.clone(), Value::String(user_id));
                }
                None => {
                    return Err(PipelineError::internal(
                        "typed body is not an object; cannot stamp owner",
                    ))
                }
            }
            Ok(Flow::Continue(conn.with_typed_body(body)))
        })
    }
}
