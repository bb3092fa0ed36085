//! Generic CRUD resources
//!
//! Generates ownership-checked create/read/update/delete pipeline
//! steps for a named table, over an injected row store.

pub mod factory;
pub mod guard;
pub mod respond;
pub mod schema;
pub mod store;

pub use factory::{
    criterion_from_query, decode_body, item_id_from_path, set_owner, Resource, ResourceOptions,
};
pub use guard::OwnershipGuard;
pub use respond::{respond_message, respond_ok, respond_row, respond_rows};
pub use schema::{BodySchema, FieldDef, FieldType};
pub use store::{CallCounts, MemoryStore, RowStore, StoreError, StoreResult};
