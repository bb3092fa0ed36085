//! Ownership guard
//!
//! Composed before any mutating operation: loads the targeted row and
//! checks its owner column against the authenticated user. Both "wrong
//! owner" and "row missing" deny with 401 so a non-owner cannot probe
//! whether an id exists.

use std::sync::Arc;

use tracing::warn;

use crate::connection::{Capability, Connection};
use crate::errors::PipelineError;
use crate::pipeline::{BoxFuture, Flow, Step, StepResult};

use super::factory::{Resource, ResourceOptions};
use super::store::{value_matches_id, RowStore};

/// Step enforcing that the authenticated user owns the targeted row.
///
/// The read here and any later mutation are separate store calls;
/// nothing locks the row in between.
pub struct OwnershipGuard {
    store: Arc<dyn RowStore>,
    options: ResourceOptions,
}

impl OwnershipGuard {
    pub fn new(store: Arc<dyn RowStore>, options: ResourceOptions) -> Self {
        Self { store, options }
    }

    /// Guard for an existing resource's table and columns.
    pub fn for_resource(resource: &Resource) -> Self {
        Self {
            store: resource.store(),
            options: resource.options().clone(),
        }
    }

    fn denial(&self) -> PipelineError {
        PipelineError::not_authorized(format!(
            "you must own this {} to take that action",
            self.options.table
        ))
    }
}

impl Step for OwnershipGuard {
    fn name(&self) -> &str {
        "ownership_guard"
    }

    fn requires(&self) -> &[Capability] {
        &[Capability::User, Capability::ItemId]
    }

    fn run(&self, conn: Connection) -> BoxFuture<'_, StepResult> {
        Box::pin(async move {
            let user_id = conn.require_user()?.id.clone();
            let item_id = conn.require_item_id()?.to_string();

            let row = self
                .store
                .find_by_id(&self.options.table, &self.options.id_column, &item_id)
                .await?;

            match row {
                None => {
                    warn!(
                        table = %self.options.table,
                        item_id = %item_id,
                        "ownership check against a missing row; denying"
                    );
                    Err(self.denial())
                }
                Some(row) => {
                    let owns = row
                        .get(&self.options.owner_column)
                        .is_some_and(|owner| value_matches_id(owner, &user_id));
                    if owns {
                        Ok(Flow::Continue(conn))
                    } else {
                        warn!(
                            table = %self.options.table,
                            item_id = %item_id,
                            user = %user_id,
                            "ownership check failed"
                        );
                        Err(self.denial())
                    }
                }
            }
        })
    }
}
